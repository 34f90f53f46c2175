/// Camera ground coverage from GPS telemetry.
///
/// Each "gps ok" fix becomes the rectangle the camera sees from that
/// position, assuming a nadir view. The most recent footprints are kept in
/// memory and every one is appended to a JSON-lines log.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use vultur_transfer::GpsFix;

pub const FOV_H_DEG: f64 = 35.5;
pub const FOV_V_DEG: f64 = 20.4;
/// Fixes below this altitude are treated as this altitude.
pub const MIN_ALT_M: f64 = 50.0;
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;
pub const MAX_FOOTPRINTS: usize = 250;

/// Lon/lat bounding box, WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Footprint {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Footprint {
    pub fn from_fix(fix: &GpsFix) -> Self {
        let alt = fix.alt.max(MIN_ALT_M);
        let w = 2.0 * alt * (FOV_H_DEG / 2.0).to_radians().tan();
        let h = 2.0 * alt * (FOV_V_DEG / 2.0).to_radians().tan();
        let (lat1, lon1) = offset(fix.lat, fix.lon, -w / 2.0, -h / 2.0);
        let (lat2, lon2) = offset(fix.lat, fix.lon, w / 2.0, h / 2.0);
        Self {
            min_lon: lon1.min(lon2),
            min_lat: lat1.min(lat2),
            max_lon: lon1.max(lon2),
            max_lat: lat1.max(lat2),
        }
    }
}

/// Move `dx` metres east and `dy` metres north (flat-earth approximation).
fn offset(lat: f64, lon: f64, dx: f64, dy: f64) -> (f64, f64) {
    let dlat = (dy / EARTH_RADIUS_M).to_degrees();
    let dlon = (dx / (EARTH_RADIUS_M * lat.to_radians().cos())).to_degrees();
    (lat + dlat, lon + dlon)
}

#[derive(Serialize)]
struct CoverageRecord<'a> {
    at: DateTime<Utc>,
    lat: f64,
    lon: f64,
    alt: f64,
    footprint: &'a Footprint,
}

pub struct CoverageLog {
    recent: VecDeque<Footprint>,
    file: Option<File>,
}

impl CoverageLog {
    /// In-memory only when `path` is None.
    pub fn open(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(p) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(p)
                    .with_context(|| format!("cannot open coverage log {}", p.display()))?,
            ),
            None => None,
        };
        Ok(Self {
            recent: VecDeque::with_capacity(MAX_FOOTPRINTS),
            file,
        })
    }

    pub fn record(&mut self, fix: &GpsFix, at: DateTime<Utc>) -> anyhow::Result<Footprint> {
        let footprint = Footprint::from_fix(fix);
        if self.recent.len() == MAX_FOOTPRINTS {
            self.recent.pop_front();
        }
        self.recent.push_back(footprint);

        if let Some(file) = self.file.as_mut() {
            let line = serde_json::to_string(&CoverageRecord {
                at,
                lat: fix.lat,
                lon: fix.lon,
                alt: fix.alt,
                footprint: &footprint,
            })?;
            writeln!(file, "{}", line).context("cannot append coverage log")?;
        }
        Ok(footprint)
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    /// Box around every kept footprint.
    pub fn bounds(&self) -> Option<Footprint> {
        self.recent.iter().copied().reduce(|a, b| Footprint {
            min_lon: a.min_lon.min(b.min_lon),
            min_lat: a.min_lat.min(b.min_lat),
            max_lon: a.max_lon.max(b.max_lon),
            max_lat: a.max_lat.max(b.max_lat),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(lat: f64, lon: f64, alt: f64) -> GpsFix {
        GpsFix { lat, lon, alt }
    }

    #[test]
    fn footprint_size_follows_altitude() {
        let fp = Footprint::from_fix(&fix(0.0, 0.0, 100.0));
        // At the equator one degree is ~111.3 km both ways.
        let width_m = (fp.max_lon - fp.min_lon).to_radians() * EARTH_RADIUS_M;
        let height_m = (fp.max_lat - fp.min_lat).to_radians() * EARTH_RADIUS_M;
        assert!((width_m - 64.0).abs() < 0.5, "{}", width_m);
        assert!((height_m - 36.0).abs() < 0.5, "{}", height_m);
        assert!((fp.min_lat + fp.max_lat).abs() < 1e-12);
        assert!((fp.min_lon + fp.max_lon).abs() < 1e-12);
    }

    #[test]
    fn low_altitude_is_clamped() {
        assert_eq!(
            Footprint::from_fix(&fix(-33.0, -71.6, 3.0)),
            Footprint::from_fix(&fix(-33.0, -71.6, MIN_ALT_M))
        );
    }

    #[test]
    fn keeps_most_recent() {
        let mut log = CoverageLog::open(None).unwrap();
        for i in 0..(MAX_FOOTPRINTS + 10) {
            log.record(&fix(i as f64 * 0.001, 0.0, 100.0), Utc::now()).unwrap();
        }
        assert_eq!(log.len(), MAX_FOOTPRINTS);
        let bounds = log.bounds().unwrap();
        assert!(bounds.min_lat > 0.009);
        assert!(bounds.max_lat > 0.25);
    }

    #[test]
    fn appends_json_lines() {
        let path = std::env::temp_dir().join(format!("vultur_coverage_{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);
        {
            let mut log = CoverageLog::open(Some(path.as_path())).unwrap();
            log.record(&fix(-33.04, -71.61, 120.0), Utc::now()).unwrap();
            log.record(&fix(-33.05, -71.62, 121.0), Utc::now()).unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["alt"], 121.0);
        assert!(lines[0]["footprint"]["min_lat"].as_f64().unwrap() < -33.04);
        let _ = std::fs::remove_file(&path);
    }
}
