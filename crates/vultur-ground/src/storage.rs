/// Received image storage: `<tag>_<UTC timestamp>.jpg` plus a JSON sidecar.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use vultur_transfer::CompletedPayload;

/// Sidecar written next to every saved image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub tag: String,
    pub file: String,
    pub received_at: DateTime<Utc>,
    pub size: usize,
    /// Announced by the sender.
    pub width: u16,
    pub height: u16,
    pub quality: u8,
    /// Found in the JPEG frame header.
    pub decoded_width: u16,
    pub decoded_height: u16,
    pub sha256: String,
}

pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create image dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, payload: &CompletedPayload, at: DateTime<Utc>) -> anyhow::Result<ImageRecord> {
        let stem = file_stem(&payload.tag, at);
        let image_path = self.dir.join(format!("{}.jpg", stem));
        let sidecar_path = self.dir.join(format!("{}.json", stem));

        fs::write(&image_path, &payload.bytes)
            .with_context(|| format!("cannot write {}", image_path.display()))?;

        let record = ImageRecord {
            tag: payload.tag.clone(),
            file: format!("{}.jpg", stem),
            received_at: at,
            size: payload.bytes.len(),
            width: payload.width,
            height: payload.height,
            quality: payload.quality,
            decoded_width: payload.image.width,
            decoded_height: payload.image.height,
            sha256: hex::encode(Sha256::digest(&payload.bytes)),
        };
        let json = serde_json::to_string_pretty(&record)?;
        fs::write(&sidecar_path, json)
            .with_context(|| format!("cannot write {}", sidecar_path.display()))?;
        Ok(record)
    }
}

/// Millisecond resolution keeps back-to-back captures of one camera apart.
pub fn file_stem(tag: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}", tag, at.format("%Y%m%dT%H%M%S%.3fZ"))
}
