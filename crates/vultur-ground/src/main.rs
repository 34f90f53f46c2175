mod coverage;
mod storage;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::RecvTimeoutError;
use tracing::{error, info, warn};

use vultur_link::{LinkEndpoint, MavIdentity, StatusText};
use vultur_transfer::{
    JpegDecoder, ReassemblerEvent, StatusLine, TransferConfig, TransferStats, run_reassembler,
};

use coverage::CoverageLog;
use storage::ImageStore;

const STATS_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vultur_ground=debug,vultur_transfer=info,vultur_link=info".into()),
        )
        .init();

    // Config
    let config = TransferConfig::load()?;
    let link: LinkEndpoint = std::env::var("VULTUR_LINK")
        .unwrap_or_else(|_| "udp://0.0.0.0:14550".into())
        .parse()?;
    let image_dir = std::env::var("VULTUR_IMAGE_DIR").unwrap_or_else(|_| "images".into());
    let coverage_path =
        std::env::var("VULTUR_COVERAGE_LOG").unwrap_or_else(|_| "coverage.jsonl".into());

    let store = ImageStore::open(&image_dir)?;
    let mut coverage = CoverageLog::open(Some(Path::new(&coverage_path)))?;

    let channel = link.open(MavIdentity::GROUND)?;
    info!(link = %link, images = %store.dir().display(), coverage = %coverage_path, "ground station listening");

    let stats = Arc::new(TransferStats::new());
    let (reassembler, events) =
        run_reassembler(channel, &config, Box::new(JpegDecoder), stats.clone());

    let mut last_stats = Instant::now();
    loop {
        match events.recv_timeout(Duration::from_secs(1)) {
            Ok(ReassemblerEvent::Payload(payload)) => match store.save(&payload, Utc::now()) {
                Ok(record) => info!(
                    tag = %record.tag,
                    file = %record.file,
                    size = record.size,
                    dims = %format!("{}x{}", record.decoded_width, record.decoded_height),
                    "image saved"
                ),
                Err(e) => error!(tag = %payload.tag, "save failed: {:#}", e),
            },
            Ok(ReassemblerEvent::Status(status)) => on_status(&status, &mut coverage),
            Err(RecvTimeoutError::Timeout) => {
                if reassembler.is_finished() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            info!(stats = %serde_json::to_string(&stats.snapshot())?, "transfer stats");
            last_stats = Instant::now();
        }
    }

    let result = reassembler.stop();
    info!(stats = %serde_json::to_string(&stats.snapshot())?, "final transfer stats");
    if let Some(bounds) = coverage.bounds() {
        info!(
            footprints = coverage.len(),
            bounds = %serde_json::to_string(&bounds)?,
            "coverage"
        );
    }
    result?;
    Ok(())
}

fn on_status(status: &StatusText, coverage: &mut CoverageLog) {
    info!(severity = ?status.severity, "{}", status.text);

    if let StatusLine::Gps(fix) = StatusLine::parse(&status.text) {
        match coverage.record(&fix, Utc::now()) {
            Ok(_) => tracing::debug!(lat = fix.lat, lon = fix.lon, alt = fix.alt, kept = coverage.len(), "footprint"),
            Err(e) => warn!("coverage log: {:#}", e),
        }
    }
}
