mod job;

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use tracing::{info, warn};

use vultur_link::{LinkEndpoint, MavIdentity};
use vultur_transfer::{Outcome, TransferConfig, TransferStats, Transmitter};

use job::SendJob;

/// Gap between consecutive cameras so the ground side settles.
const CAMERA_GAP: Duration = Duration::from_millis(200);

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vultur_onboard=debug,vultur_transfer=info,vultur_link=info".into()),
        )
        .init();

    let jobs = std::env::args()
        .skip(1)
        .map(|arg| SendJob::parse(&arg))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if jobs.is_empty() {
        bail!("usage: vultur-send TAG=PATH.jpg [TAG=PATH.jpg ...]");
    }

    // Config
    let config = TransferConfig::load()?;
    let quality: u8 = std::env::var("VULTUR_JPEG_QUALITY")
        .unwrap_or_else(|_| "30".into())
        .parse()?;
    let link: LinkEndpoint = std::env::var("VULTUR_LINK")
        .unwrap_or_else(|_| "udp://0.0.0.0:0?peer=127.0.0.1:14550".into())
        .parse()?;

    let channel = link.open(MavIdentity::ONBOARD)?;
    info!(link = %link, jobs = jobs.len(), "sending");

    let stats = Arc::new(TransferStats::new());
    let mut transmitter = Transmitter::new(channel, config)?.with_stats(stats.clone());

    let mut failed = Vec::new();
    for (i, job) in jobs.iter().enumerate() {
        if i > 0 {
            std::thread::sleep(CAMERA_GAP);
        }
        let descriptor = job.load(quality)?;
        info!(
            tag = %job.tag,
            size = descriptor.payload.len(),
            dims = %format!("{}x{}", descriptor.width, descriptor.height),
            "photo ready"
        );
        match transmitter.send(&descriptor)? {
            Outcome::Delivered { attempts } => info!(tag = %job.tag, attempts, "delivered"),
            Outcome::Failed { attempts } => {
                warn!(tag = %job.tag, attempts, "not delivered");
                failed.push(job.tag.as_str());
            }
        }
    }

    info!(stats = %serde_json::to_string(&stats.snapshot())?, "transfer stats");
    if !failed.is_empty() {
        bail!("not delivered: {}", failed.join(", "));
    }
    Ok(())
}
