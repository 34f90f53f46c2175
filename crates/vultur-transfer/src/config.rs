/// Protocol configuration shared by the transmitter and the reassembler.
///
/// Defaults match a 57600 baud telemetry radio carrying 253-byte chunks.
/// `TransferConfig::load()` reads an optional JSON file named by
/// `VULTUR_CONFIG`, then applies `VULTUR_*` environment overrides.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vultur_link::{MAX_CHUNK_SIZE, MAX_STATUS_LEN, MAX_TAG_LEN};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("bad value {value:?} for {var}")]
    Env { var: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Payload bytes per chunk message.
    pub chunk_size: usize,
    /// Whole-transfer attempts before giving up.
    pub max_retries: u32,
    /// How long the sender waits for "photo <tag> ok" after each pass.
    pub ack_timeout_ms: u64,
    /// Receive timeout per poll inside the ack window.
    pub ack_poll_ms: u64,
    /// Pause after the start handshake so the far end can arm.
    pub settle_delay_ms: u64,
    /// Minimum inter-chunk delay.
    pub pacing_floor_ms: u64,
    /// Inter-chunk delay per packet of the transfer.
    pub pacing_per_packet_ms: u64,
    /// Maximum status line length on the wire.
    pub status_max_len: usize,
    /// Receive timeout of the reassembler loop.
    pub receive_poll_ms: u64,
    /// Reassembler asks for missing chunks after an end handshake.
    pub request_missing: bool,
    /// Depth of the completed-payload hand-off queue.
    pub event_queue_depth: usize,
    /// Status lines at or below this severity are passed through.
    pub passthrough_max_severity: u8,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            chunk_size: 253,
            max_retries: 3,
            ack_timeout_ms: 20_000,
            ack_poll_ms: 2_000,
            settle_delay_ms: 250,
            pacing_floor_ms: 20,
            pacing_per_packet_ms: 7,
            status_max_len: MAX_STATUS_LEN,
            receive_poll_ms: 500,
            request_missing: false,
            event_queue_depth: 16,
            passthrough_max_severity: 6, // INFO
        }
    }
}

impl TransferConfig {
    /// Defaults, then `VULTUR_CONFIG` JSON file, then `VULTUR_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("VULTUR_CONFIG") {
            Ok(path) => Self::from_json_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from a variable lookup (the process environment in
    /// production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "VULTUR_CHUNK_SIZE", &mut self.chunk_size)?;
        override_from(&lookup, "VULTUR_MAX_RETRIES", &mut self.max_retries)?;
        override_from(&lookup, "VULTUR_ACK_TIMEOUT_MS", &mut self.ack_timeout_ms)?;
        override_from(&lookup, "VULTUR_ACK_POLL_MS", &mut self.ack_poll_ms)?;
        override_from(&lookup, "VULTUR_SETTLE_DELAY_MS", &mut self.settle_delay_ms)?;
        override_from(&lookup, "VULTUR_PACING_FLOOR_MS", &mut self.pacing_floor_ms)?;
        override_from(&lookup, "VULTUR_PACING_PER_PACKET_MS", &mut self.pacing_per_packet_ms)?;
        override_from(&lookup, "VULTUR_STATUS_MAX_LEN", &mut self.status_max_len)?;
        override_from(&lookup, "VULTUR_RECEIVE_POLL_MS", &mut self.receive_poll_ms)?;
        override_from(&lookup, "VULTUR_REQUEST_MISSING", &mut self.request_missing)?;
        override_from(&lookup, "VULTUR_EVENT_QUEUE_DEPTH", &mut self.event_queue_depth)?;
        override_from(
            &lookup,
            "VULTUR_PASSTHROUGH_MAX_SEVERITY",
            &mut self.passthrough_max_severity,
        )?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return invalid(format!("chunk_size must be 1..={}", MAX_CHUNK_SIZE));
        }
        if self.max_retries == 0 {
            return invalid("max_retries must be at least 1".into());
        }
        if self.ack_timeout_ms == 0 || self.ack_poll_ms == 0 || self.receive_poll_ms == 0 {
            return invalid("timeouts must be non-zero".into());
        }
        // Room for "Photo <tag> sent" with the longest tag.
        let min_status = MAX_TAG_LEN + 16;
        if self.status_max_len < min_status || self.status_max_len > MAX_STATUS_LEN {
            return invalid(format!(
                "status_max_len must be {}..={}",
                min_status, MAX_STATUS_LEN
            ));
        }
        if self.event_queue_depth == 0 {
            return invalid("event_queue_depth must be at least 1".into());
        }
        if self.passthrough_max_severity > 7 {
            return invalid("passthrough_max_severity must be 0..=7".into());
        }
        Ok(())
    }

    /// Inter-chunk delay: grows with the transfer size, never below the floor.
    pub fn pacing_delay(&self, packet_count: usize) -> Duration {
        let scaled = self.pacing_per_packet_ms.saturating_mul(packet_count as u64);
        Duration::from_millis(scaled.max(self.pacing_floor_ms))
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn ack_poll(&self) -> Duration {
        Duration::from_millis(self.ack_poll_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn receive_poll(&self) -> Duration {
        Duration::from_millis(self.receive_poll_ms)
    }
}

fn override_from<T, F>(lookup: &F, var: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(var) {
        match value.trim().parse::<T>() {
            Ok(parsed) => *slot = parsed,
            Err(_) => return Err(ConfigError::Env { var, value }),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let cfg = TransferConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.chunk_size, 253);
        assert_eq!(cfg.ack_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn pacing_scales_with_floor() {
        let cfg = TransferConfig::default();
        // 1 packet: 7 ms < 20 ms floor.
        assert_eq!(cfg.pacing_delay(1), Duration::from_millis(20));
        // 10 packets: 70 ms.
        assert_eq!(cfg.pacing_delay(10), Duration::from_millis(70));
    }

    #[test]
    fn overrides_apply_and_reject_garbage() {
        let vars: HashMap<&str, &str> = [
            ("VULTUR_CHUNK_SIZE", "128"),
            ("VULTUR_REQUEST_MISSING", "true"),
        ]
        .into_iter()
        .collect();
        let mut cfg = TransferConfig::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.chunk_size, 128);
        assert!(cfg.request_missing);

        let err = cfg
            .apply_overrides(|k| (k == "VULTUR_MAX_RETRIES").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "VULTUR_MAX_RETRIES", .. }));
    }

    #[test]
    fn json_partial_uses_defaults() {
        let cfg: TransferConfig = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.chunk_size, 253);
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut cfg = TransferConfig::default();
        cfg.chunk_size = MAX_CHUNK_SIZE + 1;
        assert!(cfg.validate().is_err());

        let mut cfg = TransferConfig::default();
        cfg.max_retries = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = TransferConfig::default();
        cfg.status_max_len = 10;
        assert!(cfg.validate().is_err());
    }
}
