use vultur_link::LinkError;

use crate::config::ConfigError;

/// Terminal failures of a transfer call. Lost messages and missing
/// acknowledgments are not errors; they end as `Outcome::Failed`.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("invalid stream tag {0:?}")]
    InvalidTag(String),
    #[error("empty payload for {0}")]
    EmptyPayload(String),
    #[error("payload of {size} bytes needs {packets} chunks, limit is {limit}")]
    PayloadTooLarge {
        size: usize,
        packets: usize,
        limit: usize,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Link(#[from] LinkError),
}
