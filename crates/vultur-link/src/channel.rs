/// The link abstraction both protocol ends are written against.

use std::io;
use std::time::Duration;

use crate::message::Message;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The far end or the transport is gone for good.
    #[error("link closed")]
    Closed,
    /// Transient transport failure; the next call may succeed.
    #[error("link I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("no peer address known yet")]
    NoPeer,
    #[error("cannot encode message: {0}")]
    Encode(String),
    #[error("invalid link endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

impl LinkError {
    /// True when retrying the operation cannot help.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::InvalidEndpoint { .. })
    }
}

/// A best-effort, message-oriented, bidirectional link.
///
/// Messages may be lost but are never split. Implementations are shared
/// between a reading thread and writers, so both methods take `&self`.
pub trait Channel: Send + Sync {
    fn send(&self, msg: &Message) -> Result<(), LinkError>;

    /// Wait up to `timeout` for the next message. `Ok(None)` on timeout or
    /// when an undecodable datagram was skipped.
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, LinkError>;
}
