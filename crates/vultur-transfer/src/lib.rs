/// Vultur transfer: chunked image delivery over a lossy telemetry link.
///
/// - `Transmitter`: fragments one payload, handshake/stream/confirm cycle,
///   whole-transfer retries
/// - `Reassembler`: long-lived receive loop, idempotent chunk tables,
///   decode check, acknowledgment through a non-blocking outbound queue

pub mod chunk_table;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod jpeg;
pub mod logging;
pub mod outbound;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod stats;
pub mod status;

pub use chunk_table::{ChunkTable, Insert};
pub use config::{ConfigError, TransferConfig};
pub use descriptor::{TransferDescriptor, fragment, packet_count};
pub use error::TransferError;
pub use jpeg::{DecodeError, DecodedImage, JpegDecoder, PassthroughDecoder, PayloadDecoder};
pub use logging::{NullLogger, TracingLogger, TransferEvent, TransferLog, TransferLogger};
pub use outbound::{OutboundQueue, spawn_writer};
pub use receiver::{
    CompletedPayload, Reassembler, ReassemblerEvent, ReassemblerHandle, StreamState,
    run_reassembler,
};
pub use sender::{Outcome, Transmitter};
pub use stats::{StatsSnapshot, TransferStats};
pub use status::{GpsFix, StatusLine};
