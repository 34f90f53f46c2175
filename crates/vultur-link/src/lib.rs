/// Vultur link: the telemetry radio as seen by the image protocol.
///
/// Provides:
/// - Typed link messages (handshake, chunk, status text)
/// - MAVLink common-dialect mapping and frame parsing
/// - The `Channel` trait shared by sender and receiver
/// - UDP, TCP and in-memory (lossy, for tests) channels

pub mod channel;
pub mod codec;
pub mod memory;
pub mod message;
pub mod endpoint;
pub mod tcp;
pub mod udp;

pub use channel::{Channel, LinkError};
pub use codec::{FrameReader, MavDecoder, MavEncoder, MavIdentity, UNTAGGED, decode_datagram};
pub use memory::{MemoryChannel, memory_pair};
pub use message::{
    ChunkMessage, Handshake, MAX_CHUNK_SIZE, MAX_STATUS_LEN, MAX_TAG_LEN, Message,
    STREAM_KIND_IMG_JPEG, Severity, StatusText, is_valid_tag,
};
pub use endpoint::LinkEndpoint;
pub use tcp::TcpChannel;
pub use udp::UdpChannel;
