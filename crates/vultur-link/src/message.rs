/// Typed messages carried by the telemetry link.
///
/// Three kinds share one channel: handshakes that frame an image stream,
/// fixed-size chunks of that stream, and free-text status lines that are
/// also used by unrelated telemetry (GPS fixes, capture state).

use std::fmt;

/// `stream_kind` value announcing a JPEG image stream
/// (MAVLINK_DATA_STREAM_IMG_JPEG).
pub const STREAM_KIND_IMG_JPEG: u8 = 0;

/// Maximum stream tag length in bytes.
pub const MAX_TAG_LEN: usize = 16;

/// Upper bound on the chunk payload size (one ENCAPSULATED_DATA message).
pub const MAX_CHUNK_SIZE: usize = 253;

/// Maximum status text bytes carried by one message.
pub const MAX_STATUS_LEN: usize = 50;

/// Returns true if `tag` can be carried in a handshake.
///
/// Tags are 1..=16 bytes of ASCII alphanumerics, `-` or `_`.
pub fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= MAX_TAG_LEN
        && tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Announces the start (`packet_count > 0`) or end (`packet_count == 0`)
/// of a chunk stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub stream_kind: u8,
    pub total_size: u32,
    pub width: u16,
    pub height: u16,
    pub packet_count: u16,
    pub chunk_size: u16,
    pub quality: u8,
    /// Logical stream this handshake belongs to (e.g. "cam1").
    pub tag: String,
}

impl Handshake {
    /// End-of-stream marker: every numeric field zero except `stream_kind`.
    pub fn end(stream_kind: u8, tag: &str) -> Self {
        Self {
            stream_kind,
            total_size: 0,
            width: 0,
            height: 0,
            packet_count: 0,
            chunk_size: 0,
            quality: 0,
            tag: tag.to_string(),
        }
    }

    #[inline]
    pub fn is_start(&self) -> bool {
        self.packet_count > 0
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        self.packet_count == 0
    }
}

/// One fragment of a stream, addressed by its zero-based sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMessage {
    pub sequence: u16,
    pub data: Vec<u8>,
}

/// Status text severity, numbered like MAVLink's `MAV_SEVERITY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl Severity {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Emergency,
            1 => Self::Alert,
            2 => Self::Critical,
            3 => Self::Error,
            4 => Self::Warning,
            5 => Self::Notice,
            6 => Self::Info,
            7 => Self::Debug,
            _ => return None,
        })
    }
}

/// Free-text status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusText {
    pub severity: Severity,
    pub text: String,
}

impl StatusText {
    /// Build a status line, truncating `text` to at most `max_len` bytes
    /// on a character boundary.
    pub fn new(severity: Severity, text: &str, max_len: usize) -> Self {
        let limit = max_len.min(MAX_STATUS_LEN);
        let mut end = text.len().min(limit);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            severity,
            text: text[..end].to_string(),
        }
    }

    pub fn info(text: &str) -> Self {
        Self::new(Severity::Info, text, MAX_STATUS_LEN)
    }
}

/// Any message the link can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Handshake(Handshake),
    Chunk(ChunkMessage),
    Status(StatusText),
}

impl Message {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake(h) if h.is_start() => "handshake_start",
            Self::Handshake(_) => "handshake_end",
            Self::Chunk(_) => "chunk",
            Self::Status(_) => "status",
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake(h) => write!(
                f,
                "handshake tag={} kind={} size={} packets={} chunk={} {}x{} q={}",
                h.tag, h.stream_kind, h.total_size, h.packet_count, h.chunk_size, h.width, h.height, h.quality
            ),
            Self::Chunk(c) => write!(f, "chunk seq={} len={}", c.sequence, c.data.len()),
            Self::Status(s) => write!(f, "status sev={} text={:?}", s.severity as u8, s.text),
        }
    }
}
