/// MAVLink over a TCP byte stream, for serial-to-TCP radio bridges.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::channel::{Channel, LinkError};
use crate::codec::{FrameReader, MavDecoder, MavEncoder, MavIdentity};
use crate::message::Message;

struct ReadHalf {
    stream: TcpStream,
    frames: FrameReader,
    decoder: MavDecoder,
}

pub struct TcpChannel {
    reader: Mutex<ReadHalf>,
    writer: Mutex<TcpStream>,
    encoder: MavEncoder,
}

impl TcpChannel {
    pub fn connect(addr: SocketAddr, identity: MavIdentity) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        info!("TCP link connected to {}", addr);
        Self::from_stream(stream, identity)
    }

    pub fn from_stream(stream: TcpStream, identity: MavIdentity) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: Mutex::new(ReadHalf {
                stream,
                frames: FrameReader::new(),
                decoder: MavDecoder::new(),
            }),
            writer: Mutex::new(writer),
            encoder: MavEncoder::new(identity),
        })
    }
}

impl Channel for TcpChannel {
    fn send(&self, msg: &Message) -> Result<(), LinkError> {
        let frames = self.encoder.encode(msg)?.concat();
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match writer.write_all(&frames) {
            Ok(()) => Ok(()),
            Err(e) if is_disconnect(&e) => Err(LinkError::Closed),
            Err(e) => Err(LinkError::Io(e)),
        }
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, LinkError> {
        let deadline = Instant::now() + timeout;
        let mut half = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        let mut buf = [0u8; 512];

        loop {
            while let Some(frame) = half.frames.next_frame() {
                if let Some(msg) = half.decoder.decode(frame) {
                    return Ok(Some(msg));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            half.stream
                .set_read_timeout(Some(remaining.max(Duration::from_millis(1))))?;

            match half.stream.read(&mut buf) {
                Ok(0) => return Err(LinkError::Closed),
                Ok(n) => {
                    half.frames.push(&buf[..n]);
                    debug!("tcp link read {} bytes", n);
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(None);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if is_disconnect(&e) => return Err(LinkError::Closed),
                Err(e) => return Err(LinkError::Io(e)),
            }
        }
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}
