/// UDP channel carrying MAVLink frames, one frame per datagram on send.
///
/// Telemetry radios are commonly exposed to the ground computer through a
/// UDP bridge (mavproxy, a radio modem's network port). When no peer is
/// configured, the channel replies to whoever sent the most recent valid
/// MAVLink datagram.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info};

use crate::channel::{Channel, LinkError};
use crate::codec::{MavDecoder, MavEncoder, MavIdentity, decode_datagram};
use crate::message::Message;

/// OS receive buffer size. Small; the radio is slow.
const UDP_RECV_BUFFER: usize = 256 * 1024;

/// Bridges may pack several frames into one datagram.
const MAX_DATAGRAM: usize = 2048;

struct Inbound {
    decoder: MavDecoder,
    queued: VecDeque<Message>,
}

pub struct UdpChannel {
    socket: UdpSocket,
    encoder: MavEncoder,
    inbound: Mutex<Inbound>,
    peer: Mutex<Option<SocketAddr>>,
    fixed_peer: bool,
}

impl UdpChannel {
    /// Bind `local`. With `peer` set, datagrams go only there; otherwise the
    /// peer is learned from incoming traffic.
    pub fn bind(local: SocketAddr, peer: Option<SocketAddr>, identity: MavIdentity) -> io::Result<Self> {
        let socket = create_recv_socket(local)?;
        info!(
            "UDP link bound on {} (peer: {}, sysid {} compid {})",
            socket.local_addr()?,
            peer.map(|p| p.to_string()).unwrap_or_else(|| "learned".into()),
            identity.system_id,
            identity.component_id
        );
        Ok(Self {
            socket,
            encoder: MavEncoder::new(identity),
            inbound: Mutex::new(Inbound {
                decoder: MavDecoder::new(),
                queued: VecDeque::new(),
            }),
            peer: Mutex::new(peer),
            fixed_peer: peer.is_some(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn learn_peer(&self, src: SocketAddr) {
        if self.fixed_peer {
            return;
        }
        let mut peer = self.peer.lock().unwrap_or_else(PoisonError::into_inner);
        if *peer != Some(src) {
            info!("UDP link peer is now {}", src);
            *peer = Some(src);
        }
    }
}

impl Channel for UdpChannel {
    fn send(&self, msg: &Message) -> Result<(), LinkError> {
        let peer = self.peer().ok_or(LinkError::NoPeer)?;
        for frame in self.encoder.encode(msg)? {
            self.socket.send_to(&frame, peer)?;
        }
        Ok(())
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, LinkError> {
        let mut inbound = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(msg) = inbound.queued.pop_front() {
            return Ok(Some(msg));
        }

        // A zero read timeout means "block forever" to the OS.
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        let mut buf = [0u8; MAX_DATAGRAM];
        match self.socket.recv_from(&mut buf) {
            Ok((len, src)) => {
                let msgs = decode_datagram(&buf[..len], &mut inbound.decoder);
                if msgs.is_empty() {
                    debug!("no image or status traffic in {} bytes from {}", len, src);
                    return Ok(None);
                }
                self.learn_peer(src);
                inbound.queued.extend(msgs);
                Ok(inbound.queued.pop_front())
            }
            // Windows returns TimedOut, Unix returns WouldBlock.
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(LinkError::Io(e)),
        }
    }
}

fn create_recv_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(false)?;
    socket.set_reuse_address(true)?;
    socket.set_recv_buffer_size(UDP_RECV_BUFFER)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}
