/// Link addresses as written in configuration.
///
/// ```text
/// udp://0.0.0.0:14550                       bind, learn the peer
/// udp://0.0.0.0:0?peer=192.168.4.1:14550    bind, fixed peer
/// tcp://127.0.0.1:5760                      MAVLink byte stream (serial bridge)
/// ```

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use crate::channel::{Channel, LinkError};
use crate::codec::MavIdentity;
use crate::tcp::TcpChannel;
use crate::udp::UdpChannel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEndpoint {
    Udp {
        bind: SocketAddr,
        peer: Option<SocketAddr>,
    },
    Tcp {
        addr: SocketAddr,
    },
}

impl LinkEndpoint {
    /// Open the described link, sending as `identity`.
    pub fn open(&self, identity: MavIdentity) -> Result<Arc<dyn Channel>, LinkError> {
        let channel: Arc<dyn Channel> = match *self {
            Self::Udp { bind, peer } => Arc::new(UdpChannel::bind(bind, peer, identity)?),
            Self::Tcp { addr } => Arc::new(TcpChannel::connect(addr, identity)?),
        };
        Ok(channel)
    }
}

impl FromStr for LinkEndpoint {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| LinkError::InvalidEndpoint {
            endpoint: s.to_string(),
            reason: reason.to_string(),
        };
        let parse_addr = |a: &str| {
            a.parse::<SocketAddr>()
                .map_err(|_| invalid(&format!("bad socket address {:?}", a)))
        };

        let (scheme, rest) = s.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        match scheme {
            "udp" => {
                let (bind, query) = match rest.split_once('?') {
                    Some((b, q)) => (b, Some(q)),
                    None => (rest, None),
                };
                let peer = match query {
                    Some(q) => {
                        let addr = q
                            .strip_prefix("peer=")
                            .ok_or_else(|| invalid("only ?peer= is supported"))?;
                        Some(parse_addr(addr)?)
                    }
                    None => None,
                };
                Ok(Self::Udp {
                    bind: parse_addr(bind)?,
                    peer,
                })
            }
            "tcp" => Ok(Self::Tcp {
                addr: parse_addr(rest)?,
            }),
            _ => Err(invalid("scheme must be udp or tcp")),
        }
    }
}

impl fmt::Display for LinkEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp { bind, peer: None } => write!(f, "udp://{}", bind),
            Self::Udp {
                bind,
                peer: Some(peer),
            } => write!(f, "udp://{}?peer={}", bind, peer),
            Self::Tcp { addr } => write!(f, "tcp://{}", addr),
        }
    }
}
