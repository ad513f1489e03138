//! Loopback-bound listeners accepting traffic on behalf of remote
//! services
//!
//! Each bound listener runs as a task on the session's single-threaded
//! runtime. Traffic from local peers flows up to the session on its
//! event channel; traffic from the tunnel flows down through a
//! per-listener delivery channel held in the session's dispatch table.
//! The event sender doubles as the listener's non-owning back-reference
//! to the session: when the session goes away the channel closes and
//! the listener task winds down with it.

mod tcp;
mod udp;

use crate::protocol::{Family, PeerState, Transport, TunnelId};
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::sync::mpsc;

/// Event flowing from a listener up to the owning session.
#[derive(Debug)]
pub enum SessionEvent {
    /// Payload received from a local peer.
    Data {
        id: TunnelId,
        peer: SocketAddr,
        payload: Bytes,
    },
    /// A local TCP peer connected or went away.
    State {
        id: TunnelId,
        peer: SocketAddr,
        state: PeerState,
    },
}

/// Payload routed from the session down to one listener.
#[derive(Debug)]
pub struct Delivery {
    pub peer: SocketAddr,
    pub payload: Bytes,
}

/// A bound listener as held in the session's dispatch table.
///
/// Dropping the handle closes the delivery channel, which shuts the
/// listener task down along with every connection it owns.
pub struct ListenerHandle {
    delivery_tx: mpsc::UnboundedSender<Delivery>,
}

impl ListenerHandle {
    /// Route an inbound payload to the listener. Returns `false` when
    /// the listener task is gone.
    pub fn deliver(&self, delivery: Delivery) -> bool {
        self.delivery_tx.send(delivery).is_ok()
    }
}

/// Bind the listener a tunnel identifier asks for.
pub fn bind(id: TunnelId, events: mpsc::Sender<SessionEvent>) -> io::Result<ListenerHandle> {
    match id.transport {
        Transport::Tcp => tcp::bind(id, events),
        Transport::Udp => udp::bind(id, events),
    }
}

/// The local address a tunnel identifier binds: always loopback.
fn loopback(id: TunnelId) -> SocketAddr {
    let ip: IpAddr = match id.family {
        Family::V4 => Ipv4Addr::LOCALHOST.into(),
        Family::V6 => Ipv6Addr::LOCALHOST.into(),
    };
    SocketAddr::new(ip, id.port)
}

/// Bind a non-blocking socket with address reuse, the way every local
/// listener here is created.
fn bind_socket(addr: SocketAddr, transport: Transport) -> io::Result<Socket> {
    let (kind, proto) = match transport {
        Transport::Tcp => (Type::STREAM, Protocol::TCP),
        Transport::Udp => (Type::DGRAM, Protocol::UDP),
    };
    let socket = Socket::new(Domain::for_address(addr), kind, Some(proto))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket)
}
