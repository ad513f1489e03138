//! Wire protocol definitions and constants
//!
//! The upstream connection speaks a line-delimited JSON bootstrap
//! followed by framed binary traffic. Address-family and transport
//! codes on the wire are stable constants, independent of whatever
//! numeric values the host platform assigns to `AF_*`/`SOCK_*`;
//! translation to host types happens at the socket edges.

mod frame;
mod framer;
mod handshake;

pub use frame::{decode_body, encode_data, encode_state, FrameBody, FrameHeader, FrameKind};
pub use frame::{FRAME_HEADER_SIZE, PEER_V4_LEN, PEER_V6_LEN};
pub use framer::{Framer, MAX_BUFFERED};
pub use handshake::{BindConfig, BindRequest};

use std::fmt;
use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown address family {0}")]
    UnknownFamily(u8),

    #[error("unknown transport {0}")]
    UnknownTransport(u8),

    #[error("unknown frame type {0}")]
    UnknownFrameType(u16),

    #[error("unknown peer state {0}")]
    UnknownPeerState(u16),

    #[error("frame of {0} bytes exceeds the 65535-byte limit")]
    FrameTooLarge(usize),

    #[error("frame length {actual} below the {expected}-byte minimum for its layout")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("frame body is {actual} bytes, header announced {expected}")]
    BodyMismatch { expected: usize, actual: usize },

    #[error("peer address does not match the frame address family")]
    FamilyMismatch,

    #[error("stream buffer exceeded {0} bytes")]
    BufferOverflow(usize),

    #[error("malformed configuration line: {0}")]
    InvalidConfig(String),

    #[error("bind request for port 0")]
    InvalidPort,

    #[error("duplicate bind request for {0}")]
    DuplicateBinding(TunnelId),
}

/// Address family as carried in the frame header.
///
/// The values match the common Unix `AF_INET`/`AF_INET6` constants but
/// are fixed by this protocol regardless of platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Family {
    V4 = 2,
    V6 = 10,
}

impl Family {
    /// Wire size of a peer address under this family (IP bytes + port).
    pub fn peer_len(self) -> usize {
        match self {
            Family::V4 => PEER_V4_LEN,
            Family::V6 => PEER_V6_LEN,
        }
    }
}

impl TryFrom<u8> for Family {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Family::V4),
            10 => Ok(Family::V6),
            _ => Err(ProtocolError::UnknownFamily(value)),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::V4 => write!(f, "4"),
            Family::V6 => write!(f, "6"),
        }
    }
}

/// Transport as carried in the frame header.
///
/// Matches the common Unix `SOCK_STREAM`/`SOCK_DGRAM` values, fixed by
/// the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Transport {
    Tcp = 1,
    Udp = 2,
}

impl TryFrom<u8> for Transport {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Transport::Tcp),
            2 => Ok(Transport::Udp),
            _ => Err(ProtocolError::UnknownTransport(value)),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

/// Identifies one local listener, and routes frames on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelId {
    pub family: Family,
    pub transport: Transport,
    pub port: u16,
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}:{}", self.transport, self.family, self.port)
    }
}

/// Lifecycle notification for a TCP peer, carried by STATE frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PeerState {
    Open = 0,
    Close = 1,
}

impl TryFrom<u16> for PeerState {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PeerState::Open),
            1 => Ok(PeerState::Close),
            _ => Err(ProtocolError::UnknownPeerState(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_wire_codes() {
        assert_eq!(Family::try_from(2).unwrap(), Family::V4);
        assert_eq!(Family::try_from(10).unwrap(), Family::V6);
        assert!(matches!(
            Family::try_from(99),
            Err(ProtocolError::UnknownFamily(99))
        ));
    }

    #[test]
    fn transport_wire_codes() {
        assert_eq!(Transport::try_from(1).unwrap(), Transport::Tcp);
        assert_eq!(Transport::try_from(2).unwrap(), Transport::Udp);
        assert!(matches!(
            Transport::try_from(0),
            Err(ProtocolError::UnknownTransport(0))
        ));
    }

    #[test]
    fn tunnel_id_display() {
        let id = TunnelId {
            family: Family::V4,
            transport: Transport::Udp,
            port: 6000,
        };
        assert_eq!(id.to_string(), "udp4:6000");
    }
}
