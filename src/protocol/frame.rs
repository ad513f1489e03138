//! Frame encoding/decoding for the upstream connection
//!
//! Frame format (all integers big-endian):
//! ```text
//! +-----------------+-----------------+
//! |  total_length   |   frame_type    |
//! +-----------------+-----------------+
//! |      port       | family | transp |
//! +-----------------+--------+--------+
//! |   peer address (6 B v4 / 18 B v6) |
//! +-----------------------------------+
//! |   payload (DATA) / state (STATE)  |
//! +-----------------------------------+
//! ```
//!
//! `total_length` counts the entire frame, header included, and never
//! exceeds 65535. The peer address prefix is 4 IP bytes + u16 port for
//! IPv4 and 16 + u16 for IPv6; which one is in effect is decided by the
//! header's family byte, never self-described.

use super::{Family, PeerState, ProtocolError, Transport, TunnelId};
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Frame header size in bytes
pub const FRAME_HEADER_SIZE: usize = 8;

/// Wire size of an IPv4 peer address (4 IP bytes + u16 port)
pub const PEER_V4_LEN: usize = 6;

/// Wire size of an IPv6 peer address (16 IP bytes + u16 port)
pub const PEER_V6_LEN: usize = 18;

/// Frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FrameKind {
    /// Open/close notification for a TCP peer
    State = 0,
    /// A payload chunk
    Data = 1,
}

impl TryFrom<u16> for FrameKind {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameKind::State),
            1 => Ok(FrameKind::Data),
            _ => Err(ProtocolError::UnknownFrameType(value)),
        }
    }
}

/// Parsed fixed-size frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub total_len: u16,
    pub kind: FrameKind,
    pub id: TunnelId,
}

impl FrameHeader {
    /// Parse exactly [`FRAME_HEADER_SIZE`] bytes. Never blocks.
    ///
    /// Rejects unknown families, transports and frame types, and any
    /// `total_length` too small for the layout the header announces: a
    /// DATA frame must at least hold its peer prefix, a STATE frame
    /// exactly its peer prefix plus the two-byte state code.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort {
                expected: FRAME_HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let mut buf = &buf[..FRAME_HEADER_SIZE];
        let total_len = buf.get_u16();
        let kind = FrameKind::try_from(buf.get_u16())?;
        let port = buf.get_u16();
        let family = Family::try_from(buf.get_u8())?;
        let transport = Transport::try_from(buf.get_u8())?;

        let min = match kind {
            FrameKind::Data => FRAME_HEADER_SIZE + family.peer_len(),
            FrameKind::State => FRAME_HEADER_SIZE + family.peer_len() + 2,
        };
        if (total_len as usize) < min {
            return Err(ProtocolError::FrameTooShort {
                expected: min,
                actual: total_len as usize,
            });
        }
        if kind == FrameKind::State && total_len as usize != min {
            return Err(ProtocolError::BodyMismatch {
                expected: min - FRAME_HEADER_SIZE,
                actual: total_len as usize - FRAME_HEADER_SIZE,
            });
        }

        Ok(FrameHeader {
            total_len,
            kind,
            id: TunnelId {
                family,
                transport,
                port,
            },
        })
    }

    /// Length of the body that follows this header.
    pub fn body_len(&self) -> usize {
        self.total_len as usize - FRAME_HEADER_SIZE
    }
}

/// Decoded frame body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    Data { peer: SocketAddr, payload: Bytes },
    State { peer: SocketAddr, state: PeerState },
}

/// Parse a frame body against its already-decoded header.
///
/// The peer address prefix is read using the header's address family;
/// the remainder is payload bytes for DATA or the u16 state code for
/// STATE.
pub fn decode_body(header: &FrameHeader, mut body: Bytes) -> Result<FrameBody, ProtocolError> {
    if body.len() != header.body_len() {
        return Err(ProtocolError::BodyMismatch {
            expected: header.body_len(),
            actual: body.len(),
        });
    }

    let ip: IpAddr = match header.id.family {
        Family::V4 => {
            let mut octets = [0u8; 4];
            body.copy_to_slice(&mut octets);
            Ipv4Addr::from(octets).into()
        }
        Family::V6 => {
            let mut octets = [0u8; 16];
            body.copy_to_slice(&mut octets);
            Ipv6Addr::from(octets).into()
        }
    };
    let peer = SocketAddr::new(ip, body.get_u16());

    match header.kind {
        FrameKind::Data => Ok(FrameBody::Data {
            peer,
            payload: body,
        }),
        FrameKind::State => Ok(FrameBody::State {
            peer,
            state: PeerState::try_from(body.get_u16())?,
        }),
    }
}

/// Build a DATA frame.
///
/// Fails without producing any bytes if the encoded frame would exceed
/// [`MAX_FRAME_SIZE`] or if `peer` disagrees with the tunnel's address
/// family.
pub fn encode_data(id: TunnelId, peer: SocketAddr, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    let total = FRAME_HEADER_SIZE + id.family.peer_len() + payload.len();
    if total > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(total));
    }

    let mut buf = BytesMut::with_capacity(total);
    put_header(&mut buf, total as u16, FrameKind::Data, id);
    put_peer(&mut buf, id.family, peer)?;
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

/// Build a STATE frame carrying an open/close notification.
pub fn encode_state(
    id: TunnelId,
    peer: SocketAddr,
    state: PeerState,
) -> Result<Bytes, ProtocolError> {
    let total = FRAME_HEADER_SIZE + id.family.peer_len() + 2;

    let mut buf = BytesMut::with_capacity(total);
    put_header(&mut buf, total as u16, FrameKind::State, id);
    put_peer(&mut buf, id.family, peer)?;
    buf.put_u16(state as u16);
    Ok(buf.freeze())
}

fn put_header(buf: &mut BytesMut, total_len: u16, kind: FrameKind, id: TunnelId) {
    buf.put_u16(total_len);
    buf.put_u16(kind as u16);
    buf.put_u16(id.port);
    buf.put_u8(id.family as u8);
    buf.put_u8(id.transport as u8);
}

fn put_peer(buf: &mut BytesMut, family: Family, peer: SocketAddr) -> Result<(), ProtocolError> {
    match (family, peer.ip()) {
        (Family::V4, IpAddr::V4(ip)) => buf.extend_from_slice(&ip.octets()),
        (Family::V6, IpAddr::V6(ip)) => buf.extend_from_slice(&ip.octets()),
        _ => return Err(ProtocolError::FamilyMismatch),
    }
    buf.put_u16(peer.port());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp4(port: u16) -> TunnelId {
        TunnelId {
            family: Family::V4,
            transport: Transport::Udp,
            port,
        }
    }

    fn tcp6(port: u16) -> TunnelId {
        TunnelId {
            family: Family::V6,
            transport: Transport::Tcp,
            port,
        }
    }

    #[test]
    fn data_roundtrip_v4() {
        let id = udp4(6000);
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let wire = encode_data(id, peer, b"ping").unwrap();
        assert_eq!(wire.len(), 18);

        let header = FrameHeader::decode(&wire[..FRAME_HEADER_SIZE]).unwrap();
        assert_eq!(header.total_len, 18);
        assert_eq!(header.kind, FrameKind::Data);
        assert_eq!(header.id, id);

        let body = decode_body(&header, wire.slice(FRAME_HEADER_SIZE..)).unwrap();
        assert_eq!(
            body,
            FrameBody::Data {
                peer,
                payload: Bytes::from_static(b"ping"),
            }
        );
    }

    #[test]
    fn data_roundtrip_v6() {
        let id = tcp6(7000);
        let peer: SocketAddr = "[::1]:50000".parse().unwrap();
        let wire = encode_data(id, peer, b"hello").unwrap();

        let header = FrameHeader::decode(&wire).unwrap();
        assert_eq!(header.body_len(), PEER_V6_LEN + 5);

        match decode_body(&header, wire.slice(FRAME_HEADER_SIZE..)).unwrap() {
            FrameBody::Data { peer: p, payload } => {
                assert_eq!(p, peer);
                assert_eq!(&payload[..], b"hello");
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn state_roundtrip() {
        let id = TunnelId {
            family: Family::V4,
            transport: Transport::Tcp,
            port: 7000,
        };
        let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();

        for state in [PeerState::Open, PeerState::Close] {
            let wire = encode_state(id, peer, state).unwrap();
            assert_eq!(wire.len(), 16);

            let header = FrameHeader::decode(&wire).unwrap();
            assert_eq!(header.kind, FrameKind::State);
            let body = decode_body(&header, wire.slice(FRAME_HEADER_SIZE..)).unwrap();
            assert_eq!(body, FrameBody::State { peer, state });
        }
    }

    #[test]
    fn oversize_data_refused() {
        let id = udp4(6000);
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let payload = vec![0u8; 65530];
        assert!(matches!(
            encode_data(id, peer, &payload),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn largest_data_accepted() {
        let id = udp4(6000);
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let payload = vec![0u8; 65535 - FRAME_HEADER_SIZE - PEER_V4_LEN];
        let wire = encode_data(id, peer, &payload).unwrap();
        assert_eq!(wire.len(), 65535);
    }

    #[test]
    fn family_mismatch_refused() {
        let id = udp4(6000);
        let peer: SocketAddr = "[::1]:40000".parse().unwrap();
        assert!(matches!(
            encode_data(id, peer, b"x"),
            Err(ProtocolError::FamilyMismatch)
        ));
    }

    #[test]
    fn unknown_family_rejected() {
        // total=20 type=DATA port=5000 family=99 transport=1
        let raw = [0u8, 20, 0, 1, 0x13, 0x88, 99, 1];
        assert!(matches!(
            FrameHeader::decode(&raw),
            Err(ProtocolError::UnknownFamily(99))
        ));
    }

    #[test]
    fn unknown_frame_type_rejected() {
        let raw = [0u8, 20, 0, 7, 0x13, 0x88, 2, 1];
        assert!(matches!(
            FrameHeader::decode(&raw),
            Err(ProtocolError::UnknownFrameType(7))
        ));
    }

    #[test]
    fn undersized_total_length_rejected() {
        // A DATA header announcing less than header + peer prefix.
        let raw = [0u8, 10, 0, 1, 0x13, 0x88, 2, 1];
        assert!(matches!(
            FrameHeader::decode(&raw),
            Err(ProtocolError::FrameTooShort { expected: 14, .. })
        ));
    }

    #[test]
    fn state_with_trailing_bytes_rejected() {
        // STATE is fixed-size; anything longer than peer + code is refused.
        let raw = [0u8, 20, 0, 0, 0x1B, 0x58, 2, 1];
        assert!(matches!(
            FrameHeader::decode(&raw),
            Err(ProtocolError::BodyMismatch { .. })
        ));
    }

    #[test]
    fn body_length_must_match_header() {
        let id = udp4(6000);
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let wire = encode_data(id, peer, b"ping").unwrap();
        let header = FrameHeader::decode(&wire).unwrap();

        let short = wire.slice(FRAME_HEADER_SIZE..wire.len() - 1);
        assert!(matches!(
            decode_body(&header, short),
            Err(ProtocolError::BodyMismatch { .. })
        ));
    }
}
