//! UDP listener variant
//!
//! A bound datagram socket with no per-peer state: every received
//! datagram becomes one tunnel event, every delivery becomes exactly
//! one datagram back to its peer.

use super::{bind_socket, loopback, Delivery, ListenerHandle, SessionEvent};
use crate::protocol::{Transport, TunnelId};
use bytes::Bytes;
use std::io;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Largest datagram the socket can hand us.
const RECV_BUFFER: usize = 65535;

pub(super) fn bind(
    id: TunnelId,
    events: mpsc::Sender<SessionEvent>,
) -> io::Result<ListenerHandle> {
    let socket = bind_socket(loopback(id), Transport::Udp)?;
    let socket = UdpSocket::from_std(socket.into())?;

    let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
    tokio::spawn(run(id, socket, events, delivery_rx));
    Ok(ListenerHandle { delivery_tx })
}

async fn run(
    id: TunnelId,
    socket: UdpSocket,
    events: mpsc::Sender<SessionEvent>,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
) {
    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, peer)) => {
                    let event = SessionEvent::Data {
                        id,
                        peer,
                        payload: Bytes::copy_from_slice(&buf[..n]),
                    };
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                // Linux surfaces ICMP errors from earlier send_to calls
                // here; they concern one peer, not the socket.
                Err(e) => warn!(%id, error = %e, "udp receive error"),
            },
            delivery = deliveries.recv() => match delivery {
                Some(Delivery { peer, payload }) => {
                    if let Err(e) = socket.send_to(&payload, peer).await {
                        warn!(%id, %peer, error = %e, "udp send failed");
                    }
                }
                None => break,
            },
        }
    }
    debug!(%id, "udp listener closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Family;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn free_udp_id() -> TunnelId {
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        TunnelId {
            family: Family::V4,
            transport: Transport::Udp,
            port: probe.local_addr().unwrap().port(),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn datagrams_become_events_and_deliveries_become_datagrams() {
        let id = free_udp_id().await;
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let handle = bind(id, events_tx).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sender_addr = sender.local_addr().unwrap();
        sender
            .send_to(b"ping", ("127.0.0.1", id.port))
            .await
            .unwrap();

        let event = timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            SessionEvent::Data { id: got, peer, payload } => {
                assert_eq!(got, id);
                assert_eq!(peer, sender_addr);
                assert_eq!(&payload[..], b"ping");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        assert!(handle.deliver(Delivery {
            peer: sender_addr,
            payload: Bytes::from_static(b"pong"),
        }));

        let mut buf = [0u8; 16];
        let (n, from): (usize, SocketAddr) =
            timeout(Duration::from_secs(5), sender.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
        assert_eq!(&buf[..n], b"pong");
        assert_eq!(from.port(), id.port);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bind_conflict_reports_error() {
        let id = free_udp_id().await;
        // Occupy the port without SO_REUSEADDR so the listener bind fails.
        let _occupying = UdpSocket::bind(("127.0.0.1", id.port)).await.unwrap();

        let (events_tx, _events_rx) = mpsc::channel(16);
        assert!(bind(id, events_tx).is_err());
    }
}
