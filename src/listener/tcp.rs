//! TCP listener variant
//!
//! A bound listening socket plus the table of accepted connections,
//! keyed by peer address. Every accepted peer is announced upstream
//! with an open notification, its reads flow upstream as data events in
//! arrival order, and exactly one close notification follows, no matter
//! how the connection ended.

use super::{bind_socket, loopback, Delivery, ListenerHandle, SessionEvent};
use crate::protocol::{PeerState, Transport, TunnelId, FRAME_HEADER_SIZE, PEER_V6_LEN};
use crate::MAX_FRAME_SIZE;
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Listen backlog for accepted local connections.
const BACKLOG: i32 = 5;

/// Receive buffer per accepted connection, sized so any chunk still
/// fits one DATA frame under the larger (IPv6) peer prefix.
const RECV_BUFFER: usize = MAX_FRAME_SIZE - FRAME_HEADER_SIZE - PEER_V6_LEN;

/// What a per-connection reader reports back to the listener task.
enum ConnEvent {
    Data { peer: SocketAddr, payload: Bytes },
    Closed { peer: SocketAddr },
}

pub(super) fn bind(
    id: TunnelId,
    events: mpsc::Sender<SessionEvent>,
) -> io::Result<ListenerHandle> {
    let socket = bind_socket(loopback(id), Transport::Tcp)?;
    socket.listen(BACKLOG)?;
    let listener = TcpListener::from_std(socket.into())?;

    let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
    tokio::spawn(run(id, listener, events, delivery_rx));
    Ok(ListenerHandle { delivery_tx })
}

async fn run(
    id: TunnelId,
    listener: TcpListener,
    events: mpsc::Sender<SessionEvent>,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
) {
    let mut peers: HashMap<SocketAddr, OwnedWriteHalf> = HashMap::new();
    let (conn_tx, mut conn_rx) = mpsc::channel::<ConnEvent>(64);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let (read_half, write_half) = stream.into_split();
                    peers.insert(peer, write_half);
                    debug!(%id, %peer, "accepted local connection");
                    let event = SessionEvent::State { id, peer, state: PeerState::Open };
                    if events.send(event).await.is_err() {
                        break;
                    }
                    tokio::spawn(read_peer(read_half, peer, conn_tx.clone()));
                }
                Err(e) => {
                    error!(%id, error = %e, "accept failed, closing listener");
                    break;
                }
            },
            Some(conn_event) = conn_rx.recv() => match conn_event {
                ConnEvent::Data { peer, payload } => {
                    // A peer dropped from the table has already been
                    // announced closed; late reads are discarded so the
                    // open/data/close order holds.
                    if !peers.contains_key(&peer) {
                        continue;
                    }
                    let event = SessionEvent::Data { id, peer, payload };
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                ConnEvent::Closed { peer } => {
                    if peers.remove(&peer).is_some() {
                        debug!(%id, %peer, "local connection closed");
                        let event = SessionEvent::State { id, peer, state: PeerState::Close };
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            },
            delivery = deliveries.recv() => match delivery {
                Some(Delivery { peer, payload }) => {
                    let Some(write_half) = peers.get_mut(&peer) else {
                        // The tunnel addressed a peer this listener does
                        // not know: the peer tables have desynced and
                        // nothing routed here can be trusted any more.
                        error!(%id, %peer, "data for unknown peer, closing listener");
                        break;
                    };
                    if let Err(e) = write_half.write_all(&payload).await {
                        warn!(%id, %peer, error = %e, "local write failed");
                        peers.remove(&peer);
                        let event = SessionEvent::State { id, peer, state: PeerState::Close };
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                None => break,
            },
        }
    }
    debug!(%id, "tcp listener closed");
}

/// Read one accepted connection until EOF or error, forwarding chunks
/// to the listener task. The stream carries no framing of its own; each
/// chunk goes upstream as it arrives.
async fn read_peer(mut read_half: OwnedReadHalf, peer: SocketAddr, conn_tx: mpsc::Sender<ConnEvent>) {
    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let event = ConnEvent::Data {
                    peer,
                    payload: Bytes::copy_from_slice(&buf[..n]),
                };
                if conn_tx.send(event).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(%peer, error = %e, "local read error");
                break;
            }
        }
    }
    let _ = conn_tx.send(ConnEvent::Closed { peer }).await;
}
