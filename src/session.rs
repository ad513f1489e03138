//! Tunnel session: one upstream connection from connect to close
//!
//! A session owns the upstream socket, the handshake state, the
//! dispatch table of listeners keyed by tunnel identifier, and the
//! routing of frames in both directions. Its lifecycle is
//! connect → await configuration → running → closed; anything that
//! threatens the integrity of the frame stream tears the whole session
//! down, and the supervisor starts a fresh one.

use crate::config::ClientConfig;
use crate::listener::{self, Delivery, ListenerHandle, SessionEvent};
use crate::protocol::{
    decode_body, encode_data, encode_state, BindConfig, Framer, FrameBody, FrameHeader,
    ProtocolError, TunnelId, FRAME_HEADER_SIZE,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Capacity of the listener → session event channel.
const EVENT_QUEUE: usize = 256;

/// Upstream read buffer size.
const READ_BUFFER: usize = 16 * 1024;

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("upstream connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("upstream I/O error: {0}")]
    Transport(#[source] io::Error),

    #[error("upstream closed the connection")]
    Eof,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("metadata document could not be serialized: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("bound {bound} of {requested} requested listeners")]
    Bind { requested: usize, bound: usize },

    #[error("received a second configuration line")]
    DuplicateConfig,

    #[error("received a frame for unknown tunnel {0}")]
    UnknownTunnel(TunnelId),

    #[error("server sent a peer-state frame")]
    UnexpectedState,

    #[error("listener event before the session was configured")]
    EarlyEvent,
}

struct Session {
    write_half: OwnedWriteHalf,
    framer: Framer,
    /// Header parsed but its body not yet consumed.
    pending: Option<FrameHeader>,
    listeners: HashMap<TunnelId, ListenerHandle>,
    configured: bool,
    event_tx: mpsc::Sender<SessionEvent>,
}

/// Run one session against the upstream to completion.
///
/// Returns when the session reaches its closed state; every owned
/// listener and accepted connection is torn down before returning.
pub async fn run(config: &ClientConfig) -> Result<(), SessionError> {
    let stream = TcpStream::connect(&config.upstream)
        .await
        .map_err(SessionError::Connect)?;
    stream.set_nodelay(true).map_err(SessionError::Transport)?;
    info!(upstream = %config.upstream, "connected to tunnel server");

    let (mut read_half, write_half) = stream.into_split();
    let (event_tx, mut event_rx) = mpsc::channel(EVENT_QUEUE);
    let mut session = Session {
        write_half,
        framer: Framer::new(),
        pending: None,
        listeners: HashMap::new(),
        configured: false,
        event_tx,
    };

    session.send_metadata(&config.metadata).await?;

    let mut buf = vec![0u8; READ_BUFFER];
    let result = loop {
        tokio::select! {
            read = read_half.read(&mut buf) => match read {
                Ok(0) => break Err(SessionError::Eof),
                Ok(n) => {
                    if let Err(e) = session.receive(&buf[..n]) {
                        break Err(e);
                    }
                }
                Err(e) => break Err(SessionError::Transport(e)),
            },
            Some(event) = event_rx.recv() => {
                if let Err(e) = session.forward(event).await {
                    break Err(e);
                }
            }
        }
    };

    // Closed: listeners torn down with their accepted connections, the
    // upstream socket dropped, nothing dispatched past this point.
    session.listeners.clear();
    result
}

impl Session {
    /// Introduce ourselves: the metadata document as a single JSON line.
    async fn send_metadata(&mut self, metadata: &serde_json::Value) -> Result<(), SessionError> {
        let mut line = serde_json::to_vec(metadata)?;
        line.push(b'\n');
        self.write_half
            .write_all(&line)
            .await
            .map_err(SessionError::Transport)
    }

    /// Feed upstream bytes through the framer and handle every complete
    /// unit they yield.
    fn receive(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.framer.feed(data)?;
        while let Some(chunk) = self.framer.next_chunk() {
            if self.configured {
                self.on_frame_chunk(chunk)?;
            } else {
                self.configure(chunk)?;
            }
        }
        Ok(())
    }

    /// Apply the server's bind-configuration line and enter the framed
    /// phase. All-or-nothing: a single failed bind retains no listeners
    /// and closes the session.
    fn configure(&mut self, line: Bytes) -> Result<(), SessionError> {
        if self.configured {
            return Err(SessionError::DuplicateConfig);
        }

        let ids = BindConfig::parse(&line)?.tunnel_ids()?;
        let requested = ids.len();
        for id in ids {
            match listener::bind(id, self.event_tx.clone()) {
                Ok(handle) => {
                    info!(%id, "listener bound");
                    self.listeners.insert(id, handle);
                }
                Err(e) => error!(%id, error = %e, "failed to bind listener"),
            }
        }
        if self.listeners.len() != requested {
            let bound = self.listeners.len();
            self.listeners.clear();
            return Err(SessionError::Bind { requested, bound });
        }

        self.configured = true;
        self.framer.set_mode(FRAME_HEADER_SIZE);
        info!(listeners = requested, "configured, tunnel running");
        Ok(())
    }

    /// Header/body alternation: a header chunk arms the body size, a
    /// body chunk dispatches the frame and re-arms the header size.
    fn on_frame_chunk(&mut self, chunk: Bytes) -> Result<(), SessionError> {
        match self.pending.take() {
            None => {
                let header = FrameHeader::decode(&chunk)?;
                self.framer.set_mode(header.body_len());
                self.pending = Some(header);
            }
            Some(header) => {
                self.framer.set_mode(FRAME_HEADER_SIZE);
                self.dispatch(header, chunk)?;
            }
        }
        Ok(())
    }

    /// Route one inbound frame to its listener.
    fn dispatch(&mut self, header: FrameHeader, body: Bytes) -> Result<(), SessionError> {
        match decode_body(&header, body)? {
            FrameBody::Data { peer, payload } => {
                let id = header.id;
                let Some(handle) = self.listeners.get(&id) else {
                    return Err(SessionError::UnknownTunnel(id));
                };
                if !handle.deliver(Delivery { peer, payload }) {
                    // The listener closed itself after a peer-table
                    // desync; it is no longer routable.
                    debug!(%id, "dropping closed listener from dispatch table");
                    self.listeners.remove(&id);
                }
                Ok(())
            }
            // Server-to-client state notifications are unused by this
            // client; receiving one means the peer is not speaking our
            // dialect.
            FrameBody::State { .. } => Err(SessionError::UnexpectedState),
        }
    }

    /// Encode a listener event and write it upstream.
    async fn forward(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        if !self.configured {
            return Err(SessionError::EarlyEvent);
        }
        let frame = match event {
            SessionEvent::Data { id, peer, payload } => encode_data(id, peer, &payload)?,
            SessionEvent::State { id, peer, state } => encode_state(id, peer, state)?,
        };
        self.write_half
            .write_all(&frame)
            .await
            .map_err(SessionError::Transport)
    }
}
