//! # Loophole
//!
//! A tunneling proxy client that multiplexes traffic from many
//! locally-bound TCP and UDP listeners over a single upstream TCP
//! connection to a remote tunnel server.
//!
//! Local processes transparently reach remote endpoints: the client
//! accepts their traffic on loopback sockets, wraps each datagram or
//! stream fragment in a framed envelope identifying the originating
//! protocol family, transport, port and peer, and forwards it upstream.
//! Replies arriving upstream are delivered back to the originating peer
//! on the matching local socket.
//!
//! ## Architecture
//!
//! ```text
//! local peer ──> listener ──> session ──> frame codec ──> upstream
//! local peer <── listener <── session <── frame codec <── upstream
//! ```
//!
//! - [`protocol`]: the binary frame codec and the two-mode stream
//!   framer driving the upstream byte stream
//! - [`listener`]: loopback-bound UDP and TCP listeners
//! - [`session`]: the per-connection state machine owning the
//!   listeners and the dispatch table
//! - [`supervisor`]: the reconnect loop keeping one session alive

pub mod config;
pub mod listener;
pub mod protocol;
pub mod session;
pub mod supervisor;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest frame the wire format can carry, header included (64 KB)
pub const MAX_FRAME_SIZE: usize = 65535;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Session error: {0}")]
    Session(#[from] session::SessionError),

    #[error("Configuration error: {0}")]
    Config(String),
}
