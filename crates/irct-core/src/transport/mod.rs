//! Line transport seam
//!
//! The harness never touches sockets directly. A `Connector` opens one
//! registered client session and hands back its two halves; the handle owns
//! the writer and a background reader task owns the reader.

pub mod tcp;

pub use tcp::TcpConnector;

use crate::types::ServerLabel;
use async_trait::async_trait;

/// Transport failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Could not establish the connection
    #[error("connect to {address} failed: {reason}")]
    Connect {
        /// Address that was dialed
        address: String,
        /// Failure description
        reason: String,
    },

    /// Socket I/O failed
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the connection
    #[error("connection closed")]
    Closed,

    /// Send rejected by the transport
    #[error("send rejected: {0}")]
    Rejected(String),
}

/// Where and as whom to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Server being joined
    pub server: ServerLabel,
    /// `host:port` to dial
    pub address: String,
    /// Nick to register with
    pub nick: String,
}

/// Write half of a client session
#[async_trait]
pub trait LineWriter: Send {
    /// Write one protocol line (without trailing CRLF)
    async fn write_line(&mut self, line: &str) -> Result<(), TransportError>;

    /// Close the write half
    async fn shutdown(&mut self) -> Result<(), TransportError>;
}

impl std::fmt::Debug for dyn LineWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LineWriter")
    }
}

/// Read half of a client session
#[async_trait]
pub trait LineReader: Send {
    /// Next inbound line, `None` once the peer closed the stream
    async fn read_line(&mut self) -> Result<Option<String>, TransportError>;
}

/// An opened client session
pub struct Connection {
    /// Write half
    pub writer: Box<dyn LineWriter>,
    /// Read half
    pub reader: Box<dyn LineReader>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens client sessions
///
/// Implementations only open the stream. Registration (`NICK`/`USER`) goes
/// through the command driver so it lands in the outbound log.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one client session
    async fn connect(&self, request: &ConnectRequest) -> Result<Connection, TransportError>;
}
