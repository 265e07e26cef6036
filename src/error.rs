use std::io;

use thiserror::Error;

use crate::engine::EngineError;

/// Errors surfaced by an [`Association`][crate::Association].
///
/// Lifecycle inputs never return these. They are rendered into
/// [`Event`][crate::Event] messages and the one that ends an association is
/// kept in [`Association::failure`][crate::Association::failure].
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration.
    #[error("Invalid config: {0}")]
    Config(&'static str),

    /// Engine could not be configured for the peer.
    #[error("Engine setup failed: {0}")]
    Engine(EngineError),

    /// Socket level failure.
    #[error("{0}")]
    Io(#[from] io::Error),

    /// Read notification that yielded no datagram.
    #[error("spurious read notification?")]
    Transport,

    /// The first handshake flight could not be produced.
    #[error("failed to start a handshake - {0}")]
    HandshakeStart(EngineError),

    /// A handshake step reported failure.
    #[error("handshake error - {0}")]
    Handshake(EngineError),

    /// Handling a handshake timeout reported failure.
    #[error("failed to re-transmit - {0}")]
    Retransmit(EngineError),

    /// Peer sent a close notification.
    #[error("shutdown alert received")]
    RemoteClose,

    /// Datagram above the configured maximum, dropped unread.
    #[error("oversized datagram of {size} bytes dropped (max {max})")]
    OversizedDatagram { size: usize, max: usize },

    /// Encrypted datagram decrypted to nothing without a close notification.
    #[error("zero-length datagram received?")]
    SpuriousDatagram,

    /// The encrypted ping could not be written.
    #[error("failed to send a ping - {0}")]
    KeepaliveSend(EngineError),
}

impl Error {
    /// Whether this error ends the association.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::HandshakeStart(_)
                | Error::Handshake(_)
                | Error::Retransmit(_)
                | Error::RemoteClose
                | Error::KeepaliveSend(_)
        )
    }
}
