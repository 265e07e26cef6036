//! The DTLS engine capability driven by an association.
//!
//! An engine holds the handshake and record-layer state for exactly one peer.
//! It never owns the socket: every operation that may produce datagrams is
//! handed the association's [`Transport`] and writes to it directly.

use std::fmt;
use std::net::SocketAddr;

use crate::psk::PskAuthenticator;
use crate::transport::Transport;

/// How the peer's certificate is verified during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyMode {
    /// No verification. PSK handshakes do not carry a certificate.
    #[default]
    None,
    /// Require and verify a peer certificate.
    Peer,
}

/// Parameters an engine is configured with before the first handshake step.
#[derive(Debug, Clone)]
pub struct EngineParams {
    /// The remote address records are destined for.
    pub peer: SocketAddr,
    /// Certificate verification mode.
    pub verify: VerifyMode,
    /// Source of PSK credentials, `None` disables PSK negotiation.
    pub psk: Option<PskAuthenticator>,
}

/// Classification of an engine failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Operation called in a state that does not allow it.
    InvalidState,
    /// The handshake could not proceed.
    Handshake,
    /// The handshake gave up after timeouts.
    HandshakeTimeout,
    /// The peer closed the connection.
    RemoteClosed,
    /// Record layer or protocol failure.
    Tls,
    /// The transport refused a datagram.
    Transport,
    /// Anything else.
    Unknown,
}

/// A failure reported by an [`Engine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    kind: EngineErrorKind,
    message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        EngineError {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> EngineErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EngineError {}

/// Outcome of decrypting one datagram.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decrypted {
    /// Application data, possibly empty.
    pub plaintext: Vec<u8>,
    /// The datagram carried the peer's close notification.
    pub remote_closed: bool,
}

/// DTLS client engine.
///
/// Implementations are opaque to the association: cipher negotiation, key
/// derivation, record protection and flight bookkeeping all live behind this
/// trait. The association only relies on the contract documented per method.
pub trait Engine {
    /// Bind the engine to a peer. Called once, before any other method.
    fn configure(&mut self, params: EngineParams) -> Result<(), EngineError>;

    /// Send the first handshake flight.
    fn handshake_start(&mut self, transport: &mut dyn Transport) -> Result<(), EngineError>;

    /// Feed one inbound handshake datagram.
    ///
    /// `Ok` means the datagram was accepted; whether the handshake is done is
    /// read back through [`Engine::is_encrypted`].
    fn handshake_continue(
        &mut self,
        transport: &mut dyn Transport,
        datagram: &[u8],
    ) -> Result<(), EngineError>;

    /// Handle expiry of the retransmission timer, resending the last flight
    /// if the engine deems it necessary.
    ///
    /// `Ok` does not imply a resend. Engines with their own flight timer may
    /// resend nothing when that timer has not expired yet; the association
    /// still reports the timeout and backs off.
    fn handle_timeout(&mut self, transport: &mut dyn Transport) -> Result<(), EngineError>;

    /// Whether the handshake completed and records are protected.
    fn is_encrypted(&self) -> bool;

    /// Decrypt an inbound datagram.
    ///
    /// Failures that do not end the connection yield an empty plaintext.
    fn decrypt(&mut self, transport: &mut dyn Transport, datagram: &[u8]) -> Decrypted;

    /// Encrypt `plaintext` into one record and send it.
    ///
    /// Returns the number of plaintext bytes written.
    fn encrypt_and_send(
        &mut self,
        transport: &mut dyn Transport,
        plaintext: &[u8],
    ) -> Result<usize, EngineError>;

    /// Send a close notification. Only meaningful while encrypted.
    fn shutdown(&mut self, transport: &mut dyn Transport);

    /// The most recent failure, if any.
    fn last_error(&self) -> Option<&EngineError>;
}
