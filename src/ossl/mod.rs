//! OpenSSL implementation of the DTLS [`Engine`].

use std::fmt;
use std::net::SocketAddr;

use openssl::error::ErrorStack;
use openssl::ssl::{ErrorCode, Ssl, SslContext, SslContextBuilder, SslMethod};
use openssl::ssl::{SslOptions, SslStream, SslVerifyMode};

use crate::engine::{Decrypted, Engine, EngineError, EngineErrorKind, EngineParams, VerifyMode};
use crate::psk::PskCredentials;
use crate::transport::Transport;

mod io_buf;
use io_buf::IoBuffer;

/// All PSK key exchanges.
const DTLS_PSK_CIPHERS: &str = "PSK";

/// Targeted MTU
const DATAGRAM_MTU: usize = 1150;

/// Largest record plaintext.
const MAX_PLAINTEXT: usize = 16_384;

/// DTLS 1.2 client backed by OpenSSL.
///
/// OpenSSL runs over an in-memory buffer; datagrams it produces are written to
/// the association's transport after every operation.
pub struct OsslEngine {
    mtu: usize,
    cipher_list: String,
    peer: Option<SocketAddr>,

    /// Pins the context the stream was created from.
    _context: Option<SslContext>,

    tls: Option<SslStream<IoBuffer>>,
    encrypted: bool,
    closed: bool,
    last_error: Option<EngineError>,
}

impl OsslEngine {
    pub fn new() -> Self {
        OsslEngine {
            mtu: DATAGRAM_MTU,
            cipher_list: DTLS_PSK_CIPHERS.to_string(),
            peer: None,
            _context: None,
            tls: None,
            encrypted: false,
            closed: false,
            last_error: None,
        }
    }

    /// Largest datagram OpenSSL will produce. Takes effect at configure.
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// OpenSSL cipher list. Takes effect at configure.
    pub fn with_cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.cipher_list = ciphers.into();
        self
    }

    fn record(&mut self, e: EngineError) -> EngineError {
        debug!("DTLS error with {:?}: {}", self.peer, e);
        self.last_error = Some(e.clone());
        e
    }

    fn drive_handshake(&mut self, transport: &mut dyn Transport) -> Result<(), EngineError> {
        let Some(tls) = self.tls.as_mut() else {
            return Err(self.record(not_configured()));
        };

        let result = tls.do_handshake();
        // Flights produced by the step go out whatever the outcome.
        let flushed = flush(tls.get_mut(), transport);
        tls.get_mut().clear_incoming();

        match result {
            Ok(()) => {
                if !self.encrypted {
                    debug!("DTLS handshake complete with {:?}", self.peer);
                }
                self.encrypted = true;
            }
            Err(e) if would_block(&e) => {}
            Err(e) => return Err(self.record(ssl_error(EngineErrorKind::Handshake, e))),
        }

        flushed.map_err(|e| self.record(e))
    }
}

impl Default for OsslEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for OsslEngine {
    fn configure(&mut self, params: EngineParams) -> Result<(), EngineError> {
        let setup = |e: ErrorStack| EngineError::new(EngineErrorKind::Tls, e.to_string());

        let mtu = u32::try_from(self.mtu).map_err(|_| {
            self.record(EngineError::new(
                EngineErrorKind::InvalidState,
                format!("MTU {} out of range", self.mtu),
            ))
        })?;

        let context = dtls_create_ctx(&params, &self.cipher_list).map_err(setup)?;
        let ssl = dtls_ssl_create(&context, mtu).map_err(setup)?;
        let tls = SslStream::new(ssl, IoBuffer::default()).map_err(setup)?;

        self.peer = Some(params.peer);
        self._context = Some(context);
        self.tls = Some(tls);

        Ok(())
    }

    fn handshake_start(&mut self, transport: &mut dyn Transport) -> Result<(), EngineError> {
        if self.encrypted || self.closed {
            return Err(self.record(EngineError::new(
                EngineErrorKind::InvalidState,
                "handshake already done",
            )));
        }
        self.drive_handshake(transport)
    }

    fn handshake_continue(
        &mut self,
        transport: &mut dyn Transport,
        datagram: &[u8],
    ) -> Result<(), EngineError> {
        if let Some(tls) = self.tls.as_mut() {
            tls.get_mut().set_incoming(datagram);
        }
        self.drive_handshake(transport)
    }

    fn handle_timeout(&mut self, transport: &mut dyn Transport) -> Result<(), EngineError> {
        if self.encrypted {
            return Ok(());
        }
        // A handshake step without input resends the flight once OpenSSL's
        // own timer has expired, otherwise it sends nothing.
        self.drive_handshake(transport)
    }

    fn is_encrypted(&self) -> bool {
        self.encrypted && !self.closed
    }

    fn decrypt(&mut self, transport: &mut dyn Transport, datagram: &[u8]) -> Decrypted {
        let Some(tls) = self.tls.as_mut() else {
            return Decrypted::default();
        };

        tls.get_mut().set_incoming(datagram);
        let mut buf = vec![0; MAX_PLAINTEXT];
        let read = tls.ssl_read(&mut buf);
        // Reading may answer a retransmitted peer flight.
        let flushed = flush(tls.get_mut(), transport);
        tls.get_mut().clear_incoming();

        if let Err(e) = flushed {
            self.record(e);
        }

        match read {
            Ok(n) => {
                buf.truncate(n);
                Decrypted {
                    plaintext: buf,
                    remote_closed: false,
                }
            }
            Err(e) if e.code() == ErrorCode::ZERO_RETURN => {
                debug!("DTLS close notify from {:?}", self.peer);
                self.closed = true;
                self.record(ssl_error(EngineErrorKind::RemoteClosed, e));
                Decrypted {
                    plaintext: Vec::new(),
                    remote_closed: true,
                }
            }
            Err(e) if would_block(&e) => Decrypted::default(),
            Err(e) => {
                self.record(ssl_error(EngineErrorKind::Tls, e));
                Decrypted::default()
            }
        }
    }

    fn encrypt_and_send(
        &mut self,
        transport: &mut dyn Transport,
        plaintext: &[u8],
    ) -> Result<usize, EngineError> {
        if !self.is_encrypted() {
            return Err(self.record(EngineError::new(
                EngineErrorKind::InvalidState,
                "connection not encrypted",
            )));
        }
        let Some(tls) = self.tls.as_mut() else {
            return Err(self.record(not_configured()));
        };

        let written = tls.ssl_write(plaintext);
        let flushed = flush(tls.get_mut(), transport);

        match written {
            Ok(n) => {
                flushed.map_err(|e| self.record(e))?;
                Ok(n)
            }
            Err(e) => Err(self.record(ssl_error(EngineErrorKind::Tls, e))),
        }
    }

    fn shutdown(&mut self, transport: &mut dyn Transport) {
        if !self.is_encrypted() {
            return;
        }
        let Some(tls) = self.tls.as_mut() else {
            return;
        };

        if let Err(e) = tls.shutdown() {
            // The peer's close notify never arrives in-line, so the second
            // half of the bidirectional shutdown is expected to block.
            if !would_block(&e) {
                trace!("DTLS shutdown: {}", e);
            }
        }
        if let Err(e) = flush(tls.get_mut(), transport) {
            trace!("DTLS shutdown flush: {}", e);
        }

        self.closed = true;
    }

    fn last_error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }
}

impl fmt::Debug for OsslEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsslEngine")
            .field("peer", &self.peer)
            .field("mtu", &self.mtu)
            .field("encrypted", &self.encrypted)
            .field("closed", &self.closed)
            .finish()
    }
}

fn dtls_create_ctx(params: &EngineParams, cipher_list: &str) -> Result<SslContext, ErrorStack> {
    let mut ctx = SslContextBuilder::new(SslMethod::dtls())?;

    ctx.set_cipher_list(cipher_list)?;

    match params.verify {
        VerifyMode::None => ctx.set_verify(SslVerifyMode::NONE),
        VerifyMode::Peer => {
            ctx.set_default_verify_paths()?;
            ctx.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);
        }
    }

    if let Some(psk) = params.psk.clone() {
        ctx.set_psk_client_callback(move |_ssl, hint, identity, secret| {
            write_psk(psk.provide(hint), identity, secret)
        });
    }

    let mut options = SslOptions::empty();
    options.insert(SslOptions::NO_DTLSV1);
    ctx.set_options(options);

    Ok(ctx.build())
}

fn dtls_ssl_create(ctx: &SslContext, mtu: u32) -> Result<Ssl, ErrorStack> {
    let mut ssl = Ssl::new(ctx)?;
    ssl.set_connect_state();
    ssl.set_mtu(mtu)?;
    Ok(ssl)
}

/// Copy credentials into OpenSSL's buffers. The identity is NUL terminated.
fn write_psk(
    creds: &PskCredentials,
    identity: &mut [u8],
    secret: &mut [u8],
) -> Result<usize, ErrorStack> {
    let id = creds.identity();
    let key = creds.secret();

    if id.len() >= identity.len() || key.len() > secret.len() {
        warn!(
            "PSK does not fit: identity {} (max {}), secret {} (max {})",
            id.len(),
            identity.len().saturating_sub(1),
            key.len(),
            secret.len()
        );
        return Err(ErrorStack::get());
    }

    identity[..id.len()].copy_from_slice(id);
    identity[id.len()] = 0;
    secret[..key.len()].copy_from_slice(key);

    Ok(key.len())
}

fn flush(io: &mut IoBuffer, transport: &mut dyn Transport) -> Result<(), EngineError> {
    while let Some(datagram) = io.pop_outgoing() {
        transport
            .send(&datagram)
            .map_err(|e| EngineError::new(EngineErrorKind::Transport, e.to_string()))?;
    }
    Ok(())
}

fn would_block(e: &openssl::ssl::Error) -> bool {
    e.code() == ErrorCode::WANT_READ || e.code() == ErrorCode::WANT_WRITE
}

fn ssl_error(kind: EngineErrorKind, e: openssl::ssl::Error) -> EngineError {
    let kind = if e.code() == ErrorCode::ZERO_RETURN {
        EngineErrorKind::RemoteClosed
    } else {
        kind
    };
    EngineError::new(kind, e.to_string())
}

fn not_configured() -> EngineError {
    EngineError::new(EngineErrorKind::InvalidState, "engine not configured")
}
