//! Per-peer association state machine.
//!
//! ```text
//!                 start_handshake
//!        Idle ─────────────────────► ConnectingTransport
//!          │                                │ transport connected
//!          │ (already connected)            ▼
//!          └──────────────────────────► Handshaking ◄──┐ datagram / retransmit
//!                                           │    └─────┘
//!                                 encrypted │             fatal engine error
//!                                           ▼           ─────────────────────► Failed
//!                                       Connected ──── ping send failure ────► Failed
//!                                           │
//!                              close notify ▼
//!                                         Closed
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::engine::{Engine, EngineError, EngineErrorKind, EngineParams};
use crate::event::Event;
use crate::ping::Ping;
use crate::psk::{PskAuthenticator, PskCredentials};
use crate::timer::{ExponentialBackoff, Timer};
use crate::transport::Transport;
use crate::{Config, Error, SeededRng};

/// Lifecycle state of an [`Association`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Created, handshake not requested yet.
    Idle,
    /// Handshake requested, waiting for the transport to connect.
    ConnectingTransport,
    /// Handshake flights in progress.
    Handshaking,
    /// Encrypted, keepalive running.
    Connected,
    /// The peer closed the channel.
    Closed,
    /// A fatal error ended the association.
    Failed,
}

impl State {
    /// `Closed` and `Failed` are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Closed | State::Failed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of one handshake step.
#[derive(Debug)]
pub(crate) enum HandshakeProgress {
    StillHandshaking,
    Encrypted,
    Fatal(EngineError),
}

/// Result of handling a retransmission timeout.
#[derive(Debug)]
pub(crate) enum RetransmitOutcome {
    Retransmitted,
    Fatal(EngineError),
}

/// A DTLS client association with one peer.
///
/// Owns the transport, the engine and both timers exclusively. All inputs
/// take the current time and return immediately; outcomes are read back with
/// [`Association::poll_event`] and [`Association::state`].
pub struct Association<T: Transport, E: Engine> {
    config: Arc<Config>,
    peer: SocketAddr,
    name: String,
    state: State,

    /// Sequence number of the next ping.
    ping_sequence: u64,

    transport: T,
    engine: E,
    psk: PskAuthenticator,

    /// Jitter source for the retransmission backoff.
    rng: SeededRng,

    /// Armed iff Handshaking.
    retransmit_timer: Timer,
    retransmit_backoff: ExponentialBackoff,

    /// Armed iff Connected.
    keepalive_timer: Timer,

    events: VecDeque<Event>,

    /// The error that moved us to Failed or Closed.
    failure: Option<Error>,
}

impl<T: Transport, E: Engine> Association<T, E> {
    /// Create an association with `peer`, identified locally by `name`.
    ///
    /// The engine is configured for the peer with the PSK identity `name` and
    /// the secret from `config`. The transport is asked to connect, which may
    /// complete later; see [`Association::handle_transport_connected`].
    pub fn new(
        config: Arc<Config>,
        peer: SocketAddr,
        name: impl Into<String>,
        mut transport: T,
        mut engine: E,
    ) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Config("association name must not be empty"));
        }

        let psk = PskAuthenticator::new(PskCredentials::new(
            name.as_bytes(),
            config.psk_secret(),
        ));

        engine
            .configure(EngineParams {
                peer,
                verify: config.verify_mode(),
                psk: Some(psk.clone()),
            })
            .map_err(Error::Engine)?;

        if !transport.is_connected() {
            transport.connect(peer)?;
        }

        let mut rng = SeededRng::new(config.rng_seed());
        let retransmit_backoff = ExponentialBackoff::new(
            config.retransmit_start_rto(),
            config.retransmit_max_rto(),
            &mut rng,
        );

        debug!("{}: new association with {}", name, peer);

        Ok(Association {
            config,
            peer,
            name,
            state: State::Idle,
            ping_sequence: 0,
            transport,
            engine,
            psk,
            rng,
            retransmit_timer: Timer::new(),
            retransmit_backoff,
            keepalive_timer: Timer::new(),
            events: VecDeque::new(),
            failure: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Sequence number the next ping will carry, i.e. the number of pings sent.
    pub fn ping_sequence(&self) -> u64 {
        self.ping_sequence
    }

    pub fn is_keepalive_active(&self) -> bool {
        self.keepalive_timer.is_active()
    }

    pub fn is_retransmit_active(&self) -> bool {
        self.retransmit_timer.is_active()
    }

    /// The error that ended the association, if it has ended.
    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Whether the transport has a datagram waiting to be read.
    pub fn has_pending_datagram(&mut self) -> bool {
        self.state != State::Closed && self.transport.pending_datagram_size().is_some()
    }

    /// Next queued event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Earliest instant at which [`Association::handle_timeout`] has work.
    pub fn poll_timeout(&self) -> Option<Instant> {
        match (
            self.retransmit_timer.deadline(),
            self.keepalive_timer.deadline(),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Request the handshake.
    ///
    /// Only acts in `Idle`. If the transport is not connected yet the
    /// handshake waits for [`Association::handle_transport_connected`].
    pub fn start_handshake(&mut self, now: Instant) {
        if self.state != State::Idle {
            debug!(
                "{}: start_handshake ignored in state {}",
                self.name, self.state
            );
            return;
        }

        if !self.transport.is_connected() {
            self.set_state(State::ConnectingTransport);
            self.emit_info("connecting UDP socket first...");
            return;
        }

        self.begin_handshake(now);
    }

    /// The transport reports it is connected.
    pub fn handle_transport_connected(&mut self, now: Instant) {
        if self.state != State::ConnectingTransport {
            debug!(
                "{}: transport connected in state {}, nothing to resume",
                self.name, self.state
            );
            return;
        }

        self.emit_info("UDP socket is now in connected state, continue with handshake...");
        self.begin_handshake(now);
    }

    /// The transport reports a datagram is ready. Reads and dispatches one.
    pub fn handle_readable(&mut self, now: Instant) {
        if self.state == State::Closed {
            trace!("{}: read notification after close", self.name);
            return;
        }

        let Some(size) = self.transport.pending_datagram_size() else {
            self.emit_warning(Error::Transport);
            return;
        };

        let max = self.config.max_datagram_size();
        if size > max {
            // Consume and drop it.
            let mut scratch = [0; 1];
            if let Err(e) = self.transport.receive(&mut scratch) {
                trace!("{}: discarding oversized datagram failed: {}", self.name, e);
            }
            let err = Error::OversizedDatagram { size, max };
            warn!("{}: {}", self.name, err);
            self.emit_warning(err);
            return;
        }

        let mut datagram = vec![0; size];
        let n = match self.transport.receive(&mut datagram) {
            Ok(n) => n,
            Err(e) => {
                trace!("{}: receive failed: {}", self.name, e);
                0
            }
        };
        datagram.truncate(n);

        self.handle_datagram(now, &datagram);
    }

    /// Dispatch one datagram read from the transport by the caller.
    pub fn handle_datagram(&mut self, now: Instant, datagram: &[u8]) {
        if datagram.is_empty() {
            self.emit_warning(Error::Transport);
            return;
        }

        match self.state {
            State::Connected => self.handle_encrypted_datagram(datagram),
            State::Handshaking => self.handle_handshake_datagram(now, datagram),
            state => debug!(
                "{}: dropping {} byte datagram in state {}",
                self.name,
                datagram.len(),
                state
            ),
        }
    }

    /// Drive timers. Call when `now` reaches [`Association::poll_timeout`].
    pub fn handle_timeout(&mut self, now: Instant) {
        if self.state == State::Handshaking && self.retransmit_timer.is_expired(now) {
            self.emit_warning("handshake timeout, trying to re-transmit");

            match self.retransmit() {
                RetransmitOutcome::Retransmitted => {
                    self.retransmit_backoff.attempt(&mut self.rng);
                    debug!(
                        "{}: retransmit #{}, next in {:.03}s",
                        self.name,
                        self.retransmit_backoff.attempts(),
                        self.retransmit_backoff.rto().as_secs_f32()
                    );
                    self.retransmit_timer
                        .arm(now + self.retransmit_backoff.rto());
                }
                RetransmitOutcome::Fatal(e) => self.fail(Error::Retransmit(e)),
            }
        }

        if self.state == State::Connected && self.keepalive_timer.is_expired(now) {
            self.keepalive_timer
                .arm(now + self.config.keepalive_interval());
            self.keepalive_tick();
        }
    }

    fn begin_handshake(&mut self, now: Instant) {
        match self.advance(None) {
            HandshakeProgress::Fatal(e) => self.fail(Error::HandshakeStart(e)),
            HandshakeProgress::StillHandshaking => {
                self.set_state(State::Handshaking);
                self.restart_retransmit_timer(now);
                self.emit_info("starting a handshake");
            }
            HandshakeProgress::Encrypted => {
                self.set_state(State::Handshaking);
                self.on_encrypted(now);
            }
        }
    }

    fn handle_handshake_datagram(&mut self, now: Instant, datagram: &[u8]) {
        match self.advance(Some(datagram)) {
            HandshakeProgress::Fatal(e) => self.fail(Error::Handshake(e)),
            HandshakeProgress::StillHandshaking => {
                self.restart_retransmit_timer(now);
                self.emit_info("continuing with handshake...");
            }
            HandshakeProgress::Encrypted => self.on_encrypted(now),
        }
    }

    /// One handshake step. `None` sends the first flight.
    fn advance(&mut self, datagram: Option<&[u8]>) -> HandshakeProgress {
        let result = match datagram {
            None => self.engine.handshake_start(&mut self.transport),
            Some(d) => self.engine.handshake_continue(&mut self.transport, d),
        };
        self.report_psk_requests();

        match result {
            Err(e) => HandshakeProgress::Fatal(e),
            Ok(()) if self.engine.is_encrypted() => HandshakeProgress::Encrypted,
            Ok(()) => HandshakeProgress::StillHandshaking,
        }
    }

    fn retransmit(&mut self) -> RetransmitOutcome {
        let result = self.engine.handle_timeout(&mut self.transport);
        self.report_psk_requests();

        match result {
            Ok(()) => RetransmitOutcome::Retransmitted,
            Err(e) => RetransmitOutcome::Fatal(e),
        }
    }

    fn restart_retransmit_timer(&mut self, now: Instant) {
        self.retransmit_backoff.reset(&mut self.rng);
        self.retransmit_timer
            .arm(now + self.retransmit_backoff.rto());
    }

    fn on_encrypted(&mut self, now: Instant) {
        self.retransmit_timer.disable();
        self.set_state(State::Connected);
        self.emit_info("encrypted connection established!");

        self.keepalive_timer
            .arm(now + self.config.keepalive_interval());
        self.keepalive_tick();
    }

    fn keepalive_tick(&mut self) {
        let mut payload = Vec::new();
        Ping::new(&self.name, self.ping_sequence).serialize(&mut payload);

        match self.engine.encrypt_and_send(&mut self.transport, &payload) {
            Ok(n) if n > 0 => {
                trace!("{}: ping {} sent", self.name, self.ping_sequence);
                self.ping_sequence += 1;
            }
            Ok(_) => {
                let e = self.engine.last_error().cloned().unwrap_or_else(|| {
                    EngineError::new(EngineErrorKind::Transport, "no bytes written")
                });
                self.fail(Error::KeepaliveSend(e));
            }
            Err(e) => self.fail(Error::KeepaliveSend(e)),
        }
    }

    fn handle_encrypted_datagram(&mut self, datagram: &[u8]) {
        let decrypted = self.engine.decrypt(&mut self.transport, datagram);

        if !decrypted.plaintext.is_empty() {
            self.events.push_back(Event::Response {
                name: self.name.clone(),
                datagram: datagram.to_vec(),
                plaintext: decrypted.plaintext,
            });
            return;
        }

        if decrypted.remote_closed {
            self.emit_error(&Error::RemoteClose);
            self.transport.close();
            self.keepalive_timer.disable();
            self.set_state(State::Closed);
            self.failure = Some(Error::RemoteClose);
            return;
        }

        self.emit_warning(Error::SpuriousDatagram);
    }

    fn fail(&mut self, err: Error) {
        warn!("{}: {}", self.name, err);
        self.emit_error(&err);
        self.retransmit_timer.disable();
        self.keepalive_timer.disable();
        self.set_state(State::Failed);
        self.failure = Some(err);
    }

    fn report_psk_requests(&mut self) {
        for _ in 0..self.psk.take_requests() {
            self.emit_info("providing pre-shared key...");
        }
    }

    fn set_state(&mut self, state: State) {
        debug!("{}: {} -> {}", self.name, self.state, state);
        self.state = state;
    }

    fn emit_info(&mut self, msg: impl fmt::Display) {
        self.events.push_back(Event::info(&self.name, msg));
    }

    fn emit_warning(&mut self, msg: impl fmt::Display) {
        self.events.push_back(Event::warning(&self.name, msg));
    }

    fn emit_error(&mut self, msg: impl fmt::Display) {
        self.events.push_back(Event::error(&self.name, msg));
    }
}

impl<T: Transport, E: Engine> Drop for Association<T, E> {
    fn drop(&mut self) {
        if self.state == State::Connected && self.engine.is_encrypted() {
            debug!("{}: sending shutdown alert", self.name);
            self.engine.shutdown(&mut self.transport);
        }
        self.retransmit_timer.disable();
        self.keepalive_timer.disable();
        self.transport.close();
    }
}

impl<T: Transport, E: Engine> fmt::Debug for Association<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Association")
            .field("name", &self.name)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("ping_sequence", &self.ping_sequence)
            .field("retransmit", &self.retransmit_timer.deadline())
            .field("keepalive", &self.keepalive_timer.deadline())
            .field("events", &self.events.len())
            .finish()
    }
}
