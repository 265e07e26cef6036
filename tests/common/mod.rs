//! Shared helpers for association integration tests.

#![allow(unused)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dtls_assoc::{Association, Config, Decrypted, Engine, EngineError, EngineErrorKind};
use dtls_assoc::{EngineParams, Event, PskAuthenticator, State, Transport};

pub const NAME: &str = "alice";

/// Mock wire format: what the mock engine puts on the transport.
pub const CLIENT_HELLO: &[u8] = b"hs:client-hello";
pub const RETRANSMIT: &[u8] = b"hs:retransmit";
pub const CLOSE_ALERT: &[u8] = b"alert:close";
pub const ENC_PREFIX: &[u8] = b"enc:";

pub fn peer() -> SocketAddr {
    "192.0.2.1:4433".parse().unwrap()
}

/// Observable socket state shared between a test and its transport.
#[derive(Debug, Default)]
pub struct Wire {
    pub connected: bool,
    pub connect_calls: usize,
    pub sent: Vec<Vec<u8>>,
    pub inbound: VecDeque<Vec<u8>>,
    pub closed: bool,
    pub fail_send: bool,
}

#[derive(Debug, Clone)]
pub struct MockTransport {
    pub wire: Rc<RefCell<Wire>>,
    connect_immediately: bool,
}

impl MockTransport {
    pub fn connected() -> Self {
        MockTransport {
            wire: Rc::default(),
            connect_immediately: true,
        }
    }

    /// A transport whose connect completes only when the test says so.
    pub fn pending() -> Self {
        MockTransport {
            wire: Rc::default(),
            connect_immediately: false,
        }
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, _peer: SocketAddr) -> io::Result<()> {
        let mut w = self.wire.borrow_mut();
        w.connect_calls += 1;
        w.connected = self.connect_immediately;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let w = self.wire.borrow();
        w.connected && !w.closed
    }

    fn send(&mut self, datagram: &[u8]) -> io::Result<usize> {
        let mut w = self.wire.borrow_mut();
        if w.fail_send || w.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "send refused"));
        }
        w.sent.push(datagram.to_vec());
        Ok(datagram.len())
    }

    fn pending_datagram_size(&mut self) -> Option<usize> {
        self.wire.borrow().inbound.front().map(|d| d.len())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(d) = self.wire.borrow_mut().inbound.pop_front() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        let n = d.len().min(buf.len());
        buf[..n].copy_from_slice(&d[..n]);
        Ok(n)
    }

    fn close(&mut self) {
        self.wire.borrow_mut().closed = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Configure,
    Start,
    Continue(Vec<u8>),
    Timeout,
    Decrypt(Vec<u8>),
    Send(Vec<u8>),
    Shutdown,
}

/// Everything the mock engine was asked to do.
#[derive(Debug, Default)]
pub struct EngineLog {
    pub calls: Vec<Call>,
    pub params: Option<EngineParams>,
    pub psk_seen: Option<(Vec<u8>, Vec<u8>)>,
}

impl EngineLog {
    pub fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| f(c)).count()
    }

    pub fn sends(&self) -> Vec<Vec<u8>> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Send(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }
}

/// How the mock engine behaves.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub fail_start: bool,
    /// Handshake datagrams needed before the engine is encrypted.
    pub rounds: usize,
    /// Round (1-based) that fails.
    pub fail_round: Option<usize>,
    pub fail_timeout: bool,
    /// Timeouts succeed without resending, as when the engine's own timer
    /// has not expired.
    pub silent_timeout: bool,
    /// Round (1-based) during which PSK credentials are requested.
    pub psk_round: Option<usize>,
    /// Successful encrypted sends before they start failing.
    pub send_budget: Option<usize>,
    /// Failing sends report zero bytes instead of an error.
    pub send_zero: bool,
}

impl Script {
    pub fn rounds(rounds: usize) -> Self {
        Script {
            rounds,
            ..Script::default()
        }
    }
}

pub struct MockEngine {
    pub log: Rc<RefCell<EngineLog>>,
    script: Script,
    psk: Option<PskAuthenticator>,
    rounds_done: usize,
    encrypted: bool,
    sends: usize,
    last_error: Option<EngineError>,
}

impl MockEngine {
    pub fn new(script: Script) -> Self {
        MockEngine {
            log: Rc::default(),
            script,
            psk: None,
            rounds_done: 0,
            encrypted: false,
            sends: 0,
            last_error: None,
        }
    }

    fn fail(&mut self, kind: EngineErrorKind, msg: &str) -> EngineError {
        let e = EngineError::new(kind, msg);
        self.last_error = Some(e.clone());
        e
    }

    fn put(&mut self, transport: &mut dyn Transport, d: &[u8]) -> Result<(), EngineError> {
        transport
            .send(d)
            .map(|_| ())
            .map_err(|e| self.fail(EngineErrorKind::Transport, &e.to_string()))
    }
}

impl Engine for MockEngine {
    fn configure(&mut self, params: EngineParams) -> Result<(), EngineError> {
        let mut log = self.log.borrow_mut();
        log.calls.push(Call::Configure);
        self.psk = params.psk.clone();
        log.params = Some(params);
        Ok(())
    }

    fn handshake_start(&mut self, transport: &mut dyn Transport) -> Result<(), EngineError> {
        self.log.borrow_mut().calls.push(Call::Start);
        if self.script.fail_start {
            return Err(self.fail(EngineErrorKind::Handshake, "no cipher"));
        }
        self.put(transport, CLIENT_HELLO)
    }

    fn handshake_continue(
        &mut self,
        transport: &mut dyn Transport,
        datagram: &[u8],
    ) -> Result<(), EngineError> {
        self.log
            .borrow_mut()
            .calls
            .push(Call::Continue(datagram.to_vec()));

        self.rounds_done += 1;
        let round = self.rounds_done;

        if self.script.psk_round == Some(round) {
            if let Some(psk) = &self.psk {
                let creds = psk.provide(Some(b"hint"));
                self.log.borrow_mut().psk_seen =
                    Some((creds.identity().to_vec(), creds.secret().to_vec()));
            }
        }

        if self.script.fail_round == Some(round) {
            return Err(self.fail(EngineErrorKind::Handshake, "bad finished"));
        }

        self.put(transport, format!("hs:round:{}", round).as_bytes())?;

        if round >= self.script.rounds {
            self.encrypted = true;
        }
        Ok(())
    }

    fn handle_timeout(&mut self, transport: &mut dyn Transport) -> Result<(), EngineError> {
        self.log.borrow_mut().calls.push(Call::Timeout);
        if self.script.fail_timeout {
            return Err(self.fail(EngineErrorKind::HandshakeTimeout, "too many retries"));
        }
        if self.script.silent_timeout {
            return Ok(());
        }
        self.put(transport, RETRANSMIT)
    }

    fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    fn decrypt(&mut self, _transport: &mut dyn Transport, datagram: &[u8]) -> Decrypted {
        self.log
            .borrow_mut()
            .calls
            .push(Call::Decrypt(datagram.to_vec()));

        if datagram == CLOSE_ALERT {
            self.encrypted = false;
            return Decrypted {
                plaintext: Vec::new(),
                remote_closed: true,
            };
        }

        match datagram.strip_prefix(ENC_PREFIX) {
            Some(p) => Decrypted {
                plaintext: p.to_vec(),
                remote_closed: false,
            },
            None => Decrypted::default(),
        }
    }

    fn encrypt_and_send(
        &mut self,
        transport: &mut dyn Transport,
        plaintext: &[u8],
    ) -> Result<usize, EngineError> {
        self.log
            .borrow_mut()
            .calls
            .push(Call::Send(plaintext.to_vec()));

        if let Some(budget) = self.script.send_budget {
            if self.sends >= budget {
                let e = self.fail(EngineErrorKind::Transport, "network unreachable");
                return if self.script.send_zero { Ok(0) } else { Err(e) };
            }
        }

        let mut record = ENC_PREFIX.to_vec();
        record.extend_from_slice(plaintext);
        self.put(transport, &record)?;
        self.sends += 1;

        Ok(plaintext.len())
    }

    fn shutdown(&mut self, transport: &mut dyn Transport) {
        self.log.borrow_mut().calls.push(Call::Shutdown);
        let _ = self.put(transport, CLOSE_ALERT);
        self.encrypted = false;
    }

    fn last_error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }
}

pub type TestAssociation = Association<MockTransport, MockEngine>;

/// Association plus handles on its mocks.
pub struct Harness {
    pub assoc: TestAssociation,
    pub wire: Rc<RefCell<Wire>>,
    pub log: Rc<RefCell<EngineLog>>,
    pub now: Instant,
}

impl Harness {
    pub fn new(transport: MockTransport, script: Script) -> Self {
        Self::with_config(Config::builder().rng_seed(7).build().unwrap(), transport, script)
    }

    pub fn with_config(config: Config, transport: MockTransport, script: Script) -> Self {
        Self::build(config, NAME, transport, script)
    }

    pub fn named(name: &str, transport: MockTransport, script: Script) -> Self {
        let config = Config::builder().rng_seed(7).build().unwrap();
        Self::build(config, name, transport, script)
    }

    fn build(config: Config, name: &str, transport: MockTransport, script: Script) -> Self {
        let _ = env_logger::try_init();

        let engine = MockEngine::new(script);
        let wire = Rc::clone(&transport.wire);
        let log = Rc::clone(&engine.log);
        let assoc = Association::new(Arc::new(config), peer(), name, transport, engine)
            .expect("association");

        Harness {
            assoc,
            wire,
            log,
            now: Instant::now(),
        }
    }

    /// Advance the clock and drive timers.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        self.assoc.handle_timeout(self.now);
        assert_invariants(&self.assoc);
    }

    /// Queue a datagram on the transport and signal readability.
    pub fn receive(&mut self, datagram: &[u8]) {
        self.wire.borrow_mut().inbound.push_back(datagram.to_vec());
        self.assoc.handle_readable(self.now);
        assert_invariants(&self.assoc);
    }

    pub fn start(&mut self) {
        self.assoc.start_handshake(self.now);
        assert_invariants(&self.assoc);
    }

    /// Start and finish a one round handshake.
    pub fn connect(&mut self) {
        self.start();
        self.receive(b"hs:server-flight");
        assert_eq!(self.assoc.state(), State::Connected);
    }

    pub fn events(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Some(e) = self.assoc.poll_event() {
            out.push(e);
        }
        out
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.wire.borrow().sent.clone()
    }
}

/// Timer invariants that hold after every input.
pub fn assert_invariants(assoc: &TestAssociation) {
    assert_eq!(
        assoc.is_keepalive_active(),
        assoc.state() == State::Connected,
        "keepalive active iff Connected (state {:?})",
        assoc.state()
    );
    assert_eq!(
        assoc.is_retransmit_active(),
        assoc.state() == State::Handshaking,
        "retransmit active iff Handshaking (state {:?})",
        assoc.state()
    );
}

pub fn infos(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Info(m) => Some(m.as_str()),
            _ => None,
        })
        .collect()
}

pub fn warnings(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Warning(m) => Some(m.as_str()),
            _ => None,
        })
        .collect()
}

pub fn errors(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Error(m) => Some(m.as_str()),
            _ => None,
        })
        .collect()
}
