//! dtls-assoc is a client-side DTLS association manager.
//!
//! An [`Association`] turns one connected datagram [`Transport`] into a secured,
//! keepalive-monitored channel to a single peer. The DTLS record layer itself is
//! delegated to an [`Engine`]; this crate decides *when* the engine is driven:
//! handshake steps, handshake retransmission, the encrypted ping and shutdown.
//!
//! The association does no I/O scheduling on its own. Every input carries the
//! current time and the caller owns the event loop:
//!
//! ```text
//!  caller                              Association
//!
//!  start_handshake(now)       ------>  ConnectingTransport / Handshaking
//!  handle_transport_connected ------>  Handshaking
//!  handle_readable(now)       ------>  handshake step / decrypt
//!  handle_timeout(now)        ------>  retransmit / ping
//!  poll_timeout()             <------  next deadline
//!  poll_event()               <------  Info/Warning/Error/Response
//! ```
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "openssl")]
//! # fn main() -> Result<(), dtls_assoc::Error> {
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use dtls_assoc::{Association, Config, Event, OsslEngine, UdpTransport};
//!
//! let config = Arc::new(Config::default());
//! let transport = UdpTransport::bind("0.0.0.0:0".parse().unwrap())?;
//! let engine = OsslEngine::new();
//! let peer = "127.0.0.1:22334".parse().unwrap();
//!
//! let mut assoc = Association::new(config, peer, "client-1", transport, engine)?;
//! assoc.start_handshake(Instant::now());
//!
//! loop {
//!     let now = Instant::now();
//!     while assoc.has_pending_datagram() {
//!         assoc.handle_readable(now);
//!     }
//!     assoc.handle_timeout(now);
//!
//!     while let Some(event) = assoc.poll_event() {
//!         match event {
//!             Event::Response { plaintext, .. } => {
//!                 println!("{}", String::from_utf8_lossy(&plaintext));
//!             }
//!             other => println!("{other}"),
//!         }
//!     }
//!
//!     if assoc.state().is_terminal() {
//!         break;
//!     }
//!     # break;
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "openssl"))]
//! # fn main() {}
//! ```
#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

mod association;
pub use association::{Association, State};

mod config;
pub use config::{Config, ConfigBuilder};

mod engine;
pub use engine::{Decrypted, Engine, EngineError, EngineErrorKind, EngineParams, VerifyMode};

mod error;
pub use error::Error;

mod event;
pub use event::Event;

mod ping;
pub use ping::Ping;

mod psk;
pub use psk::{PskAuthenticator, PskCredentials, DEFAULT_PSK};

mod rng;
pub(crate) use rng::SeededRng;

mod timer;

mod transport;
pub use transport::{Transport, UdpTransport};

#[cfg(feature = "openssl")]
mod ossl;
#[cfg(feature = "openssl")]
pub use ossl::OsslEngine;
