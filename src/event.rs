//! Events queued by an association for delivery to the application.

use std::fmt;

/// Something the application should know about, drained via
/// [`Association::poll_event`][crate::Association::poll_event].
///
/// Messages are prefixed with the association name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Progress report.
    Info(String),
    /// Recoverable oddity, state is unchanged.
    Warning(String),
    /// Failure, or the peer closing the channel.
    Error(String),
    /// Decrypted application data from the peer.
    Response {
        /// Name of the association that received it.
        name: String,
        /// The datagram as read from the transport.
        datagram: Vec<u8>,
        /// The decrypted payload, never empty.
        plaintext: Vec<u8>,
    },
}

impl Event {
    pub(crate) fn info(name: &str, msg: impl fmt::Display) -> Self {
        Event::Info(format!("{}: {}", name, msg))
    }

    pub(crate) fn warning(name: &str, msg: impl fmt::Display) -> Self {
        Event::Warning(format!("{}: {}", name, msg))
    }

    pub(crate) fn error(name: &str, msg: impl fmt::Display) -> Self {
        Event::Error(format!("{}: {}", name, msg))
    }

    /// The message text, `None` for responses.
    pub fn message(&self) -> Option<&str> {
        match self {
            Event::Info(m) | Event::Warning(m) | Event::Error(m) => Some(m),
            Event::Response { .. } => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Info(m) => write!(f, "info: {}", m),
            Event::Warning(m) => write!(f, "warning: {}", m),
            Event::Error(m) => write!(f, "error: {}", m),
            Event::Response {
                name,
                datagram,
                plaintext,
            } => write!(
                f,
                "{}: response of {} bytes: {}",
                name,
                datagram.len(),
                String::from_utf8_lossy(plaintext)
            ),
        }
    }
}
