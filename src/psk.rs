use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use zeroize::Zeroizing;

/// Pre-shared key used when none is configured.
pub const DEFAULT_PSK: [u8; 6] = [0x1a, 0x2b, 0x3c, 0x4d, 0x5e, 0x6f];

/// A PSK identity and its secret.
///
/// The secret is wiped from memory on drop and never shown by `Debug`.
#[derive(Clone)]
pub struct PskCredentials {
    identity: Vec<u8>,
    secret: Zeroizing<Vec<u8>>,
}

impl PskCredentials {
    pub fn new(identity: impl Into<Vec<u8>>, secret: impl Into<Vec<u8>>) -> Self {
        PskCredentials {
            identity: identity.into(),
            secret: Zeroizing::new(secret.into()),
        }
    }

    pub fn identity(&self) -> &[u8] {
        &self.identity
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl fmt::Debug for PskCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PskCredentials")
            .field("identity", &String::from_utf8_lossy(&self.identity))
            .field("secret", &format_args!("<{} bytes>", self.secret.len()))
            .finish()
    }
}

/// Answers an engine's PSK request during the handshake.
///
/// Cloned into the engine at configure time. Answering is a pure lookup of the
/// association's credentials; the server's identity hint does not change the
/// answer. Requests are counted so the association can report them.
#[derive(Clone)]
pub struct PskAuthenticator {
    inner: Arc<Inner>,
}

struct Inner {
    credentials: PskCredentials,
    requests: AtomicUsize,
}

impl PskAuthenticator {
    pub fn new(credentials: PskCredentials) -> Self {
        PskAuthenticator {
            inner: Arc::new(Inner {
                credentials,
                requests: AtomicUsize::new(0),
            }),
        }
    }

    /// Credentials for a handshake in progress.
    pub fn provide(&self, identity_hint: Option<&[u8]>) -> &PskCredentials {
        if let Some(hint) = identity_hint {
            trace!("PSK identity hint: {}", String::from_utf8_lossy(hint));
        }
        self.inner.requests.fetch_add(1, Ordering::Relaxed);
        &self.inner.credentials
    }

    /// Number of requests since the last call.
    pub(crate) fn take_requests(&self) -> usize {
        self.inner.requests.swap(0, Ordering::Relaxed)
    }
}

impl fmt::Debug for PskAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PskAuthenticator")
            .field("credentials", &self.inner.credentials)
            .finish()
    }
}
