use std::time::Duration;

use zeroize::Zeroizing;

use crate::engine::VerifyMode;
use crate::psk::DEFAULT_PSK;
use crate::Error;

// Largest UDP payload over IPv4.
const MAX_UDP_PAYLOAD: usize = 65_507;

/// Association configuration.
#[derive(Clone)]
pub struct Config {
    keepalive_interval: Duration,
    retransmit_start_rto: Duration,
    retransmit_max_rto: Duration,
    psk_secret: Zeroizing<Vec<u8>>,
    verify_mode: VerifyMode,
    max_datagram_size: usize,
    rng_seed: Option<u64>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            keepalive_interval: Duration::from_millis(5000),
            retransmit_start_rto: Duration::from_secs(1),
            retransmit_max_rto: Duration::from_secs(60),
            psk_secret: Zeroizing::new(DEFAULT_PSK.to_vec()),
            verify_mode: VerifyMode::None,
            max_datagram_size: MAX_UDP_PAYLOAD,
            rng_seed: None,
        }
    }

    /// Period between encrypted pings once connected.
    #[inline(always)]
    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    /// Time until the first handshake retransmission.
    ///
    /// Every handshake step that makes progress restarts with this value.
    /// Doubled for every retransmission with a ±0.25s jitter.
    #[inline(always)]
    pub fn retransmit_start_rto(&self) -> Duration {
        self.retransmit_start_rto
    }

    /// Upper bound for the retransmission timeout.
    #[inline(always)]
    pub fn retransmit_max_rto(&self) -> Duration {
        self.retransmit_max_rto
    }

    /// Pre-shared key handed to the engine. The identity is the association name.
    #[inline(always)]
    pub fn psk_secret(&self) -> &[u8] {
        &self.psk_secret
    }

    /// Peer certificate verification.
    #[inline(always)]
    pub fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }

    /// Largest datagram read from the transport.
    #[inline(always)]
    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    /// Seed for retransmission jitter. `None` uses the thread-local generator.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("keepalive_interval", &self.keepalive_interval)
            .field("retransmit_start_rto", &self.retransmit_start_rto)
            .field("retransmit_max_rto", &self.retransmit_max_rto)
            .field("verify_mode", &self.verify_mode)
            .field("max_datagram_size", &self.max_datagram_size)
            .field("rng_seed", &self.rng_seed)
            .finish_non_exhaustive()
    }
}

/// Builder for association configuration.
pub struct ConfigBuilder {
    keepalive_interval: Duration,
    retransmit_start_rto: Duration,
    retransmit_max_rto: Duration,
    psk_secret: Zeroizing<Vec<u8>>,
    verify_mode: VerifyMode,
    max_datagram_size: usize,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Set the keepalive period.
    ///
    /// Defaults to 5 seconds.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Set the time of the first handshake retransmission.
    ///
    /// Defaults to 1 second.
    pub fn retransmit_start_rto(mut self, rto: Duration) -> Self {
        self.retransmit_start_rto = rto;
        self
    }

    /// Set the upper bound of the retransmission timeout.
    ///
    /// Defaults to 60 seconds.
    pub fn retransmit_max_rto(mut self, rto: Duration) -> Self {
        self.retransmit_max_rto = rto;
        self
    }

    /// Set the pre-shared key.
    ///
    /// Defaults to [`DEFAULT_PSK`].
    pub fn psk_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.psk_secret = Zeroizing::new(secret.into());
        self
    }

    /// Set the certificate verification mode.
    ///
    /// Defaults to [`VerifyMode::None`].
    pub fn verify_mode(mut self, mode: VerifyMode) -> Self {
        self.verify_mode = mode;
        self
    }

    /// Set the largest datagram read from the transport.
    ///
    /// Defaults to 65507.
    pub fn max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }

    /// Seed the jitter generator for reproducible timing.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::Config` for values the association cannot run with.
    pub fn build(self) -> Result<Config, Error> {
        if self.keepalive_interval.is_zero() {
            return Err(Error::Config("keepalive interval must be non-zero"));
        }
        if self.retransmit_start_rto.is_zero() {
            return Err(Error::Config("retransmit start rto must be non-zero"));
        }
        if self.retransmit_max_rto < self.retransmit_start_rto {
            return Err(Error::Config("retransmit max rto below start rto"));
        }
        if self.psk_secret.is_empty() {
            return Err(Error::Config("psk secret must not be empty"));
        }
        if self.max_datagram_size == 0 || self.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(Error::Config("max datagram size out of range"));
        }

        Ok(Config {
            keepalive_interval: self.keepalive_interval,
            retransmit_start_rto: self.retransmit_start_rto,
            retransmit_max_rto: self.retransmit_max_rto,
            psk_secret: self.psk_secret,
            verify_mode: self.verify_mode,
            max_datagram_size: self.max_datagram_size,
            rng_seed: self.rng_seed,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}
