use std::ops::Mul;
use std::time::{Duration, Instant};

use crate::SeededRng;

// In seconds.
const JITTER_RANGE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timeout {
    Disabled,
    Armed(Instant),
}

/// A one-shot deadline, re-armed by its owner after each expiry.
#[derive(Debug)]
pub(crate) struct Timer {
    timeout: Timeout,
}

impl Timer {
    pub fn new() -> Self {
        Timer {
            timeout: Timeout::Disabled,
        }
    }

    pub fn arm(&mut self, at: Instant) {
        self.timeout = Timeout::Armed(at);
    }

    pub fn disable(&mut self) {
        self.timeout = Timeout::Disabled;
    }

    pub fn is_active(&self) -> bool {
        matches!(self.timeout, Timeout::Armed(_))
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.timeout {
            Timeout::Armed(t) => Some(t),
            Timeout::Disabled => None,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|t| now >= t)
    }
}

/// Retransmission backoff. Doubles per attempt up to `max_rto`, never gives up.
#[derive(Debug)]
pub(crate) struct ExponentialBackoff {
    start_rto: Duration,
    max_rto: Duration,
    rto: Duration,
    jitter: f32,
    attempts: usize,
}

impl ExponentialBackoff {
    pub fn new(start_rto: Duration, max_rto: Duration, rng: &mut SeededRng) -> Self {
        Self {
            start_rto,
            max_rto,
            rto: start_rto,
            jitter: Self::jitter(rng),
            attempts: 0,
        }
    }

    pub fn reset(&mut self, rng: &mut SeededRng) {
        self.rto = self.start_rto;
        self.jitter = Self::jitter(rng);
        self.attempts = 0;
    }

    pub fn rto(&self) -> Duration {
        if self.jitter < 0.0 {
            let duration = Duration::from_secs_f32(self.jitter.abs());
            self.rto.saturating_sub(duration)
        } else {
            self.rto + Duration::from_secs_f32(self.jitter)
        }
        .max(Duration::from_millis(50))
    }

    // A value between -0.25s and 0.25s
    fn jitter(rng: &mut SeededRng) -> f32 {
        rng.random::<f32>() * JITTER_RANGE - (JITTER_RANGE / 2.0)
    }

    pub fn attempt(&mut self, rng: &mut SeededRng) {
        self.attempts += 1;
        self.jitter = Self::jitter(rng);
        self.rto = self.rto.mul(2).min(self.max_rto);
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }
}
