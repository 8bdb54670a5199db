//! Bounded reconnection with jittered exponential backoff.
//!
//! ```text
//! Idle ──close──► Scheduled ──sleep──► Attempting ──┬─ handshake ──► Idle
//!                     ▲                             │
//!                     └────── attempts remain ──────┤
//!                                                   └─ exhausted ──► Exhausted
//! ```
//!
//! Delay for attempt `a` (0-indexed):
//! `min(base · 2^min(a,6) + jitter, cap)` with `jitter` uniform in
//! `[0, base · 2^min(a,6) / 4)`. The exponent clamp keeps the doubling from
//! overflowing past the cap long before `u32` arithmetic could.
//!
//! The policy itself is a plain state machine — the cancellable retry task
//! that sleeps and redials lives in [`crate::client`], so `dispose()` can
//! abort it deterministically.
//!
//! Reference: Kleppmann — DDIA, Chapter 8 (Unreliable Networks)

use std::time::Duration;

use rand::Rng;

/// Doubling stops after this attempt; later attempts reuse the same
/// exponential term (jitter still varies).
pub const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Retry timing and bounds.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// First-attempt delay before exponential growth.
    pub base_delay: Duration,
    /// Hard ceiling on any single delay, jitter included.
    pub cap_delay: Duration,
    /// Retry budget; exhaustion surfaces a terminal error.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            cap_delay: Duration::from_secs(300),
            max_attempts: 5,
        }
    }
}

/// Where the retry cycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPhase {
    Idle,
    Scheduled,
    Attempting,
    Exhausted,
}

/// Attempt counter + phase for one connection manager.
///
/// Reset happens on handshake completion (`init` or successful
/// `auth`/`login`), not on socket-open: a connection that opens but dies
/// before authenticating keeps eating into the retry budget.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
    phase: ReconnectPhase,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
            phase: ReconnectPhase::Idle,
        }
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    pub fn phase(&self) -> ReconnectPhase {
        self.phase
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.phase == ReconnectPhase::Exhausted
    }

    /// Claim the next retry slot: returns the delay to sleep before dialing,
    /// or `None` once the budget is spent (phase becomes `Exhausted`).
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            self.phase = ReconnectPhase::Exhausted;
            return None;
        }
        let delay = backoff_delay(self.attempts, &self.config);
        self.attempts += 1;
        self.phase = ReconnectPhase::Scheduled;
        Some(delay)
    }

    /// The sleep elapsed; a dial is now in flight.
    pub fn begin_attempt(&mut self) {
        self.phase = ReconnectPhase::Attempting;
    }

    /// Handshake completed: zero the counter, back to `Idle`.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.phase = ReconnectPhase::Idle;
    }
}

/// Exponential term without jitter: `base · 2^min(attempt, 6)`, capped.
pub fn exponential_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let doubling = 1u32 << attempt.min(MAX_BACKOFF_EXPONENT);
    config
        .base_delay
        .saturating_mul(doubling)
        .min(config.cap_delay)
}

/// Full delay for `attempt`: exponential term plus uniform jitter in
/// `[0, term/4)`, clipped to the cap.
pub fn backoff_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let term = config
        .base_delay
        .saturating_mul(1u32 << attempt.min(MAX_BACKOFF_EXPONENT));
    let jitter_bound = (term / 4).as_micros() as u64;
    let jitter = if jitter_bound == 0 {
        Duration::ZERO
    } else {
        Duration::from_micros(rand::thread_rng().gen_range(0..jitter_bound))
    };
    term.saturating_add(jitter).min(config.cap_delay)
}
