// Per-(tool, channel) circuit breaker
//
// Closed counts consecutive failures; at the threshold the circuit opens
// and admissions fail fast until the cooldown elapses. The first
// admission after cooldown runs as a half-open probe: success closes the
// circuit and resets the counter, failure re-opens it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls allowed
    Closed,
    /// Failure threshold exceeded - calls rejected
    Open,
    /// Cooldown elapsed - one probe allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit
    pub failure_threshold: u32,

    /// Time to wait before transitioning from open to half-open
    #[serde(with = "duration_millis")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Read-only view of a circuit's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

/// Runtime circuit breaker
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

/// Why an admission was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitRejected {
    /// Hint for the caller: how long until a retry may be admitted
    pub retry_after_ms: u64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                next_retry_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Check whether a call may be admitted right now
    ///
    /// An open circuit past its cooldown half-opens and admits exactly one
    /// probe; concurrent admissions during the probe are rejected.
    pub fn check_admit(&self, now: DateTime<Utc>) -> Result<(), CircuitRejected> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let retry_at = inner.next_retry_at.unwrap_or(now);
                if now >= retry_at {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    let remaining = (retry_at - now).num_milliseconds().max(0) as u64;
                    Err(CircuitRejected {
                        retry_after_ms: remaining,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CircuitRejected { retry_after_ms: 0 })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful execution
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.next_retry_at = None;
        inner.probe_in_flight = false;
    }

    /// Record a failed execution
    pub fn record_failure(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                // Probe failed: re-open with a fresh cooldown
                self.open(&mut inner, now);
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Force the circuit open (used when a tool server is given up on)
    pub fn force_open(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        self.open(&mut inner, now);
    }

    fn open(&self, inner: &mut Inner, now: DateTime<Utc>) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.next_retry_at =
            Some(now + ChronoDuration::milliseconds(self.config.cooldown.as_millis() as i64));
        inner.probe_in_flight = false;
    }

    /// Non-mutating availability check, used for listings
    ///
    /// Unlike [`check_admit`](Self::check_admit) this never consumes the
    /// half-open probe slot.
    pub fn is_rejecting(&self, now: DateTime<Utc>) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => inner.probe_in_flight,
            CircuitState::Open => match inner.next_retry_at {
                Some(retry_at) => now < retry_at,
                None => true,
            },
        }
    }

    /// Periodic maintenance: half-open circuits whose cooldown elapsed
    pub fn health_tick(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            if let Some(retry_at) = inner.next_retry_at {
                if now >= retry_at {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = false;
                }
            }
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.consecutive_failures,
            opened_at: inner.opened_at,
            next_retry_at: inner.next_retry_at,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_failure_threshold(threshold)
                .with_cooldown(Duration::from_secs(30)),
        )
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let cb = breaker(3);
        let now = Utc::now();

        cb.record_failure(now);
        cb.record_failure(now);
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure(now);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.check_admit(now).is_err());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = breaker(3);
        let now = Utc::now();

        cb.record_failure(now);
        cb.record_failure(now);
        cb.record_success();
        cb.record_failure(now);
        cb.record_failure(now);

        // Not consecutive enough to open
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_probe_then_close() {
        let cb = breaker(1);
        let now = Utc::now();

        cb.record_failure(now);
        assert_eq!(cb.state(), CircuitState::Open);

        // Before cooldown: rejected with a retry hint
        let rejected = cb.check_admit(now).unwrap_err();
        assert!(rejected.retry_after_ms > 0);

        // After cooldown: exactly one probe admitted
        let later = now + ChronoDuration::seconds(31);
        assert!(cb.check_admit(later).is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.check_admit(later).is_err());

        // Probe succeeds: closed, counter reset
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[test]
    fn test_half_open_probe_failure_reopens() {
        let cb = breaker(1);
        let now = Utc::now();

        cb.record_failure(now);
        let later = now + ChronoDuration::seconds(31);
        assert!(cb.check_admit(later).is_ok());

        cb.record_failure(later);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.check_admit(later).is_err());
    }

    #[test]
    fn test_health_tick_half_opens() {
        let cb = breaker(1);
        let now = Utc::now();
        cb.record_failure(now);

        cb.health_tick(now);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.health_tick(now + ChronoDuration::seconds(31));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_force_open() {
        let cb = breaker(100);
        cb.force_open(Utc::now());
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
