//! Circuit Breaker
//!
//! Keeps a persistently failing source from being hammered every tick.
//! States: Closed (normal) -> Open (failing fast) -> HalfOpen (probing)

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// How long to fail fast before probing again
    pub open_duration: Duration,
    /// Probe successes needed to close again
    pub success_threshold: u32,
    /// Probes admitted while half-open
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(300),
            success_threshold: 1,
            half_open_max_requests: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    probe_successes: u32,
    probes_in_flight: u32,
    opened_at: Option<Instant>,
    trips: u64,
}

/// Circuit breaker guarding one source
#[derive(Debug)]
pub struct CircuitBreaker {
    source_id: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(source_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            source_id: source_id.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                probe_successes: 0,
                probes_in_flight: 0,
                opened_at: None,
                trips: 0,
            }),
        }
    }

    pub fn with_defaults(source_id: impl Into<String>) -> Self {
        Self::new(source_id, CircuitBreakerConfig::default())
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// How many times the breaker has opened
    pub fn trips(&self) -> u64 {
        self.inner.lock().trips
    }

    /// Returns false while the circuit is open
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.open_duration);
                if !cooled_down {
                    debug!(source = %self.source_id, "Circuit open, request blocked");
                    return false;
                }
                info!(source = %self.source_id, "Circuit half-open, probing source");
                inner.state = CircuitState::HalfOpen;
                inner.probe_successes = 0;
                inner.probes_in_flight = 1;
                true
            }
            CircuitState::HalfOpen => {
                if inner.probes_in_flight < self.config.half_open_max_requests {
                    inner.probes_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::HalfOpen => {
                inner.probe_successes += 1;
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
                if inner.probe_successes >= self.config.success_threshold {
                    info!(source = %self.source_id, "Circuit closed, source recovered");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed | CircuitState::Open => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        source = %self.source_id,
                        failures = inner.consecutive_failures,
                        open_secs = self.config.open_duration.as_secs(),
                        "Circuit tripped"
                    );
                    Self::open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                warn!(source = %self.source_id, "Probe failed, circuit re-opened");
                Self::open(&mut inner);
            }
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
            }
        }
    }

    /// Admits a request and hands back a permit that must be settled.
    ///
    /// A permit dropped without an outcome (the call was cancelled or timed
    /// out) counts as a failure, so a half-open probe slot is always released.
    pub fn acquire(&self) -> Option<BreakerPermit<'_>> {
        self.allow_request().then(|| BreakerPermit {
            breaker: self,
            settled: false,
        })
    }

    fn open(inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probes_in_flight = 0;
        inner.probe_successes = 0;
        inner.trips += 1;
    }
}

/// One admitted request
#[must_use = "an unsettled permit records a failure when dropped"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(source = %self.breaker.source_id, "Request abandoned, counted as failure");
            self.breaker.record_failure();
        }
    }
}
