use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::{Error, Result};

use super::clock::{Clock, SystemClock};

/// Circuit breaker state machine positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; all requests attempt the full pipeline.
    Closed,
    /// Failure threshold exceeded; requests bypass the pipeline.
    Open,
    /// One trial request per probe window tests recovery.
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip Closed → Open.
    pub failure_threshold: u32,
    /// Time the circuit stays Open before a trial is allowed.
    pub reset_timeout: Duration,
    /// How long a Half-Open trial may stay unresolved before another trial
    /// is admitted.
    pub probe_interval: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            probe_interval: Duration::from_secs(10),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the consecutive-failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set how long the circuit stays open before probing
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set the half-open probe window
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_transition: Instant,
    /// Set while a half-open trial is unresolved.
    probe_started: Option<Instant>,
}

/// Point-in-time view of breaker state, for dashboards and tests.
#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub consecutive_failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

/// Shared fault-isolation state machine guarding pipeline execution.
///
/// Transitions:
/// - `Closed → Open` once `consecutive_failures >= failure_threshold`
/// - `Open → HalfOpen` on the first admission check after `reset_timeout`
/// - `HalfOpen → Closed` on one success; `HalfOpen → Open` on one failure
///
/// All state lives behind a single mutex, so `record_success` and
/// `record_failure` are atomic relative to each other and `allow_request`
/// is safe under concurrent calls. Every pipeline controller receives a
/// handle (`Arc<CircuitBreaker>`); the breaker is never a process global.
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TelemetrySink>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(cfg: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            cfg,
            clock,
            sink: crate::telemetry::noop_sink(),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_transition: now,
                probe_started: None,
            }),
        }
    }

    /// Route breaker transitions to a telemetry sink.
    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.last_transition = now;
        self.sink.emit(TelemetryEvent::BreakerTransition { from, to });
    }

    /// Whether a request may enter the pipeline right now.
    ///
    /// In `Open`, the first call after `reset_timeout` moves the breaker to
    /// `HalfOpen` and is admitted as the trial; every other call is refused
    /// until that trial resolves or the probe window lapses.
    pub fn allow_request(&self) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        let now = self.clock.now();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if now.duration_since(inner.last_transition) >= self.cfg.reset_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen, now);
                    inner.probe_started = Some(now);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => match inner.probe_started {
                None => {
                    inner.probe_started = Some(now);
                    true
                }
                Some(started) if now.duration_since(started) >= self.cfg.probe_interval => {
                    // The previous trial never reported back; admit another.
                    inner.probe_started = Some(now);
                    true
                }
                Some(_) => false,
            },
        }
    }

    /// `Result` form of [`allow_request`](Self::allow_request), yielding the
    /// [`Error::CircuitOpen`] control-flow signal.
    pub fn allow(&self) -> Result<()> {
        if self.allow_request() {
            Ok(())
        } else {
            Err(Error::CircuitOpen)
        }
    }

    pub fn record_success(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            let now = self.clock.now();
            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures = 0;
                }
                CircuitState::HalfOpen => {
                    inner.consecutive_failures = 0;
                    inner.probe_started = None;
                    self.transition(&mut inner, CircuitState::Closed, now);
                }
                // A success from a request admitted before the trip does not
                // reopen the pipeline; the trial decides recovery.
                CircuitState::Open => {}
            }
        }
    }

    pub fn record_failure(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            let now = self.clock.now();
            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                    if inner.consecutive_failures >= self.cfg.failure_threshold {
                        self.transition(&mut inner, CircuitState::Open, now);
                    }
                }
                CircuitState::HalfOpen => {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                    inner.probe_started = None;
                    self.transition(&mut inner, CircuitState::Open, now);
                }
                CircuitState::Open => {}
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(CircuitState::Open)
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = self.clock.now();
        if let Ok(inner) = self.inner.lock() {
            let open_remaining_ms = if inner.state == CircuitState::Open {
                let elapsed = now.duration_since(inner.last_transition);
                self.cfg
                    .reset_timeout
                    .checked_sub(elapsed)
                    .map(|d| d.as_millis() as u64)
            } else {
                None
            };
            CircuitBreakerSnapshot {
                state: inner.state,
                failure_threshold: self.cfg.failure_threshold,
                consecutive_failures: inner.consecutive_failures,
                open_remaining_ms,
            }
        } else {
            CircuitBreakerSnapshot {
                state: CircuitState::Open,
                failure_threshold: self.cfg.failure_threshold,
                consecutive_failures: 0,
                open_remaining_ms: None,
            }
        }
    }
}
