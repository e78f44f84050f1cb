//! 遥测模块：以“发射后不管”的方式上报阶段耗时、熔断器状态与调度周期指标。
//!
//! Telemetry Module.
//!
//! Operational signals — stage durations, resource tiers, circuit breaker
//! transitions, solver fallbacks — flow through a [`TelemetrySink`] so that
//! external alerting can observe them. Emission is fire-and-forget and must
//! never block a controller: [`TelemetrySink::emit`] is synchronous, and
//! sinks that ship events elsewhere are expected to buffer internally.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TelemetryEvent`] | Typed operational event enum |
//! | [`TelemetrySink`] | Trait for event destinations |
//! | [`NoopSink`] | Default no-op sink (no collection) |
//! | [`MemorySink`] | In-memory sink for testing |
//! | [`TracingSink`] | Sink that logs through `tracing` |

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use uuid::Uuid;

use crate::profile::StageKind;
use crate::resilience::CircuitState;
use crate::resource::ResourceTier;

/// One operational signal. These are never request-level errors; they exist
/// for external alerting and dashboards.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    StageCompleted {
        request_id: Uuid,
        stage: StageKind,
        duration: Duration,
        tier: ResourceTier,
    },
    StageFailed {
        request_id: Uuid,
        stage: StageKind,
        reason: String,
    },
    BreakerTransition {
        from: CircuitState,
        to: CircuitState,
    },
    CycleCompleted {
        pending: usize,
        admitted: usize,
        tier: ResourceTier,
    },
    SolverFellBack {
        reason: String,
    },
    ForcedFallback {
        request_id: Uuid,
        waited: Duration,
    },
}

/// Destination for telemetry events. `emit` must return quickly and must not
/// panic; the runtime calls it from scheduling and controller paths.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Discards everything.
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn emit(&self, _event: TelemetryEvent) {}
}

pub fn noop_sink() -> Arc<dyn TelemetrySink> {
    Arc::new(NoopSink)
}

/// In-memory sink for testing.
pub struct MemorySink {
    events: Mutex<Vec<TelemetryEvent>>,
    max_events: usize,
}

impl MemorySink {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            max_events,
        }
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Count of breaker transitions into the given state.
    pub fn transitions_into(&self, state: CircuitState) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, TelemetryEvent::BreakerTransition { to, .. } if *to == state))
            .count()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl TelemetrySink for MemorySink {
    fn emit(&self, event: TelemetryEvent) {
        let mut events = self.events.lock().unwrap();
        events.push(event);
        if events.len() > self.max_events {
            events.remove(0);
        }
    }
}

/// Logs events through `tracing` at operational levels.
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::StageCompleted {
                request_id,
                stage,
                duration,
                tier,
            } => {
                tracing::debug!(%request_id, %stage, ?duration, %tier, "stage completed");
            }
            TelemetryEvent::StageFailed {
                request_id,
                stage,
                reason,
            } => {
                tracing::warn!(%request_id, %stage, reason = %reason, "stage failed");
            }
            TelemetryEvent::BreakerTransition { from, to } => {
                tracing::warn!(?from, ?to, "circuit breaker transition");
            }
            TelemetryEvent::CycleCompleted {
                pending,
                admitted,
                tier,
            } => {
                tracing::debug!(pending, admitted, %tier, "scheduling cycle completed");
            }
            TelemetryEvent::SolverFellBack { reason } => {
                tracing::warn!(reason = %reason, "solver unavailable, using greedy admission");
            }
            TelemetryEvent::ForcedFallback { request_id, waited } => {
                tracing::warn!(%request_id, ?waited, "queue wait exceeded, forced fallback");
            }
        }
    }
}

static GLOBAL_SINK: once_cell::sync::Lazy<RwLock<Arc<dyn TelemetrySink>>> =
    once_cell::sync::Lazy::new(|| RwLock::new(Arc::new(NoopSink)));

/// Returns the globally configured telemetry sink.
pub fn global_sink() -> Arc<dyn TelemetrySink> {
    GLOBAL_SINK.read().unwrap().clone()
}

/// Sets the global telemetry sink used by runtimes built without an explicit one.
pub fn set_global_sink(sink: Arc<dyn TelemetrySink>) {
    *GLOBAL_SINK.write().unwrap() = sink;
}
