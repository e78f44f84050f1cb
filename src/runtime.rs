//! 运行时编排：请求队列、调度循环与按请求的异步派发。
//!
//! # Generation Runtime
//!
//! One [`GenerationRuntime`] owns the request queue, the single scheduling
//! cycle, and the shared handles (circuit breaker, executors, fallback,
//! telemetry, optional cache and solver). Each admitted request runs on its
//! own tokio task; the cycle only decides *what* runs, never waits on
//! execution. The breaker and the in-flight counter are the only mutable
//! state shared across requests, each behind single-writer discipline.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vectorforge::stage::{ExecutorSet, FnExecutor, StageArtifact, StageExecutor};
//! use vectorforge::{GenerationRequest, GenerationRuntime, StageKind};
//!
//! #[tokio::main]
//! async fn main() -> vectorforge::Result<()> {
//!     let engine = |kind: StageKind| -> Arc<dyn StageExecutor> {
//!         Arc::new(FnExecutor::new(kind, move |input, _params| async move {
//!             Ok(StageArtifact::svg(format!("<svg><!-- {kind}: {} --></svg>", input.prompt)))
//!         }))
//!     };
//!     let runtime = GenerationRuntime::builder()
//!         .with_executors(ExecutorSet::new(
//!             engine(StageKind::Template),
//!             engine(StageKind::Detail),
//!             engine(StageKind::Optimize),
//!         )?)
//!         .build()?;
//!     let result = runtime.submit(GenerationRequest::new("a lighthouse at dusk")).await?;
//!     println!("{}", result.svg_content);
//!     Ok(())
//! }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{oneshot, Notify};
use uuid::Uuid;

use crate::cache::{cache_key, LruResultCache, ResultCache};
use crate::config::RuntimeConfig;
use crate::fallback::FallbackGenerator;
use crate::pipeline::controller::{fallback_result, PipelineController};
use crate::profile::StageMatrix;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, Clock};
use crate::resource::{classify, ResourceSnapshot, SnapshotProvider, SystemSnapshotProvider};
use crate::scheduler::{AdmissionCandidate, AdmissionSolver, Scheduler};
use crate::stage::ExecutorSet;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::types::{GenerationRequest, GenerationResult};
use crate::{Error, ErrorContext, Result};

struct QueuedRequest {
    id: Uuid,
    request: GenerationRequest,
    queued_at: Instant,
    reply: oneshot::Sender<GenerationResult>,
}

struct Shared {
    config: RuntimeConfig,
    matrix: StageMatrix,
    breaker: Arc<CircuitBreaker>,
    executors: Arc<ExecutorSet>,
    provider: Arc<dyn SnapshotProvider>,
    scheduler: Scheduler,
    fallback: Arc<FallbackGenerator>,
    cache: Option<Arc<dyn ResultCache>>,
    sink: Arc<dyn TelemetrySink>,
    queue: Mutex<VecDeque<QueuedRequest>>,
    inflight: AtomicUsize,
    notify: Notify,
}

impl Shared {
    async fn run_cycle(self: &Arc<Self>) {
        self.expire_overdue();

        let snapshot = match self.provider.sample() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                // Non-fatal: degrade to the conservative reading.
                tracing::warn!(%err, "resource sampling failed, assuming exhausted host");
                ResourceSnapshot::exhausted()
            }
        };
        let tier = classify(&snapshot, &self.config.thresholds);

        let slots = self
            .config
            .scheduler
            .max_concurrent
            .saturating_sub(self.inflight.load(Ordering::SeqCst));
        let (candidates, pending) = self.gather_candidates(slots);
        if candidates.is_empty() {
            self.sink.emit(TelemetryEvent::CycleCompleted {
                pending,
                admitted: 0,
                tier,
            });
            return;
        }

        let decisions = self.scheduler.plan(candidates, &snapshot, &self.matrix);
        let profile = self.matrix.configure(tier);
        let admitted = decisions.len();

        for decision in decisions {
            let Some(queued) = self.take_queued(decision.request_id) else {
                continue;
            };
            self.inflight.fetch_add(1, Ordering::SeqCst);
            let shared = Arc::clone(self);
            let profile = profile.clone();
            tokio::spawn(async move {
                let controller = PipelineController::new(
                    queued.id,
                    &queued.request,
                    shared.breaker.clone(),
                    shared.executors.clone(),
                    shared.fallback.clone(),
                    shared.sink.clone(),
                );
                let result = controller.run(&decision, &profile, tier).await;
                if let Some(cache) = &shared.cache {
                    // Only full-fidelity results are worth pinning to a prompt.
                    if !result.metadata.fallback_used && !result.metadata.degraded {
                        cache.put(
                            cache_key(&queued.request.prompt, queued.request.style.as_deref()),
                            result.clone(),
                        );
                    }
                }
                let _ = queued.reply.send(result);
                shared.inflight.fetch_sub(1, Ordering::SeqCst);
            });
        }

        self.sink.emit(TelemetryEvent::CycleCompleted {
            pending,
            admitted,
            tier,
        });
    }

    /// Force-route requests past the queue deadline to the fallback
    /// generator, bounding tail latency.
    fn expire_overdue(self: &Arc<Self>) {
        let deadline = self.config.scheduler.max_queue_wait();
        let now = Instant::now();
        let expired: Vec<QueuedRequest> = {
            let Ok(mut queue) = self.queue.lock() else {
                return;
            };
            let mut keep = VecDeque::with_capacity(queue.len());
            let mut expired = Vec::new();
            while let Some(entry) = queue.pop_front() {
                if now.duration_since(entry.queued_at) >= deadline {
                    expired.push(entry);
                } else {
                    keep.push_back(entry);
                }
            }
            *queue = keep;
            expired
        };
        for entry in expired {
            self.sink.emit(TelemetryEvent::ForcedFallback {
                request_id: entry.id,
                waited: now.duration_since(entry.queued_at),
            });
            let result = fallback_result(
                entry.id,
                &entry.request.prompt,
                entry.request.style.as_deref(),
                &self.fallback,
                false,
                None,
            );
            let _ = entry.reply.send(result);
        }
    }

    /// Snapshot the queue into admission candidates: priority first, FIFO
    /// within a priority, at most `slots` of them. Returns the candidates
    /// and the total pending count.
    fn gather_candidates(&self, slots: usize) -> (Vec<AdmissionCandidate>, usize) {
        let Ok(queue) = self.queue.lock() else {
            return (Vec::new(), 0);
        };
        let pending = queue.len();
        if slots == 0 {
            return (Vec::new(), pending);
        }
        let mut ordered: Vec<(i32, usize, Uuid)> = queue
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.request.priority.unwrap_or(0), pos, entry.id))
            .collect();
        ordered.sort_by_key(|(priority, pos, _)| (std::cmp::Reverse(*priority), *pos));
        let candidates = ordered
            .into_iter()
            .take(slots)
            .map(|(_, _, id)| AdmissionCandidate::fresh(id))
            .collect();
        (candidates, pending)
    }

    fn take_queued(&self, id: Uuid) -> Option<QueuedRequest> {
        let mut queue = self.queue.lock().ok()?;
        let pos = queue.iter().position(|entry| entry.id == id)?;
        queue.remove(pos)
    }
}

/// Builder for [`GenerationRuntime`]. Executors are the one required piece;
/// everything else has a production default.
pub struct GenerationRuntimeBuilder {
    config: RuntimeConfig,
    executors: Option<ExecutorSet>,
    matrix: Option<StageMatrix>,
    provider: Option<Arc<dyn SnapshotProvider>>,
    solver: Option<Arc<dyn AdmissionSolver>>,
    cache: Option<Arc<dyn ResultCache>>,
    sink: Option<Arc<dyn TelemetrySink>>,
    clock: Option<Arc<dyn Clock>>,
}

impl GenerationRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            executors: None,
            matrix: None,
            provider: None,
            solver: None,
            cache: None,
            sink: None,
            clock: None,
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_executors(mut self, executors: ExecutorSet) -> Self {
        self.executors = Some(executors);
        self
    }

    /// Override the stage matrix (per-tier parameter tables, costs and
    /// weights). Takes precedence over `quality_weights` in the config.
    pub fn with_stage_matrix(mut self, matrix: StageMatrix) -> Self {
        self.matrix = Some(matrix);
        self
    }

    pub fn with_snapshot_provider(mut self, provider: Arc<dyn SnapshotProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_solver(mut self, solver: Arc<dyn AdmissionSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_telemetry_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the runtime and start its scheduling cycle. Must be called
    /// inside a tokio runtime.
    pub fn build(self) -> Result<GenerationRuntime> {
        self.config.validate()?;
        let executors = self.executors.ok_or_else(|| {
            Error::configuration_with_context(
                "stage executors are required",
                ErrorContext::new()
                    .with_field_path("executors")
                    .with_source("runtime_builder"),
            )
        })?;
        let sink = self.sink.unwrap_or_else(crate::telemetry::global_sink);
        let breaker_config = CircuitBreakerConfig::new()
            .with_failure_threshold(self.config.breaker.failure_threshold)
            .with_reset_timeout(self.config.breaker.reset_timeout())
            .with_probe_interval(self.config.breaker.probe_interval());
        let breaker = match self.clock {
            Some(clock) => CircuitBreaker::with_clock(breaker_config, clock),
            None => CircuitBreaker::new(breaker_config),
        }
        .with_sink(sink.clone());

        let mut scheduler = Scheduler::new().with_sink(sink.clone());
        if let Some(solver) = self.solver {
            scheduler = scheduler.with_solver(solver);
        }

        let cache = self.cache.or_else(|| {
            (self.config.cache_capacity > 0).then(|| {
                Arc::new(LruResultCache::new(self.config.cache_capacity)) as Arc<dyn ResultCache>
            })
        });

        let matrix = match self.matrix {
            Some(matrix) => matrix,
            None => StageMatrix::with_weights(self.config.quality_weights)?,
        };
        let shared = Arc::new(Shared {
            config: self.config,
            matrix,
            breaker: Arc::new(breaker),
            executors: Arc::new(executors),
            provider: self
                .provider
                .unwrap_or_else(|| Arc::new(SystemSnapshotProvider::new())),
            scheduler,
            fallback: Arc::new(FallbackGenerator::new()),
            cache,
            sink,
            queue: Mutex::new(VecDeque::new()),
            inflight: AtomicUsize::new(0),
            notify: Notify::new(),
        });

        let cycle = tokio::spawn(run_loop(Arc::clone(&shared)));
        Ok(GenerationRuntime { shared, cycle })
    }
}

impl Default for GenerationRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_loop(shared: Arc<Shared>) {
    let interval = shared.config.scheduler.cycle_interval();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shared.notify.notified() => {}
        }
        shared.run_cycle().await;
    }
}

/// The pipeline service: accepts requests, schedules them against live
/// resource telemetry, and always answers with an artifact.
pub struct GenerationRuntime {
    shared: Arc<Shared>,
    cycle: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for GenerationRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationRuntime").finish_non_exhaustive()
    }
}

impl GenerationRuntime {
    pub fn builder() -> GenerationRuntimeBuilder {
        GenerationRuntimeBuilder::new()
    }

    /// Submit one request and await its artifact.
    ///
    /// Checks the result cache first; a hit bypasses the pipeline entirely.
    pub async fn submit(&self, request: GenerationRequest) -> Result<GenerationResult> {
        let key = cache_key(&request.prompt, request.style.as_deref());
        if let Some(cache) = &self.shared.cache {
            if let Some(hit) = cache.get(&key) {
                tracing::debug!(prompt = %request.prompt, "result cache hit");
                return Ok(hit);
            }
        }

        let (reply, receiver) = oneshot::channel();
        let depth = {
            let mut queue = self.shared.queue.lock().map_err(|_| {
                Error::runtime_with_context(
                    "request queue poisoned",
                    ErrorContext::new().with_source("runtime"),
                )
            })?;
            queue.push_back(QueuedRequest {
                id: Uuid::new_v4(),
                request,
                queued_at: Instant::now(),
                reply,
            });
            queue.len()
        };
        if depth >= self.shared.config.scheduler.queue_depth_trigger {
            self.shared.notify.notify_one();
        }

        receiver.await.map_err(|_| {
            Error::runtime_with_context(
                "runtime shut down before the request completed",
                ErrorContext::new().with_source("runtime"),
            )
        })
    }

    /// Current circuit breaker view, for dashboards and tests.
    pub fn breaker_snapshot(&self) -> CircuitBreakerSnapshot {
        self.shared.breaker.snapshot()
    }

    pub fn queue_depth(&self) -> usize {
        self.shared
            .queue
            .lock()
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    /// Stop the scheduling cycle. Queued requests resolve with an error on
    /// their `submit` future.
    pub fn shutdown(self) {
        self.cycle.abort();
    }
}

impl Drop for GenerationRuntime {
    fn drop(&mut self) {
        self.cycle.abort();
    }
}
