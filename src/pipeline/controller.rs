use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tokio::time::timeout;
use uuid::Uuid;

use crate::fallback::{self, FallbackGenerator};
use crate::profile::{StageKind, StageProfile};
use crate::resilience::CircuitBreaker;
use crate::resource::ResourceTier;
use crate::scheduler::ScheduleDecision;
use crate::stage::{ExecutorSet, StageError, StageInput};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::types::{GenerationRequest, GenerationResult, ResultMetadata};

use super::state::{PipelineState, PipelineStatus};

/// Positions of the per-request state machine. Failure routes to `Fallback`
/// from any position; `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Run(StageKind),
    Fallback { failure_driven: bool },
    Done,
}

/// Drives one request through its stage sequence: consults the circuit
/// breaker, honors the cycle's [`ScheduleDecision`], invokes executors with
/// hard timeouts, and degrades or falls back on failure. Consumes exactly
/// one decision; the request is finished when `run` returns.
pub struct PipelineController {
    state: PipelineState,
    breaker: Arc<CircuitBreaker>,
    executors: Arc<ExecutorSet>,
    fallback: Arc<FallbackGenerator>,
    sink: Arc<dyn TelemetrySink>,
}

impl PipelineController {
    pub fn new(
        request_id: Uuid,
        request: &GenerationRequest,
        breaker: Arc<CircuitBreaker>,
        executors: Arc<ExecutorSet>,
        fallback: Arc<FallbackGenerator>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            state: PipelineState::new(request_id, request.prompt.clone(), request.style.clone()),
            breaker,
            executors,
            fallback,
            sink,
        }
    }

    /// Execute the stages admitted by `decision` and return an artifact.
    ///
    /// Always returns a result: full pipeline output, a degraded
    /// earlier-stage artifact, or the fallback composition.
    pub async fn run(
        mut self,
        decision: &ScheduleDecision,
        profile: &StageProfile,
        tier: ResourceTier,
    ) -> GenerationResult {
        let mut phase = Phase::Init;
        loop {
            phase = match phase {
                Phase::Init => {
                    if self.breaker.allow_request() {
                        self.state.status = PipelineStatus::Running;
                        self.state.tier_used = Some(tier);
                        Phase::Run(StageKind::Template)
                    } else {
                        tracing::debug!(request_id = %self.state.request_id, "circuit open, bypassing pipeline");
                        Phase::Fallback {
                            failure_driven: false,
                        }
                    }
                }
                Phase::Run(kind) => {
                    if self.state.completed(kind) {
                        Self::after(kind)
                    } else if !decision.stages_to_run.contains(kind) {
                        // Resource-driven early exit, distinct from failure.
                        if self.state.best_artifact().is_some() {
                            Phase::Done
                        } else {
                            Phase::Fallback {
                                failure_driven: false,
                            }
                        }
                    } else {
                        match self.execute_stage(kind, profile, tier).await {
                            Ok(()) => Self::after(kind),
                            Err(err) => {
                                self.breaker.record_failure();
                                self.sink.emit(TelemetryEvent::StageFailed {
                                    request_id: self.state.request_id,
                                    stage: kind,
                                    reason: err.to_string(),
                                });
                                if self.state.best_artifact().is_some() {
                                    self.state.degraded = true;
                                    Phase::Done
                                } else {
                                    Phase::Fallback {
                                        failure_driven: true,
                                    }
                                }
                            }
                        }
                    }
                }
                Phase::Fallback { failure_driven } => {
                    return self.finish_fallback(failure_driven);
                }
                Phase::Done => {
                    return self.finish_done();
                }
            };
        }
    }

    fn after(kind: StageKind) -> Phase {
        match kind {
            StageKind::Template => Phase::Run(StageKind::Detail),
            StageKind::Detail => Phase::Run(StageKind::Optimize),
            StageKind::Optimize => Phase::Done,
        }
    }

    async fn execute_stage(
        &mut self,
        kind: StageKind,
        profile: &StageProfile,
        tier: ResourceTier,
    ) -> Result<(), StageError> {
        let params = profile.get(kind);
        let input = StageInput {
            prompt: self.state.prompt.clone(),
            style: self.state.style.clone(),
            prior: self.state.best_artifact().cloned(),
        };
        let executor = self.executors.get(kind).clone();
        let started = Instant::now();
        let outcome = timeout(params.timeout, executor.execute(input, params)).await;
        let elapsed = started.elapsed();
        let artifact = match outcome {
            Err(_) => {
                return Err(StageError::Timeout {
                    stage: kind,
                    elapsed,
                })
            }
            Ok(Err(err)) => return Err(err),
            Ok(Ok(artifact)) => artifact,
        };
        self.state
            .record_output(kind, artifact, elapsed)
            .map_err(|err| StageError::execution(kind, err.to_string()))?;
        self.sink.emit(TelemetryEvent::StageCompleted {
            request_id: self.state.request_id,
            stage: kind,
            duration: elapsed,
            tier,
        });
        Ok(())
    }

    fn finish_done(mut self) -> GenerationResult {
        // Done is only reached with an artifact in hand; route through the
        // fallback otherwise rather than trust the phase logic forever.
        let Some(artifact) = self.state.best_artifact().cloned() else {
            return self.finish_fallback(true);
        };
        self.state.status = PipelineStatus::Done;
        if !self.state.degraded && !self.state.stages_run.is_empty() {
            // The final scheduled stage succeeded.
            self.breaker.record_success();
        }
        let raster_preview = artifact
            .preview
            .clone()
            .unwrap_or_else(|| fallback::render_preview(&artifact.svg));
        GenerationResult {
            svg_content: artifact.svg,
            raster_preview,
            metadata: ResultMetadata {
                request_id: self.state.request_id,
                resource_tier_used: self.state.tier_used,
                stages_run: self.state.stages_run.clone(),
                stage_durations: self.state.stage_durations.clone(),
                degraded: self.state.degraded,
                fallback_used: false,
                timestamp: SystemTime::now(),
            },
        }
    }

    fn finish_fallback(mut self, failure_driven: bool) -> GenerationResult {
        self.state.status = PipelineStatus::FellBack;
        fallback_result(
            self.state.request_id,
            &self.state.prompt,
            self.state.style.as_deref(),
            &self.fallback,
            failure_driven,
            self.state.tier_used,
        )
    }
}

/// Build a fallback result outside a controller (forced queue-timeout path
/// and the controller's own terminal fallback share this).
pub(crate) fn fallback_result(
    request_id: Uuid,
    prompt: &str,
    style: Option<&str>,
    generator: &FallbackGenerator,
    degraded: bool,
    tier_used: Option<ResourceTier>,
) -> GenerationResult {
    let artifact = generator.generate(prompt, style);
    let raster_preview = artifact
        .preview
        .clone()
        .unwrap_or_else(|| fallback::render_preview(&artifact.svg));
    GenerationResult {
        svg_content: artifact.svg,
        raster_preview,
        metadata: ResultMetadata {
            request_id,
            resource_tier_used: tier_used,
            stages_run: Vec::new(),
            stage_durations: Default::default(),
            degraded,
            fallback_used: true,
            timestamp: SystemTime::now(),
        },
    }
}
