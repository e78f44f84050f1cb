//! Stage executor seam.
//!
//! The generative engines behind each stage are untrusted, possibly slow,
//! possibly failing black boxes. The controller only depends on the
//! [`StageExecutor`] contract and its timeout/error semantics, never on
//! engine or process-management details. Executors are side-effect-free with
//! respect to orchestration state: they receive a [`StageInput`] and return
//! a [`StageArtifact`], and never touch pipeline bookkeeping.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::profile::{StageKind, StageParameters};
use crate::{Error as CrateError, ErrorContext};

/// Failure of a single stage execution. Triggers circuit-breaker accounting
/// and a possible degraded early return; never propagates to the caller as a
/// hard failure.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error("{stage} execution failed: {reason}")]
    Execution { stage: StageKind, reason: String },

    /// Timeouts are accounted identically to execution failures.
    #[error("{stage} timed out after {elapsed:?}")]
    Timeout { stage: StageKind, elapsed: Duration },

    #[error("{stage} backend rejected input: {reason}")]
    Backend { stage: StageKind, reason: String },
}

impl StageError {
    pub fn execution(stage: StageKind, reason: impl Into<String>) -> Self {
        StageError::Execution {
            stage,
            reason: reason.into(),
        }
    }

    pub fn stage(&self) -> StageKind {
        match self {
            StageError::Execution { stage, .. }
            | StageError::Timeout { stage, .. }
            | StageError::Backend { stage, .. } => *stage,
        }
    }
}

/// What a stage consumes: the request text plus the most refined artifact
/// produced so far (`None` for template synthesis).
#[derive(Debug, Clone)]
pub struct StageInput {
    pub prompt: String,
    pub style: Option<String>,
    pub prior: Option<StageArtifact>,
}

/// What a stage produces.
#[derive(Debug, Clone, PartialEq)]
pub struct StageArtifact {
    /// Vector document produced or refined by the stage.
    pub svg: String,
    /// Optional raster preview supplied by the engine.
    pub preview: Option<Bytes>,
    /// Engine's own estimate of achieved detail (0..1), informational only.
    pub detail_score: f64,
}

impl StageArtifact {
    pub fn svg(svg: impl Into<String>) -> Self {
        Self {
            svg: svg.into(),
            preview: None,
            detail_score: 0.0,
        }
    }

    pub fn with_preview(mut self, preview: Bytes) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn with_detail_score(mut self, score: f64) -> Self {
        self.detail_score = score.clamp(0.0, 1.0);
        self
    }
}

/// One pipeline stage backed by some engine.
///
/// The hard timeout from [`StageParameters::timeout`] is enforced by the
/// controller around this call; implementations need not race their own
/// timers.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn execute(
        &self,
        input: StageInput,
        params: &StageParameters,
    ) -> Result<StageArtifact, StageError>;
}

type ExecuteFn = dyn Fn(StageInput, StageParameters) -> BoxFuture<'static, Result<StageArtifact, StageError>>
    + Send
    + Sync;

/// Adapter turning an async closure into a [`StageExecutor`]. The unit and
/// integration tests use this to simulate engine backends; applications can
/// use it to wire in-process engines without a dedicated type.
pub struct FnExecutor {
    kind: StageKind,
    f: Box<ExecuteFn>,
}

impl FnExecutor {
    pub fn new<F, Fut>(kind: StageKind, f: F) -> Self
    where
        F: Fn(StageInput, StageParameters) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<StageArtifact, StageError>> + Send + 'static,
    {
        Self {
            kind,
            f: Box::new(
                move |input, params| -> BoxFuture<'static, Result<StageArtifact, StageError>> {
                    Box::pin(f(input, params))
                },
            ),
        }
    }
}

#[async_trait]
impl StageExecutor for FnExecutor {
    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn execute(
        &self,
        input: StageInput,
        params: &StageParameters,
    ) -> Result<StageArtifact, StageError> {
        (self.f)(input, params.clone()).await
    }
}

/// The full executor complement, one per stage.
pub struct ExecutorSet {
    template: std::sync::Arc<dyn StageExecutor>,
    detail: std::sync::Arc<dyn StageExecutor>,
    optimize: std::sync::Arc<dyn StageExecutor>,
}

impl ExecutorSet {
    pub fn new(
        template: std::sync::Arc<dyn StageExecutor>,
        detail: std::sync::Arc<dyn StageExecutor>,
        optimize: std::sync::Arc<dyn StageExecutor>,
    ) -> crate::Result<Self> {
        for (executor, expected) in [
            (&template, StageKind::Template),
            (&detail, StageKind::Detail),
            (&optimize, StageKind::Optimize),
        ] {
            if executor.kind() != expected {
                return Err(CrateError::configuration_with_context(
                    "executor registered under the wrong stage",
                    ErrorContext::new()
                        .with_field_path(format!("executors.{expected}"))
                        .with_details(format!("executor reports kind {}", executor.kind())),
                ));
            }
        }
        Ok(Self {
            template,
            detail,
            optimize,
        })
    }

    pub fn get(&self, kind: StageKind) -> &std::sync::Arc<dyn StageExecutor> {
        match kind {
            StageKind::Template => &self.template,
            StageKind::Detail => &self.detail,
            StageKind::Optimize => &self.optimize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn echo_executor(kind: StageKind) -> Arc<dyn StageExecutor> {
        Arc::new(FnExecutor::new(kind, move |input, _params| async move {
            Ok(StageArtifact::svg(format!(
                "<svg><!-- {kind}: {} --></svg>",
                input.prompt
            )))
        }))
    }

    fn params() -> StageParameters {
        StageParameters {
            iterations: 10,
            resolution: 256,
            quality: 0.5,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_fn_executor_runs_closure() {
        let exec = echo_executor(StageKind::Template);
        let artifact = tokio_test::block_on(exec.execute(
            StageInput {
                prompt: "a fox".into(),
                style: None,
                prior: None,
            },
            &params(),
        ))
        .unwrap();
        assert!(artifact.svg.contains("a fox"));
        assert!(artifact.preview.is_none());
    }

    #[tokio::test]
    async fn test_executor_set_rejects_mismatched_kinds() {
        let result = ExecutorSet::new(
            echo_executor(StageKind::Detail),
            echo_executor(StageKind::Detail),
            echo_executor(StageKind::Optimize),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_stage_error_carries_stage() {
        let err = StageError::Timeout {
            stage: StageKind::Detail,
            elapsed: Duration::from_secs(30),
        };
        assert_eq!(err.stage(), StageKind::Detail);
        assert!(err.to_string().contains("detail"));
    }

    #[test]
    fn test_detail_score_clamped() {
        let artifact = StageArtifact::svg("<svg/>").with_detail_score(1.5);
        assert_eq!(artifact.detail_score, 1.0);
    }
}
