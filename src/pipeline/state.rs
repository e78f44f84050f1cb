use std::collections::HashMap;
use std::time::Duration;

use uuid::Uuid;

use crate::profile::{StageKind, StageSet};
use crate::resource::ResourceTier;
use crate::stage::StageArtifact;
use crate::{Error, ErrorContext};

/// Lifecycle of one request's pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Pending,
    Running,
    Done,
    /// Finished through the fallback generator.
    FellBack,
}

/// Per-request record carrying intermediate artifacts and metrics between
/// stages. Exclusively owned by the controller handling the request; created
/// on admission, discarded after result delivery.
#[derive(Debug)]
pub struct PipelineState {
    pub request_id: Uuid,
    pub prompt: String,
    pub style: Option<String>,
    template: Option<StageArtifact>,
    enhanced: Option<StageArtifact>,
    optimized: Option<StageArtifact>,
    pub stage_durations: HashMap<StageKind, Duration>,
    pub tier_used: Option<ResourceTier>,
    /// Stages that completed, in execution order.
    pub stages_run: Vec<StageKind>,
    pub status: PipelineStatus,
    pub degraded: bool,
}

impl PipelineState {
    pub fn new(request_id: Uuid, prompt: impl Into<String>, style: Option<String>) -> Self {
        Self {
            request_id,
            prompt: prompt.into(),
            style,
            template: None,
            enhanced: None,
            optimized: None,
            stage_durations: HashMap::new(),
            tier_used: None,
            stages_run: Vec::new(),
            status: PipelineStatus::Pending,
            degraded: false,
        }
    }

    pub fn artifact(&self, kind: StageKind) -> Option<&StageArtifact> {
        match kind {
            StageKind::Template => self.template.as_ref(),
            StageKind::Detail => self.enhanced.as_ref(),
            StageKind::Optimize => self.optimized.as_ref(),
        }
    }

    pub fn completed(&self, kind: StageKind) -> bool {
        self.artifact(kind).is_some()
    }

    pub fn completed_stages(&self) -> StageSet {
        StageKind::ALL
            .into_iter()
            .filter(|k| self.completed(*k))
            .collect()
    }

    /// Record a stage's output and bookkeeping in one step.
    ///
    /// An optimized artifact is only accepted over an existing less refined
    /// one; accepting it bare would let a result claim refinement of work
    /// that never happened.
    pub fn record_output(
        &mut self,
        kind: StageKind,
        artifact: StageArtifact,
        duration: Duration,
    ) -> crate::Result<()> {
        if kind == StageKind::Optimize && self.template.is_none() && self.enhanced.is_none() {
            return Err(Error::runtime_with_context(
                "optimized output without a prior artifact",
                ErrorContext::new()
                    .with_source("pipeline_state")
                    .with_details(format!("request {}", self.request_id)),
            ));
        }
        match kind {
            StageKind::Template => self.template = Some(artifact),
            StageKind::Detail => self.enhanced = Some(artifact),
            StageKind::Optimize => self.optimized = Some(artifact),
        }
        self.stage_durations.insert(kind, duration);
        self.stages_run.push(kind);
        Ok(())
    }

    /// The most refined completed artifact, if any.
    pub fn best_artifact(&self) -> Option<&StageArtifact> {
        self.optimized
            .as_ref()
            .or(self.enhanced.as_ref())
            .or(self.template.as_ref())
    }

    /// First incomplete stage in dependency order.
    pub fn next_stage(&self) -> Option<StageKind> {
        StageKind::ALL.into_iter().find(|k| !self.completed(*k))
    }
}
