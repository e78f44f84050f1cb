//! Public request/response types.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::profile::StageKind;
use crate::resource::ResourceTier;

/// One generation request as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Higher values are considered for admission first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            style: None,
            priority: None,
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Execution record attached to every result.
#[derive(Debug, Clone)]
pub struct ResultMetadata {
    pub request_id: Uuid,
    /// Tier in effect when the pipeline ran; `None` when the request never
    /// entered the pipeline (circuit open, forced fallback).
    pub resource_tier_used: Option<ResourceTier>,
    /// Stages that completed, in execution order.
    pub stages_run: Vec<StageKind>,
    pub stage_durations: HashMap<StageKind, Duration>,
    /// True when a later stage failed and the result is an earlier stage's
    /// artifact. The intended fallback paths (circuit open, queue deadline)
    /// are not degradations and leave this false.
    pub degraded: bool,
    /// True when the artifact came from the fallback generator.
    pub fallback_used: bool,
    pub timestamp: SystemTime,
}

/// The artifact returned to the caller. The system always returns one; the
/// only caller-visible failure mode is unavailability of the fallback
/// generator itself.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub svg_content: String,
    pub raster_preview: Bytes,
    pub metadata: ResultMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = GenerationRequest::new("a fox")
            .with_style("flat")
            .with_priority(2);
        assert_eq!(req.prompt, "a fox");
        assert_eq!(req.style.as_deref(), Some("flat"));
        assert_eq!(req.priority, Some(2));
    }

    #[test]
    fn test_request_roundtrips_as_json() {
        let req = GenerationRequest::new("a fox").with_style("flat");
        let json = serde_json::to_string(&req).unwrap();
        let back: GenerationRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.prompt, req.prompt);
        assert_eq!(back.style, req.style);
        assert_eq!(back.priority, None);
    }

    #[test]
    fn test_bare_prompt_deserializes() {
        let req: GenerationRequest = serde_json::from_str(r#"{"prompt":"hi"}"#).unwrap();
        assert_eq!(req.prompt, "hi");
        assert!(req.style.is_none());
    }
}
