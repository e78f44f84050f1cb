use crate::resource::ResourceSamplingError;
use crate::scheduler::SolverError;
use crate::stage::StageError;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "scheduler.max_concurrent")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "pipeline_controller")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the pipeline runtime.
/// This aggregates all low-level errors into actionable, high-level categories.
///
/// Stage, solver and sampling errors are recovered locally by the components
/// that raise them (degraded artifact, greedy fallback, conservative tier) and
/// only surface here when a caller asks for them explicitly.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Stage execution error: {0}")]
    Stage(#[from] StageError),

    #[error("Scheduler solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("Resource sampling error: {0}")]
    Sampling(#[from] ResourceSamplingError),

    /// Expected control-flow signal: the circuit breaker refused admission.
    /// Routed to the fallback generator, never logged as an anomaly.
    #[error("circuit breaker open")]
    CircuitOpen,

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// True for errors that are part of normal degraded operation rather than
    /// caller-visible failures.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Stage(_) | Error::Solver(_) | Error::Sampling(_) | Error::CircuitOpen
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_builder() {
        let ctx = ErrorContext::new()
            .with_field_path("scheduler.max_concurrent")
            .with_details("must be > 0")
            .with_source("config_loader");
        assert_eq!(ctx.field_path.as_deref(), Some("scheduler.max_concurrent"));
        assert_eq!(ctx.details.as_deref(), Some("must be > 0"));
        assert_eq!(ctx.source.as_deref(), Some("config_loader"));
    }

    #[test]
    fn test_context_rendered_in_display() {
        let err = Error::configuration_with_context(
            "bad value",
            ErrorContext::new().with_field_path("breaker.failure_threshold"),
        );
        let rendered = err.to_string();
        assert!(rendered.contains("bad value"));
        assert!(rendered.contains("breaker.failure_threshold"));
    }

    #[test]
    fn test_circuit_open_is_recoverable() {
        assert!(Error::CircuitOpen.is_recoverable());
        let err = Error::runtime_with_context("boom", ErrorContext::new());
        assert!(!err.is_recoverable());
    }
}
