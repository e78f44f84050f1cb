//! # vectorforge
//!
//! 这是一个资源感知、具备故障隔离能力的多阶段矢量图生成流水线运行时。
//!
//! Resource-aware, fault-tolerant multi-stage pipeline runtime that turns a
//! text prompt into a vector image through three dependent stages — template
//! synthesis, detail enhancement, path/shape optimization — while sharing
//! finite CPU, memory and accelerator capacity across many concurrent
//! requests.
//!
//! ## Core Philosophy
//!
//! - **Always answer**: stage failures degrade to earlier artifacts or the
//!   deterministic fallback; callers never see a hard failure.
//! - **Telemetry-driven**: live resource snapshots pick stage parameters and
//!   bound admission every cycle.
//! - **Isolated faults**: a circuit breaker keeps a failing generative
//!   engine from consuming shared capacity on doomed attempts.
//! - **Optimizer-optional**: an external constrained-optimization solver can
//!   plug in; the built-in greedy admission never goes away.
//!
//! ## Quick Start
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
//!
//!     let runtime = GenerationRuntime::builder()
//!         .with_executors(ExecutorSet::new(
//!             engine(StageKind::Template),
//!             engine(StageKind::Detail),
//!             engine(StageKind::Optimize),
//!         )?)
//!         .build()?;
//!
//!     let result = runtime.submit(GenerationRequest::new("a lighthouse at dusk")).await?;
//!     println!("{} ({} stages)", result.svg_content.len(), result.metadata.stages_run.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resource`] | Host snapshot sampling and tier classification |
//! | [`profile`] | Stage configuration matrix (tier → parameters, weights, costs) |
//! | [`resilience`] | Circuit breaker and injectable clock |
//! | [`stage`] | Stage executor seam over the generative engines |
//! | [`pipeline`] | Per-request state and controller state machine |
//! | [`scheduler`] | Multi-request constrained admission with greedy fallback |
//! | [`fallback`] | Deterministic always-available artifact source |
//! | [`runtime`] | Queue, scheduling cycle and async dispatch |
//! | [`cache`] | Result cache collaborator |
//! | [`telemetry`] | Fire-and-forget operational signals |
//! | [`config`] | YAML/JSON/env configuration surface |

pub mod cache;
pub mod config;
pub mod fallback;
pub mod pipeline;
pub mod profile;
pub mod resilience;
pub mod resource;
pub mod runtime;
pub mod scheduler;
pub mod stage;
pub mod telemetry;
pub mod types;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

// Re-export main types for convenience
pub use config::RuntimeConfig;
pub use profile::{StageKind, StageSet};
pub use resource::{ResourceSnapshot, ResourceTier};
pub use runtime::{GenerationRuntime, GenerationRuntimeBuilder};
pub use types::{GenerationRequest, GenerationResult, ResultMetadata};
