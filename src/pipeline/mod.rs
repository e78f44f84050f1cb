//! 流水线模块：单请求的阶段状态与控制器状态机。
//!
//! # Per-Request Pipeline Layer
//!
//! One [`PipelineState`] per request, exclusively owned by the
//! [`PipelineController`] driving it; intermediate artifacts hand off in
//! memory, never through shared state, so no locking is involved. The
//! controller is an explicit state machine: admission is gated by the
//! circuit breaker, stage skipping is driven by the cycle's
//! [`ScheduleDecision`](crate::scheduler::ScheduleDecision), and every
//! failure path ends in either a degraded artifact or the fallback
//! generator.

pub mod controller;
pub mod state;

pub use controller::PipelineController;
pub use state::{PipelineState, PipelineStatus};
