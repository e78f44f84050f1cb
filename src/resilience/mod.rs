//! 弹性模式模块：提供熔断器与可注入时钟等可靠性保障机制。
//!
//! # Resilience Primitives Module
//!
//! Fault isolation for the generation pipeline. A degraded or overloaded
//! generative engine must not keep consuming shared resources on doomed
//! attempts; the circuit breaker bounds that blast radius and caps
//! user-visible latency during outages at the fallback path's cost.
//!
//! ## Circuit Breaker
//!
//! - **Closed**: normal operation, every request attempts the full pipeline
//! - **Open**: requests bypass the pipeline and go straight to fallback
//! - **Half-Open**: exactly one trial request per probe window tests recovery
//!
//! ```rust
//! use vectorforge::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(5)
//!         .with_reset_timeout(Duration::from_secs(30)),
//! );
//!
//! if breaker.allow_request() {
//!     // attempt pipeline...
//!     breaker.record_success();
//! }
//! ```
//!
//! The breaker takes its time from a [`Clock`] so transition timing is
//! deterministic under test.

pub mod circuit_breaker;
pub mod clock;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use clock::{Clock, ManualClock, SystemClock};
