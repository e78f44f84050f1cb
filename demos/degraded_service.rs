//! Degraded Service Example
//!
//! Demonstrates fault isolation: the detail engine is down, so results
//! degrade to the template artifact until the circuit breaker opens, after
//! which requests bypass the pipeline entirely and get fallback artifacts.
//!
//! Usage:
//!   cargo run --example degraded_service

use std::sync::Arc;
use std::time::SystemTime;

use vectorforge::resource::{ResourceSnapshot, StaticSnapshotProvider};
use vectorforge::stage::{ExecutorSet, FnExecutor, StageArtifact, StageError, StageExecutor};
use vectorforge::telemetry::TracingSink;
use vectorforge::{GenerationRequest, GenerationRuntime, RuntimeConfig, StageKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vectorforge=debug".into()),
        )
        .init();

    println!("=== VectorForge Degraded Service Demo ===\n");

    let working = |kind: StageKind| -> Arc<dyn StageExecutor> {
        Arc::new(FnExecutor::new(kind, move |input, _| async move {
            Ok(StageArtifact::svg(format!(
                "<svg><!-- {kind}: {} --></svg>",
                input.prompt
            )))
        }))
    };
    let broken_detail: Arc<dyn StageExecutor> =
        Arc::new(FnExecutor::new(StageKind::Detail, |_, _| async {
            Err(StageError::execution(
                StageKind::Detail,
                "enhancement engine unreachable",
            ))
        }));

    let config = RuntimeConfig::from_yaml_str(
        r#"
breaker:
  failure_threshold: 3
  reset_timeout_ms: 5000
scheduler:
  cycle_interval_ms: 20
  queue_depth_trigger: 1
"#,
    )?;

    let snapshot = ResourceSnapshot {
        cpu_headroom_pct: 85.0,
        mem_headroom_pct: 80.0,
        swap_used_pct: 0.0,
        accel_available: true,
        accel_headroom_pct: 90.0,
        accel_mem_headroom_pct: 85.0,
        taken_at: SystemTime::now(),
    };

    let runtime = GenerationRuntime::builder()
        .with_config(config)
        .with_executors(ExecutorSet::new(
            working(StageKind::Template),
            broken_detail,
            working(StageKind::Optimize),
        )?)
        .with_snapshot_provider(Arc::new(StaticSnapshotProvider::new(snapshot)))
        .with_telemetry_sink(Arc::new(TracingSink))
        .build()?;

    for i in 1..=5 {
        let result = runtime
            .submit(GenerationRequest::new(format!("poster variant {i}")))
            .await?;
        let path = if result.metadata.fallback_used {
            "FALLBACK"
        } else if result.metadata.degraded {
            "DEGRADED"
        } else {
            "FULL"
        };
        println!(
            "request {i}: {path} (stages: {:?}, breaker: {:?})",
            result.metadata.stages_run,
            runtime.breaker_snapshot().state,
        );
    }

    println!("\nThe breaker opened after 3 failures; requests 4 and 5 never touched the detail engine.");
    Ok(())
}
