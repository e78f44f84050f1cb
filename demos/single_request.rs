//! Single Request Example
//!
//! Runs one prompt through the full three-stage pipeline with simulated
//! engine backends and prints the resulting document and metadata.
//!
//! Usage:
//!   cargo run --example single_request

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use vectorforge::resource::{ResourceSnapshot, StaticSnapshotProvider};
use vectorforge::stage::{ExecutorSet, FnExecutor, StageArtifact, StageExecutor};
use vectorforge::{GenerationRequest, GenerationRuntime, StageKind};

fn simulated_engine(kind: StageKind, latency: Duration) -> Arc<dyn StageExecutor> {
    Arc::new(FnExecutor::new(kind, move |input, params| async move {
        tokio::time::sleep(latency).await;
        let prior = input
            .prior
            .map(|a| a.svg.len().to_string())
            .unwrap_or_else(|| "none".into());
        Ok(StageArtifact::svg(format!(
            "<svg><!-- {kind} of {:?} at {}px, prior: {prior} --></svg>",
            input.prompt, params.resolution
        ))
        .with_detail_score(params.quality))
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vectorforge=debug".into()),
        )
        .init();

    println!("=== VectorForge Single Request Demo ===\n");

    // Pin the scheduler to a well-resourced host with an accelerator so all
    // three stages are admitted.
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
        .with_executors(ExecutorSet::new(
            simulated_engine(StageKind::Template, Duration::from_millis(40)),
            simulated_engine(StageKind::Detail, Duration::from_millis(120)),
            simulated_engine(StageKind::Optimize, Duration::from_millis(30)),
        )?)
        .with_snapshot_provider(Arc::new(StaticSnapshotProvider::new(snapshot)))
        .build()?;

    let result = runtime
        .submit(GenerationRequest::new("a lighthouse at dusk").with_style("flat"))
        .await?;

    println!("svg: {}", result.svg_content);
    println!("preview: {} bytes", result.raster_preview.len());
    println!(
        "tier: {:?}, stages: {:?}, degraded: {}",
        result.metadata.resource_tier_used,
        result.metadata.stages_run,
        result.metadata.degraded,
    );
    for (stage, duration) in &result.metadata.stage_durations {
        println!("  {stage}: {duration:?}");
    }
    Ok(())
}
