//! Host resource telemetry: snapshot sampling and tier classification.
//!
//! The scheduler never looks at raw host counters. Each cycle it takes one
//! [`ResourceSnapshot`] through a [`SnapshotProvider`], copies it into the
//! admission problem, and derives a discrete [`ResourceTier`] that drives
//! stage parameter selection. Snapshots are immutable and never shared across
//! cycles, so the solver always sees an internally consistent view.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResourceSnapshot`] | Normalized headroom readings, one per cycle |
//! | [`SnapshotProvider`] | Sampling seam (`sysinfo`-backed or static) |
//! | [`AcceleratorProbe`] | Optional accelerator telemetry seam |
//! | [`ResourceTier`] | Discrete operating regime (high/medium/low) |
//! | [`TierThresholds`] | Configurable per-tier floors |

pub mod classifier;
pub mod snapshot;

pub use classifier::{classify, ResourceTier, TierFloor, TierThresholds};
pub use snapshot::{
    AccelReading, AcceleratorProbe, ResourceSamplingError, ResourceSnapshot, SnapshotProvider,
    StaticSnapshotProvider, SystemSnapshotProvider,
};
