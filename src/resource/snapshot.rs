use std::sync::Mutex;
use std::time::SystemTime;

use sysinfo::System;
use thiserror::Error;

/// Sampling failed outright. Non-fatal: the scheduler substitutes
/// [`ResourceSnapshot::exhausted`], which classifies to the lowest tier.
#[derive(Debug, Clone, Error)]
#[error("resource sampling failed: {reason}")]
pub struct ResourceSamplingError {
    pub reason: String,
}

impl ResourceSamplingError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// One normalized reading of host headroom. Created fresh each scheduling
/// cycle, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot {
    /// Idle CPU as a percentage of total capacity (0..100).
    pub cpu_headroom_pct: f64,
    /// Available system memory as a percentage of total (0..100).
    pub mem_headroom_pct: f64,
    /// Swap in use as a percentage of total swap (0 when no swap configured).
    pub swap_used_pct: f64,
    /// Whether an accelerator was detected at all. Missing hardware is a
    /// normal reading, not an error.
    pub accel_available: bool,
    /// Idle accelerator compute (0..100); 0 when unavailable.
    pub accel_headroom_pct: f64,
    /// Free accelerator memory (0..100); 0 when unavailable.
    pub accel_mem_headroom_pct: f64,
    pub taken_at: SystemTime,
}

impl ResourceSnapshot {
    /// A snapshot with zero headroom everywhere. Used as the conservative
    /// stand-in when sampling fails; classifies to the lowest tier and admits
    /// nothing with nonzero cost.
    pub fn exhausted() -> Self {
        Self {
            cpu_headroom_pct: 0.0,
            mem_headroom_pct: 0.0,
            swap_used_pct: 100.0,
            accel_available: false,
            accel_headroom_pct: 0.0,
            accel_mem_headroom_pct: 0.0,
            taken_at: SystemTime::now(),
        }
    }

    /// A fully idle host without an accelerator.
    pub fn idle_cpu_only() -> Self {
        Self {
            cpu_headroom_pct: 100.0,
            mem_headroom_pct: 100.0,
            swap_used_pct: 0.0,
            accel_available: false,
            accel_headroom_pct: 0.0,
            accel_mem_headroom_pct: 0.0,
            taken_at: SystemTime::now(),
        }
    }
}

/// Latest accelerator telemetry, as reported by a [`AcceleratorProbe`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelReading {
    pub compute_headroom_pct: f64,
    pub mem_headroom_pct: f64,
}

/// Seam for accelerator telemetry (NVML, Metal, a vendor daemon).
///
/// Returning `None` means "no accelerator" and is always a valid answer.
pub trait AcceleratorProbe: Send + Sync {
    fn probe(&self) -> Option<AccelReading>;
}

/// Samples one [`ResourceSnapshot`].
///
/// Implementations must keep sampling bounded (well under 200ms) and should
/// prefer degraded readings over returning an error; an `Err` is only for a
/// sampling backend that produced nothing usable at all.
pub trait SnapshotProvider: Send + Sync {
    fn sample(&self) -> Result<ResourceSnapshot, ResourceSamplingError>;
}

/// `sysinfo`-backed provider for the local host.
///
/// CPU usage in `sysinfo` is measured between consecutive refreshes, so the
/// very first sample after construction reads low; the scheduler tolerates
/// that by design (a generous first cycle at worst).
pub struct SystemSnapshotProvider {
    system: Mutex<System>,
    accel: Option<Box<dyn AcceleratorProbe>>,
}

impl SystemSnapshotProvider {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
            accel: None,
        }
    }

    pub fn with_accelerator_probe(mut self, probe: Box<dyn AcceleratorProbe>) -> Self {
        self.accel = Some(probe);
        self
    }
}

impl Default for SystemSnapshotProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotProvider for SystemSnapshotProvider {
    fn sample(&self) -> Result<ResourceSnapshot, ResourceSamplingError> {
        let mut sys = self
            .system
            .lock()
            .map_err(|_| ResourceSamplingError::new("sampler state poisoned"))?;
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu_used = f64::from(sys.global_cpu_info().cpu_usage()).clamp(0.0, 100.0);
        let total_mem = sys.total_memory();
        let mem_headroom_pct = if total_mem == 0 {
            0.0
        } else {
            sys.available_memory() as f64 / total_mem as f64 * 100.0
        };
        let total_swap = sys.total_swap();
        let swap_used_pct = if total_swap == 0 {
            0.0
        } else {
            sys.used_swap() as f64 / total_swap as f64 * 100.0
        };

        let accel = self.accel.as_ref().and_then(|p| p.probe());
        Ok(ResourceSnapshot {
            cpu_headroom_pct: 100.0 - cpu_used,
            mem_headroom_pct,
            swap_used_pct,
            accel_available: accel.is_some(),
            accel_headroom_pct: accel.map(|a| a.compute_headroom_pct).unwrap_or(0.0),
            accel_mem_headroom_pct: accel.map(|a| a.mem_headroom_pct).unwrap_or(0.0),
            taken_at: SystemTime::now(),
        })
    }
}

/// Provider that returns a fixed snapshot. Used in tests and demos to pin the
/// scheduler to a known capacity.
#[derive(Debug, Clone)]
pub struct StaticSnapshotProvider {
    snapshot: ResourceSnapshot,
}

impl StaticSnapshotProvider {
    pub fn new(snapshot: ResourceSnapshot) -> Self {
        Self { snapshot }
    }
}

impl SnapshotProvider for StaticSnapshotProvider {
    fn sample(&self) -> Result<ResourceSnapshot, ResourceSamplingError> {
        Ok(ResourceSnapshot {
            taken_at: SystemTime::now(),
            ..self.snapshot.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(AccelReading);
    impl AcceleratorProbe for FixedProbe {
        fn probe(&self) -> Option<AccelReading> {
            Some(self.0)
        }
    }

    #[test]
    fn test_system_provider_samples_without_accelerator() {
        let provider = SystemSnapshotProvider::new();
        let snap = provider.sample().expect("sampling never fails locally");
        assert!(!snap.accel_available);
        assert_eq!(snap.accel_headroom_pct, 0.0);
        assert!((0.0..=100.0).contains(&snap.cpu_headroom_pct));
        assert!((0.0..=100.0).contains(&snap.mem_headroom_pct));
    }

    #[test]
    fn test_accelerator_probe_feeds_snapshot() {
        let provider = SystemSnapshotProvider::new().with_accelerator_probe(Box::new(FixedProbe(
            AccelReading {
                compute_headroom_pct: 80.0,
                mem_headroom_pct: 60.0,
            },
        )));
        let snap = provider.sample().unwrap();
        assert!(snap.accel_available);
        assert_eq!(snap.accel_headroom_pct, 80.0);
        assert_eq!(snap.accel_mem_headroom_pct, 60.0);
    }

    #[test]
    fn test_exhausted_snapshot_has_no_headroom() {
        let snap = ResourceSnapshot::exhausted();
        assert_eq!(snap.cpu_headroom_pct, 0.0);
        assert_eq!(snap.mem_headroom_pct, 0.0);
        assert!(!snap.accel_available);
    }

    #[test]
    fn test_static_provider_refreshes_timestamp_only() {
        let base = ResourceSnapshot::idle_cpu_only();
        let provider = StaticSnapshotProvider::new(base.clone());
        let a = provider.sample().unwrap();
        let b = provider.sample().unwrap();
        assert_eq!(a.cpu_headroom_pct, b.cpu_headroom_pct);
        assert_eq!(a.mem_headroom_pct, base.mem_headroom_pct);
    }
}
