use serde::{Deserialize, Serialize};

use super::snapshot::ResourceSnapshot;

/// Discrete operating regime derived from live telemetry. Always recomputed
/// from the latest snapshot, never stored authoritatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceTier {
    High,
    Medium,
    Low,
}

impl ResourceTier {
    pub fn name(self) -> &'static str {
        match self {
            ResourceTier::High => "high",
            ResourceTier::Medium => "medium",
            ResourceTier::Low => "low",
        }
    }
}

impl std::fmt::Display for ResourceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Minimum headroom a snapshot must clear to qualify for a tier.
///
/// All comparisons are strict, so a reading sitting exactly on a floor falls
/// to the lower tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierFloor {
    pub min_cpu_headroom_pct: f64,
    pub min_mem_headroom_pct: f64,
    pub max_swap_used_pct: f64,
    /// When positive, the tier additionally requires an available accelerator
    /// with at least this much compute headroom.
    pub min_accel_headroom_pct: f64,
}

impl Default for TierFloor {
    fn default() -> Self {
        Self {
            min_cpu_headroom_pct: 25.0,
            min_mem_headroom_pct: 20.0,
            max_swap_used_pct: 50.0,
            min_accel_headroom_pct: 0.0,
        }
    }
}

impl TierFloor {
    fn admits(&self, snapshot: &ResourceSnapshot) -> bool {
        if snapshot.cpu_headroom_pct <= self.min_cpu_headroom_pct {
            return false;
        }
        if snapshot.mem_headroom_pct <= self.min_mem_headroom_pct {
            return false;
        }
        if snapshot.swap_used_pct >= self.max_swap_used_pct {
            return false;
        }
        if self.min_accel_headroom_pct > 0.0
            && (!snapshot.accel_available
                || snapshot.accel_headroom_pct <= self.min_accel_headroom_pct)
        {
            return false;
        }
        true
    }
}

/// Per-tier floors. Anything that clears neither `high` nor `medium` is `low`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub high: TierFloor,
    pub medium: TierFloor,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            high: TierFloor {
                min_cpu_headroom_pct: 50.0,
                min_mem_headroom_pct: 40.0,
                max_swap_used_pct: 20.0,
                min_accel_headroom_pct: 30.0,
            },
            medium: TierFloor::default(),
        }
    }
}

/// Pure, deterministic, total: every snapshot maps to exactly one tier, and
/// boundary readings resolve toward the lower tier.
pub fn classify(snapshot: &ResourceSnapshot, thresholds: &TierThresholds) -> ResourceTier {
    if thresholds.high.admits(snapshot) {
        ResourceTier::High
    } else if thresholds.medium.admits(snapshot) {
        ResourceTier::Medium
    } else {
        ResourceTier::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn snapshot(cpu: f64, mem: f64, swap: f64, accel: Option<f64>) -> ResourceSnapshot {
        ResourceSnapshot {
            cpu_headroom_pct: cpu,
            mem_headroom_pct: mem,
            swap_used_pct: swap,
            accel_available: accel.is_some(),
            accel_headroom_pct: accel.unwrap_or(0.0),
            accel_mem_headroom_pct: accel.unwrap_or(0.0),
            taken_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_idle_host_with_accelerator_is_high() {
        let snap = snapshot(90.0, 80.0, 0.0, Some(90.0));
        assert_eq!(classify(&snap, &TierThresholds::default()), ResourceTier::High);
    }

    #[test]
    fn test_no_accelerator_caps_at_medium() {
        let snap = snapshot(90.0, 80.0, 0.0, None);
        assert_eq!(
            classify(&snap, &TierThresholds::default()),
            ResourceTier::Medium
        );
    }

    #[test]
    fn test_exhausted_host_is_low() {
        let snap = ResourceSnapshot::exhausted();
        assert_eq!(classify(&snap, &TierThresholds::default()), ResourceTier::Low);
    }

    #[test]
    fn test_boundary_resolves_to_lower_tier() {
        let thresholds = TierThresholds::default();
        // Exactly on the medium CPU floor: strict comparison drops to low.
        let snap = snapshot(
            thresholds.medium.min_cpu_headroom_pct,
            80.0,
            0.0,
            None,
        );
        assert_eq!(classify(&snap, &thresholds), ResourceTier::Low);
    }

    #[test]
    fn test_swap_pressure_demotes() {
        let snap = snapshot(90.0, 80.0, 60.0, Some(90.0));
        assert_eq!(classify(&snap, &TierThresholds::default()), ResourceTier::Low);
    }

    #[test]
    fn test_classification_is_total() {
        let thresholds = TierThresholds::default();
        for cpu in [0.0, 25.0, 50.0, 75.0, 100.0] {
            for mem in [0.0, 20.0, 40.0, 100.0] {
                for accel in [None, Some(10.0), Some(90.0)] {
                    // Every combination maps to exactly one tier without panicking.
                    let _ = classify(&snapshot(cpu, mem, 0.0, accel), &thresholds);
                }
            }
        }
    }
}
