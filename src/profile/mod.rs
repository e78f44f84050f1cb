//! Stage configuration matrix: tier-driven parameter selection.
//!
//! A pure lookup layer between resource classification and execution. Given a
//! [`ResourceTier`](crate::resource::ResourceTier), [`StageMatrix::configure`]
//! returns a complete [`StageProfile`] for all three stages, whether or not
//! the scheduler ends up admitting them. Quality weights and resource vectors
//! live here too; they feed only the scheduler's objective function, never
//! the executors.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resource::ResourceTier;
use crate::{Error, ErrorContext};

/// The three ordered pipeline phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Structural template synthesis (CPU-bound).
    Template,
    /// Detail enhancement via a generative model (accelerator-bound, dominant cost).
    Detail,
    /// Path/shape optimization (CPU-bound).
    Optimize,
}

impl StageKind {
    /// All stages in dependency order.
    pub const ALL: [StageKind; 3] = [StageKind::Template, StageKind::Detail, StageKind::Optimize];

    /// The stage that must complete before this one may run.
    pub fn depends_on(self) -> Option<StageKind> {
        match self {
            StageKind::Template => None,
            StageKind::Detail => Some(StageKind::Template),
            StageKind::Optimize => Some(StageKind::Detail),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StageKind::Template => "template",
            StageKind::Detail => "detail",
            StageKind::Optimize => "optimize",
        }
    }

    fn bit(self) -> u8 {
        match self {
            StageKind::Template => 0b001,
            StageKind::Detail => 0b010,
            StageKind::Optimize => 0b100,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Small set of stages, used for schedule decisions and completion tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSet {
    bits: u8,
}

impl StageSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: StageKind) {
        self.bits |= kind.bit();
    }

    pub fn contains(&self, kind: StageKind) -> bool {
        self.bits & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Stages present, in dependency order.
    pub fn iter(&self) -> impl Iterator<Item = StageKind> + '_ {
        StageKind::ALL.into_iter().filter(|k| self.contains(*k))
    }
}

impl FromIterator<StageKind> for StageSet {
    fn from_iter<I: IntoIterator<Item = StageKind>>(iter: I) -> Self {
        let mut set = StageSet::empty();
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

/// Normalized resource cost of running one stage, as a fraction of total
/// host capacity (0..1 per axis).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceCost {
    pub cpu: f64,
    pub mem: f64,
    pub accel: f64,
    pub accel_mem: f64,
}

impl Default for ResourceCost {
    fn default() -> Self {
        Self {
            cpu: 0.0,
            mem: 0.0,
            accel: 0.0,
            accel_mem: 0.0,
        }
    }
}

impl ResourceCost {
    /// Scalar magnitude used for quality-per-cost ranking.
    pub fn scalar(&self) -> f64 {
        self.cpu + self.mem + self.accel + self.accel_mem
    }
}

/// Static description of one stage: marginal quality contribution and
/// resource demand. Loaded once, shared by every scheduling cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageSpec {
    pub kind: StageKind,
    /// Marginal contribution to final visual fidelity (0..1; the three
    /// weights sum to 1).
    pub quality_weight: f64,
    pub cost: ResourceCost,
}

/// Knobs handed to one stage executor for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct StageParameters {
    pub iterations: u32,
    /// Working resolution for sampling/rasterization inside the engine.
    pub resolution: u32,
    /// Quality/size trade-off knob (0..1).
    pub quality: f64,
    /// Hard execution timeout enforced by the controller.
    pub timeout: Duration,
}

/// Complete parameter set for all three stages at one tier.
#[derive(Debug, Clone, PartialEq)]
pub struct StageProfile {
    pub template: StageParameters,
    pub detail: StageParameters,
    pub optimize: StageParameters,
}

impl StageProfile {
    pub fn get(&self, kind: StageKind) -> &StageParameters {
        match kind {
            StageKind::Template => &self.template,
            StageKind::Detail => &self.detail,
            StageKind::Optimize => &self.optimize,
        }
    }

    fn default_for(tier: ResourceTier) -> Self {
        match tier {
            ResourceTier::High => Self {
                template: StageParameters {
                    iterations: 400,
                    resolution: 1024,
                    quality: 0.95,
                    timeout: Duration::from_secs(8),
                },
                detail: StageParameters {
                    iterations: 60,
                    resolution: 1024,
                    quality: 0.9,
                    timeout: Duration::from_secs(30),
                },
                optimize: StageParameters {
                    iterations: 300,
                    resolution: 1024,
                    quality: 0.9,
                    timeout: Duration::from_secs(10),
                },
            },
            ResourceTier::Medium => Self {
                template: StageParameters {
                    iterations: 200,
                    resolution: 768,
                    quality: 0.8,
                    timeout: Duration::from_secs(5),
                },
                detail: StageParameters {
                    iterations: 30,
                    resolution: 768,
                    quality: 0.75,
                    timeout: Duration::from_secs(20),
                },
                optimize: StageParameters {
                    iterations: 150,
                    resolution: 768,
                    quality: 0.75,
                    timeout: Duration::from_secs(6),
                },
            },
            ResourceTier::Low => Self {
                template: StageParameters {
                    iterations: 80,
                    resolution: 512,
                    quality: 0.6,
                    timeout: Duration::from_secs(3),
                },
                detail: StageParameters {
                    iterations: 12,
                    resolution: 512,
                    quality: 0.5,
                    timeout: Duration::from_secs(12),
                },
                optimize: StageParameters {
                    iterations: 60,
                    resolution: 512,
                    quality: 0.5,
                    timeout: Duration::from_secs(4),
                },
            },
        }
    }
}

/// Per-stage quality weights. Defaults reflect each stage's marginal
/// contribution to final fidelity; tunable, not hard-coded truths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub template: f64,
    pub detail: f64,
    pub optimize: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            template: 0.6,
            detail: 0.3,
            optimize: 0.1,
        }
    }
}

impl QualityWeights {
    const SUM_EPSILON: f64 = 1e-6;

    pub fn validate(&self) -> crate::Result<()> {
        let weights = [
            ("quality_weights.template", self.template),
            ("quality_weights.detail", self.detail),
            ("quality_weights.optimize", self.optimize),
        ];
        for (field, w) in weights {
            if !w.is_finite() || w <= 0.0 || w >= 1.0 {
                return Err(Error::configuration_with_context(
                    "quality weight must be in (0, 1)",
                    ErrorContext::new()
                        .with_field_path(field)
                        .with_details(format!("got {w}")),
                ));
            }
        }
        let sum = self.template + self.detail + self.optimize;
        if (sum - 1.0).abs() > Self::SUM_EPSILON {
            return Err(Error::configuration_with_context(
                "quality weights must sum to 1",
                ErrorContext::new()
                    .with_field_path("quality_weights")
                    .with_details(format!("sum = {sum}")),
            ));
        }
        Ok(())
    }
}

/// Tier → parameters lookup plus the static stage specs.
#[derive(Debug, Clone)]
pub struct StageMatrix {
    specs: [StageSpec; 3],
    high: StageProfile,
    medium: StageProfile,
    low: StageProfile,
}

impl StageMatrix {
    /// Matrix with default weights, costs and per-tier parameters.
    pub fn new() -> Self {
        // Safe: default weights validate.
        Self::with_weights(QualityWeights::default()).expect("default quality weights are valid")
    }

    pub fn with_weights(weights: QualityWeights) -> crate::Result<Self> {
        weights.validate()?;
        Ok(Self {
            specs: [
                StageSpec {
                    kind: StageKind::Template,
                    quality_weight: weights.template,
                    cost: ResourceCost {
                        cpu: 0.05,
                        mem: 0.05,
                        accel: 0.0,
                        accel_mem: 0.0,
                    },
                },
                StageSpec {
                    kind: StageKind::Detail,
                    quality_weight: weights.detail,
                    cost: ResourceCost {
                        cpu: 0.10,
                        mem: 0.15,
                        accel: 0.40,
                        accel_mem: 0.30,
                    },
                },
                StageSpec {
                    kind: StageKind::Optimize,
                    quality_weight: weights.optimize,
                    cost: ResourceCost {
                        cpu: 0.20,
                        mem: 0.10,
                        accel: 0.0,
                        accel_mem: 0.0,
                    },
                },
            ],
            high: StageProfile::default_for(ResourceTier::High),
            medium: StageProfile::default_for(ResourceTier::Medium),
            low: StageProfile::default_for(ResourceTier::Low),
        })
    }

    /// Replace the parameter set for one tier.
    pub fn with_profile(mut self, tier: ResourceTier, profile: StageProfile) -> Self {
        match tier {
            ResourceTier::High => self.high = profile,
            ResourceTier::Medium => self.medium = profile,
            ResourceTier::Low => self.low = profile,
        }
        self
    }

    /// Pure lookup: a complete parameter set for all three stages, even when
    /// some of them will be skipped this cycle.
    pub fn configure(&self, tier: ResourceTier) -> StageProfile {
        match tier {
            ResourceTier::High => self.high.clone(),
            ResourceTier::Medium => self.medium.clone(),
            ResourceTier::Low => self.low.clone(),
        }
    }

    pub fn spec(&self, kind: StageKind) -> &StageSpec {
        match kind {
            StageKind::Template => &self.specs[0],
            StageKind::Detail => &self.specs[1],
            StageKind::Optimize => &self.specs[2],
        }
    }

    pub fn specs(&self) -> &[StageSpec; 3] {
        &self.specs
    }
}

impl Default for StageMatrix {
    fn default() -> Self {
        Self::new()
    }
}
