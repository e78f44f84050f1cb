use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

use crate::profile::{ResourceCost, StageKind, StageSet, StageSpec};
use crate::resource::ResourceSnapshot;

const EPSILON: f64 = 1e-9;

/// Solver-level failures. Both variants are non-fatal: the scheduler answers
/// with the greedy approximation instead.
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    #[error("admission problem infeasible")]
    Infeasible,

    #[error("solver unavailable: {0}")]
    Unavailable(String),
}

/// Available capacity for one cycle, as fractions of total host capacity
/// (0..1 per axis). Copied from the cycle's snapshot, never shared.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CapacityVector {
    pub cpu: f64,
    pub mem: f64,
    pub accel: f64,
    pub accel_mem: f64,
}

impl CapacityVector {
    pub fn from_snapshot(snapshot: &ResourceSnapshot) -> Self {
        let pct = |v: f64| (v / 100.0).clamp(0.0, 1.0);
        Self {
            cpu: pct(snapshot.cpu_headroom_pct),
            mem: pct(snapshot.mem_headroom_pct),
            accel: if snapshot.accel_available {
                pct(snapshot.accel_headroom_pct)
            } else {
                0.0
            },
            accel_mem: if snapshot.accel_available {
                pct(snapshot.accel_mem_headroom_pct)
            } else {
                0.0
            },
        }
    }

    /// Whether this much remaining capacity covers `cost` on every axis.
    pub fn admits(&self, cost: &ResourceCost) -> bool {
        cost.cpu <= self.cpu + EPSILON
            && cost.mem <= self.mem + EPSILON
            && cost.accel <= self.accel + EPSILON
            && cost.accel_mem <= self.accel_mem + EPSILON
    }

    pub fn charge(&mut self, cost: &ResourceCost) {
        self.cpu = (self.cpu - cost.cpu).max(0.0);
        self.mem = (self.mem - cost.mem).max(0.0);
        self.accel = (self.accel - cost.accel).max(0.0);
        self.accel_mem = (self.accel_mem - cost.accel_mem).max(0.0);
    }
}

/// One pending request as the solver sees it. `completed` stages are fixed
/// at 1 in the optimization: they satisfy dependencies and cost nothing.
#[derive(Debug, Clone)]
pub struct AdmissionCandidate {
    pub request_id: Uuid,
    pub completed: StageSet,
}

impl AdmissionCandidate {
    pub fn fresh(request_id: Uuid) -> Self {
        Self {
            request_id,
            completed: StageSet::empty(),
        }
    }
}

/// The constrained optimization for one cycle: which stages of which
/// requests run, maximizing total quality weight delivered, without
/// exceeding capacity on any resource and never violating stage order.
/// Candidate order encodes arrival (FIFO), used for tie-breaking.
#[derive(Debug, Clone)]
pub struct AdmissionProblem {
    pub candidates: Vec<AdmissionCandidate>,
    pub capacity: CapacityVector,
    pub specs: [StageSpec; 3],
}

impl AdmissionProblem {
    fn spec(&self, kind: StageKind) -> &StageSpec {
        match kind {
            StageKind::Template => &self.specs[0],
            StageKind::Detail => &self.specs[1],
            StageKind::Optimize => &self.specs[2],
        }
    }
}

/// Chosen stages per request. Requests absent from the map were not admitted.
#[derive(Debug, Clone, Default)]
pub struct AdmissionAssignment {
    pub admitted: HashMap<Uuid, StageSet>,
}

impl AdmissionAssignment {
    /// Check an assignment against the problem's capacity and dependency
    /// constraints. External solvers are collaborators, not trusted parts of
    /// the runtime; an assignment that fails here is treated as infeasible.
    pub fn validate(&self, problem: &AdmissionProblem) -> Result<(), SolverError> {
        let mut spent = CapacityVector::default();
        for candidate in &problem.candidates {
            let Some(stages) = self.admitted.get(&candidate.request_id) else {
                continue;
            };
            for kind in stages.iter() {
                if candidate.completed.contains(kind) {
                    continue;
                }
                if let Some(dep) = kind.depends_on() {
                    if !candidate.completed.contains(dep) && !stages.contains(dep) {
                        return Err(SolverError::Infeasible);
                    }
                }
                let cost = &problem.spec(kind).cost;
                spent.cpu += cost.cpu;
                spent.mem += cost.mem;
                spent.accel += cost.accel;
                spent.accel_mem += cost.accel_mem;
            }
        }
        let cap = &problem.capacity;
        if spent.cpu > cap.cpu + EPSILON
            || spent.mem > cap.mem + EPSILON
            || spent.accel > cap.accel + EPSILON
            || spent.accel_mem > cap.accel_mem + EPSILON
        {
            return Err(SolverError::Infeasible);
        }
        Ok(())
    }
}

/// Narrow seam for an LP/constrained-optimization collaborator. The runtime
/// functions without one: [`GreedySolver`] is always present as the fallback.
pub trait AdmissionSolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn solve(&self, problem: &AdmissionProblem) -> Result<AdmissionAssignment, SolverError>;
}

/// Greedy approximation: rank (request, stage) pairs by quality-weight to
/// resource-cost ratio, admit while capacity remains, respect dependency
/// order. Trades optimality for availability; it always produces a decision.
///
/// Ties on ratio prefer the request with the fewest stages already completed
/// (don't starve fresh requests to polish nearly finished ones), then FIFO
/// arrival order.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedySolver;

impl GreedySolver {
    pub fn new() -> Self {
        Self
    }

    fn ratio(spec: &StageSpec) -> f64 {
        spec.quality_weight / spec.cost.scalar().max(EPSILON)
    }
}

impl AdmissionSolver for GreedySolver {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn solve(&self, problem: &AdmissionProblem) -> Result<AdmissionAssignment, SolverError> {
        let mut remaining = problem.capacity;
        let mut admitted: HashMap<Uuid, StageSet> = HashMap::new();

        loop {
            // Best currently admissible (request, stage) pair. Admitting a
            // stage can unlock its dependent, so rescan after every pick.
            let mut best: Option<(usize, StageKind, f64)> = None;
            for (pos, candidate) in problem.candidates.iter().enumerate() {
                let chosen = admitted
                    .get(&candidate.request_id)
                    .copied()
                    .unwrap_or_default();
                for spec in &problem.specs {
                    let kind = spec.kind;
                    if candidate.completed.contains(kind) || chosen.contains(kind) {
                        continue;
                    }
                    if let Some(dep) = kind.depends_on() {
                        if !candidate.completed.contains(dep) && !chosen.contains(dep) {
                            continue;
                        }
                    }
                    if !remaining.admits(&spec.cost) {
                        continue;
                    }
                    let ratio = Self::ratio(spec);
                    let better = match best {
                        None => true,
                        Some((best_pos, _, best_ratio)) => {
                            if (ratio - best_ratio).abs() > EPSILON {
                                ratio > best_ratio
                            } else {
                                let best_completed =
                                    problem.candidates[best_pos].completed.len();
                                let completed = candidate.completed.len();
                                completed < best_completed
                                    || (completed == best_completed && pos < best_pos)
                            }
                        }
                    };
                    if better {
                        best = Some((pos, kind, ratio));
                    }
                }
            }

            let Some((pos, kind, _)) = best else {
                break;
            };
            let candidate = &problem.candidates[pos];
            remaining.charge(&problem.spec(kind).cost);
            admitted.entry(candidate.request_id).or_default().insert(kind);
        }

        Ok(AdmissionAssignment { admitted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::StageMatrix;

    fn problem(candidates: Vec<AdmissionCandidate>, capacity: CapacityVector) -> AdmissionProblem {
        AdmissionProblem {
            candidates,
            capacity,
            specs: *StageMatrix::new().specs(),
        }
    }

    fn full_capacity() -> CapacityVector {
        CapacityVector {
            cpu: 1.0,
            mem: 1.0,
            accel: 1.0,
            accel_mem: 1.0,
        }
    }

    #[test]
    fn test_greedy_admits_full_chain_when_capacity_allows() {
        let id = Uuid::new_v4();
        let assignment = GreedySolver::new()
            .solve(&problem(vec![AdmissionCandidate::fresh(id)], full_capacity()))
            .unwrap();
        let stages = assignment.admitted[&id];
        assert!(stages.contains(StageKind::Template));
        assert!(stages.contains(StageKind::Detail));
        assert!(stages.contains(StageKind::Optimize));
        assignment.validate(&problem(vec![AdmissionCandidate::fresh(id)], full_capacity())).unwrap();
    }

    #[test]
    fn test_greedy_never_schedules_dependent_without_upstream() {
        // Tight CPU: template fits, but if detail were admitted without it
        // the dependency constraint would break.
        let id = Uuid::new_v4();
        let capacity = CapacityVector {
            cpu: 0.06,
            mem: 1.0,
            accel: 1.0,
            accel_mem: 1.0,
        };
        let prob = problem(vec![AdmissionCandidate::fresh(id)], capacity);
        let assignment = GreedySolver::new().solve(&prob).unwrap();
        if let Some(stages) = assignment.admitted.get(&id) {
            if stages.contains(StageKind::Detail) {
                assert!(stages.contains(StageKind::Template));
            }
            if stages.contains(StageKind::Optimize) {
                assert!(stages.contains(StageKind::Detail));
            }
        }
        assignment.validate(&prob).unwrap();
    }

    #[test]
    fn test_zero_accel_capacity_blocks_detail() {
        let id = Uuid::new_v4();
        let capacity = CapacityVector {
            cpu: 0.4,
            mem: 0.4,
            accel: 0.0,
            accel_mem: 0.0,
        };
        let prob = problem(vec![AdmissionCandidate::fresh(id)], capacity);
        let assignment = GreedySolver::new().solve(&prob).unwrap();
        let stages = assignment.admitted[&id];
        assert!(stages.contains(StageKind::Template));
        assert!(!stages.contains(StageKind::Detail));
        assert!(!stages.contains(StageKind::Optimize));
    }

    #[test]
    fn test_completed_stages_cost_nothing_and_satisfy_deps() {
        let id = Uuid::new_v4();
        let mut completed = StageSet::empty();
        completed.insert(StageKind::Template);
        completed.insert(StageKind::Detail);
        // Capacity only fits optimize; the completed chain unlocks it.
        let capacity = CapacityVector {
            cpu: 0.25,
            mem: 0.12,
            accel: 0.0,
            accel_mem: 0.0,
        };
        let prob = problem(
            vec![AdmissionCandidate {
                request_id: id,
                completed,
            }],
            capacity,
        );
        let assignment = GreedySolver::new().solve(&prob).unwrap();
        let stages = assignment.admitted[&id];
        assert!(stages.contains(StageKind::Optimize));
        assignment.validate(&prob).unwrap();
    }

    #[test]
    fn test_tie_break_prefers_fewest_completed() {
        // detail ratio = 0.3/0.6 and optimize ratio = 0.2/0.4 tie at 0.5;
        // capacity fits one of them. The request with fewer completed stages
        // must win even though it arrived later.
        let polished = Uuid::new_v4();
        let fresher = Uuid::new_v4();
        let specs = [
            StageSpec {
                kind: StageKind::Template,
                quality_weight: 0.5,
                cost: ResourceCost {
                    cpu: 0.05,
                    mem: 0.05,
                    accel: 0.0,
                    accel_mem: 0.0,
                },
            },
            StageSpec {
                kind: StageKind::Detail,
                quality_weight: 0.3,
                cost: ResourceCost {
                    cpu: 0.6,
                    mem: 0.0,
                    accel: 0.0,
                    accel_mem: 0.0,
                },
            },
            StageSpec {
                kind: StageKind::Optimize,
                quality_weight: 0.2,
                cost: ResourceCost {
                    cpu: 0.4,
                    mem: 0.0,
                    accel: 0.0,
                    accel_mem: 0.0,
                },
            },
        ];
        let mut two_done = StageSet::empty();
        two_done.insert(StageKind::Template);
        two_done.insert(StageKind::Detail);
        let mut one_done = StageSet::empty();
        one_done.insert(StageKind::Template);
        let prob = AdmissionProblem {
            candidates: vec![
                AdmissionCandidate {
                    request_id: polished,
                    completed: two_done,
                },
                AdmissionCandidate {
                    request_id: fresher,
                    completed: one_done,
                },
            ],
            capacity: CapacityVector {
                cpu: 0.6,
                mem: 1.0,
                accel: 0.0,
                accel_mem: 0.0,
            },
            specs,
        };
        let assignment = GreedySolver::new().solve(&prob).unwrap();
        assert!(assignment.admitted[&fresher].contains(StageKind::Detail));
        assert!(!assignment.admitted.contains_key(&polished));
    }

    #[test]
    fn test_equal_candidates_keep_arrival_order() {
        // One template slot, two identical fresh requests: FIFO wins.
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let capacity = CapacityVector {
            cpu: 0.05,
            mem: 0.05,
            accel: 0.0,
            accel_mem: 0.0,
        };
        let prob = problem(
            vec![
                AdmissionCandidate::fresh(first),
                AdmissionCandidate::fresh(second),
            ],
            capacity,
        );
        let assignment = GreedySolver::new().solve(&prob).unwrap();
        assert!(assignment.admitted[&first].contains(StageKind::Template));
        assert!(!assignment.admitted.contains_key(&second));
    }

    #[test]
    fn test_capacity_never_exceeded() {
        // More demand than supply: 10 fresh requests against half a host.
        let candidates: Vec<_> = (0..10)
            .map(|_| AdmissionCandidate::fresh(Uuid::new_v4()))
            .collect();
        let capacity = CapacityVector {
            cpu: 0.5,
            mem: 0.5,
            accel: 0.5,
            accel_mem: 0.5,
        };
        let prob = problem(candidates, capacity);
        let assignment = GreedySolver::new().solve(&prob).unwrap();
        assignment.validate(&prob).unwrap();
        assert!(!assignment.admitted.is_empty());
    }

    #[test]
    fn test_validate_rejects_overspend() {
        let id = Uuid::new_v4();
        let mut stages = StageSet::empty();
        stages.insert(StageKind::Template);
        let mut admitted = HashMap::new();
        admitted.insert(id, stages);
        let assignment = AdmissionAssignment { admitted };
        let starved = problem(
            vec![AdmissionCandidate::fresh(id)],
            CapacityVector::default(),
        );
        assert!(matches!(
            assignment.validate(&starved),
            Err(SolverError::Infeasible)
        ));
    }

    #[test]
    fn test_validate_rejects_orphan_dependent() {
        let id = Uuid::new_v4();
        let mut stages = StageSet::empty();
        stages.insert(StageKind::Detail);
        let mut admitted = HashMap::new();
        admitted.insert(id, stages);
        let assignment = AdmissionAssignment { admitted };
        let prob = problem(vec![AdmissionCandidate::fresh(id)], full_capacity());
        assert!(matches!(
            assignment.validate(&prob),
            Err(SolverError::Infeasible)
        ));
    }

    #[test]
    fn test_capacity_from_snapshot_zeroes_missing_accelerator() {
        let snap = ResourceSnapshot::idle_cpu_only();
        let cap = CapacityVector::from_snapshot(&snap);
        assert_eq!(cap.cpu, 1.0);
        assert_eq!(cap.accel, 0.0);
        assert_eq!(cap.accel_mem, 0.0);
    }
}
