//! 调度模块：跨请求的受约束准入优化与贪心兜底。
//!
//! # Multi-Request Scheduler
//!
//! Once per cycle the scheduler looks at every pending request and one fresh
//! resource snapshot, and decides which stages of which requests run. The
//! decision is a constrained optimization — maximize total quality weight
//! delivered without exceeding any resource axis, honoring stage order —
//! solved by an optional external collaborator behind [`AdmissionSolver`],
//! with a mandatory [`GreedySolver`] approximation so a decision always
//! exists. Correctness never depends on the collaborator: its assignments
//! are validated and discarded if they violate the constraints.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`AdmissionProblem`] | Candidates + capacity + stage specs for one cycle |
//! | [`AdmissionSolver`] | Pluggable solver seam |
//! | [`GreedySolver`] | Ratio-ranked fallback, always available |
//! | [`Scheduler`] | Cycle planner producing [`ScheduleDecision`]s |

pub mod solver;

use std::sync::Arc;

use uuid::Uuid;

use crate::profile::{StageMatrix, StageSet};
use crate::resource::ResourceSnapshot;
use crate::telemetry::{TelemetryEvent, TelemetrySink};

pub use solver::{
    AdmissionAssignment, AdmissionCandidate, AdmissionProblem, AdmissionSolver, CapacityVector,
    GreedySolver, SolverError,
};

/// What one admitted request runs this cycle. Produced by the scheduler,
/// consumed exactly once by that request's controller.
#[derive(Debug, Clone)]
pub struct ScheduleDecision {
    pub request_id: Uuid,
    pub stages_to_run: StageSet,
}

/// Plans one cycle at a time. Holds the optional solver collaborator and the
/// greedy fallback; stateless between cycles apart from those handles.
pub struct Scheduler {
    solver: Option<Arc<dyn AdmissionSolver>>,
    greedy: GreedySolver,
    sink: Arc<dyn TelemetrySink>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            solver: None,
            greedy: GreedySolver::new(),
            sink: crate::telemetry::noop_sink(),
        }
    }

    /// Install an external constrained-optimization solver.
    pub fn with_solver(mut self, solver: Arc<dyn AdmissionSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Solve admission for one cycle. The snapshot is copied into the
    /// problem, so the solver sees an internally consistent view; requests
    /// whose assignment came back empty receive no decision and stay queued.
    pub fn plan(
        &self,
        candidates: Vec<AdmissionCandidate>,
        snapshot: &ResourceSnapshot,
        matrix: &StageMatrix,
    ) -> Vec<ScheduleDecision> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let problem = AdmissionProblem {
            candidates,
            capacity: CapacityVector::from_snapshot(snapshot),
            specs: *matrix.specs(),
        };

        let assignment = self
            .solve_with_collaborator(&problem)
            .unwrap_or_else(|| {
                self.greedy
                    .solve(&problem)
                    .unwrap_or_default()
            });

        problem
            .candidates
            .iter()
            .filter_map(|candidate| {
                let stages = assignment.admitted.get(&candidate.request_id)?;
                if stages.is_empty() {
                    return None;
                }
                Some(ScheduleDecision {
                    request_id: candidate.request_id,
                    stages_to_run: *stages,
                })
            })
            .collect()
    }

    /// Try the external solver and vet its answer. `None` means "use greedy".
    fn solve_with_collaborator(&self, problem: &AdmissionProblem) -> Option<AdmissionAssignment> {
        let solver = self.solver.as_ref()?;
        match solver.solve(problem) {
            Ok(assignment) => match assignment.validate(problem) {
                Ok(()) => Some(assignment),
                Err(err) => {
                    self.sink.emit(TelemetryEvent::SolverFellBack {
                        reason: format!("{} returned invalid assignment: {err}", solver.name()),
                    });
                    None
                }
            },
            Err(err) => {
                self.sink.emit(TelemetryEvent::SolverFellBack {
                    reason: format!("{}: {err}", solver.name()),
                });
                None
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::StageKind;
    use crate::telemetry::MemorySink;
    use std::collections::HashMap;
    use std::time::SystemTime;

    struct BrokenSolver;
    impl AdmissionSolver for BrokenSolver {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn solve(&self, _problem: &AdmissionProblem) -> Result<AdmissionAssignment, SolverError> {
            Err(SolverError::Unavailable("backend offline".into()))
        }
    }

    struct CheatingSolver;
    impl AdmissionSolver for CheatingSolver {
        fn name(&self) -> &'static str {
            "cheating"
        }
        fn solve(&self, problem: &AdmissionProblem) -> Result<AdmissionAssignment, SolverError> {
            // Admits everything for everyone, ignoring capacity entirely.
            let mut admitted = HashMap::new();
            for candidate in &problem.candidates {
                admitted.insert(
                    candidate.request_id,
                    StageKind::ALL.into_iter().collect(),
                );
            }
            Ok(AdmissionAssignment { admitted })
        }
    }

    fn cpu_only_snapshot(cpu: f64, mem: f64) -> ResourceSnapshot {
        ResourceSnapshot {
            cpu_headroom_pct: cpu,
            mem_headroom_pct: mem,
            swap_used_pct: 0.0,
            accel_available: false,
            accel_headroom_pct: 0.0,
            accel_mem_headroom_pct: 0.0,
            taken_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_plan_without_solver_uses_greedy() {
        let scheduler = Scheduler::new();
        let candidates = vec![AdmissionCandidate::fresh(Uuid::new_v4())];
        let decisions = scheduler.plan(
            candidates,
            &cpu_only_snapshot(80.0, 80.0),
            &StageMatrix::new(),
        );
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].stages_to_run.contains(StageKind::Template));
    }

    #[test]
    fn test_unavailable_solver_falls_back_and_reports() {
        let sink = Arc::new(MemorySink::default());
        let scheduler = Scheduler::new()
            .with_solver(Arc::new(BrokenSolver))
            .with_sink(sink.clone());
        let decisions = scheduler.plan(
            vec![AdmissionCandidate::fresh(Uuid::new_v4())],
            &cpu_only_snapshot(80.0, 80.0),
            &StageMatrix::new(),
        );
        assert_eq!(decisions.len(), 1);
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, TelemetryEvent::SolverFellBack { .. })));
    }

    #[test]
    fn test_invalid_external_assignment_is_discarded() {
        let sink = Arc::new(MemorySink::default());
        let scheduler = Scheduler::new()
            .with_solver(Arc::new(CheatingSolver))
            .with_sink(sink.clone());
        // No accelerator: a full-chain admission cannot be valid.
        let decisions = scheduler.plan(
            vec![AdmissionCandidate::fresh(Uuid::new_v4())],
            &cpu_only_snapshot(80.0, 80.0),
            &StageMatrix::new(),
        );
        assert_eq!(decisions.len(), 1);
        assert!(!decisions[0].stages_to_run.contains(StageKind::Detail));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_empty_queue_plans_nothing() {
        let scheduler = Scheduler::new();
        let decisions = scheduler.plan(
            Vec::new(),
            &cpu_only_snapshot(80.0, 80.0),
            &StageMatrix::new(),
        );
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_exhausted_snapshot_admits_nothing() {
        let scheduler = Scheduler::new();
        let decisions = scheduler.plan(
            vec![AdmissionCandidate::fresh(Uuid::new_v4())],
            &ResourceSnapshot::exhausted(),
            &StageMatrix::new(),
        );
        assert!(decisions.is_empty());
    }
}
