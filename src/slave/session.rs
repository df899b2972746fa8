//! The seam between the orchestration core and a combinatorial solver.
//!
//! A [`SolverSession`] wraps one long-lived solver model. The core drives
//! it through three calls: refresh the objective, seed start hints, solve.
//! During a solve the session reports back through [`SessionEvents`]; the
//! event handler never touches the solver directly, it only sees pure-data
//! snapshots and narrow control handles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cuts::{CutScope, SlaveCut};
use crate::error::CgResult;
use crate::model::column::SlaveStatistics;
use crate::model::tof::{SymmetricChoices, SymmetricMatrix, TimeOfFlight, TraceMatrix};

/// Cooperative cancellation flag shared between a worker and its solve
/// thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Pure-data view of the solver's current (relaxed or integral) values.
#[derive(Debug, Clone)]
pub struct RelaxationSnapshot {
    /// Values of the binary choice variables.
    pub binary: SymmetricChoices,
    /// Values of the diameter variables, when the session models them.
    pub diameter: Option<SymmetricMatrix>,
    /// Values of the squared-diameter variables, when modelled.
    pub squared: Option<Vec<f64>>,
    /// Value of the x-representant.
    pub representant_x: f64,
}

/// Control handle passed to [`SessionEvents::on_node`] at relaxation nodes.
pub trait NodeControls {
    /// The relaxation values at this node.
    fn relaxation(&self) -> &RelaxationSnapshot;

    /// Best integral objective known to the solver.
    fn best_objective(&self) -> f64;

    /// Best bound on the objective.
    fn best_bound(&self) -> f64;

    /// Adds a cut with the given scope.
    fn add_cut(&mut self, cut: SlaveCut, scope: CutScope);

    /// Offers a heuristic solution built from the given diagonal. Returns
    /// the resulting objective when the solver accepts it as improving.
    fn inject_solution(&mut self, tof: &TimeOfFlight) -> Option<f64>;
}

/// An improving integral solution reported by the session.
pub struct Incumbent<'a> {
    /// The solution as a time-of-flight signature.
    pub tof: &'a TimeOfFlight,
    /// Integral variable values backing the signature.
    pub snapshot: &'a RelaxationSnapshot,
    /// Solver progress counters at the time of the find.
    pub stats: SlaveStatistics,
}

/// Event sink driven by the session while it solves.
pub trait SessionEvents: Send {
    /// Called for every improving integral solution. Cuts pushed into
    /// `lazy` invalidate the incumbent; the session must then discard it
    /// and enforce the cuts from here on.
    fn on_incumbent(&mut self, incumbent: Incumbent<'_>, lazy: &mut dyn FnMut(SlaveCut));

    /// Called at relaxation nodes.
    fn on_node(&mut self, controls: &mut dyn NodeControls);
}

/// How a solve ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Proven optimal.
    Optimal,
    /// Stopped at the configured objective bound.
    UserBoundReached,
    /// Cancelled through the token.
    Interrupted,
}

/// Result of one [`SolverSession::optimize`] call.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    /// False when the model is infeasible; `diagnostic` then carries a
    /// human-readable description of the infeasible subsystem.
    pub feasible: bool,
    pub diagnostic: Option<String>,
    /// The best solution found, with its statistics.
    pub best: Option<(TimeOfFlight, SlaveStatistics)>,
}

/// One combinatorial solver instance, reused across generation rounds.
pub trait SolverSession: Send {
    /// Replaces the per-pair objective trace for the next solve.
    fn update_objective(&mut self, objective: &TraceMatrix) -> CgResult<()>;

    /// Seeds solution hints to warm the next solve.
    fn add_start_hints(&mut self, hints: Vec<TimeOfFlight>) -> CgResult<()>;

    /// Runs the solver to completion or cancellation, reporting through
    /// `events`. Implementations must poll `cancel` and return with
    /// [`SolveStatus::Interrupted`] promptly once it fires.
    fn optimize(
        &mut self,
        events: &mut dyn SessionEvents,
        cancel: &CancelToken,
    ) -> CgResult<SolveOutcome>;
}
