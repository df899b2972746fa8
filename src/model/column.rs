//! Columns: a time-of-flight signature together with the statistics of the
//! slave run that produced it.

use crate::model::tof::TimeOfFlight;

/// Optimality certificate attached to a column.
///
/// Certified columns (`Optimal` and `UserBoundReached`) need special
/// treatment: the pool never drops them, because they carry the termination
/// signal of the generation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Optimality {
    /// Proven optimal for the slave objective.
    Optimal,
    /// The solver stopped at the configured objective bound.
    UserBoundReached,
    /// An improving incumbent without a certificate.
    #[default]
    NonOptimal,
}

/// Per-run information about a slave solve.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlaveStatistics {
    /// Objective value of the produced solution.
    pub objective: f64,
    /// Wall-clock seconds of the run.
    pub elapsed_seconds: f64,
    /// Best objective known to the solver when the column was produced.
    pub best_objective: f64,
    /// Best bound known to the solver when the column was produced.
    pub best_bound: f64,
    /// Nodes explored so far.
    pub explored_nodes: f64,
    /// Feasible solutions found so far.
    pub feasible_solutions: i32,

    // Stamped by the pool on consumption.
    /// Consumed columns whose generation id was already stale.
    pub used_stale_solutions: u32,
    /// All columns consumed from the pool so far.
    pub total_consumed: u32,
    /// Columns left in the pool after this consumption.
    pub solutions_in_pool: u32,
    /// Generation id of the dispatch that produced this column.
    pub actual_generation: u32,
}

/// One generated column.
#[derive(Debug, Clone)]
pub struct Column {
    /// The time-of-flight signature.
    pub tof: TimeOfFlight,
    /// Information about the producing run.
    pub stats: SlaveStatistics,
    /// Optimality of the column.
    pub optimality: Optimality,
}

impl Column {
    pub fn new(tof: TimeOfFlight, stats: SlaveStatistics) -> Self {
        Self {
            tof,
            stats,
            optimality: Optimality::default(),
        }
    }

    pub fn with_optimality(mut self, optimality: Optimality) -> Self {
        self.optimality = optimality;
        self
    }
}

/// A column tagged with the generation id of the dispatch that produced it.
#[derive(Debug, Clone)]
pub struct ColumnWithOrigin {
    pub column: Column,
    /// Generation id assigned by the scheduler at dispatch time.
    pub generation: u32,
}
