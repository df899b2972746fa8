//! Seam between the generation loop and a master solver.

use crate::error::CgResult;
use crate::model::stats::MasterStatistics;
use crate::model::tof::{TimeOfFlight, TraceMatrix};

/// One master variable: a signature with its current amplitude.
#[derive(Debug, Clone)]
pub struct MasterColumn {
    pub tof: TimeOfFlight,
    pub amplitude: f64,
}

/// Result of one restricted master resolve.
#[derive(Debug, Clone)]
pub struct MasterSolve {
    /// Residual objective after the resolve.
    pub objective: f64,
    pub stats: MasterStatistics,
}

/// The restricted master problem: a weighted superposition of column
/// responses approximating the measurement.
///
/// Implementations keep their columns and amplitudes across resolves, so
/// every resolve is warm-started by the previous one.
pub trait MasterBackend {
    /// Adds one column, optionally with a warm-start amplitude.
    fn add_column(&mut self, tof: TimeOfFlight, warm_start: Option<f64>) -> CgResult<()>;

    /// Resolves over the current columns. Writes the dual signal into
    /// `dual`; the slave prices its candidates against it.
    fn solve(&mut self, dual: &mut TraceMatrix) -> CgResult<MasterSolve>;

    /// Drops columns whose amplitude fell below the configured threshold.
    /// Returns how many were dropped.
    fn clean(&mut self) -> usize;

    /// The current columns with their amplitudes from the last resolve.
    fn columns(&self) -> &[MasterColumn];
}
