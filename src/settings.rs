//! Configuration settings for the column-generation core.

use std::time::Duration;

/// Cut-selection strategy used inside the slave callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CutSelection {
    /// No cosine-rule cuts.
    Off,

    /// Per-cell exact 0/1 maximization (one sub-solve per cell).
    Exact,

    /// Linear-time greedy sweep over the accumulated candidates.
    #[default]
    Greedy,

    /// Diagnostic: run both, apply greedy, log divergences.
    CompareBoth,
}

/// Which heuristics a slave worker may run at relaxation nodes.
#[derive(Debug, Clone, Copy)]
pub struct SlaveHeuristicOptions {
    /// Inject randomized diagonal solutions drawn from the relaxation.
    pub randomise: bool,

    /// Inject solutions obtained by flooring the relaxed diameters.
    pub rounding_down: bool,

    /// Add lazy first-order tangent cuts for the sqrt relation.
    pub lazy_tangents: bool,
}

impl Default for SlaveHeuristicOptions {
    fn default() -> Self {
        Self {
            randomise: true,
            rounding_down: true,
            lazy_tangents: true,
        }
    }
}

/// Settings for a column-generation run.
///
/// The numeric tolerances are empirical; they are exposed here instead of
/// being hard-coded so that benchmark configurations can vary them.
#[derive(Debug, Clone)]
pub struct CgSettings {
    // === Geometry ===
    /// Number of array elements (senders == receivers).
    pub elements: usize,

    /// Physical spacing between neighboring elements, in sample units.
    pub element_pitch: f64,

    /// First valid sample index of the region of interest.
    pub roi_offset: u32,

    /// Number of valid sample indices starting at `roi_offset`.
    pub roi_horizon: u32,

    // === Termination ===
    /// Maximum number of column-generation iterations.
    pub max_columns: usize,

    /// Converged when the best slave objective of a round drops to this.
    pub slave_threshold: f64,

    /// Converged when the master objective drops to this.
    pub master_threshold: f64,

    /// Enables pruning of weightless master variables after a resolve;
    /// the backend drops amplitudes below its own configured threshold.
    /// `None` skips the cleaning pass entirely.
    pub master_solution_threshold: Option<f64>,

    // === Async slave pool ===
    /// Number of parallel slave workers.
    pub max_parallel_slaves: usize,

    /// A consumed column must separate the dual by more than this.
    pub dual_separation_eps: f64,

    /// How often the log-draining thread flushes worker output.
    pub printing_interval: Duration,

    // === Cuts and heuristics ===
    /// Cut-selection strategy.
    pub cut_selection: CutSelection,

    /// Heuristic toggles for the slave callbacks.
    pub heuristics: SlaveHeuristicOptions,

    // === Output ===
    /// Emit per-iteration progress via `log`.
    pub verbose: bool,
}

impl Default for CgSettings {
    fn default() -> Self {
        Self {
            elements: 0,
            element_pitch: 1.0,
            roi_offset: 0,
            roi_horizon: 0,

            max_columns: 100,
            slave_threshold: 1e-3,
            master_threshold: 0.0,
            master_solution_threshold: Some(1e-6),

            max_parallel_slaves: 1,
            dual_separation_eps: 0.1,
            printing_interval: Duration::from_millis(2000),

            cut_selection: CutSelection::default(),
            heuristics: SlaveHeuristicOptions::default(),

            verbose: false,
        }
    }
}

impl CgSettings {
    /// Settings for a measurement geometry.
    pub fn for_geometry(elements: usize, roi_offset: u32, roi_horizon: u32) -> Self {
        Self {
            elements,
            roi_offset,
            roi_horizon,
            ..Default::default()
        }
    }

    /// Set the number of parallel slave workers.
    pub fn with_parallel_slaves(mut self, n: usize) -> Self {
        self.max_parallel_slaves = n;
        self
    }

    /// Set the slave convergence threshold.
    pub fn with_slave_threshold(mut self, threshold: f64) -> Self {
        self.slave_threshold = threshold;
        self
    }

    /// Set the iteration cap.
    pub fn with_max_columns(mut self, max_columns: usize) -> Self {
        self.max_columns = max_columns;
        self
    }

    /// Set the cut-selection strategy.
    pub fn with_cut_selection(mut self, selection: CutSelection) -> Self {
        self.cut_selection = selection;
        self
    }
}
