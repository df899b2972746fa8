//! The Dantzig-Wolfe generation loop.
//!
//! Alternates restricted master resolves with asynchronous slave pricing
//! rounds. The master fits amplitudes over the columns found so far and
//! exposes its residual as the dual signal; the slaves search for new
//! signatures separating that dual. Convergence is reached when a slave
//! proves no signature with a worthwhile reduced cost remains, or when the
//! master residual itself is good enough.

pub mod dual;

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{CgError, CgResult};
use crate::master::{MasterBackend, MasterColumn};
use crate::model::column::{Column, ColumnWithOrigin, Optimality};
use crate::model::stats::RunStatistics;
use crate::model::tof::{RoiMapping, TimeOfFlight, TraceMatrix};
use crate::pool::ConstraintPool;
use crate::settings::CgSettings;
use crate::slave::manager::SlavePool;
use crate::slave::session::SolverSession;

/// Seed columns and hints for a run.
#[derive(Default)]
pub struct WarmStart {
    /// Columns added to the master before the first resolve.
    pub for_master: Vec<TimeOfFlight>,
    /// Warm-start amplitudes for `for_master`; leave empty to let the
    /// master fit them from scratch.
    pub for_master_values: Vec<f64>,
    /// Hints seeded into the slave sessions.
    pub for_slave: Vec<TimeOfFlight>,
    /// Resolve the master after every added column instead of once at the
    /// end. Slower, but keeps the amplitudes consistent column by column.
    pub slow: bool,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A certified slave solve stayed below the slave threshold: no column
    /// separates the dual anymore.
    SlaveConverged,
    /// The master residual dropped below the master threshold.
    MasterConverged,
    /// The iteration cap was reached.
    IterationLimit,
}

/// Result of a generation run.
#[derive(Debug, Clone)]
pub struct CgOutcome {
    /// The reconstructed reflectors with their amplitudes.
    pub columns: Vec<MasterColumn>,
    /// Final master objective.
    pub master_objective: f64,
    /// Master iterations performed.
    pub iterations: usize,
    pub stop: StopReason,
}

/// Streams receiving the per-iteration statistics rows.
pub struct StatisticsSink {
    pub master: Box<dyn Write>,
    pub slave: Box<dyn Write>,
    pub time: Box<dyn Write>,
}

/// The generation loop over a master backend and a pool of slave sessions.
pub struct ColumnGeneration<M> {
    master: M,
    slaves: SlavePool,
    pool: Arc<ConstraintPool>,
    reference: TraceMatrix,
    mapping: RoiMapping,
    settings: CgSettings,
    statistics: RunStatistics,
    sink: Option<StatisticsSink>,
    dump: Option<Box<dyn FnMut(&[MasterColumn])>>,
    dual: TraceMatrix,
}

impl<M: MasterBackend> ColumnGeneration<M> {
    pub fn new(
        master: M,
        sessions: Vec<Box<dyn SolverSession>>,
        reference: TraceMatrix,
        settings: CgSettings,
    ) -> Self {
        let pool = Arc::new(ConstraintPool::new());
        let slaves = SlavePool::new(sessions, Arc::clone(&pool), &settings);
        let mapping = RoiMapping {
            offset: settings.roi_offset,
            horizon: settings.roi_horizon,
        };
        let dual = TraceMatrix::zeros(settings.elements, settings.elements, 0);
        Self {
            master,
            slaves,
            pool,
            reference,
            mapping,
            settings,
            statistics: RunStatistics::new(),
            sink: None,
            dump: None,
            dual,
        }
    }

    /// Attach output streams for the per-iteration statistics rows.
    pub fn set_statistics_sink(&mut self, sink: StatisticsSink) {
        self.sink = Some(sink);
    }

    /// Invoked after every master resolve with the current columns and
    /// amplitudes, for intermediate dumps.
    pub fn set_dump_hook(&mut self, hook: impl FnMut(&[MasterColumn]) + 'static) {
        self.dump = Some(Box::new(hook));
    }

    pub fn statistics(&self) -> &RunStatistics {
        &self.statistics
    }

    fn warm_start(&mut self, warm: WarmStart) -> CgResult<()> {
        if !warm.for_master_values.is_empty()
            && warm.for_master_values.len() != warm.for_master.len()
        {
            return Err(CgError::WarmStartMismatch {
                columns: warm.for_master.len(),
                values: warm.for_master_values.len(),
            });
        }

        let with_values = !warm.for_master_values.is_empty();
        for (idx, tof) in warm.for_master.into_iter().enumerate() {
            let value = with_values.then(|| warm.for_master_values[idx]);
            self.master.add_column(tof, value)?;
            if warm.slow {
                let solve = self.master.solve(&mut self.dual)?;
                log::debug!(
                    "warm start column {}: master objective {:.6}",
                    idx + 1,
                    solve.objective
                );
            }
        }

        if !warm.for_slave.is_empty() {
            self.slaves.add_start_hints(warm.for_slave);
        }
        Ok(())
    }

    /// Consumes separating columns from the pool, dispatching a pricing
    /// round and blocking for its results when the pool has none.
    fn price_columns(&mut self) -> CgResult<Vec<Column>> {
        let eps = self.settings.dual_separation_eps;
        let reference = &self.reference;
        let dual = &self.dual;
        let separates =
            |entry: &ColumnWithOrigin| entry.column.tof.dot_with_dual(reference, dual, 0) > eps;

        let mut out = Vec::new();
        if self.pool.consume_non_blocking(&mut out, separates) {
            return Ok(out);
        }

        let objective = dual::slave_objective(reference, dual, self.mapping);
        self.slaves.run_async(&objective)?;
        self.slaves.open_print_gate();
        self.slaves.force_print();
        self.pool.consume_blocking(&mut out, separates);
        self.slaves.close_print_gate();
        Ok(out)
    }

    fn flush_statistics(&mut self) -> CgResult<()> {
        if let Some(sink) = &mut self.sink {
            self.statistics
                .print_last_iteration(&mut *sink.master, &mut *sink.slave, &mut *sink.time)?;
        }
        Ok(())
    }

    /// Runs the loop until convergence or the iteration cap.
    pub fn run(&mut self, warm: WarmStart) -> CgResult<CgOutcome> {
        self.warm_start(warm)?;

        let mut stop = StopReason::IterationLimit;
        let mut master_objective = f64::INFINITY;
        let mut iterations = 0;

        while iterations < self.settings.max_columns {
            iterations += 1;

            let master_started = Instant::now();
            let solve = self.master.solve(&mut self.dual)?;
            master_objective = solve.objective;
            self.statistics.add_master_run(solve.stats);
            self.statistics
                .master_time
                .push(master_started.elapsed().as_secs_f64());
            if let Some(dump) = &mut self.dump {
                dump(self.master.columns());
            }

            if self.settings.verbose {
                log::info!(
                    "iteration {iterations}: master objective {master_objective:.6} over {} columns",
                    self.master.columns().len()
                );
            }

            if master_objective <= self.settings.master_threshold {
                stop = StopReason::MasterConverged;
                self.statistics.slave_time.push(0.0);
                self.flush_statistics()?;
                break;
            }

            if self.settings.master_solution_threshold.is_some() {
                let cleaned = self.master.clean();
                if cleaned > 0 && self.settings.verbose {
                    log::info!("cleaned {cleaned} weightless master columns");
                }
            }

            let slave_started = Instant::now();
            let columns = self.price_columns()?;
            self.statistics
                .slave_time
                .push(slave_started.elapsed().as_secs_f64());

            let mut converged = false;
            for column in columns {
                self.statistics.add_slave_run(column.stats);
                if column.optimality != Optimality::NonOptimal
                    && column.stats.objective <= self.settings.slave_threshold
                {
                    // Certified: nothing above the threshold remains.
                    converged = true;
                    continue;
                }
                self.master.add_column(column.tof, None)?;
            }
            self.flush_statistics()?;

            if converged {
                stop = StopReason::SlaveConverged;
                break;
            }
        }

        self.slaves.cancel_all();
        if self.settings.verbose {
            log::info!(
                "stopped after {iterations} iterations ({stop:?}), master objective {master_objective:.6}"
            );
        }
        Ok(CgOutcome {
            columns: self.master.columns().to_vec(),
            master_objective,
            iterations,
            stop,
        })
    }
}
