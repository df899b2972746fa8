//! Aggregated run statistics with a semicolon-separated dump format.

use std::io::Write;

use crate::error::CgResult;
use crate::model::column::SlaveStatistics;

/// Counts of generated cuts per family during one callback pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CutStatistics {
    pub non_diagonal: u32,
    pub cosine_rule: u32,
    pub pythagoras: u32,
    pub tangent: u32,
}

impl CutStatistics {
    pub fn total(&self) -> u32 {
        self.pythagoras + self.non_diagonal + self.cosine_rule
    }
}

/// Per-iteration information about a master resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MasterStatistics {
    pub objective: f64,
    pub elapsed_seconds: f64,
    pub explored_nodes: f64,
}

/// Collected master and slave statistics of a whole generation run.
///
/// `print_last_iteration` appends one row per stream; headers are written
/// with the first iteration only, so the streams can be tailed while the
/// run is in progress.
#[derive(Debug, Default)]
pub struct RunStatistics {
    /// Slave runs contributing to each master iteration.
    pub slave_runs: Vec<Vec<SlaveStatistics>>,
    /// One entry per master iteration.
    pub master_runs: Vec<MasterStatistics>,
    /// Master wall time per iteration.
    pub master_time: Vec<f64>,
    /// Total slave wall time per iteration.
    pub slave_time: Vec<f64>,

    pending_slave_runs: Vec<SlaveStatistics>,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a slave run for the upcoming master iteration.
    pub fn add_slave_run(&mut self, stats: SlaveStatistics) {
        self.pending_slave_runs.push(stats);
    }

    /// Record a master resolve; closes the current iteration.
    pub fn add_master_run(&mut self, stats: MasterStatistics) {
        self.master_runs.push(stats);
        self.slave_runs.push(std::mem::take(&mut self.pending_slave_runs));
    }

    pub fn iterations(&self) -> usize {
        self.master_runs.len()
    }

    /// Appends the most recent iteration to the three output streams.
    pub fn print_last_iteration(
        &self,
        master: &mut dyn Write,
        slave: &mut dyn Write,
        time: &mut dyn Write,
    ) -> CgResult<()> {
        let Some(m) = self.master_runs.last() else {
            return Ok(());
        };

        if self.master_runs.len() == 1 {
            writeln!(master, "#objective;elapsed_run_time;explored_node_count;")?;
            writeln!(time, "#master_time;slave_time")?;
        }
        writeln!(
            master,
            "{};{};{};",
            m.objective, m.elapsed_seconds, m.explored_nodes
        )?;

        if self.slave_runs.len() == 1 {
            writeln!(
                slave,
                "#iteration;objective;elapsed_run_time;best_objective;\
                 best_objective_bound;explored_node_count;feasible_solutions_count;\
                 used_old_slave_solutions;total_old_slave_solutions;solutions_in_pool"
            )?;
        }
        let iteration = self.slave_runs.len() - 1;
        if let Some(runs) = self.slave_runs.last() {
            for s in runs {
                writeln!(
                    slave,
                    "{};{};{};{};{};{};{};{};{};{};{};",
                    iteration,
                    s.objective,
                    s.elapsed_seconds,
                    s.best_objective,
                    s.best_bound,
                    s.explored_nodes,
                    s.feasible_solutions,
                    s.used_stale_solutions,
                    s.total_consumed,
                    s.solutions_in_pool,
                    s.actual_generation,
                )?;
            }
        }

        let master_time = self.master_time.last().copied().unwrap_or(0.0);
        let slave_time = self.slave_time.last().copied().unwrap_or(0.0);
        writeln!(time, "{};{};", master_time, slave_time)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cut_total_excludes_tangents() {
        let stats = CutStatistics {
            non_diagonal: 1,
            cosine_rule: 2,
            pythagoras: 3,
            tangent: 7,
        };
        assert_eq!(stats.total(), 6);
    }

    #[test]
    fn headers_written_once() {
        let mut stats = RunStatistics::new();
        let (mut m, mut s, mut t) = (Vec::new(), Vec::new(), Vec::new());

        stats.add_slave_run(SlaveStatistics::default());
        stats.add_master_run(MasterStatistics::default());
        stats.master_time.push(0.1);
        stats.slave_time.push(0.2);
        stats.print_last_iteration(&mut m, &mut s, &mut t).unwrap();

        stats.add_master_run(MasterStatistics::default());
        stats.master_time.push(0.3);
        stats.slave_time.push(0.4);
        stats.print_last_iteration(&mut m, &mut s, &mut t).unwrap();

        let master = String::from_utf8(m).unwrap();
        assert_eq!(master.matches('#').count(), 1);
        assert_eq!(master.lines().count(), 3);

        let slave = String::from_utf8(s).unwrap();
        assert_eq!(slave.matches('#').count(), 1);
        assert_eq!(slave.lines().count(), 2);
    }

    #[test]
    fn pending_runs_attach_to_next_master() {
        let mut stats = RunStatistics::new();
        stats.add_slave_run(SlaveStatistics::default());
        stats.add_slave_run(SlaveStatistics::default());
        stats.add_master_run(MasterStatistics::default());
        stats.add_master_run(MasterStatistics::default());
        assert_eq!(stats.slave_runs[0].len(), 2);
        assert_eq!(stats.slave_runs[1].len(), 0);
    }
}
