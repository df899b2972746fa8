//! Round-robin scheduler over the asynchronous slave workers.
//!
//! One dispatch per generation round: the scheduler picks the next worker
//! that is acceptable to interrupt, stamps a fresh generation id on the
//! pool and hands the worker the new objective. Workers keep solving in
//! the background between rounds; their buffered output is drained by a
//! single printer thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::CgResult;
use crate::model::tof::{TimeOfFlight, TraceMatrix};
use crate::pool::ConstraintPool;
use crate::settings::CgSettings;
use crate::slave::logbuf::{PrintGate, WorkerLog};
use crate::slave::session::SolverSession;
use crate::slave::worker::{SlaveWorker, WorkerConfig};

/// Gap cap for worker `i` out of `n`.
///
/// The first few workers are cheap to interrupt (small allowed gap), the
/// rest run to completion: for four workers one is capped at 25%, one at
/// 50% and two are unbounded.
fn gap_cap(i: usize, n: usize) -> Option<f64> {
    if (i as f64) < (n as f64).log2() {
        let gap = (1u64 << i) as f64 / n as f64;
        if gap < 1.0 {
            return Some(gap);
        }
    }
    None
}

/// Owns the slave workers and schedules generation rounds across them.
pub struct SlavePool {
    workers: Vec<SlaveWorker>,
    rotation: usize,
    next_generation: u32,
    pool: Arc<ConstraintPool>,
    pending_hints: Vec<Vec<TimeOfFlight>>,
    gate: Arc<PrintGate>,
    printer: Option<JoinHandle<()>>,
    verbose: bool,
}

impl SlavePool {
    pub fn new(
        sessions: Vec<Box<dyn SolverSession>>,
        pool: Arc<ConstraintPool>,
        settings: &CgSettings,
    ) -> Self {
        let config = WorkerConfig::from_settings(settings);
        let n = sessions.len();
        assert!(n > 0, "at least one slave session is required");
        if n != settings.max_parallel_slaves {
            log::warn!(
                "{n} slave sessions provided, settings expect {}",
                settings.max_parallel_slaves
            );
        }
        let workers: Vec<SlaveWorker> = sessions
            .into_iter()
            .enumerate()
            .map(|(i, session)| {
                SlaveWorker::new(i, session, Arc::clone(&pool), config.clone(), gap_cap(i, n))
            })
            .collect();

        let gate = Arc::new(PrintGate::new(settings.printing_interval));
        let logs: Vec<Arc<WorkerLog>> = workers.iter().map(SlaveWorker::log).collect();
        let printer = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || loop {
                let keep_going = gate.next_slot();
                drain_logs(&logs);
                if !keep_going {
                    break;
                }
            })
        };

        Self {
            workers,
            rotation: 0,
            next_generation: 1,
            pool,
            pending_hints: vec![Vec::new(); n],
            gate,
            printer: Some(printer),
            verbose: settings.verbose,
        }
    }

    fn advance(&mut self) {
        self.rotation = (self.rotation + 1) % self.workers.len();
    }

    /// Splits warm-start hints evenly across the workers. Each worker seeds
    /// its share on its next dispatch.
    pub fn add_start_hints(&mut self, mut hints: Vec<TimeOfFlight>) {
        if hints.is_empty() {
            return;
        }
        let n = self.workers.len();
        let per_slave = (hints.len() + n - 1) / n;
        for target in self.pending_hints.iter_mut() {
            if hints.is_empty() {
                break;
            }
            let take = per_slave.min(hints.len());
            target.extend(hints.drain(..take));
        }
    }

    /// Dispatches one worker on the new objective under a fresh generation
    /// id. Workers whose solve has not closed its allowed gap are skipped;
    /// an unbounded worker is always reachable, so the scan terminates.
    pub fn run_async(&mut self, objective: &TraceMatrix) -> CgResult<()> {
        while !self.workers[self.rotation].ready() {
            self.advance();
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.pool.set_current_generation(generation);

        let idx = self.rotation;
        let hints = std::mem::take(&mut self.pending_hints[idx]);
        self.workers[idx].dispatch(objective, hints, generation)?;
        self.advance();

        if self.verbose {
            let stats = self.pool.statistics();
            log::info!(
                " ==== pool statistics: {}/{} stale columns separated the master, size {} ====",
                stats.consumed_from_stale,
                stats.total_consumed,
                stats.unconsumed
            );
        }
        Ok(())
    }

    /// Lets the printer flush worker output at the configured interval.
    pub fn open_print_gate(&self) {
        self.gate.open();
    }

    pub fn close_print_gate(&self) {
        self.gate.close();
    }

    /// Requests one immediate flush.
    pub fn force_print(&self) {
        self.gate.force();
    }

    /// Cancels all ongoing solves and waits for their threads.
    pub fn cancel_all(&mut self) {
        for worker in &mut self.workers {
            worker.shutdown();
        }
    }

    /// How often each worker was dispatched so far.
    pub fn dispatch_counts(&self) -> Vec<u32> {
        self.workers.iter().map(SlaveWorker::dispatches).collect()
    }
}

impl Drop for SlavePool {
    fn drop(&mut self) {
        self.cancel_all();
        self.gate.shutdown();
        if let Some(printer) = self.printer.take() {
            let _ = printer.join();
        }
    }
}

fn drain_logs(logs: &[Arc<WorkerLog>]) {
    for (i, log) in logs.iter().enumerate() {
        for line in log.drain() {
            log::info!(" ====(Slave {}) ==== {}", i + 1, line);
        }
    }
}
