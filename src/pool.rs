//! Thread-safe exchange point between slave producers and the single
//! master consumer.
//!
//! Slaves push candidate columns as they find them; the generation loop
//! consumes the ones it wants with a predicate. Certified columns bypass
//! the predicate: they carry the termination signal and must never be
//! dropped.

use std::sync::{Condvar, Mutex};

use crate::model::column::{Column, ColumnWithOrigin, Optimality};

/// Snapshot of the pool's consumption counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatistics {
    /// All columns consumed so far.
    pub total_consumed: u32,
    /// Consumed columns whose dispatch generation was already superseded.
    pub consumed_from_stale: u32,
    /// Columns currently sitting in the pool.
    pub unconsumed: u32,
}

#[derive(Default)]
struct PoolState {
    entries: Vec<ColumnWithOrigin>,
    current_generation: u32,
    total_consumed: u32,
    consumed_from_stale: u32,
    unconsumed: u32,
}

impl PoolState {
    /// Scans newest-first and moves every matching entry into `out`.
    /// Certified columns always match.
    fn drain_matching(&mut self, out: &mut Vec<Column>, predicate: &dyn Fn(&ColumnWithOrigin) -> bool) -> bool {
        let mut found = false;
        let mut idx = self.entries.len();
        while idx > 0 {
            idx -= 1;
            let entry = &self.entries[idx];
            if predicate(entry) || entry.column.optimality != Optimality::NonOptimal {
                let entry = self.entries.remove(idx);
                self.total_consumed += 1;
                if entry.generation < self.current_generation {
                    self.consumed_from_stale += 1;
                }
                self.unconsumed -= 1;

                let mut column = entry.column;
                column.stats.used_stale_solutions = self.consumed_from_stale;
                column.stats.total_consumed = self.total_consumed;
                column.stats.solutions_in_pool = self.unconsumed;
                column.stats.actual_generation = entry.generation;
                out.push(column);
                found = true;
            }
        }
        found
    }
}

/// Producer/consumer pool of generated columns.
///
/// One mutex guards the whole state; a condvar wakes the single consumer.
/// Blocking consumption re-runs its scan after every wakeup, so spurious
/// and lost wakeups are both harmless.
#[derive(Default)]
pub struct ConstraintPool {
    state: Mutex<PoolState>,
    not_empty: Condvar,
}

impl ConstraintPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a column produced under the given dispatch generation.
    pub fn add(&self, column: Column, generation: u32) {
        let mut state = self.lock_state();
        state.entries.push(ColumnWithOrigin { column, generation });
        state.unconsumed += 1;
        // One consumer, so one wakeup suffices.
        self.not_empty.notify_one();
    }

    /// Marks all previously dispatched generations as stale.
    pub fn set_current_generation(&self, generation: u32) {
        self.lock_state().current_generation = generation;
    }

    /// Moves every pooled column matching `predicate` (or carrying an
    /// optimality certificate) into `out`, newest first. With `blocking`
    /// set, waits until at least one column matched.
    pub fn consume(
        &self,
        out: &mut Vec<Column>,
        predicate: impl Fn(&ColumnWithOrigin) -> bool,
        blocking: bool,
    ) -> bool {
        let mut state = self.lock_state();
        if !blocking {
            return state.drain_matching(out, &predicate);
        }
        while !state.drain_matching(out, &predicate) {
            state = match self.not_empty.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        true
    }

    /// Blocking consumption; always returns at least one column.
    pub fn consume_blocking(
        &self,
        out: &mut Vec<Column>,
        predicate: impl Fn(&ColumnWithOrigin) -> bool,
    ) {
        self.consume(out, predicate, true);
    }

    /// Non-blocking consumption; returns whether anything matched.
    pub fn consume_non_blocking(
        &self,
        out: &mut Vec<Column>,
        predicate: impl Fn(&ColumnWithOrigin) -> bool,
    ) -> bool {
        self.consume(out, predicate, false)
    }

    pub fn statistics(&self) -> PoolStatistics {
        let state = self.lock_state();
        PoolStatistics {
            total_consumed: state.total_consumed,
            consumed_from_stale: state.consumed_from_stale,
            unconsumed: state.unconsumed,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::column::SlaveStatistics;
    use crate::model::tof::TimeOfFlight;

    fn column_with_objective(objective: f64) -> Column {
        Column::new(
            TimeOfFlight::new(1, 1),
            SlaveStatistics {
                objective,
                ..Default::default()
            },
        )
    }

    #[test]
    fn predicate_filters_uncertified_columns() {
        let pool = ConstraintPool::new();
        pool.add(column_with_objective(1.0), 0);
        pool.add(column_with_objective(5.0), 0);

        let mut out = Vec::new();
        let matched =
            pool.consume_non_blocking(&mut out, |entry| entry.column.stats.objective > 2.0);
        assert!(matched);
        assert_eq!(out.len(), 1);
        assert!((out[0].stats.objective - 5.0).abs() < 1e-12);
        assert_eq!(pool.statistics().unconsumed, 1);
    }

    #[test]
    fn certified_column_bypasses_predicate() {
        let pool = ConstraintPool::new();
        pool.add(
            column_with_objective(0.0).with_optimality(Optimality::Optimal),
            0,
        );

        let mut out = Vec::new();
        assert!(pool.consume_non_blocking(&mut out, |_| false));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn stale_consumption_is_counted() {
        let pool = ConstraintPool::new();
        pool.add(column_with_objective(1.0), 0);
        pool.set_current_generation(1);
        pool.add(column_with_objective(2.0), 1);

        let mut out = Vec::new();
        pool.consume_non_blocking(&mut out, |_| true);
        let stats = pool.statistics();
        assert_eq!(stats.total_consumed, 2);
        assert_eq!(stats.consumed_from_stale, 1);
        assert_eq!(stats.unconsumed, 0);
    }

    #[test]
    fn newest_first_ordering() {
        let pool = ConstraintPool::new();
        pool.add(column_with_objective(1.0), 0);
        pool.add(column_with_objective(2.0), 0);
        pool.add(column_with_objective(3.0), 0);

        let mut out = Vec::new();
        pool.consume_non_blocking(&mut out, |_| true);
        let objectives: Vec<f64> = out.iter().map(|c| c.stats.objective).collect();
        assert_eq!(objectives, vec![3.0, 2.0, 1.0]);
    }
}
