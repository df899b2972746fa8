//! Buffered per-worker logging.
//!
//! Solver threads never print directly: interleaved output from parallel
//! solves is unreadable. Each worker appends lines to its own [`WorkerLog`]
//! and a single printer thread drains all buffers, gated by a [`PrintGate`]
//! so output only flows while the scheduler is waiting on results.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Append-only line buffer shared between one worker and the printer.
#[derive(Debug, Default)]
pub struct WorkerLog {
    lines: Mutex<Vec<String>>,
}

impl WorkerLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: String) {
        self.lock_lines().push(line);
    }

    /// Takes all buffered lines, leaving the buffer empty.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock_lines())
    }

    fn lock_lines(&self) -> MutexGuard<'_, Vec<String>> {
        match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    open: bool,
    forced: bool,
    shutdown: bool,
}

/// Wakes the printer thread at a fixed interval while open, immediately on
/// demand, and once more on shutdown.
#[derive(Debug)]
pub struct PrintGate {
    state: Mutex<GateState>,
    changed: Condvar,
    interval: Duration,
}

impl PrintGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            changed: Condvar::new(),
            interval,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn open(&self) {
        self.lock_state().open = true;
        self.changed.notify_all();
    }

    pub fn close(&self) {
        self.lock_state().open = false;
    }

    /// Requests one immediate print slot regardless of the gate.
    pub fn force(&self) {
        self.lock_state().forced = true;
        self.changed.notify_all();
    }

    pub fn shutdown(&self) {
        self.lock_state().shutdown = true;
        self.changed.notify_all();
    }

    /// Blocks until the next print slot. False once shutdown was requested;
    /// the caller then drains one final time and exits.
    pub fn next_slot(&self) -> bool {
        let mut state = self.lock_state();
        loop {
            if state.shutdown {
                return false;
            }
            if state.forced {
                state.forced = false;
                return true;
            }
            if !state.open {
                state = match self.changed.wait(state) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                continue;
            }
            // Gate is open: print at the configured interval, waking early
            // on force or shutdown.
            let (guard, _) = match self.changed.wait_timeout_while(state, self.interval, |s| {
                !s.forced && !s.shutdown && s.open
            }) {
                Ok(result) => result,
                Err(poisoned) => poisoned.into_inner(),
            };
            state = guard;
            if state.shutdown {
                return false;
            }
            if state.open || state.forced {
                state.forced = false;
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn drain_takes_everything() {
        let log = WorkerLog::new();
        log.push("a".into());
        log.push("b".into());
        assert_eq!(log.drain(), vec!["a".to_string(), "b".to_string()]);
        assert!(log.drain().is_empty());
    }

    #[test]
    fn force_wakes_a_closed_gate() {
        let gate = Arc::new(PrintGate::new(Duration::from_secs(60)));
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.next_slot())
        };
        thread::sleep(Duration::from_millis(20));
        gate.force();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn shutdown_ends_the_wait() {
        let gate = Arc::new(PrintGate::new(Duration::from_secs(60)));
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.next_slot())
        };
        thread::sleep(Duration::from_millis(20));
        gate.shutdown();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn open_gate_ticks_at_interval() {
        let gate = PrintGate::new(Duration::from_millis(5));
        gate.open();
        assert!(gate.next_slot());
        assert!(gate.next_slot());
    }
}
