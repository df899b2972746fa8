//! One asynchronous slave worker: a solver session, a solve thread and the
//! event handler driving cuts and heuristics during the solve.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::cuts::chooser::CutChooser;
use crate::cuts::pipeline::CutPipeline;
use crate::cuts::{CutScope, SlaveCut};
use crate::error::{CgError, CgResult};
use crate::model::column::{Column, Optimality};
use crate::model::stats::CutStatistics;
use crate::model::tof::{RoiMapping, TimeOfFlight, TraceMatrix};
use crate::pool::ConstraintPool;
use crate::settings::{CgSettings, CutSelection, SlaveHeuristicOptions};
use crate::slave::heuristics::{Randomisation, Rate};
use crate::slave::logbuf::WorkerLog;
use crate::slave::session::{
    CancelToken, Incumbent, NodeControls, SessionEvents, SolveStatus, SolverSession,
};

#[derive(Debug)]
struct ProgressState {
    running: bool,
    best_objective: f64,
    best_bound: f64,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            running: false,
            best_objective: f64::NEG_INFINITY,
            best_bound: f64::INFINITY,
        }
    }
}

/// Solve progress published by the event handler, read by the scheduler to
/// decide whether interrupting this worker is acceptable.
#[derive(Debug, Default)]
pub struct SharedProgress {
    state: Mutex<ProgressState>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&self) {
        *self.lock_state() = ProgressState {
            running: true,
            ..ProgressState::default()
        };
    }

    fn update(&self, best_objective: f64, best_bound: f64) {
        let mut state = self.lock_state();
        if best_objective.is_finite() {
            state.best_objective = state.best_objective.max(best_objective);
        }
        if best_bound.is_finite() {
            state.best_bound = best_bound;
        }
    }

    fn finish(&self) {
        self.lock_state().running = false;
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    /// Relative gap between bound and incumbent; infinite before the first
    /// incumbent.
    pub fn gap(&self) -> f64 {
        let state = self.lock_state();
        if !state.best_objective.is_finite() || state.best_objective == 0.0 {
            return f64::INFINITY;
        }
        (state.best_bound - state.best_objective).abs() / state.best_objective.abs()
    }

    fn lock_state(&self) -> MutexGuard<'_, ProgressState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Per-worker slice of the run settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub mapping: RoiMapping,
    pub element_pitch: f64,
    pub slave_threshold: f64,
    pub heuristics: SlaveHeuristicOptions,
    pub cut_selection: CutSelection,
}

impl WorkerConfig {
    pub fn from_settings(settings: &CgSettings) -> Self {
        Self {
            mapping: RoiMapping {
                offset: settings.roi_offset,
                horizon: settings.roi_horizon,
            },
            element_pitch: settings.element_pitch,
            slave_threshold: settings.slave_threshold,
            heuristics: settings.heuristics,
            cut_selection: settings.cut_selection,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum HeuristicSource {
    Randomise,
    RoundDown,
}

struct PendingIncumbent {
    objective: f64,
    source: HeuristicSource,
}

/// Event handler for one solve. Lives on the solve thread.
struct CallbackEvents {
    pool: Arc<ConstraintPool>,
    log: Arc<WorkerLog>,
    progress: Arc<SharedProgress>,
    generation: u32,
    slave_threshold: f64,
    heuristics: SlaveHeuristicOptions,
    pipeline: CutPipeline,
    chooser: Option<CutChooser>,
    randomisation: Randomisation,
    objective: TraceMatrix,
    randomise_rate: Rate,
    rounding_rate: Rate,
    tangent_rate: Rate,
    cut_rate: Rate,
    pending: Option<PendingIncumbent>,
    cut_stats: CutStatistics,
    columns_pushed: u32,
}

impl CallbackEvents {
    fn new(
        pool: Arc<ConstraintPool>,
        log: Arc<WorkerLog>,
        progress: Arc<SharedProgress>,
        config: &WorkerConfig,
        objective: TraceMatrix,
        generation: u32,
    ) -> Self {
        Self {
            pool,
            log,
            progress,
            generation,
            slave_threshold: config.slave_threshold,
            heuristics: config.heuristics,
            pipeline: CutPipeline::new(config.element_pitch, config.mapping),
            chooser: CutChooser::from_selection(config.cut_selection),
            randomisation: Randomisation::new(config.mapping, config.element_pitch),
            objective,
            randomise_rate: Rate::new(10.0, 1.4),
            rounding_rate: Rate::new(10.0, 1.4),
            tangent_rate: Rate::new(10.0, 1.4),
            cut_rate: Rate::new(5.0, 1.5),
            pending: None,
            cut_stats: CutStatistics::default(),
            columns_pushed: 0,
        }
    }

    fn rate_for(&mut self, source: HeuristicSource) -> &mut Rate {
        match source {
            HeuristicSource::Randomise => &mut self.randomise_rate,
            HeuristicSource::RoundDown => &mut self.rounding_rate,
        }
    }

    fn try_heuristic(
        &mut self,
        controls: &mut dyn NodeControls,
        source: HeuristicSource,
        tof: Option<TimeOfFlight>,
    ) {
        let Some(mut tof) = tof else {
            self.rate_for(source).on_failure();
            return;
        };
        tof.fill_from_diagonal();
        match controls.inject_solution(&tof) {
            Some(objective) => {
                self.rate_for(source).on_success();
                self.pending = Some(PendingIncumbent { objective, source });
            }
            None => self.rate_for(source).on_failure(),
        }
    }
}

impl SessionEvents for CallbackEvents {
    fn on_incumbent(&mut self, incumbent: Incumbent<'_>, lazy: &mut dyn FnMut(SlaveCut)) {
        let stats = incumbent.stats;
        self.progress.update(stats.best_objective.max(stats.objective), stats.best_bound);

        if self.heuristics.lazy_tangents {
            let mut invalidating = 0u32;
            self.pipeline
                .tangent_cuts(&mut self.cut_stats, incumbent.snapshot, &mut |cut| {
                    invalidating += 1;
                    lazy(cut);
                });
            if invalidating > 0 {
                // The incumbent violated the sqrt relation; if it came from
                // a heuristic, slow that heuristic down hard.
                if let Some(pending) = self.pending.take() {
                    if (pending.objective - stats.objective).abs() < 1e-6 {
                        let rate = self.rate_for(pending.source);
                        rate.on_failure();
                        rate.on_failure();
                    } else {
                        self.pending = Some(pending);
                    }
                }
                self.log.push(format!(
                    "incumbent {:.6} rejected by {invalidating} tangent cut(s)",
                    stats.objective
                ));
                return;
            }
        }

        if stats.objective > self.slave_threshold {
            self.pool
                .add(Column::new(incumbent.tof.clone(), stats), self.generation);
            self.columns_pushed += 1;
            self.log.push(format!(
                "incumbent {:.6} pushed after {:.0} nodes",
                stats.objective, stats.explored_nodes
            ));
        }
    }

    fn on_node(&mut self, controls: &mut dyn NodeControls) {
        self.progress
            .update(controls.best_objective(), controls.best_bound());

        // A pending heuristic incumbent blocks further injections until the
        // solver either accepted or rejected it.
        if let Some(pending) = &self.pending {
            if controls.best_objective() >= pending.objective - 1e-9 {
                self.pending = None;
            } else {
                return;
            }
        }

        let snapshot = controls.relaxation().clone();

        if self.tangent_rate.attempt() {
            let mut added = 0u32;
            self.pipeline
                .tangent_cuts(&mut self.cut_stats, &snapshot, &mut |cut| {
                    added += 1;
                    controls.add_cut(cut, CutScope::Node);
                });
            if added > 0 {
                self.tangent_rate.on_success();
            } else {
                self.tangent_rate.on_failure();
            }
        }

        if let Some(chooser) = &self.chooser {
            if self.cut_rate.attempt() {
                let added = self.pipeline.cosine_rule_cuts(
                    &mut self.cut_stats,
                    &snapshot,
                    chooser,
                    &mut |cut| controls.add_cut(cut, CutScope::Node),
                );
                if added > 0 {
                    self.cut_rate.on_success();
                } else {
                    self.cut_rate.on_failure();
                }
            }
        }

        if self.heuristics.randomise && self.randomise_rate.attempt() {
            let elements = snapshot.binary.elements();
            let mut tof = TimeOfFlight::new(elements, elements);
            let drawn = self
                .randomisation
                .randomise(&snapshot.binary, &self.objective, &mut tof);
            self.try_heuristic(controls, HeuristicSource::Randomise, drawn.then_some(tof));
        }

        if self.pending.is_none() && self.heuristics.rounding_down && self.rounding_rate.attempt()
        {
            let rounded = snapshot.diameter.as_ref().map(|diameter| {
                let mut tof = TimeOfFlight::new(diameter.len(), diameter.len());
                Randomisation::round_down(diameter, &mut tof);
                tof
            });
            self.try_heuristic(controls, HeuristicSource::RoundDown, rounded);
        }
    }
}

/// A worker owns one [`SolverSession`] and runs it on its own thread. The
/// session shuttles between the worker (between runs) and the solve thread
/// (during runs).
pub struct SlaveWorker {
    index: usize,
    pool: Arc<ConstraintPool>,
    log: Arc<WorkerLog>,
    progress: Arc<SharedProgress>,
    cancel: CancelToken,
    max_allowed_gap: Option<f64>,
    config: WorkerConfig,
    session: Option<Box<dyn SolverSession>>,
    running: Option<JoinHandle<Box<dyn SolverSession>>>,
    dispatches: u32,
}

impl SlaveWorker {
    pub fn new(
        index: usize,
        session: Box<dyn SolverSession>,
        pool: Arc<ConstraintPool>,
        config: WorkerConfig,
        max_allowed_gap: Option<f64>,
    ) -> Self {
        Self {
            index,
            pool,
            log: Arc::new(WorkerLog::new()),
            progress: Arc::new(SharedProgress::new()),
            cancel: CancelToken::new(),
            max_allowed_gap,
            config,
            session: Some(session),
            running: None,
            dispatches: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn log(&self) -> Arc<WorkerLog> {
        Arc::clone(&self.log)
    }

    pub fn dispatches(&self) -> u32 {
        self.dispatches
    }

    /// Whether interrupting this worker now is acceptable: it is idle, it
    /// has no gap cap, or its current solve has closed the gap far enough.
    pub fn ready(&self) -> bool {
        if self.running.is_none() || !self.progress.is_running() {
            return true;
        }
        match self.max_allowed_gap {
            None => true,
            Some(cap) => self.progress.gap() < cap,
        }
    }

    /// Interrupts any ongoing solve and starts a new one for the given
    /// objective under the given generation id.
    pub fn dispatch(
        &mut self,
        objective: &TraceMatrix,
        hints: Vec<TimeOfFlight>,
        generation: u32,
    ) -> CgResult<()> {
        let mut session = self.recover_session()?;
        self.cancel.reset();
        session.update_objective(objective)?;
        session.add_start_hints(hints)?;

        self.progress.start();
        self.dispatches += 1;

        let mut events = CallbackEvents::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.log),
            Arc::clone(&self.progress),
            &self.config,
            objective.clone(),
            generation,
        );
        let cancel = self.cancel.clone();
        let pool = Arc::clone(&self.pool);
        let log = Arc::clone(&self.log);
        let progress = Arc::clone(&self.progress);

        self.running = Some(std::thread::spawn(move || {
            match session.optimize(&mut events, &cancel) {
                Ok(outcome) => {
                    if !outcome.feasible {
                        log.push(format!(
                            "model infeasible: {}",
                            outcome.diagnostic.unwrap_or_default()
                        ));
                    } else {
                        let certificate = match outcome.status {
                            SolveStatus::Optimal => Some(Optimality::Optimal),
                            SolveStatus::UserBoundReached => Some(Optimality::UserBoundReached),
                            SolveStatus::Interrupted => None,
                        };
                        if let (Some(certificate), Some((tof, stats))) =
                            (certificate, outcome.best)
                        {
                            log.push(format!(
                                "finished with objective {:.6} ({:?})",
                                stats.objective, outcome.status
                            ));
                            // Certified columns bypass the consumption
                            // predicate, so every finished solve is
                            // guaranteed to wake the waiting master.
                            pool.add(
                                Column::new(tof, stats).with_optimality(certificate),
                                generation,
                            );
                        } else if certificate.is_none() {
                            log.push("interrupted".to_string());
                        }
                    }
                }
                Err(err) => log.push(format!("solve failed: {err}")),
            }
            progress.finish();
            session
        }));
        Ok(())
    }

    fn recover_session(&mut self) -> CgResult<Box<dyn SolverSession>> {
        if let Some(session) = self.session.take() {
            return Ok(session);
        }
        self.cancel.cancel();
        let handle = self
            .running
            .take()
            .ok_or_else(|| CgError::SessionError(format!("slave {} lost its session", self.index + 1)))?;
        handle.join().map_err(|_| {
            CgError::SessionError(format!("slave {} solve thread panicked", self.index + 1))
        })
    }

    /// Cancels any ongoing solve and waits for its thread.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.running.take() {
            if let Ok(session) = handle.join() {
                self.session = Some(session);
            }
        }
    }
}

impl Drop for SlaveWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
