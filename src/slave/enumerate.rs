//! Exhaustive slave solver over diagonal candidates.
//!
//! Enumerates all diagonals inside the measurement window, prunes with a
//! per-pair objective bound and the single-reflector cosine feasibility
//! check, and drives [`SessionEvents`] the same way an external MIP
//! session would. Intended for small windows and as the reference
//! implementation for tests.

use std::time::Instant;

use crate::cuts::bounds::cosine;
use crate::cuts::{CutScope, SlaveCut};
use crate::error::{CgError, CgResult};
use crate::model::column::SlaveStatistics;
use crate::model::tof::{RoiMapping, SymmetricChoices, SymmetricMatrix, TimeOfFlight, TraceMatrix};
use crate::slave::session::{
    CancelToken, Incumbent, NodeControls, RelaxationSnapshot, SessionEvents, SolveOutcome,
    SolveStatus, SolverSession,
};

/// How many search nodes pass between two `on_node` callbacks.
const NODE_CALLBACK_PERIOD: u32 = 16;

/// Branch-and-bound enumeration over diagonals in the region of interest.
pub struct EnumerationSession {
    elements: usize,
    mapping: RoiMapping,
    element_pitch: f64,
    /// Stop early once the best objective reaches this bound.
    pub user_bound: Option<f64>,
    objective: Option<TraceMatrix>,
    hints: Vec<TimeOfFlight>,
}

impl EnumerationSession {
    pub fn new(elements: usize, mapping: RoiMapping, element_pitch: f64) -> Self {
        Self {
            elements,
            mapping,
            element_pitch,
            user_bound: None,
            objective: None,
            hints: Vec::new(),
        }
    }
}

/// A cut together with the subtree it is confined to.
struct ScopedCut {
    cut: SlaveCut,
    /// Node-scoped cuts expire once the search backtracks above the depth
    /// they were added at; `None` holds for the rest of the search.
    depth: Option<usize>,
}

struct Search<'a> {
    mapping: RoiMapping,
    element_pitch: f64,
    elements: usize,
    objective: &'a TraceMatrix,
    /// Remaining bound when elements `0..d` are assigned.
    suffix_bound: Vec<f64>,
    /// Assigned diagonal prefix, as distances.
    diagonal: Vec<f64>,
    cuts: Vec<ScopedCut>,
    best: Option<(TimeOfFlight, f64)>,
    bound: f64,
    user_bound: Option<f64>,
    explored: f64,
    feasible_count: i32,
    node_counter: u32,
    started: Instant,
    status: SolveStatus,
}

impl<'a> Search<'a> {
    fn new(
        elements: usize,
        mapping: RoiMapping,
        element_pitch: f64,
        user_bound: Option<f64>,
        objective: &'a TraceMatrix,
    ) -> Self {
        let horizon = (mapping.horizon as usize).min(objective.samples());
        // Largest objective sample per element pair, for the pruning bound.
        let mut pair_max = vec![0.0; elements * elements];
        for i in 0..elements {
            for j in 0..elements {
                pair_max[i * elements + j] = objective.row(i, j)[..horizon]
                    .iter()
                    .fold(0.0_f64, |acc, &v| acc.max(v));
            }
        }
        // suffix_bound[d] = sum over pairs touching an element >= d.
        let mut suffix_bound = vec![0.0; elements + 1];
        for d in (0..elements).rev() {
            let mut sum = suffix_bound[d + 1];
            for j in 0..elements {
                sum += pair_max[d * elements + j];
                if j != d {
                    sum += pair_max[j * elements + d];
                }
            }
            suffix_bound[d] = sum;
        }
        let bound = suffix_bound[0];

        Self {
            mapping,
            element_pitch,
            elements,
            objective,
            suffix_bound,
            diagonal: Vec::with_capacity(elements),
            cuts: Vec::new(),
            best: None,
            bound,
            user_bound,
            explored: 0.0,
            feasible_count: 0,
            node_counter: 0,
            started: Instant::now(),
            status: SolveStatus::Optimal,
        }
    }

    fn best_objective(&self) -> f64 {
        self.best.as_ref().map_or(f64::NEG_INFINITY, |(_, obj)| *obj)
    }

    fn statistics(&self, objective: f64) -> SlaveStatistics {
        SlaveStatistics {
            objective,
            elapsed_seconds: self.started.elapsed().as_secs_f64(),
            best_objective: self.best_objective().max(objective),
            best_bound: self.bound,
            explored_nodes: self.explored,
            feasible_solutions: self.feasible_count,
            ..SlaveStatistics::default()
        }
    }

    /// Objective of a complete signature under the current slave trace.
    fn evaluate(&self, tof: &TimeOfFlight) -> f64 {
        let mut total = 0.0;
        for i in 0..self.elements {
            for j in 0..self.elements {
                if let Some(idx) = self.mapping.to_index(tof.at(i, j)) {
                    if idx < self.objective.samples() {
                        total += self.objective.at(i, j, idx);
                    }
                }
            }
        }
        total
    }

    fn passes_cuts(&self, tof: &TimeOfFlight) -> bool {
        self.cuts
            .iter()
            .all(|scoped| scoped.cut.satisfied_by(tof, &self.mapping))
    }

    fn acceptable(&self, tof: &TimeOfFlight) -> bool {
        let diagonal: Vec<f64> = tof.diagonal().map(f64::from).collect();
        cosine::diagonal_feasible(&diagonal, self.element_pitch) && self.passes_cuts(tof)
    }

    /// Snapshot of the current partial assignment as 0/1 values.
    fn snapshot(&self) -> RelaxationSnapshot {
        let horizon = self.mapping.horizon as usize;
        let mut binary = SymmetricChoices::zeros(self.elements, horizon);
        let mut diameter = SymmetricMatrix::zeros(self.elements);
        let mut squared = vec![0.0; self.elements];
        for (i, &distance) in self.diagonal.iter().enumerate() {
            if let Some(idx) = self.mapping.to_index(distance as u32) {
                binary.set(i, i, idx, 1.0);
            }
            diameter.set(i, i, distance);
            squared[i] = distance * distance;
        }
        RelaxationSnapshot {
            binary,
            diameter: Some(diameter),
            squared: Some(squared),
            representant_x: 0.0,
        }
    }

    fn snapshot_of(&self, tof: &TimeOfFlight) -> RelaxationSnapshot {
        let horizon = self.mapping.horizon as usize;
        let mut binary = SymmetricChoices::zeros(self.elements, horizon);
        let mut diameter = SymmetricMatrix::zeros(self.elements);
        let mut squared = vec![0.0; self.elements];
        for i in 0..self.elements {
            for j in 0..self.elements {
                if let Some(idx) = self.mapping.to_index(tof.at(i, j)) {
                    binary.set(i, j, idx, 1.0);
                }
                diameter.set(i, j, tof.at(i, j) as f64);
            }
            squared[i] = diameter.at(i, i) * diameter.at(i, i);
        }
        RelaxationSnapshot {
            binary,
            diameter: Some(diameter),
            squared: Some(squared),
            representant_x: 0.0,
        }
    }

    /// Runs the incumbent protocol; true when the candidate survived the
    /// lazy cuts and became the new best.
    fn offer_incumbent(
        &mut self,
        tof: TimeOfFlight,
        objective: f64,
        events: &mut dyn SessionEvents,
    ) -> bool {
        self.feasible_count += 1;
        let stats = self.statistics(objective);
        let snapshot = self.snapshot_of(&tof);
        let mut new_cuts = Vec::new();
        events.on_incumbent(
            Incumbent {
                tof: &tof,
                snapshot: &snapshot,
                stats,
            },
            &mut |cut| new_cuts.push(cut),
        );
        if !new_cuts.is_empty() {
            self.cuts
                .extend(new_cuts.into_iter().map(|cut| ScopedCut { cut, depth: None }));
            return false;
        }
        self.best = Some((tof, objective));
        if let Some(user_bound) = self.user_bound {
            if objective >= user_bound {
                self.status = SolveStatus::UserBoundReached;
            }
        }
        true
    }

    /// Partial objective over pairs fully inside the assigned prefix.
    fn prefix_objective(&self) -> f64 {
        let assigned = self.diagonal.len();
        let mut total = 0.0;
        for i in 0..assigned {
            for j in 0..assigned {
                let distance = ((self.diagonal[i] + self.diagonal[j]) / 2.0) as u32;
                if let Some(idx) = self.mapping.to_index(distance) {
                    if idx < self.objective.samples() {
                        total += self.objective.at(i, j, idx);
                    }
                }
            }
        }
        total
    }

    fn descend(&mut self, events: &mut dyn SessionEvents, cancel: &CancelToken) {
        if self.status != SolveStatus::Optimal {
            return;
        }
        if cancel.is_cancelled() {
            self.status = SolveStatus::Interrupted;
            return;
        }

        self.explored += 1.0;
        self.node_counter += 1;
        if self.node_counter % NODE_CALLBACK_PERIOD == 0 {
            self.node_callback(events);
            if self.status != SolveStatus::Optimal {
                return;
            }
        }

        let depth = self.diagonal.len();
        if depth == self.elements {
            let mut tof = TimeOfFlight::new(self.elements, self.elements);
            for (i, &distance) in self.diagonal.iter().enumerate() {
                tof.set(i, i, distance as u32);
            }
            tof.fill_from_diagonal();
            if !self.passes_cuts(&tof) {
                return;
            }
            let objective = self.evaluate(&tof);
            if objective > self.best_objective() {
                self.offer_incumbent(tof, objective, events);
            }
            return;
        }

        let horizon = (self.mapping.horizon as usize).min(self.objective.samples());
        for idx in 0..horizon {
            let distance = self.mapping.to_distance(idx) as f64;
            self.diagonal.push(distance);

            let feasible = cosine::diagonal_feasible(&self.diagonal, self.element_pitch);
            let promising = self.prefix_objective() + self.suffix_bound[depth + 1]
                > self.best_objective();
            if feasible && promising {
                self.descend(events, cancel);
            }
            self.diagonal.pop();
            self.cuts
                .retain(|scoped| scoped.depth.map_or(true, |d| d <= depth));
            if self.status != SolveStatus::Optimal {
                return;
            }
        }
    }

    fn node_callback(&mut self, events: &mut dyn SessionEvents) {
        let snapshot = self.snapshot();
        let injected = {
            let mut view = NodeView {
                search: self,
                snapshot,
                injected: None,
            };
            events.on_node(&mut view);
            view.injected
        };
        if let Some((tof, objective)) = injected {
            self.offer_incumbent(tof, objective, events);
        }
    }
}

/// Node-callback view over the running search.
struct NodeView<'s, 'a> {
    search: &'s mut Search<'a>,
    snapshot: RelaxationSnapshot,
    injected: Option<(TimeOfFlight, f64)>,
}

impl NodeControls for NodeView<'_, '_> {
    fn relaxation(&self) -> &RelaxationSnapshot {
        &self.snapshot
    }

    fn best_objective(&self) -> f64 {
        self.search.best_objective()
    }

    fn best_bound(&self) -> f64 {
        self.search.bound
    }

    fn add_cut(&mut self, cut: SlaveCut, scope: CutScope) {
        let depth = match scope {
            CutScope::Lazy => None,
            CutScope::Node => Some(self.search.diagonal.len()),
        };
        self.search.cuts.push(ScopedCut { cut, depth });
    }

    fn inject_solution(&mut self, tof: &TimeOfFlight) -> Option<f64> {
        if !self.search.acceptable(tof) {
            return None;
        }
        let objective = self.search.evaluate(tof);
        if objective <= self.search.best_objective() {
            return None;
        }
        self.injected = Some((tof.clone(), objective));
        Some(objective)
    }
}

impl SolverSession for EnumerationSession {
    fn update_objective(&mut self, objective: &TraceMatrix) -> CgResult<()> {
        if objective.senders() != self.elements || objective.receivers() != self.elements {
            return Err(CgError::InvalidInput(format!(
                "objective is {}x{} but the session models {} elements",
                objective.senders(),
                objective.receivers(),
                self.elements
            )));
        }
        self.objective = Some(objective.clone());
        Ok(())
    }

    fn add_start_hints(&mut self, mut hints: Vec<TimeOfFlight>) -> CgResult<()> {
        self.hints.append(&mut hints);
        Ok(())
    }

    fn optimize(
        &mut self,
        events: &mut dyn SessionEvents,
        cancel: &CancelToken,
    ) -> CgResult<SolveOutcome> {
        let objective = self
            .objective
            .as_ref()
            .ok_or_else(|| CgError::InvalidInput("no objective set before optimize".into()))?;
        if self.mapping.horizon == 0 {
            return Ok(SolveOutcome {
                status: SolveStatus::Optimal,
                feasible: false,
                diagnostic: Some("empty region of interest".into()),
                best: None,
            });
        }

        let mut search = Search::new(
            self.elements,
            self.mapping,
            self.element_pitch,
            self.user_bound,
            objective,
        );

        // Warm starts seed the best silently: they are known columns and
        // must not be recycled through the incumbent path.
        for hint in self.hints.drain(..) {
            if hint.senders() != self.elements || !search.acceptable(&hint) {
                continue;
            }
            let objective = search.evaluate(&hint);
            if objective > search.best_objective() {
                search.best = Some((hint, objective));
            }
        }

        search.descend(events, cancel);

        let best = search
            .best
            .take()
            .map(|(tof, objective)| (tof, search.statistics(objective)));
        Ok(SolveOutcome {
            status: search.status,
            feasible: true,
            diagnostic: None,
            best,
        })
    }
}
