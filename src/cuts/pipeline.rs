//! Cut generation from a relaxation snapshot.
//!
//! Two families: tangent cuts linearize `d_ii <= sqrt(q_i)` at the current
//! point, and cosine-rule cuts whitelist the feasible window indices of one
//! element once two other elements have committed to theirs.

use crate::cuts::bounds::{BoundHelper, BoundVar};
use crate::cuts::chooser::{AccumulatedCuts, CutChooser};
use crate::cuts::{CutSource, SlaveCut, SlaveVar};
use crate::model::stats::CutStatistics;
use crate::model::tof::RoiMapping;
use crate::slave::session::RelaxationSnapshot;

/// Generates tangent and cosine-rule cuts. Pure: reads a snapshot, emits
/// cuts through a callback, touches no solver state.
#[derive(Debug, Clone)]
pub struct CutPipeline {
    bounds: BoundHelper,
    mapping: RoiMapping,
    /// Binary choices above this count as committed.
    pub activation_threshold: f64,
    /// Tolerance for the at-risk boundary detection.
    pub at_risk_tolerance: f64,
    /// Minimal violation of `d = sqrt(q)` before a tangent is added.
    pub tangent_tolerance: f64,
}

impl CutPipeline {
    pub fn new(element_pitch: f64, mapping: RoiMapping) -> Self {
        Self {
            bounds: BoundHelper::new(element_pitch),
            mapping,
            activation_threshold: 1e-2,
            at_risk_tolerance: 1e-6,
            tangent_tolerance: 1e-2,
        }
    }

    /// Tangent cuts of `f(x) = sqrt(x)` wherever the relaxation lets the
    /// diameter overshoot its squared counterpart.
    pub fn tangent_cuts(
        &self,
        stats: &mut CutStatistics,
        snapshot: &RelaxationSnapshot,
        add_cut: &mut dyn FnMut(SlaveCut),
    ) {
        let (Some(diameter), Some(squared)) = (&snapshot.diameter, &snapshot.squared) else {
            return;
        };
        for i in 0..diameter.len() {
            let d_ii = diameter.at(i, i);
            let q_i = squared[i];
            if q_i <= 0.0 {
                continue;
            }
            let sqrt_q = q_i.sqrt();
            if d_ii - sqrt_q > self.tangent_tolerance {
                // d_ii <= (q_var - q_i) / (2 sqrt(q_i)) + sqrt(q_i)
                let slope = 1.0 / (2.0 * sqrt_q);
                add_cut(SlaveCut {
                    terms: vec![
                        (1.0, SlaveVar::Diameter { i, j: i }),
                        (-slope, SlaveVar::Squared { i }),
                    ],
                    constant: sqrt_q - slope * q_i,
                    source: CutSource::Tangent,
                });
                stats.tangent += 1;
            }
        }
    }

    /// Cosine-rule cuts: accumulates implications over ordered triples of
    /// at-risk elements, then lets the chooser merge and emit them.
    /// Returns the number of emitted cuts.
    pub fn cosine_rule_cuts(
        &self,
        stats: &mut CutStatistics,
        snapshot: &RelaxationSnapshot,
        chooser: &CutChooser,
        add_cut: &mut dyn FnMut(SlaveCut),
    ) -> u32 {
        let at_risk = self.at_risk_elements(snapshot);

        let mut ac = AccumulatedCuts::new();
        let mut indexes_j = Vec::new();
        let mut indexes_k = Vec::new();
        for a in 0..at_risk.len() {
            for b in a + 1..at_risk.len() {
                indexes_j.clear();
                self.committed_indices(snapshot, at_risk[b], &mut indexes_j);
                for &idx_j in &indexes_j {
                    for c in b + 1..at_risk.len() {
                        indexes_k.clear();
                        self.committed_indices(snapshot, at_risk[c], &mut indexes_k);
                        for &idx_k in &indexes_k {
                            self.accumulate(at_risk[a], at_risk[b], idx_j, at_risk[c], idx_k, &mut ac);
                        }
                    }
                }
            }
        }

        let added = chooser.choose(&ac, snapshot, add_cut);
        stats.cosine_rule += added;
        added
    }

    /// Elements whose squared diameter sits on the upper discretization
    /// boundary of their binary choice. Only those can cheat the cosine
    /// rule, since the relaxation can only shrink the square.
    fn at_risk_elements(&self, snapshot: &RelaxationSnapshot) -> Vec<usize> {
        let Some(squared) = &snapshot.squared else {
            return Vec::new();
        };
        let mut at_risk = Vec::new();
        for i in 0..snapshot.binary.elements() {
            let mut upper_sum = 0.0;
            for k in 0..snapshot.binary.samples() {
                let distance = self.mapping.to_distance(k) as f64;
                upper_sum += (distance + 0.5) * (distance + 0.5) * snapshot.binary.at(i, i, k);
            }
            if (squared[i] - upper_sum).abs() < self.at_risk_tolerance {
                at_risk.push(i);
            }
        }
        at_risk
    }

    /// Window indices element `e` has committed to under the relaxation.
    fn committed_indices(&self, snapshot: &RelaxationSnapshot, e: usize, out: &mut Vec<usize>) {
        for k in 0..snapshot.binary.samples() {
            if snapshot.binary.at(e, e, k) > self.activation_threshold {
                out.push(k);
            }
        }
    }

    /// Accumulates one implication: with `j` at `idx_j` and `k` at `idx_k`
    /// fixed, element `i` must choose an index whose squared distance lies
    /// within the corrected triple bound. Vacuous (out-of-window) cells are
    /// discarded.
    fn accumulate(
        &self,
        i: usize,
        j: usize,
        idx_j: usize,
        k: usize,
        idx_k: usize,
        ac: &mut AccumulatedCuts,
    ) {
        let var = |e: usize, idx: usize| {
            // A committed index stands for a real length anywhere in its
            // floor cell [d, d + 1), the convention of the pairwise
            // feasibility check. Centering the bound there keeps every
            // reported distance a single reflector can produce inside the
            // candidate window.
            let center = self.mapping.to_distance(idx) as f64 + 0.5;
            BoundVar {
                idx: e,
                diameter: center,
                square: center * center,
            }
        };
        let (squared_lower, squared_upper) =
            self.bounds
                .triple_corrected(i, var(j, idx_j), var(k, idx_k));

        let mut feasible = Vec::new();
        let mut n = squared_lower.max(0.0).sqrt().floor() as u64;
        while ((n * n) as f64) < squared_upper {
            if let Some(idx) = self.mapping.to_index(n as u32) {
                feasible.push(idx);
            }
            n += 1;
        }
        if !feasible.is_empty() {
            let cell = ac.cell_mut(i, j, k);
            cell.k.push(idx_j);
            cell.l.push(idx_k);
            cell.f.push(feasible);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tof::{SymmetricChoices, SymmetricMatrix};

    fn snapshot(elements: usize, samples: usize) -> RelaxationSnapshot {
        RelaxationSnapshot {
            binary: SymmetricChoices::zeros(elements, samples),
            diameter: Some(SymmetricMatrix::zeros(elements)),
            squared: Some(vec![0.0; elements]),
            representant_x: 0.0,
        }
    }

    #[test]
    fn tangent_cut_fires_on_overshoot() {
        let mapping = RoiMapping {
            offset: 0,
            horizon: 8,
        };
        let pipeline = CutPipeline::new(1.0, mapping);
        let mut s = snapshot(1, 8);
        // d = 5 but q = 16: d exceeds sqrt(q) = 4.
        s.diameter.as_mut().into_iter().for_each(|d| d.set(0, 0, 5.0));
        s.squared = Some(vec![16.0]);

        let mut stats = CutStatistics::default();
        let mut cuts = Vec::new();
        pipeline.tangent_cuts(&mut stats, &s, &mut |c| cuts.push(c));
        assert_eq!(stats.tangent, 1);

        // The tangent touches sqrt at q = 16 and cuts the current point.
        assert!(cuts[0].violation(&s) > 0.0);
        let mut touching = s.clone();
        touching.diameter.as_mut().into_iter().for_each(|d| d.set(0, 0, 4.0));
        assert!(cuts[0].violation(&touching).abs() < 1e-9);
    }

    #[test]
    fn tangent_cut_respects_tolerance() {
        let mapping = RoiMapping {
            offset: 0,
            horizon: 8,
        };
        let pipeline = CutPipeline::new(1.0, mapping);
        let mut s = snapshot(1, 8);
        s.diameter.as_mut().into_iter().for_each(|d| d.set(0, 0, 4.005));
        s.squared = Some(vec![16.0]);

        let mut stats = CutStatistics::default();
        pipeline.tangent_cuts(&mut stats, &s, &mut |_| {});
        assert_eq!(stats.tangent, 0);
    }

    #[test]
    fn at_risk_detection_matches_boundary() {
        let mapping = RoiMapping {
            offset: 10,
            horizon: 4,
        };
        let pipeline = CutPipeline::new(1.0, mapping);
        let mut s = snapshot(2, 4);

        // Element 0 fully commits to index 1 (distance 11) and sits exactly
        // on the upper boundary (11.5)^2.
        s.binary.set(0, 0, 1, 1.0);
        // Element 1 commits too but its square is strictly inside.
        s.binary.set(1, 1, 2, 1.0);
        s.squared = Some(vec![11.5 * 11.5, 12.0 * 12.0]);

        assert_eq!(pipeline.at_risk_elements(&s), vec![0]);
    }

    #[test]
    fn vacuous_implications_are_dropped() {
        // With a pitch of 5 samples, two elements at distance 10 push the
        // third diagonal to 16..18, entirely outside the 10..11 window.
        let mapping = RoiMapping {
            offset: 10,
            horizon: 2,
        };
        let pipeline = CutPipeline::new(5.0, mapping);
        let mut ac = AccumulatedCuts::new();
        pipeline.accumulate(0, 1, 0, 2, 0, &mut ac);
        assert!(ac.is_empty());
    }
}
