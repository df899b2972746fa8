//! Primal heuristics run at relaxation nodes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cuts::bounds::{cosine, Interval};
use crate::model::tof::{RoiMapping, SymmetricChoices, TimeOfFlight, TraceMatrix};

/// Adaptive trigger: fires roughly every `max_value` calls, firing more
/// often after successes and backing off after failures.
#[derive(Debug, Clone)]
pub struct Rate {
    max_value: f64,
    factor: f64,
    current: u32,
}

impl Rate {
    pub fn new(every_n_times: f64, factor: f64) -> Self {
        Self {
            max_value: every_n_times,
            factor,
            current: 0,
        }
    }

    pub fn on_success(&mut self) {
        self.max_value /= self.factor;
    }

    pub fn on_failure(&mut self) {
        self.max_value *= self.factor;
    }

    /// Counts one call; true when the action should be tried now.
    pub fn attempt(&mut self) -> bool {
        let fire = self.current as f64 > self.max_value;
        self.current += 1;
        if fire {
            self.current = 0;
        }
        fire
    }
}

/// Builds randomized diagonal solutions from the relaxation.
///
/// Elements are handled in order of decreasing contribution to the
/// objective; the first (best) element's draw pins down a cosine interval
/// that every later draw is restricted to, so the result stays compatible
/// with a single point reflector.
pub struct Randomisation {
    mapping: RoiMapping,
    double_pitch: f64,
    rng: StdRng,
}

impl Randomisation {
    pub fn new(mapping: RoiMapping, element_pitch: f64) -> Self {
        Self {
            mapping,
            double_pitch: 2.0 * element_pitch,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic variant for tests.
    pub fn with_seed(mapping: RoiMapping, element_pitch: f64, seed: u64) -> Self {
        Self {
            mapping,
            double_pitch: 2.0 * element_pitch,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Per-element objective mass under the relaxation.
    fn objective_by_element(binaries: &SymmetricChoices, objective: &TraceMatrix) -> Vec<f64> {
        (0..binaries.elements())
            .map(|i| {
                binaries
                    .pair(i, i)
                    .iter()
                    .zip(objective.row(i, i))
                    .map(|(b, o)| b * o)
                    .sum()
            })
            .collect()
    }

    fn elements_by_objective(binaries: &SymmetricChoices, objective: &TraceMatrix) -> Vec<usize> {
        let weights = Self::objective_by_element(binaries, objective);
        let mut order: Vec<usize> = (0..binaries.elements()).collect();
        order.sort_by(|&a, &b| {
            weights[b]
                .partial_cmp(&weights[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order
    }

    /// Draws one distance for element pair `(i, j)` within the given
    /// distance range, weighted by the relaxation; falls back to a uniform
    /// draw when the restricted mass is negligible.
    fn choose_randomized_distance(
        &mut self,
        binaries: &SymmetricChoices,
        i: usize,
        j: usize,
        lower: u32,
        upper: u32,
    ) -> Option<u32> {
        let start = self.mapping.to_index(lower)?;
        let end = self.mapping.to_index(upper)? + 1;
        if lower > upper || start >= end {
            log::debug!("randomisation: bound [{lower}, {upper}] is empty");
            return None;
        }

        let whole_window = start == 0 && end == binaries.samples();
        let mass: f64 = if whole_window {
            1.0
        } else {
            binaries.pair(i, j)[start..end].iter().sum()
        };

        let draw: f64 = self.rng.gen();
        let index = if mass < 1e-5 {
            start + (draw * (end - start) as f64) as usize
        } else {
            let mut remaining = draw * mass;
            let mut hit = None;
            for k in start..end {
                remaining -= binaries.at(i, j, k);
                if remaining <= 0.0 {
                    hit = Some(k);
                    break;
                }
            }
            hit?
        };
        Some(self.mapping.to_distance(index.min(end - 1)))
    }

    /// Fills the diagonal of `tof` with a randomized feasible solution.
    /// False when a draw left the window or the cosine interval collapsed.
    pub fn randomise(
        &mut self,
        binaries: &SymmetricChoices,
        objective: &TraceMatrix,
        tof: &mut TimeOfFlight,
    ) -> bool {
        let order = Self::elements_by_objective(binaries, objective);
        debug_assert_eq!(order.len(), tof.senders());

        let mut cos = Interval::new(-1.0, 1.0);
        let last_distance = self.mapping.to_distance(binaries.samples() - 1);
        let first_distance_bound = self.mapping.to_distance(0);
        let absolute = Interval::new(first_distance_bound as f64, last_distance as f64);

        let first = order[0];
        let Some(first_drawn) =
            self.choose_randomized_distance(binaries, first, first, first_distance_bound, last_distance)
        else {
            log::debug!("randomisation: first draw left the window");
            return false;
        };
        let first_bound = Interval::new(first_drawn as f64 - 0.5, first_drawn as f64 + 0.5);
        tof.set(first, first, first_drawn);

        for &i in &order[1..] {
            let delta = (i as f64 - first as f64).abs() * self.double_pitch;
            let mirrored = if i > first { cos } else { cos.scale(-1.0) };

            let allowed =
                cosine::squared_length_interval(first_bound, Interval::exact(delta), mirrored)
                    .root();
            if !allowed.is_intersecting(absolute) {
                return false;
            }
            let allowed = allowed.intersect(absolute).round_inward();

            let Some(drawn) = self.choose_randomized_distance(
                binaries,
                i,
                i,
                allowed.lower as u32,
                allowed.upper as u32,
            ) else {
                log::debug!("randomisation: draw for element {i} left the window");
                return false;
            };
            tof.set(i, i, drawn);

            let new_cosine = cosine::cosine_gamma_interval(
                first_bound,
                Interval::exact(delta),
                Interval::new(drawn as f64, drawn as f64 + 1.0),
            );
            let oriented = if i > first {
                new_cosine
            } else {
                new_cosine.scale(-1.0)
            };
            if !cos.is_intersecting(oriented) {
                log::debug!("randomisation: cosine interval collapsed at element {i}");
                return false;
            }
            cos = cos.intersect(oriented);
        }
        true
    }

    /// Floors the relaxed diameters into a diagonal solution.
    pub fn round_down(diameter: &crate::model::tof::SymmetricMatrix, tof: &mut TimeOfFlight) {
        for i in 0..diameter.len() {
            for j in 0..diameter.len() {
                tof.set(i, j, diameter.at(i, j).floor().max(0.0) as u32);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_fires_after_max_calls() {
        let mut rate = Rate::new(3.0, 1.4);
        let fired: Vec<bool> = (0..6).map(|_| rate.attempt()).collect();
        assert_eq!(fired, vec![false, false, false, false, true, false]);
    }

    #[test]
    fn success_speeds_up_failure_slows_down() {
        let mut rate = Rate::new(10.0, 2.0);
        rate.on_success();
        rate.on_success();
        // max is now 2.5: fires on the fourth call.
        assert!((0..4).map(|_| rate.attempt()).any(|f| f));
        rate.on_failure();
        rate.on_failure();
        rate.on_failure();
        // max is back to 20: no fire within ten calls.
        assert!(!(0..10).map(|_| rate.attempt()).any(|f| f));
    }

    fn concentrated_relaxation(
        elements: usize,
        samples: usize,
        peak: usize,
    ) -> (SymmetricChoices, TraceMatrix) {
        let mut binaries = SymmetricChoices::zeros(elements, samples);
        let mut objective = TraceMatrix::zeros(elements, elements, samples);
        for i in 0..elements {
            binaries.set(i, i, peak, 1.0);
            objective.set(i, i, peak, 1.0);
        }
        (binaries, objective)
    }

    #[test]
    fn concentrated_mass_is_drawn_exactly() {
        let mapping = RoiMapping {
            offset: 20,
            horizon: 10,
        };
        let (binaries, objective) = concentrated_relaxation(2, 10, 5);
        let mut randomiser = Randomisation::with_seed(mapping, 0.25, 7);
        let mut tof = TimeOfFlight::new(2, 2);
        assert!(randomiser.randomise(&binaries, &objective, &mut tof));
        // All mass sits on window index 5, distance 25.
        assert_eq!(tof.at(0, 0), 25);
    }

    #[test]
    fn draws_stay_inside_window() {
        let mapping = RoiMapping {
            offset: 50,
            horizon: 20,
        };
        let elements = 3;
        let samples = 20;
        let mut binaries = SymmetricChoices::zeros(elements, samples);
        let mut objective = TraceMatrix::zeros(elements, elements, samples);
        for i in 0..elements {
            for k in 0..samples {
                binaries.set(i, i, k, 1.0 / samples as f64);
                objective.set(i, i, k, 1.0);
            }
        }

        let mut randomiser = Randomisation::with_seed(mapping, 0.5, 42);
        let mut successes = 0;
        for _ in 0..50 {
            let mut tof = TimeOfFlight::new(elements, elements);
            if randomiser.randomise(&binaries, &objective, &mut tof) {
                successes += 1;
                for d in tof.diagonal() {
                    assert!((50..70).contains(&d), "distance {d} outside window");
                }
            }
        }
        assert!(successes > 0);
    }

    #[test]
    fn round_down_floors_diameters() {
        let mut diameter = crate::model::tof::SymmetricMatrix::zeros(2);
        diameter.set(0, 0, 10.7);
        diameter.set(1, 1, 12.2);
        diameter.set(0, 1, 11.9);
        let mut tof = TimeOfFlight::new(2, 2);
        Randomisation::round_down(&diameter, &mut tof);
        assert_eq!(tof.at(0, 0), 10);
        assert_eq!(tof.at(1, 1), 12);
        assert_eq!(tof.at(0, 1), 11);
    }
}
