//! Built-in master backend: non-negative least squares on the residual.
//!
//! Minimizes `||measurement - sum_v x_v * response_v||^2` over `x >= 0` by
//! projected coordinate descent. The residual doubles as the dual signal:
//! the reduced cost of a candidate column is the inner product of its
//! response with the residual.

use std::time::Instant;

use crate::error::{CgError, CgResult};
use crate::master::backend::{MasterBackend, MasterColumn, MasterSolve};
use crate::model::stats::MasterStatistics;
use crate::model::tof::{TimeOfFlight, TraceMatrix};

const MAX_SWEEPS: usize = 500;
/// Stop sweeping once the objective improves by less than this.
const SWEEP_TOLERANCE: f64 = 1e-12;

/// Non-negative least-squares master over simulated column responses.
///
/// Invariant: `residual == measurement - sum_v amplitude_v * response_v`
/// at all times, also between resolves.
pub struct ResidualMaster {
    measurement: TraceMatrix,
    reference: TraceMatrix,
    columns: Vec<MasterColumn>,
    responses: Vec<TraceMatrix>,
    residual: TraceMatrix,
    /// Columns below this amplitude are dropped by `clean`; `None`
    /// disables cleaning.
    amplitude_threshold: Option<f64>,
}

impl ResidualMaster {
    pub fn new(
        measurement: TraceMatrix,
        reference: TraceMatrix,
        amplitude_threshold: Option<f64>,
    ) -> CgResult<Self> {
        if measurement.senders() != reference.senders()
            || measurement.receivers() != reference.receivers()
        {
            return Err(CgError::InvalidInput(format!(
                "measurement is {}x{} but reference is {}x{}",
                measurement.senders(),
                measurement.receivers(),
                reference.senders(),
                reference.receivers()
            )));
        }
        if measurement.samples() == 0 {
            return Err(CgError::InvalidInput("empty measurement".into()));
        }
        let residual = measurement.clone();
        Ok(Self {
            measurement,
            reference,
            columns: Vec::new(),
            responses: Vec::new(),
            residual,
            amplitude_threshold,
        })
    }

    pub fn measurement(&self) -> &TraceMatrix {
        &self.measurement
    }

    fn apply_amplitude_change(residual: &mut TraceMatrix, response: &TraceMatrix, change: f64) {
        if change == 0.0 {
            return;
        }
        for (r, s) in residual
            .as_mut_slice()
            .iter_mut()
            .zip(response.as_slice())
        {
            *r -= change * s;
        }
    }

    fn dot(a: &TraceMatrix, b: &TraceMatrix) -> f64 {
        a.as_slice().iter().zip(b.as_slice()).map(|(x, y)| x * y).sum()
    }
}

impl MasterBackend for ResidualMaster {
    fn add_column(&mut self, tof: TimeOfFlight, warm_start: Option<f64>) -> CgResult<()> {
        if tof.senders() != self.measurement.senders() {
            return Err(CgError::InvalidInput(format!(
                "column has {} senders, measurement has {}",
                tof.senders(),
                self.measurement.senders()
            )));
        }
        let mut response = TraceMatrix::zeros(
            self.measurement.senders(),
            self.measurement.receivers(),
            self.measurement.samples(),
        );
        tof.simulate(&self.reference, &mut response);

        let amplitude = warm_start.unwrap_or(0.0).max(0.0);
        Self::apply_amplitude_change(&mut self.residual, &response, amplitude);
        self.columns.push(MasterColumn { tof, amplitude });
        self.responses.push(response);
        Ok(())
    }

    fn solve(&mut self, dual: &mut TraceMatrix) -> CgResult<MasterSolve> {
        let started = Instant::now();
        let norms: Vec<f64> = self.responses.iter().map(TraceMatrix::norm_squared).collect();

        let mut objective = self.residual.norm_squared();
        let mut sweeps = 0usize;
        while sweeps < MAX_SWEEPS {
            sweeps += 1;
            for (v, response) in self.responses.iter().enumerate() {
                if norms[v] <= 0.0 {
                    continue;
                }
                let gradient = Self::dot(response, &self.residual);
                let current = self.columns[v].amplitude;
                let updated = (current + gradient / norms[v]).max(0.0);
                if updated != current {
                    Self::apply_amplitude_change(&mut self.residual, response, updated - current);
                    self.columns[v].amplitude = updated;
                }
            }
            let improved = self.residual.norm_squared();
            if objective - improved < SWEEP_TOLERANCE {
                objective = improved;
                break;
            }
            objective = improved;
        }

        *dual = self.residual.clone();
        Ok(MasterSolve {
            objective,
            stats: MasterStatistics {
                objective,
                elapsed_seconds: started.elapsed().as_secs_f64(),
                explored_nodes: sweeps as f64,
            },
        })
    }

    fn clean(&mut self) -> usize {
        let Some(threshold) = self.amplitude_threshold else {
            return 0;
        };
        let mut dropped = 0;
        let mut v = 0;
        while v < self.columns.len() {
            if self.columns[v].amplitude < threshold {
                // Return the dropped contribution to the residual so the
                // invariant holds for the remaining columns.
                let column = self.columns.remove(v);
                let response = self.responses.remove(v);
                Self::apply_amplitude_change(&mut self.residual, &response, -column.amplitude);
                dropped += 1;
            } else {
                v += 1;
            }
        }
        dropped
    }

    fn columns(&self) -> &[MasterColumn] {
        &self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse_reference(elements: usize) -> TraceMatrix {
        let mut reference = TraceMatrix::zeros(elements, elements, 1);
        for i in 0..elements {
            for j in 0..elements {
                reference.set(i, j, 0, 1.0);
            }
        }
        reference
    }

    fn tof_at(elements: usize, distance: u32) -> TimeOfFlight {
        let mut tof = TimeOfFlight::new(elements, elements);
        for i in 0..elements {
            tof.set(i, i, distance);
        }
        tof.fill_from_diagonal();
        tof
    }

    fn measurement_of(columns: &[(u32, f64)], elements: usize, samples: usize) -> TraceMatrix {
        let reference = impulse_reference(elements);
        let mut measurement = TraceMatrix::zeros(elements, elements, samples);
        let mut response = TraceMatrix::zeros(elements, elements, samples);
        for &(distance, amplitude) in columns {
            tof_at(elements, distance).simulate(&reference, &mut response);
            for (m, r) in measurement
                .as_mut_slice()
                .iter_mut()
                .zip(response.as_slice())
            {
                *m += amplitude * r;
            }
        }
        measurement
    }

    #[test]
    fn recovers_a_single_amplitude() {
        let measurement = measurement_of(&[(3, 2.0)], 2, 8);
        let mut master =
            ResidualMaster::new(measurement, impulse_reference(2), Some(1e-6)).unwrap();
        master.add_column(tof_at(2, 3), None).unwrap();

        let mut dual = TraceMatrix::zeros(2, 2, 8);
        let solve = master.solve(&mut dual).unwrap();
        assert!(solve.objective < 1e-9);
        assert!((master.columns()[0].amplitude - 2.0).abs() < 1e-6);
        // Perfect fit: the dual signal vanishes.
        assert!(dual.norm_squared() < 1e-9);
    }

    #[test]
    fn separates_two_columns() {
        let measurement = measurement_of(&[(2, 1.5), (5, 0.5)], 2, 8);
        let mut master =
            ResidualMaster::new(measurement, impulse_reference(2), Some(1e-6)).unwrap();
        master.add_column(tof_at(2, 2), None).unwrap();
        master.add_column(tof_at(2, 5), None).unwrap();

        let mut dual = TraceMatrix::zeros(2, 2, 8);
        let solve = master.solve(&mut dual).unwrap();
        assert!(solve.objective < 1e-9);
        assert!((master.columns()[0].amplitude - 1.5).abs() < 1e-6);
        assert!((master.columns()[1].amplitude - 0.5).abs() < 1e-6);
    }

    #[test]
    fn amplitudes_stay_non_negative() {
        // The measurement contains only distance 5; the distance-2 column
        // is useless and must not go negative to compensate.
        let measurement = measurement_of(&[(5, 1.0)], 1, 8);
        let mut master =
            ResidualMaster::new(measurement, impulse_reference(1), Some(1e-6)).unwrap();
        master.add_column(tof_at(1, 2), None).unwrap();
        master.add_column(tof_at(1, 5), None).unwrap();

        let mut dual = TraceMatrix::zeros(1, 1, 8);
        master.solve(&mut dual).unwrap();
        assert!(master.columns()[0].amplitude.abs() < 1e-9);
        assert!((master.columns()[1].amplitude - 1.0).abs() < 1e-6);
    }

    #[test]
    fn clean_drops_weightless_columns() {
        let measurement = measurement_of(&[(5, 1.0)], 1, 8);
        let mut master =
            ResidualMaster::new(measurement, impulse_reference(1), Some(1e-6)).unwrap();
        master.add_column(tof_at(1, 2), None).unwrap();
        master.add_column(tof_at(1, 5), None).unwrap();

        let mut dual = TraceMatrix::zeros(1, 1, 8);
        master.solve(&mut dual).unwrap();
        assert_eq!(master.clean(), 1);
        assert_eq!(master.columns().len(), 1);
        assert_eq!(master.columns()[0].tof.at(0, 0), 5);

        // The survivor still fits the measurement.
        let solve = master.solve(&mut dual).unwrap();
        assert!(solve.objective < 1e-9);
    }

    #[test]
    fn warm_start_keeps_the_residual_consistent() {
        let measurement = measurement_of(&[(3, 2.0)], 1, 8);
        let mut master =
            ResidualMaster::new(measurement, impulse_reference(1), Some(1e-6)).unwrap();
        master.add_column(tof_at(1, 3), Some(2.0)).unwrap();

        // Warm-started exactly: the first solve converges immediately.
        let mut dual = TraceMatrix::zeros(1, 1, 8);
        let solve = master.solve(&mut dual).unwrap();
        assert!(solve.objective < 1e-9);
        assert!(solve.stats.explored_nodes <= 2.0);
    }
}
