//! Pricing: turns the dual signal into the per-pair slave objective.
//!
//! The slave maximizes the inner product of a candidate's simulated
//! response with the dual signal. Precomputing the correlation of the
//! reference with the dual turns that inner product into a single table
//! lookup per element pair.

use crate::model::tof::{RoiMapping, TraceMatrix};

/// Correlates the reference signal with the dual signal over the region of
/// interest.
///
/// The result has `horizon` samples per pair: entry `k` is the reduced-cost
/// contribution of a pair whose round trip lands on window index `k`.
pub fn slave_objective(
    reference: &TraceMatrix,
    dual: &TraceMatrix,
    mapping: RoiMapping,
) -> TraceMatrix {
    let horizon = mapping.horizon as usize;
    let mut objective = TraceMatrix::zeros(dual.senders(), dual.receivers(), horizon);
    for i in 0..dual.senders() {
        for j in 0..dual.receivers() {
            let reference_row = reference.row(i, j);
            let dual_row = dual.row(i, j);
            let objective_row = objective.row_mut(i, j);
            for (k, value) in objective_row.iter_mut().enumerate() {
                let start = mapping.to_distance(k) as usize;
                if start >= dual_row.len() {
                    break;
                }
                let steps = reference_row.len().min(dual_row.len() - start);
                *value = reference_row[..steps]
                    .iter()
                    .zip(&dual_row[start..start + steps])
                    .map(|(r, d)| r * d)
                    .sum();
            }
        }
    }
    objective
}
