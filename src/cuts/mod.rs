//! Symbolic linear cuts over the slave's decision variables.
//!
//! Slaves expose three variable families: the binary index choices
//! `b_{ij k}`, the continuous diameters `d_{ij}` and the squared diameters
//! `q_i`. A cut is a linear inequality over those names; the session maps
//! the names onto its own model variables.

pub mod bounds;
pub mod chooser;
pub mod pipeline;

pub use bounds::{BoundHelper, BoundVar, Interval};
pub use chooser::{AccumulatedCuts, CutChooser, Rendezvous};
pub use pipeline::CutPipeline;

use crate::model::tof::{RoiMapping, TimeOfFlight};
use crate::slave::session::RelaxationSnapshot;

/// A named slave variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlaveVar {
    /// Binary choice: pair `(i, j)` reflects at window index `sample`.
    Binary { i: usize, j: usize, sample: usize },
    /// Continuous diameter of pair `(i, j)`.
    Diameter { i: usize, j: usize },
    /// Squared diameter of element `i`.
    Squared { i: usize },
}

/// How a cut is to be enforced by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutScope {
    /// Must hold for every integral solution; invalidates incumbents.
    Lazy,
    /// Strengthens the relaxation at the current node only.
    Node,
}

/// Which pass generated a cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutSource {
    Tangent,
    CosineRule,
}

/// A linear inequality `sum(coef * var) <= constant`.
#[derive(Debug, Clone, PartialEq)]
pub struct SlaveCut {
    pub terms: Vec<(f64, SlaveVar)>,
    pub constant: f64,
    pub source: CutSource,
}

impl SlaveCut {
    /// Left-hand-side value under a relaxation snapshot. Variables the
    /// snapshot does not carry contribute zero.
    pub fn lhs_value(&self, snapshot: &RelaxationSnapshot) -> f64 {
        self.terms
            .iter()
            .map(|(coef, var)| {
                let value = match *var {
                    SlaveVar::Binary { i, j, sample } => snapshot.binary.at(i, j, sample),
                    SlaveVar::Diameter { i, j } => {
                        snapshot.diameter.as_ref().map_or(0.0, |d| d.at(i, j))
                    }
                    SlaveVar::Squared { i } => {
                        snapshot.squared.as_deref().map_or(0.0, |q| q[i])
                    }
                };
                coef * value
            })
            .sum()
    }

    /// Positive when the snapshot violates the cut.
    pub fn violation(&self, snapshot: &RelaxationSnapshot) -> f64 {
        self.lhs_value(snapshot) - self.constant
    }

    /// Evaluates the cut on an integral signature: binaries become the
    /// indicator of the signature's window index, diameters the distances
    /// themselves.
    pub fn satisfied_by(&self, tof: &TimeOfFlight, mapping: &RoiMapping) -> bool {
        let lhs: f64 = self
            .terms
            .iter()
            .map(|(coef, var)| {
                let value = match *var {
                    SlaveVar::Binary { i, j, sample } => {
                        if mapping.to_index(tof.at(i, j)) == Some(sample) {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    SlaveVar::Diameter { i, j } => tof.at(i, j) as f64,
                    SlaveVar::Squared { i } => {
                        let d = tof.at(i, i) as f64;
                        d * d
                    }
                };
                coef * value
            })
            .sum();
        lhs <= self.constant + 1e-9
    }
}
