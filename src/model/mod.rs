//! Data model: time-of-flight signatures, columns, run statistics.

pub mod column;
pub mod stats;
pub mod tof;

pub use column::{Column, ColumnWithOrigin, Optimality, SlaveStatistics};
pub use stats::{CutStatistics, MasterStatistics, RunStatistics};
pub use tof::{RoiMapping, SymmetricChoices, SymmetricMatrix, TimeOfFlight, TofExtension, TraceMatrix};
