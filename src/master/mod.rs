//! Master side of the decomposition: the restricted problem over the
//! columns generated so far.

pub mod backend;
pub mod residual;

pub use backend::{MasterBackend, MasterColumn, MasterSolve};
pub use residual::ResidualMaster;
