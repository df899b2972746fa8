//! Column-generation core for reflector localization from array
//! time-of-flight measurements.
//!
//! A measurement is a `senders x receivers x samples` trace matrix; a
//! reflector is a symmetric matrix of round-trip sample distances (a
//! time-of-flight signature). The crate reconstructs a sparse set of
//! reflectors whose weighted simulated responses explain the measurement,
//! by Dantzig-Wolfe decomposition:
//!
//! * the restricted [`master`](crate::master) fits non-negative amplitudes
//!   over the signatures found so far and exposes its residual as the dual
//!   signal,
//! * asynchronous [`slave`](crate::slave) workers search for new
//!   signatures maximizing the inner product with that dual, exchanging
//!   candidates through a shared [`pool`](crate::pool),
//! * the [`colgen`](crate::colgen) loop alternates the two until a
//!   certified slave solve proves that no worthwhile signature remains.
//!
//! Slave solvers plug in through [`slave::SolverSession`];
//! [`slave::EnumerationSession`] is the built-in reference implementation.
//!
//! ```no_run
//! use colgen_core::colgen::{ColumnGeneration, WarmStart};
//! use colgen_core::master::ResidualMaster;
//! use colgen_core::model::tof::{RoiMapping, TraceMatrix};
//! use colgen_core::settings::CgSettings;
//! use colgen_core::slave::{EnumerationSession, SolverSession};
//!
//! # fn main() -> colgen_core::error::CgResult<()> {
//! let elements = 2;
//! let measurement = TraceMatrix::zeros(elements, elements, 64);
//! let reference = TraceMatrix::zeros(elements, elements, 8);
//!
//! let settings = CgSettings::for_geometry(elements, 10, 40).with_parallel_slaves(2);
//! let mapping = RoiMapping { offset: 10, horizon: 40 };
//! let sessions: Vec<Box<dyn SolverSession>> = (0..2)
//!     .map(|_| {
//!         Box::new(EnumerationSession::new(elements, mapping, 0.5)) as Box<dyn SolverSession>
//!     })
//!     .collect();
//!
//! let master = ResidualMaster::new(measurement, reference.clone(), Some(1e-6))?;
//! let mut generation = ColumnGeneration::new(master, sessions, reference, settings);
//! let outcome = generation.run(WarmStart::default())?;
//! println!("{} reflectors, stop: {:?}", outcome.columns.len(), outcome.stop);
//! # Ok(())
//! # }
//! ```

pub mod colgen;
pub mod cuts;
pub mod error;
pub mod master;
pub mod model;
pub mod pool;
pub mod settings;
pub mod slave;

pub use colgen::{CgOutcome, ColumnGeneration, StopReason, WarmStart};
pub use error::{CgError, CgResult};
pub use master::{MasterBackend, ResidualMaster};
pub use model::{Column, TimeOfFlight, TraceMatrix};
pub use pool::ConstraintPool;
pub use settings::{CgSettings, CutSelection};
pub use slave::{EnumerationSession, SolverSession};
