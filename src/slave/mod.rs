//! Slave side: solver sessions, workers, the async pool manager and the
//! heuristics running inside the solve callbacks.

pub mod enumerate;
pub mod heuristics;
pub mod logbuf;
pub mod manager;
pub mod session;
pub mod worker;

pub use enumerate::EnumerationSession;
pub use heuristics::{Randomisation, Rate};
pub use logbuf::{PrintGate, WorkerLog};
pub use manager::SlavePool;
pub use session::{
    CancelToken, Incumbent, NodeControls, RelaxationSnapshot, SessionEvents, SolveOutcome,
    SolveStatus, SolverSession,
};
pub use worker::{SharedProgress, SlaveWorker};
