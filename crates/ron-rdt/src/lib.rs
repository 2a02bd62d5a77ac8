//! Replicated data types for the Ronda replication engine.
//!
//! Every type is a pure reduction function `reduce(old_state, change) →
//! new_state` registered under its type identifier. Dispatch, validation
//! and the errors-as-frames contract live in [`reduce`]; the registry is
//! an explicit value (dependency-injected, never a process-wide
//! singleton) so isolated registries can coexist in one process.

pub mod flags;
pub mod gcounter;
pub mod lww;
pub mod rawlog;
pub mod reduce;
pub mod registry;

pub use gcounter::{CtrReducer, GCounter};
pub use lww::LwwReducer;
pub use rawlog::LogReducer;
pub use reduce::{reduce, ReduceError, Reducer};
pub use registry::{RdtConfig, Registry};
