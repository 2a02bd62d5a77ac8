//! Clocks and causal-context tracking for the Ronda replication engine.
//!
//! - [`logical`]: the plain Lamport clock over the base64 alphabet
//! - [`calendar`]: the wall-clock-approximating variant with bounded
//!   offset correction
//! - [`vv`]: version vectors (per-origin frontier of seen events)
//! - [`avv`]: anchored version vectors, the bounded-size compaction used
//!   in subscription handshakes

pub mod avv;
pub mod calendar;
pub mod logical;
pub mod vv;

pub use avv::AnchoredVv;
pub use calendar::CalendarClock;
pub use logical::LogicalClock;
pub use vv::VersionVector;
