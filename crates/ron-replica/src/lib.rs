//! Replica, switch and log protocol for the Ronda replication engine.
//!
//! This crate owns the server side of the protocol: stream handshakes
//! and session grants, per-object sequential op processing against the
//! durable store, subscription bookkeeping with patch composition, and
//! fan-out routing between downstream subscribers and the upstream.
//!
//! # Architecture
//!
//! - [`store`] — the durable get/batch/scan contract and the in-memory
//!   implementation
//! - [`keys`] — the structured lexicographic key layout
//! - [`meta`] — the per-object metadata record (tip, state vid, anchored
//!   vector, bookmarks)
//! - [`handshake`] — session grants and the subtree rule
//! - [`entry`] — the three-way arrival logic (accept / echo / reorder)
//! - [`patch`] — tail selection by base (empty, vector, bookmark)
//! - [`switch`] / [`stream`] — subscriber registry and fan-out
//! - [`replica`] — the assembled replica

pub mod deps;
pub mod entry;
pub mod error;
pub mod handshake;
pub mod keys;
pub mod meta;
pub mod patch;
pub mod replica;
pub mod store;
pub mod stream;
pub mod switch;

pub use deps::{DepDiff, DepKind, Dependencies};
pub use entry::{Entry, OpOutcome, CAUSALITY_VIOLATION};
pub use error::{ReplicaError, Result};
pub use handshake::{HandshakeOutcome, HandshakeState, SessionRegistry};
pub use meta::{Bookmark, ObjectMeta};
pub use patch::PatchBase;
pub use replica::{Replica, ReplicaConfig, ReplicaConfigBuilder};
pub use store::{BatchOp, MemStore, Store, StoreError};
pub use stream::{OpStream, SourceId, SubscriberHandle, LOCAL_SOURCE};
pub use switch::Switch;
