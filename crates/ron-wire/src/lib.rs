//! Wire layer of the Ronda replication engine: the base64 integer codec,
//! the context-relative identifier model, the declarative token grammar,
//! and the op/frame serialization it all feeds into.
//!
//! Parse failures in this layer are values, not panics: identifiers fall
//! back to the [`uuid::Uuid::error`] sentinel and op parsing returns
//! `None`, so a scanner can isolate one bad token and keep going.

pub mod atom;
pub mod base64;
pub mod frame;
pub mod grammar;
pub mod op;
pub mod uuid;

pub use atom::{Atom, AtomError};
pub use base64::{base2int, int2base, CodecError};
pub use frame::{Cursor, Frame};
pub use grammar::GrammarError;
pub use op::{Op, Term};
pub use uuid::{Sep, Uuid};
