//! Patch composition for subscriptions
//!
//! A `.on` query carries a *base* describing what the requester already
//! has; the patch is the minimal stored tail they are missing. The base
//! is one of:
//!
//! - nothing — the requester is empty: send the reduced state snapshot;
//! - a version vector — send everything the vector does not cover, after
//!   compacting it into an anchored vector so handshake metadata stays
//!   bounded regardless of replica-set churn;
//! - a bookmark — a log position from a previous session: a cheap
//!   O(tail) scan, no vector math.

use crate::entry::Entry;
use crate::store::{Store, StoreError};
use ron_clock::{AnchoredVv, VersionVector};
use ron_wire::atom::Atom;
use ron_wire::frame::Frame;
use ron_wire::op::{Op, Term};
use ron_wire::uuid::Uuid;
use ron_rdt::{reduce, Registry};
use tracing::debug;

/// What the requester already has.
#[derive(Clone, Debug, PartialEq)]
pub enum PatchBase {
    /// Nothing: a full state snapshot is due.
    Empty,
    /// A version vector: send what it does not cover.
    Vector(VersionVector),
    /// A log-position bookmark: send the tail after it.
    Bookmark(String),
}

impl PatchBase {
    /// Read the base out of a query op's atoms: a string atom is a
    /// version-vector text, an identifier atom is a bookmark, nothing is
    /// the empty base.
    pub fn from_query(op: &Op) -> PatchBase {
        match op.value(0) {
            Some(Atom::String(text)) if !text.is_empty() => {
                PatchBase::Vector(VersionVector::parse_text(text))
            }
            Some(Atom::Uuid(id)) if !id.is_zero() => {
                PatchBase::Bookmark(crate::meta::Bookmark::at(id).position)
            }
            _ => PatchBase::Empty,
        }
    }
}

/// Compose the patch for one object against a base. The response frame
/// opens with a header op stamped with the object's tip.
pub async fn compute_patch<S: Store>(
    entry: &Entry,
    store: &S,
    registry: &Registry,
    base: &PatchBase,
    now_ms: i64,
    max_sync_ms: i64,
) -> Result<Frame, StoreError> {
    let tip = entry.meta.tip_id();
    let header = Op::with_raw_atoms(
        entry.ty().clone(),
        entry.object().clone(),
        tip.clone(),
        Uuid::zero(),
        String::new(),
        Term::Header,
    );

    let ops = entry.stored_ops(store).await?;

    let patch = match base {
        PatchBase::Empty => {
            // Fold the whole log into a state snapshot.
            let mut state = Frame::of(&header);
            for op in &ops {
                let next = reduce(registry, &state, &Frame::of(op));
                if next.is_error() {
                    // Unknown type or a malformed stored op: fall back to
                    // shipping the raw tail.
                    debug!(object = %entry.object(), "snapshot fold failed, sending raw tail");
                    let mut raw = Frame::of(&header);
                    for op in &ops {
                        raw.push(op);
                    }
                    return Ok(raw);
                }
                state = next;
            }
            state
        }
        PatchBase::Vector(vv) => {
            let avv = AnchoredVv::compact(vv, now_ms, max_sync_ms);
            let mut frame = Frame::of(&header);
            for op in &ops {
                if !avv.covers(op.event()) {
                    frame.push(op);
                }
            }
            frame
        }
        PatchBase::Bookmark(position) => {
            let mut frame = Frame::of(&header);
            for op in &ops {
                let op_position = crate::meta::Bookmark::at(op.event()).position;
                if op_position.as_str() > position.as_str() {
                    frame.push(op);
                }
            }
            frame
        }
    };

    Ok(patch)
}
