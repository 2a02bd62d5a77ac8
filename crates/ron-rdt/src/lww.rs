//! Last-Writer-Wins object
//!
//! State is a header plus one op per location key; a change overwrites a
//! location only when its event identifier is strictly greater than the
//! stored one. The event order is the identifier order, so the reversed
//! origin tie-break decides races between same-instant writers
//! deterministically on every replica.

use crate::flags;
use crate::reduce::{ReduceError, Reducer};
use ron_wire::frame::Frame;
use ron_wire::op::Op;
use ron_wire::uuid::Uuid;
use std::collections::BTreeMap;

/// The `lww` object reducer.
pub struct LwwReducer;

impl Reducer for LwwReducer {
    fn type_id(&self) -> Uuid {
        Uuid::name("lww")
    }

    fn features(&self) -> u32 {
        flags::OP_BASED | flags::STATE_BASED | flags::PATCH_BASED | flags::IDEMPOTENT
    }

    fn reduce(
        &self,
        state: &Frame,
        change: &Frame,
        header: Op,
        out: &mut Frame,
    ) -> Result<(), ReduceError> {
        // Location key → winning op, ordered by location for determinism.
        let mut slots: BTreeMap<String, Op> = BTreeMap::new();

        let mut absorb = |op: Op| {
            if op.is_header() {
                return;
            }
            let key = op.location().to_string();
            let wins = match slots.get(&key) {
                Some(existing) => op.event() > existing.event(),
                None => true,
            };
            if wins {
                slots.insert(key, op);
            }
        };

        for op in state.cursor() {
            absorb(op);
        }
        for op in change.cursor() {
            absorb(op);
        }

        out.push(&header);
        for op in slots.values() {
            out.push(op);
        }
        Ok(())
    }
}
