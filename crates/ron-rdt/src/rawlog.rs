//! Raw op log
//!
//! An omnivorous append-only container: it accepts changes of any type
//! and keeps every op it has ever seen, deduplicated by event identifier.
//! Useful as a catch-all for objects whose type has no richer reducer,
//! and as the storage shape for tail reads.

use crate::flags;
use crate::reduce::{ReduceError, Reducer};
use ron_wire::frame::Frame;
use ron_wire::op::Op;
use ron_wire::uuid::Uuid;
use std::collections::BTreeSet;

/// The `log` reducer.
pub struct LogReducer;

impl Reducer for LogReducer {
    fn type_id(&self) -> Uuid {
        Uuid::name("log")
    }

    fn features(&self) -> u32 {
        flags::OP_BASED
            | flags::STATE_BASED
            | flags::PATCH_BASED
            | flags::OMNIVOROUS
            | flags::IDEMPOTENT
    }

    fn reduce(
        &self,
        state: &Frame,
        change: &Frame,
        header: Op,
        out: &mut Frame,
    ) -> Result<(), ReduceError> {
        out.push(&header);
        let mut seen: BTreeSet<Uuid> = BTreeSet::new();
        for op in state.cursor().chain(change.cursor()) {
            if op.is_header() {
                continue;
            }
            if seen.insert(op.event().clone()) {
                out.push(&op);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::reduce;
    use crate::registry::{RdtConfig, Registry};
    use ron_wire::frame::parse_frame;

    fn registry() -> Registry {
        Registry::standard(RdtConfig::default())
    }

    #[test]
    fn test_appends_in_arrival_order() {
        let state = Frame::from_text("*log#notes@time1-a!:e'one'");
        let change = Frame::from_text("*log#notes@time2-b:e'two'");
        let out = reduce(&registry(), &state, &change);
        assert!(!out.is_error());
        let ops = parse_frame(out.body());
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[1].event(), &Uuid::event("time1", "a"));
        assert_eq!(ops[2].event(), &Uuid::event("time2", "b"));
    }

    #[test]
    fn test_omnivorous_accepts_other_types() {
        let state = Frame::from_text("*log#notes@time1-a!");
        let change = Frame::from_text("*lww#notes@time2-b:key'v'");
        let out = reduce(&registry(), &state, &change);
        assert!(!out.is_error());
        let ops = parse_frame(out.body());
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].ty(), &Uuid::name("lww"));
    }

    #[test]
    fn test_replay_dedupes_by_event() {
        let state = Frame::from_text("*log#notes@time1-a!:e'one'");
        let change = Frame::from_text("*log#notes@time1-a:e'one'");
        let out = reduce(&registry(), &state, &change);
        let ops = parse_frame(out.body());
        assert_eq!(ops.len(), 2, "echoed op must not duplicate");
    }
}
