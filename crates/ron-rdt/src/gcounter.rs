//! Grow-only counter
//!
//! State is a single header op whose atom carries the running sum; a
//! change is a run of `add` delta ops. Reduction sums every delta since
//! the snapshot with explicit overflow checking against the configured
//! ceiling — a sum past the ceiling is an error frame, never a silent
//! wraparound.

use crate::flags;
use crate::reduce::{ReduceError, Reducer};
use ron_wire::atom::Atom;
use ron_wire::frame::Frame;
use ron_wire::op::{Op, Term};
use ron_wire::uuid::Uuid;

/// The `ctr` counter reducer.
pub struct CtrReducer {
    ceiling: i64,
}

impl CtrReducer {
    pub fn new(ceiling: i64) -> CtrReducer {
        CtrReducer { ceiling }
    }
}

impl Reducer for CtrReducer {
    fn type_id(&self) -> Uuid {
        Uuid::name("ctr")
    }

    fn features(&self) -> u32 {
        flags::OP_BASED | flags::STATE_BASED | flags::PATCH_BASED
    }

    fn reduce(
        &self,
        state: &Frame,
        change: &Frame,
        header: Op,
        out: &mut Frame,
    ) -> Result<(), ReduceError> {
        let mut sum = state
            .first_op()
            .and_then(|op| op.value(0).and_then(Atom::as_int))
            .unwrap_or(0);

        for op in change.cursor() {
            let delta = match op.value(0) {
                Some(Atom::Int(delta)) => *delta,
                // A header-led change is a snapshot: its sum replaces ours
                None if op.is_header() => continue,
                _ => return Err(ReduceError::MalformedValue),
            };
            if op.is_header() {
                sum = delta.max(sum);
                continue;
            }
            sum = sum.checked_add(delta).ok_or(ReduceError::Overflow)?;
            if sum.abs() > self.ceiling {
                return Err(ReduceError::Overflow);
            }
        }

        let header = Op::new(
            header.ty().clone(),
            header.object().clone(),
            header.event().clone(),
            header.location().clone(),
            &[Atom::Int(sum)],
            Term::Header,
        );
        out.push(&header);
        Ok(())
    }
}

/// A convenience handle over a counter's state frame.
#[derive(Clone, Debug)]
pub struct GCounter {
    object: Uuid,
    state: Frame,
    ceiling: i64,
}

impl GCounter {
    /// A fresh counter at `initial`.
    pub fn create(object: Uuid, initial: i64) -> GCounter {
        GCounter::with_ceiling(object, initial, (1 << 53) - 1)
    }

    pub fn with_ceiling(object: Uuid, initial: i64, ceiling: i64) -> GCounter {
        let header = Op::new(
            Uuid::name("ctr"),
            object.clone(),
            Uuid::zero(),
            Uuid::zero(),
            &[Atom::Int(initial)],
            Term::Header,
        );
        GCounter {
            object,
            state: Frame::of(&header),
            ceiling,
        }
    }

    /// Wrap an existing state frame.
    pub fn from_state(object: Uuid, state: Frame, ceiling: i64) -> GCounter {
        GCounter {
            object,
            state,
            ceiling,
        }
    }

    pub fn object(&self) -> &Uuid {
        &self.object
    }

    pub fn state(&self) -> &Frame {
        &self.state
    }

    /// The current sum.
    pub fn value(&self) -> i64 {
        self.state
            .first_op()
            .and_then(|op| op.value(0).and_then(Atom::as_int))
            .unwrap_or(0)
    }

    /// The increment op for `amount` stamped with `event`, without
    /// applying it.
    pub fn inc_op(&self, event: Uuid, amount: i64) -> Op {
        Op::new(
            Uuid::name("ctr"),
            self.object.clone(),
            event,
            Uuid::name("add"),
            &[Atom::Int(amount)],
            Term::Raw,
        )
    }

    /// Increment by `amount`, stamped with `event`.
    pub fn inc(&mut self, event: Uuid, amount: i64) -> Result<(), ReduceError> {
        let change = Frame::of(&self.inc_op(event, amount));
        let reducer = CtrReducer::new(self.ceiling);
        let header = Op::with_raw_atoms(
            Uuid::name("ctr"),
            self.object.clone(),
            change.first_op().map(|op| op.event().clone()).unwrap_or_default(),
            Uuid::zero(),
            String::new(),
            Term::Header,
        );
        let mut out = Frame::new();
        reducer.reduce(&self.state, &change, header, &mut out)?;
        self.state = out;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::reduce;
    use crate::registry::{RdtConfig, Registry};

    fn registry() -> Registry {
        Registry::standard(RdtConfig::default())
    }

    #[test]
    fn test_create_then_inc() {
        let mut counter = GCounter::create(Uuid::name("hits"), 4);
        counter
            .inc(Uuid::event("time1", "user"), 38)
            .unwrap();
        assert_eq!(counter.value(), 42);
    }

    #[test]
    fn test_two_increments_sum() {
        let state = Frame::from_text("*ctr#hits@0-=0!");
        let change = Frame::from_text("*ctr#hits@time1-a:add=1@time2-a:add=1");
        let out = reduce(&registry(), &state, &change);
        assert!(!out.is_error());
        let head = out.first_op().unwrap();
        assert_eq!(head.value(0), Some(&Atom::Int(2)));
        assert_eq!(head.event(), &Uuid::event("time2", "a"));
    }

    #[test]
    fn test_overflow_is_an_error_not_a_wrap() {
        let ceiling = RdtConfig::default().counter_ceiling;
        let state = Frame::of(&Op::new(
            Uuid::name("ctr"),
            Uuid::name("hits"),
            Uuid::zero(),
            Uuid::zero(),
            &[Atom::Int(ceiling)],
            Term::Header,
        ));
        let change = Frame::of(&Op::new(
            Uuid::name("ctr"),
            Uuid::name("hits"),
            Uuid::event("time1", "a"),
            Uuid::name("add"),
            &[Atom::Int(1)],
            Term::Raw,
        ));
        let out = reduce(&registry(), &state, &change);
        assert!(out.is_error());
        assert_eq!(
            out.first_op().unwrap().value(0).unwrap().as_str().unwrap(),
            "overflow"
        );
    }

    #[test]
    fn test_malformed_delta_is_an_error() {
        let state = Frame::from_text("*ctr#hits@0-=0!");
        let change = Frame::from_text("*ctr#hits@time1-a:add'one'");
        let out = reduce(&registry(), &state, &change);
        assert!(out.is_error());
        assert_eq!(
            out.first_op().unwrap().value(0).unwrap().as_str().unwrap(),
            "malformed value"
        );
    }

    #[test]
    fn test_snapshot_change_takes_max() {
        let state = Frame::from_text("*ctr#hits@time1-a=5!");
        let change = Frame::from_text("*ctr#hits@time2-b=9!");
        let out = reduce(&registry(), &state, &change);
        assert!(!out.is_error());
        assert_eq!(out.first_op().unwrap().value(0), Some(&Atom::Int(9)));
    }
}
