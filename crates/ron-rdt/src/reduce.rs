//! The generic reduction dispatcher
//!
//! `reduce(registry, state, change)` looks up the reducer registered for
//! the old state's type and merges the change into a new state frame.
//! Every failure mode — unknown type, type mismatch, query misuse,
//! capability mismatch, reducer-reported errors — comes back as a
//! synthesized *error frame*, never as a panic or a `Result` escaping
//! this boundary. Callers check [`Frame::is_error`] before trusting the
//! output; error frames replay deterministically like any other value.

use crate::flags;
use crate::registry::Registry;
use ron_wire::frame::Frame;
use ron_wire::op::{Op, Term};
use ron_wire::uuid::Uuid;
use thiserror::Error;
use tracing::debug;

/// Errors a type-specific reducer may report. The display form is the
/// violation code carried in the synthesized error op.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReduceError {
    #[error("unknown type")]
    UnknownType,

    #[error("type mismatch")]
    TypeMismatch,

    #[error("query misuse")]
    QueryMisuse,

    #[error("not op-based")]
    NotOpBased,

    #[error("not state-based")]
    NotStateBased,

    #[error("error change")]
    ErrorChange,

    #[error("bad frame")]
    BadFrame,

    #[error("overflow")]
    Overflow,

    #[error("malformed value")]
    MalformedValue,
}

/// A registered replicated data type: a pure merge function plus a
/// capability mask. Implementations must be deterministic and must not
/// panic on any input frame.
pub trait Reducer: Send + Sync {
    /// The type identifier this reducer is registered under.
    fn type_id(&self) -> Uuid;

    /// Capability flags, tested with bitwise AND.
    fn features(&self) -> u32;

    /// Merge `change` into `state`, pushing the new state's ops onto
    /// `out`. The pre-composed `header` op must be pushed first (with
    /// whatever atoms the type keeps in its header).
    fn reduce(
        &self,
        state: &Frame,
        change: &Frame,
        header: Op,
        out: &mut Frame,
    ) -> Result<(), ReduceError>;
}

/// Merge a change frame into a state frame. The result is either the new
/// state or an error frame; inspect [`Frame::is_error`].
pub fn reduce(registry: &Registry, state: &Frame, change: &Frame) -> Frame {
    let state_head = state.first_op();
    let change_head = change.first_op();

    let context = match state_head.as_ref().or(change_head.as_ref()) {
        Some(op) => op.clone(),
        None => {
            return Frame::of(&Op::zero().error_op(&ReduceError::BadFrame.to_string()))
        }
    };

    let (reducer, state_head, change_head) =
        match validate(registry, change, state_head, change_head) {
            Ok(parts) => parts,
            Err(err) => {
                debug!(code = %err, object = %context.object_key(), "reduce rejected");
                return Frame::of(&context.error_op(&err.to_string()));
            }
        };

    // The new header: the change's newest event, the old header's
    // location carried through when the old state had a real header.
    let new_event = change
        .cursor()
        .map(|op| op.event().clone())
        .max()
        .unwrap_or_else(|| change_head.event().clone());
    let location = if state_head.is_header() {
        state_head.location().clone()
    } else {
        Uuid::zero()
    };
    let header = Op::with_raw_atoms(
        state_head.ty().clone(),
        state_head.object().clone(),
        new_event,
        location,
        String::new(),
        Term::Header,
    );

    let mut out = Frame::new();
    match reducer.reduce(state, change, header, &mut out) {
        Ok(()) => out,
        Err(err) => {
            debug!(code = %err, object = %context.object_key(), "reducer failed");
            Frame::of(&context.error_op(&err.to_string()))
        }
    }
}

fn validate(
    registry: &Registry,
    change: &Frame,
    state_head: Option<Op>,
    change_head: Option<Op>,
) -> Result<(std::sync::Arc<dyn Reducer>, Op, Op), ReduceError> {
    let state_head = state_head.ok_or(ReduceError::BadFrame)?;
    let change_head = change_head.ok_or(ReduceError::BadFrame)?;

    // Queries subscribe; they carry no state and cannot be merged.
    if state_head.is_query() || change_head.is_query() {
        return Err(ReduceError::QueryMisuse);
    }

    // An upstream-reported error must not silently merge into state.
    if change.is_error() || change_head.is_error() {
        return Err(ReduceError::ErrorChange);
    }

    let reducer = registry
        .get(state_head.ty())
        .ok_or(ReduceError::UnknownType)?;
    let features = reducer.features();

    if change_head.ty() != state_head.ty() && !flags::has(features, flags::OMNIVOROUS) {
        return Err(ReduceError::TypeMismatch);
    }

    // A header-led change is a state snapshot; anything else is a run of
    // plain ops.
    if change_head.is_header() {
        if !flags::has(features, flags::STATE_BASED) {
            return Err(ReduceError::NotStateBased);
        }
    } else if !flags::has(features, flags::OP_BASED) {
        return Err(ReduceError::NotOpBased);
    }

    Ok((reducer, state_head, change_head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use ron_wire::frame::parse_frame;

    fn registry() -> Registry {
        Registry::standard(crate::RdtConfig::default())
    }

    fn frame(text: &str) -> Frame {
        Frame::from_text(text)
    }

    #[test]
    fn test_unknown_type_yields_error_frame() {
        let state = frame("*mystery#obj@time-orig!");
        let change = frame("*mystery#obj@time1-orig:key=1");
        let out = reduce(&registry(), &state, &change);
        assert!(out.is_error());
        let op = out.first_op().unwrap();
        assert_eq!(op.value(0).unwrap().as_str().unwrap(), "unknown type");
        assert_eq!(op.object(), &Uuid::name("obj"));
    }

    #[test]
    fn test_type_mismatch_yields_error_frame() {
        let state = frame("*lww#obj@time-orig!");
        let change = frame("*ctr#obj@time1-orig=1");
        let out = reduce(&registry(), &state, &change);
        assert!(out.is_error());
        assert_eq!(
            out.first_op().unwrap().value(0).unwrap().as_str().unwrap(),
            "type mismatch"
        );
    }

    #[test]
    fn test_query_misuse_yields_error_frame() {
        let state = frame("*lww#obj@time-orig!");
        let change = frame("*lww#obj@time1-orig?");
        let out = reduce(&registry(), &state, &change);
        assert!(out.is_error());
        assert_eq!(
            out.first_op().unwrap().value(0).unwrap().as_str().unwrap(),
            "query misuse"
        );
    }

    #[test]
    fn test_error_change_propagates() {
        let state = frame("*lww#obj@time-orig!");
        let change = Frame::of(
            &frame("*lww#obj@time1-orig:k=1")
                .first_op()
                .unwrap()
                .error_op("upstream failure"),
        );
        let out = reduce(&registry(), &state, &change);
        assert!(out.is_error());
        assert_eq!(
            out.first_op().unwrap().value(0).unwrap().as_str().unwrap(),
            "error change"
        );
    }

    #[test]
    fn test_header_carries_change_event_and_old_location() {
        let state = frame("*lww#obj@time-orig:prev!:key=1");
        let change = frame("*lww#obj@time2-orig:key=2");
        let out = reduce(&registry(), &state, &change);
        assert!(!out.is_error());
        let ops = parse_frame(out.body());
        assert!(ops[0].is_header());
        assert_eq!(ops[0].event(), &Uuid::event("time2", "orig"));
        assert_eq!(ops[0].location(), &Uuid::name("prev"));
    }

    #[test]
    fn test_errors_never_panic_on_empty_frames() {
        let out = reduce(&registry(), &Frame::new(), &Frame::new());
        assert!(out.is_error());
        assert_eq!(
            out.first_op().unwrap().value(0).unwrap().as_str().unwrap(),
            "bad frame"
        );
    }
}
