//! Cross-type reduction properties: replay safety, determinism under
//! reordering, and the errors-as-values contract.

use proptest::prelude::*;
use ron_rdt::{reduce, RdtConfig, Registry};
use ron_wire::frame::{parse_frame, Frame};
use ron_wire::uuid::Uuid;
use ron_wire::Atom;

fn registry() -> Registry {
    Registry::standard(RdtConfig::default())
}

#[test]
fn echo_reduction_is_a_no_op() {
    // Applying the op the state already reflects leaves it unchanged.
    let state = Frame::from_text("*lww#doc@time3-a!:title'hello'");
    let echo = Frame::from_text("*lww#doc@time3-a:title'hello'");
    let out = reduce(&registry(), &state, &echo);
    assert!(!out.is_error());
    assert_eq!(out.body(), state.body());
}

#[test]
fn reduce_is_insensitive_to_change_arrival_order() {
    let state = Frame::from_text("*lww#doc@time1-a!:x=1");
    let ab = Frame::from_text("*lww#doc@time2-a:x=2@time3-b:y=3");
    let ba = Frame::from_text("*lww#doc@time3-b:y=3@time2-a:x=2");

    let out_ab = reduce(&registry(), &state, &ab);
    let out_ba = reduce(&registry(), &state, &ba);
    assert_eq!(out_ab.body(), out_ba.body());
}

#[test]
fn error_frames_are_data_not_panics() {
    let state = Frame::from_text("*lww#doc@time1-a!:x=1");
    let wrong_type = Frame::from_text("*ctr#doc@time2-a:add=1");
    let out = reduce(&registry(), &state, &wrong_type);
    assert!(out.is_error());

    // The error op preserves type and object so it can be routed back.
    let op = out.first_op().unwrap();
    assert_eq!(op.ty(), &Uuid::name("lww"));
    assert_eq!(op.object(), &Uuid::name("doc"));
    assert!(op.event().is_error());

    // Feeding the error frame back in as a change is itself an error.
    let again = reduce(&registry(), &state, &out);
    assert!(again.is_error());
    assert_eq!(
        again.first_op().unwrap().value(0).unwrap().as_str().unwrap(),
        "error change"
    );
}

#[test]
fn gcounter_seed_scenario() {
    use ron_rdt::GCounter;
    let mut counter = GCounter::create(Uuid::name("hits"), 4);
    counter.inc(Uuid::event("time1", "user"), 38).unwrap();
    assert_eq!(counter.value(), 42);
}

proptest! {
    #[test]
    fn lww_merge_is_deterministic_across_delivery_orders(
        values in prop::collection::vec("[a-z]{1,4}", 2..6)
    ) {
        // One distinctly-stamped op per payload, all on the same
        // location: whatever the delivery order, the same winner emerges.
        let state = Frame::from_text("*lww#doc@0-a!");
        let ops: Vec<Frame> = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                Frame::from_text(&format!("*lww#doc@time{}-a:k'{}'", i + 1, v))
            })
            .collect();

        let mut forward = state.clone();
        for op in &ops {
            let next = reduce(&registry(), &forward, op);
            prop_assert!(!next.is_error());
            forward = next;
        }

        let mut backward = state.clone();
        for op in ops.iter().rev() {
            let next = reduce(&registry(), &backward, op);
            prop_assert!(!next.is_error());
            backward = next;
        }

        // Compare the surviving body ops (headers differ by last event)
        let fw: Vec<_> = parse_frame(forward.body())
            .into_iter()
            .filter(|op| !op.is_header())
            .collect();
        let bw: Vec<_> = parse_frame(backward.body())
            .into_iter()
            .filter(|op| !op.is_header())
            .collect();
        prop_assert_eq!(fw, bw);
    }

    #[test]
    fn ctr_sum_matches_arithmetic(
        initial in 0i64..1000,
        deltas in prop::collection::vec(1i64..100, 1..10)
    ) {
        use ron_rdt::GCounter;
        let mut counter = GCounter::create(Uuid::name("hits"), initial);
        for (i, delta) in deltas.iter().enumerate() {
            let stamp = format!("t{}", i + 1);
            counter.inc(Uuid::event(&stamp, "user"), *delta).unwrap();
        }
        let expected: i64 = initial + deltas.iter().sum::<i64>();
        prop_assert_eq!(counter.value(), expected);
    }
}

#[test]
fn log_accepts_anything_and_dedupes() {
    let state = Frame::from_text("*log#inbox@time1-a!:e'hello'");
    let mixed = Frame::from_text("*lww#inbox@time2-b:k'v'");
    let out = reduce(&registry(), &state, &mixed);
    assert!(!out.is_error());

    // Replay of the merged state against the same change adds nothing.
    let again = reduce(&registry(), &out, &mixed);
    let ops: Vec<_> = parse_frame(again.body())
        .into_iter()
        .filter(|op| !op.is_header())
        .collect();
    assert_eq!(ops.len(), 2);
    assert_eq!(
        ops[0].value(0),
        Some(&Atom::String("hello".to_string()))
    );
}
