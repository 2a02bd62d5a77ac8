//! End-to-end replica scenarios: handshake outcomes, subscription
//! fan-out, persistence idempotence, causality rejection, and the
//! db-write-error path.

use async_trait::async_trait;
use ron_replica::{
    BatchOp, HandshakeOutcome, MemStore, OpStream, Replica, ReplicaConfigBuilder, Store,
    StoreError, SubscriberHandle,
};
use ron_wire::frame::{parse_frame, Frame};
use ron_wire::op::{Op, Term};
use ron_wire::uuid::Uuid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn replica() -> Replica<MemStore> {
    let config = ReplicaConfigBuilder::new()
        .db_name("mydb")
        .origin("X")
        .build();
    Replica::new(config, MemStore::new())
}

fn set_op(event: &str, origin: &str, key: &str, value: &str) -> Op {
    Op::with_raw_atoms(
        Uuid::name("lww"),
        Uuid::name("id"),
        Uuid::event(event, origin),
        Uuid::name(key),
        format!("'{}'", value),
        Term::Raw,
    )
}

fn subscribe_query() -> Frame {
    Frame::of(&Op::with_raw_atoms(
        Uuid::name("lww"),
        Uuid::name("id"),
        Uuid::zero(),
        Uuid::zero(),
        String::new(),
        Term::Query,
    ))
}

#[tokio::test]
async fn handshake_accept_then_reject_strings() {
    let replica = replica();

    // Fresh identity: a zero-valued stamp gets a session grant
    let fresh = Frame::from_text("*db#mydb@0-!");
    match replica.handshake(&fresh) {
        HandshakeOutcome::Accepted { session, .. } => {
            assert!(session.origin().starts_with('X'));
        }
        other => panic!("expected acceptance, got {:?}", other),
    }

    // Wrong database: exact reason string
    let wrong_db = Frame::from_text("*db#otherdb@0-!");
    match replica.handshake(&wrong_db) {
        HandshakeOutcome::Rejected { reason, .. } => {
            assert_eq!(reason, "wrong database id");
        }
        other => panic!("expected rejection, got {:?}", other),
    }

    // Out-of-subtree session: exact reason string
    let foreign = Frame::from_text("*db#mydb@time1-Zq!");
    match replica.handshake(&foreign) {
        HandshakeOutcome::Rejected { reason, .. } => {
            assert_eq!(reason, "wrong ssn (wrong subtree)");
        }
        other => panic!("expected rejection, got {:?}", other),
    }

    // Not a handshake at all
    let noise = Frame::from_text("*lww#id@time1-Xa:key'v'");
    match replica.handshake(&noise) {
        HandshakeOutcome::Rejected { reason, .. } => {
            assert_eq!(reason, "no handshake");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn accepted_op_echoes_to_other_subscribers_and_persists_once() {
    let replica = replica();

    let (writer, mut writer_rx) = SubscriberHandle::channel("Xa");
    let (watcher, mut watcher_rx) = SubscriberHandle::channel("Xb");
    let (upstream, mut upstream_rx) = SubscriberHandle::channel("up");
    replica.attach(writer.clone());
    replica.attach(watcher.clone());
    replica.attach_upstream(upstream);

    replica.on(&subscribe_query(), writer).await.unwrap();
    replica.on(&subscribe_query(), watcher).await.unwrap();
    // Both subscribers got their initial (empty-state) patch
    assert!(writer_rx.try_recv().is_ok());
    assert!(watcher_rx.try_recv().is_ok());

    // The writer sends one set op
    let op = set_op("time1", "Xa", "set", "value");
    replica
        .update(&Frame::of(&op), "Xa")
        .await
        .unwrap();

    // Echoed to the *other* subscriber and to upstream, not the source
    let to_watcher = watcher_rx.try_recv().expect("watcher gets the op");
    assert_eq!(
        parse_frame(to_watcher.body())[0].event(),
        &Uuid::event("time1", "Xa")
    );
    assert!(upstream_rx.try_recv().is_ok(), "upstream gets the op");
    assert!(writer_rx.try_recv().is_err(), "source gets no echo");

    // Exactly one op record persisted, keyed by the event stamp
    let ops: Vec<_> = replica
        .store()
        .dump()
        .into_iter()
        .filter(|(k, _)| k.ends_with(".op"))
        .collect();
    assert_eq!(ops.len(), 1);
    assert!(ops[0].0.contains("time100000-Xa"));

    // Second delivery of the identical op: zero writes, zero forwards
    let before = replica.store().dump();
    replica
        .update(&Frame::of(&op), "Xa")
        .await
        .unwrap();
    assert_eq!(replica.store().dump(), before, "echo must not write");
    assert!(watcher_rx.try_recv().is_err(), "echo must not forward");
    assert!(upstream_rx.try_recv().is_err());
}

#[tokio::test]
async fn causality_violation_is_rejected_and_not_persisted() {
    let replica = replica();

    let (peer, mut peer_rx) = SubscriberHandle::channel("Xa");
    replica.attach(peer.clone());
    replica.on(&subscribe_query(), peer).await.unwrap();
    let _ = peer_rx.try_recv();

    // time2 from origin Xa lands first
    replica
        .update(&Frame::of(&set_op("time2", "Xa", "k", "second")), "Xa")
        .await
        .unwrap();
    let before = replica.store().dump();

    // time1 from the same origin arrives late: its own origin already
    // has a stored op past it
    replica
        .update(&Frame::of(&set_op("time1", "Xa", "k", "first")), "Xa")
        .await
        .unwrap();

    // Not persisted, and the source got a causality-violation error op
    assert_eq!(replica.store().dump(), before);
    let reply = peer_rx.try_recv().expect("source must get the error");
    let error = parse_frame(reply.body());
    assert!(error[0].is_error());
    assert_eq!(
        error[0].value(0).unwrap().as_str().unwrap(),
        "causality violation"
    );
}

#[tokio::test]
async fn reorder_across_origins_is_accepted_and_forwarded() {
    let replica = replica();

    let (watcher, mut watcher_rx) = SubscriberHandle::channel("Xw");
    replica.attach(watcher.clone());
    replica.on(&subscribe_query(), watcher).await.unwrap();
    let _ = watcher_rx.try_recv();

    replica
        .update(&Frame::of(&set_op("time2", "Xb", "k", "later")), "Xb")
        .await
        .unwrap();
    let _ = watcher_rx.try_recv();

    replica
        .update(&Frame::of(&set_op("time1", "Xa", "k", "earlier")), "Xa")
        .await
        .unwrap();

    // Forwarded despite arriving out of order
    let forwarded = watcher_rx.try_recv().expect("reorder still forwards");
    assert_eq!(
        parse_frame(forwarded.body())[0].event(),
        &Uuid::event("time1", "Xa")
    );

    // Both ops and one back-reference are in the store
    let dump = replica.store().dump();
    assert_eq!(dump.iter().filter(|(k, _)| k.ends_with(".op")).count(), 2);
    assert_eq!(dump.iter().filter(|(k, _)| k.ends_with(".br")).count(), 1);
}

#[tokio::test]
async fn unsubscribe_stops_fan_out_and_collects_the_entry() {
    let replica = replica();

    let (watcher, mut watcher_rx) = SubscriberHandle::channel("Xw");
    replica.attach(watcher.clone());
    replica.on(&subscribe_query(), watcher).await.unwrap();
    let _ = watcher_rx.try_recv();

    // Unsubscribe: a query whose terminal op carries the NEVER event
    let off = Frame::of(&Op::with_raw_atoms(
        Uuid::name("lww"),
        Uuid::name("id"),
        Uuid::never(),
        Uuid::zero(),
        String::new(),
        Term::Query,
    ));
    replica.handle_frame(&off, "Xw").await.unwrap();

    replica
        .update(&Frame::of(&set_op("time1", "Xa", "k", "v")), "Xa")
        .await
        .unwrap();
    assert!(
        watcher_rx.try_recv().is_err(),
        "no fan-out after unsubscribe"
    );
}

#[tokio::test]
async fn subscription_patch_reflects_stored_state() {
    let replica = replica();

    replica
        .push(&Frame::of(&set_op("time1", "X", "title", "hello")))
        .await
        .unwrap();
    replica
        .push(&Frame::of(&set_op("time2", "X", "title", "world")))
        .await
        .unwrap();

    let (late, mut late_rx) = SubscriberHandle::channel("Xl");
    replica.attach(late.clone());
    replica.on(&subscribe_query(), late).await.unwrap();

    let patch = late_rx.try_recv().expect("late joiner gets a patch");
    let ops = parse_frame(patch.body());
    assert!(ops[0].is_header());
    assert_eq!(ops[0].event(), &Uuid::event("time2", "X"));
    // LWW snapshot carries the newest title only
    assert_eq!(ops.len(), 2);
    assert_eq!(
        ops[1].value(0).unwrap().as_str().unwrap(),
        "world"
    );
}

/// A store whose next batch can be made to fail, for the write-error
/// path.
#[derive(Default)]
struct FlakyStore {
    inner: MemStore,
    fail_next: AtomicBool,
}

#[async_trait]
impl Store for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Write("disk full".to_string()));
        }
        self.inner.batch(ops).await
    }

    async fn scan(&self, gte: &str, lt: &str) -> Result<Vec<(String, String)>, StoreError> {
        self.inner.scan(gte, lt).await
    }
}

#[tokio::test]
async fn store_failure_reports_db_write_error_and_abandons_request() {
    let config = ReplicaConfigBuilder::new()
        .db_name("mydb")
        .origin("X")
        .build();
    let store = FlakyStore::default();
    store.fail_next.store(true, Ordering::SeqCst);
    let replica = Replica::new(config, store);

    let (peer, mut peer_rx) = SubscriberHandle::channel("Xa");
    replica.attach(peer);

    let result = replica
        .update(&Frame::of(&set_op("time1", "Xa", "k", "v")), "Xa")
        .await;
    assert!(result.is_err(), "the in-flight request is abandoned");

    let reply = peer_rx.try_recv().expect("source is told about the failure");
    let ops = parse_frame(reply.body());
    assert!(ops[0].is_error());
    assert_eq!(ops[0].value(0).unwrap().as_str().unwrap(), "db write error");

    // Nothing was acknowledged or persisted
    assert!(replica.store().inner.dump().is_empty());

    // The replica recovers on the next request
    let ok = replica
        .update(&Frame::of(&set_op("time2", "Xa", "k", "v2")), "Xa")
        .await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn vector_base_subscription_skips_known_ops() {
    let replica = replica();

    replica
        .push(&Frame::of(&set_op("time1", "Xa", "a", "1")))
        .await
        .unwrap();
    replica
        .push(&Frame::of(&set_op("time2", "Xb", "b", "2")))
        .await
        .unwrap();

    // The requester already has everything from Xa
    let query = Frame::of(&Op::new(
        Uuid::name("lww"),
        Uuid::name("id"),
        Uuid::zero(),
        Uuid::zero(),
        &[ron_wire::Atom::String("@time9-Xa".to_string())],
        Term::Query,
    ));
    let (peer, mut peer_rx) = SubscriberHandle::channel("Xp");
    replica.attach(peer.clone());
    replica.on(&query, peer).await.unwrap();

    let patch = peer_rx.try_recv().expect("patch delivered");
    let ops = parse_frame(patch.body());
    // Header plus only Xb's op; Xa's is covered by the vector
    assert!(ops[0].is_header());
    let body: Vec<_> = ops[1..].iter().map(|o| o.event().to_string()).collect();
    assert_eq!(body, vec!["time2-Xb"]);
}
