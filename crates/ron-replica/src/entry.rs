//! Per-object op processing
//!
//! Each object's ops are processed strictly sequentially; the tail-scan
//! and back-reference logic below assumes it sees a consistent,
//! non-concurrently-mutated view of the stored tail for one object at a
//! time. The replica enforces that with one async mutex per entry —
//! different objects interleave freely, the same object never does.
//!
//! An incoming op lands in one of three cases against the stored tip:
//!
//! 1. strictly newer — the fast path: accept, advance the tip, persist,
//!    forward;
//! 2. exactly the tip — an echo: accept silently, write nothing, forward
//!    nothing;
//! 3. older than the tip — a reorder: scan the stored tail past the op's
//!    stamp; a stored op from the *same origin* already past this stamp
//!    means the origin's own order was broken (causality violation,
//!    reject), otherwise accept with a back-reference recording the
//!    discontinuity so later tail reads can reconstruct delivery order.

use crate::keys;
use crate::meta::ObjectMeta;
use crate::store::{BatchOp, Store, StoreError};
use ron_wire::op::Op;
use ron_wire::uuid::Uuid;
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Violation code carried in the rejection error op.
pub const CAUSALITY_VIOLATION: &str = "causality violation";

/// What the entry decided about one op.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpOutcome {
    /// Strictly new: persisted and forwarded.
    Accepted,
    /// Replay of the current tip: nothing written, nothing forwarded.
    Echo,
    /// Legitimate out-of-order arrival: persisted with a back-reference,
    /// forwarded.
    Reordered,
    /// Causality violation: not persisted, not forwarded; the error op
    /// goes back to the source.
    Rejected(Op),
}

impl OpOutcome {
    /// Whether the op should be fanned out to subscribers and upstream.
    pub fn forwards(&self) -> bool {
        matches!(self, OpOutcome::Accepted | OpOutcome::Reordered)
    }
}

/// Sequential per-object processor state. Owned behind the entry mutex;
/// `meta` is the write-through cache of the stored metadata record.
#[derive(Clone, Debug)]
pub struct Entry {
    db: String,
    ty: Uuid,
    object: Uuid,
    pub meta: ObjectMeta,
}

impl Entry {
    pub fn new(db: impl Into<String>, ty: Uuid, object: Uuid, meta: ObjectMeta) -> Entry {
        Entry {
            db: db.into(),
            ty,
            object,
            meta,
        }
    }

    /// Load an entry's metadata from the store, or start fresh.
    pub async fn load<S: Store>(
        db: &str,
        ty: Uuid,
        object: Uuid,
        store: &S,
    ) -> Result<Entry, StoreError> {
        let meta = match store.get(&keys::meta_key(db, &ty, &object)).await? {
            Some(json) => ObjectMeta::from_json(&json),
            None => ObjectMeta::new(),
        };
        Ok(Entry::new(db, ty, object, meta))
    }

    pub fn ty(&self) -> &Uuid {
        &self.ty
    }

    pub fn object(&self) -> &Uuid {
        &self.object
    }

    /// Process one op against the stored tail. Persisting and the meta
    /// update happen in one batch; a failed batch leaves the entry
    /// unchanged and surfaces as a store error (the caller reports
    /// "db write error" to the source and abandons the request).
    pub async fn apply<S: Store>(&mut self, op: &Op, store: &S) -> Result<OpOutcome, StoreError> {
        let stamp = op.event().clone();
        let tip = self.meta.tip_id();

        match stamp.cmp(&tip) {
            Ordering::Greater => {
                let mut meta = self.meta.clone();
                meta.set_tip(&stamp);
                store
                    .batch(vec![
                        BatchOp::put(
                            keys::op_key(&self.db, &self.ty, &self.object, &stamp),
                            op.to_string(),
                        ),
                        BatchOp::put(
                            keys::meta_key(&self.db, &self.ty, &self.object),
                            meta.to_json(),
                        ),
                    ])
                    .await?;
                self.meta = meta;
                debug!(object = %self.object, stamp = %stamp, "op accepted");
                Ok(OpOutcome::Accepted)
            }
            Ordering::Equal => {
                debug!(object = %self.object, stamp = %stamp, "exact echo, no-op");
                Ok(OpOutcome::Echo)
            }
            Ordering::Less => self.apply_reordered(op, &stamp, &tip, store).await,
        }
    }

    /// The out-of-order path: scan the stored tail past `stamp` looking
    /// for a same-origin op that already overtook it.
    async fn apply_reordered<S: Store>(
        &mut self,
        op: &Op,
        stamp: &Uuid,
        tip: &Uuid,
        store: &S,
    ) -> Result<OpOutcome, StoreError> {
        // A redelivery of an op already in the tail is an echo, exactly
        // like a replay of the tip.
        let own_key = keys::op_key(&self.db, &self.ty, &self.object, stamp);
        if store.get(&own_key).await?.is_some() {
            debug!(object = %self.object, stamp = %stamp, "old-op echo, no-op");
            return Ok(OpOutcome::Echo);
        }

        let (gte, lt) = keys::op_scan_after(&self.db, &self.ty, &self.object, stamp);
        let tail = store.scan(&gte, &lt).await?;

        for (key, value) in &tail {
            if !keys::is_op_key(key) {
                continue;
            }
            let stored = match Op::parse(value, &Op::zero()) {
                Some(stored) => stored,
                None => continue,
            };
            if stored.event().origin() == stamp.origin() {
                warn!(
                    object = %self.object,
                    stamp = %stamp,
                    overtaken_by = %stored.event(),
                    "causality violation"
                );
                return Ok(OpOutcome::Rejected(op.error_op(CAUSALITY_VIOLATION)));
            }
        }

        // A legitimate reorder: persist, and record where the tip stood
        // when this op arrived so tail reads can reconstruct delivery
        // order across the discontinuity.
        store
            .batch(vec![
                BatchOp::put(
                    keys::op_key(&self.db, &self.ty, &self.object, stamp),
                    op.to_string(),
                ),
                BatchOp::put(
                    keys::backref_key(&self.db, &self.ty, &self.object, stamp),
                    tip.to_string(),
                ),
                BatchOp::put(
                    keys::meta_key(&self.db, &self.ty, &self.object),
                    self.meta.to_json(),
                ),
            ])
            .await?;
        debug!(object = %self.object, stamp = %stamp, tip = %tip, "reorder accepted");
        Ok(OpOutcome::Reordered)
    }

    /// Every stored op of this object, oldest first.
    pub async fn stored_ops<S: Store>(&self, store: &S) -> Result<Vec<Op>, StoreError> {
        let (gte, lt) = keys::op_scan_all(&self.db, &self.ty, &self.object);
        let rows = store.scan(&gte, &lt).await?;
        Ok(rows
            .iter()
            .filter(|(k, _)| keys::is_op_key(k))
            .filter_map(|(_, v)| Op::parse(v, &Op::zero()))
            .collect())
    }
}
