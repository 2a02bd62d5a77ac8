//! The replica: clock + store + reducers + switch
//!
//! One `Replica` owns a database: it authenticates streams, tracks
//! subscriptions, serializes per-object op processing, persists through
//! the store, and fans accepted ops out to subscribers and upstream.
//!
//! Per-object processing is strictly sequential (an async mutex per
//! entry); different objects interleave freely. A storage failure is
//! fatal to the in-flight request only — the source gets a generic
//! "db write error" op and the request is abandoned, never silently
//! acknowledged.

use crate::entry::{Entry, OpOutcome};
use crate::error::{ReplicaError, Result};
use crate::handshake::{HandshakeOutcome, SessionRegistry};
use crate::patch::{compute_patch, PatchBase};
use crate::store::Store;
use crate::stream::{OpStream, SubscriberHandle, LOCAL_SOURCE};
use crate::switch::Switch;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use ron_clock::CalendarClock;
use ron_rdt::{RdtConfig, Registry};
use ron_wire::frame::{self, Frame};
use ron_wire::op::Op;
use ron_wire::uuid::Uuid;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Replica tunables. The sync window and handshake wait are protocol
/// trade-offs, not constants: both are plain config fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Database name; handshakes must address it.
    pub db_name: String,
    /// This replica's origin word, the root of its session subtree.
    pub origin: String,
    /// Anchored-vector compaction window.
    pub max_sync_time_ms: i64,
    /// How long an unauthenticated stream may live.
    pub handshake_timeout_ms: u64,
    /// Reducer tunables.
    pub rdt: RdtConfig,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        ReplicaConfig {
            db_name: "db".to_string(),
            origin: "R".to_string(),
            max_sync_time_ms: 30 * 24 * 3_600_000,
            handshake_timeout_ms: 4_000,
            rdt: RdtConfig::default(),
        }
    }
}

/// Builder for replica configuration.
pub struct ReplicaConfigBuilder {
    config: ReplicaConfig,
}

impl ReplicaConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ReplicaConfig::default(),
        }
    }

    pub fn db_name(mut self, name: impl Into<String>) -> Self {
        self.config.db_name = name.into();
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.config.origin = origin.into();
        self
    }

    pub fn max_sync_time(mut self, ms: i64) -> Self {
        self.config.max_sync_time_ms = ms;
        self
    }

    pub fn handshake_timeout(mut self, ms: u64) -> Self {
        self.config.handshake_timeout_ms = ms;
        self
    }

    pub fn counter_ceiling(mut self, ceiling: i64) -> Self {
        self.config.rdt.counter_ceiling = ceiling;
        self
    }

    pub fn build(self) -> ReplicaConfig {
        self.config
    }
}

impl Default for ReplicaConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A replica over a durable store.
pub struct Replica<S: Store> {
    config: ReplicaConfig,
    clock: Mutex<CalendarClock>,
    store: Arc<S>,
    registry: Registry,
    entries: RwLock<HashMap<String, Arc<tokio::sync::Mutex<Entry>>>>,
    switch: Switch,
    sessions: Mutex<SessionRegistry>,
    sources: RwLock<HashMap<String, SubscriberHandle>>,
}

impl<S: Store> Replica<S> {
    pub fn new(config: ReplicaConfig, store: S) -> Replica<S> {
        let clock = CalendarClock::new(&config.origin);
        let sessions = SessionRegistry::new(&config.db_name, &config.origin);
        let registry = Registry::standard(config.rdt.clone());
        Replica {
            config,
            clock: Mutex::new(clock),
            store: Arc::new(store),
            registry,
            entries: RwLock::new(HashMap::new()),
            switch: Switch::new(),
            sessions: Mutex::new(sessions),
            sources: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.config.handshake_timeout_ms)
    }

    /// Issue a fresh event stamp from this replica's clock.
    pub fn issue(&self) -> Uuid {
        self.clock.lock().issue()
    }

    /// Process a stream's handshake frame.
    pub fn handshake(&self, frame: &Frame) -> HandshakeOutcome {
        self.sessions.lock().process(frame)
    }

    /// Register an authenticated source's outbound channel. Replies,
    /// patches and fan-out for this source all flow through it.
    pub fn attach(&self, handle: SubscriberHandle) {
        self.sources.write().insert(handle.id.clone(), handle);
    }

    /// Attach the upstream connection.
    pub fn attach_upstream(&self, handle: SubscriberHandle) {
        self.attach(handle.clone());
        self.switch.set_upstream(handle);
    }

    /// Tear down a source: all its subscriptions go away, and entries
    /// with no subscribers left are collected.
    pub fn detach(&self, source: &str) {
        self.switch.drop_source(source);
        self.sources.write().remove(source);
        self.collect_idle_entries();
    }

    fn reply(&self, source: &str, frame: Frame) {
        if source == LOCAL_SOURCE {
            return;
        }
        let delivered = self
            .sources
            .read()
            .get(source)
            .map(|handle| handle.deliver(frame))
            .unwrap_or(false);
        if !delivered {
            warn!(source, "reply dropped: source has no live channel");
        }
    }

    /// The entry handle for an object, loading metadata on first touch.
    async fn entry_for(&self, ty: &Uuid, object: &Uuid) -> Result<Arc<tokio::sync::Mutex<Entry>>> {
        let key = object_key(ty, object);
        if let Some(entry) = self.entries.read().get(&key) {
            return Ok(entry.clone());
        }
        let loaded = Entry::load(&self.config.db_name, ty.clone(), object.clone(), &*self.store)
            .await
            .map_err(|e| ReplicaError::StoreRead(e.to_string()))?;
        let entry = Arc::new(tokio::sync::Mutex::new(loaded));
        // Double-checked under the write lock: first loader wins.
        let mut entries = self.entries.write();
        Ok(entries.entry(key).or_insert(entry).clone())
    }

    /// Drop cached entries nobody subscribes to. The store keeps their
    /// records; this only trims the in-memory cache.
    fn collect_idle_entries(&self) {
        let mut entries = self.entries.write();
        entries.retain(|key, _| self.switch.subscriber_count(key) > 0);
    }

    /// Route one frame from an authenticated source: queries subscribe
    /// or unsubscribe, everything else is applied as ops.
    pub async fn handle_frame(&self, frame: &Frame, source: &str) -> Result<()> {
        let is_query = frame.first_op().map(|op| op.is_query()).unwrap_or(false);
        if is_query {
            if frame::is_unsubscribe(frame) {
                return self.off(frame, source).await;
            }
            let handle = self
                .sources
                .read()
                .get(source)
                .cloned()
                .ok_or_else(|| ReplicaError::StreamClosed(source.to_string()))?;
            return self.on(frame, handle).await;
        }
        self.update(frame, source).await
    }

    /// Apply the non-query ops of a frame, fanning accepted ones out.
    async fn apply_ops(&self, frame: &Frame, source: &str) -> Result<()> {
        for op in frame.cursor() {
            if op.is_header() || op.is_query() {
                continue;
            }
            if op.is_error() {
                warn!(source, op = %op, "error op from peer, dropping");
                continue;
            }
            self.apply_one(&op, source).await?;
        }
        Ok(())
    }

    async fn apply_one(&self, op: &Op, source: &str) -> Result<()> {
        self.clock.lock().see(op.event());

        let entry = self.entry_for(op.ty(), op.object()).await?;
        let mut entry = entry.lock().await;

        let outcome = match entry.apply(op, &*self.store).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Never acknowledge an unpersisted op: report and abandon
                // this request.
                warn!(source, error = %e, "store write failed");
                self.reply(source, Frame::of(&op.error_op("db write error")));
                return Err(ReplicaError::StoreWrite(e.to_string()));
            }
        };

        match outcome {
            OpOutcome::Accepted | OpOutcome::Reordered => {
                entry.meta.up_avv.see(op.event());
                let key = object_key(op.ty(), op.object());
                self.switch.fan_out(&key, &Frame::of(op), source);
            }
            OpOutcome::Echo => {}
            OpOutcome::Rejected(error) => {
                self.reply(source, Frame::of(&error));
            }
        }
        Ok(())
    }

    /// The current reduced state of an object (folds the stored log).
    pub async fn object_state(&self, ty: &Uuid, object: &Uuid) -> Result<Frame> {
        let entry = self.entry_for(ty, object).await?;
        let entry = entry.lock().await;
        compute_patch(
            &entry,
            &*self.store,
            &self.registry,
            &PatchBase::Empty,
            chrono::Utc::now().timestamp_millis(),
            self.config.max_sync_time_ms,
        )
        .await
        .map_err(|e| ReplicaError::StoreRead(e.to_string()))
    }
}

fn object_key(ty: &Uuid, object: &Uuid) -> String {
    format!("*{}#{}", ty, object)
}

#[async_trait]
impl<S: Store> OpStream for Replica<S> {
    async fn on(&self, query: &Frame, subscriber: SubscriberHandle) -> Result<()> {
        for op in query.cursor() {
            if !op.is_query() {
                continue;
            }
            if op.event().is_never() {
                self.off(&Frame::of(&op), &subscriber.id).await?;
                continue;
            }

            let entry = self.entry_for(op.ty(), op.object()).await?;
            let mut entry = entry.lock().await;

            let base = PatchBase::from_query(&op);
            let patch = compute_patch(
                &entry,
                &*self.store,
                &self.registry,
                &base,
                chrono::Utc::now().timestamp_millis(),
                self.config.max_sync_time_ms,
            )
            .await
            .map_err(|e| ReplicaError::StoreRead(e.to_string()))?;

            // Remember where this subscriber's tail read ended.
            let tip = entry.meta.tip_id();
            if !tip.is_zero() {
                entry
                    .meta
                    .bookmarks
                    .insert(subscriber.id.clone(), crate::meta::Bookmark::at(&tip));
            }

            let key = object_key(op.ty(), op.object());
            debug!(object = %key, source = %subscriber.id, "subscription on");
            subscriber.deliver(patch);
            self.switch.subscribe(&key, subscriber.clone());
        }
        Ok(())
    }

    async fn off(&self, query: &Frame, subscriber_id: &str) -> Result<()> {
        for op in query.cursor() {
            if !op.is_query() {
                continue;
            }
            let key = object_key(op.ty(), op.object());
            let remaining = self.switch.unsubscribe(&key, subscriber_id);
            debug!(object = %key, source = subscriber_id, remaining, "subscription off");
            if remaining == 0 {
                self.entries.write().remove(&key);
            }
        }
        Ok(())
    }

    async fn push(&self, frame: &Frame) -> Result<()> {
        self.apply_ops(frame, LOCAL_SOURCE).await
    }

    async fn update(&self, frame: &Frame, source: &str) -> Result<()> {
        self.apply_ops(frame, source).await
    }
}
