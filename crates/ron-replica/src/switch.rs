//! The switch: subscriber bookkeeping and op fan-out
//!
//! One registry maps object keys to subscriber handles; a separate slot
//! holds the upstream. Accepted ops fan out to every subscriber except
//! the op's own source, and up to the upstream unless that is where the
//! op came from. Dead channels are reaped during fan-out.

use crate::stream::{SourceId, SubscriberHandle};
use parking_lot::RwLock;
use ron_wire::frame::Frame;
use std::collections::HashMap;
use tracing::debug;

/// Subscriber registry plus upstream routing.
#[derive(Debug, Default)]
pub struct Switch {
    subscribers: RwLock<HashMap<String, Vec<SubscriberHandle>>>,
    upstream: RwLock<Option<SubscriberHandle>>,
}

impl Switch {
    pub fn new() -> Switch {
        Switch::default()
    }

    /// Attach the upstream handle.
    pub fn set_upstream(&self, handle: SubscriberHandle) {
        *self.upstream.write() = Some(handle);
    }

    pub fn upstream_id(&self) -> Option<SourceId> {
        self.upstream.read().as_ref().map(|h| h.id.clone())
    }

    /// Register a subscriber for an object. A source subscribing twice
    /// replaces its previous handle.
    pub fn subscribe(&self, object_key: &str, handle: SubscriberHandle) {
        let mut subscribers = self.subscribers.write();
        let list = subscribers.entry(object_key.to_string()).or_default();
        list.retain(|existing| existing.id != handle.id);
        list.push(handle);
        debug!(object = object_key, count = list.len(), "subscribed");
    }

    /// Remove a source's subscription; returns how many subscribers
    /// remain (the garbage-collection signal).
    pub fn unsubscribe(&self, object_key: &str, source: &str) -> usize {
        let mut subscribers = self.subscribers.write();
        let remaining = match subscribers.get_mut(object_key) {
            Some(list) => {
                list.retain(|handle| handle.id != source);
                list.len()
            }
            None => 0,
        };
        if remaining == 0 {
            subscribers.remove(object_key);
        }
        debug!(object = object_key, remaining, "unsubscribed");
        remaining
    }

    pub fn subscriber_count(&self, object_key: &str) -> usize {
        self.subscribers
            .read()
            .get(object_key)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Drop every subscription a source holds (stream termination).
    pub fn drop_source(&self, source: &str) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|_, list| {
            list.retain(|handle| handle.id != source);
            !list.is_empty()
        });
    }

    /// Fan an accepted frame out to the object's subscribers and the
    /// upstream, excluding the op's own source. Returns the number of
    /// deliveries.
    pub fn fan_out(&self, object_key: &str, frame: &Frame, except: &str) -> usize {
        let mut delivered = 0;

        {
            let mut subscribers = self.subscribers.write();
            if let Some(list) = subscribers.get_mut(object_key) {
                list.retain(|handle| {
                    if handle.id == except {
                        return true;
                    }
                    let alive = handle.deliver(frame.clone());
                    if alive {
                        delivered += 1;
                    }
                    alive
                });
            }
        }

        let upstream = self.upstream.read();
        if let Some(handle) = upstream.as_ref() {
            if handle.id != except && handle.deliver(frame.clone()) {
                delivered += 1;
            }
        }

        delivered
    }

    /// Send a frame to one specific source (error replies, patches).
    pub fn send_to(&self, object_key: &str, source: &str, frame: Frame) -> bool {
        if let Some(handle) = self
            .subscribers
            .read()
            .get(object_key)
            .and_then(|list| list.iter().find(|h| h.id == source))
        {
            return handle.deliver(frame);
        }
        let upstream = self.upstream.read();
        match upstream.as_ref() {
            Some(handle) if handle.id == source => handle.deliver(frame),
            _ => false,
        }
    }
}
