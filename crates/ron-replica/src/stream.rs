//! Op stream abstraction
//!
//! A stream is anything that can subscribe, unsubscribe, write, and be
//! notified — the replica itself implements it, and so can relays or
//! test fixtures. Subscribers are explicit handles over channels, keyed
//! by a stable source identity; cancellation is removal from the
//! registry, never listener-removal by function identity.

use crate::error::Result;
use async_trait::async_trait;
use ron_wire::frame::Frame;
use tokio::sync::mpsc;

/// Stable identity of a connected source (a session id, or the local
/// writer).
pub type SourceId = String;

/// The local writer's source identity.
pub const LOCAL_SOURCE: &str = "";

/// A subscriber: an identity plus the channel frames are delivered on.
#[derive(Clone, Debug)]
pub struct SubscriberHandle {
    pub id: SourceId,
    pub sender: mpsc::UnboundedSender<Frame>,
}

impl SubscriberHandle {
    /// A handle plus the receiving end of its channel.
    pub fn channel(id: impl Into<SourceId>) -> (SubscriberHandle, mpsc::UnboundedReceiver<Frame>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            SubscriberHandle {
                id: id.into(),
                sender,
            },
            receiver,
        )
    }

    /// Deliver a frame; a closed channel is ignored (the registry reaps
    /// dead handles on the next fan-out).
    pub fn deliver(&self, frame: Frame) -> bool {
        self.sender.send(frame).is_ok()
    }
}

/// An op/frame sink-source. A query whose terminal op carries the NEVER
/// event means "unsubscribe"; any other query subscribes.
#[async_trait]
pub trait OpStream: Send + Sync {
    /// Subscribe: register the subscriber and send it the patch its
    /// query's base calls for.
    async fn on(&self, query: &Frame, subscriber: SubscriberHandle) -> Result<()>;

    /// Unsubscribe a source from the queried object.
    async fn off(&self, query: &Frame, subscriber_id: &str) -> Result<()>;

    /// Write path: ops originated by the local writer.
    async fn push(&self, frame: &Frame) -> Result<()>;

    /// Notify path: ops arriving from a connected source.
    async fn update(&self, frame: &Frame, source: &str) -> Result<()>;
}
