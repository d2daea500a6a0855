//! Relay abstraction and subscriptions.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use burrow_proto::{Event, Filter};
use tokio::{sync::mpsc, task::AbortHandle};

use crate::error::TransportError;

/// Capacity of a subscription's event queue.
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// Something delivered on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// An event matching the filters, delivered at most once
    Event(Event),
    /// A relay has sent all of its stored matches
    EndOfStoredEvents {
        /// Relay URL
        relay: String,
    },
}

/// A store-and-forward relay.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Relay URL, used in logs and errors.
    fn url(&self) -> &str;

    /// Publish `event`. Ok means the relay stored it.
    async fn publish(&self, event: &Event) -> Result<(), TransportError>;

    /// Stored events matching any of `filters`.
    async fn query(&self, filters: &[Filter]) -> Result<Vec<Event>, TransportError>;

    /// Stream stored and live events matching any of `filters` into `sink`.
    ///
    /// Returns once the subscription is running; the returned handle stops
    /// it. The relay stops on its own once the sink is closed.
    async fn subscribe(
        &self,
        filters: Vec<Filter>,
        sink: SubscriptionSink,
    ) -> Result<AbortHandle, TransportError>;
}

/// Shared, de-duplicating entry point into a [`Subscription`].
#[derive(Clone)]
pub struct SubscriptionSink {
    tx: mpsc::Sender<SubscriptionEvent>,
    seen: Arc<Mutex<HashSet<String>>>,
}

impl SubscriptionSink {
    /// Forward `event` unless an event with the same id was already
    /// delivered. Returns false once the subscription is closed.
    pub async fn deliver(&self, event: Event) -> bool {
        let fresh = self.seen.lock().unwrap_or_else(PoisonError::into_inner).insert(event.id.clone());
        if !fresh {
            return !self.tx.is_closed();
        }
        self.tx.send(SubscriptionEvent::Event(event)).await.is_ok()
    }

    /// Signal that `relay` finished sending stored events.
    pub async fn end_of_stored(&self, relay: &str) -> bool {
        self.tx
            .send(SubscriptionEvent::EndOfStoredEvents { relay: relay.to_string() })
            .await
            .is_ok()
    }

    /// Whether the subscription was closed.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Live subscription across one or more relays.
///
/// Events arrive in no particular order but never twice. Dropping the
/// subscription closes it.
pub struct Subscription {
    rx: mpsc::Receiver<SubscriptionEvent>,
    tasks: Vec<AbortHandle>,
}

impl Subscription {
    /// Empty subscription and the sink feeding it.
    pub fn channel() -> (Self, SubscriptionSink) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let sink = SubscriptionSink { tx, seen: Arc::new(Mutex::new(HashSet::new())) };
        (Self { rx, tasks: Vec::new() }, sink)
    }

    /// Track a relay task so [`Self::close`] stops it.
    pub fn attach(&mut self, task: AbortHandle) {
        self.tasks.push(task);
    }

    /// Next event, or `None` once closed and drained.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.rx.recv().await
    }

    /// Stop every relay task. Safe to call more than once.
    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
