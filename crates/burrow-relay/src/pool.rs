//! Fan-out over several relays.

use std::{collections::HashSet, sync::Arc, time::Duration};

use burrow_proto::{Event, Filter};
use futures_util::future::join_all;

use crate::{
    error::TransportError,
    relay::{Relay, Subscription},
    websocket::{DEFAULT_TIMEOUT, WebSocketRelay},
};

/// Which relays took a published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Id of the published event
    pub event_id: String,
    /// Relays that stored it
    pub accepted: Vec<String>,
    /// Relays that failed, with their errors
    pub failed: Vec<TransportError>,
}

/// Set of relays used together.
///
/// Publishing succeeds when at least one relay accepts. Queries and
/// subscriptions merge results from every reachable relay.
#[derive(Clone)]
pub struct RelayPool {
    relays: Vec<Arc<dyn Relay>>,
    timeout: Duration,
}

impl RelayPool {
    /// Pool over `relays`.
    pub fn new(relays: Vec<Arc<dyn Relay>>) -> Self {
        Self { relays, timeout: DEFAULT_TIMEOUT }
    }

    /// Pool of websocket relays.
    pub fn websocket<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            urls.into_iter()
                .map(|url| Arc::new(WebSocketRelay::new(url)) as Arc<dyn Relay>)
                .collect(),
        )
    }

    /// Per-relay bound on publish and query.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Relay URLs.
    pub fn urls(&self) -> Vec<&str> {
        self.relays.iter().map(|r| r.url()).collect()
    }

    /// Whether the pool has no relays.
    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    /// Publish to every relay concurrently.
    pub async fn publish(&self, event: &Event) -> Result<PublishOutcome, TransportError> {
        if self.relays.is_empty() {
            return Err(TransportError::NoRelays);
        }

        let results = join_all(self.relays.iter().map(|relay| async move {
            let result = tokio::time::timeout(self.timeout, relay.publish(event))
                .await
                .unwrap_or_else(|_| Err(TransportError::Timeout { relay: relay.url().to_string() }));
            (relay.url().to_string(), result)
        }))
        .await;

        let mut outcome =
            PublishOutcome { event_id: event.id.clone(), accepted: Vec::new(), failed: Vec::new() };
        for (url, result) in results {
            match result {
                Ok(()) => outcome.accepted.push(url),
                Err(e) => {
                    tracing::warn!(relay = %url, event = %event.id, error = %e, "publish failed");
                    outcome.failed.push(e);
                },
            }
        }

        if outcome.accepted.is_empty() {
            return Err(TransportError::AllFailed(outcome.failed));
        }
        tracing::debug!(
            event = %event.id,
            kind = event.kind,
            accepted = outcome.accepted.len(),
            "published"
        );
        Ok(outcome)
    }

    /// Stored events from every relay, without duplicates.
    ///
    /// Fails only if every relay fails.
    pub async fn query(&self, filters: &[Filter]) -> Result<Vec<Event>, TransportError> {
        if self.relays.is_empty() {
            return Err(TransportError::NoRelays);
        }

        let results = join_all(self.relays.iter().map(|relay| async move {
            tokio::time::timeout(self.timeout, relay.query(filters))
                .await
                .unwrap_or_else(|_| Err(TransportError::Timeout { relay: relay.url().to_string() }))
        }))
        .await;

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let mut failed = Vec::new();
        let mut any_ok = false;
        for result in results {
            match result {
                Ok(batch) => {
                    any_ok = true;
                    events.extend(batch.into_iter().filter(|e| seen.insert(e.id.clone())));
                },
                Err(e) => failed.push(e),
            }
        }

        if any_ok { Ok(events) } else { Err(TransportError::AllFailed(failed)) }
    }

    /// Subscribe on every relay. Relays that cannot be reached are skipped;
    /// it fails only if none can.
    pub async fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription, TransportError> {
        if self.relays.is_empty() {
            return Err(TransportError::NoRelays);
        }

        let (mut subscription, sink) = Subscription::channel();
        let mut failed = Vec::new();
        for relay in &self.relays {
            match relay.subscribe(filters.clone(), sink.clone()).await {
                Ok(task) => subscription.attach(task),
                Err(e) => {
                    tracing::warn!(relay = %relay.url(), error = %e, "subscribe failed");
                    failed.push(e);
                },
            }
        }

        if failed.len() == self.relays.len() {
            return Err(TransportError::AllFailed(failed));
        }
        Ok(subscription)
    }
}
