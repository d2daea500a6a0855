//! In-process relay for tests and offline operation.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use burrow_proto::{Event, Filter};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::AbortHandle,
};

use crate::{
    error::TransportError,
    relay::{Relay, SubscriptionSink},
};

const LIVE_BUFFER: usize = 1024;

/// Relay that keeps events in memory.
///
/// Behaves like a real relay: it verifies signatures, ignores duplicates,
/// answers stored matches first and then streams live ones. Clones share
/// the same store, so one instance can serve several clients in a test.
#[derive(Clone)]
pub struct MemoryRelay {
    url: String,
    events: Arc<Mutex<Vec<Event>>>,
    live: broadcast::Sender<Event>,
    online: Arc<AtomicBool>,
}

impl MemoryRelay {
    /// Empty relay answering as `url`.
    pub fn new(url: impl Into<String>) -> Self {
        let (live, _) = broadcast::channel(LIVE_BUFFER);
        Self {
            url: url.into(),
            events: Arc::new(Mutex::new(Vec::new())),
            live,
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the relay going down or coming back.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Every stored event, in arrival order.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn ensure_online(&self) -> Result<(), TransportError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Connection { relay: self.url.clone(), reason: "offline".into() })
        }
    }
}

/// Stored events matching any filter, newest first per filter, each filter's
/// `limit` applied, without duplicates.
pub(crate) fn select(events: &[Event], filters: &[Filter]) -> Vec<Event> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for filter in filters {
        let mut matches: Vec<&Event> = events.iter().filter(|e| filter.matches(e)).collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        for event in matches.into_iter().take(filter.limit.unwrap_or(usize::MAX)) {
            if seen.insert(event.id.clone()) {
                out.push(event.clone());
            }
        }
    }
    out
}

#[async_trait]
impl Relay for MemoryRelay {
    fn url(&self) -> &str {
        &self.url
    }

    async fn publish(&self, event: &Event) -> Result<(), TransportError> {
        self.ensure_online()?;
        event.verify().map_err(|e| TransportError::Rejected {
            relay: self.url.clone(),
            reason: format!("invalid: {e}"),
        })?;

        {
            let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
            if events.iter().any(|e| e.id == event.id) {
                return Ok(());
            }
            events.push(event.clone());
        }

        // No live subscribers is fine
        let _ = self.live.send(event.clone());
        Ok(())
    }

    async fn query(&self, filters: &[Filter]) -> Result<Vec<Event>, TransportError> {
        self.ensure_online()?;
        Ok(select(&self.events(), filters))
    }

    async fn subscribe(
        &self,
        filters: Vec<Filter>,
        sink: SubscriptionSink,
    ) -> Result<AbortHandle, TransportError> {
        self.ensure_online()?;

        let mut live = self.live.subscribe();
        let stored = select(&self.events(), &filters);
        let url = self.url.clone();

        let task = tokio::spawn(async move {
            for event in stored {
                if !sink.deliver(event).await {
                    return;
                }
            }
            if !sink.end_of_stored(&url).await {
                return;
            }
            loop {
                match live.recv().await {
                    Ok(event) if filters.iter().any(|f| f.matches(&event)) => {
                        if !sink.deliver(event).await {
                            return;
                        }
                    },
                    Ok(_) => {},
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(relay = %url, skipped, "subscription lagged");
                    },
                    Err(RecvError::Closed) => return,
                }
            }
        });

        Ok(task.abort_handle())
    }
}
