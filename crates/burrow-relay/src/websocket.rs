//! Websocket relay client.
//!
//! Opens a connection per operation. Publishing and querying are request /
//! response exchanges bounded by a timeout; a subscription owns its
//! connection for as long as it runs.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use burrow_proto::{Event, Filter};
use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, task::AbortHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};

use crate::{
    error::TransportError,
    message::{ClientMessage, RelayMessage},
    relay::{Relay, SubscriptionSink},
};

/// Default bound on publish and query exchanges.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

fn subscription_id() -> String {
    format!("burrow-{}", NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
}

/// Relay reached over `ws://` or `wss://`.
#[derive(Debug, Clone)]
pub struct WebSocketRelay {
    url: String,
    timeout: Duration,
}

impl WebSocketRelay {
    /// Relay at `url` with [`DEFAULT_TIMEOUT`].
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), timeout: DEFAULT_TIMEOUT }
    }

    /// Override the exchange timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn connection_error(&self, reason: impl ToString) -> TransportError {
        TransportError::Connection { relay: self.url.clone(), reason: reason.to_string() }
    }

    fn protocol_error(&self, reason: impl ToString) -> TransportError {
        TransportError::Protocol { relay: self.url.clone(), reason: reason.to_string() }
    }

    async fn connect(&self) -> Result<Socket, TransportError> {
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| self.connection_error(e))?;
        Ok(socket)
    }

    async fn send(&self, socket: &mut Socket, message: ClientMessage<'_>) -> Result<(), TransportError> {
        socket
            .send(WsMessage::Text(message.to_json().into()))
            .await
            .map_err(|e| self.connection_error(e))
    }

    /// Next relay frame, skipping control frames and unparseable text.
    async fn recv(&self, socket: &mut Socket) -> Result<RelayMessage, TransportError> {
        while let Some(frame) = socket.next().await {
            match frame.map_err(|e| self.connection_error(e))? {
                WsMessage::Text(text) => match RelayMessage::parse(text.as_str()) {
                    Ok(message) => return Ok(message),
                    Err(reason) => {
                        tracing::debug!(relay = %self.url, %reason, "ignoring relay frame");
                    },
                },
                WsMessage::Close(_) => break,
                _ => {},
            }
        }
        Err(self.connection_error("connection closed"))
    }

    async fn publish_exchange(&self, event: &Event) -> Result<(), TransportError> {
        let mut socket = self.connect().await?;
        self.send(&mut socket, ClientMessage::Event(event)).await?;

        loop {
            match self.recv(&mut socket).await? {
                RelayMessage::Ok { event_id, accepted, message } if event_id == event.id => {
                    // Best-effort close; the exchange is complete
                    let _ = socket.close(None).await;
                    return if accepted {
                        Ok(())
                    } else {
                        Err(TransportError::Rejected { relay: self.url.clone(), reason: message })
                    };
                },
                RelayMessage::Notice(notice) => {
                    tracing::debug!(relay = %self.url, %notice, "relay notice");
                },
                _ => {},
            }
        }
    }

    async fn query_exchange(&self, filters: &[Filter]) -> Result<Vec<Event>, TransportError> {
        let mut socket = self.connect().await?;
        let subscription = subscription_id();
        self.send(&mut socket, ClientMessage::Req { subscription: &subscription, filters }).await?;

        let mut events = Vec::new();
        loop {
            match self.recv(&mut socket).await? {
                RelayMessage::Event { subscription: id, event } if id == subscription => {
                    events.push(*event);
                },
                RelayMessage::EndOfStoredEvents(id) if id == subscription => break,
                RelayMessage::Closed { subscription: id, message } if id == subscription => {
                    return Err(self.protocol_error(format!("subscription closed: {message}")));
                },
                _ => {},
            }
        }

        // Best-effort close; the stored events are already in hand
        let _ = self.send(&mut socket, ClientMessage::Close(&subscription)).await;
        let _ = socket.close(None).await;
        Ok(events)
    }
}

#[async_trait]
impl Relay for WebSocketRelay {
    fn url(&self) -> &str {
        &self.url
    }

    async fn publish(&self, event: &Event) -> Result<(), TransportError> {
        tokio::time::timeout(self.timeout, self.publish_exchange(event))
            .await
            .map_err(|_| TransportError::Timeout { relay: self.url.clone() })?
    }

    async fn query(&self, filters: &[Filter]) -> Result<Vec<Event>, TransportError> {
        tokio::time::timeout(self.timeout, self.query_exchange(filters))
            .await
            .map_err(|_| TransportError::Timeout { relay: self.url.clone() })?
    }

    async fn subscribe(
        &self,
        filters: Vec<Filter>,
        sink: SubscriptionSink,
    ) -> Result<AbortHandle, TransportError> {
        let mut socket = tokio::time::timeout(self.timeout, self.connect())
            .await
            .map_err(|_| TransportError::Timeout { relay: self.url.clone() })??;
        let subscription = subscription_id();
        self.send(&mut socket, ClientMessage::Req { subscription: &subscription, filters: &filters })
            .await?;

        let relay = self.clone();
        let task = tokio::spawn(async move {
            loop {
                let message = match relay.recv(&mut socket).await {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(relay = %relay.url, error = %e, "subscription ended");
                        return;
                    },
                };
                let open = match message {
                    RelayMessage::Event { subscription: id, event } if id == subscription => {
                        sink.deliver(*event).await
                    },
                    RelayMessage::EndOfStoredEvents(id) if id == subscription => {
                        sink.end_of_stored(&relay.url).await
                    },
                    RelayMessage::Closed { subscription: id, message } if id == subscription => {
                        tracing::warn!(relay = %relay.url, %message, "relay closed subscription");
                        return;
                    },
                    _ => !sink.is_closed(),
                };
                if !open {
                    let _ = relay.send(&mut socket, ClientMessage::Close(&subscription)).await;
                    return;
                }
            }
        });

        Ok(task.abort_handle())
    }
}
