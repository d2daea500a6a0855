//! JSON-lines loop.
//!
//! Reads commands from the controller and events from the relay
//! subscription, one at a time, on a single task. Only command responses
//! reach the output stream.

use burrow_proto::{Command, Event, Response};
use burrow_relay::{Subscription, SubscriptionEvent};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{bridge::Bridge, error::BridgeError, store::Store};

async fn write_line<W: AsyncWrite + Unpin>(
    output: &mut W,
    response: &Response,
) -> Result<(), BridgeError> {
    let mut line = serde_json::to_string(response)
        .map_err(|e| BridgeError::InvalidInput(format!("unserializable response: {e}")))?;
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

/// Next event from the subscription, or `None` once it has ended. Without
/// a subscription this never resolves.
async fn next_event(subscription: &mut Option<Subscription>) -> Option<Event> {
    let Some(sub) = subscription else {
        return std::future::pending().await;
    };
    loop {
        match sub.next().await? {
            SubscriptionEvent::Event(event) => return Some(event),
            SubscriptionEvent::EndOfStoredEvents { relay } => {
                tracing::debug!(%relay, "caught up with stored events");
            },
        }
    }
}

/// Run the worker until `input` ends.
///
/// Writes `ready` before reading anything. Every command line yields exactly
/// one response line, in order; a line that is not a valid command yields an
/// error response.
///
/// # Errors
///
/// Returns an error when `input` cannot be read or `output` cannot be
/// written. End of input is a clean return.
pub async fn run<E, S, R, W>(
    mut bridge: Bridge<E, S>,
    input: R,
    mut output: W,
) -> Result<(), BridgeError>
where
    E: burrow_core::Environment,
    S: Store,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_line(&mut output, &Response::Ready { pubkey: bridge.public_key() }).await?;
    tracing::info!(pubkey = %bridge.public_key(), "worker ready");

    let mut lines = input.lines();
    let mut subscription = bridge.subscribe().await;

    loop {
        tokio::select! {
            biased;

            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::info!("input closed, shutting down");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<Command>(&line) {
                    Ok(command) => bridge.handle(command).await,
                    Err(e) => Response::error(format!("invalid command: {e}")),
                };
                write_line(&mut output, &response).await?;
            },

            event = next_event(&mut subscription) => match event {
                Some(event) => bridge.ingest(event).await,
                None => {
                    tracing::warn!("relay subscription ended");
                    subscription = None;
                },
            },
        }

        if bridge.needs_resubscribe() {
            if let Some(mut old) = subscription.take() {
                old.close();
            }
            subscription = bridge.subscribe().await;
        }
    }

    Ok(())
}
