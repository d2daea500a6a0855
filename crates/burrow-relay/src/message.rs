//! Relay wire frames.
//!
//! Relays speak JSON arrays whose first element names the frame. Clients
//! send `EVENT`, `REQ` and `CLOSE`; relays answer with `OK`, `EVENT`, `EOSE`,
//! `NOTICE` and `CLOSED`.

use burrow_proto::{Event, Filter};
use serde_json::{Value, json};

/// Frame sent to a relay.
#[derive(Debug, Clone, Copy)]
pub enum ClientMessage<'a> {
    /// Publish an event
    Event(&'a Event),
    /// Open a subscription
    Req {
        /// Subscription id, unique per connection
        subscription: &'a str,
        /// Filters, any of which may match
        filters: &'a [Filter],
    },
    /// Close a subscription
    Close(&'a str),
}

impl ClientMessage<'_> {
    /// JSON text of the frame.
    pub fn to_json(&self) -> String {
        match self {
            Self::Event(event) => json!(["EVENT", event]).to_string(),
            Self::Req { subscription, filters } => {
                let mut frame = vec![json!("REQ"), json!(subscription)];
                frame.extend(filters.iter().map(|f| json!(f)));
                Value::Array(frame).to_string()
            },
            Self::Close(subscription) => json!(["CLOSE", subscription]).to_string(),
        }
    }
}

/// Frame received from a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// Stored or live event for a subscription
    Event {
        /// Subscription id
        subscription: String,
        /// The event
        event: Box<Event>,
    },
    /// Publish acknowledgement
    Ok {
        /// Id of the published event
        event_id: String,
        /// Whether the relay stored it
        accepted: bool,
        /// Relay's explanation
        message: String,
    },
    /// All stored events for a subscription have been sent
    EndOfStoredEvents(String),
    /// Human readable relay notice
    Notice(String),
    /// Relay closed a subscription
    Closed {
        /// Subscription id
        subscription: String,
        /// Relay's explanation
        message: String,
    },
}

impl RelayMessage {
    /// Parse a relay frame. Unknown frame names are an error.
    pub fn parse(text: &str) -> Result<Self, String> {
        let frame: Vec<Value> = serde_json::from_str(text).map_err(|e| e.to_string())?;
        let text_at = |i: usize| -> Result<String, String> {
            frame
                .get(i)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| format!("element {i} is not a string"))
        };

        match frame.first().and_then(Value::as_str) {
            Some("EVENT") => {
                let event = frame.get(2).cloned().ok_or("EVENT without event")?;
                let event: Event = serde_json::from_value(event).map_err(|e| e.to_string())?;
                Ok(Self::Event { subscription: text_at(1)?, event: Box::new(event) })
            },
            Some("OK") => Ok(Self::Ok {
                event_id: text_at(1)?,
                accepted: frame.get(2).and_then(Value::as_bool).ok_or("OK without status")?,
                message: text_at(3).unwrap_or_default(),
            }),
            Some("EOSE") => Ok(Self::EndOfStoredEvents(text_at(1)?)),
            Some("NOTICE") => Ok(Self::Notice(text_at(1)?)),
            Some("CLOSED") => Ok(Self::Closed {
                subscription: text_at(1)?,
                message: text_at(2).unwrap_or_default(),
            }),
            Some(other) => Err(format!("unknown frame {other}")),
            None => Err("empty frame".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use burrow_proto::{EventBuilder, PublicKey};

    use super::*;

    #[test]
    fn req_frame_flattens_filters() {
        let filters = [Filter::new().kind(445), Filter::new().kind(1059)];
        let json = ClientMessage::Req { subscription: "s1", filters: &filters }.to_json();
        assert_eq!(json, r#"["REQ","s1",{"kinds":[445]},{"kinds":[1059]}]"#);
    }

    #[test]
    fn parses_relay_frames() {
        assert_eq!(
            RelayMessage::parse(r#"["OK","ab",false,"blocked: spam"]"#).unwrap(),
            RelayMessage::Ok {
                event_id: "ab".into(),
                accepted: false,
                message: "blocked: spam".into()
            }
        );
        assert_eq!(
            RelayMessage::parse(r#"["EOSE","s1"]"#).unwrap(),
            RelayMessage::EndOfStoredEvents("s1".into())
        );
        assert!(RelayMessage::parse(r#"["AUTH","x"]"#).is_err());
        assert!(RelayMessage::parse("{}").is_err());
    }

    #[test]
    fn event_frame_roundtrip() {
        let event = EventBuilder::new(9, "hi", 1).rumor(PublicKey::from_bytes([1; 32]));
        let client = ClientMessage::Event(&event).to_json();
        let relay = client.replacen(r#"["EVENT","#, r#"["EVENT","s1","#, 1);
        match RelayMessage::parse(&relay).unwrap() {
            RelayMessage::Event { subscription, event: parsed } => {
                assert_eq!(subscription, "s1");
                assert_eq!(*parsed, event);
            },
            other => panic!("unexpected {other:?}"),
        }
    }
}
