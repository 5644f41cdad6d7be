use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::api::ApiError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    Message(MessageEvent),
    ReactionAdded(ReactionAddedEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::Message(_) => SlackEventType::Message,
            Self::ReactionAdded(_) => SlackEventType::ReactionAdded,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    Message,
    ReactionAdded,
    Unsupported,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct MessageEvent {
    #[serde(rename = "channel", default)]
    pub channel_id: String,
    #[serde(rename = "user", default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub ts: String,
    /// Present on replies; root-level posts never carry it.
    #[serde(default)]
    pub thread_ts: Option<String>,
    /// Edits, joins, deletions and bot posts all arrive with a subtype.
    #[serde(default)]
    pub subtype: Option<String>,
}

impl MessageEvent {
    pub fn is_root_level(&self) -> bool {
        self.thread_ts.is_none()
    }

    pub fn is_plain(&self) -> bool {
        self.subtype.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionAddedEvent {
    pub channel_id: String,
    pub message_ts: String,
    pub thread_ts: Option<String>,
    pub reactor_user_id: String,
    pub reaction: String,
}

impl ReactionAddedEvent {
    /// Timestamp of the conversation root, falling back to the reacted message itself.
    pub fn root_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.message_ts)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Welcomed { user_id: String, reply_ts: String },
    FallbackReplied,
    MarkedSolved { resolver_user_id: String },
    ReactionRevoked { reactor_user_id: String },
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("welcome handler failure: {0}")]
    Welcome(#[source] ApiError),
    #[error("resolve handler failure: {0}")]
    Resolve(#[source] ApiError),
    #[error("interaction store failure: {0}")]
    Store(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// One text frame received over the Socket Mode WebSocket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketFrame {
    Hello,
    Disconnect { reason: String },
    Envelope(SlackEnvelope),
    Unknown { frame_type: String },
}

#[derive(Debug, Error)]
#[error("malformed socket mode frame: {0}")]
pub struct FrameError(#[from] serde_json::Error);

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct RawReactionEvent {
    #[serde(default)]
    user: String,
    #[serde(default)]
    reaction: String,
    item: RawReactionItem,
}

#[derive(Deserialize)]
struct RawReactionItem {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    ts: String,
    #[serde(default)]
    thread_ts: Option<String>,
}

/// `event_type` reported for `events_api` payloads that fail to decode.
pub const MALFORMED_EVENT: &str = "malformed_event";

pub fn parse_socket_frame(text: &str) -> Result<SocketFrame, FrameError> {
    let frame: RawFrame = serde_json::from_str(text)?;

    match (frame.frame_type.as_str(), frame.envelope_id) {
        ("hello", _) => Ok(SocketFrame::Hello),
        ("disconnect", _) => Ok(SocketFrame::Disconnect {
            reason: frame.reason.unwrap_or_else(|| "unknown".to_owned()),
        }),
        ("events_api", Some(envelope_id)) => {
            let raw_event = frame.payload.get("event").cloned().unwrap_or(Value::Null);
            // Still surfaced as an envelope so it gets acknowledged and is not redelivered.
            let event = parse_event(raw_event).unwrap_or_else(|error| {
                warn!(
                    event_name = "ingress.slack.malformed_event",
                    envelope_id = %envelope_id,
                    error = %error,
                    "could not decode event payload"
                );
                SlackEvent::Unsupported { event_type: MALFORMED_EVENT.to_owned() }
            });
            Ok(SocketFrame::Envelope(SlackEnvelope { envelope_id, event }))
        }
        (other, Some(envelope_id)) => Ok(SocketFrame::Envelope(SlackEnvelope {
            envelope_id,
            event: SlackEvent::Unsupported { event_type: other.to_owned() },
        })),
        (other, None) => Ok(SocketFrame::Unknown { frame_type: other.to_owned() }),
    }
}

fn parse_event(event: Value) -> Result<SlackEvent, FrameError> {
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or("unknown").to_owned();

    match event_type.as_str() {
        "message" => Ok(SlackEvent::Message(serde_json::from_value(event)?)),
        "reaction_added" => {
            let raw: RawReactionEvent = serde_json::from_value(event)?;
            Ok(SlackEvent::ReactionAdded(ReactionAddedEvent {
                channel_id: raw.item.channel,
                message_ts: raw.item.ts,
                thread_ts: raw.item.thread_ts,
                reactor_user_id: raw.user,
                reaction: raw.reaction,
            }))
        }
        _ => Ok(SlackEvent::Unsupported { event_type }),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::{
        parse_socket_frame, EventContext, EventDispatcher, EventHandler, EventHandlerError,
        HandlerResult, MessageEvent, ReactionAddedEvent, SlackEnvelope, SlackEvent,
        SlackEventType, SocketFrame, MALFORMED_EVENT,
    };

    struct EchoHandler;

    #[async_trait]
    impl EventHandler for EchoHandler {
        fn event_type(&self) -> SlackEventType {
            SlackEventType::Message
        }

        async fn handle(
            &self,
            _envelope: &SlackEnvelope,
            _ctx: &EventContext,
        ) -> Result<HandlerResult, EventHandlerError> {
            Ok(HandlerResult::Processed)
        }
    }

    fn message_envelope() -> SlackEnvelope {
        SlackEnvelope {
            envelope_id: "env-1".to_owned(),
            event: SlackEvent::Message(MessageEvent {
                channel_id: "C1".to_owned(),
                user_id: Some("U1".to_owned()),
                text: Some("hello".to_owned()),
                ts: "1730000000.1000".to_owned(),
                thread_ts: None,
                subtype: None,
            }),
        }
    }

    #[tokio::test]
    async fn dispatcher_routes_registered_event_types() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(EchoHandler);

        let result = dispatcher
            .dispatch(&message_envelope(), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Processed);
        assert_eq!(dispatcher.handler_count(), 1);
    }

    #[tokio::test]
    async fn dispatcher_returns_ignored_when_no_handler_registered() {
        let dispatcher = EventDispatcher::new();

        let result = dispatcher
            .dispatch(&message_envelope(), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
    }

    #[test]
    fn parses_hello_and_disconnect_frames() {
        assert_eq!(
            parse_socket_frame(r#"{"type":"hello","num_connections":1}"#).expect("hello"),
            SocketFrame::Hello
        );
        assert_eq!(
            parse_socket_frame(r#"{"type":"disconnect","reason":"refresh_requested"}"#)
                .expect("disconnect"),
            SocketFrame::Disconnect { reason: "refresh_requested".to_owned() }
        );
    }

    #[test]
    fn parses_root_message_event() {
        let frame = parse_socket_frame(
            r#"{
                "envelope_id": "env-msg",
                "type": "events_api",
                "accepts_response_payload": false,
                "payload": {
                    "type": "event_callback",
                    "event": {
                        "type": "message",
                        "channel": "C0SUPPORT",
                        "user": "U1",
                        "text": "my build fails",
                        "ts": "1730000000.1000",
                        "channel_type": "channel"
                    }
                }
            }"#,
        )
        .expect("frame");

        let SocketFrame::Envelope(envelope) = frame else { panic!("expected envelope") };
        assert_eq!(envelope.envelope_id, "env-msg");
        let SlackEvent::Message(message) = envelope.event else { panic!("expected message") };
        assert_eq!(message.channel_id, "C0SUPPORT");
        assert_eq!(message.user_id.as_deref(), Some("U1"));
        assert!(message.is_root_level());
        assert!(message.is_plain());
    }

    #[test]
    fn parses_edited_reply_with_subtype() {
        let frame = parse_socket_frame(
            r#"{
                "envelope_id": "env-edit",
                "type": "events_api",
                "payload": { "event": {
                    "type": "message",
                    "subtype": "message_changed",
                    "channel": "C0SUPPORT",
                    "ts": "1730000000.3000",
                    "thread_ts": "1730000000.1000"
                } }
            }"#,
        )
        .expect("frame");

        let SocketFrame::Envelope(SlackEnvelope { event: SlackEvent::Message(message), .. }) =
            frame
        else {
            panic!("expected message envelope");
        };
        assert!(!message.is_plain());
        assert!(!message.is_root_level());
        assert_eq!(message.user_id, None);
        assert_eq!(message.text, None);
    }

    #[test]
    fn parses_reaction_added_event() {
        let frame = parse_socket_frame(
            r#"{
                "envelope_id": "env-react",
                "type": "events_api",
                "payload": { "event": {
                    "type": "reaction_added",
                    "user": "U1",
                    "reaction": "white_check_mark",
                    "item_user": "U0BOT",
                    "item": { "type": "message", "channel": "C0SUPPORT", "ts": "1730000000.2000" },
                    "event_ts": "1730000100.0000"
                } }
            }"#,
        )
        .expect("frame");

        let SocketFrame::Envelope(SlackEnvelope { event: SlackEvent::ReactionAdded(event), .. }) =
            frame
        else {
            panic!("expected reaction envelope");
        };
        assert_eq!(
            event,
            ReactionAddedEvent {
                channel_id: "C0SUPPORT".to_owned(),
                message_ts: "1730000000.2000".to_owned(),
                thread_ts: None,
                reactor_user_id: "U1".to_owned(),
                reaction: "white_check_mark".to_owned(),
            }
        );
        assert_eq!(event.root_ts(), "1730000000.2000");
    }

    #[test]
    fn non_event_envelopes_are_unsupported_but_acknowledgeable() {
        let frame = parse_socket_frame(
            r#"{"envelope_id":"env-slash","type":"slash_commands","payload":{"command":"/x"}}"#,
        )
        .expect("frame");

        assert_eq!(
            frame,
            SocketFrame::Envelope(SlackEnvelope {
                envelope_id: "env-slash".to_owned(),
                event: SlackEvent::Unsupported { event_type: "slash_commands".to_owned() },
            })
        );

        let frame = parse_socket_frame(
            r#"{"envelope_id":"env-join","type":"events_api","payload":{"event":{"type":"member_joined_channel"}}}"#,
        )
        .expect("frame");
        assert!(matches!(
            frame,
            SocketFrame::Envelope(SlackEnvelope {
                event: SlackEvent::Unsupported { ref event_type },
                ..
            }) if event_type == "member_joined_channel"
        ));
    }

    #[test]
    fn undecodable_events_keep_their_envelope_id() {
        let frame = parse_socket_frame(
            r#"{
                "envelope_id": "env-broken",
                "type": "events_api",
                "payload": { "event": { "type": "reaction_added", "user": "U1" } }
            }"#,
        )
        .expect("frame");

        assert_eq!(
            frame,
            SocketFrame::Envelope(SlackEnvelope {
                envelope_id: "env-broken".to_owned(),
                event: SlackEvent::Unsupported { event_type: MALFORMED_EVENT.to_owned() },
            })
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(parse_socket_frame("not json").is_err());
        assert!(parse_socket_frame(r#"{"no_type":true}"#).is_err());
    }
}
