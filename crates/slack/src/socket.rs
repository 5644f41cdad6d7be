use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use tokio::{net::TcpStream, sync::Mutex, task::JoinSet};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::api::check_ok;
use crate::events::{
    parse_socket_frame, EventContext, EventDispatcher, SlackEnvelope, SlackEvent, SocketFrame,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Slack rotates Socket Mode connections; a server-side close is routine.
    pub reconnect_on_close: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000, reconnect_on_close: true }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `Ok(None)` means the server closed or asked us to reconnect.
    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket Mode over a WebSocket opened with `apps.connections.open`.
pub struct WebSocketTransport {
    http: reqwest::Client,
    api_base_url: String,
    app_token: SecretString,
    socket: Mutex<Option<WsStream>>,
}

impl WebSocketTransport {
    pub fn new(api_base_url: impl Into<String>, app_token: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base_url: api_base_url.into().trim_end_matches('/').to_owned(),
            app_token,
            socket: Mutex::new(None),
        }
    }

    async fn open_connection_url(&self) -> Result<String, TransportError> {
        const METHOD: &str = "apps.connections.open";
        let response = self
            .http
            .post(format!("{}/{METHOD}", self.api_base_url))
            .bearer_auth(self.app_token.expose_secret())
            .send()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let body = response
            .json::<Value>()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let body =
            check_ok(METHOD, body).map_err(|error| TransportError::Connect(error.to_string()))?;

        body.get("url").and_then(Value::as_str).map(str::to_owned).ok_or_else(|| {
            TransportError::Connect("apps.connections.open returned no url".to_owned())
        })
    }
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self.open_connection_url().await?;
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        *self.socket.lock().await = Some(stream);
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        let mut guard = self.socket.lock().await;
        let Some(socket) = guard.as_mut() else {
            return Err(TransportError::Receive("socket is not connected".to_owned()));
        };

        loop {
            let Some(message) = socket.next().await else {
                return Ok(None);
            };
            let message = message.map_err(|error| TransportError::Receive(error.to_string()))?;

            match message {
                Message::Text(text) => match parse_socket_frame(text.as_str()) {
                    Ok(SocketFrame::Envelope(envelope)) => return Ok(Some(envelope)),
                    Ok(SocketFrame::Hello) => debug!("received socket mode hello"),
                    Ok(SocketFrame::Disconnect { reason }) => {
                        info!(reason = %reason, "slack requested socket mode disconnect");
                        return Ok(None);
                    }
                    Ok(SocketFrame::Unknown { frame_type }) => {
                        debug!(frame_type = %frame_type, "ignoring socket mode frame")
                    }
                    Err(error) => warn!(error = %error, "dropping unparseable socket mode frame"),
                },
                Message::Ping(payload) => socket
                    .send(Message::Pong(payload))
                    .await
                    .map_err(|error| TransportError::Receive(error.to_string()))?,
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let mut guard = self.socket.lock().await;
        let Some(socket) = guard.as_mut() else {
            return Err(TransportError::Acknowledge("socket is not connected".to_owned()));
        };
        let ack = serde_json::json!({ "envelope_id": envelope_id }).to_string();
        socket
            .send(Message::Text(ack.into()))
            .await
            .map_err(|error| TransportError::Acknowledge(error.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(mut socket) = self.socket.lock().await.take() else {
            return Ok(());
        };
        // The peer has usually closed already; a failed close handshake is expected.
        if let Err(error) = socket.close(None).await {
            debug!(error = %error, "socket close handshake did not complete");
        }
        Ok(())
    }
}

pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_policy: ReconnectPolicy,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher: Arc::new(dispatcher), reconnect_policy }
    }

    pub async fn start(&self) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.connect_and_pump(&mut attempt).await {
                Ok(()) if self.reconnect_policy.reconnect_on_close => {
                    attempt = 0;
                    info!("socket mode connection closed by server; reconnecting");
                    let delay = self.reconnect_policy.backoff(0);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "socket mode transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "socket mode retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Resets `attempt` once connected, so only consecutive failures count against
    /// the retry budget.
    async fn connect_and_pump(&self, attempt: &mut u32) -> Result<(), TransportError> {
        info!(attempt = *attempt, "opening socket mode transport connection");
        self.transport.connect().await?;
        info!(attempt = *attempt, "socket mode transport connected");
        *attempt = 0;

        let mut in_flight = JoinSet::new();
        let outcome = self.pump(&mut in_flight).await;
        while let Some(joined) = in_flight.join_next().await {
            report_join(joined);
        }
        outcome
    }

    async fn pump(&self, in_flight: &mut JoinSet<()>) -> Result<(), TransportError> {
        loop {
            while let Some(joined) = in_flight.try_join_next() {
                report_join(joined);
            }

            let Some(envelope) = self.transport.next_envelope().await? else {
                info!("socket mode transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };
            let (channel_id, thread_ts) = correlation_fields(&envelope);

            info!(
                event_name = "ingress.slack.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                channel_id = channel_id.as_deref().unwrap_or("unknown"),
                thread_ts = thread_ts.as_deref().unwrap_or("unknown"),
                "received slack envelope"
            );

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge slack envelope"
                );
            } else {
                debug!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    "acknowledged slack envelope"
                );
            }

            let dispatcher = Arc::clone(&self.dispatcher);
            in_flight.spawn(async move {
                let context = EventContext { correlation_id: envelope.envelope_id.clone() };
                match dispatcher.dispatch(&envelope, &context).await {
                    Ok(result) => debug!(
                        event_name = "ingress.slack.dispatched",
                        correlation_id = %context.correlation_id,
                        result = ?result,
                        "slack event handled"
                    ),
                    Err(error) => warn!(
                        event_name = "ingress.slack.dispatch_failed",
                        correlation_id = %context.correlation_id,
                        channel_id = channel_id.as_deref().unwrap_or("unknown"),
                        thread_ts = thread_ts.as_deref().unwrap_or("unknown"),
                        error = %error,
                        "event dispatch failed; event dropped"
                    ),
                }
            });
        }
    }
}

fn report_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(join_error) = joined {
        error!(
            event_name = "ingress.slack.handler_panicked",
            error = %join_error,
            "event handler task terminated abnormally"
        );
    }
}

fn correlation_fields(envelope: &SlackEnvelope) -> (Option<String>, Option<String>) {
    match &envelope.event {
        SlackEvent::Message(event) => (
            Some(event.channel_id.clone()),
            Some(event.thread_ts.clone().unwrap_or_else(|| event.ts.clone())),
        ),
        SlackEvent::ReactionAdded(event) => {
            (Some(event.channel_id.clone()), Some(event.root_ts().to_owned()))
        }
        SlackEvent::Unsupported { .. } => (None, None),
    }
}
