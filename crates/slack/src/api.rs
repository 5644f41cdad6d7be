//! Slack Web API surface consumed by the handlers.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("slack request `{method}` failed: {message}")]
    Http { method: &'static str, message: String },
    #[error("slack method `{method}` returned error `{code}`")]
    Slack { method: &'static str, code: String },
    #[error("slack method `{method}` returned an unexpected payload: {message}")]
    Decode { method: &'static str, message: String },
}

/// Identity of the installed bot, as reported by `auth.test`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: String,
    pub bot_id: String,
}

/// A single entry from `conversations.history`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct HistoryMessage {
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PostMessage {
    pub channel: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

impl PostMessage {
    pub fn threaded(
        channel: impl Into<String>,
        thread_ts: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self { channel: channel.into(), text: text.into(), thread_ts: Some(thread_ts.into()) }
    }
}

#[async_trait]
pub trait SlackApi: Send + Sync {
    fn bot_identity(&self) -> &BotIdentity;

    /// Most recent message at or before `latest_ts` (inclusive, limit 1).
    async fn latest_message(
        &self,
        channel: &str,
        latest_ts: &str,
    ) -> Result<Option<HistoryMessage>, ApiError>;

    /// Returns the `ts` of the posted message.
    async fn post_message(&self, message: &PostMessage) -> Result<String, ApiError>;

    async fn update_message(&self, channel: &str, ts: &str, text: &str) -> Result<(), ApiError>;

    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ApiError>;
}

pub struct SlackWebClient {
    http: reqwest::Client,
    base_url: String,
    bot_token: SecretString,
    identity: BotIdentity,
}

impl SlackWebClient {
    /// Resolves the bot identity up front; the handlers compare message authorship against it.
    pub async fn connect(
        base_url: impl Into<String>,
        bot_token: SecretString,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::new();
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        let body = call(&http, &base_url, &bot_token, "auth.test", &serde_json::json!({})).await?;
        let identity = parse_identity(&body)?;
        debug!(
            event_name = "slack.api.identity_resolved",
            bot_user_id = %identity.user_id,
            bot_id = %identity.bot_id,
            "resolved slack bot identity"
        );

        Ok(Self { http, base_url, bot_token, identity })
    }

    async fn call_json<B: Serialize + Sync>(
        &self,
        method: &'static str,
        body: &B,
    ) -> Result<Value, ApiError> {
        call(&self.http, &self.base_url, &self.bot_token, method, body).await
    }
}

#[async_trait]
impl SlackApi for SlackWebClient {
    fn bot_identity(&self) -> &BotIdentity {
        &self.identity
    }

    async fn latest_message(
        &self,
        channel: &str,
        latest_ts: &str,
    ) -> Result<Option<HistoryMessage>, ApiError> {
        const METHOD: &str = "conversations.history";
        let response = self
            .http
            .get(format!("{}/{METHOD}", self.base_url))
            .bearer_auth(self.bot_token.expose_secret())
            .query(&[
                ("channel", channel),
                ("latest", latest_ts),
                ("inclusive", "true"),
                ("limit", "1"),
            ])
            .send()
            .await
            .map_err(|error| ApiError::Http { method: METHOD, message: error.to_string() })?;
        let body = response
            .json::<Value>()
            .await
            .map_err(|error| ApiError::Decode { method: METHOD, message: error.to_string() })?;

        parse_history(check_ok(METHOD, body)?)
    }

    async fn post_message(&self, message: &PostMessage) -> Result<String, ApiError> {
        const METHOD: &str = "chat.postMessage";
        let body = self.call_json(METHOD, message).await?;
        body.get("ts").and_then(Value::as_str).map(str::to_owned).ok_or_else(|| {
            ApiError::Decode { method: METHOD, message: "missing `ts` in response".to_owned() }
        })
    }

    async fn update_message(&self, channel: &str, ts: &str, text: &str) -> Result<(), ApiError> {
        let body = serde_json::json!({ "channel": channel, "ts": ts, "text": text });
        self.call_json("chat.update", &body).await.map(|_| ())
    }

    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ApiError> {
        let body = serde_json::json!({ "channel": channel, "timestamp": ts, "name": name });
        self.call_json("reactions.remove", &body).await.map(|_| ())
    }
}

async fn call<B: Serialize + Sync + ?Sized>(
    http: &reqwest::Client,
    base_url: &str,
    token: &SecretString,
    method: &'static str,
    body: &B,
) -> Result<Value, ApiError> {
    let response = http
        .post(format!("{base_url}/{method}"))
        .bearer_auth(token.expose_secret())
        .json(body)
        .send()
        .await
        .map_err(|error| ApiError::Http { method, message: error.to_string() })?;
    let body = response
        .json::<Value>()
        .await
        .map_err(|error| ApiError::Decode { method, message: error.to_string() })?;

    check_ok(method, body)
}

/// Unwraps Slack's `{ "ok": bool, "error": "..." }` envelope.
pub(crate) fn check_ok(method: &'static str, body: Value) -> Result<Value, ApiError> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }

    let code = body.get("error").and_then(Value::as_str).unwrap_or("unknown_error").to_owned();
    Err(ApiError::Slack { method, code })
}

fn parse_identity(body: &Value) -> Result<BotIdentity, ApiError> {
    let field = |name: &str| {
        body.get(name).and_then(Value::as_str).map(str::to_owned).ok_or_else(|| ApiError::Decode {
            method: "auth.test",
            message: format!("missing `{name}` in response"),
        })
    };

    Ok(BotIdentity { user_id: field("user_id")?, bot_id: field("bot_id")? })
}

fn parse_history(body: Value) -> Result<Option<HistoryMessage>, ApiError> {
    #[derive(Deserialize)]
    struct HistoryPage {
        #[serde(default)]
        messages: Vec<HistoryMessage>,
    }

    let page: HistoryPage = serde_json::from_value(body).map_err(|error| ApiError::Decode {
        method: "conversations.history",
        message: error.to_string(),
    })?;
    Ok(page.messages.into_iter().next())
}
