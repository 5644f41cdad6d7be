use std::sync::Arc;

use greeter_core::config::{AppConfig, ConfigError};
use greeter_core::{FileInteractionStore, InteractionStore};
use greeter_slack::{
    api::{ApiError, SlackApi, SlackWebClient},
    events::EventDispatcher,
    handlers::{ResolveHandler, WelcomeHandler},
    messages::WelcomeText,
    socket::{ReconnectPolicy, SocketModeRunner, WebSocketTransport},
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub store: Arc<FileInteractionStore>,
    pub runner: SocketModeRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("slack bot identity lookup failed: {0}")]
    SlackIdentity(#[source] ApiError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        channel_id = %config.slack.channel_id,
        "starting application bootstrap"
    );

    let store = Arc::new(FileInteractionStore::load(&config.storage.path));
    info!(
        event_name = "system.bootstrap.store_loaded",
        correlation_id = "bootstrap",
        path = %config.storage.path.display(),
        user_count = store.len(),
        "interaction store loaded"
    );

    let api = SlackWebClient::connect(&config.slack.api_base_url, config.slack.bot_token.clone())
        .await
        .map_err(BootstrapError::SlackIdentity)?;
    info!(
        event_name = "system.bootstrap.slack_identity",
        correlation_id = "bootstrap",
        bot_user_id = %api.bot_identity().user_id,
        "slack bot identity resolved"
    );

    let dispatcher = build_dispatcher(Arc::new(api), store.clone(), &config);
    let transport =
        WebSocketTransport::new(&config.slack.api_base_url, config.slack.app_token.clone());
    let runner =
        SocketModeRunner::new(Arc::new(transport), dispatcher, ReconnectPolicy::default());

    Ok(Application { config, store, runner })
}

pub fn build_dispatcher(
    api: Arc<dyn SlackApi>,
    store: Arc<dyn InteractionStore>,
    config: &AppConfig,
) -> EventDispatcher {
    let welcome = WelcomeText::from_config(config.bot.welcome_message.as_deref());

    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(WelcomeHandler::new(
        api.clone(),
        store,
        config.slack.channel_id.clone(),
        welcome,
    ));
    dispatcher.register(ResolveHandler::new(api));
    dispatcher
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use greeter_core::config::AppConfig;
    use greeter_core::{InteractionStore, MemoryInteractionStore, UserId};
    use greeter_slack::api::{ApiError, BotIdentity, HistoryMessage, PostMessage, SlackApi};
    use greeter_slack::events::{
        EventContext, HandlerResult, MessageEvent, SlackEnvelope, SlackEvent,
    };
    use tempfile::TempDir;

    use crate::bootstrap::{bootstrap_with_config, build_dispatcher, BootstrapError};

    struct StubSlack {
        identity: BotIdentity,
        posted: Mutex<Vec<PostMessage>>,
    }

    impl StubSlack {
        fn new() -> Self {
            Self {
                identity: BotIdentity { user_id: "UBOT".to_string(), bot_id: "BBOT".to_string() },
                posted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SlackApi for StubSlack {
        fn bot_identity(&self) -> &BotIdentity {
            &self.identity
        }

        async fn latest_message(
            &self,
            _channel: &str,
            _latest_ts: &str,
        ) -> Result<Option<HistoryMessage>, ApiError> {
            Ok(None)
        }

        async fn post_message(&self, message: &PostMessage) -> Result<String, ApiError> {
            self.posted.lock().expect("posted lock").push(message.clone());
            Ok("1730000001.0001".to_string())
        }

        async fn update_message(
            &self,
            _channel: &str,
            _ts: &str,
            _text: &str,
        ) -> Result<(), ApiError> {
            Ok(())
        }

        async fn remove_reaction(
            &self,
            _channel: &str,
            _ts: &str,
            _name: &str,
        ) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn config_for(channel_id: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.slack.channel_id = channel_id.to_string();
        config.bot.welcome_message = Some("Welcome to support!".to_string());
        config
    }

    fn root_message(channel_id: &str) -> SlackEnvelope {
        SlackEnvelope {
            envelope_id: "env-1".to_string(),
            event: SlackEvent::Message(MessageEvent {
                channel_id: channel_id.to_string(),
                user_id: Some("U1".to_string()),
                text: Some("help please".to_string()),
                ts: "1730000000.0001".to_string(),
                thread_ts: None,
                subtype: None,
            }),
        }
    }

    #[tokio::test]
    async fn dispatcher_wires_channel_and_welcome_text_from_config() {
        let api = Arc::new(StubSlack::new());
        let store = Arc::new(MemoryInteractionStore::new());
        let dispatcher = build_dispatcher(api.clone(), store.clone(), &config_for("C1"));
        assert_eq!(dispatcher.handler_count(), 2);

        let ignored = dispatcher
            .dispatch(&root_message("C2"), &EventContext::default())
            .await
            .expect("dispatch");
        assert_eq!(ignored, HandlerResult::Ignored);

        let welcomed = dispatcher
            .dispatch(&root_message("C1"), &EventContext::default())
            .await
            .expect("dispatch");
        assert!(matches!(welcomed, HandlerResult::Welcomed { .. }));
        assert!(store.contains(&UserId::from("U1")));

        let posted = api.posted.lock().expect("posted lock").clone();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].text, "Welcome to support!");
        assert_eq!(posted[0].thread_ts.as_deref(), Some("1730000000.0001"));
    }

    #[tokio::test]
    async fn bootstrap_fails_when_slack_is_unreachable() {
        let dir = TempDir::new().expect("temp dir");
        let mut config = config_for("C1");
        config.storage.path = dir.path().join("user_interactions.json");
        config.slack.api_base_url = "http://127.0.0.1:1".to_string();
        config.slack.bot_token = "xoxb-test".to_string().into();

        let result = bootstrap_with_config(config).await;

        assert!(matches!(result, Err(BootstrapError::SlackIdentity(ApiError::Http { .. }))));
        assert!(dir.path().join("user_interactions.json").exists());
    }
}
