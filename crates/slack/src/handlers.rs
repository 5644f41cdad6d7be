//! Handlers for the support channel: welcome first-time askers, let askers resolve threads.

use std::sync::Arc;

use async_trait::async_trait;
use greeter_core::{InteractionStore, ResolutionLog, ThreadState, UserId};
use tracing::{debug, error, info, warn};

use crate::{
    api::{ApiError, HistoryMessage, PostMessage, SlackApi},
    events::{
        EventContext, EventHandler, EventHandlerError, HandlerResult, MessageEvent,
        ReactionAddedEvent, SlackEnvelope, SlackEvent, SlackEventType,
    },
    messages::{self, WelcomeText, FALLBACK_MESSAGE},
};

/// Posts the welcome text in a thread under a user's first root-level message.
pub struct WelcomeHandler {
    api: Arc<dyn SlackApi>,
    store: Arc<dyn InteractionStore>,
    channel_id: String,
    welcome: WelcomeText,
}

impl WelcomeHandler {
    pub fn new(
        api: Arc<dyn SlackApi>,
        store: Arc<dyn InteractionStore>,
        channel_id: impl Into<String>,
        welcome: WelcomeText,
    ) -> Self {
        Self { api, store, channel_id: channel_id.into(), welcome }
    }

    fn eligible_author<'a>(&self, event: &'a MessageEvent) -> Option<&'a str> {
        if event.channel_id != self.channel_id {
            return None;
        }
        let user_id = event.user_id.as_deref().filter(|user_id| !user_id.is_empty())?;
        let has_text = event.text.as_deref().is_some_and(|text| !text.is_empty());
        if !has_text || !event.is_plain() {
            return None;
        }
        // Replies never trigger a welcome, even from unseen users.
        if !event.is_root_level() {
            return None;
        }
        Some(user_id)
    }

    async fn reply_with_fallback(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
        cause: ApiError,
    ) -> Result<HandlerResult, EventHandlerError> {
        warn!(
            event_name = "handler.welcome.failed",
            correlation_id = %ctx.correlation_id,
            channel_id = %event.channel_id,
            thread_ts = %event.ts,
            error = %cause,
            "error processing message; sending fallback reply"
        );

        let fallback = PostMessage::threaded(&event.channel_id, &event.ts, FALLBACK_MESSAGE);
        match self.api.post_message(&fallback).await {
            Ok(_) => Ok(HandlerResult::FallbackReplied),
            Err(fallback_error) => {
                error!(
                    event_name = "handler.welcome.fallback_failed",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %event.channel_id,
                    thread_ts = %event.ts,
                    error = %fallback_error,
                    "fallback reply failed"
                );
                Err(EventHandlerError::Welcome(cause))
            }
        }
    }
}

#[async_trait]
impl EventHandler for WelcomeHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::Message
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::Message(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        let Some(author) = self.eligible_author(event) else {
            return Ok(HandlerResult::Ignored);
        };

        let user_id = UserId::from(author);
        let store = Arc::clone(&self.store);
        let recorded = {
            let user_id = user_id.clone();
            // The file store writes synchronously under its lock.
            tokio::task::spawn_blocking(move || store.record_first_interaction(&user_id)).await
        };
        let first_interaction = recorded.map_err(|join_error| {
            error!(
                event_name = "handler.welcome.store_failed",
                correlation_id = %ctx.correlation_id,
                user_id = %user_id,
                error = %join_error,
                "interaction store task failed"
            );
            EventHandlerError::Store(join_error.to_string())
        })?;
        if !first_interaction {
            debug!(
                event_name = "handler.welcome.already_welcomed",
                correlation_id = %ctx.correlation_id,
                user_id = %user_id,
                "user already welcomed"
            );
            return Ok(HandlerResult::Processed);
        }

        let reply = PostMessage::threaded(&event.channel_id, &event.ts, self.welcome.as_str());
        match self.api.post_message(&reply).await {
            Ok(reply_ts) => {
                info!(
                    event_name = "handler.welcome.sent",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %event.channel_id,
                    thread_ts = %event.ts,
                    user_id = %user_id,
                    welcomed_users = self.store.len(),
                    "posted welcome message"
                );
                Ok(HandlerResult::Welcomed { user_id: user_id.0, reply_ts })
            }
            Err(error) => self.reply_with_fallback(event, ctx, error).await,
        }
    }
}

/// Lets the original asker mark a thread solved by reacting with a checkmark on the
/// bot's welcome message.
pub struct ResolveHandler {
    api: Arc<dyn SlackApi>,
    resolutions: ResolutionLog,
}

impl ResolveHandler {
    pub fn new(api: Arc<dyn SlackApi>) -> Self {
        Self { api, resolutions: ResolutionLog::new() }
    }

    async fn fetch(
        &self,
        channel: &str,
        ts: &str,
    ) -> Result<Option<HistoryMessage>, EventHandlerError> {
        self.api.latest_message(channel, ts).await.map_err(EventHandlerError::Resolve)
    }

    async fn revoke_reaction(
        &self,
        event: &ReactionAddedEvent,
        ctx: &EventContext,
    ) -> HandlerResult {
        let removed = self
            .api
            .remove_reaction(&event.channel_id, &event.message_ts, &event.reaction)
            .await;
        match removed {
            Ok(()) => info!(
                event_name = "handler.resolve.reaction_removed",
                correlation_id = %ctx.correlation_id,
                channel_id = %event.channel_id,
                thread_ts = %event.root_ts(),
                reactor_user_id = %event.reactor_user_id,
                "removed checkmark from non-asker"
            ),
            Err(error) => warn!(
                event_name = "handler.resolve.reaction_remove_failed",
                correlation_id = %ctx.correlation_id,
                channel_id = %event.channel_id,
                thread_ts = %event.root_ts(),
                reactor_user_id = %event.reactor_user_id,
                error = %error,
                "could not remove reaction"
            ),
        }
        HandlerResult::ReactionRevoked { reactor_user_id: event.reactor_user_id.clone() }
    }
}

#[async_trait]
impl EventHandler for ResolveHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::ReactionAdded
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::ReactionAdded(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if !messages::is_checkmark(&event.reaction) {
            return Ok(HandlerResult::Ignored);
        }

        let root = self.fetch(&event.channel_id, event.root_ts()).await?;
        let target = self.fetch(&event.channel_id, &event.message_ts).await?;

        // The lookback may land on an older message when the reacted one is not in history.
        let Some(target) = target.filter(|message| message.ts == event.message_ts) else {
            debug!(
                event_name = "handler.resolve.target_missing",
                correlation_id = %ctx.correlation_id,
                channel_id = %event.channel_id,
                message_ts = %event.message_ts,
                "reacted message not found"
            );
            return Ok(HandlerResult::Ignored);
        };

        if target.bot_id.as_deref() != Some(self.api.bot_identity().bot_id.as_str()) {
            return Ok(HandlerResult::Ignored);
        }

        if self.resolutions.state_of(&target.ts, &target.text) == ThreadState::Solved {
            debug!(
                event_name = "handler.resolve.already_solved",
                correlation_id = %ctx.correlation_id,
                message_ts = %target.ts,
                "thread already marked solved"
            );
            return Ok(HandlerResult::Ignored);
        }

        let Some(asker) = root.as_ref().and_then(|message| message.user.as_deref()) else {
            warn!(
                event_name = "handler.resolve.root_missing",
                correlation_id = %ctx.correlation_id,
                channel_id = %event.channel_id,
                thread_ts = %event.root_ts(),
                "thread root or its author not found; dropping reaction event"
            );
            return Ok(HandlerResult::Ignored);
        };
        if asker != event.reactor_user_id {
            return Ok(self.revoke_reaction(event, ctx).await);
        }

        if !self.resolutions.mark_solved(&target.ts) {
            return Ok(HandlerResult::Ignored);
        }
        let solved_text = messages::mark_solved(&target.text, &event.reactor_user_id);
        if let Err(error) =
            self.api.update_message(&event.channel_id, &target.ts, &solved_text).await
        {
            self.resolutions.release(&target.ts);
            return Err(EventHandlerError::Resolve(error));
        }

        info!(
            event_name = "handler.resolve.marked_solved",
            correlation_id = %ctx.correlation_id,
            channel_id = %event.channel_id,
            thread_ts = %event.root_ts(),
            resolver_user_id = %event.reactor_user_id,
            "thread marked as solved"
        );
        Ok(HandlerResult::MarkedSolved { resolver_user_id: event.reactor_user_id.clone() })
    }
}
