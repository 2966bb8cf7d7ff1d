//! Notification channel
//!
//! Posting, reading back and editing case notifications. Callers treat every
//! failure here as best-effort: the case record stays authoritative whether
//! or not its message survives.

use crate::audit::error::AuditResult;
use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, EditMessage, Http, MessageId};
use std::sync::Arc;

/// A message as the channel accepted it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub id: MessageId,
    pub content: String,
}

/// A channel where case notifications are posted
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post a new message
    async fn post(&self, channel_id: ChannelId, content: &str) -> AuditResult<PostedMessage>;

    /// Current text of a posted message
    async fn fetch_content(&self, channel_id: ChannelId, message_id: MessageId)
    -> AuditResult<String>;

    /// Replace the text of a posted message
    async fn edit(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        content: &str,
    ) -> AuditResult<()>;
}

/// Notifier backed by the Discord HTTP API
pub struct SerenityNotifier {
    http: Arc<Http>,
}

impl SerenityNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Notifier for SerenityNotifier {
    async fn post(&self, channel_id: ChannelId, content: &str) -> AuditResult<PostedMessage> {
        let message = channel_id.say(self.http.as_ref(), content).await?;
        Ok(PostedMessage {
            id: message.id,
            content: message.content,
        })
    }

    async fn fetch_content(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> AuditResult<String> {
        let message = channel_id.message(self.http.as_ref(), message_id).await?;
        Ok(message.content)
    }

    async fn edit(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        content: &str,
    ) -> AuditResult<()> {
        channel_id
            .edit_message(
                self.http.as_ref(),
                message_id,
                EditMessage::new().content(content),
            )
            .await?;
        Ok(())
    }
}
