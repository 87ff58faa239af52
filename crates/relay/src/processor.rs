use std::sync::Arc;

use {
    async_trait::async_trait,
    reqwest::StatusCode,
    tracing::{debug, info, warn},
};

use teamsmirror_graph::{ApiGateway, ApiMethod, ChatMessage, Notification, Result};

use crate::{context::RelayContext, queue::NotificationHandler};

/// What happened to one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Subscription lifecycle signal, not a message event.
    Lifecycle,
    /// `clientState` did not match the configured secret.
    ClientStateMismatch,
    /// Own user ID is not known yet, so self-sent messages cannot be told apart.
    IdentityUnresolved,
    /// Fetching the referenced message failed with this status.
    FetchFailed(StatusCode),
    /// The message was sent by the relay's own identity.
    SelfSent,
    /// The message lacks a chat ID or content.
    Incomplete,
    Relayed,
    /// Graph refused the mirrored message with this status.
    SendFailed(StatusCode),
}

impl Outcome {
    /// Dropped on purpose rather than through a failure.
    pub fn is_filtered(&self) -> bool {
        matches!(
            self,
            Self::Lifecycle
                | Self::ClientStateMismatch
                | Self::IdentityUnresolved
                | Self::SelfSent
                | Self::Incomplete
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::FetchFailed(_) | Self::SendFailed(_))
    }
}

/// Filters one notification and mirrors the referenced message.
pub struct NotificationProcessor {
    gateway: ApiGateway,
    context: Arc<RelayContext>,
}

impl NotificationProcessor {
    pub fn new(gateway: ApiGateway, context: Arc<RelayContext>) -> Self {
        Self { gateway, context }
    }

    pub async fn process(&self, notification: &Notification) -> Result<Outcome> {
        if let Some(event) = notification.lifecycle_event() {
            warn!(
                subscription_id = %notification.subscription_id,
                event,
                "lifecycle notification received, subscription is not renewed automatically"
            );
            return Ok(Outcome::Lifecycle);
        }

        if !self.context.client_state_matches(&notification.client_state) {
            warn!(
                subscription_id = %notification.subscription_id,
                "clientState mismatch, ignoring notification"
            );
            return Ok(Outcome::ClientStateMismatch);
        }

        if self.context.self_identity().is_none() {
            warn!("self identity unresolved, refusing to mirror");
            return Ok(Outcome::IdentityUnresolved);
        }

        if notification.resource.is_empty() {
            debug!(
                subscription_id = %notification.subscription_id,
                "notification names no resource"
            );
            return Ok(Outcome::Incomplete);
        }

        let resp = self
            .gateway
            .call(ApiMethod::Get, &notification.resource, None)
            .await?;
        if !resp.is_success() {
            debug!(
                resource = %notification.resource,
                status = %resp.status,
                "message fetch failed"
            );
            return Ok(Outcome::FetchFailed(resp.status));
        }
        let message: ChatMessage = resp.json()?;

        if let Some(sender) = message.sender_id()
            && self.context.is_self(sender)
        {
            debug!(message_id = ?message.id, "ignoring self-sent message");
            return Ok(Outcome::SelfSent);
        }

        let (Some(chat_id), Some(content)) = (message.chat_id(), message.content()) else {
            debug!(message_id = ?message.id, "message has no chat id or content");
            return Ok(Outcome::Incomplete);
        };

        info!(chat_id, "mirroring message");
        let resp = self
            .gateway
            .send_chat_message(chat_id, content, message.content_type())
            .await?;
        if resp.is_success() {
            Ok(Outcome::Relayed)
        } else {
            Ok(Outcome::SendFailed(resp.status))
        }
    }
}

#[async_trait]
impl NotificationHandler for NotificationProcessor {
    async fn handle(&self, notification: &Notification) -> Result<Outcome> {
        self.process(notification).await
    }
}
