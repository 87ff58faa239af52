use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Body of a change-notification delivery: `{"value": [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationBatch {
    pub value: Vec<Notification>,
}

impl NotificationBatch {
    /// Parse a raw webhook body. Anything that is not `{value: [Notification]}`
    /// is a validation error.
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(Error::validation)
    }
}

/// One change or lifecycle notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub subscription_id: String,
    pub client_state: String,
    /// Empty for lifecycle notifications, which name no resource.
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub lifecycle_event: Option<String>,
    #[serde(default)]
    pub change_type: Option<String>,
    #[serde(default)]
    pub subscription_expiration_date_time: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl Notification {
    /// Lifecycle signal name, when this notification is about the
    /// subscription itself rather than about a message. Any non-empty value
    /// counts, whitespace included.
    pub fn lifecycle_event(&self) -> Option<&str> {
        self.lifecycle_event.as_deref().filter(|e| !e.is_empty())
    }
}

/// The slice of a Graph `chatMessage` the relay reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Option<String>,
    pub chat_id: Option<String>,
    pub from: Option<MessageFrom>,
    pub body: Option<ItemBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageFrom {
    pub user: Option<Identity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn sender_id(&self) -> Option<&str> {
        self.from
            .as_ref()?
            .user
            .as_ref()?
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn content(&self) -> Option<&str> {
        self.body
            .as_ref()?
            .content
            .as_deref()
            .filter(|c| !c.is_empty())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.body.as_ref()?.content_type.as_deref()
    }
}

/// A change-notification subscription as Graph reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub resource: String,
    #[serde(default)]
    pub change_type: Option<String>,
    pub expiration_date_time: String,
    #[serde(default)]
    pub client_state: Option<String>,
    pub notification_url: String,
    #[serde(default)]
    pub lifecycle_notification_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubscriptionList {
    #[serde(default)]
    pub value: Vec<Subscription>,
}
