use {
    chrono::{DateTime, Duration, SecondsFormat, Utc},
    secrecy::{ExposeSecret, Secret},
    tracing::{error, info, warn},
};

use crate::{
    Result,
    gateway::{ApiGateway, ApiMethod},
    types::{Subscription, SubscriptionList},
};

/// Longest lifetime Graph grants a `chatMessage` subscription.
pub const MAX_EXPIRATION_MINUTES: i64 = 4320;

/// Requested lifetime when nothing else is configured: 70 hours.
pub const DEFAULT_EXPIRATION_MINUTES: i64 = 70 * 60;

/// Parameters shared by every subscription this relay creates.
#[derive(Clone)]
pub struct SubscriptionSettings {
    /// Absolute webhook URL (`{base}/api/webhook`).
    pub notification_url: String,
    pub client_state: Secret<String>,
    pub expiration_minutes: i64,
}

impl std::fmt::Debug for SubscriptionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSettings")
            .field("notification_url", &self.notification_url)
            .field("client_state", &"[REDACTED]")
            .field("expiration_minutes", &self.expiration_minutes)
            .finish()
    }
}

/// Expiration for a subscription created at `now`, never past the Graph maximum.
pub fn expiration_for(now: DateTime<Utc>, requested_minutes: i64) -> DateTime<Utc> {
    let minutes = requested_minutes.clamp(1, MAX_EXPIRATION_MINUTES);
    now + Duration::minutes(minutes)
}

/// Creates, lists and deletes change-notification subscriptions.
pub struct SubscriptionManager {
    gateway: ApiGateway,
    settings: SubscriptionSettings,
}

impl SubscriptionManager {
    pub fn new(gateway: ApiGateway, settings: SubscriptionSettings) -> Self {
        Self { gateway, settings }
    }

    pub fn settings(&self) -> &SubscriptionSettings {
        &self.settings
    }

    /// Request body for watching every chat message of `owner_id`.
    pub fn subscription_request(&self, owner_id: &str, now: DateTime<Utc>) -> serde_json::Value {
        let expiration = expiration_for(now, self.settings.expiration_minutes);
        serde_json::json!({
            "changeType": "created",
            "notificationUrl": self.settings.notification_url,
            "lifecycleNotificationUrl": self.settings.notification_url,
            "resource": format!("/users/{owner_id}/chats/getAllMessages"),
            "expirationDateTime": expiration.to_rfc3339_opts(SecondsFormat::Millis, true),
            "clientState": self.settings.client_state.expose_secret(),
            "includeResourceData": false,
        })
    }

    /// Subscribe to all chat messages of `owner_id`.
    ///
    /// A rejection by Graph is logged and yields `Ok(None)`; the relay keeps
    /// running without notifications.
    pub async fn create_subscription(&self, owner_id: &str) -> Result<Option<Subscription>> {
        let payload = self.subscription_request(owner_id, Utc::now());
        let resp = self
            .gateway
            .call(ApiMethod::Post, "/subscriptions", Some(&payload))
            .await?;

        if !resp.is_success() {
            error!(
                status = %resp.status,
                body = resp.text(),
                "subscription creation rejected"
            );
            return Ok(None);
        }

        let subscription: Subscription = resp.json()?;
        info!(
            subscription_id = %subscription.id,
            expires = %subscription.expiration_date_time,
            "subscription created"
        );
        Ok(Some(subscription))
    }

    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let resp = self
            .gateway
            .call(ApiMethod::Get, "/subscriptions", None)
            .await?
            .error_for_status()?;
        Ok(resp.json::<SubscriptionList>()?.value)
    }

    pub async fn delete_subscription(&self, id: &str) -> Result<()> {
        self.gateway
            .call(ApiMethod::Delete, &format!("/subscriptions/{id}"), None)
            .await?
            .error_for_status()?;
        info!(subscription_id = id, "subscription deleted");
        Ok(())
    }

    /// Delete every subscription visible to this identity. Individual delete
    /// failures are logged and skipped; returns how many were removed.
    pub async fn purge_subscriptions(&self) -> Result<usize> {
        let subscriptions = self.list_subscriptions().await?;
        let mut deleted = 0;
        for subscription in &subscriptions {
            match self.delete_subscription(&subscription.id).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(
                    subscription_id = %subscription.id,
                    error = %e,
                    "failed to delete subscription"
                ),
            }
        }
        Ok(deleted)
    }
}
