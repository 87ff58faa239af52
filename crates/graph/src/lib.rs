//! Microsoft Graph plumbing for the chat mirror relay.
//!
//! Refresh-token based delegated auth, an authenticated call wrapper over the
//! Graph REST surface, and change-notification subscription management.

pub mod authorize;
pub mod config;
pub mod error;
pub mod gateway;
pub mod subscription;
pub mod token;
pub mod types;

pub use {
    authorize::{AuthorizationRequest, TokenGrant, authorization_request, redeem_authorization_code},
    config::GraphConfig,
    error::{Error, Result},
    gateway::{ApiGateway, ApiMethod, ApiResponse},
    subscription::{SubscriptionManager, SubscriptionSettings},
    token::{StaticToken, TokenProvider, TokenSource},
    types::{ChatMessage, Notification, NotificationBatch, Subscription},
};
