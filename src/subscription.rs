use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info};

use crate::client::ApiClient;
use crate::error::ClientResult;
use crate::models::{
    CheckoutRequest, CheckoutResponse, MessageResponse, PortalResponse, Subscription, SubscriptionState,
    SubscriptionStatus,
};

/// Remote source of truth for subscription state. No caching and no retry.
#[async_trait]
pub trait SubscriptionOracle: Send + Sync {
    /// Current status as the backend last recorded it.
    async fn fetch_status(&self) -> ClientResult<SubscriptionStatus>;

    /// Ask the backend to resync with the payment processor, then return
    /// the resulting status.
    async fn refresh_status(&self) -> ClientResult<SubscriptionStatus>;
}

/// Active or trialing, or canceled but still inside the paid period.
pub fn is_subscription_active(subscription: Option<&Subscription>, now: DateTime<Utc>) -> bool {
    let Some(sub) = subscription else {
        return false;
    };
    matches!(sub.status, SubscriptionState::Active | SubscriptionState::Trialing)
        || (sub.cancel_at_period_end && now < sub.current_period_end)
}

pub fn is_active(status: &SubscriptionStatus, now: DateTime<Utc>) -> bool {
    is_subscription_active(status.subscription.as_ref(), now)
}

pub fn format_status(state: &SubscriptionState) -> String {
    match state {
        SubscriptionState::Active => "Active".to_string(),
        SubscriptionState::Trialing => "Trial Period".to_string(),
        SubscriptionState::PastDue => "Past Due".to_string(),
        SubscriptionState::Canceled => "Canceled".to_string(),
        SubscriptionState::Unpaid => "Unpaid".to_string(),
        SubscriptionState::Incomplete => "Incomplete".to_string(),
        SubscriptionState::IncompleteExpired => "Expired".to_string(),
        SubscriptionState::Other(raw) => {
            let mut chars = raw.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

/// Whole days left in the current period, rounded up, never negative.
pub fn days_remaining(subscription: Option<&Subscription>, now: DateTime<Utc>) -> i64 {
    let Some(sub) = subscription else {
        return 0;
    };
    let millis = (sub.current_period_end - now).num_milliseconds();
    let day = 24 * 60 * 60 * 1000;
    let days = millis.div_euclid(day) + i64::from(millis.rem_euclid(day) != 0);
    days.max(0)
}

/// e.g. "March 5, 2026"
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%B %-d, %Y").to_string()
}

/// Billing endpoints of the backend.
#[derive(Clone)]
pub struct SubscriptionService {
    api: ApiClient,
}

impl SubscriptionService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn create_checkout_session(
        &self,
        success_url: Option<String>,
        cancel_url: Option<String>,
    ) -> ClientResult<CheckoutResponse> {
        let request = CheckoutRequest { success_url, cancel_url };
        let checkout: CheckoutResponse = self
            .api
            .post("/api/subscription/create-checkout-session", &request)
            .await
            .map_err(|e| {
                error!(error = %e, "Error creating checkout session");
                e.into_remote_unavailable("Failed to create checkout session")
            })?;
        info!(session_id = %checkout.session_id, "Checkout session created");
        Ok(checkout)
    }

    pub async fn cancel(&self) -> ClientResult<MessageResponse> {
        let response: Option<MessageResponse> = self
            .api
            .post("/api/subscription/cancel", &json!({}))
            .await
            .map_err(|e| {
                error!(error = %e, "Error canceling subscription");
                e.into_remote_unavailable("Failed to cancel subscription")
            })?;
        info!("Subscription set to cancel at period end");
        Ok(response.unwrap_or_default())
    }

    pub async fn reactivate(&self) -> ClientResult<MessageResponse> {
        let response: Option<MessageResponse> = self
            .api
            .post("/api/subscription/reactivate", &json!({}))
            .await
            .map_err(|e| {
                error!(error = %e, "Error reactivating subscription");
                e.into_remote_unavailable("Failed to reactivate subscription")
            })?;
        info!("Subscription reactivated");
        Ok(response.unwrap_or_default())
    }

    pub async fn customer_portal(&self) -> ClientResult<PortalResponse> {
        self.api
            .post("/api/subscription/customer-portal", &json!({}))
            .await
            .map_err(|e| {
                error!(error = %e, "Error opening customer portal");
                e.into_remote_unavailable("Failed to access customer portal")
            })
    }
}

#[async_trait]
impl SubscriptionOracle for SubscriptionService {
    async fn fetch_status(&self) -> ClientResult<SubscriptionStatus> {
        self.api.get("/api/subscription/status").await.map_err(|e| {
            error!(error = %e, "Error getting subscription status");
            e.into_remote_unavailable("Failed to get subscription status")
        })
    }

    async fn refresh_status(&self) -> ClientResult<SubscriptionStatus> {
        self.api
            .post("/api/subscription/refresh", &json!({}))
            .await
            .map_err(|e| {
                error!(error = %e, "Error refreshing subscription status");
                e.into_remote_unavailable("Failed to refresh subscription status")
            })
    }
}
