use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::client::ApiClient;
use crate::error::ErrorSlot;
use crate::models::{AuthorizationUrlResponse, MessageResponse, ProfileResponse, TokenResponse, User};
use crate::reconcile::EntitlementSession;
use crate::session::Session;

const OAUTH_STATE_LEN: usize = 32;
const ENTITLEMENT_RECHECK_DELAY: Duration = Duration::from_secs(2);

/// Sign-in flows and the session refreshes the reconciliation loop drives.
pub struct AuthStore {
    api: ApiClient,
    error: ErrorSlot,
}

impl AuthStore {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            error: ErrorSlot::default(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        self.api.session()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_authenticated()
    }

    pub fn is_premium(&self) -> bool {
        self.session().is_premium()
    }

    pub fn user(&self) -> Option<User> {
        self.session().user()
    }

    pub fn error(&self) -> Option<String> {
        self.error.get()
    }

    // --- Magic link ---

    pub async fn send_magic_link(&self, email: &str) -> bool {
        self.error.clear();
        let result: Result<Option<MessageResponse>, _> =
            self.api.post("/api/auth/send-magic-link", &json!({ "email": email })).await;
        match result {
            Ok(_) => {
                info!(email, "Magic link sent");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to send magic link");
                self.error.set(e.user_message("Failed to send magic link. Please try again."));
                false
            }
        }
    }

    pub async fn verify_magic_link(&self, token: &str) -> bool {
        self.error.clear();
        let result: Result<TokenResponse, _> = self.api.get_query("/api/auth/verify", &[("token", token)]).await;
        match result {
            Ok(tokens) => self.complete_sign_in(&tokens).await,
            Err(e) => {
                error!(error = %e, "Magic link verification failed");
                self.error.set(e.user_message("Invalid or expired link. Please request a new one."));
                false
            }
        }
    }

    // --- LinkedIn OAuth ---

    /// Returns the provider URL to visit and the CSRF state it was issued for.
    pub async fn linkedin_authorization_url(&self) -> Option<(String, String)> {
        self.error.clear();
        let state = generate_state();
        let result: Result<AuthorizationUrlResponse, _> =
            self.api.post("/api/auth/linkedin", &json!({ "state": state })).await;
        match result {
            Ok(response) => Some((response.auth_url, state)),
            Err(e) => {
                error!(error = %e, "Failed to start LinkedIn sign-in");
                self.error.set(e.user_message("Failed to connect to LinkedIn. Please try again."));
                None
            }
        }
    }

    pub async fn complete_linkedin(&self, code: &str, state: &str) -> bool {
        self.error.clear();
        let result: Result<TokenResponse, _> = self
            .api
            .get_query("/api/auth/linkedin/callback", &[("code", code), ("state", state)])
            .await;
        match result {
            Ok(tokens) => self.complete_sign_in(&tokens).await,
            Err(e) => {
                error!(error = %e, "LinkedIn callback failed");
                self.error.set(e.user_message("LinkedIn sign-in failed. Please try again."));
                false
            }
        }
    }

    async fn complete_sign_in(&self, tokens: &TokenResponse) -> bool {
        self.session().sign_in(tokens);
        if tokens.user.is_none() && !self.refresh_profile().await {
            warn!("Signed in but the profile could not be loaded");
        }
        info!("Signed in");
        true
    }

    // --- Session refreshes ---

    /// Re-fetch the user record. A 401 goes through the client's single
    /// refresh-and-retry.
    pub async fn refresh_profile(&self) -> bool {
        let result: Result<ProfileResponse, _> = self.api.get("/api/auth/profile").await;
        match result {
            Ok(profile) => {
                self.session().update_user(profile.into_user());
                debug!("Profile refreshed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Profile refresh failed");
                false
            }
        }
    }

    /// Signs the session out on any failure.
    pub async fn refresh_access_token(&self) -> bool {
        self.api.refresh_access_token().await
    }

    /// Alternate profile and token refreshes until the premium flag flips.
    ///
    /// Without polling this is a single profile refresh and reports whether
    /// that refresh worked.
    pub async fn refresh_after_subscription_change(&self, poll_for_changes: bool, max_attempts: u32) -> bool {
        let was_premium = self.is_premium();

        if !poll_for_changes {
            let refreshed = self.refresh_profile().await;
            if self.session().refresh_token().is_some() {
                self.refresh_access_token().await;
            }
            return refreshed;
        }

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(ENTITLEMENT_RECHECK_DELAY).await;
            }
            self.refresh_profile().await;
            if self.is_premium() != was_premium {
                info!(attempt, premium = !was_premium, "Entitlement changed");
                return true;
            }
            let token_refreshed = self.session().refresh_token().is_some() && self.refresh_access_token().await;
            if token_refreshed && self.is_premium() != was_premium {
                info!(attempt, premium = !was_premium, "Entitlement changed after token refresh");
                return true;
            }
        }

        warn!(max_attempts, "Entitlement unchanged after refresh attempts");
        false
    }

    /// Tell the backend, then drop the local session whatever it answered.
    pub async fn logout(&self) {
        if self.is_authenticated() {
            let result: Result<Option<MessageResponse>, _> = self.api.post("/api/auth/logout", &json!({})).await;
            if let Err(e) = result {
                warn!(error = %e, "Server logout failed, clearing local session anyway");
            }
        }
        self.session().sign_out();
        self.error.clear();
        info!("Signed out");
    }
}

fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(OAUTH_STATE_LEN)
        .map(char::from)
        .collect()
}

#[async_trait]
impl EntitlementSession for AuthStore {
    fn is_premium(&self) -> bool {
        AuthStore::is_premium(self)
    }

    fn has_refresh_token(&self) -> bool {
        self.session().refresh_token().is_some()
    }

    async fn refresh_profile(&self) -> bool {
        AuthStore::refresh_profile(self).await
    }

    async fn refresh_access_token(&self) -> bool {
        AuthStore::refresh_access_token(self).await
    }

    async fn refresh_after_subscription_change(&self, poll_for_changes: bool, max_attempts: u32) -> bool {
        AuthStore::refresh_after_subscription_change(self, poll_for_changes, max_attempts).await
    }
}
