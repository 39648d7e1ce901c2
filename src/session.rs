use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::models::{TokenResponse, User};
use crate::storage::{
    KeyValueStore, MemoryStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SAVED_JOBS_KEY, SESSION_KEYS, USER_KEY,
};

/// Snapshot of who is signed in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    pub fn is_premium(&self) -> bool {
        self.user.as_ref().is_some_and(User::is_premium)
    }
}

struct Inner {
    state: SessionState,
    store: Box<dyn KeyValueStore>,
}

/// The signed-in session and its persisted copy.
///
/// All mutation goes through the methods below and is serialized by one
/// lock, so the in-memory state and the store never diverge. Concurrent
/// writers still race in the sense that the last one to take the lock wins.
pub struct Session {
    inner: Mutex<Inner>,
}

impl Session {
    /// Loads whatever a previous run persisted.
    pub fn restore(store: Box<dyn KeyValueStore>) -> Self {
        let access_token = read_key(store.as_ref(), ACCESS_TOKEN_KEY);
        let refresh_token = read_key(store.as_ref(), REFRESH_TOKEN_KEY);
        let user = read_key(store.as_ref(), USER_KEY).and_then(|raw| match serde_json::from_str::<User>(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable persisted user");
                None
            }
        });

        // A user record without a token is not a session
        let state = match access_token {
            Some(_) => SessionState {
                user,
                access_token,
                refresh_token,
            },
            None => SessionState {
                refresh_token,
                ..Default::default()
            },
        };

        Self {
            inner: Mutex::new(Inner { state, store }),
        }
    }

    pub fn in_memory() -> Self {
        Self::restore(Box::new(MemoryStore::new()))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock().state.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().state.access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock().state.refresh_token.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.lock().state.user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().state.is_authenticated()
    }

    pub fn is_premium(&self) -> bool {
        self.lock().state.is_premium()
    }

    /// Start a session from a verification or OAuth callback response.
    pub fn sign_in(&self, tokens: &TokenResponse) {
        let mut inner = self.lock();
        inner.state.access_token = Some(tokens.access_token.clone());
        if let Some(refresh) = &tokens.refresh_token {
            inner.state.refresh_token = Some(refresh.clone());
        }
        if let Some(user) = &tokens.user {
            inner.state.user = Some(user.clone());
        }
        persist_all(&mut inner);
        debug!("Session started");
    }

    /// Apply a token refresh: new access token, rotated refresh token and
    /// updated roles when the backend sends them.
    pub fn apply_refresh(&self, tokens: &TokenResponse) {
        let mut inner = self.lock();
        inner.state.access_token = Some(tokens.access_token.clone());
        if let Some(refresh) = &tokens.refresh_token {
            inner.state.refresh_token = Some(refresh.clone());
        }
        if let Some(user) = &tokens.user {
            inner.state.user = Some(user.clone());
        } else if let (Some(roles), Some(user)) = (&tokens.roles, inner.state.user.as_mut()) {
            user.roles = roles.clone();
        }
        persist_all(&mut inner);
    }

    pub fn update_user(&self, user: User) {
        let mut inner = self.lock();
        inner.state.user = Some(user);
        persist_all(&mut inner);
    }

    /// Drop the session and every persisted key, saved jobs included.
    pub fn sign_out(&self) {
        let mut inner = self.lock();
        inner.state = SessionState::default();
        for key in SESSION_KEYS {
            if let Err(e) = inner.store.remove(key) {
                warn!(key, error = %e, "Failed to clear persisted key");
            }
        }
        debug!("Session cleared");
    }

    pub fn saved_job_ids(&self) -> Vec<String> {
        let inner = self.lock();
        read_key(inner.store.as_ref(), SAVED_JOBS_KEY)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn set_saved_job_ids(&self, ids: &[String]) {
        let mut inner = self.lock();
        match serde_json::to_string(ids) {
            Ok(raw) => write_key(inner.store.as_mut(), SAVED_JOBS_KEY, &raw),
            Err(e) => warn!(error = %e, "Failed to serialize saved jobs"),
        }
    }

    #[cfg(test)]
    pub fn persisted(&self, key: &str) -> Option<String> {
        read_key(self.lock().store.as_ref(), key)
    }
}

fn read_key(store: &dyn KeyValueStore, key: &str) -> Option<String> {
    match store.get(key) {
        Ok(value) => value,
        Err(e) => {
            warn!(key, error = %e, "Failed to read persisted key");
            None
        }
    }
}

fn write_key(store: &mut dyn KeyValueStore, key: &str, value: &str) {
    if let Err(e) = store.set(key, value) {
        warn!(key, error = %e, "Failed to persist key");
    }
}

fn remove_key(store: &mut dyn KeyValueStore, key: &str) {
    if let Err(e) = store.remove(key) {
        warn!(key, error = %e, "Failed to clear persisted key");
    }
}

fn persist_all(inner: &mut Inner) {
    let Inner { state, store } = inner;
    match &state.access_token {
        Some(token) => write_key(store.as_mut(), ACCESS_TOKEN_KEY, token),
        None => remove_key(store.as_mut(), ACCESS_TOKEN_KEY),
    }
    match &state.refresh_token {
        Some(token) => write_key(store.as_mut(), REFRESH_TOKEN_KEY, token),
        None => remove_key(store.as_mut(), REFRESH_TOKEN_KEY),
    }
    match state.user.as_ref().map(serde_json::to_string) {
        Some(Ok(raw)) => write_key(store.as_mut(), USER_KEY, &raw),
        Some(Err(e)) => warn!(error = %e, "Failed to serialize user"),
        None => remove_key(store.as_mut(), USER_KEY),
    }
}
