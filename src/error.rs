use serde_json::Value;
use std::sync::Mutex;
use thiserror::Error;

/// Errors raised by calls against the job-board backend.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unauthorized")]
    Unauthorized(Option<String>),

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Not found")]
    NotFound(Option<String>),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("{0}")]
    RemoteUnavailable(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Short message suitable for the presentation layer. Server-provided
    /// messages are kept verbatim; everything else collapses to `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ClientError::Api { message, .. } if !message.is_empty() => message.clone(),
            ClientError::RemoteUnavailable(message) => message.clone(),
            ClientError::NotFound(Some(message)) | ClientError::Unauthorized(Some(message)) => message.clone(),
            _ => fallback.to_string(),
        }
    }

    /// Rewrap as `RemoteUnavailable`, keeping a server message if there is one.
    pub fn into_remote_unavailable(self, fallback: &str) -> ClientError {
        match self {
            ClientError::Api { message, .. } if !message.is_empty() => ClientError::RemoteUnavailable(message),
            ClientError::RemoteUnavailable(message)
            | ClientError::NotFound(Some(message))
            | ClientError::Unauthorized(Some(message)) => ClientError::RemoteUnavailable(message),
            _ => ClientError::RemoteUnavailable(fallback.to_string()),
        }
    }
}

/// Last error message of a store, as shown to the user.
#[derive(Debug, Default)]
pub struct ErrorSlot(Mutex<Option<String>>);

impl ErrorSlot {
    pub fn set(&self, message: impl Into<String>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.into());
    }

    pub fn clear(&self) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn get(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Pulls the human-readable message out of an error body: `error`, then
/// `message`, then `error_description`.
pub fn server_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error", "message", "error_description"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
}
