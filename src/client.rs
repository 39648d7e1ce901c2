use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{server_message, ClientError, ClientResult};
use crate::models::TokenResponse;
use crate::session::Session;

const REFRESH_PATH: &str = "/api/auth/refresh";

/// HTTP access to the job-board backend.
///
/// Every request reads the current access token from the session when it is
/// built. A 401 triggers exactly one token refresh followed by one resend of
/// the same request; simultaneous 401s each refresh on their own.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    session: Arc<Session>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration, session: Arc<Session>) -> ClientResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match self.session.access_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let body = self.execute(Method::GET, path, |req| req).await?;
        parse_body(&body)
    }

    pub async fn get_query<T, Q>(&self, path: &str, query: &Q) -> ClientResult<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let body = self.execute(Method::GET, path, |req| req.query(query)).await?;
        parse_body(&body)
    }

    pub async fn post<T, B>(&self, path: &str, payload: &B) -> ClientResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = self.execute(Method::POST, path, |req| req.json(payload)).await?;
        parse_body(&body)
    }

    pub async fn put<T, B>(&self, path: &str, payload: &B) -> ClientResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = self.execute(Method::PUT, path, |req| req.json(payload)).await?;
        parse_body(&body)
    }

    /// DELETE with an optional JSON body; the response body is ignored.
    pub async fn delete<B>(&self, path: &str, payload: Option<&B>) -> ClientResult<()>
    where
        B: Serialize + ?Sized,
    {
        self.execute(Method::DELETE, path, |req| match payload {
            Some(p) => req.json(p),
            None => req,
        })
        .await?;
        Ok(())
    }

    async fn execute<F>(&self, method: Method, path: &str, build: F) -> ClientResult<String>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let response = build(self.request(method.clone(), path)).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED && path != REFRESH_PATH {
            debug!(%method, path, "401 received, refreshing access token");
            let rejected = response.text().await.ok().and_then(|body| server_message(&body));
            if !self.refresh_access_token().await {
                return Err(ClientError::Unauthorized(rejected));
            }
            let retried = build(self.request(method, path)).send().await?;
            return read_response(retried).await;
        }

        read_response(response).await
    }

    /// Exchange the refresh token for a new access token and role set.
    ///
    /// Any failure (no refresh token, transport error, rejected token or a
    /// malformed response) signs the session out.
    pub async fn refresh_access_token(&self) -> bool {
        let Some(refresh_token) = self.session.refresh_token() else {
            warn!("No refresh token available, signing out");
            self.session.sign_out();
            return false;
        };

        match self.exchange_refresh_token(&refresh_token).await {
            Ok(tokens) => {
                self.session.apply_refresh(&tokens);
                info!("Access token refreshed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, signing out");
                self.session.sign_out();
                false
            }
        }
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> ClientResult<TokenResponse> {
        let response = self
            .http
            .post(self.url(REFRESH_PATH))
            .json(&json!({ "refreshToken": refresh_token }))
            .send()
            .await?;
        let body = read_response(response).await?;
        parse_body(&body)
    }
}

async fn read_response(response: Response) -> ClientResult<String> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        return Ok(body);
    }

    let message = server_message(&body);
    match status {
        StatusCode::UNAUTHORIZED => Err(ClientError::Unauthorized(message)),
        StatusCode::NOT_FOUND => Err(ClientError::NotFound(message)),
        _ => Err(ClientError::Api {
            status: status.as_u16(),
            message: message.unwrap_or_default(),
        }),
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> ClientResult<T> {
    let body = if body.trim().is_empty() { "null" } else { body };
    Ok(serde_json::from_str(body)?)
}
