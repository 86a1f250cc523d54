//! Access token provider
//!
//! Scrapes an anonymous web-player session token and keeps it until it
//! expires. Callers always get their own copy of the token.

use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::utils::WallClock;

lazy_static! {
    static ref SESSION_SCRIPT: Regex = Regex::new(
        r#"(?s)<script id="session" data-testid="session" type="application/json">(\{.*?\})</script>"#
    )
    .unwrap();
}

/// Default page carrying the session script
pub const DEFAULT_SESSION_URL: &str = "https://open.spotify.com/search";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Tokens this close to expiry are refreshed early
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Bearer token with its expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub client_id: Option<String>,
    /// Epoch milliseconds
    pub expires_at: i64,
}

impl AccessToken {
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionPayload {
    access_token: String,
    client_id: Option<String>,
    access_token_expiration_timestamp_ms: i64,
}

/// Extract the session token from the web-player HTML
pub fn extract_session(html: &str) -> Result<AccessToken, AuthError> {
    let json = SESSION_SCRIPT
        .captures(html)
        .and_then(|caps| caps.get(1))
        .ok_or(AuthError::MissingSession)?
        .as_str();
    let payload: SessionPayload =
        serde_json::from_str(json).map_err(|e| AuthError::Decode(e.to_string()))?;
    if payload.access_token.is_empty() {
        return Err(AuthError::Decode("empty access token".to_string()));
    }
    Ok(AccessToken {
        token: payload.access_token,
        client_id: payload.client_id,
        expires_at: payload.access_token_expiration_timestamp_ms,
    })
}

/// Access token could not be obtained
#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    Request(String),
    Status(u16),
    /// The page did not contain a session script
    MissingSession,
    Decode(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Request(e) => write!(f, "Token request failed: {}", e),
            AuthError::Status(code) => write!(f, "Token request failed with HTTP {}", code),
            AuthError::MissingSession => write!(f, "No session found in page"),
            AuthError::Decode(e) => write!(f, "Failed to decode session: {}", e),
        }
    }
}

impl std::error::Error for AuthError {}

/// Caching access token provider
///
/// The cache lock is held across a refresh, so concurrent callers wait
/// for one fetch instead of issuing their own.
pub struct AuthProvider {
    http: reqwest::Client,
    session_url: String,
    clock: Arc<dyn WallClock>,
    cached: Mutex<Option<AccessToken>>,
}

impl std::fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthProvider")
            .field("session_url", &self.session_url)
            .finish_non_exhaustive()
    }
}

impl AuthProvider {
    pub fn new(http: reqwest::Client, session_url: String, clock: Arc<dyn WallClock>) -> Self {
        Self {
            http,
            session_url,
            clock,
            cached: Mutex::new(None),
        }
    }

    /// Current token, fetching a new one when missing or about to expire
    pub async fn access_token(&self) -> Result<AccessToken, AuthError> {
        let mut cached = self.cached.lock().await;
        let threshold = self.clock.now_millis() + EXPIRY_MARGIN.as_millis() as i64;
        if let Some(token) = cached.as_ref().filter(|t| t.is_valid_at(threshold)) {
            return Ok(token.clone());
        }

        let token = self.fetch().await?;
        info!(
            "Obtained access token (expires in {}s)",
            (token.expires_at - self.clock.now_millis()) / 1000
        );
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token, e.g. after the service rejected it
    pub async fn invalidate(&self) {
        debug!("Invalidating cached access token");
        *self.cached.lock().await = None;
    }

    async fn fetch(&self) -> Result<AccessToken, AuthError> {
        let response = self
            .http
            .get(&self.session_url)
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AuthError::Status(response.status().as_u16()));
        }
        let html = response
            .text()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        extract_session(&html)
    }

    #[cfg(test)]
    pub async fn seed(&self, token: AccessToken) {
        *self.cached.lock().await = Some(token);
    }
}
