//! Lyrics and stream service client
//!
//! Talks to the companion service that fronts the lyrics provider, the
//! catalog and the stream resolver. Catalog and lyrics routes need the
//! bearer token from `AuthProvider`; the stream route does not.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use super::auth::AuthProvider;
use super::model::{Envelope, LyricPayload, SearchResults, StreamResponse, Track};
use super::TrackCatalog;
use crate::cache::{ResolutionError, StreamResolver};

/// Search results requested per query
const SEARCH_LIMIT: u32 = 5;

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    auth: Arc<AuthProvider>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(http: Client, base_url: &str, auth: Arc<AuthProvider>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.base_url, route)
    }

    /// GET an authenticated envelope route
    async fn get_envelope<T: DeserializeOwned>(
        &self,
        route: &str,
        query: &[(&str, &str)],
    ) -> Result<Envelope<T>> {
        let token = self.auth.access_token().await?;
        let response = self
            .http
            .get(self.url(route))
            .query(query)
            .bearer_auth(&token.token)
            .send()
            .await
            .with_context(|| format!("GET /{} failed", route))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.auth.invalidate().await;
            bail!("Service rejected the access token for /{}", route);
        }
        response
            .json::<Envelope<T>>()
            .await
            .with_context(|| format!("Invalid response from /{} (HTTP {})", route, status))
    }

    /// Fetch the raw lyric payload, `None` when the track has no lyrics
    pub async fn fetch_lyrics(&self, track_id: &str) -> Result<Option<LyricPayload>> {
        let envelope = self
            .get_envelope::<LyricPayload>("lyrics", &[("id", track_id)])
            .await?;
        match envelope.into_result() {
            Ok(payload) => Ok(payload),
            Err(e) => {
                debug!("No lyrics for {}: {}", track_id, e);
                Ok(None)
            }
        }
    }

    /// Fetch catalog metadata for a track
    pub async fn fetch_track(&self, track_id: &str) -> Result<Option<Track>> {
        self.get_envelope::<Track>("track", &[("id", track_id)])
            .await?
            .into_result()
            .map_err(|e| anyhow!("Track lookup failed: {}", e))
    }

    /// Search the catalog for tracks
    pub async fn search(&self, query: &str) -> Result<Vec<Track>> {
        let query = query.trim();
        if query.is_empty() {
            bail!("Search query is empty");
        }
        let limit = SEARCH_LIMIT.to_string();
        let results = self
            .get_envelope::<SearchResults>("search", &[("query", query), ("limit", limit.as_str())])
            .await?
            .into_result()
            .map_err(|e| anyhow!("Search failed: {}", e))?;
        Ok(results.map(SearchResults::into_tracks).unwrap_or_default())
    }
}

/// Validate a stream route reply into a playable URL
pub fn stream_url_from_response(response: StreamResponse) -> Result<String, ResolutionError> {
    if !response.success {
        let reason = response
            .error
            .or(response.message)
            .unwrap_or_else(|| "no reason given".to_string());
        return Err(ResolutionError::Rejected(reason));
    }
    match response.stream_url {
        Some(url) if url.starts_with("http") => Ok(url),
        Some(url) => Err(ResolutionError::InvalidUrl(url)),
        None => Err(ResolutionError::InvalidUrl(String::new())),
    }
}

impl StreamResolver for ApiClient {
    async fn resolve_stream(&self, track_id: &str) -> Result<String, ResolutionError> {
        let response = self
            .http
            .post(self.url("stream"))
            .json(&json!({ "id": track_id }))
            .send()
            .await
            .map_err(|e| ResolutionError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .json::<StreamResponse>()
            .await
            .map_err(|e| ResolutionError::Request(format!("HTTP {}: {}", status, e)))?;
        let url = stream_url_from_response(body)?;
        if !status.is_success() {
            warn!("Stream route answered HTTP {} with a URL", status);
        }
        Ok(url)
    }
}

impl TrackCatalog for ApiClient {
    async fn fetch_lyrics(&self, track_id: &str) -> Result<Option<LyricPayload>> {
        ApiClient::fetch_lyrics(self, track_id).await
    }

    async fn fetch_track(&self, track_id: &str) -> Result<Option<Track>> {
        ApiClient::fetch_track(self, track_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::SystemClock;

    fn response(success: bool, url: Option<&str>, error: Option<&str>) -> StreamResponse {
        StreamResponse {
            success,
            stream_url: url.map(str::to_string),
            message: None,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_stream_url_accepted() {
        let url = stream_url_from_response(response(true, Some("https://cdn.example/a.m4a"), None));
        assert_eq!(url, Ok("https://cdn.example/a.m4a".to_string()));
    }

    #[test]
    fn test_stream_url_must_be_http() {
        assert_eq!(
            stream_url_from_response(response(true, Some("file:///etc/passwd"), None)),
            Err(ResolutionError::InvalidUrl("file:///etc/passwd".to_string()))
        );
        assert!(stream_url_from_response(response(true, None, None)).is_err());
    }

    #[test]
    fn test_stream_failure_is_rejected() {
        assert_eq!(
            stream_url_from_response(response(false, None, Some("Track not found"))),
            Err(ResolutionError::Rejected("Track not found".to_string()))
        );
    }

    #[test]
    fn test_base_url_is_normalized() {
        let auth = Arc::new(AuthProvider::new(
            Client::new(),
            "http://127.0.0.1:9/".to_string(),
            Arc::new(SystemClock),
        ));
        let client = ApiClient::new(Client::new(), "http://localhost:3000/api/", auth);
        assert_eq!(client.url("lyrics"), "http://localhost:3000/api/lyrics");
    }

    #[tokio::test]
    async fn test_empty_search_is_rejected_without_request() {
        let auth = Arc::new(AuthProvider::new(
            Client::new(),
            "http://127.0.0.1:9/".to_string(),
            Arc::new(SystemClock),
        ));
        let client = ApiClient::new(Client::new(), "http://127.0.0.1:9", auth);
        let err = client.search("   ").await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
