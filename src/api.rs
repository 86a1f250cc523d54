//! Lyrics/stream service API module
//!
//! - `auth`: Access token scraping and caching
//! - `client`: HTTP client for the lyrics, track, search and stream routes
//! - `model`: Response envelopes and catalog types

pub mod auth;
mod client;
pub mod model;

use std::future::Future;

use lazy_static::lazy_static;
use regex::Regex;

pub use auth::AuthProvider;
pub use client::ApiClient;
pub use model::{LyricPayload, Track};

lazy_static! {
    static ref TRACK_ID: Regex =
        Regex::new(r"^(?:spotify:track:|https?://open\.spotify\.com/(?:[\w-]+/)*track/)?([A-Za-z0-9]{8,})(?:[?#].*)?$")
            .unwrap();
}

/// Lyrics and metadata lookups for a track
pub trait TrackCatalog: Send + Sync {
    /// Raw lyric payload, `None` when the track has no lyrics
    fn fetch_lyrics(
        &self,
        track_id: &str,
    ) -> impl Future<Output = anyhow::Result<Option<LyricPayload>>> + Send;

    fn fetch_track(
        &self,
        track_id: &str,
    ) -> impl Future<Output = anyhow::Result<Option<Track>>> + Send;
}

/// Accept a bare track id, a `spotify:track:` URI or an open.spotify.com link
pub fn normalize_track_id(input: &str) -> Option<String> {
    TRACK_ID
        .captures(input.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_track_id() {
        let id = "4uLU6hMCjMI75M1A2tKUQC";
        assert_eq!(normalize_track_id(id).as_deref(), Some(id));
        assert_eq!(
            normalize_track_id("spotify:track:4uLU6hMCjMI75M1A2tKUQC").as_deref(),
            Some(id)
        );
        assert_eq!(
            normalize_track_id("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc").as_deref(),
            Some(id)
        );
        assert_eq!(
            normalize_track_id("https://open.spotify.com/intl-de/track/4uLU6hMCjMI75M1A2tKUQC").as_deref(),
            Some(id)
        );
    }

    #[test]
    fn test_normalize_track_id_rejects_garbage() {
        assert_eq!(normalize_track_id(""), None);
        assert_eq!(normalize_track_id("not an id"), None);
        assert_eq!(normalize_track_id("spotify:album:4uLU6hMCjMI75M1A2tKUQC"), None);
    }
}
