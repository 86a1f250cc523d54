//! API model types
//!
//! Response envelopes of the lyrics/stream service and the catalog
//! objects it forwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{ success, data?, error? }` envelope used by the service routes
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    /// Payload of a successful response
    ///
    /// `Ok(None)` when the service reports success without data.
    pub fn into_result(self) -> Result<Option<T>, String> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "request was not successful".to_string()))
        }
    }
}

/// Reply of the stream route
#[derive(Debug, Clone, Deserialize)]
pub struct StreamResponse {
    #[serde(default)]
    pub success: bool,
    pub stream_url: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
}

/// Raw lyric payload, validated later by the document parser
pub type LyricPayload = Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    #[serde(default)]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Album {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub album: Album,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub explicit: bool,
}

impl Track {
    /// Comma separated artist names
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Largest album image
    pub fn cover_url(&self) -> Option<&str> {
        self.album
            .images
            .iter()
            .max_by_key(|img| img.width.unwrap_or(0))
            .map(|img| img.url.as_str())
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_ms / 1000
    }
}

/// Paged list wrapper
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Paging<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// Search route payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub tracks: Option<Paging<Track>>,
}

impl SearchResults {
    pub fn into_tracks(self) -> Vec<Track> {
        self.tracks.map(|p| p.items).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_success() {
        let env: Envelope<Value> =
            serde_json::from_value(json!({ "success": true, "data": { "Content": [] } })).unwrap();
        assert_eq!(env.into_result().unwrap(), Some(json!({ "Content": [] })));
    }

    #[test]
    fn test_envelope_failure_carries_error() {
        let env: Envelope<Value> =
            serde_json::from_value(json!({ "success": false, "error": "No lyrics found" })).unwrap();
        assert_eq!(env.into_result(), Err("No lyrics found".to_string()));
    }

    #[test]
    fn test_envelope_missing_success_is_failure() {
        let env: Envelope<Value> = serde_json::from_value(json!({ "data": 1 })).unwrap();
        assert!(env.into_result().is_err());
    }

    #[test]
    fn test_track_helpers() {
        let track: Track = serde_json::from_value(json!({
            "id": "4uLU6hMCjMI75M1A2tKUQC",
            "name": "Song",
            "artists": [{ "id": "a1", "name": "First" }, { "id": "a2", "name": "Second" }],
            "album": {
                "name": "Album",
                "images": [
                    { "url": "small", "height": 64, "width": 64 },
                    { "url": "large", "height": 640, "width": 640 }
                ]
            },
            "duration_ms": 213573
        }))
        .unwrap();

        assert_eq!(track.artist_names(), "First, Second");
        assert_eq!(track.cover_url(), Some("large"));
        assert_eq!(track.duration_secs(), 213);
        assert!(!track.explicit);
    }

    #[test]
    fn test_search_results_without_tracks() {
        let results: SearchResults = serde_json::from_value(json!({})).unwrap();
        assert!(results.into_tracks().is_empty());
    }
}
