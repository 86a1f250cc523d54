//! Application settings persistence
//!
//! Loaded once at startup; command line flags override individual fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::auth::DEFAULT_SESSION_URL;
use crate::render::{DEFAULT_FRAME_RATE, DEFAULT_LAG_THRESHOLD};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub playback: PlaybackSettings,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub display: DisplaySettings,
    #[serde(default)]
    pub network: NetworkSettings,
}

/// Lyrics/stream service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL of the lyrics/stream service
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Page scraped for the anonymous access token
    #[serde(default = "default_session_url")]
    pub session_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_session_url() -> String {
    DEFAULT_SESSION_URL.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Playback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackSettings {
    /// Play through the sound card; off keeps time silently
    #[serde(default = "default_true")]
    pub audio_output: bool,
    /// Output device name, default device when unset
    #[serde(default)]
    pub output_device: Option<String>,
    /// Volume (0.0 - 1.0)
    #[serde(default = "default_volume")]
    pub volume: f32,
    /// Seconds to wait for a stream to become playable
    #[serde(default = "default_load_timeout")]
    pub load_timeout_secs: u64,
    /// Start playing as soon as the track is ready
    #[serde(default = "default_true")]
    pub autoplay: bool,
}

fn default_true() -> bool {
    true
}

fn default_volume() -> f32 {
    1.0
}

fn default_load_timeout() -> u64 {
    20
}

impl PlaybackSettings {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }
}

/// Render loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Ticks per second
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Tick gap above which the loop reports it is behind
    #[serde(default = "default_lag_threshold_ms")]
    pub lag_threshold_ms: u64,
}

fn default_frame_rate() -> u32 {
    DEFAULT_FRAME_RATE
}

fn default_lag_threshold_ms() -> u64 {
    DEFAULT_LAG_THRESHOLD.as_millis() as u64
}

/// Stream URL cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Keep resolved URLs on disk between runs
    #[serde(default = "default_true")]
    pub persist: bool,
    /// Lifetime of a resolved URL
    #[serde(default = "default_stream_ttl")]
    pub stream_ttl_secs: u64,
    /// Upper bound on cached URLs
    #[serde(default = "default_max_entries")]
    pub max_entries: Option<usize>,
}

fn default_stream_ttl() -> u64 {
    crate::cache::DEFAULT_STREAM_TTL.as_secs()
}

fn default_max_entries() -> Option<usize> {
    Some(500)
}

impl CacheSettings {
    pub fn stream_ttl(&self) -> Duration {
        Duration::from_secs(self.stream_ttl_secs)
    }
}

/// Terminal display settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// Show background vocals after the lead line
    #[serde(default = "default_true")]
    pub show_background: bool,
    /// Show timing diagnostics under the lyrics
    #[serde(default)]
    pub show_diagnostics: bool,
}

/// Proxy type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProxyType {
    /// No proxy
    #[default]
    None,
    Http,
    Https,
    /// Use HTTP(S)_PROXY from the environment
    System,
}

impl std::fmt::Display for ProxyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyType::None => write!(f, "none"),
            ProxyType::Http => write!(f, "HTTP"),
            ProxyType::Https => write!(f, "HTTPS"),
            ProxyType::System => write!(f, "system"),
        }
    }
}

/// Network settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default)]
    pub proxy_type: ProxyType,
    #[serde(default)]
    pub proxy_host: String,
    #[serde(default)]
    pub proxy_port: u16,
}

impl NetworkSettings {
    /// Proxy URL, `None` when disabled or incomplete
    pub fn proxy_url(&self) -> Option<String> {
        match self.proxy_type {
            ProxyType::None => None,
            ProxyType::System => std::env::var("HTTPS_PROXY")
                .or_else(|_| std::env::var("https_proxy"))
                .or_else(|_| std::env::var("HTTP_PROXY"))
                .or_else(|_| std::env::var("http_proxy"))
                .ok(),
            ProxyType::Http | ProxyType::Https => {
                if self.proxy_host.is_empty() || self.proxy_port == 0 {
                    return None;
                }
                let scheme = if self.proxy_type == ProxyType::Http {
                    "http"
                } else {
                    "https"
                };
                Some(format!("{}://{}:{}", scheme, self.proxy_host, self.proxy_port))
            }
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            session_url: default_session_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            audio_output: true,
            output_device: None,
            volume: default_volume(),
            load_timeout_secs: default_load_timeout(),
            autoplay: true,
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            lag_threshold_ms: default_lag_threshold_ms(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            persist: true,
            stream_ttl_secs: default_stream_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            show_background: true,
            show_diagnostics: false,
        }
    }
}

impl Settings {
    /// Get the settings file path
    pub fn file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "lyricsync", "LyricSync")
            .map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Load settings from file, or return defaults if not found
    pub fn load() -> Self {
        Self::file_path()
            .and_then(|path| Self::load_from_file(&path).ok())
            .unwrap_or_default()
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SettingsError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Save settings to the default file
    pub fn save(&self) -> Result<(), SettingsError> {
        match Self::file_path() {
            Some(path) => self.save_to_file(&path),
            None => Err(SettingsError::Io(
                "Could not determine config directory".to_string(),
            )),
        }
    }

    /// Save settings to a specific file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io(e.to_string()))?;
        }
        let content =
            serde_json::to_string_pretty(self).map_err(|e| SettingsError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| SettingsError::Io(e.to_string()))
    }
}

/// Errors that can occur with settings
#[derive(Debug, Clone)]
pub enum SettingsError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "IO error: {}", e),
            SettingsError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {}
