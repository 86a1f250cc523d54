//! Audio thread communication types
//!
//! - `AudioCommand` - Commands sent from the async side to the audio thread
//! - `SharedPlaybackState` - Thread-safe state for non-blocking clock reads
//!
//! ## Architecture
//! ```text
//! AudioHandle --[AudioCommand]--> Audio Thread (AudioPlayer)
//! AudioHandle <--[oneshot reply]- Audio Thread
//! Render loop <--[SharedState]--- Audio Thread (non-blocking reads)
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::oneshot;

use super::streaming::StreamingBuffer;
use crate::clock::ClockAttachError;

/// Reply channel for commands whose outcome the caller awaits
pub type CommandReply = oneshot::Sender<Result<(), ClockAttachError>>;

// ============ Commands ============

/// Commands sent to the audio thread
pub enum AudioCommand {
    /// Decode a streaming buffer into a fresh, paused sink
    Load {
        buffer: StreamingBuffer,
        url: String,
        reply: CommandReply,
    },
    /// Start or resume playback
    Play { reply: CommandReply },
    /// Pause playback
    Pause,
    /// Seek to position
    Seek { position: Duration },
    /// Set volume (0.0 - 1.0)
    SetVolume { volume: f32 },
    /// Stop playback and drop the current source
    Stop,
    /// Stop and exit the audio thread
    Shutdown,
}

impl std::fmt::Debug for AudioCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load { url, .. } => f
                .debug_struct("Load")
                .field("url", url)
                .finish_non_exhaustive(),
            Self::Play { .. } => write!(f, "Play"),
            Self::Pause => write!(f, "Pause"),
            Self::Seek { position } => f.debug_struct("Seek").field("position", position).finish(),
            Self::SetVolume { volume } => {
                f.debug_struct("SetVolume").field("volume", volume).finish()
            }
            Self::Stop => write!(f, "Stop"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

// ============ Shared State ============

/// Playback status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    /// No source attached
    #[default]
    Stopped,
    /// Source is being fetched and decoded
    Loading,
    /// Source attached and paused
    Paused,
    /// Source attached and playing
    Playing,
    /// Source attached and played to the end
    Ended,
}

impl PlaybackStatus {
    /// Whether a decoded source is attached
    pub fn is_loaded(self) -> bool {
        matches!(
            self,
            PlaybackStatus::Paused | PlaybackStatus::Playing | PlaybackStatus::Ended
        )
    }
}

/// Inner state protected by RwLock
#[derive(Debug, Clone)]
struct PlaybackStateInner {
    status: PlaybackStatus,
    /// Last position reported by the audio thread
    anchor_position: Duration,
    /// When `anchor_position` was reported
    anchor_instant: Instant,
    /// Total audio duration, if the decoder knows it
    duration: Option<Duration>,
    /// Volume (0.0 - 1.0)
    volume: f32,
    /// URL of the attached source
    source_url: Option<String>,
}

impl Default for PlaybackStateInner {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Stopped,
            anchor_position: Duration::ZERO,
            anchor_instant: Instant::now(),
            duration: None,
            volume: 1.0,
            source_url: None,
        }
    }
}

impl PlaybackStateInner {
    fn position_at(&self, now: Instant) -> Duration {
        if self.status != PlaybackStatus::Playing {
            return self.anchor_position;
        }
        let position = self.anchor_position + now.saturating_duration_since(self.anchor_instant);
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }
}

/// Thread-safe shared playback state
///
/// Readers never block on the audio device. While playing, the position
/// is extrapolated from the last anchor so sub-tick reads stay smooth.
#[derive(Clone)]
pub struct SharedPlaybackState {
    inner: Arc<RwLock<PlaybackStateInner>>,
}

impl std::fmt::Debug for SharedPlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SharedPlaybackState")
            .field("status", &inner.status)
            .field("position", &inner.anchor_position)
            .field("duration", &inner.duration)
            .field("volume", &inner.volume)
            .finish()
    }
}

impl Default for SharedPlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedPlaybackState {
    /// Create new shared state
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(PlaybackStateInner::default())),
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.inner.read().status
    }

    pub fn is_playing(&self) -> bool {
        self.status() == PlaybackStatus::Playing
    }

    /// Whether a decoded source is attached
    pub fn is_loaded(&self) -> bool {
        self.status().is_loaded()
    }

    /// Current playback position
    pub fn position(&self) -> Duration {
        self.inner.read().position_at(Instant::now())
    }

    pub fn duration(&self) -> Option<Duration> {
        self.inner.read().duration
    }

    pub fn volume(&self) -> f32 {
        self.inner.read().volume
    }

    pub fn source_url(&self) -> Option<String> {
        self.inner.read().source_url.clone()
    }

    // ---- Update methods (called by the source owner) ----

    /// Enter loading state for a new source
    pub fn begin_loading(&self, url: &str) {
        let mut inner = self.inner.write();
        inner.status = PlaybackStatus::Loading;
        inner.anchor_position = Duration::ZERO;
        inner.anchor_instant = Instant::now();
        inner.duration = None;
        inner.source_url = Some(url.to_string());
    }

    /// Source decoded and ready, paused at zero
    pub fn mark_loaded(&self, duration: Option<Duration>) {
        let mut inner = self.inner.write();
        inner.status = PlaybackStatus::Paused;
        inner.anchor_position = Duration::ZERO;
        inner.anchor_instant = Instant::now();
        inner.duration = duration;
    }

    /// Update status, freezing or resuming extrapolation at the current position
    pub fn set_status(&self, status: PlaybackStatus) {
        let mut inner = self.inner.write();
        let now = Instant::now();
        inner.anchor_position = inner.position_at(now);
        inner.anchor_instant = now;
        inner.status = status;
    }

    /// Jump to a new position (seek)
    pub fn set_position(&self, position: Duration) {
        let mut inner = self.inner.write();
        inner.anchor_position = position;
        inner.anchor_instant = Instant::now();
    }

    /// Re-anchor on the position reported by the device
    ///
    /// While playing, small backwards corrections are absorbed so reads
    /// stay monotonic. Larger ones (stalls) are applied.
    pub fn sync_position(&self, reported: Duration, tolerance: Duration) {
        let mut inner = self.inner.write();
        let now = Instant::now();
        let extrapolated = inner.position_at(now);
        let position = if inner.status == PlaybackStatus::Playing
            && reported < extrapolated
            && extrapolated - reported <= tolerance
        {
            extrapolated
        } else {
            reported
        };
        inner.anchor_position = position;
        inner.anchor_instant = now;
    }

    /// Move a playing clock to `Ended` once it reaches the known duration
    pub fn end_if_elapsed(&self) -> PlaybackStatus {
        let mut inner = self.inner.write();
        if inner.status == PlaybackStatus::Playing {
            if let Some(duration) = inner.duration {
                let now = Instant::now();
                if inner.position_at(now) >= duration {
                    inner.anchor_position = duration;
                    inner.anchor_instant = now;
                    inner.status = PlaybackStatus::Ended;
                }
            }
        }
        inner.status
    }

    pub fn set_volume(&self, volume: f32) {
        self.inner.write().volume = volume;
    }

    /// Forget the attached source
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        let volume = inner.volume;
        *inner = PlaybackStateInner {
            volume,
            ..PlaybackStateInner::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unloaded() {
        let state = SharedPlaybackState::new();
        assert_eq!(state.status(), PlaybackStatus::Stopped);
        assert!(!state.is_loaded());
        assert_eq!(state.position(), Duration::ZERO);
    }

    #[test]
    fn test_loading_is_not_loaded() {
        let state = SharedPlaybackState::new();
        state.begin_loading("https://example.com/a.mp3");
        assert!(!state.is_loaded());
        assert_eq!(
            state.source_url().as_deref(),
            Some("https://example.com/a.mp3")
        );

        state.mark_loaded(Some(Duration::from_secs(180)));
        assert!(state.is_loaded());
        assert_eq!(state.status(), PlaybackStatus::Paused);
        assert_eq!(state.duration(), Some(Duration::from_secs(180)));
    }

    #[test]
    fn test_paused_position_is_frozen() {
        let state = SharedPlaybackState::new();
        state.mark_loaded(None);
        state.set_position(Duration::from_millis(1500));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(state.position(), Duration::from_millis(1500));
    }

    #[test]
    fn test_playing_position_advances() {
        let state = SharedPlaybackState::new();
        state.mark_loaded(None);
        state.set_status(PlaybackStatus::Playing);
        let first = state.position();
        std::thread::sleep(Duration::from_millis(20));
        let second = state.position();
        assert!(second > first);
    }

    #[test]
    fn test_position_clamped_to_duration() {
        let state = SharedPlaybackState::new();
        state.mark_loaded(Some(Duration::from_millis(10)));
        state.set_status(PlaybackStatus::Playing);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(state.position(), Duration::from_millis(10));
    }

    #[test]
    fn test_end_if_elapsed() {
        let state = SharedPlaybackState::new();
        state.mark_loaded(Some(Duration::from_millis(10)));
        assert_eq!(state.end_if_elapsed(), PlaybackStatus::Paused);

        state.set_status(PlaybackStatus::Playing);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(state.end_if_elapsed(), PlaybackStatus::Ended);
        assert_eq!(state.position(), Duration::from_millis(10));

        // Unknown length never ends on its own
        let open = SharedPlaybackState::new();
        open.mark_loaded(None);
        open.set_status(PlaybackStatus::Playing);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(open.end_if_elapsed(), PlaybackStatus::Playing);
    }

    #[test]
    fn test_sync_absorbs_small_backwards_steps() {
        let state = SharedPlaybackState::new();
        state.mark_loaded(None);
        state.set_position(Duration::from_secs(10));
        state.set_status(PlaybackStatus::Playing);
        std::thread::sleep(Duration::from_millis(5));
        let before = state.position();
        state.sync_position(Duration::from_secs(10), Duration::from_millis(100));
        assert!(state.position() >= before);
    }

    #[test]
    fn test_sync_applies_large_corrections() {
        let state = SharedPlaybackState::new();
        state.mark_loaded(None);
        state.set_position(Duration::from_secs(10));
        state.sync_position(Duration::from_secs(2), Duration::from_millis(100));
        assert_eq!(state.position(), Duration::from_secs(2));
    }

    #[test]
    fn test_reset_keeps_volume() {
        let state = SharedPlaybackState::new();
        state.set_volume(0.4);
        state.begin_loading("u");
        state.mark_loaded(None);
        state.reset();
        assert_eq!(state.status(), PlaybackStatus::Stopped);
        assert!(state.source_url().is_none());
        assert!((state.volume() - 0.4).abs() < f32::EPSILON);
    }
}
