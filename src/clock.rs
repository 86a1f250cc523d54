//! Playback clock adapter
//!
//! Wraps whatever produces audio behind a single time source. The render
//! loop only ever sees a `PlaybackClock`, which reads shared state and
//! never blocks on the device.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::audio::events::{PlaybackStatus, SharedPlaybackState};

/// One reading of the playback clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSample {
    /// Playback position in seconds
    pub current_time: f64,
    /// Monotonic instant the reading was taken
    pub wall_clock: Instant,
}

/// Source could not be attached or started
#[derive(Debug, Clone, PartialEq)]
pub enum ClockAttachError {
    /// No source is attached
    NoSource,
    /// Fetching or decoding the source failed
    Load(String),
    /// The source format cannot be decoded
    UnsupportedFormat(String),
    /// The output refused to start
    Playback(String),
    /// The audio backend is gone
    Unavailable(String),
}

impl ClockAttachError {
    pub fn is_unsupported_format(&self) -> bool {
        matches!(self, ClockAttachError::UnsupportedFormat(_))
    }
}

impl std::fmt::Display for ClockAttachError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockAttachError::NoSource => write!(f, "No audio source attached"),
            ClockAttachError::Load(e) => write!(f, "Failed to load audio: {}", e),
            ClockAttachError::UnsupportedFormat(e) => write!(f, "Unsupported audio format: {}", e),
            ClockAttachError::Playback(e) => write!(f, "Playback failed: {}", e),
            ClockAttachError::Unavailable(e) => write!(f, "Audio backend unavailable: {}", e),
        }
    }
}

impl std::error::Error for ClockAttachError {}

/// Something that can play a remote audio source
///
/// Implementations publish their status and position through the
/// `SharedPlaybackState` returned by `state()`.
pub trait PlaybackSource: Send {
    /// Fetch and decode `url`, ending paused at zero
    fn load(&mut self, url: &str) -> impl Future<Output = Result<(), ClockAttachError>> + Send;
    fn play(&mut self) -> impl Future<Output = Result<(), ClockAttachError>> + Send;
    fn pause(&mut self);
    fn seek(&mut self, position: Duration);
    fn set_volume(&mut self, volume: f32);
    /// Stop output and drop the source
    fn release(&mut self);
    fn state(&self) -> &SharedPlaybackState;

    fn status(&self) -> PlaybackStatus {
        self.state().status()
    }

    /// Track length known from metadata, for sources that cannot probe it
    fn duration_hint(&mut self, _duration: Option<Duration>) {}
}

/// Read-only handle on the playback position
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    state: SharedPlaybackState,
}

impl PlaybackClock {
    pub fn new(state: SharedPlaybackState) -> Self {
        Self { state }
    }

    /// Current position, or `None` while nothing is attached
    pub fn sample(&self) -> Option<PlaybackSample> {
        if !self.state.is_loaded() {
            return None;
        }
        Some(PlaybackSample {
            current_time: self.state.position().as_secs_f64(),
            wall_clock: Instant::now(),
        })
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.status()
    }
}

/// Owns the playback source for the current track
pub struct ClockAdapter<S> {
    source: S,
    url: Option<String>,
}

impl<S: PlaybackSource> ClockAdapter<S> {
    pub fn new(source: S) -> Self {
        Self { source, url: None }
    }

    /// Attach a new source, releasing the previous one first
    ///
    /// An unsupported-format failure is retried once with a fresh load.
    pub async fn attach(&mut self, url: &str) -> Result<(), ClockAttachError> {
        self.detach();
        info!("Attaching audio source: {}", url);
        match self.source.load(url).await {
            Err(e) if e.is_unsupported_format() => self.reload(url, &e).await?,
            other => other?,
        }
        self.url = Some(url.to_string());
        Ok(())
    }

    /// Release and load `url` one more time after `cause`
    async fn reload(&mut self, url: &str, cause: &ClockAttachError) -> Result<(), ClockAttachError> {
        warn!("{}, reloading source once", cause);
        self.source.release();
        self.source.load(url).await
    }

    /// Release the current source, if any
    pub fn detach(&mut self) {
        if let Some(url) = self.url.take() {
            debug!("Detaching audio source: {}", url);
            self.source.release();
        }
    }

    /// Start playback
    ///
    /// If the source reports an unsupported format, it is reloaded and
    /// started once more before giving up.
    pub async fn play(&mut self) -> Result<(), ClockAttachError> {
        let url = self.url.clone().ok_or(ClockAttachError::NoSource)?;
        match self.source.play().await {
            Err(e) if e.is_unsupported_format() => {
                if let Err(e) = self.reload(&url, &e).await {
                    self.url = None;
                    return Err(e);
                }
                self.source.play().await
            }
            other => other,
        }
    }

    pub fn pause(&mut self) {
        if self.url.is_some() {
            self.source.pause();
        }
    }

    /// Seek to `seconds`, clamped to the known track length
    pub fn seek(&mut self, seconds: f64) {
        if self.url.is_none() || !seconds.is_finite() {
            return;
        }
        let mut position = Duration::from_secs_f64(seconds.max(0.0));
        if let Some(duration) = self.source.state().duration() {
            position = position.min(duration);
        }
        self.source.seek(position);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.source.set_volume(volume.clamp(0.0, 1.0));
    }

    pub fn duration_hint(&mut self, duration: Option<Duration>) {
        self.source.duration_hint(duration);
    }

    /// Re-attach the known source if it was dropped underneath us
    pub async fn ensure_attached(&mut self) -> Result<(), ClockAttachError> {
        let Some(url) = self.url.clone() else {
            return Err(ClockAttachError::NoSource);
        };
        if self.source.state().is_loaded() {
            return Ok(());
        }
        info!("Audio source was dropped, re-attaching {}", url);
        self.attach(&url).await
    }

    pub fn is_attached(&self) -> bool {
        self.url.is_some()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.source.status()
    }

    /// Track length in seconds, when known
    pub fn duration(&self) -> Option<f64> {
        self.source.state().duration().map(|d| d.as_secs_f64())
    }

    pub fn clock(&self) -> PlaybackClock {
        PlaybackClock::new(self.source.state().clone())
    }

    #[cfg(test)]
    pub fn source(&self) -> &S {
        &self.source
    }
}

/// Source that keeps time without producing sound
///
/// Used when audio output is disabled. The position advances with the
/// wall clock while "playing" and ends at the known track length.
#[derive(Debug, Default)]
pub struct SilentSource {
    state: SharedPlaybackState,
    duration: Option<Duration>,
}

impl SilentSource {
    pub fn new(duration: Option<Duration>) -> Self {
        Self {
            state: SharedPlaybackState::new(),
            duration,
        }
    }

    /// Track length to report for subsequent loads
    pub fn set_duration(&mut self, duration: Option<Duration>) {
        self.duration = duration;
    }
}

impl PlaybackSource for SilentSource {
    async fn load(&mut self, url: &str) -> Result<(), ClockAttachError> {
        self.state.begin_loading(url);
        self.state.mark_loaded(self.duration);
        Ok(())
    }

    async fn play(&mut self) -> Result<(), ClockAttachError> {
        if !self.state.is_loaded() {
            return Err(ClockAttachError::NoSource);
        }
        if self.status() == PlaybackStatus::Ended {
            self.state.set_position(Duration::ZERO);
        }
        self.state.set_status(PlaybackStatus::Playing);
        Ok(())
    }

    fn pause(&mut self) {
        if self.state.is_loaded() {
            self.state.set_status(PlaybackStatus::Paused);
        }
    }

    fn seek(&mut self, position: Duration) {
        self.state.set_position(position);
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.set_volume(volume);
    }

    fn release(&mut self) {
        self.state.reset();
    }

    fn state(&self) -> &SharedPlaybackState {
        &self.state
    }

    fn status(&self) -> PlaybackStatus {
        self.state.end_if_elapsed()
    }

    fn duration_hint(&mut self, duration: Option<Duration>) {
        self.set_duration(duration);
    }
}
