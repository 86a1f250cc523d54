//! Per-track session
//!
//! Ties the lyrics, the resolved stream and the playback clock of one
//! track together. Changing track tears the previous one down completely
//! before anything of the new one becomes visible.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{TrackCatalog, Track};
use crate::audio::PlaybackStatus;
use crate::cache::{ResolutionError, StreamCache, StreamResolver};
use crate::clock::{ClockAdapter, ClockAttachError, PlaybackSource};
use crate::lyrics::LyricDocument;
use crate::render::{Frame, LoopConfig, LoopState, RenderLoop};

/// Load/playback status shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SongStatus {
    #[default]
    Idle,
    Loading,
    ReadyToPlay,
    Playing,
    Paused,
    /// No playable stream
    Unavailable(String),
}

impl std::fmt::Display for SongStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SongStatus::Idle => write!(f, "Idle"),
            SongStatus::Loading => write!(f, "Loading..."),
            SongStatus::ReadyToPlay => write!(f, "Ready to Play"),
            SongStatus::Playing => write!(f, "Playing"),
            SongStatus::Paused => write!(f, "Paused"),
            SongStatus::Unavailable(reason) => write!(f, "Unavailable ({})", reason),
        }
    }
}

/// Track could not be made playable
#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    Stream(ResolutionError),
    Audio(ClockAttachError),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Stream(e) => write!(f, "{}", e),
            LoadError::Audio(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<ResolutionError> for LoadError {
    fn from(e: ResolutionError) -> Self {
        LoadError::Stream(e)
    }
}

impl From<ClockAttachError> for LoadError {
    fn from(e: ClockAttachError) -> Self {
        LoadError::Audio(e)
    }
}

pub struct TrackSession<C, R, S> {
    catalog: Arc<C>,
    streams: Arc<StreamCache<R>>,
    clock: ClockAdapter<S>,
    loop_config: LoopConfig,
    frames: Arc<watch::Sender<Frame>>,
    status: watch::Sender<SongStatus>,
    track_id: Option<String>,
    track: Option<Track>,
    document: Option<Arc<LyricDocument>>,
    render: Option<RenderLoop>,
}

impl<C, R, S> TrackSession<C, R, S>
where
    C: TrackCatalog,
    R: StreamResolver,
    S: PlaybackSource,
{
    pub fn new(
        catalog: Arc<C>,
        streams: Arc<StreamCache<R>>,
        source: S,
        loop_config: LoopConfig,
    ) -> Self {
        let (frames, _) = watch::channel(Frame::default());
        let (status, _) = watch::channel(SongStatus::Idle);
        Self {
            catalog,
            streams,
            clock: ClockAdapter::new(source),
            loop_config,
            frames: Arc::new(frames),
            status,
            track_id: None,
            track: None,
            document: None,
            render: None,
        }
    }

    /// Frames published by the render loop
    pub fn subscribe(&self) -> watch::Receiver<Frame> {
        self.frames.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SongStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SongStatus {
        self.status.borrow().clone()
    }

    pub fn track_id(&self) -> Option<&str> {
        self.track_id.as_deref()
    }

    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    pub fn has_lyrics(&self) -> bool {
        self.document.is_some()
    }

    pub fn document(&self) -> Option<&LyricDocument> {
        self.document.as_deref()
    }

    /// Switch to `track_id`
    ///
    /// The render loop keeps running even when the stream is unavailable,
    /// publishing idle frames.
    pub async fn load(&mut self, track_id: &str) -> Result<(), LoadError> {
        self.teardown().await;
        info!("Loading track {}", track_id);
        self.track_id = Some(track_id.to_string());
        self.status.send_replace(SongStatus::Loading);

        let (lyrics, stream, track) = tokio::join!(
            self.catalog.fetch_lyrics(track_id),
            self.streams.resolve(track_id),
            self.catalog.fetch_track(track_id),
        );

        self.document = match lyrics {
            Ok(Some(payload)) => match LyricDocument::parse(&payload) {
                Ok(document) if !document.is_empty() => {
                    debug!(
                        "Loaded {} lyric segments for {} ({})",
                        document.len(),
                        track_id,
                        document.kind().unwrap_or("untyped")
                    );
                    Some(Arc::new(document))
                }
                Ok(_) => {
                    info!("No lyrics available for {}", track_id);
                    None
                }
                Err(e) => {
                    warn!("No lyrics available for {}: {}", track_id, e);
                    None
                }
            },
            Ok(None) => {
                info!("No lyrics available for {}", track_id);
                None
            }
            Err(e) => {
                warn!("Failed to fetch lyrics for {}: {:#}", track_id, e);
                None
            }
        };

        self.track = match track {
            Ok(Some(track)) => {
                info!("Now playing: {} - {}", track.name, track.artist_names());
                self.clock
                    .duration_hint(Some(Duration::from_millis(track.duration_ms)).filter(|d| !d.is_zero()));
                Some(track)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("Track metadata unavailable for {}: {:#}", track_id, e);
                None
            }
        };

        let attached = match stream {
            Ok(url) => self.clock.attach(&url).await.map_err(LoadError::from),
            Err(e) => Err(LoadError::from(e)),
        };

        self.render = Some(RenderLoop::spawn(
            self.document.clone(),
            self.clock.clock(),
            self.frames.clone(),
            self.loop_config,
        ));

        match attached {
            Ok(()) => {
                self.status.send_replace(SongStatus::ReadyToPlay);
                Ok(())
            }
            Err(e) => {
                warn!("Track {} is not playable: {}", track_id, e);
                self.status.send_replace(SongStatus::Unavailable(e.to_string()));
                Err(e)
            }
        }
    }

    pub async fn play(&mut self) -> Result<(), ClockAttachError> {
        let result = match self.clock.ensure_attached().await {
            Ok(()) => self.clock.play().await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(()) => {
                self.status.send_replace(SongStatus::Playing);
            }
            Err(e) => {
                warn!("Playback failed: {}", e);
                self.status.send_replace(SongStatus::Unavailable(e.to_string()));
            }
        }
        result
    }

    pub fn pause(&mut self) {
        if !self.clock.is_attached() {
            return;
        }
        self.clock.pause();
        self.status.send_replace(SongStatus::Paused);
    }

    pub async fn toggle_play(&mut self) -> Result<(), ClockAttachError> {
        if self.clock.status() == PlaybackStatus::Playing {
            self.pause();
            Ok(())
        } else {
            self.play().await
        }
    }

    pub fn seek(&mut self, seconds: f64) {
        debug!("Seek to {:.3}s", seconds);
        self.clock.seek(seconds);
    }

    /// Seek relative to the current position
    pub fn seek_by(&mut self, delta: f64) {
        if let Some(sample) = self.clock.clock().sample() {
            self.seek(sample.current_time + delta);
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.clock.set_volume(volume);
    }

    /// Playback reached the end of the stream
    pub fn is_finished(&self) -> bool {
        self.clock.status() == PlaybackStatus::Ended
    }

    /// Stop everything and return to idle
    pub async fn close(&mut self) {
        self.teardown().await;
        self.status.send_replace(SongStatus::Idle);
    }

    /// Stop the loop, release audio and clear everything visible
    async fn teardown(&mut self) {
        if let Some(render) = self.render.take() {
            render.stop().await;
        }
        self.clock.detach();
        self.document = None;
        self.track = None;
        self.track_id = None;
        self.frames.send_replace(Frame {
            state: LoopState::Idle,
            ..Frame::default()
        });
    }
}
