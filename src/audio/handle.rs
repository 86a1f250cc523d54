//! Audio handle for controlling the audio thread from async code
//!
//! Fire-and-forget controls return immediately. `load` and `play` await
//! the audio thread's reply. State is read from `SharedPlaybackState`
//! without blocking.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::events::{AudioCommand, SharedPlaybackState};
use super::streaming::{self, StreamError, StreamingBuffer};
use crate::clock::{ClockAttachError, PlaybackSource};

/// Download events buffered between the downloader and `load`
const STREAM_EVENT_CAPACITY: usize = 32;

/// Handle for controlling audio playback
#[derive(Clone)]
pub struct AudioHandle {
    command_tx: mpsc::UnboundedSender<AudioCommand>,
    state: SharedPlaybackState,
    http: reqwest::Client,
    load_timeout: Duration,
}

impl std::fmt::Debug for AudioHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioHandle")
            .field("state", &self.state)
            .field("load_timeout", &self.load_timeout)
            .finish()
    }
}

impl AudioHandle {
    pub fn new(
        command_tx: mpsc::UnboundedSender<AudioCommand>,
        state: SharedPlaybackState,
        http: reqwest::Client,
        load_timeout: Duration,
    ) -> Self {
        Self {
            command_tx,
            state,
            http,
            load_timeout,
        }
    }

    fn send(&self, command: AudioCommand) {
        if self.command_tx.send(command).is_err() {
            tracing::warn!("Audio thread is gone, command dropped");
        }
    }

    /// Send a command and wait for the audio thread's verdict
    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), ClockAttachError>>) -> AudioCommand,
    ) -> Result<(), ClockAttachError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(make(reply_tx))
            .map_err(|_| ClockAttachError::Unavailable("audio thread stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| ClockAttachError::Unavailable("audio thread dropped the request".to_string()))?
    }

    /// Ask the audio thread to exit
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(AudioCommand::Shutdown);
    }
}

impl From<StreamError> for ClockAttachError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::NotAudio(_) => ClockAttachError::UnsupportedFormat(e.to_string()),
            StreamError::Download(_) | StreamError::Timeout => ClockAttachError::Load(e.to_string()),
        }
    }
}

impl PlaybackSource for AudioHandle {
    async fn load(&mut self, url: &str) -> Result<(), ClockAttachError> {
        self.state.begin_loading(url);

        let (event_tx, mut event_rx) = mpsc::channel(STREAM_EVENT_CAPACITY);
        let buffer = streaming::start_download(self.http.clone(), url.to_string(), event_tx);

        if let Err(e) = streaming::wait_until_playable(&mut event_rx, self.load_timeout).await {
            buffer.cancel();
            self.state.reset();
            return Err(e.into());
        }

        let url = url.to_string();
        let result = self
            .request(|reply| AudioCommand::Load {
                buffer: StreamingBuffer::new(buffer),
                url,
                reply,
            })
            .await;
        if result.is_err() {
            self.state.reset();
        }
        result
    }

    async fn play(&mut self) -> Result<(), ClockAttachError> {
        self.request(|reply| AudioCommand::Play { reply }).await
    }

    fn pause(&mut self) {
        self.send(AudioCommand::Pause);
    }

    fn seek(&mut self, position: Duration) {
        self.send(AudioCommand::Seek { position });
    }

    fn set_volume(&mut self, volume: f32) {
        self.send(AudioCommand::SetVolume { volume });
    }

    fn release(&mut self) {
        // Reset first so no reader sees the old position after this returns
        self.state.reset();
        self.send(AudioCommand::Stop);
    }

    fn state(&self) -> &SharedPlaybackState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_mapping() {
        assert!(
            ClockAttachError::from(StreamError::NotAudio("text/html".to_string()))
                .is_unsupported_format()
        );
        assert!(matches!(
            ClockAttachError::from(StreamError::Timeout),
            ClockAttachError::Load(_)
        ));
    }

    #[tokio::test]
    async fn test_requests_fail_when_thread_is_gone() {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        drop(command_rx);
        let mut handle = AudioHandle::new(
            command_tx,
            SharedPlaybackState::new(),
            reqwest::Client::new(),
            Duration::from_secs(1),
        );
        assert!(matches!(
            handle.play().await,
            Err(ClockAttachError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_release_resets_state_immediately() {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let state = SharedPlaybackState::new();
        state.begin_loading("https://cdn.example/a.mp3");
        state.mark_loaded(None);
        let mut handle = AudioHandle::new(
            command_tx,
            state.clone(),
            reqwest::Client::new(),
            Duration::from_secs(1),
        );

        handle.release();
        assert!(!state.is_loaded());
        assert!(matches!(command_rx.try_recv(), Ok(AudioCommand::Stop)));
    }
}
