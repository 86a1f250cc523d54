//! Audio thread implementation
//!
//! Runs the AudioPlayer on a dedicated thread. rodio's output stream is
//! not Send, so the player is created and dropped there. The thread keeps
//! `SharedPlaybackState` in step with the sink between commands.

use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError};

use super::events::{AudioCommand, PlaybackStatus, SharedPlaybackState};
use super::handle::AudioHandle;
use super::player::AudioPlayer;

/// Idle sleep between position refreshes
const POSITION_REFRESH_INTERVAL: Duration = Duration::from_millis(10);

/// Backwards drift absorbed when re-anchoring on the sink position
const POSITION_RESYNC_TOLERANCE: Duration = Duration::from_millis(100);

pub struct AudioThreadHandle {
    pub handle: AudioHandle,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioThreadHandle {
    /// Ask the thread to stop and wait for it
    pub fn join(mut self, timeout: Duration) -> Result<(), String> {
        let Some(handle) = self.thread_handle.take() else {
            return Ok(());
        };
        self.handle.shutdown();

        let start = std::time::Instant::now();
        while !handle.is_finished() {
            if start.elapsed() > timeout {
                return Err("Audio thread did not exit in time".to_string());
            }
            thread::sleep(Duration::from_millis(10));
        }
        let _ = handle.join();
        Ok(())
    }
}

impl Drop for AudioThreadHandle {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

/// Spawn the audio thread
///
/// Blocks until the output device is open so device errors surface here.
pub fn spawn_audio_thread(
    device_name: Option<&str>,
    http: reqwest::Client,
    load_timeout: Duration,
) -> Result<AudioThreadHandle, String> {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), String>>(1);
    let state = SharedPlaybackState::new();
    let thread_state = state.clone();
    let device_name = device_name.map(str::to_string);

    let thread_handle = thread::Builder::new()
        .name("audio-player".to_string())
        .spawn(move || match AudioPlayer::new(device_name.as_deref()) {
            Ok(player) => {
                let _ = ready_tx.send(Ok(()));
                audio_thread_main(player, command_rx, thread_state);
            }
            Err(e) => {
                tracing::error!("Failed to create audio player: {}", e);
                let _ = ready_tx.send(Err(e));
            }
        })
        .map_err(|e| format!("Failed to spawn audio thread: {}", e))?;

    ready_rx
        .recv()
        .map_err(|_| "Audio thread exited during startup".to_string())??;

    tracing::info!("Audio thread started");
    Ok(AudioThreadHandle {
        handle: AudioHandle::new(command_tx, state, http, load_timeout),
        thread_handle: Some(thread_handle),
    })
}

fn audio_thread_main(
    mut player: AudioPlayer,
    mut command_rx: mpsc::UnboundedReceiver<AudioCommand>,
    state: SharedPlaybackState,
) {
    loop {
        match command_rx.try_recv() {
            Ok(AudioCommand::Shutdown) | Err(TryRecvError::Disconnected) => break,
            Ok(cmd) => {
                tracing::trace!("Audio command: {:?}", cmd);
                handle_command(&mut player, &state, cmd);
            }
            Err(TryRecvError::Empty) => {
                refresh_position(&player, &state);
                thread::sleep(POSITION_REFRESH_INTERVAL);
            }
        }
    }

    player.stop();
    state.reset();
    tracing::info!("Audio thread stopped");
}

fn handle_command(player: &mut AudioPlayer, state: &SharedPlaybackState, cmd: AudioCommand) {
    match cmd {
        AudioCommand::Load { buffer, url, reply } => {
            let result = player.load(buffer).map(|duration| {
                state.mark_loaded(duration);
                tracing::info!("Source loaded: {} (duration {:?})", url, duration);
            });
            if let Err(e) = &result {
                tracing::warn!("Source load failed for {}: {}", url, e);
            }
            let _ = reply.send(result);
        }
        AudioCommand::Play { reply } => {
            let result = player.play();
            if result.is_ok() {
                state.sync_position(player.position(), Duration::ZERO);
                state.set_status(PlaybackStatus::Playing);
            }
            let _ = reply.send(result);
        }
        AudioCommand::Pause => {
            player.pause();
            state.set_status(PlaybackStatus::Paused);
            state.sync_position(player.position(), Duration::ZERO);
        }
        AudioCommand::Seek { position } => match player.seek(position) {
            Ok(()) => {
                state.set_position(position);
                if state.status() == PlaybackStatus::Ended {
                    state.set_status(PlaybackStatus::Paused);
                }
            }
            Err(e) => tracing::warn!("{}", e),
        },
        AudioCommand::SetVolume { volume } => {
            player.set_volume(volume);
            state.set_volume(volume.clamp(0.0, 1.0));
        }
        // State was already reset by the handle, a new load may be in flight
        AudioCommand::Stop => player.stop(),
        AudioCommand::Shutdown => {}
    }
}

fn refresh_position(player: &AudioPlayer, state: &SharedPlaybackState) {
    if !state.is_playing() {
        return;
    }
    if player.is_finished() {
        tracing::debug!("Playback finished");
        state.set_status(PlaybackStatus::Ended);
        return;
    }
    state.sync_position(player.position(), POSITION_RESYNC_TOLERANCE);
}
