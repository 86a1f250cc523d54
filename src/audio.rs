//! Audio playback module
//!
//! - `streaming`: Progressive download buffer for remote sources
//! - `events`: Audio thread commands and shared playback state
//! - `player`: rodio output and sink
//! - `thread`: Dedicated audio thread
//! - `handle`: Async-side `PlaybackSource` backed by the audio thread

pub mod events;
mod handle;
mod player;
pub mod streaming;
mod thread;

pub use events::PlaybackStatus;
pub use thread::spawn_audio_thread;
