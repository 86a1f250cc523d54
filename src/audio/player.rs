//! Audio player using rodio
//!
//! Owns the output stream and at most one sink. Lives on the audio thread.

use std::time::Duration;

use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::decoder::DecoderError;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source, mixer::Mixer};

use super::streaming::{SharedBuffer, StreamingBuffer};
use crate::clock::ClockAttachError;

/// Audio player for a single streamed track
pub struct AudioPlayer {
    _stream: OutputStream,
    mixer: Mixer,
    sink: Option<Sink>,
    /// Download feeding the current sink, cancelled on stop
    buffer: Option<SharedBuffer>,
    volume: f32,
}

impl AudioPlayer {
    /// Open the named output device, or the default one
    pub fn new(device_name: Option<&str>) -> Result<Self, String> {
        let stream = match device_name {
            Some(name) => Self::open_device(name)?,
            None => OutputStreamBuilder::open_default_stream()
                .map_err(|e| format!("Failed to create audio output: {}", e))?,
        };
        let mixer = stream.mixer().clone();

        Ok(Self {
            _stream: stream,
            mixer,
            sink: None,
            buffer: None,
            volume: 1.0,
        })
    }

    fn open_device(device_name: &str) -> Result<OutputStream, String> {
        let host = rodio::cpal::default_host();
        let device = host
            .output_devices()
            .map_err(|e| format!("Failed to enumerate devices: {}", e))?
            .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
            .ok_or_else(|| format!("Device not found: {}", device_name))?;

        let config = device
            .default_output_config()
            .map_err(|e| format!("Failed to get device config: {}", e))?;

        OutputStreamBuilder::from_device(device)
            .map_err(|e| format!("Failed to create stream builder: {}", e))?
            .with_sample_rate(config.sample_rate().0)
            .open_stream()
            .map_err(|e| format!("Failed to open stream: {}", e))
    }

    /// Decode `buffer` into a new paused sink, replacing the current one
    ///
    /// Returns the total duration when the container reports it.
    pub fn load(&mut self, buffer: StreamingBuffer) -> Result<Option<Duration>, ClockAttachError> {
        self.stop();

        let shared = buffer.shared().clone();
        let source = match Decoder::new(buffer) {
            Ok(source) => source,
            Err(e) => {
                shared.cancel();
                return Err(classify_decoder_error(e));
            }
        };
        let duration = source.total_duration();

        let sink = Sink::connect_new(&self.mixer);
        sink.pause();
        sink.set_volume(self.volume);
        sink.append(source);

        self.sink = Some(sink);
        self.buffer = Some(shared);
        Ok(duration)
    }

    pub fn play(&mut self) -> Result<(), ClockAttachError> {
        match &self.sink {
            Some(sink) => {
                sink.play();
                Ok(())
            }
            None => Err(ClockAttachError::NoSource),
        }
    }

    pub fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    /// Stop playback and cancel the feeding download
    pub fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        if let Some(buffer) = self.buffer.take() {
            buffer.cancel();
        }
    }

    /// Set volume (0.0 to 1.0)
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(sink) = &self.sink {
            sink.set_volume(self.volume);
        }
    }

    pub fn seek(&mut self, position: Duration) -> Result<(), String> {
        let sink = self.sink.as_ref().ok_or("No audio loaded")?;
        sink.try_seek(position)
            .map_err(|e| format!("Seek to {:?} failed: {:?}", position, e))
    }

    /// Position reported by the sink
    pub fn position(&self) -> Duration {
        self.sink
            .as_ref()
            .map(|sink| sink.get_pos())
            .unwrap_or_default()
    }

    /// Whether the current source has played out (true without a source)
    pub fn is_finished(&self) -> bool {
        self.sink.as_ref().map(|sink| sink.empty()).unwrap_or(true)
    }
}

fn classify_decoder_error(e: DecoderError) -> ClockAttachError {
    match e {
        DecoderError::UnrecognizedFormat => ClockAttachError::UnsupportedFormat(e.to_string()),
        other => ClockAttachError::Load(other.to_string()),
    }
}
