//! Render loop driver
//!
//! Samples the playback clock once per frame, runs the sync evaluator and
//! publishes the result on a watch channel. Ticks never overlap: the next
//! one is awaited only after the current frame has been published.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::clock::{PlaybackClock, PlaybackSample};
use crate::lyrics::{LyricDocument, SyncResult, evaluate};

pub const DEFAULT_FRAME_RATE: u32 = 60;

/// Gap between ticks above which the loop is considered behind
pub const DEFAULT_LAG_THRESHOLD: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub frame_interval: Duration,
    pub lag_threshold: Duration,
}

impl LoopConfig {
    pub fn new(frame_rate: u32, lag_threshold: Duration) -> Self {
        let frame_rate = frame_rate.clamp(1, 1000);
        Self {
            frame_interval: Duration::from_secs(1) / frame_rate,
            lag_threshold,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_RATE, DEFAULT_LAG_THRESHOLD)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    /// No document or no attached source
    #[default]
    Idle,
    Running,
    Stopped,
}

/// State published once per tick
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub state: LoopState,
    pub sample: Option<PlaybackSample>,
    pub sync: SyncResult,
    /// The previous tick was more than the lag threshold ago
    pub is_behind_tick_rate: bool,
    pub tick: u64,
}

impl Frame {
    pub fn current_time(&self) -> Option<f64> {
        self.sample.map(|s| s.current_time)
    }
}

/// Flags ticks that arrive later than the threshold after the previous one
#[derive(Debug, Clone)]
pub struct LagDetector {
    threshold: Duration,
    last: Option<Instant>,
}

impl LagDetector {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last: None,
        }
    }

    /// Record a tick at `now`; true when the gap since the last one is too long
    pub fn observe(&mut self, now: Instant) -> bool {
        let behind = self
            .last
            .is_some_and(|last| now.saturating_duration_since(last) > self.threshold);
        self.last = Some(now);
        behind
    }
}

/// Build the frame for one tick
///
/// Without a document or a clock reading the frame is `Idle` with a
/// cleared sync result.
pub fn compose_frame(
    document: Option<&LyricDocument>,
    sample: Option<PlaybackSample>,
    now: Instant,
    lag: &mut LagDetector,
    tick: u64,
) -> Frame {
    let is_behind_tick_rate = lag.observe(now);
    let (state, sync) = match (document, sample) {
        (Some(document), Some(sample)) => (LoopState::Running, evaluate(document, sample.current_time)),
        _ => (LoopState::Idle, SyncResult::default()),
    };
    Frame {
        state,
        sample,
        sync,
        is_behind_tick_rate,
        tick,
    }
}

/// Handle on a running render loop task
///
/// Dropping the handle cancels the loop; `stop` also waits for it so no
/// tick can be published afterwards.
pub struct RenderLoop {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RenderLoop {
    pub fn spawn(
        document: Option<Arc<LyricDocument>>,
        clock: PlaybackClock,
        frames: Arc<watch::Sender<Frame>>,
        config: LoopConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(document, clock, frames, config, cancel.clone()));
        Self {
            cancel,
            task: Some(task),
        }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the pending tick and wait for the loop to exit
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!("Render loop task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    document: Option<Arc<LyricDocument>>,
    clock: PlaybackClock,
    frames: Arc<watch::Sender<Frame>>,
    config: LoopConfig,
    cancel: CancellationToken,
) {
    debug!(
        "Render loop started ({:?} per frame, lyrics: {})",
        config.frame_interval,
        document.is_some()
    );
    let mut interval = tokio::time::interval(config.frame_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut lag = LagDetector::new(config.lag_threshold);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let sample = clock.sample();
        let now = sample.map(|s| s.wall_clock).unwrap_or_else(Instant::now);
        let frame = compose_frame(document.as_deref(), sample, now, &mut lag, tick);
        if frame.is_behind_tick_rate {
            trace!("Render loop behind tick rate at tick {}", tick);
        }
        frames.send_replace(frame);
        tick = tick.wrapping_add(1);
    }

    frames.send_replace(Frame {
        state: LoopState::Stopped,
        tick,
        ..Frame::default()
    });
    debug!("Render loop stopped after {} ticks", tick);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::events::SharedPlaybackState;
    use serde_json::json;

    fn document() -> LyricDocument {
        LyricDocument::parse(&json!({
            "Type": "Syllable",
            "Content": [{
                "Type": "Vocal",
                "Lead": {
                    "StartTime": 0.0,
                    "EndTime": 2.0,
                    "Syllables": [
                        { "Text": "He", "StartTime": 0.0, "EndTime": 0.5, "IsPartOfWord": true },
                        { "Text": "llo", "StartTime": 0.5, "EndTime": 1.0, "IsPartOfWord": false },
                        { "Text": "World", "StartTime": 1.5, "EndTime": 2.0, "IsPartOfWord": false }
                    ]
                }
            }]
        }))
        .unwrap()
    }

    fn loaded_state(position: f64) -> SharedPlaybackState {
        let state = SharedPlaybackState::new();
        state.begin_loading("https://cdn.example/a.mp3");
        state.mark_loaded(Some(Duration::from_secs(10)));
        state.set_position(Duration::from_secs_f64(position));
        state
    }

    #[test]
    fn test_frame_interval_from_rate() {
        assert_eq!(LoopConfig::new(50, DEFAULT_LAG_THRESHOLD).frame_interval, Duration::from_millis(20));
        // Zero is clamped instead of dividing by zero
        assert_eq!(LoopConfig::new(0, DEFAULT_LAG_THRESHOLD).frame_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_lag_detector() {
        let start = Instant::now();
        let mut lag = LagDetector::new(Duration::from_millis(50));

        assert!(!lag.observe(start));
        assert!(!lag.observe(start + Duration::from_millis(16)));
        assert!(!lag.observe(start + Duration::from_millis(66)));
        assert!(lag.observe(start + Duration::from_millis(200)));
        assert!(!lag.observe(start + Duration::from_millis(216)));
    }

    #[test]
    fn test_compose_idle_without_clock() {
        let doc = document();
        let mut lag = LagDetector::new(DEFAULT_LAG_THRESHOLD);
        let frame = compose_frame(Some(&doc), None, Instant::now(), &mut lag, 0);

        assert_eq!(frame.state, LoopState::Idle);
        assert!(frame.sync.is_cleared());
        assert_eq!(frame.current_time(), None);
    }

    #[test]
    fn test_compose_idle_without_document_keeps_sample() {
        let now = Instant::now();
        let sample = PlaybackSample {
            current_time: 1.0,
            wall_clock: now,
        };
        let mut lag = LagDetector::new(DEFAULT_LAG_THRESHOLD);
        let frame = compose_frame(None, Some(sample), now, &mut lag, 3);

        assert_eq!(frame.state, LoopState::Idle);
        assert!(frame.sync.is_cleared());
        assert_eq!(frame.current_time(), Some(1.0));
        assert_eq!(frame.tick, 3);
    }

    #[test]
    fn test_compose_running() {
        let doc = document();
        let now = Instant::now();
        let sample = PlaybackSample {
            current_time: 0.75,
            wall_clock: now,
        };
        let mut lag = LagDetector::new(DEFAULT_LAG_THRESHOLD);
        let frame = compose_frame(Some(&doc), Some(sample), now, &mut lag, 0);

        assert_eq!(frame.state, LoopState::Running);
        assert_eq!(frame.sync.lead_text, "hello ");
        assert_eq!(frame.sync.active_segment, Some(0));
        assert!(!frame.is_behind_tick_rate);
    }

    #[tokio::test]
    async fn test_loop_publishes_and_stops() {
        let (tx, mut rx) = watch::channel(Frame::default());
        let frames = Arc::new(tx);
        let clock = PlaybackClock::new(loaded_state(1.0));
        let render = RenderLoop::spawn(
            Some(Arc::new(document())),
            clock,
            frames.clone(),
            LoopConfig::new(200, DEFAULT_LAG_THRESHOLD),
        );
        assert!(render.is_running());

        let frame = tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|f| f.state == LoopState::Running),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(frame.sync.lead_text, "hello ");
        assert_eq!(frame.current_time(), Some(1.0));

        render.stop().await;
        let last = frames.borrow().clone();
        assert_eq!(last.state, LoopState::Stopped);
        assert!(last.sync.is_cleared());
        assert_eq!(last.sample, None);
    }

    #[tokio::test]
    async fn test_loop_idle_until_source_attached() {
        let (tx, mut rx) = watch::channel(Frame::default());
        let state = SharedPlaybackState::new();
        let render = RenderLoop::spawn(
            Some(Arc::new(document())),
            PlaybackClock::new(state.clone()),
            Arc::new(tx),
            LoopConfig::new(200, DEFAULT_LAG_THRESHOLD),
        );

        let idle = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|f| f.tick >= 2))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(idle.state, LoopState::Idle);
        assert!(idle.sync.is_cleared());

        state.begin_loading("https://cdn.example/a.mp3");
        state.mark_loaded(None);
        state.set_position(Duration::from_secs(2));
        let running = tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|f| f.state == LoopState::Running),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(running.sync.lead_text, "hello world ");

        render.stop().await;
    }

    #[tokio::test]
    async fn test_dropped_loop_is_cancelled() {
        let (tx, mut rx) = watch::channel(Frame::default());
        let render = RenderLoop::spawn(
            None,
            PlaybackClock::new(SharedPlaybackState::new()),
            Arc::new(tx),
            LoopConfig::new(200, DEFAULT_LAG_THRESHOLD),
        );
        drop(render);

        let stopped = tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|f| f.state == LoopState::Stopped),
        )
        .await;
        assert!(stopped.is_ok());
    }
}
