//! Utility functions

use std::path::PathBuf;

// ============================================================================
// Wall clock
// ============================================================================

/// Source of epoch milliseconds
///
/// Injected wherever expiry is compared against "now" so tests can move time.
pub trait WallClock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Real system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualClock {
    now: std::sync::atomic::AtomicI64,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: std::sync::atomic::AtomicI64::new(now_millis),
        }
    }

    pub fn advance(&self, delta: std::time::Duration) {
        self.now.fetch_add(
            delta.as_millis() as i64,
            std::sync::atomic::Ordering::SeqCst,
        );
    }
}

#[cfg(test)]
impl WallClock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// Format seconds with millisecond precision, "N/A" when unknown
pub fn format_seconds(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) if s.is_finite() => format!("{:.3}s", s),
        _ => "N/A".to_string(),
    }
}

/// Format duration as mm:ss
pub fn format_duration(secs: u64) -> String {
    let mins = secs / 60;
    let secs = secs % 60;
    format!("{}:{:02}", mins, secs)
}

// ============================================================================
// Paths
// ============================================================================

/// Application cache directory
pub fn cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|p| p.join("lyricsync"))
}
