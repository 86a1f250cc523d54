//! Terminal lyric display
//!
//! Subscribes to render frames and prints a line whenever the visible
//! lyric text changes.

use tokio::sync::watch;

use crate::render::Frame;
use crate::session::SongStatus;
use crate::settings::DisplaySettings;
use crate::utils::format_seconds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayOptions {
    pub show_background: bool,
    pub show_diagnostics: bool,
    /// Column reserved for the lead text
    pub lead_width: usize,
}

impl DisplayOptions {
    pub fn new(settings: &DisplaySettings, lead_width: usize) -> Self {
        Self {
            show_background: settings.show_background,
            show_diagnostics: settings.show_diagnostics,
            lead_width,
        }
    }
}

/// Timing diagnostics for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    pub status: String,
    pub next_verse: String,
    pub next_word: String,
    pub current_time: String,
}

impl Diagnostics {
    pub fn new(status: &SongStatus, frame: &Frame) -> Self {
        Self {
            status: status.to_string(),
            next_verse: format_seconds(frame.sync.next_verse_in),
            next_word: format_seconds(frame.sync.next_word_in),
            current_time: format_seconds(frame.current_time()),
        }
    }
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Song Status: {} | time next verse: {} | time next word: {} | current time: {}",
            self.status, self.next_verse, self.next_word, self.current_time
        )
    }
}

/// Format the lyric line of a frame
pub fn render_line(frame: &Frame, options: &DisplayOptions) -> String {
    let lead = frame.sync.lead_text.trim_end();
    let background = frame.sync.background_text.trim_end();
    if options.show_background && !background.is_empty() {
        format!("{:<width$}  ({})", lead, background, width = options.lead_width)
    } else {
        lead.to_string()
    }
}

/// Remembers what was last shown so unchanged frames print nothing
#[derive(Debug, Default)]
pub struct LyricPrinter {
    last_lead: String,
    last_background: String,
}

impl LyricPrinter {
    /// Output for `frame`, `None` when the visible text did not change
    pub fn update(
        &mut self,
        frame: &Frame,
        status: &SongStatus,
        options: &DisplayOptions,
    ) -> Option<String> {
        let background = if options.show_background {
            frame.sync.background_text.as_str()
        } else {
            ""
        };
        if frame.sync.lead_text == self.last_lead && background == self.last_background {
            return None;
        }
        self.last_lead = frame.sync.lead_text.clone();
        self.last_background = background.to_string();

        let mut out = render_line(frame, options);
        if options.show_diagnostics {
            out.push('\n');
            out.push_str(&Diagnostics::new(status, frame).to_string());
        }
        Some(out)
    }
}

/// Print lyric changes until the session goes away
pub async fn run(
    mut frames: watch::Receiver<Frame>,
    mut status: watch::Receiver<SongStatus>,
    options: DisplayOptions,
) {
    let mut printer = LyricPrinter::default();
    loop {
        tokio::select! {
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("[{}]", *status.borrow_and_update());
                continue;
            }
        }
        let frame = frames.borrow_and_update().clone();
        let current_status = status.borrow().clone();
        if let Some(out) = printer.update(&frame, &current_status, &options) {
            println!("{}", out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::PlaybackSample;
    use crate::lyrics::SyncResult;
    use crate::render::LoopState;
    use std::time::Instant;

    fn frame(lead: &str, background: &str) -> Frame {
        Frame {
            state: LoopState::Running,
            sample: Some(PlaybackSample {
                current_time: 12.25,
                wall_clock: Instant::now(),
            }),
            sync: SyncResult {
                active_segment: Some(0),
                lead_text: lead.to_string(),
                background_text: background.to_string(),
                next_verse_in: Some(1.5),
                next_word_in: None,
            },
            is_behind_tick_rate: false,
            tick: 0,
        }
    }

    fn options() -> DisplayOptions {
        DisplayOptions {
            show_background: true,
            show_diagnostics: false,
            lead_width: 12,
        }
    }

    #[test]
    fn test_render_line_with_background() {
        assert_eq!(
            render_line(&frame("hello ", "ooh "), &options()),
            "hello         (ooh)"
        );
        assert_eq!(render_line(&frame("hello ", ""), &options()), "hello");
    }

    #[test]
    fn test_render_line_hides_background() {
        let options = DisplayOptions {
            show_background: false,
            ..options()
        };
        assert_eq!(render_line(&frame("hello ", "ooh "), &options), "hello");
    }

    #[test]
    fn test_diagnostics() {
        let diagnostics = Diagnostics::new(&SongStatus::Playing, &frame("hello ", ""));
        assert_eq!(diagnostics.next_verse, "1.500s");
        assert_eq!(diagnostics.next_word, "N/A");
        assert_eq!(diagnostics.current_time, "12.250s");
        assert_eq!(
            diagnostics.to_string(),
            "Song Status: Playing | time next verse: 1.500s | time next word: N/A | current time: 12.250s"
        );

        let idle = Diagnostics::new(&SongStatus::Loading, &Frame::default());
        assert_eq!(idle.status, "Loading...");
        assert_eq!(idle.current_time, "N/A");
    }

    #[test]
    fn test_printer_only_reports_changes() {
        let mut printer = LyricPrinter::default();
        let options = options();
        let status = SongStatus::Playing;

        assert_eq!(printer.update(&Frame::default(), &status, &options), None);
        assert_eq!(
            printer.update(&frame("hel", ""), &status, &options).as_deref(),
            Some("hel")
        );
        assert_eq!(printer.update(&frame("hel", ""), &status, &options), None);
        assert!(printer.update(&frame("hel", "ooh "), &status, &options).is_some());
        assert!(printer.update(&Frame::default(), &status, &options).is_some());
    }

    #[test]
    fn test_printer_appends_diagnostics() {
        let mut printer = LyricPrinter::default();
        let options = DisplayOptions {
            show_diagnostics: true,
            ..options()
        };
        let out = printer
            .update(&frame("hello ", ""), &SongStatus::Paused, &options)
            .unwrap();
        assert!(out.starts_with("hello\nSong Status: Paused"));
    }
}
