//! Lyrics module
//!
//! - `document` - Validated timed lyric documents
//! - `evaluator` - Maps a playback time to the visible lyric state

pub mod document;
pub mod evaluator;

pub use document::{LyricDocument, ParseError};
pub use evaluator::{SyncResult, evaluate};
