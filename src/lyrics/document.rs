//! Timed lyric document
//!
//! Validates the payload returned by the lyrics collaborator into an
//! immutable tree of verse segments, vocal lines and syllables.
//! All times are in seconds.

use serde::Deserialize;
use serde_json::Value;

/// Smallest timed text unit of a vocal line
#[derive(Debug, Clone, PartialEq)]
pub struct Syllable {
    /// Raw glyph or word fragment
    pub text: String,
    /// Second at which the syllable becomes active
    pub start_time: f64,
    /// Informational, activation only looks at `start_time`
    pub end_time: f64,
    /// The next syllable continues the same word
    pub is_part_of_word: bool,
}

/// One timed vocal track (lead or background) of a segment
#[derive(Debug, Clone, PartialEq)]
pub struct VocalLine {
    /// Syllables in temporal order
    pub syllables: Vec<Syllable>,
    /// Inclusive start bound, taken from the payload as-is
    pub start_time: f64,
    /// Inclusive end bound, taken from the payload as-is
    pub end_time: f64,
}

impl VocalLine {
    /// Check if `t` lies within the inclusive bounds of this line
    pub fn contains(&self, t: f64) -> bool {
        self.start_time <= t && t <= self.end_time
    }

    /// Raw concatenated syllable text
    pub fn text(&self) -> String {
        self.syllables.iter().map(|s| s.text.as_str()).collect()
    }
}

/// Segment content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    /// Sung content, the only kind that takes part in sync
    Vocal,
    /// Anything else (interludes, credits, ...), kept with its original tag
    Other(String),
}

impl SegmentKind {
    fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            None => SegmentKind::Vocal,
            Some(tag) if tag.eq_ignore_ascii_case("vocal") => SegmentKind::Vocal,
            Some(tag) => SegmentKind::Other(tag.to_string()),
        }
    }

    pub fn is_vocal(&self) -> bool {
        matches!(self, SegmentKind::Vocal)
    }
}

/// A timed block of lyrics: one lead line plus optional background lines
#[derive(Debug, Clone, PartialEq)]
pub struct VerseSegment {
    pub kind: SegmentKind,
    pub lead: VocalLine,
    pub background: Vec<VocalLine>,
    /// Duet hint from the payload (right-aligned singer)
    pub opposite_aligned: bool,
}

impl VerseSegment {
    /// Background line that gets rendered (only the first one is)
    pub fn primary_background(&self) -> Option<&VocalLine> {
        self.background.first()
    }
}

/// Validated lyric document for a single track
///
/// Read-only once built. Segments keep payload order, which is not
/// guaranteed to be sorted by start time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LyricDocument {
    kind: Option<String>,
    contents: Vec<VerseSegment>,
}

impl LyricDocument {
    /// Build a document from already constructed segments
    pub fn from_segments(contents: Vec<VerseSegment>) -> Result<Self, ParseError> {
        validate(&contents)?;
        Ok(Self {
            kind: None,
            contents,
        })
    }

    /// Parse a lyric payload
    pub fn parse(raw: &Value) -> Result<Self, ParseError> {
        let raw = RawDocument::deserialize(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;
        let mut document = Self::from_segments(raw.content.into_iter().map(VerseSegment::from).collect())?;
        document.kind = raw.kind;
        Ok(document)
    }

    /// Parse a lyric payload from JSON text
    pub fn parse_str(raw: &str) -> Result<Self, ParseError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;
        Self::parse(&value)
    }

    /// Segments in payload order
    pub fn contents(&self) -> &[VerseSegment] {
        &self.contents
    }

    /// Sync granularity reported by the payload (e.g. "Syllable", "Line")
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    /// Character count of the longest lead line
    pub fn widest_line_len(&self) -> usize {
        self.contents
            .iter()
            .map(|segment| segment.lead.text().chars().count())
            .max()
            .unwrap_or(0)
    }
}

fn validate(contents: &[VerseSegment]) -> Result<(), ParseError> {
    for (index, segment) in contents.iter().enumerate() {
        let lead = &segment.lead;
        if lead.start_time > lead.end_time {
            return Err(ParseError::InvertedBounds {
                segment: index,
                start_time: lead.start_time,
                end_time: lead.end_time,
            });
        }
    }
    Ok(())
}

/// Lyric payload could not be turned into a document
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Not a well-formed structure with a `Content` sequence of timed leads
    Malformed(String),
    /// A lead line ends before it starts
    InvertedBounds {
        segment: usize,
        start_time: f64,
        end_time: f64,
    },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Malformed(e) => write!(f, "Malformed lyric payload: {}", e),
            ParseError::InvertedBounds {
                segment,
                start_time,
                end_time,
            } => write!(
                f,
                "Segment {} lead ends before it starts ({} > {})",
                segment, start_time, end_time
            ),
        }
    }
}

impl std::error::Error for ParseError {}

// ============ Wire format ============

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawDocument {
    #[serde(rename = "Type", default)]
    kind: Option<String>,
    content: Vec<RawSegment>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawSegment {
    #[serde(rename = "Type", default)]
    kind: Option<String>,
    #[serde(default)]
    opposite_aligned: bool,
    lead: RawVocalLine,
    #[serde(default)]
    background: Option<Vec<RawVocalLine>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawVocalLine {
    #[serde(default)]
    syllables: Vec<RawSyllable>,
    start_time: f64,
    end_time: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawSyllable {
    text: String,
    start_time: f64,
    end_time: f64,
    #[serde(default)]
    is_part_of_word: bool,
}

impl From<RawSegment> for VerseSegment {
    fn from(raw: RawSegment) -> Self {
        Self {
            kind: SegmentKind::from_tag(raw.kind.as_deref()),
            lead: raw.lead.into(),
            background: raw
                .background
                .unwrap_or_default()
                .into_iter()
                .map(VocalLine::from)
                .collect(),
            opposite_aligned: raw.opposite_aligned,
        }
    }
}

impl From<RawVocalLine> for VocalLine {
    fn from(raw: RawVocalLine) -> Self {
        Self {
            syllables: raw.syllables.into_iter().map(Syllable::from).collect(),
            start_time: raw.start_time,
            end_time: raw.end_time,
        }
    }
}

impl From<RawSyllable> for Syllable {
    fn from(raw: RawSyllable) -> Self {
        Self {
            text: raw.text,
            start_time: raw.start_time,
            end_time: raw.end_time,
            is_part_of_word: raw.is_part_of_word,
        }
    }
}
