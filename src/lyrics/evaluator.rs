//! Time-to-lyrics evaluation
//!
//! Pure function of a document and a playback time. Called once per
//! render tick, never mutates the document.

use super::document::{LyricDocument, Syllable, VerseSegment, VocalLine};

/// Visible lyric state at one instant
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncResult {
    /// Index of the active segment in document order
    pub active_segment: Option<usize>,
    /// Lowercased lead text sung so far
    pub lead_text: String,
    /// Lowercased text of the first background line sung so far
    pub background_text: String,
    /// Seconds until the next vocal segment starts
    pub next_verse_in: Option<f64>,
    /// Seconds until the next word-continuing syllable of the active lead
    pub next_word_in: Option<f64>,
}

impl SyncResult {
    /// True when nothing is being sung
    pub fn is_cleared(&self) -> bool {
        self.active_segment.is_none() && self.lead_text.is_empty() && self.background_text.is_empty()
    }
}

/// Compute the visible lyric state at playback time `t` (seconds)
///
/// A non-finite `t` never matches a segment and yields a cleared result.
pub fn evaluate(document: &LyricDocument, t: f64) -> SyncResult {
    let Some((index, segment)) = active_segment(document, t) else {
        return SyncResult::default();
    };

    let lead_text = visible_text(&segment.lead, t);
    let background_text = segment
        .primary_background()
        .map(|line| visible_text(line, t))
        .unwrap_or_default();

    let next_verse_in = vocal_segments(document)
        .map(|(_, s)| s)
        .find(|s| s.lead.start_time > t)
        .map(|s| s.lead.start_time - t);

    let next_word_in = segment
        .lead
        .syllables
        .iter()
        .find(|s| s.start_time > t && s.is_part_of_word)
        .map(|s| s.start_time - t);

    SyncResult {
        active_segment: Some(index),
        lead_text,
        background_text,
        next_verse_in,
        next_word_in,
    }
}

/// First vocal segment, in document order, whose lead contains `t`
pub fn active_segment(document: &LyricDocument, t: f64) -> Option<(usize, &VerseSegment)> {
    vocal_segments(document).find(|(_, s)| s.lead.contains(t))
}

fn vocal_segments(document: &LyricDocument) -> impl Iterator<Item = (usize, &VerseSegment)> {
    document
        .contents()
        .iter()
        .enumerate()
        .filter(|(_, s)| s.kind.is_vocal())
}

fn visible_text(line: &VocalLine, t: f64) -> String {
    let active: Vec<&Syllable> = line.syllables.iter().filter(|s| s.start_time <= t).collect();
    join_syllables(&active)
}

/// Join syllables into display text
///
/// Each syllable is lowercased and followed by a space, unless it
/// continues a word and is not the last one in the list.
pub fn join_syllables(syllables: &[&Syllable]) -> String {
    let mut text = String::new();
    for (index, syllable) in syllables.iter().enumerate() {
        text.push_str(&syllable.text.to_lowercase());
        let continues_word = syllable.is_part_of_word && index + 1 < syllables.len();
        if !continues_word {
            text.push(' ');
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lyrics::document::SegmentKind;

    fn syl(text: &str, start: f64, part_of_word: bool) -> Syllable {
        Syllable {
            text: text.to_string(),
            start_time: start,
            end_time: start + 0.25,
            is_part_of_word: part_of_word,
        }
    }

    fn line(syllables: Vec<Syllable>, start: f64, end: f64) -> VocalLine {
        VocalLine {
            syllables,
            start_time: start,
            end_time: end,
        }
    }

    fn segment(lead: VocalLine) -> VerseSegment {
        VerseSegment {
            kind: SegmentKind::Vocal,
            lead,
            background: Vec::new(),
            opposite_aligned: false,
        }
    }

    fn doc(segments: Vec<VerseSegment>) -> LyricDocument {
        LyricDocument::from_segments(segments).unwrap()
    }

    #[test]
    fn test_empty_document_is_cleared() {
        let result = evaluate(&LyricDocument::default(), 1.0);
        assert_eq!(result, SyncResult::default());
        assert!(result.is_cleared());
    }

    #[test]
    fn test_time_in_gap_is_cleared() {
        let d = doc(vec![
            segment(line(vec![syl("a", 1.0, false)], 1.0, 2.0)),
            segment(line(vec![syl("b", 5.0, false)], 5.0, 6.0)),
        ]);
        let result = evaluate(&d, 3.0);
        assert!(result.is_cleared());
        assert_eq!(result.next_verse_in, None);
        assert_eq!(result.next_word_in, None);
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let d = doc(vec![segment(line(vec![syl("hi", 1.0, false)], 1.0, 2.0))]);
        assert_eq!(evaluate(&d, 1.0).active_segment, Some(0));
        assert_eq!(evaluate(&d, 2.0).active_segment, Some(0));
        assert_eq!(evaluate(&d, 2.0001).active_segment, None);
    }

    #[test]
    fn test_overlap_prefers_document_order() {
        let d = doc(vec![
            segment(line(vec![syl("one", 0.0, false)], 0.0, 2.0)),
            segment(line(vec![syl("two", 2.0, false)], 2.0, 4.0)),
        ]);
        assert_eq!(evaluate(&d, 1.5).active_segment, Some(0));
        assert_eq!(evaluate(&d, 1.5).next_verse_in, Some(0.5));
        assert_eq!(evaluate(&d, 2.0).active_segment, Some(0));
        assert_eq!(evaluate(&d, 2.5).active_segment, Some(1));
        assert_eq!(evaluate(&d, 5.0), SyncResult::default());
    }

    #[test]
    fn test_before_first_segment_is_cleared() {
        let d = doc(vec![segment(line(
            vec![syl("a", 1.0, false), syl("b", 1.5, true), syl("c", 1.7, false)],
            1.0,
            2.0,
        ))]);
        let result = evaluate(&d, 0.5);
        assert_eq!(result, SyncResult::default());
        assert_eq!(result.next_verse_in, None);
        assert_eq!(result.next_word_in, None);
    }

    #[test]
    fn test_progressive_reveal() {
        let syllables = vec![
            syl("Hel", 1.0, true),
            syl("lo", 1.3, false),
            syl("World", 1.6, false),
        ];
        let d = doc(vec![segment(line(syllables, 1.0, 2.0))]);

        assert_eq!(evaluate(&d, 1.0).lead_text, "hel ");
        assert_eq!(evaluate(&d, 1.3).lead_text, "hello ");
        assert_eq!(evaluate(&d, 1.9).lead_text, "hello world ");
    }

    #[test]
    fn test_word_join_law() {
        let a = syl("Hel", 0.0, true);
        let b = syl("lo", 0.1, false);
        assert_eq!(join_syllables(&[&a, &b]), "hello ");

        let c = syl("A", 0.0, false);
        let d = syl("B", 0.1, false);
        assert_eq!(join_syllables(&[&c, &d]), "a b ");

        // Trailing word-continuing syllable still gets its space
        assert_eq!(join_syllables(&[&a]), "hel ");
        assert_eq!(join_syllables(&[]), "");
    }

    #[test]
    fn test_lowercases_unicode() {
        let s = syl("ÉTÉ", 0.0, false);
        assert_eq!(join_syllables(&[&s]), "été ");
    }

    #[test]
    fn test_next_word_only_counts_word_continuations() {
        let syllables = vec![
            syl("a", 3.0, false),
            syl("b", 4.5, false),
            syl("c", 5.0, true),
            syl("d", 5.5, false),
        ];
        let d = doc(vec![segment(line(syllables, 3.0, 6.0))]);
        let result = evaluate(&d, 4.0);
        assert_eq!(result.next_word_in, Some(1.0));
    }

    #[test]
    fn test_next_verse_uses_document_order() {
        let d = doc(vec![
            segment(line(vec![syl("a", 0.0, false)], 0.0, 3.0)),
            segment(line(vec![syl("b", 9.0, false)], 9.0, 10.0)),
            segment(line(vec![syl("c", 5.0, false)], 5.0, 6.0)),
        ]);
        let result = evaluate(&d, 1.0);
        assert_eq!(result.next_verse_in, Some(8.0));
    }

    #[test]
    fn test_next_verse_none_on_last_segment() {
        let d = doc(vec![segment(line(vec![syl("a", 0.0, false)], 0.0, 3.0))]);
        assert_eq!(evaluate(&d, 1.0).next_verse_in, None);
    }

    #[test]
    fn test_background_uses_first_line_only() {
        let mut seg = segment(line(vec![syl("lead", 0.0, false)], 0.0, 4.0));
        seg.background = vec![
            line(vec![syl("Ooh", 1.0, true), syl("ooh", 1.5, false)], 1.0, 2.0),
            line(vec![syl("ignored", 0.0, false)], 0.0, 4.0),
        ];
        let d = doc(vec![seg]);

        assert_eq!(evaluate(&d, 0.5).background_text, "");
        assert_eq!(evaluate(&d, 1.2).background_text, "ooh ");
        assert_eq!(evaluate(&d, 1.6).background_text, "oohooh ");
    }

    #[test]
    fn test_background_without_lead_time_is_not_rendered() {
        // Background only shows while its lead segment is active
        let mut seg = segment(line(vec![syl("x", 1.0, false)], 1.0, 2.0));
        seg.background = vec![line(vec![syl("bg", 2.5, false)], 2.5, 3.0)];
        let d = doc(vec![seg]);
        assert!(evaluate(&d, 2.6).is_cleared());
    }

    #[test]
    fn test_non_vocal_segments_are_skipped() {
        let mut interlude = segment(line(vec![syl("music", 0.0, false)], 0.0, 5.0));
        interlude.kind = SegmentKind::Other("Interlude".to_string());
        let d = doc(vec![
            interlude,
            segment(line(vec![syl("sing", 2.0, false)], 2.0, 3.0)),
        ]);

        assert!(evaluate(&d, 1.0).is_cleared());
        let result = evaluate(&d, 2.5);
        assert_eq!(result.active_segment, Some(1));
        assert_eq!(result.lead_text, "sing ");
    }

    #[test]
    fn test_non_finite_time_is_cleared() {
        let d = doc(vec![segment(line(vec![syl("a", 0.0, false)], 0.0, 3.0))]);
        assert!(evaluate(&d, f64::NAN).is_cleared());
        assert!(evaluate(&d, f64::INFINITY).is_cleared());
    }

    #[test]
    fn test_deterministic() {
        let d = doc(vec![segment(line(
            vec![syl("La", 0.0, true), syl("la", 0.5, false)],
            0.0,
            1.0,
        ))]);
        assert_eq!(evaluate(&d, 0.7), evaluate(&d, 0.7));
    }

    #[test]
    fn test_evaluate_parsed_payload() {
        let d = LyricDocument::parse_str(
            r#"{"Content":[{"Type":"Vocal","Lead":{"Syllables":[
                {"Text":"Hel","StartTime":1.0,"EndTime":1.3,"IsPartOfWord":true},
                {"Text":"lo","StartTime":1.3,"EndTime":1.6,"IsPartOfWord":false}
            ],"StartTime":1.0,"EndTime":2.0}}]}"#,
        )
        .unwrap();
        let result = evaluate(&d, 1.1);
        assert_eq!(result.lead_text, "hel ");
        assert_eq!(result.next_word_in, None);
    }
}
