//! Running-transcript index for intent position attribution.
//!
//! The session-wide transcript is the space-joined concatenation of ASR
//! final texts. Given an utterance's time range and an intent's text, the
//! index finds the character range the intent came from.

/// Slack added around an utterance's time range when collecting segments.
const REGION_SLACK_MS: i64 = 2_000;

#[derive(Debug, Clone)]
struct Segment {
    text: String,
    offset_ms: i64,
    char_start: usize,
    char_end: usize,
}

/// Index over ASR finals, in arrival order.
#[derive(Debug, Default)]
pub struct TranscriptIndex {
    segments: Vec<Segment>,
    transcript: String,
}

impl TranscriptIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full running transcript.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Append one ASR final.
    pub fn add_final(&mut self, text: &str, offset_ms: i64) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        if !self.transcript.is_empty() {
            self.transcript.push(' ');
        }
        let char_start = self.transcript.len();
        self.transcript.push_str(trimmed);
        self.segments.push(Segment {
            text: trimmed.to_string(),
            offset_ms,
            char_start,
            char_end: self.transcript.len(),
        });
    }

    /// Locate an intent's text within the transcript.
    ///
    /// Searches `source_text` (then `original_text`) case-insensitively in
    /// the region of segments within ±2 s of the utterance's time range,
    /// falling back to the full region bounds. Returns `None` when no
    /// segment is in range.
    pub fn attribute(
        &self,
        utterance_start_ms: i64,
        utterance_end_ms: i64,
        source_text: &str,
        original_text: &str,
    ) -> Option<(usize, usize)> {
        let lo = utterance_start_ms - REGION_SLACK_MS;
        let hi = utterance_end_ms + REGION_SLACK_MS;
        let region: Vec<&Segment> = self
            .segments
            .iter()
            .filter(|s| s.offset_ms >= lo && s.offset_ms <= hi)
            .collect();
        let first = region.first()?;
        let last = region.last()?;

        let region_text = &self.transcript[first.char_start..last.char_end];
        for needle in [source_text, original_text] {
            if let Some(range) = find_ci(region_text, needle) {
                return Some((first.char_start + range.0, first.char_start + range.1));
            }
        }
        Some((first.char_start, last.char_end))
    }
}

/// Case-insensitive substring search; byte range in `haystack`.
fn find_ci(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    let needle = needle.trim();
    if needle.is_empty() {
        return None;
    }
    let haystack_lower = haystack.to_lowercase();
    let needle_lower = needle.to_lowercase();
    // Lowercasing that shifts byte offsets would invalidate the range.
    if haystack_lower.len() != haystack.len() {
        return None;
    }
    haystack_lower
        .find(&needle_lower)
        .map(|start| (start, start + needle_lower.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> TranscriptIndex {
        let mut index = TranscriptIndex::new();
        index.add_final("Hello world", 1_000);
        index.add_final("what is dependency injection", 3_000);
        index.add_final("let me explain", 5_000);
        index
    }

    #[test]
    fn test_running_transcript() {
        let index = index();
        assert_eq!(
            index.transcript(),
            "Hello world what is dependency injection let me explain"
        );
    }

    #[test]
    fn test_source_text_found() {
        let index = index();
        // Utterance [2000, 4000]: region covers all three segments (±2 s).
        let range = index
            .attribute(2_000, 4_000, "what is dependency injection", "")
            .unwrap();
        assert_eq!(range, (12, 40));
    }

    #[test]
    fn test_case_insensitive_match() {
        let index = index();
        let range = index
            .attribute(2_000, 4_000, "What Is Dependency Injection", "")
            .unwrap();
        assert_eq!(range, (12, 40));
    }

    #[test]
    fn test_original_text_fallback() {
        let index = index();
        let range = index
            .attribute(2_000, 4_000, "Could you define dependency injection?", "what is dependency")
            .unwrap();
        assert_eq!(range, (12, 30));
    }

    #[test]
    fn test_region_bounds_fallback() {
        let index = index();
        // Nothing matches: the whole region is returned.
        let range = index
            .attribute(2_500, 3_500, "completely unrelated", "also unrelated")
            .unwrap();
        assert_eq!(range, (0, index.transcript().len()));
    }

    #[test]
    fn test_no_segments_in_range() {
        let index = index();
        assert!(index.attribute(20_000, 22_000, "anything", "").is_none());
    }

    #[test]
    fn test_region_is_time_bounded() {
        let mut index = TranscriptIndex::new();
        index.add_final("early text", 0);
        index.add_final("the actual question", 10_000);
        // Utterance near 10 s: the early segment is out of range, so the
        // fallback region starts at the second segment.
        let range = index
            .attribute(9_000, 11_000, "no match", "no match")
            .unwrap();
        assert_eq!(range, (11, index.transcript().len()));
    }

    #[test]
    fn test_empty_index() {
        let index = TranscriptIndex::new();
        assert!(index.attribute(0, 1_000, "hello", "").is_none());
    }
}
