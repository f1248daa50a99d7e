//! Hypothesis stabilization for streaming transcription.
//!
//! Interim ASR hypotheses are volatile: the recognizer rewrites them as more
//! audio arrives. The [`Stabilizer`] tracks agreement across a sliding window
//! of hypotheses and maintains a stable prefix that never retracts.

use std::collections::VecDeque;

use hearsay_events::AsrWord;
use serde::{Deserialize, Serialize};

/// Tuning for the stabilizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilizerConfig {
    /// Number of recent hypotheses that must agree on a word.
    pub window: usize,
    /// Words below this confidence need repetition before stabilizing.
    pub min_word_confidence: f64,
    /// Gate low-confidence words on appearing in two consecutive hypotheses.
    pub require_repetition_for_low_confidence: bool,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            window: 3,
            min_word_confidence: 0.6,
            require_repetition_for_low_confidence: true,
        }
    }
}

/// One word of a tracked hypothesis.
#[derive(Debug, Clone)]
struct HypWord {
    surface: String,
    norm: String,
    confidence: Option<f64>,
}

/// Converts volatile interim hypotheses into a never-retracting stable prefix.
///
/// Text enters two ways: partials via [`add_hypothesis`](Self::add_hypothesis)
/// stabilize word by word as the hypothesis window agrees on them; finals via
/// [`commit_final`](Self::commit_final) are committed verbatim and clear the
/// window. Pure state machine, no failure modes.
#[derive(Debug, Default)]
pub struct Stabilizer {
    config: StabilizerConfig,
    /// Text committed by ASR finals.
    committed: String,
    /// Words stabilized out of the partial window, beyond `committed`.
    stable_partial: Vec<String>,
    ring: VecDeque<Vec<HypWord>>,
}

impl Stabilizer {
    pub fn new() -> Self {
        Self::with_config(StabilizerConfig::default())
    }

    pub fn with_config(config: StabilizerConfig) -> Self {
        Self {
            config,
            committed: String::new(),
            stable_partial: Vec::new(),
            ring: VecDeque::new(),
        }
    }

    /// The current stable prefix.
    pub fn stable_text(&self) -> String {
        if self.stable_partial.is_empty() {
            return self.committed.clone();
        }
        let partial = self.stable_partial.join(" ");
        if self.committed.is_empty() {
            partial
        } else {
            format!("{} {}", self.committed, partial)
        }
    }

    /// Feed a partial hypothesis; returns the stable prefix after tracking it.
    ///
    /// Empty or whitespace-only input contributes nothing.
    pub fn add_hypothesis(&mut self, text: &str, words: Option<&[AsrWord]>) -> String {
        let hyp = Self::tokenize(text, words);
        if hyp.is_empty() {
            return self.stable_text();
        }

        self.ring.push_back(hyp);
        while self.ring.len() > self.config.window.max(1) {
            self.ring.pop_front();
        }

        let agreed = self.agreed_prefix_len();
        if agreed > self.stable_partial.len() {
            let newest = self.ring.back().expect("ring is non-empty");
            for word in &newest[self.stable_partial.len()..agreed] {
                self.stable_partial.push(word.surface.clone());
            }
            tracing::trace!(
                stable_words = self.stable_partial.len(),
                window = self.ring.len(),
                "stable prefix extended"
            );
        }

        self.stable_text()
    }

    /// Commit a final segment; the stable prefix now includes `text` in full.
    ///
    /// The partial window is cleared: finals supersede whatever the window
    /// hypothesized about the same audio.
    pub fn commit_final(&mut self, text: &str) -> String {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            if !self.committed.is_empty() {
                self.committed.push(' ');
            }
            self.committed.push_str(trimmed);
        }
        self.stable_partial.clear();
        self.ring.clear();
        self.stable_text()
    }

    /// Words of the newest hypothesis beyond the stable prefix.
    ///
    /// This is the volatile tail a UI may render greyed out; it can change
    /// or vanish on the next hypothesis.
    pub fn unstable_tail(&self) -> String {
        let newest = match self.ring.back() {
            Some(h) => h,
            None => return String::new(),
        };
        if self.stable_partial.len() >= newest.len() {
            return String::new();
        }
        newest[self.stable_partial.len()..]
            .iter()
            .map(|w| w.surface.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Clear everything for a new utterance.
    pub fn reset(&mut self) {
        self.committed.clear();
        self.stable_partial.clear();
        self.ring.clear();
    }

    // --- Private helpers ---

    /// Longest prefix (in words) agreed on by every hypothesis in the ring,
    /// with the low-confidence repetition gate applied.
    fn agreed_prefix_len(&self) -> usize {
        let newest = match self.ring.back() {
            Some(h) => h,
            None => return 0,
        };

        let mut limit = newest.len();
        for hyp in self.ring.iter() {
            limit = limit.min(hyp.len());
        }

        let mut agreed = 0;
        'words: for i in 0..limit {
            let norm = &newest[i].norm;
            for hyp in self.ring.iter() {
                if &hyp[i].norm != norm {
                    break 'words;
                }
            }

            if self.config.require_repetition_for_low_confidence {
                if let Some(confidence) = newest[i].confidence {
                    // A word inside the agreed prefix has by construction been
                    // seen in every ring hypothesis; repetition is only in
                    // doubt while the window holds a single hypothesis.
                    if confidence < self.config.min_word_confidence && self.ring.len() < 2 {
                        break 'words;
                    }
                }
            }

            agreed = i + 1;
        }
        agreed
    }

    fn tokenize(text: &str, words: Option<&[AsrWord]>) -> Vec<HypWord> {
        if let Some(words) = words {
            return words
                .iter()
                .filter(|w| !w.text.trim().is_empty())
                .map(|w| HypWord {
                    surface: w.text.trim().to_string(),
                    norm: normalize(&w.text),
                    confidence: Some(w.confidence),
                })
                .collect();
        }
        text.split_whitespace()
            .map(|w| HypWord {
                surface: w.to_string(),
                norm: normalize(w),
                confidence: None,
            })
            .collect()
    }
}

fn normalize(word: &str) -> String {
    word.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, confidence: f64) -> AsrWord {
        AsrWord {
            text: text.to_string(),
            start_ms: 0,
            end_ms: 0,
            confidence,
            speaker: None,
        }
    }

    #[test]
    fn test_single_hypothesis_stabilizes_without_confidences() {
        // With no word confidences the plain common-prefix rule applies,
        // and a lone hypothesis is its own common prefix.
        let mut stabilizer = Stabilizer::new();
        let stable = stabilizer.add_hypothesis("hello world", None);
        assert_eq!(stable, "hello world");
    }

    #[test]
    fn test_disagreement_does_not_extend() {
        let mut stabilizer = Stabilizer::new();
        stabilizer.add_hypothesis("what is", None);
        // The new tail disagrees at word 2; agreement stops at "what",
        // which is already behind the stable mark.
        let stable = stabilizer.add_hypothesis("what was the lock", None);
        assert_eq!(stable, "what is");
    }

    #[test]
    fn test_stable_prefix_never_retracts() {
        let mut stabilizer = Stabilizer::new();
        stabilizer.add_hypothesis("what is a lock", None);
        let before = stabilizer.stable_text();
        // A glitchy hypothesis that contradicts already-stable words.
        let after = stabilizer.add_hypothesis("what was", None);
        assert!(after.starts_with(&before));
        assert_eq!(after, before);
    }

    #[test]
    fn test_punctuation_differences_still_agree() {
        let mut stabilizer = Stabilizer::new();
        stabilizer.add_hypothesis("Hello, world", None);
        // Case and punctuation are normalized for agreement; the surface
        // form of the first stable sighting is kept.
        let stable = stabilizer.add_hypothesis("hello world again", None);
        assert_eq!(stable, "Hello, world");
    }

    #[test]
    fn test_low_confidence_word_needs_repetition() {
        let mut stabilizer = Stabilizer::new();
        let words = [word("hello", 0.9), word("wold", 0.3)];
        let stable = stabilizer.add_hypothesis("hello wold", Some(&words));
        // First sighting of a low-confidence word is not stable.
        assert_eq!(stable, "hello");

        let stable = stabilizer.add_hypothesis("hello wold", Some(&words));
        // Second consecutive sighting stabilizes it.
        assert_eq!(stable, "hello wold");
    }

    #[test]
    fn test_low_confidence_gate_disabled() {
        let mut stabilizer = Stabilizer::with_config(StabilizerConfig {
            require_repetition_for_low_confidence: false,
            ..StabilizerConfig::default()
        });
        let words = [word("hello", 0.9), word("wold", 0.3)];
        let stable = stabilizer.add_hypothesis("hello wold", Some(&words));
        assert_eq!(stable, "hello wold");
    }

    #[test]
    fn test_commit_final_includes_full_text() {
        let mut stabilizer = Stabilizer::new();
        stabilizer.add_hypothesis("what is", None);
        let stable = stabilizer.commit_final("What is a lock statement?");
        assert_eq!(stable, "What is a lock statement?");
    }

    #[test]
    fn test_commit_final_appends_across_segments() {
        let mut stabilizer = Stabilizer::new();
        stabilizer.commit_final("What is a lock statement?");
        let stable = stabilizer.commit_final("And why would I use one?");
        assert_eq!(stable, "What is a lock statement? And why would I use one?");
    }

    #[test]
    fn test_commit_final_clears_the_window() {
        let mut stabilizer = Stabilizer::new();
        stabilizer.add_hypothesis("what is a lock", None);
        stabilizer.commit_final("What is a lock.");
        // Post-final partials describe new audio and restart agreement.
        let stable = stabilizer.add_hypothesis("and why", None);
        assert_eq!(stable, "What is a lock. and why");
    }

    #[test]
    fn test_whitespace_input_contributes_nothing() {
        let mut stabilizer = Stabilizer::new();
        assert_eq!(stabilizer.add_hypothesis("   ", None), "");
        assert_eq!(stabilizer.commit_final("  "), "");
        assert_eq!(stabilizer.stable_text(), "");
    }

    #[test]
    fn test_reset_clears_all() {
        let mut stabilizer = Stabilizer::new();
        stabilizer.add_hypothesis("hello world", None);
        stabilizer.commit_final("hello world");
        stabilizer.reset();
        assert_eq!(stabilizer.stable_text(), "");
    }

    #[test]
    fn test_unstable_tail() {
        let mut stabilizer = Stabilizer::new();
        let words = [word("hello", 0.9), word("wold", 0.3)];
        stabilizer.add_hypothesis("hello wold", Some(&words));
        assert_eq!(stabilizer.stable_text(), "hello");
        assert_eq!(stabilizer.unstable_tail(), "wold");

        stabilizer.commit_final("hello world");
        assert_eq!(stabilizer.unstable_tail(), "");
    }

    #[test]
    fn test_window_slides() {
        let mut stabilizer = Stabilizer::new();
        // Three agreeing hypotheses fill the default window.
        for _ in 0..3 {
            stabilizer.add_hypothesis("one two", None);
        }
        assert_eq!(stabilizer.stable_text(), "one two");
        // A fourth evicts the oldest; stability is preserved.
        let stable = stabilizer.add_hypothesis("one two three", None);
        assert_eq!(stable, "one two");
    }
}
