//! Pattern-matching intent classification.
//!
//! Rules are applied in order; the first match wins. Imperative command
//! rules run before the question rule, so "stop" inside a question still
//! routes as a Stop command. Matching is case-insensitive over the trimmed,
//! lowercased text.

use hearsay_events::{DetectedIntent, IntentSubtype, IntentType};

const STOP_WORDS: &[&str] = &["stop", "cancel", "quit", "enough", "abort", "halt"];
const REPEAT_PHRASES: &[&str] = &["say it again", "say that again", "once more"];
const CONTINUE_PHRASES: &[&str] = &["go on", "keep going", "next question", "move on"];
const START_OVER_PHRASES: &[&str] = &["start over", "begin again", "from the top"];
const GENERATE_VERBS: &[&str] = &["generate", "create", "make"];
const GENERATE_OBJECTS: &[&str] = &["question", "summary", "list", "example"];

const WH_WORDS: &[&str] = &["what", "why", "when", "where", "who", "how", "which"];
const AUX_WORDS: &[&str] = &[
    "can", "could", "would", "should", "is", "are", "do", "does", "did", "will",
];

/// Stateless rule-based detector.
#[derive(Debug, Default, Clone)]
pub struct HeuristicDetector;

impl HeuristicDetector {
    pub fn new() -> Self {
        Self
    }

    /// Classification for an in-progress utterance, used for UI hints only.
    ///
    /// Returns `None` when nothing better than the statement fallback
    /// matches; a hint that says "this is a statement" is no hint.
    pub fn detect_candidate(&self, text: &str) -> Option<DetectedIntent> {
        let intent = self.classify(text)?;
        if intent.intent_type == IntentType::Statement {
            None
        } else {
            Some(intent)
        }
    }

    /// Classification for a finalized utterance; this is the decision that
    /// may trigger an action.
    pub fn detect_final(&self, text: &str) -> Option<DetectedIntent> {
        self.classify(text)
    }

    fn classify(&self, text: &str) -> Option<DetectedIntent> {
        let original = text.trim();
        if original.is_empty() {
            return None;
        }
        let lower = original.to_lowercase();
        let words: Vec<&str> = tokenize(&lower);

        let make = |intent_type, subtype, confidence| {
            Some(DetectedIntent {
                intent_type,
                subtype,
                confidence,
                source_text: original.to_string(),
                original_text: original.to_string(),
                utterance_id: None,
            })
        };

        if contains_any_word(&words, STOP_WORDS) {
            return make(IntentType::Imperative, IntentSubtype::Stop, 0.9);
        }
        if words.contains(&"repeat") || contains_any_phrase(&lower, REPEAT_PHRASES) {
            return make(IntentType::Imperative, IntentSubtype::Repeat, 0.85);
        }
        if words.contains(&"continue") || contains_any_phrase(&lower, CONTINUE_PHRASES) {
            return make(IntentType::Imperative, IntentSubtype::Continue, 0.85);
        }
        if words.contains(&"restart") || contains_any_phrase(&lower, START_OVER_PHRASES) {
            return make(IntentType::Imperative, IntentSubtype::StartOver, 0.85);
        }
        if contains_any_word(&words, GENERATE_VERBS) && contains_any_word(&words, GENERATE_OBJECTS) {
            return make(IntentType::Imperative, IntentSubtype::Generate, 0.8);
        }

        if is_question(&lower, &words) {
            return make(IntentType::Question, question_subtype(&lower), 0.8);
        }

        make(IntentType::Statement, IntentSubtype::None, 0.5)
    }
}

fn tokenize(lower: &str) -> Vec<&str> {
    lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect()
}

fn contains_any_word(words: &[&str], needles: &[&str]) -> bool {
    words.iter().any(|w| needles.contains(w))
}

fn contains_any_phrase(lower: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| lower.contains(p))
}

fn is_question(lower: &str, words: &[&str]) -> bool {
    if ends_with_unquoted_question_mark(lower) {
        return true;
    }
    match words.first() {
        Some(first) => WH_WORDS.contains(first) || AUX_WORDS.contains(first),
        None => false,
    }
}

/// True when the text ends in `?` outside any double-quoted span.
fn ends_with_unquoted_question_mark(text: &str) -> bool {
    let mut in_quotes = false;
    let mut last_unquoted = None;
    for c in text.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
            continue;
        }
        if !in_quotes && !c.is_whitespace() {
            last_unquoted = Some(c);
        }
    }
    last_unquoted == Some('?')
}

fn question_subtype(lower: &str) -> IntentSubtype {
    const DEFINITION: &[&str] = &["what is", "define", "meaning of"];
    const HOW_TO: &[&str] = &["how to", "how do", "steps to", "process"];
    const COMPARE: &[&str] = &["compare", " vs ", " vs.", "versus", "difference between"];
    const TROUBLESHOOT: &[&str] = &["error", "bug", "fix", "problem", "not working"];

    if contains_any_phrase(lower, DEFINITION) {
        IntentSubtype::Definition
    } else if contains_any_phrase(lower, HOW_TO) {
        IntentSubtype::HowTo
    } else if contains_any_phrase(lower, COMPARE) {
        IntentSubtype::Compare
    } else if contains_any_phrase(lower, TROUBLESHOOT) {
        IntentSubtype::Troubleshoot
    } else {
        IntentSubtype::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(text: &str) -> DetectedIntent {
        HeuristicDetector::new().detect_final(text).unwrap()
    }

    #[test]
    fn test_stop_imperative() {
        let intent = detect("Stop.");
        assert_eq!(intent.intent_type, IntentType::Imperative);
        assert_eq!(intent.subtype, IntentSubtype::Stop);
        assert!((intent.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stop_synonyms() {
        for text in ["cancel that", "quit", "that's enough", "abort", "halt"] {
            assert_eq!(detect(text).subtype, IntentSubtype::Stop, "{text}");
        }
    }

    #[test]
    fn test_repeat_imperative() {
        for text in ["Repeat that", "say it again", "say that again please", "once more"] {
            let intent = detect(text);
            assert_eq!(intent.subtype, IntentSubtype::Repeat, "{text}");
            assert!((intent.confidence - 0.85).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_continue_imperative() {
        for text in ["continue", "go on", "keep going", "next question", "move on"] {
            assert_eq!(detect(text).subtype, IntentSubtype::Continue, "{text}");
        }
    }

    #[test]
    fn test_start_over_imperative() {
        for text in ["start over", "restart", "begin again", "from the top"] {
            assert_eq!(detect(text).subtype, IntentSubtype::StartOver, "{text}");
        }
    }

    #[test]
    fn test_generate_needs_verb_and_object() {
        let intent = detect("generate a summary");
        assert_eq!(intent.subtype, IntentSubtype::Generate);
        assert!((intent.confidence - 0.8).abs() < f64::EPSILON);

        // Verb without an object is not a generate command.
        assert_eq!(detect("let's make progress").intent_type, IntentType::Statement);
    }

    #[test]
    fn test_question_by_mark() {
        let intent = detect("What is a lock statement?");
        assert_eq!(intent.intent_type, IntentType::Question);
        assert_eq!(intent.subtype, IntentSubtype::Definition);
        assert!((intent.confidence - 0.8).abs() < f64::EPSILON);
        assert_eq!(intent.source_text, "What is a lock statement?");
    }

    #[test]
    fn test_question_by_wh_word_without_mark() {
        let intent = detect("how do I configure this");
        assert_eq!(intent.intent_type, IntentType::Question);
        assert_eq!(intent.subtype, IntentSubtype::HowTo);
    }

    #[test]
    fn test_question_by_auxiliary() {
        assert_eq!(detect("could you elaborate").intent_type, IntentType::Question);
        assert_eq!(detect("is this thread safe").intent_type, IntentType::Question);
    }

    #[test]
    fn test_quoted_question_mark_is_not_a_question() {
        let intent = detect("He literally said \"what?\" and walked away");
        assert_eq!(intent.intent_type, IntentType::Statement);
    }

    #[test]
    fn test_quoted_question_mark_with_wh_start_still_matches() {
        let intent = detect("why did he say \"what?\" like that");
        assert_eq!(intent.intent_type, IntentType::Question);
    }

    #[test]
    fn test_compare_subtype() {
        assert_eq!(
            detect("what's the difference between Vec and slice?").subtype,
            IntentSubtype::Compare
        );
        assert_eq!(detect("compare mutexes and channels?").subtype, IntentSubtype::Compare);
    }

    #[test]
    fn test_troubleshoot_subtype() {
        assert_eq!(detect("why is this not working?").subtype, IntentSubtype::Troubleshoot);
    }

    #[test]
    fn test_statement_fallback() {
        let intent = detect("I deployed the service yesterday");
        assert_eq!(intent.intent_type, IntentType::Statement);
        assert_eq!(intent.subtype, IntentSubtype::None);
        assert!((intent.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_imperative_wins_over_question() {
        // Rules run in order: Stop outranks the question rule.
        assert_eq!(detect("can we stop here?").subtype, IntentSubtype::Stop);
    }

    #[test]
    fn test_empty_input_detects_nothing() {
        let detector = HeuristicDetector::new();
        assert!(detector.detect_final("").is_none());
        assert!(detector.detect_final("   ").is_none());
        assert!(detector.detect_candidate("").is_none());
    }

    #[test]
    fn test_candidate_suppresses_statements() {
        let detector = HeuristicDetector::new();
        assert!(detector.detect_candidate("I deployed the service").is_none());
        assert!(detector.detect_candidate("what is a mutex").is_some());
    }
}
