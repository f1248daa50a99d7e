//! Core event model for the speech-to-intent pipeline.
//!
//! This is the single source of truth for event data. The session JSONL
//! log persists these shapes, and every component communicates through them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single recognized word with timing and confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrWord {
    pub text: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub confidence: f64,
    /// Speaker index, when the recognizer diarizes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<i32>,
}

/// One hypothesis from the speech recognizer.
///
/// Partials (`is_final == false`) may be revised by later hypotheses;
/// finals are committed text that never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrEvent {
    pub id: String,
    pub text: String,
    pub is_final: bool,
    /// Monotonic stream offset in milliseconds.
    pub offset_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<AsrWord>>,
}

impl AsrEvent {
    pub fn partial(id: impl Into<String>, text: impl Into<String>, offset_ms: i64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            is_final: false,
            offset_ms,
            words: None,
        }
    }

    pub fn final_(id: impl Into<String>, text: impl Into<String>, offset_ms: i64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            is_final: true,
            offset_ms,
            words: None,
        }
    }
}

/// Phase of an utterance's lifecycle.
///
/// For a given utterance id, exactly one `Open` precedes zero or more
/// `Update`s which precede exactly one `Final`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtteranceKind {
    Open,
    Update,
    Final,
}

/// A coherent unit of speech between silence boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtteranceEvent {
    pub id: Uuid,
    pub kind: UtteranceKind,
    /// Committed text; monotonically non-decreasing within one utterance.
    pub stable_text: String,
    /// Trailing text that may still be revised.
    pub unstable_text: String,
    /// Milliseconds from Open to this event.
    pub duration_ms: i64,
    /// Offsets of the ASR finals that contributed text, strictly increasing.
    pub asr_final_offsets: Vec<i64>,
    pub offset_ms: i64,
}

/// Top-level classification of an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Question,
    Imperative,
    Statement,
    Other,
}

/// Finer-grained classification. Question subtypes and imperative subtypes
/// share one namespace; `None` means no subtype applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSubtype {
    Definition,
    HowTo,
    Compare,
    Troubleshoot,
    Clarification,
    Rhetorical,
    General,
    Stop,
    Repeat,
    Continue,
    StartOver,
    Generate,
    None,
}

impl IntentSubtype {
    /// Whether this subtype names a user command that may trigger an action.
    pub fn is_command(self) -> bool {
        matches!(
            self,
            Self::Stop | Self::Repeat | Self::Continue | Self::StartOver | Self::Generate
        )
    }
}

/// A classified intent, produced by any detection strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedIntent {
    pub intent_type: IntentType,
    pub subtype: IntentSubtype,
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
    /// Reformulated, standalone text of the intent.
    pub source_text: String,
    /// The raw substring the classification was derived from.
    pub original_text: String,
    /// Classifier's attribution, when it provided one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utterance_id: Option<Uuid>,
}

impl DetectedIntent {
    /// Only imperatives with a concrete subtype are routable to actions.
    pub fn is_actionable(&self) -> bool {
        self.intent_type == IntentType::Imperative && self.subtype != IntentSubtype::None
    }
}

/// Classification of one utterance. Candidate events are advisory (UI only)
/// and never trigger actions; at most one final event exists per utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentEvent {
    pub intent: DetectedIntent,
    pub utterance_id: Uuid,
    pub is_candidate: bool,
    /// Character range within the session-wide running transcript.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_char_start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_char_end: Option<usize>,
    pub offset_ms: i64,
}

/// How a re-classification relates to the previously reported intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    /// Previously classified as a question, no longer is.
    Removed,
    /// Same utterance, different type or subtype.
    TypeChanged,
    /// A question whose utterance had no prior final intent.
    Added,
    /// Unchanged; emitted for telemetry only.
    Confirmed,
}

/// Revision of an earlier classification by a later classifier call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentCorrectionEvent {
    pub utterance_id: Uuid,
    pub correction: CorrectionKind,
    pub corrected_intent: DetectedIntent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_char_start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_char_end: Option<usize>,
    pub offset_ms: i64,
}

/// Terminal event of the pipeline; never mutated after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEvent {
    /// The imperative subtype that was (or would have been) dispatched.
    pub action: IntentSubtype,
    pub intent: DetectedIntent,
    pub utterance_id: Uuid,
    pub offset_ms: i64,
    /// True when a cooldown suppressed the handler invocation.
    pub was_debounced: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_type_serialization() {
        let json = serde_json::to_string(&IntentType::Question).unwrap();
        assert_eq!(json, "\"question\"");
        let back: IntentType = serde_json::from_str("\"imperative\"").unwrap();
        assert_eq!(back, IntentType::Imperative);
    }

    #[test]
    fn test_subtype_is_command() {
        assert!(IntentSubtype::Stop.is_command());
        assert!(IntentSubtype::Generate.is_command());
        assert!(!IntentSubtype::Definition.is_command());
        assert!(!IntentSubtype::None.is_command());
    }

    #[test]
    fn test_is_actionable() {
        let mut intent = DetectedIntent {
            intent_type: IntentType::Imperative,
            subtype: IntentSubtype::Stop,
            confidence: 0.9,
            source_text: "stop".into(),
            original_text: "stop".into(),
            utterance_id: None,
        };
        assert!(intent.is_actionable());

        intent.subtype = IntentSubtype::None;
        assert!(!intent.is_actionable());

        intent.subtype = IntentSubtype::Stop;
        intent.intent_type = IntentType::Question;
        assert!(!intent.is_actionable());
    }

    #[test]
    fn test_asr_event_omits_empty_words() {
        let event = AsrEvent::partial("a1", "hello", 120);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("words"));
        assert!(json.contains("\"is_final\":false"));
    }
}
