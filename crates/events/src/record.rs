//! Session log records: the envelope wrapped around every emitted event.
//!
//! One `SessionEvent` per JSONL line. The `kind` discriminator plus the
//! `data` payload travel with a monotonic stream offset and a wall-clock
//! timestamp, so a recording can be replayed with its original pacing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{
    ActionEvent, AsrEvent, IntentCorrectionEvent, IntentEvent, UtteranceEvent,
};

/// The event-specific payload of a session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum SessionPayload {
    Asr(AsrEvent),
    Utterance(UtteranceEvent),
    Intent(IntentEvent),
    IntentCorrection(IntentCorrectionEvent),
    Action(ActionEvent),
}

impl SessionPayload {
    /// The `kind` discriminator as written to the log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Asr(_) => "Asr",
            Self::Utterance(_) => "Utterance",
            Self::Intent(_) => "Intent",
            Self::IntentCorrection(_) => "IntentCorrection",
            Self::Action(_) => "Action",
        }
    }

    /// Monotonic stream offset of the wrapped event.
    pub fn offset_ms(&self) -> i64 {
        match self {
            Self::Asr(e) => e.offset_ms,
            Self::Utterance(e) => e.offset_ms,
            Self::Intent(e) => e.offset_ms,
            Self::IntentCorrection(e) => e.offset_ms,
            Self::Action(e) => e.offset_ms,
        }
    }
}

/// One fully-enveloped session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(flatten)]
    pub payload: SessionPayload,
    pub offset_ms: i64,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    /// Wrap a payload, stamping the current wall-clock time.
    pub fn now(payload: SessionPayload) -> Self {
        let offset_ms = payload.offset_ms();
        Self {
            payload,
            offset_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Parse one JSONL line.
    ///
    /// Records whose `kind` is unknown (written by a newer version) yield
    /// `Ok(None)` so readers skip them; lines that are not record-shaped at
    /// all are an error.
    pub fn from_json_line(line: &str) -> Result<Option<Self>, serde_json::Error> {
        match serde_json::from_str::<Self>(line) {
            Ok(event) => Ok(Some(event)),
            Err(err) => {
                // Distinguish "future record kind" from corrupt input.
                let value: serde_json::Value = serde_json::from_str(line)?;
                if value.get("kind").and_then(|k| k.as_str()).is_some()
                    && value.get("offset_ms").is_some()
                {
                    tracing::debug!(
                        kind = value["kind"].as_str().unwrap_or(""),
                        "skipping record of unknown kind"
                    );
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DetectedIntent, IntentSubtype, IntentType, UtteranceKind};
    use uuid::Uuid;

    fn utterance_payload() -> SessionPayload {
        SessionPayload::Utterance(UtteranceEvent {
            id: Uuid::new_v4(),
            kind: UtteranceKind::Final,
            stable_text: "what is a lock statement".into(),
            unstable_text: String::new(),
            duration_ms: 1800,
            asr_final_offsets: vec![500, 1400],
            offset_ms: 2300,
        })
    }

    #[test]
    fn test_envelope_shape() {
        let event = SessionEvent::now(utterance_payload());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "Utterance");
        assert_eq!(json["offset_ms"], 2300);
        assert!(json["timestamp"].is_string());
        assert_eq!(json["data"]["stable_text"], "what is a lock statement");
    }

    #[test]
    fn test_round_trip() {
        let event = SessionEvent::now(SessionPayload::Action(ActionEvent {
            action: IntentSubtype::Stop,
            intent: DetectedIntent {
                intent_type: IntentType::Imperative,
                subtype: IntentSubtype::Stop,
                confidence: 0.9,
                source_text: "stop".into(),
                original_text: "stop".into(),
                utterance_id: None,
            },
            utterance_id: Uuid::new_v4(),
            offset_ms: 4000,
            was_debounced: false,
        }));
        let line = serde_json::to_string(&event).unwrap();
        let back = SessionEvent::from_json_line(&line).unwrap().unwrap();
        assert_eq!(back.kind(), "Action");
        assert_eq!(back.offset_ms, 4000);
    }

    #[test]
    fn test_unknown_kind_is_skipped() {
        let line = r#"{"kind":"Diagnostics","offset_ms":9,"timestamp":"2026-01-01T00:00:00Z","data":{}}"#;
        assert!(SessionEvent::from_json_line(line).unwrap().is_none());
    }

    #[test]
    fn test_garbage_line_is_an_error() {
        assert!(SessionEvent::from_json_line("not json").is_err());
        // Record-shaped but missing the envelope fields.
        assert!(SessionEvent::from_json_line(r#"{"foo": 1}"#).is_err());
    }
}
