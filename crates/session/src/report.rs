//! Session analysis: summary reports and ground-truth evaluation.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use hearsay_events::{
    IntentSubtype, IntentType, SessionEvent, SessionPayload, UtteranceKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::PlayerError;

/// Aggregate view of one recorded session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionReport {
    pub total_events: usize,
    pub events_by_kind: BTreeMap<String, usize>,
    pub utterances_finalized: usize,
    pub candidate_intents: usize,
    pub final_intents: usize,
    pub intents_by_type: BTreeMap<String, usize>,
    pub corrections: usize,
    pub actions_fired: usize,
    pub actions_debounced: usize,
    pub duration_ms: i64,
}

impl SessionReport {
    pub fn from_events(events: &[SessionEvent]) -> Self {
        let mut report = Self {
            total_events: events.len(),
            ..Self::default()
        };

        for event in events {
            *report
                .events_by_kind
                .entry(event.kind().to_string())
                .or_insert(0) += 1;
            match &event.payload {
                SessionPayload::Utterance(utt) if utt.kind == UtteranceKind::Final => {
                    report.utterances_finalized += 1;
                }
                SessionPayload::Intent(intent_event) => {
                    if intent_event.is_candidate {
                        report.candidate_intents += 1;
                    } else {
                        report.final_intents += 1;
                        *report
                            .intents_by_type
                            .entry(type_key(intent_event.intent.intent_type).to_string())
                            .or_insert(0) += 1;
                    }
                }
                SessionPayload::IntentCorrection(_) => report.corrections += 1,
                SessionPayload::Action(action) => {
                    if action.was_debounced {
                        report.actions_debounced += 1;
                    } else {
                        report.actions_fired += 1;
                    }
                }
                _ => {}
            }
        }

        let first = events.first().map(|e| e.offset_ms).unwrap_or(0);
        let last = events.last().map(|e| e.offset_ms).unwrap_or(0);
        report.duration_ms = last - first;
        report
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "session summary")?;
        writeln!(f, "  duration:            {:.1}s", self.duration_ms as f64 / 1_000.0)?;
        writeln!(f, "  events:              {}", self.total_events)?;
        for (kind, count) in &self.events_by_kind {
            writeln!(f, "    {kind:<18} {count}")?;
        }
        writeln!(f, "  utterances:          {}", self.utterances_finalized)?;
        writeln!(
            f,
            "  intents:             {} final, {} candidate",
            self.final_intents, self.candidate_intents
        )?;
        for (kind, count) in &self.intents_by_type {
            writeln!(f, "    {kind:<18} {count}")?;
        }
        writeln!(f, "  corrections:         {}", self.corrections)?;
        write!(
            f,
            "  actions:             {} fired, {} debounced",
            self.actions_fired, self.actions_debounced
        )
    }
}

fn type_key(intent_type: IntentType) -> &'static str {
    match intent_type {
        IntentType::Question => "question",
        IntentType::Imperative => "imperative",
        IntentType::Statement => "statement",
        IntentType::Other => "other",
    }
}

/// One human-labeled reference utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthLabel {
    pub utterance_text: String,
    pub intent_type: IntentType,
    #[serde(default)]
    pub subtype: Option<IntentSubtype>,
}

/// Load a ground-truth label file: a JSON array of labels.
pub fn load_ground_truth(path: impl AsRef<Path>) -> Result<Vec<GroundTruthLabel>, PlayerError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    serde_json::from_str(&content).map_err(|source| PlayerError::Parse { line: 0, source })
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TypeMetrics {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl TypeMetrics {
    pub fn precision(&self) -> f64 {
        let denominator = self.true_positives + self.false_positives;
        if denominator == 0 {
            return 0.0;
        }
        self.true_positives as f64 / denominator as f64
    }

    pub fn recall(&self) -> f64 {
        let denominator = self.true_positives + self.false_negatives;
        if denominator == 0 {
            return 0.0;
        }
        self.true_positives as f64 / denominator as f64
    }
}

/// Recorded final intents compared against human labels.
#[derive(Debug, Default, Serialize)]
pub struct Evaluation {
    pub labels: usize,
    pub matched_utterances: usize,
    pub per_type: BTreeMap<String, TypeMetrics>,
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ground truth: {} labels, {} matched to utterances",
            self.labels, self.matched_utterances
        )?;
        for (kind, metrics) in &self.per_type {
            writeln!(
                f,
                "  {kind:<12} precision {:.2}  recall {:.2}  (tp {} / fp {} / fn {})",
                metrics.precision(),
                metrics.recall(),
                metrics.true_positives,
                metrics.false_positives,
                metrics.false_negatives,
            )?;
        }
        Ok(())
    }
}

/// Match labels to recorded utterances by normalized text, then compare
/// each label's intent type against the recorded final intent.
pub fn evaluate(events: &[SessionEvent], labels: &[GroundTruthLabel]) -> Evaluation {
    let mut utterance_texts: HashMap<String, Uuid> = HashMap::new();
    let mut final_intents: HashMap<Uuid, IntentType> = HashMap::new();

    for event in events {
        match &event.payload {
            SessionPayload::Utterance(utt) if utt.kind == UtteranceKind::Final => {
                utterance_texts.insert(normalize(&utt.stable_text), utt.id);
            }
            SessionPayload::Intent(intent_event) if !intent_event.is_candidate => {
                final_intents.insert(intent_event.utterance_id, intent_event.intent.intent_type);
            }
            _ => {}
        }
    }

    let mut evaluation = Evaluation {
        labels: labels.len(),
        ..Evaluation::default()
    };

    for label in labels {
        let matched = utterance_texts.get(&normalize(&label.utterance_text));
        let predicted = matched.and_then(|id| final_intents.get(id).copied());
        if matched.is_some() {
            evaluation.matched_utterances += 1;
        }

        let expected_key = type_key(label.intent_type).to_string();
        match predicted {
            Some(predicted_type) if predicted_type == label.intent_type => {
                evaluation
                    .per_type
                    .entry(expected_key)
                    .or_default()
                    .true_positives += 1;
            }
            Some(predicted_type) => {
                evaluation
                    .per_type
                    .entry(expected_key)
                    .or_default()
                    .false_negatives += 1;
                evaluation
                    .per_type
                    .entry(type_key(predicted_type).to_string())
                    .or_default()
                    .false_positives += 1;
            }
            None => {
                evaluation
                    .per_type
                    .entry(expected_key)
                    .or_default()
                    .false_negatives += 1;
            }
        }
    }

    evaluation
}

fn normalize(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
