//! LLM-backed intent detection with bounded cost and latency.
//!
//! Utterance finals are buffered and sent to the classifier in batches.
//! Triggers (question mark, pause hint, inactivity, buffer overflow) are
//! gated by a rate limit; results are confidence-filtered, attributed back
//! to utterances, deduplicated by semantic fingerprint, and emitted as
//! final `IntentEvent`s. Re-classification of an already-reported
//! utterance emits an `IntentCorrectionEvent` instead.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hearsay_events::{
    Clock, ClockRef, CorrectionKind, DetectedIntent, EventBus, EventBusRef,
    IntentCorrectionEvent, IntentType, SessionEvent, SessionPayload, UtteranceEvent,
    UtteranceKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::{ClassifyError, IntentClassifier};
use crate::preprocess::preprocess;
use crate::strategy::{publish_intent, IntentStrategy};

/// Stop words excluded from semantic fingerprints and Jaccard attribution.
pub const DEFAULT_STOP_WORDS: &[&str] = &[
    "the", "is", "a", "an", "of", "to", "in", "on", "and", "or", "it", "that", "this", "for",
    "with", "was", "are", "be", "i", "you", "we", "do", "does", "what", "how",
];

/// Tuning for the LLM strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub trigger_on_question_mark: bool,
    pub trigger_on_pause: bool,
    /// Call after this much inactivity since the last utterance.
    pub trigger_timeout_ms: i64,
    /// Force a call once the unsent buffer exceeds this many characters.
    pub buffer_max_chars: usize,
    /// Minimum spacing between classifier calls.
    pub rate_limit_ms: i64,
    /// Tail of already-processed text sent along as context.
    pub context_window_chars: usize,
    /// Intents below this confidence are discarded.
    pub min_confidence: f64,
    pub enable_deduplication: bool,
    pub dedup_window_ms: i64,
    pub enable_preprocessing: bool,
    /// Tunable: shrinking this set makes fingerprints stricter, so questions
    /// differing only in small words stop deduplicating each other.
    pub fingerprint_stop_words: Vec<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            trigger_on_question_mark: true,
            trigger_on_pause: true,
            trigger_timeout_ms: 3_000,
            buffer_max_chars: 800,
            rate_limit_ms: 2_000,
            context_window_chars: 1_500,
            min_confidence: 0.7,
            enable_deduplication: true,
            dedup_window_ms: 30_000,
            enable_preprocessing: true,
            fingerprint_stop_words: DEFAULT_STOP_WORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct Buffered {
    id: Uuid,
    text: String,
}

#[derive(Default)]
struct LlmState {
    /// Concatenated utterance text already sent, used as call context.
    processed_text: String,
    /// Utterances not yet sent, in arrival order.
    unprocessed: Vec<Buffered>,
    last_call_at_ms: Option<i64>,
    last_utterance_at_ms: Option<i64>,
    /// Recent fingerprints with the time they were seen.
    fingerprints: Vec<(String, i64)>,
    /// Final classifications already emitted, by utterance id.
    reported: HashMap<Uuid, DetectedIntent>,
    trigger_pending: bool,
    in_flight: bool,
}

pub struct LlmStrategy {
    config: LlmConfig,
    classifier: Arc<dyn IntentClassifier>,
    bus: EventBusRef,
    clock: ClockRef,
    state: Mutex<LlmState>,
}

impl LlmStrategy {
    pub fn new(
        config: LlmConfig,
        classifier: Arc<dyn IntentClassifier>,
        bus: EventBusRef,
        clock: ClockRef,
    ) -> Self {
        Self {
            config,
            classifier,
            bus,
            clock,
            state: Mutex::new(LlmState::default()),
        }
    }

    /// Run a classifier call if a trigger is pending and the rate limit allows.
    ///
    /// The state lock is never held across the call itself.
    async fn run_if_due(&self) {
        let now = self.clock.now_ms();
        let (batch, context) = {
            let mut state = self.state.lock().expect("llm state mutex poisoned");
            if !state.trigger_pending || state.in_flight || state.unprocessed.is_empty() {
                return;
            }
            if let Some(last) = state.last_call_at_ms {
                if now - last < self.config.rate_limit_ms {
                    // Leave the trigger pending; a later tick retries.
                    return;
                }
            }
            state.trigger_pending = false;
            state.in_flight = true;
            state.last_call_at_ms = Some(now);
            let context = tail_at_word_boundary(
                &state.processed_text,
                self.config.context_window_chars,
            );
            (state.unprocessed.clone(), context)
        };

        let text: String = batch
            .iter()
            .map(|b| format!("[{}] {}", b.id, b.text))
            .collect::<Vec<_>>()
            .join("\n");
        let context_arg = if context.is_empty() {
            None
        } else {
            Some(context.as_str())
        };

        tracing::debug!(
            utterances = batch.len(),
            chars = text.len(),
            "classifier call"
        );
        let result = self.classifier.classify(&text, context_arg).await;

        let mut state = self.state.lock().expect("llm state mutex poisoned");
        state.in_flight = false;
        match result {
            Ok(intents) => {
                self.apply_results(&mut state, intents, &batch);
                Self::rotate_batch(&mut state, &batch, self.config.context_window_chars);
            }
            Err(ClassifyError::Transient(reason)) => {
                // Keep the batch buffered; the next trigger retries it.
                tracing::warn!(%reason, "transient classifier failure, will retry");
            }
            Err(ClassifyError::Malformed(reason)) => {
                // Unusable response: drop the batch, emit no corrections.
                tracing::warn!(%reason, "malformed classifier response, dropping batch");
                Self::rotate_batch(&mut state, &batch, self.config.context_window_chars);
            }
        }
    }

    fn apply_results(&self, state: &mut LlmState, intents: Vec<DetectedIntent>, batch: &[Buffered]) {
        let now = self.clock.now_ms();
        let batch_ids: HashSet<Uuid> = batch.iter().map(|b| b.id).collect();
        let stop_words = &self.config.fingerprint_stop_words;

        // Attribute each intent to an utterance id, then keep the highest
        // confidence per id so at most one final is emitted per utterance.
        let mut resolved: HashMap<Uuid, DetectedIntent> = HashMap::new();
        for mut intent in intents {
            if intent.confidence < self.config.min_confidence {
                tracing::debug!(
                    confidence = intent.confidence,
                    text = %intent.source_text,
                    "discarding low-confidence intent"
                );
                continue;
            }

            let id = match intent.utterance_id {
                Some(id) if batch_ids.contains(&id) || state.reported.contains_key(&id) => id,
                _ => match best_jaccard_match(batch, &intent.source_text, stop_words) {
                    Some(id) => id,
                    None => continue,
                },
            };
            intent.utterance_id = Some(id);

            match resolved.get(&id) {
                Some(existing) if existing.confidence >= intent.confidence => {}
                _ => {
                    resolved.insert(id, intent);
                }
            }
        }

        // Emit in batch order first, then any corrections to older ids.
        let mut ordered: Vec<(Uuid, DetectedIntent)> = Vec::with_capacity(resolved.len());
        for b in batch {
            if let Some(intent) = resolved.remove(&b.id) {
                ordered.push((b.id, intent));
            }
        }
        ordered.extend(resolved.into_iter());

        for (id, intent) in ordered {
            if let Some(previous) = state.reported.get(&id).cloned() {
                self.emit_correction(state, &previous, intent, id, now);
                continue;
            }

            if self.config.enable_deduplication {
                let fp = fingerprint(&intent.source_text, stop_words);
                state
                    .fingerprints
                    .retain(|(_, seen)| now - *seen <= self.config.dedup_window_ms);
                if state.fingerprints.iter().any(|(existing, _)| *existing == fp) {
                    tracing::debug!(text = %intent.source_text, "deduplicated intent");
                    continue;
                }
                state.fingerprints.push((fp, now));
            }

            if batch_ids.contains(&id) {
                publish_intent(&self.bus, intent.clone(), id, false, now);
            } else {
                // An utterance from an earlier batch the classifier only
                // now recognized as a question.
                self.bus.publish(SessionEvent::now(SessionPayload::IntentCorrection(
                    IntentCorrectionEvent {
                        utterance_id: id,
                        correction: CorrectionKind::Added,
                        corrected_intent: intent.clone(),
                        transcript_char_start: None,
                        transcript_char_end: None,
                        offset_ms: now,
                    },
                )));
            }
            state.reported.insert(id, intent);
        }
    }

    fn emit_correction(
        &self,
        state: &mut LlmState,
        previous: &DetectedIntent,
        intent: DetectedIntent,
        id: Uuid,
        now: i64,
    ) {
        let correction = if previous.intent_type == intent.intent_type
            && previous.subtype == intent.subtype
        {
            CorrectionKind::Confirmed
        } else if previous.intent_type == IntentType::Question
            && intent.intent_type != IntentType::Question
        {
            CorrectionKind::Removed
        } else {
            CorrectionKind::TypeChanged
        };

        tracing::debug!(utterance_id = %id, ?correction, "intent correction");
        self.bus.publish(SessionEvent::now(SessionPayload::IntentCorrection(
            IntentCorrectionEvent {
                utterance_id: id,
                correction,
                corrected_intent: intent.clone(),
                transcript_char_start: None,
                transcript_char_end: None,
                offset_ms: now,
            },
        )));

        state.reported.insert(id, intent);
    }

    /// Move a sent batch from the unprocessed buffer into the context tail.
    fn rotate_batch(state: &mut LlmState, batch: &[Buffered], context_window_chars: usize) {
        let batch_ids: HashSet<Uuid> = batch.iter().map(|b| b.id).collect();
        for b in batch {
            if !state.processed_text.is_empty() {
                state.processed_text.push(' ');
            }
            state.processed_text.push_str(&b.text);
        }
        state.unprocessed.retain(|u| !batch_ids.contains(&u.id));
        state.processed_text =
            tail_at_word_boundary(&state.processed_text, context_window_chars);
    }
}

#[async_trait]
impl IntentStrategy for LlmStrategy {
    async fn process_utterance(&self, utterance: UtteranceEvent) {
        if utterance.kind != UtteranceKind::Final {
            return;
        }
        let text = if self.config.enable_preprocessing {
            preprocess(&utterance.stable_text)
        } else {
            utterance.stable_text.trim().to_string()
        };
        if text.is_empty() {
            return;
        }

        {
            let now = self.clock.now_ms();
            let mut state = self.state.lock().expect("llm state mutex poisoned");
            let ends_with_question = text.trim_end().ends_with('?');
            state.unprocessed.push(Buffered {
                id: utterance.id,
                text,
            });
            state.last_utterance_at_ms = Some(now);

            if self.config.trigger_on_question_mark && ends_with_question {
                state.trigger_pending = true;
            }
            let buffered_chars: usize = state.unprocessed.iter().map(|b| b.text.len()).sum();
            if buffered_chars > self.config.buffer_max_chars {
                tracing::debug!(buffered_chars, "buffer overflow, forcing detection");
                state.trigger_pending = true;
            }
        }

        self.run_if_due().await;
    }

    async fn signal_pause(&self) {
        if !self.config.trigger_on_pause {
            return;
        }
        {
            let mut state = self.state.lock().expect("llm state mutex poisoned");
            if state.unprocessed.is_empty() {
                return;
            }
            state.trigger_pending = true;
        }
        self.run_if_due().await;
    }

    async fn tick(&self) {
        {
            let now = self.clock.now_ms();
            let mut state = self.state.lock().expect("llm state mutex poisoned");
            if !state.unprocessed.is_empty() {
                if let Some(last) = state.last_utterance_at_ms {
                    if now - last >= self.config.trigger_timeout_ms {
                        state.trigger_pending = true;
                    }
                }
            }
        }
        self.run_if_due().await;
    }

    async fn shutdown(&self) {
        let state = self.state.lock().expect("llm state mutex poisoned");
        if !state.unprocessed.is_empty() {
            tracing::debug!(
                unsent = state.unprocessed.len(),
                "shutting down with unsent utterances"
            );
        }
    }
}

/// Tail of `text` at most `max_chars` characters long, cut at a word boundary.
fn tail_at_word_boundary(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max_chars).collect();
    match tail.find(char::is_whitespace) {
        Some(i) => tail[i..].trim_start().to_string(),
        None => tail,
    }
}

/// Significant words of a text: alphanumeric tokens, lowercased, minus stop
/// words. BTreeSet keeps them sorted for fingerprinting.
fn significant_words(text: &str, stop_words: &[String]) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| !stop_words.iter().any(|s| s == w))
        .collect()
}

/// Semantic fingerprint: the sorted significant-word set, joined.
fn fingerprint(text: &str, stop_words: &[String]) -> String {
    significant_words(text, stop_words)
        .into_iter()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The buffered utterance whose word set overlaps `source_text` the most.
fn best_jaccard_match(batch: &[Buffered], source_text: &str, stop_words: &[String]) -> Option<Uuid> {
    let source = significant_words(source_text, stop_words);
    let mut best: Option<(Uuid, f64)> = None;
    for b in batch {
        let words = significant_words(&b.text, stop_words);
        let score = jaccard(&source, &words);
        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((b.id, score)),
        }
    }
    best.map(|(id, _)| id)
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}
