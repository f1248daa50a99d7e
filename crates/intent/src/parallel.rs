//! Parallel detection: heuristic for latency, LLM for accuracy.
//!
//! Every utterance final gets an immediate heuristic candidate. The LLM's
//! answer becomes the final intent; if it has not arrived within
//! `llm_timeout_ms` the heuristic result is promoted instead. A late LLM
//! answer after promotion turns into a correction rather than a second
//! final, so at most one final intent exists per utterance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hearsay_events::{
    Clock, ClockRef, CorrectionKind, DetectedIntent, EventBus, EventBusRef,
    IntentCorrectionEvent, IntentType, SessionEvent, SessionPayload, UtteranceEvent,
    UtteranceKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::IntentClassifier;
use crate::heuristic::HeuristicDetector;
use crate::llm::{LlmConfig, LlmStrategy};
use crate::strategy::{publish_intent, IntentStrategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// How long to wait for the LLM before promoting the heuristic result.
    pub llm_timeout_ms: i64,
    pub llm: LlmConfig,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            llm_timeout_ms: 5_000,
            llm: LlmConfig::default(),
        }
    }
}

/// Heuristic result waiting for the LLM to answer (or time out).
struct PendingPromotion {
    intent: DetectedIntent,
    deadline_ms: i64,
}

#[derive(Default)]
struct MergeState {
    /// Utterances whose final decision is still open.
    pending: HashMap<Uuid, PendingPromotion>,
    /// Heuristic intents promoted to final after the LLM missed its window.
    promoted: HashMap<Uuid, DetectedIntent>,
}

/// Bus wrapper between the inner LLM strategy and the real bus.
///
/// Settles pending promotions when LLM finals arrive, and converts LLM
/// finals that lost the race against promotion into corrections.
struct MergeBus {
    inner: EventBusRef,
    state: Arc<Mutex<MergeState>>,
}

impl EventBus for MergeBus {
    fn publish(&self, event: SessionEvent) {
        if let SessionPayload::Intent(intent_event) = &event.payload {
            if !intent_event.is_candidate {
                let mut state = self.state.lock().expect("merge state mutex poisoned");
                if let Some(promoted) = state.promoted.remove(&intent_event.utterance_id) {
                    drop(state);
                    let correction =
                        correction_kind(&promoted, &intent_event.intent);
                    tracing::debug!(
                        utterance_id = %intent_event.utterance_id,
                        ?correction,
                        "late llm result after promotion"
                    );
                    self.inner.publish(SessionEvent::now(
                        SessionPayload::IntentCorrection(IntentCorrectionEvent {
                            utterance_id: intent_event.utterance_id,
                            correction,
                            corrected_intent: intent_event.intent.clone(),
                            transcript_char_start: None,
                            transcript_char_end: None,
                            offset_ms: intent_event.offset_ms,
                        }),
                    ));
                    return;
                }
                state.pending.remove(&intent_event.utterance_id);
            }
        }
        self.inner.publish(event);
    }
}

fn correction_kind(previous: &DetectedIntent, new: &DetectedIntent) -> CorrectionKind {
    if previous.intent_type == new.intent_type && previous.subtype == new.subtype {
        CorrectionKind::Confirmed
    } else if previous.intent_type == IntentType::Question
        && new.intent_type != IntentType::Question
    {
        CorrectionKind::Removed
    } else {
        CorrectionKind::TypeChanged
    }
}

pub struct ParallelStrategy {
    detector: HeuristicDetector,
    llm: LlmStrategy,
    bus: EventBusRef,
    clock: ClockRef,
    llm_timeout_ms: i64,
    state: Arc<Mutex<MergeState>>,
}

impl ParallelStrategy {
    pub fn new(
        config: ParallelConfig,
        classifier: Arc<dyn IntentClassifier>,
        bus: EventBusRef,
        clock: ClockRef,
    ) -> Self {
        let state = Arc::new(Mutex::new(MergeState::default()));
        let merge_bus: EventBusRef = Arc::new(MergeBus {
            inner: bus.clone(),
            state: state.clone(),
        });
        let llm = LlmStrategy::new(config.llm, classifier, merge_bus, clock.clone());
        Self {
            detector: HeuristicDetector::new(),
            llm,
            bus,
            clock,
            llm_timeout_ms: config.llm_timeout_ms,
            state,
        }
    }

    /// Promote heuristic results whose LLM window has closed.
    fn promote_expired(&self, now: i64) {
        let expired: Vec<(Uuid, DetectedIntent)> = {
            let mut state = self.state.lock().expect("merge state mutex poisoned");
            let ids: Vec<Uuid> = state
                .pending
                .iter()
                .filter(|(_, p)| now >= p.deadline_ms)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| {
                    state.pending.remove(&id).map(|p| {
                        state.promoted.insert(id, p.intent.clone());
                        (id, p.intent)
                    })
                })
                .collect()
        };

        for (id, intent) in expired {
            tracing::debug!(utterance_id = %id, "promoting heuristic result to final");
            publish_intent(&self.bus, intent, id, false, now);
        }
    }
}

#[async_trait]
impl IntentStrategy for ParallelStrategy {
    async fn process_utterance(&self, utterance: UtteranceEvent) {
        match utterance.kind {
            UtteranceKind::Open => {}
            UtteranceKind::Update => {
                let text = if utterance.unstable_text.is_empty() {
                    utterance.stable_text.clone()
                } else {
                    format!("{} {}", utterance.stable_text, utterance.unstable_text)
                };
                if let Some(intent) = self.detector.detect_candidate(text.trim()) {
                    publish_intent(&self.bus, intent, utterance.id, true, self.clock.now_ms());
                }
            }
            UtteranceKind::Final => {
                let now = self.clock.now_ms();
                if let Some(intent) = self.detector.detect_final(&utterance.stable_text) {
                    // Low-latency hint; the LLM (or the timeout) decides.
                    publish_intent(&self.bus, intent.clone(), utterance.id, true, now);
                    self.state
                        .lock()
                        .expect("merge state mutex poisoned")
                        .pending
                        .insert(
                            utterance.id,
                            PendingPromotion {
                                intent,
                                deadline_ms: now + self.llm_timeout_ms,
                            },
                        );
                }
                self.llm.process_utterance(utterance).await;
            }
        }
    }

    async fn signal_pause(&self) {
        self.llm.signal_pause().await;
    }

    async fn tick(&self) {
        self.promote_expired(self.clock.now_ms());
        self.llm.tick().await;
    }

    async fn shutdown(&self) {
        // Whatever the LLM still owes becomes the heuristic's decision.
        self.promote_expired(i64::MAX);
        self.llm.shutdown().await;
    }
}
