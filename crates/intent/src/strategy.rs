//! The common capability set of the intent detection strategies.
//!
//! The pipeline holds one `IntentStrategy` and delegates; strategies emit
//! `IntentEvent`s (and corrections) through the shared event bus. Methods
//! may suspend — callers that must not block spawn them onto the runtime.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use hearsay_events::{
    Clock, ClockRef, DetectedIntent, EventBus, EventBusRef, IntentEvent, SessionEvent,
    SessionPayload, UtteranceEvent, UtteranceKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::heuristic::HeuristicDetector;

/// Which detection strategy the pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    Heuristic,
    Llm,
    Parallel,
}

impl FromStr for StrategyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "heuristic" => Ok(Self::Heuristic),
            "llm" => Ok(Self::Llm),
            "parallel" => Ok(Self::Parallel),
            other => Err(format!("unknown mode '{other}' (heuristic|llm|parallel)")),
        }
    }
}

/// Interchangeable intent detection.
#[async_trait]
pub trait IntentStrategy: Send + Sync {
    /// Feed one utterance event. Updates may produce candidate intents,
    /// Finals drive the real classification.
    async fn process_utterance(&self, utterance: UtteranceEvent);

    /// External pause hint from the ASR provider's endpointing.
    async fn signal_pause(&self) {}

    /// Timer poll for strategies with time-based triggers. ≈100 ms cadence.
    async fn tick(&self) {}

    /// Flush and stop; called once on session shutdown.
    async fn shutdown(&self) {}
}

pub type IntentStrategyRef = Arc<dyn IntentStrategy>;

/// Publish one intent classification onto the bus.
pub(crate) fn publish_intent(
    bus: &EventBusRef,
    intent: DetectedIntent,
    utterance_id: Uuid,
    is_candidate: bool,
    offset_ms: i64,
) {
    bus.publish(SessionEvent::now(SessionPayload::Intent(IntentEvent {
        intent,
        utterance_id,
        is_candidate,
        transcript_char_start: None,
        transcript_char_end: None,
        offset_ms,
    })));
}

/// Pattern matching only; synchronous underneath, no remote calls.
pub struct HeuristicStrategy {
    detector: HeuristicDetector,
    bus: EventBusRef,
    clock: ClockRef,
}

impl HeuristicStrategy {
    pub fn new(bus: EventBusRef, clock: ClockRef) -> Self {
        Self {
            detector: HeuristicDetector::new(),
            bus,
            clock,
        }
    }
}

#[async_trait]
impl IntentStrategy for HeuristicStrategy {
    async fn process_utterance(&self, utterance: UtteranceEvent) {
        match utterance.kind {
            UtteranceKind::Open => {}
            UtteranceKind::Update => {
                let text = combined_text(&utterance);
                if let Some(intent) = self.detector.detect_candidate(&text) {
                    publish_intent(&self.bus, intent, utterance.id, true, self.clock.now_ms());
                }
            }
            UtteranceKind::Final => {
                if let Some(intent) = self.detector.detect_final(&utterance.stable_text) {
                    publish_intent(&self.bus, intent, utterance.id, false, self.clock.now_ms());
                }
            }
        }
    }
}

/// Stable plus volatile text, for candidate hints on in-progress utterances.
fn combined_text(utterance: &UtteranceEvent) -> String {
    if utterance.unstable_text.is_empty() {
        utterance.stable_text.clone()
    } else if utterance.stable_text.is_empty() {
        utterance.unstable_text.clone()
    } else {
        format!("{} {}", utterance.stable_text, utterance.unstable_text)
    }
}
