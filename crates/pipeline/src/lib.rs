//! Pipeline orchestration: wires the stabilized utterance builder, an
//! intent strategy, the action router, and the recorder into one session.

mod runner;
mod source;

pub use runner::{run_session, RunnerOptions};
pub use source::{AsrEventSource, ReplaySource};

use std::sync::Arc;

use hearsay_events::{
    AsrEvent, ClockRef, EventBus, EventBusRef, SessionEvent, SessionPayload, UtteranceEvent,
    UtteranceKind,
};
use hearsay_intent::{
    build_strategy, ClassifyError, IntentClassifier, IntentStrategyRef, LlmConfig, StrategyMode,
};
use hearsay_router::{ActionRouter, RouterConfig};
use hearsay_utterance::{UtteranceBuilder, UtteranceConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("strategy setup failed: {0}")]
    Strategy(#[from] ClassifyError),
    #[error("recorder failed: {0}")]
    Recorder(#[from] hearsay_session::RecorderError),
    #[error("recording unreadable: {0}")]
    Recording(#[from] hearsay_session::PlayerError),
}

/// Everything tunable about one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mode: StrategyMode,
    pub utterance: UtteranceConfig,
    pub router: RouterConfig,
    pub llm: LlmConfig,
    /// Parallel mode: how long the LLM may take before the heuristic
    /// result is promoted.
    pub llm_timeout_ms: i64,
    /// Capacity of the session event channel.
    pub channel_capacity: usize,
    /// Cadence of the timeout/conflict-window pollers.
    pub poll_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: StrategyMode::Heuristic,
            utterance: UtteranceConfig::default(),
            router: RouterConfig::default(),
            llm: LlmConfig::default(),
            llm_timeout_ms: 5_000,
            channel_capacity: 256,
            poll_interval_ms: 100,
        }
    }
}

/// One session's processing core.
///
/// The pipeline owns the builder, strategy, and router; every event it or
/// its components produce goes through the shared bus, in emission order.
pub struct Pipeline {
    builder: UtteranceBuilder,
    strategy: IntentStrategyRef,
    router: Arc<ActionRouter>,
    bus: EventBusRef,
    clock: ClockRef,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        bus: EventBusRef,
        clock: ClockRef,
        classifier: Option<Arc<dyn IntentClassifier>>,
    ) -> Result<Self, PipelineError> {
        let strategy = build_strategy(
            config.mode,
            bus.clone(),
            clock.clone(),
            config.llm.clone(),
            config.llm_timeout_ms,
            classifier,
        )?;
        let router = Arc::new(ActionRouter::new(
            config.router.clone(),
            clock.clone(),
            bus.clone(),
        ));
        Ok(Self {
            builder: UtteranceBuilder::new(config.utterance.clone(), clock.clone()),
            strategy,
            router,
            bus,
            clock,
        })
    }

    pub fn router(&self) -> &Arc<ActionRouter> {
        &self.router
    }

    pub fn clock(&self) -> &ClockRef {
        &self.clock
    }

    /// Feed one recognizer hypothesis through the builder and strategy.
    ///
    /// Builder work happens synchronously here; Final utterances are handed
    /// to the strategy as detached tasks so a slow classifier never stalls
    /// the ingest loop.
    pub async fn handle_asr_event(&self, event: AsrEvent) {
        self.bus
            .publish(SessionEvent::now(SessionPayload::Asr(event.clone())));
        for utterance in self.builder.process_asr_event(&event) {
            self.emit_utterance(utterance);
        }
    }

    /// Evaluate every time-based condition. Poll at ≈100 ms.
    pub async fn poll(&self) {
        if let Some(final_event) = self.builder.check_timeouts() {
            self.emit_utterance(final_event);
        }
        self.router.check_conflict_window();
        let strategy = self.strategy.clone();
        tokio::spawn(async move { strategy.tick().await });
    }

    /// Out-of-band endpoint hint from the ASR provider.
    pub async fn signal_utterance_end(&self) {
        if let Some(final_event) = self.builder.signal_utterance_end() {
            self.emit_utterance(final_event);
        }
        let strategy = self.strategy.clone();
        tokio::spawn(async move { strategy.signal_pause().await });
    }

    /// Force-close any open utterance and flush the strategy. Called once
    /// when the session ends.
    pub async fn shutdown(&self) {
        if let Some(final_event) = self.builder.force_close() {
            self.emit_utterance(final_event);
        }
        self.strategy.shutdown().await;
        // No correction can arrive anymore; settle the conflict window.
        self.router.flush();
    }

    /// Route one bus event into the action router. The session consumer
    /// calls this for every event it receives, keeping action dispatch on
    /// the single ordered stream.
    pub fn route_event(&self, event: &SessionEvent) {
        if let SessionPayload::Intent(intent_event) = &event.payload {
            if !intent_event.is_candidate {
                self.router
                    .route(&intent_event.intent, intent_event.utterance_id);
            }
        }
    }

    fn emit_utterance(&self, utterance: UtteranceEvent) {
        self.bus.publish(SessionEvent::now(SessionPayload::Utterance(
            utterance.clone(),
        )));
        match utterance.kind {
            UtteranceKind::Open => {}
            UtteranceKind::Update => {
                let strategy = self.strategy.clone();
                tokio::spawn(async move { strategy.process_utterance(utterance).await });
            }
            UtteranceKind::Final => {
                let strategy = self.strategy.clone();
                tokio::spawn(async move { strategy.process_utterance(utterance).await });
            }
        }
    }
}
