//! Intent detection for finalized utterances.
//!
//! Three interchangeable strategies behind one trait: pattern-matching
//! heuristics, an LLM classifier with batching and corrections, and a
//! parallel mode that merges both.

mod classifier;
mod heuristic;
mod llm;
mod openai;
mod parallel;
mod preprocess;
mod strategy;

pub use classifier::{ClassifyError, IntentClassifier, WireIntent};
pub use heuristic::HeuristicDetector;
pub use llm::{LlmConfig, LlmStrategy, DEFAULT_STOP_WORDS};
pub use openai::{ClassifierConfig, OpenAiClassifier};
pub use parallel::{ParallelConfig, ParallelStrategy};
pub use preprocess::preprocess;
pub use strategy::{HeuristicStrategy, IntentStrategy, IntentStrategyRef, StrategyMode};

use std::sync::Arc;

use hearsay_events::{ClockRef, EventBusRef};

/// Build the strategy for a mode.
///
/// `Llm` requires a classifier; `Parallel` degrades to heuristic-only with
/// a single warning when none is configured.
pub fn build_strategy(
    mode: StrategyMode,
    bus: EventBusRef,
    clock: ClockRef,
    llm_config: LlmConfig,
    llm_timeout_ms: i64,
    classifier: Option<Arc<dyn IntentClassifier>>,
) -> Result<IntentStrategyRef, ClassifyError> {
    match (mode, classifier) {
        (StrategyMode::Heuristic, _) => Ok(Arc::new(HeuristicStrategy::new(bus, clock))),
        (StrategyMode::Llm, Some(classifier)) => {
            Ok(Arc::new(LlmStrategy::new(llm_config, classifier, bus, clock)))
        }
        (StrategyMode::Llm, None) => Err(ClassifyError::Transient(
            "llm mode requires a configured classifier".to_string(),
        )),
        (StrategyMode::Parallel, Some(classifier)) => {
            let config = ParallelConfig {
                llm_timeout_ms,
                llm: llm_config,
            };
            Ok(Arc::new(ParallelStrategy::new(config, classifier, bus, clock)))
        }
        (StrategyMode::Parallel, None) => {
            tracing::warn!("no classifier configured, parallel mode degrades to heuristic");
            Ok(Arc::new(HeuristicStrategy::new(bus, clock)))
        }
    }
}
