//! The LLM classifier seam.
//!
//! The pipeline is agnostic to any provider wire protocol; it only needs
//! `classify(text, context) -> Vec<DetectedIntent>`. Adapters map their
//! transport into [`ClassifyError`]'s two recovery categories.

use async_trait::async_trait;
use hearsay_events::{DetectedIntent, IntentSubtype, IntentType};
use serde::Deserialize;
use uuid::Uuid;

/// Classifier failure, split by recovery policy.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// Network trouble, 5xx, 429, or timeout. Retry on the next trigger.
    #[error("transient classifier failure: {0}")]
    Transient(String),
    /// Non-JSON or schema-mismatched response. Drop the batch.
    #[error("malformed classifier response: {0}")]
    Malformed(String),
}

/// Remote intent classification.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classify a batch of utterance text, with optional preceding context.
    ///
    /// Returns the detected intents in the order the classifier found them.
    async fn classify(
        &self,
        text: &str,
        context: Option<&str>,
    ) -> Result<Vec<DetectedIntent>, ClassifyError>;
}

/// One intent as classifiers report it on the wire.
///
/// Tolerant by design: unknown type strings map to `Other`, unknown
/// subtypes to `None`, malformed utterance ids to no attribution.
#[derive(Debug, Clone, Deserialize)]
pub struct WireIntent {
    #[serde(rename = "type")]
    pub intent_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    pub confidence: f64,
    pub source_text: String,
    #[serde(default)]
    pub original_text: Option<String>,
    #[serde(default)]
    pub utterance_id: Option<String>,
}

impl WireIntent {
    pub fn into_detected(self) -> DetectedIntent {
        let intent_type = match self.intent_type.to_lowercase().as_str() {
            "question" => IntentType::Question,
            "imperative" | "command" => IntentType::Imperative,
            "statement" => IntentType::Statement,
            _ => IntentType::Other,
        };

        let subtype = match self
            .subtype
            .as_deref()
            .unwrap_or("")
            .to_lowercase()
            .replace(['-', '_', ' '], "")
            .as_str()
        {
            "definition" => IntentSubtype::Definition,
            "howto" => IntentSubtype::HowTo,
            "compare" => IntentSubtype::Compare,
            "troubleshoot" => IntentSubtype::Troubleshoot,
            "clarification" => IntentSubtype::Clarification,
            "rhetorical" => IntentSubtype::Rhetorical,
            "general" => IntentSubtype::General,
            "stop" => IntentSubtype::Stop,
            "repeat" => IntentSubtype::Repeat,
            "continue" => IntentSubtype::Continue,
            "startover" => IntentSubtype::StartOver,
            "generate" => IntentSubtype::Generate,
            _ => IntentSubtype::None,
        };

        let original_text = self
            .original_text
            .unwrap_or_else(|| self.source_text.clone());
        let utterance_id = self
            .utterance_id
            .as_deref()
            .and_then(|s| Uuid::parse_str(s).ok());

        DetectedIntent {
            intent_type,
            subtype,
            confidence: self.confidence.clamp(0.0, 1.0),
            source_text: self.source_text,
            original_text,
            utterance_id,
        }
    }
}
