//! OpenAI-compatible chat-completion adapter for [`IntentClassifier`].
//!
//! Posts one chat completion with `response_format: json_object` and
//! temperature 0, expecting `{"intents": [...]}` back. Works against any
//! endpoint that speaks the OpenAI chat API.

use async_trait::async_trait;
use hearsay_events::DetectedIntent;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::classifier::{ClassifyError, IntentClassifier, WireIntent};

const SYSTEM_PROMPT: &str = "You segment and classify spoken utterances from a live \
transcript. Return ONLY a JSON object {\"intents\": [...]}. Each intent has: \
type (question|imperative|statement|other), subtype (definition|how_to|compare|\
troubleshoot|clarification|rhetorical|general|stop|repeat|continue|start_over|\
generate|none), confidence (0..1), source_text (the question or command \
reformulated to stand alone), original_text (the exact transcript substring), \
utterance_id (the bracketed id of the line it came from, when clear). Lines of \
input are prefixed with their utterance id in square brackets. Report every \
question and spoken command; ignore filler.";

/// Connection settings for the classifier endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub endpoint: String,
    pub model: String,
    /// Injected by the binary; the core never reads the environment.
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub timeout_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: String::new(),
            timeout_ms: 10_000,
        }
    }
}

pub struct OpenAiClassifier {
    client: reqwest::Client,
    config: ClassifierConfig,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct IntentList {
    #[serde(default)]
    intents: Vec<WireIntent>,
}

impl OpenAiClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self, ClassifyError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClassifyError::Transient(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Parse the model's JSON payload into intents.
    fn parse_content(content: &str) -> Result<Vec<DetectedIntent>, ClassifyError> {
        let list: IntentList = serde_json::from_str(content)
            .map_err(|e| ClassifyError::Malformed(format!("intent list: {e}")))?;
        Ok(list.intents.into_iter().map(WireIntent::into_detected).collect())
    }
}

#[async_trait]
impl IntentClassifier for OpenAiClassifier {
    async fn classify(
        &self,
        text: &str,
        context: Option<&str>,
    ) -> Result<Vec<DetectedIntent>, ClassifyError> {
        let user_content = match context {
            Some(context) if !context.is_empty() => {
                format!("Earlier transcript (context only, already handled):\n{context}\n\nClassify these lines:\n{text}")
            }
            _ => format!("Classify these lines:\n{text}"),
        };

        let body = json!({
            "model": self.config.model,
            "temperature": 0.0,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_content},
            ],
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifyError::Transient("request timed out".to_string())
                } else {
                    ClassifyError::Transient(format!("http: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ClassifyError::Transient(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(ClassifyError::Malformed(format!("status {status}")));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::Malformed(format!("chat envelope: {e}")))?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ClassifyError::Malformed("no choices".to_string()))?;

        let intents = Self::parse_content(content)?;
        tracing::debug!(count = intents.len(), "classifier returned intents");
        Ok(intents)
    }
}
