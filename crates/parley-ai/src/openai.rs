use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use parley_core::errors::GenerationError;
use parley_core::session::{ChatRole, ChatTurn};

use crate::responder::Responder;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const SYSTEM_PROMPT: &str = "You are a warm, supportive conversation companion. \
Listen actively, validate what the user shares, ask open-ended questions that \
encourage reflection, and offer practical, evidence-based coping suggestions \
when asked. Keep a conversational, friendly tone. You are not a replacement \
for professional help; if someone mentions self-harm, encourage them to reach \
out to crisis services.";

const GREETING_PROMPT: &str = "Open a new conversation with a short, friendly \
greeting that invites the person to share what is on their mind today.";

/// Responder backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiResponder {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl OpenAiResponder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            api_key: SecretString::from(api_key.into()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    async fn complete(&self, messages: Vec<WireMessage>) -> Result<String, GenerationError> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: 0.7,
            max_tokens: 1000,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Upstream(format!("status {status}: {body}")));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| GenerationError::InvalidResponse("empty completion".into()))
    }
}

impl std::fmt::Debug for OpenAiResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiResponder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Responder for OpenAiResponder {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip_all, fields(turns = turns.len()))]
    async fn generate_reply(&self, turns: &[ChatTurn]) -> Result<String, GenerationError> {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: SYSTEM_PROMPT.to_string(),
        });
        for turn in turns {
            messages.push(WireMessage {
                role: match turn.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                content: turn.content.clone(),
            });
        }
        self.complete(messages).await
    }

    #[instrument(skip_all)]
    async fn generate_greeting(&self) -> Result<String, GenerationError> {
        let messages = vec![
            WireMessage {
                role: "system",
                content: SYSTEM_PROMPT.to_string(),
            },
            WireMessage {
                role: "user",
                content: GREETING_PROMPT.to_string(),
            },
        ];
        self.complete(messages).await
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: String,
}
