use crate::tokenizer::{ApproxTokenizer, TokenCounter};
use crate::types::{ChatMessage, ChatRequest, ChatResponse, Choice, FinishReason, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Experiment tracking failed: {message}")]
    Tracking { message: String },

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

pub type ModelResult<T> = Result<T, ModelError>;

/// LLM vendor a model is served by
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    #[serde(rename = "azure_openai")]
    AzureOpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::AzureOpenAi => "azure_openai",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "azure_openai" | "azure-openai" | "azure" => Ok(ProviderKind::AzureOpenAi),
            other => Err(ModelError::InvalidConfig {
                message: format!("unknown provider '{}'", other),
            }),
        }
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> ModelResult<ChatResponse>;

    async fn health_check(&self) -> ModelResult<()>;

    fn provider_name(&self) -> &'static str;
}

/// Keyword rule for [`SimulatedProvider`]
#[derive(Debug, Clone)]
struct CannedReply {
    keyword: String,
    reply: String,
}

/// Offline provider that answers from canned replies.
///
/// Rules are matched in insertion order against the lowercased last user message.
/// Without a matching rule the reply echoes the start of the prompt.
#[derive(Debug, Clone, Default)]
pub struct SimulatedProvider {
    rules: Vec<CannedReply>,
    latency: Option<Duration>,
    tokenizer: ApproxTokenizer,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies used by the demo walkthrough and the built-in evaluation cases
    pub fn demo() -> Self {
        Self::new()
            .with_reply("übersetze", "Good day, how are you?")
            .with_reply("translate", "Good day, how are you?")
            .with_reply(
                "fasse",
                "Text über KI und ML, der sich schnell entwickelt und vielfältig eingesetzt wird.",
            )
            .with_reply(
                "summarize",
                "A text about AI and ML, which evolves quickly and is used in many fields.",
            )
            .with_reply(
                "kannst du mir",
                "Hallo! Gerne helfe ich dir bei deiner Frage. Was möchtest du wissen?",
            )
    }

    pub fn with_reply(mut self, keyword: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push(CannedReply {
            keyword: keyword.into().to_lowercase(),
            reply: reply.into(),
        });
        self
    }

    /// Sleep this long before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn reply_for(&self, prompt: &str) -> String {
        let lowered = prompt.to_lowercase();
        if let Some(rule) = self.rules.iter().find(|r| lowered.contains(&r.keyword)) {
            return rule.reply.clone();
        }
        let head: String = prompt.chars().take(50).collect();
        format!("Simulated response for: {}...", head)
    }
}

#[async_trait]
impl ModelProvider for SimulatedProvider {
    async fn chat(&self, request: ChatRequest) -> ModelResult<ChatResponse> {
        let prompt = request
            .last_user_message()
            .ok_or_else(|| ModelError::InvalidConfig {
                message: "request contains no user message".to_string(),
            })?;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let reply = self.reply_for(prompt);
        let prompt_tokens: usize = request
            .messages
            .iter()
            .map(|m| self.tokenizer.count(&m.content))
            .sum();
        let completion_tokens = self.tokenizer.count(&reply);

        Ok(ChatResponse {
            model: request.model,
            choices: vec![Choice {
                message: ChatMessage::assistant(reply),
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: Some(Usage {
                prompt_tokens: prompt_tokens as u32,
                completion_tokens: completion_tokens as u32,
                total_tokens: (prompt_tokens + completion_tokens) as u32,
            }),
        })
    }

    async fn health_check(&self) -> ModelResult<()> {
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "simulated"
    }
}
