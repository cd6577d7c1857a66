//! LLM chat client
//!
//! Chat-completions style HTTP client. History comes from the dialogue
//! context; the system prompt and sampling parameters from config. A
//! missing API key makes the engine permanently unavailable instead of
//! failing at startup.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use walnut_config::{resolve_secret, LlmConfig};
use walnut_core::{DialogueContext, EngineError, TurnRole};

/// Narrow chat interface consumed by the state machine.
#[async_trait]
pub trait LlmEngine: Send + Sync {
    /// Generate a reply for `user_text` given the prior context. The
    /// context does not yet include this user turn.
    async fn chat(
        &self,
        context: &DialogueContext,
        user_text: &str,
    ) -> Result<String, EngineError>;

    fn is_available(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// OpenAI-compatible chat client.
pub struct HttpLlmClient {
    config: LlmConfig,
    client: reqwest::Client,
    api_key: Option<String>,
}

impl HttpLlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, EngineError> {
        let api_key = resolve_secret(&config.api_key);
        if api_key.is_none() {
            tracing::warn!("llm api key missing, chat will report unavailable");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        Ok(Self {
            config,
            client,
            api_key,
        })
    }

    fn build_messages<'a>(
        &'a self,
        context: &'a DialogueContext,
        user_text: &'a str,
    ) -> Vec<ChatMessage<'a>> {
        let mut messages = Vec::with_capacity(context.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: &self.config.system_prompt,
        });

        // Keep only the most recent turns within the configured budget.
        let skip = context.len().saturating_sub(self.config.max_history);
        for (role, text) in context.turns().skip(skip) {
            let role = match role {
                TurnRole::User => "user",
                TurnRole::Assistant => "assistant",
                TurnRole::System => "system",
            };
            messages.push(ChatMessage {
                role,
                content: text,
            });
        }

        messages.push(ChatMessage {
            role: "user",
            content: user_text,
        });
        messages
    }
}

#[async_trait]
impl LlmEngine for HttpLlmClient {
    async fn chat(
        &self,
        context: &DialogueContext,
        user_text: &str,
    ) -> Result<String, EngineError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| EngineError::Unavailable("llm api key missing".to_string()))?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: self.build_messages(context, user_text),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout(self.config.timeout_secs * 1000)
                } else {
                    EngineError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(EngineError::Rejected(format!(
                "llm returned {}",
                response.status()
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let reply = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        if reply.trim().is_empty() {
            return Err(EngineError::Rejected("llm returned an empty reply".to_string()));
        }

        tracing::debug!(chars = reply.len(), "llm reply generated");
        Ok(reply)
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_key() -> HttpLlmClient {
        let config = LlmConfig {
            api_key: "sk-test".to_string(),
            max_history: 4,
            ..LlmConfig::default()
        };
        HttpLlmClient::new(config).unwrap()
    }

    #[test]
    fn missing_key_reports_unavailable() {
        let client = HttpLlmClient::new(LlmConfig::default()).unwrap();
        assert!(!client.is_available());
    }

    #[test]
    fn history_is_bounded_by_max_history() {
        let client = client_with_key();

        let mut context = DialogueContext::new(20);
        for i in 0..10 {
            context.push(TurnRole::User, format!("question {i}"));
        }

        let messages = client.build_messages(&context, "latest");
        // system + 4 history turns + new user turn
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages.last().unwrap().content, "latest");
        assert_eq!(messages[1].content, "question 6");
    }

    #[test]
    fn roles_map_to_wire_names() {
        let client = client_with_key();
        let mut context = DialogueContext::new(10);
        context.push(TurnRole::User, "hi");
        context.push(TurnRole::Assistant, "hello");

        let messages = client.build_messages(&context, "next");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
    }
}
