//! Chat-completion provider abstraction.
//!
//! The rest of the crate depends on an LLM only as "messages in, text out",
//! expressed by the [`ChatModel`] trait. The OpenAI implementation follows
//! the same retry discipline as the embedding provider: exponential backoff
//! on 429/5xx/network errors, immediate failure on other client errors.
//!
//! [`ScriptedModel`] is the test double: it replays canned responses in
//! order and records every prompt it receives, so tests can assert on the
//! exact rewritten question or grounded prompt without any network.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::LlmConfig;

/// One message in a chat-completion request.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// `system`, `user`, or `assistant`.
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }
}

/// A text-completion service: messages in, assistant text out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

#[async_trait]
impl<T: ChatModel + ?Sized> ChatModel for std::sync::Arc<T> {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        (**self).complete(messages).await
    }
}

/// Instantiate the configured chat model.
pub fn create_model(config: &LlmConfig) -> Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIChatModel::new(config)?)),
        "disabled" => bail!("LLM provider is disabled. Set [llm] provider in config."),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ OpenAI ============

/// Chat model backed by the OpenAI chat-completions API.
pub struct OpenAIChatModel {
    config: LlmConfig,
    api_key: String,
}

impl OpenAIChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            config: config.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": messages
                .iter()
                .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
                .collect::<Vec<_>>(),
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_chat_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "OpenAI API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("LLM call failed after retries")))
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

// ============ Scripted test double ============

/// Replays canned responses in order and records every received prompt.
///
/// When the script runs out, the last response is repeated, so a single
/// canned answer serves an arbitrary number of calls.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<Vec<String>>,
    cursor: Mutex<usize>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| s.to_string()).collect()),
            cursor: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// All prompts received so far, in call order.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        let responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            bail!("ScriptedModel has no responses");
        }
        let mut cursor = self.cursor.lock().unwrap();
        let idx = (*cursor).min(responses.len() - 1);
        *cursor += 1;
        Ok(responses[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_model_replays_in_order_then_repeats() {
        let model = ScriptedModel::new(vec!["first", "second"]);
        let msgs = [ChatMessage::user("q")];
        assert_eq!(model.complete(&msgs).await.unwrap(), "first");
        assert_eq!(model.complete(&msgs).await.unwrap(), "second");
        assert_eq!(model.complete(&msgs).await.unwrap(), "second");
        assert_eq!(model.calls().len(), 3);
    }

    #[test]
    fn parse_chat_response_extracts_content() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "hi" } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "hi");

        let bad = serde_json::json!({ "choices": [] });
        assert!(parse_chat_response(&bad).is_err());
    }
}
