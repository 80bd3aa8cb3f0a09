//! Anthropic Messages API.
//!
//! Auth via `x-api-key` (not bearer) plus a pinned `anthropic-version`
//! header. With extended thinking enabled the reply carries `thinking`
//! blocks ahead of the `text` block, so the first `text` block is taken.

use std::time::Duration;

use async_trait::async_trait;
use quarry_shared::{ContextDocument, ProviderResult, QuarryError, Result};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use crate::http::{build_client, send_json, trim_base};
use crate::prompt::{RESEARCH_SYSTEM_PROMPT, build_user_message};
use crate::{ResearchProvider, parse_research_response};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Thinking budget used by research calls.
pub(crate) const DEFAULT_THINKING_BUDGET: u32 = 10_000;

/// Output budget for research calls; must exceed the thinking budget.
const RESEARCH_MAX_TOKENS: u32 = 16_000;

/// Low-level Messages API client, shared by the research provider and the
/// synthesis delegate.
#[derive(Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    label: String,
    thinking_budget: Option<u32>,
}

impl AnthropicClient {
    pub fn new(
        api_key: String,
        model: &str,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            base_url: trim_base(base_url.unwrap_or(DEFAULT_BASE_URL)).to_string(),
            model: model.to_string(),
            label: "Anthropic".to_string(),
            thinking_budget: None,
        })
    }

    /// Name used when attributing errors.
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Enable extended thinking with `budget` tokens.
    pub fn with_thinking(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one system + user exchange and return the first text block.
    pub async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let url = format!("{}/messages", self.base_url);
        let body = self.request_body(system, user, max_tokens);

        debug!(model = %self.model, %url, "sending Anthropic request");

        let request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let reply = send_json(&self.label, request).await?;
        first_text_block(&reply).ok_or_else(|| {
            QuarryError::provider(&self.label, "response contained no text content block")
        })
    }

    fn request_body(&self, system: &str, user: &str, max_tokens: u32) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": user}],
        });
        if let Some(budget) = self.thinking_budget {
            body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
        }
        body
    }
}

fn first_text_block(reply: &Value) -> Option<String> {
    reply
        .get("content")?
        .as_array()?
        .iter()
        .find(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .and_then(|block| block.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Research provider backed by the Anthropic Messages API.
pub struct AnthropicProvider {
    name: String,
    client: AnthropicClient,
    timeout: Duration,
}

impl AnthropicProvider {
    pub fn new(name: &str, client: AnthropicClient, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            client,
            timeout,
        }
    }
}

#[async_trait]
impl ResearchProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn research(&self, query: &str, context: &[ContextDocument]) -> Result<ProviderResult> {
        let user = build_user_message(query, context);
        let raw = self
            .client
            .complete(RESEARCH_SYSTEM_PROMPT, &user, RESEARCH_MAX_TOKENS)
            .await?;
        Ok(parse_research_response(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AnthropicClient {
        AnthropicClient::new(
            "test-key".into(),
            "claude-test",
            Some(&format!("{}/v1", server.uri())),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn research_skips_thinking_blocks() {
        let server = MockServer::start().await;
        let reply_text = r#"{"summary":"S","claims":[{"text":"X is true","confidence":0.9}]}"#;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({"thinking": {"type": "enabled"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "text", "text": reply_text}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new(
            "Claude",
            client_for(&server).with_label("Claude").with_thinking(1024),
            Duration::from_secs(5),
        );
        let result = provider.research("Is X true?", &[]).await.unwrap();
        assert_eq!(result.summary, "S");
        assert_eq!(result.claims.len(), 1);
        assert_eq!(result.raw_response, reply_text);
    }

    #[tokio::test]
    async fn http_error_is_attributed_and_truncated() {
        let server = MockServer::start().await;
        let long_body = "x".repeat(1000);

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string(long_body))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .with_label("Claude")
            .complete("system", "user", 100)
            .await
            .unwrap_err();

        match err {
            QuarryError::Provider { provider, message } => {
                assert_eq!(provider, "Claude");
                assert!(message.starts_with("HTTP 529"));
                assert!(message.len() < 300);
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_text_block_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": []})))
            .mount(&server)
            .await;

        let result = client_for(&server).complete("system", "user", 100).await;
        assert!(result.is_err());
    }
}
