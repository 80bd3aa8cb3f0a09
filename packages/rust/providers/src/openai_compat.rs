//! OpenAI-compatible chat completions (xAI Grok and friends).

use std::time::Duration;

use async_trait::async_trait;
use quarry_shared::{ContextDocument, ProviderResult, Result};
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::http::{build_client, required_str, send_json, trim_base};
use crate::prompt::{RESEARCH_SYSTEM_PROMPT, build_user_message};
use crate::{ResearchProvider, parse_research_response};

const DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";
const TEMPERATURE: f64 = 0.7;

/// Research provider speaking the `/chat/completions` protocol with bearer auth.
pub struct OpenAiCompatProvider {
    name: String,
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: &str,
        api_key: String,
        model: &str,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            client: build_client(timeout)?,
            api_key,
            base_url: trim_base(base_url.unwrap_or(DEFAULT_BASE_URL)).to_string(),
            model: model.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl ResearchProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn research(&self, query: &str, context: &[ContextDocument]) -> Result<ProviderResult> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(provider = %self.name, model = %self.model, %url, "sending chat completion request");

        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": RESEARCH_SYSTEM_PROMPT},
                    {"role": "user", "content": build_user_message(query, context)},
                ],
                "temperature": TEMPERATURE,
            }));

        let reply = send_json(&self.name, request).await?;
        let raw = required_str(&self.name, &reply, "/choices/0/message/content")?;
        Ok(parse_research_response(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_shared::QuarryError;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(
            "Grok",
            "xai-test".into(),
            "grok-test",
            Some(&server.uri()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn reads_first_choice() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer xai-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant",
                    "content": "{\"summary\":\"S\",\"claims\":[{\"text\":\"Z\"}]}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = provider_for(&server).research("q", &[]).await.unwrap();
        assert_eq!(result.claims[0].text, "Z");
    }

    #[tokio::test]
    async fn non_json_content_degrades() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "plain prose answer"}}]
            })))
            .mount(&server)
            .await;

        let result = provider_for(&server).research("q", &[]).await.unwrap();
        assert_eq!(result.summary, "plain prose answer");
        assert!(result.claims.is_empty());
    }

    #[tokio::test]
    async fn empty_choices_is_a_provider_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = provider_for(&server).research("q", &[]).await.unwrap_err();
        assert!(matches!(err, QuarryError::Provider { .. }));
    }
}
