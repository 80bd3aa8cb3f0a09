//! Google Gemini `generateContent`.

use std::time::Duration;

use async_trait::async_trait;
use quarry_shared::{ContextDocument, ProviderResult, Result};
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::http::{build_client, required_str, send_json, trim_base};
use crate::prompt::{RESEARCH_SYSTEM_PROMPT, build_user_message};
use crate::{ResearchProvider, parse_research_response};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const TEMPERATURE: f64 = 0.7;

/// Research provider backed by the Gemini API. The key travels as a query
/// parameter, so it is never logged.
pub struct GeminiProvider {
    name: String,
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl GeminiProvider {
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
impl ResearchProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn research(&self, query: &str, context: &[ContextDocument]) -> Result<ProviderResult> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(provider = %self.name, model = %self.model, "sending generateContent request");

        let request = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({
                "system_instruction": {"parts": [{"text": RESEARCH_SYSTEM_PROMPT}]},
                "contents": [{"parts": [{"text": build_user_message(query, context)}]}],
                "generationConfig": {
                    "temperature": TEMPERATURE,
                    "responseMimeType": "application/json",
                },
            }));

        let reply = send_json(&self.name, request).await?;
        let raw = required_str(&self.name, &reply, "/candidates/0/content/parts/0/text")?;
        Ok(parse_research_response(raw))
    }
}
