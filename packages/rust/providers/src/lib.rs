//! Research providers: the capability the dispatcher fans a query out to.
//!
//! Every provider speaks its own HTTP dialect but returns the same
//! [`ProviderResult`] shape. Adding a provider means implementing
//! [`ResearchProvider`]; nothing in the core changes.

mod anthropic;
mod gemini;
mod http;
mod openai_compat;
mod parse;
mod prompt;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quarry_shared::{AppConfig, ContextDocument, ProviderKind, ProviderResult, QuarryError, Result};

pub use anthropic::{AnthropicClient, AnthropicProvider};
pub use gemini::GeminiProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use parse::{parse_research_response, strip_code_fence};
pub use prompt::{RESEARCH_SYSTEM_PROMPT, build_user_message};

/// A research capability: query plus context in, summary plus claims out.
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    /// Display name used for attribution and progress events.
    fn name(&self) -> &str;

    /// Per-provider time budget overriding the dispatcher default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Run one research query.
    async fn research(&self, query: &str, context: &[ContextDocument]) -> Result<ProviderResult>;
}

/// Build every configured provider whose API key env var is set, in config order.
pub fn build_providers(config: &AppConfig) -> Result<Vec<Arc<dyn ResearchProvider>>> {
    build_providers_with(config, quarry_shared::resolve_api_key)
}

/// Like [`build_providers`], resolving keys through `resolve_key`.
pub fn build_providers_with(
    config: &AppConfig,
    resolve_key: impl Fn(&str) -> Option<String>,
) -> Result<Vec<Arc<dyn ResearchProvider>>> {
    let default_timeout = Duration::from_secs(config.dispatch.provider_timeout_secs);
    let mut providers: Vec<Arc<dyn ResearchProvider>> = Vec::new();

    for entry in &config.providers {
        let Some(api_key) = resolve_key(&entry.api_key_env) else {
            tracing::debug!(provider = %entry.name, env = %entry.api_key_env, "API key not set, skipping provider");
            continue;
        };
        let timeout = entry
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(default_timeout);
        let base_url = entry.base_url.as_deref();

        let provider: Arc<dyn ResearchProvider> = match entry.kind {
            ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
                &entry.name,
                AnthropicClient::new(api_key, &entry.model, base_url, timeout)?
                    .with_label(&entry.name)
                    .with_thinking(anthropic::DEFAULT_THINKING_BUDGET),
                timeout,
            )),
            ProviderKind::OpenaiCompat => Arc::new(OpenAiCompatProvider::new(
                &entry.name,
                api_key,
                &entry.model,
                base_url,
                timeout,
            )?),
            ProviderKind::Gemini => Arc::new(GeminiProvider::new(
                &entry.name,
                api_key,
                &entry.model,
                base_url,
                timeout,
            )?),
        };
        providers.push(provider);
    }

    if providers.is_empty() {
        let vars: Vec<&str> = config
            .providers
            .iter()
            .map(|p| p.api_key_env.as_str())
            .collect();
        return Err(QuarryError::config(format!(
            "no research providers configured. Set at least one of: {}",
            vars.join(", ")
        )));
    }

    tracing::info!(
        providers = ?providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
        "research providers ready"
    );
    Ok(providers)
}
