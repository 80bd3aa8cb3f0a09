//! Parsing of provider replies into [`ProviderResult`].
//!
//! Malformed replies are not errors: the raw text becomes the summary and
//! the claim list is empty, so one misbehaving provider still contributes.

use std::sync::LazyLock;

use quarry_shared::{Claim, ProviderResult};
use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ResearchReply {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    claims: Vec<Claim>,
}

/// Parse a provider's text reply, degrading to raw text on any failure.
pub fn parse_research_response(raw: &str) -> ProviderResult {
    let body = strip_code_fence(raw);

    match serde_json::from_str::<ResearchReply>(body) {
        Ok(reply) => ProviderResult {
            summary: reply.summary,
            claims: reply.claims,
            raw_response: raw.to_string(),
        },
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse structured response, using raw text");
            ProviderResult::degraded(raw)
        }
    }
}

/// Extract the body of the first Markdown code fence, if any.
///
/// Models often wrap JSON in a fence, sometimes after a line of prose.
/// Text without a closed fence is returned trimmed.
pub fn strip_code_fence(raw: &str) -> &str {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)```").expect("valid regex")
    });

    let text = raw.trim();
    match FENCE_RE.captures(text).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim(),
        None => text,
    }
}
