//! Reconciliation of per-provider results into one [`Report`].
//!
//! One result is structured as-is. Two or more go through the primary
//! strategy, a delegated merge that groups agreeing claims and flags
//! conflicts. The primary strategy yields a [`MergeOutcome`]; [`decide`]
//! turns a failed outcome into the deterministic fallback merge.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quarry_providers::{AnthropicClient, strip_code_fence};
use quarry_shared::{
    AppConfig, Citation, Conflict, JobId, ProviderResult, Report, Result, SynthesisConfig,
    resolve_api_key,
};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

/// System prompt for the delegated merge.
pub const MERGE_SYSTEM_PROMPT: &str = "\
You are the chief research synthesizer. You receive findings from several \
independent research assistants and must produce a unified, authoritative synthesis.

Your job:
1. Merge and cross-reference findings across all sources.
2. Identify claims that multiple assistants agree on (high confidence).
3. Identify claims unique to one assistant (note the source).
4. Detect CONFLICTS where assistants disagree. These are critical to flag.
5. Produce a coherent, deduplicated set of claims with proper attribution.

Respond with valid JSON in this exact format:
{
  \"claims\": [
    {
      \"text\": \"A specific factual claim.\",
      \"llm_source\": \"Claude, Grok\",
      \"source_urls\": [\"https://example.com\"],
      \"confidence\": 0.95
    }
  ],
  \"conflicts\": [
    {
      \"topic\": \"Brief description of the disagreement\",
      \"positions\": [
        {\"source\": \"Claude\", \"claim\": \"What Claude said\"},
        {\"source\": \"Grok\", \"claim\": \"What Grok said\"}
      ]
    }
  ]
}

Rules:
- Attribute each claim to ALL assistants that reported it (comma-separated in llm_source).
- Claims agreed upon by multiple assistants get higher confidence.
- Include source URLs from any assistant that provided them.
- Flag every contradiction as a conflict. Never silently drop disagreements.
- Be thorough but avoid redundancy.";

// ---------------------------------------------------------------------------
// Delegate
// ---------------------------------------------------------------------------

/// The higher-order reasoning step behind the primary merge.
#[async_trait]
pub trait SynthesisDelegate: Send + Sync {
    /// Merge the formatted provider findings; returns the delegate's raw reply.
    async fn merge(&self, input: &str) -> Result<String>;
}

/// Primary merge delegated to the Anthropic Messages API.
pub struct AnthropicSynthesisDelegate {
    client: AnthropicClient,
    max_tokens: u32,
}

impl AnthropicSynthesisDelegate {
    pub fn new(client: AnthropicClient, max_tokens: u32) -> Self {
        Self { client, max_tokens }
    }

    /// Build from config. `None` when synthesis is disabled or its key is unset.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>> {
        if !config.synthesis.enabled {
            info!("delegated synthesis disabled, fallback merge only");
            return Ok(None);
        }
        let Some(api_key) = resolve_api_key(&config.synthesis.api_key_env) else {
            warn!(
                env = %config.synthesis.api_key_env,
                "synthesis API key not set, fallback merge only"
            );
            return Ok(None);
        };

        let runtime = SynthesisConfig::from(config);
        let client = AnthropicClient::new(
            api_key,
            &runtime.model,
            runtime.base_url.as_deref(),
            runtime.timeout,
        )?
        .with_label("synthesis");
        Ok(Some(Self::new(client, runtime.max_tokens)))
    }
}

#[async_trait]
impl SynthesisDelegate for AnthropicSynthesisDelegate {
    async fn merge(&self, input: &str) -> Result<String> {
        debug!(model = %self.client.model(), "requesting delegated merge");
        self.client
            .complete(MERGE_SYSTEM_PROMPT, input, self.max_tokens)
            .await
    }
}

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Result of the primary strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Merged {
        citations: Vec<Citation>,
        conflicts: Vec<Conflict>,
    },
    Failed {
        reason: String,
    },
}

/// Which path produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    SingleProvider,
    Primary,
    Fallback,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleProvider => "single_provider",
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

/// A reconciled report and the strategy that produced it.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub report: Report,
    pub strategy: MergeStrategy,
}

// ---------------------------------------------------------------------------
// Synthesizer
// ---------------------------------------------------------------------------

/// Reconciler. Never fails: delegate problems downgrade to the fallback.
pub struct Synthesizer {
    delegate: Option<Arc<dyn SynthesisDelegate>>,
    timeout: Duration,
}

impl Synthesizer {
    pub fn new(delegate: Option<Arc<dyn SynthesisDelegate>>, timeout: Duration) -> Self {
        Self { delegate, timeout }
    }

    /// A synthesizer that always takes the fallback path for multi-provider input.
    pub fn fallback_only() -> Self {
        Self::new(None, Duration::ZERO)
    }

    /// Build from config with the Anthropic delegate when available.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let delegate = AnthropicSynthesisDelegate::from_config(config)?
            .map(|d| Arc::new(d) as Arc<dyn SynthesisDelegate>);
        Ok(Self::new(delegate, SynthesisConfig::from(config).timeout))
    }

    /// Progress line for the synthesizing stage.
    pub fn describe(succeeded: usize) -> String {
        if succeeded == 1 {
            "Structuring results from 1 provider".to_string()
        } else {
            format!("Merging results from {succeeded} providers")
        }
    }

    /// Produce exactly one report for the successful provider results.
    #[instrument(skip_all, fields(job_id = %job_id, providers = results.len()))]
    pub async fn synthesize(&self, job_id: JobId, results: &[(String, ProviderResult)]) -> Reconciliation {
        let reconciliation = match results {
            [(name, result)] => Reconciliation {
                report: single_provider(job_id, name, result),
                strategy: MergeStrategy::SingleProvider,
            },
            _ => {
                let outcome = self.primary_merge(results).await;
                decide(job_id, outcome, results)
            }
        };

        info!(
            strategy = reconciliation.strategy.as_str(),
            citations = reconciliation.report.citations.len(),
            conflicts = reconciliation.report.conflicts.len(),
            "reconciliation complete"
        );
        reconciliation
    }

    /// Run the delegated merge, capturing every failure mode as an outcome.
    pub async fn primary_merge(&self, results: &[(String, ProviderResult)]) -> MergeOutcome {
        let Some(delegate) = &self.delegate else {
            return MergeOutcome::Failed {
                reason: "no synthesis delegate configured".into(),
            };
        };

        let input = build_synthesis_input(results);
        let input_claims = results.iter().map(|(_, r)| r.claims.len()).sum();

        match tokio::time::timeout(self.timeout, delegate.merge(&input)).await {
            Ok(Ok(raw)) => parse_merge_reply(&raw, input_claims),
            Ok(Err(e)) => MergeOutcome::Failed {
                reason: e.to_string(),
            },
            Err(_) => MergeOutcome::Failed {
                reason: format!("delegate timed out after {}s", self.timeout.as_secs()),
            },
        }
    }
}

/// Consume a primary outcome, falling back when it failed.
pub fn decide(job_id: JobId, outcome: MergeOutcome, results: &[(String, ProviderResult)]) -> Reconciliation {
    match outcome {
        MergeOutcome::Merged {
            citations,
            conflicts,
        } => Reconciliation {
            report: Report::new(job_id, dedup_citations(citations), conflicts),
            strategy: MergeStrategy::Primary,
        },
        MergeOutcome::Failed { reason } => {
            warn!(%reason, "primary merge failed, using fallback merge");
            Reconciliation {
                report: fallback_merge(job_id, results),
                strategy: MergeStrategy::Fallback,
            }
        }
    }
}

/// Identity reconciliation for a single provider. Never produces conflicts.
pub fn single_provider(job_id: JobId, name: &str, result: &ProviderResult) -> Report {
    let citations = result
        .claims
        .iter()
        .filter(|c| !c.text.trim().is_empty())
        .map(|c| Citation::from_claim(c, name))
        .collect();
    Report::new(job_id, citations, Vec::new())
}

/// Deterministic merge: every claim attributed to its own provider, then
/// deduplicated. Never produces conflicts.
pub fn fallback_merge(job_id: JobId, results: &[(String, ProviderResult)]) -> Report {
    let citations = results
        .iter()
        .flat_map(|(name, result)| {
            result
                .claims
                .iter()
                .filter(|c| !c.text.trim().is_empty())
                .map(move |c| Citation::from_claim(c, name))
        })
        .collect();
    Report::new(job_id, dedup_citations(citations), Vec::new())
}

/// Collapse citations sharing normalized text, keeping the highest-confidence
/// one at the position of the first occurrence. Ties keep the earlier entry.
pub fn dedup_citations(citations: Vec<Citation>) -> Vec<Citation> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<Citation> = Vec::with_capacity(citations.len());

    for citation in citations {
        let key = citation.normalized_text();
        match index.get(&key) {
            Some(&i) => {
                if citation.confidence > kept[i].confidence {
                    kept[i] = citation;
                }
            }
            None => {
                index.insert(key, kept.len());
                kept.push(citation);
            }
        }
    }
    kept
}

/// Format provider findings for the delegate.
pub fn build_synthesis_input(results: &[(String, ProviderResult)]) -> String {
    let mut out = String::new();
    for (name, result) in results {
        let _ = writeln!(out, "=== {name} ===");
        let _ = writeln!(out, "Summary: {}", result.summary);
        if !result.claims.is_empty() {
            out.push_str("Claims:\n");
            for (i, claim) in result.claims.iter().enumerate() {
                let urls = if claim.source_urls.is_empty() {
                    "none".to_string()
                } else {
                    claim.source_urls.join(", ")
                };
                let _ = writeln!(
                    out,
                    "  {}. {} [confidence: {}, sources: {urls}]",
                    i + 1,
                    claim.text,
                    claim.confidence
                );
            }
        }
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// Delegate reply parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MergeReply {
    #[serde(default)]
    claims: Vec<MergedClaim>,
    #[serde(default)]
    conflicts: Vec<MergedConflict>,
}

#[derive(Debug, Deserialize)]
struct MergedClaim {
    text: String,
    #[serde(default = "unknown_source")]
    llm_source: String,
    #[serde(default)]
    source_urls: Vec<String>,
    #[serde(default = "full_confidence")]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct MergedConflict {
    topic: String,
    #[serde(default)]
    positions: Vec<MergedPosition>,
    #[serde(default)]
    resolution: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MergedPosition {
    source: String,
    claim: String,
}

fn unknown_source() -> String {
    "Unknown".into()
}

fn full_confidence() -> f64 {
    1.0
}

/// Turn the delegate's reply into an outcome.
///
/// Unparseable JSON, or zero usable citations for input that had claims,
/// counts as failure. Blank claims and conflicts with fewer than two
/// positions are dropped individually.
pub fn parse_merge_reply(raw: &str, input_claims: usize) -> MergeOutcome {
    let reply: MergeReply = match serde_json::from_str(strip_code_fence(raw)) {
        Ok(reply) => reply,
        Err(e) => {
            return MergeOutcome::Failed {
                reason: format!("unparseable merge reply: {e}"),
            };
        }
    };

    let mut citations = Vec::with_capacity(reply.claims.len());
    for claim in reply.claims {
        if claim.text.trim().is_empty() {
            warn!("delegate returned a blank claim, skipping");
            continue;
        }
        citations.push(Citation::new(
            claim.text,
            claim.llm_source,
            claim.source_urls.into_iter().next(),
            claim.confidence,
        ));
    }

    if citations.is_empty() && input_claims > 0 {
        return MergeOutcome::Failed {
            reason: format!("merge returned no claims for {input_claims} input claims"),
        };
    }

    let mut conflicts = Vec::with_capacity(reply.conflicts.len());
    for merged in reply.conflicts {
        let positions = merged
            .positions
            .into_iter()
            .filter(|p| !p.claim.trim().is_empty())
            .map(|p| Citation::new(p.claim, p.source, None, 1.0))
            .collect();
        match Conflict::new(merged.topic.clone(), positions) {
            Some(mut conflict) => {
                conflict.resolution = merged.resolution.filter(|r| !r.trim().is_empty());
                conflicts.push(conflict);
            }
            None => warn!(topic = %merged.topic, "conflict with fewer than two positions, dropping"),
        }
    }

    MergeOutcome::Merged {
        citations,
        conflicts,
    }
}
