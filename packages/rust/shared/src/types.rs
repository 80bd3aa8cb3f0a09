//! Core domain types for Quarry research jobs and reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QuarryError, Result};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new time-sortable identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// A UUID v7 identifier for one research job.
    JobId
);

uuid_id!(
    /// A UUID v7 identifier for the report produced by a job.
    ReportId
);

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Lifecycle stage of a research job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Persisted but not yet picked up by a pipeline driver.
    Pending,
    Dispatching,
    Synthesizing,
    Rendering,
    Done,
    Failed,
}

impl Stage {
    /// Storage and wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatching => "dispatching",
            Self::Synthesizing => "synthesizing",
            Self::Rendering => "rendering",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_advance_to(&self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Self::Failed)
                | (Self::Pending, Self::Dispatching)
                | (Self::Dispatching, Self::Synthesizing)
                | (Self::Synthesizing, Self::Rendering)
                | (Self::Rendering, Self::Done)
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "dispatching" => Ok(Self::Dispatching),
            "synthesizing" => Ok(Self::Synthesizing),
            "rendering" => Ok(Self::Rendering),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(QuarryError::parse(format!("unknown stage '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Context documents
// ---------------------------------------------------------------------------

/// Kind of reference material attached to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Extracted from an uploaded file (e.g. a PDF).
    File,
    /// A fetched web page.
    WebPage,
    /// A generic document.
    Document,
    /// Plain text pasted by the caller.
    Text,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::WebPage => "web_page",
            Self::Document => "document",
            Self::Text => "text",
        }
    }
}

/// A unit of reference material supplied by the caller or found by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDocument {
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    pub kind: DocumentKind,
    pub content: String,
    /// Free-form metadata (file name, URL, etc.).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Who supplied the document ("upload", a provider name, ...).
    #[serde(default = "default_origin")]
    pub origin: String,
}

fn default_origin() -> String {
    "upload".into()
}

impl ContextDocument {
    /// Create a caller-supplied document.
    pub fn new(kind: DocumentKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            content: content.into(),
            metadata: serde_json::Map::new(),
            origin: default_origin(),
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One research request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub query: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ContextDocument>,
    pub stage: Stage,
}

impl Job {
    /// Create a pending job with a fresh id.
    pub fn new(query: impl Into<String>, context: Vec<ContextDocument>) -> Self {
        Self::with_id(JobId::new(), query, context)
    }

    /// Create a pending job for an id already allocated by a store.
    pub fn with_id(id: JobId, query: impl Into<String>, context: Vec<ContextDocument>) -> Self {
        Self {
            id,
            query: query.into(),
            context,
            stage: Stage::Pending,
        }
    }

    /// Move the job to `next`, rejecting illegal or post-terminal transitions.
    pub fn advance(&mut self, next: Stage) -> Result<()> {
        if !self.stage.can_advance_to(next) {
            return Err(QuarryError::validation(format!(
                "job {} cannot move from {} to {next}",
                self.id, self.stage
            )));
        }
        self.stage = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Provider output
// ---------------------------------------------------------------------------

/// An atomic factual assertion produced by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub text: String,
    #[serde(default)]
    pub source_urls: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl Claim {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            source_urls: Vec::new(),
            confidence,
        }
    }

    /// Builder-style helper to attach a supporting URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.source_urls.push(url.into());
        self
    }
}

/// Raw output of one provider for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResult {
    pub summary: String,
    #[serde(default)]
    pub claims: Vec<Claim>,
    /// Unprocessed response body, kept for audit/debugging.
    #[serde(default)]
    pub raw_response: String,
}

impl ProviderResult {
    /// Best-effort result for output that could not be parsed.
    pub fn degraded(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            summary: raw.clone(),
            claims: Vec::new(),
            raw_response: raw,
        }
    }

    /// Drop blank claims and clamp confidences into `[0.0, 1.0]`.
    pub fn normalized(mut self) -> Self {
        self.claims.retain(|c| !c.text.trim().is_empty());
        for claim in &mut self.claims {
            claim.confidence = clamp_confidence(claim.confidence);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Reconciled output
// ---------------------------------------------------------------------------

/// A claim annotated with provenance after reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub claim: String,
    /// Attributing provider name(s), comma-joined when several agree.
    pub llm_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying_url: Option<String>,
    /// Underlying context document, when the claim came from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying_doc: Option<Uuid>,
    pub confidence: f64,
}

impl Citation {
    /// Create a citation, clamping `confidence` into `[0.0, 1.0]`.
    pub fn new(
        claim: impl Into<String>,
        llm_source: impl Into<String>,
        underlying_url: Option<String>,
        confidence: f64,
    ) -> Self {
        Self {
            claim: claim.into(),
            llm_source: llm_source.into(),
            underlying_url,
            underlying_doc: None,
            confidence: clamp_confidence(confidence),
        }
    }

    /// Attribute a provider claim verbatim, keeping its first URL.
    pub fn from_claim(claim: &Claim, provider: &str) -> Self {
        Self::new(
            claim.text.clone(),
            provider,
            claim.source_urls.first().cloned(),
            claim.confidence,
        )
    }

    /// Key used for duplicate detection.
    pub fn normalized_text(&self) -> String {
        normalize_claim_text(&self.claim)
    }
}

/// A detected disagreement between providers on one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub topic: String,
    /// Opposing positions, one per disagreeing provider.
    pub positions: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl Conflict {
    /// Build a conflict. Returns `None` unless there are at least two positions.
    pub fn new(topic: impl Into<String>, positions: Vec<Citation>) -> Option<Self> {
        if positions.len() < 2 {
            return None;
        }
        Some(Self {
            topic: topic.into(),
            positions,
            resolution: None,
        })
    }
}

/// The synthesized artifact for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub job_id: JobId,
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    /// Rendered document text, filled in by the renderer.
    #[serde(default)]
    pub document: String,
}

impl Report {
    /// Create a fully-populated report with no rendered document yet.
    pub fn new(job_id: JobId, citations: Vec<Citation>, conflicts: Vec<Conflict>) -> Self {
        Self {
            job_id,
            citations,
            conflicts,
            document: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// A persisted report joined with its job state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: ReportId,
    pub job_id: JobId,
    pub query: String,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub document: String,
    pub citations: Vec<Citation>,
    pub conflicts: Vec<Conflict>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row in the job listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub query: String,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Case-insensitive, whitespace-trimmed form of a claim used for dedup.
pub fn normalize_claim_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Cut `text` to at most `max` characters, appending `...` when shortened.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
