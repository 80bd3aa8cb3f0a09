//! Progress events streamed to observers of a running job.
//!
//! Events are transient: they exist only on the wire and are never persisted.

use serde::{Deserialize, Serialize};

use crate::types::{ReportId, Stage};

/// Outcome reported for a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Succeeded,
    Failed,
}

/// One event in a job's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The job moved to a new stage.
    StageChanged {
        stage: Stage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        /// Provider names, listed when dispatch starts.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        providers: Vec<String>,
        /// Number of providers that succeeded, set when synthesis starts.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        succeeded: Option<usize>,
    },
    /// A single provider settled.
    ProviderUpdate {
        name: String,
        status: ProviderStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        claims: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Terminal: the report was rendered and persisted.
    Report {
        report_id: ReportId,
        citations: usize,
        conflicts: usize,
        document: String,
    },
    /// Terminal: the job failed. `detail` is safe to show to any observer.
    Error { detail: String },
}

impl ProgressEvent {
    /// Stage change with a human-readable detail line.
    pub fn stage(stage: Stage, detail: impl Into<String>) -> Self {
        Self::StageChanged {
            stage,
            detail: Some(detail.into()),
            providers: Vec::new(),
            succeeded: None,
        }
    }

    /// Whether this event ends the job's event stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Report { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_update_serializes_with_type_tag() {
        let event = ProgressEvent::ProviderUpdate {
            name: "Grok".into(),
            status: ProviderStatus::Failed,
            claims: None,
            error: Some("timed out".into()),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"provider_update""#));
        assert!(json.contains(r#""status":"failed""#));
        assert!(!json.contains("claims"));
    }

    #[test]
    fn stage_changed_lists_providers() {
        let event = ProgressEvent::StageChanged {
            stage: Stage::Dispatching,
            detail: None,
            providers: vec!["Claude".into(), "Gemini".into()],
            succeeded: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""stage":"dispatching""#));
        assert!(json.contains(r#""providers":["Claude","Gemini"]"#));

        let parsed: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn only_report_and_error_are_terminal() {
        assert!(ProgressEvent::Error { detail: "x".into() }.is_terminal());
        assert!(!ProgressEvent::stage(Stage::Rendering, "rendering").is_terminal());
    }
}
