//! Report rendering.
//!
//! Turns a reconciled [`Report`] into Typst source. Rendering is total:
//! arbitrary provider text is escaped rather than rejected.

mod escape;
mod template;

use std::fmt::Write as _;
use std::path::Path;

use quarry_shared::{Citation, Conflict, QuarryError, Report, Result};
use tracing::instrument;

pub use escape::{escape_markup, escape_string};
pub use template::{CONTENT_MARKER, DEFAULT_TEMPLATE};

/// Renders a report into document text.
pub trait Renderer: Send + Sync {
    /// Produce the full document for `report`, headed by `query`.
    fn render(&self, report: &Report, query: &str) -> String;
}

// ---------------------------------------------------------------------------
// Typst
// ---------------------------------------------------------------------------

/// Typst renderer. The generated body replaces [`CONTENT_MARKER`] in the template.
#[derive(Debug, Clone)]
pub struct TypstRenderer {
    template: String,
}

impl Default for TypstRenderer {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl TypstRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom template. It must contain [`CONTENT_MARKER`] and define
    /// `cite-inline`, `cite-entry` and `conflict-box`.
    pub fn with_template(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains(CONTENT_MARKER) {
            return Err(QuarryError::validation(format!(
                "template is missing the content marker `{CONTENT_MARKER}`"
            )));
        }
        Ok(Self { template })
    }

    /// Load a custom template from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let template = std::fs::read_to_string(path).map_err(|e| QuarryError::io(path, e))?;
        Self::with_template(template)
    }

    fn body(report: &Report, query: &str) -> String {
        let mut out = String::new();

        if !query.trim().is_empty() {
            let _ = writeln!(out, "= {}\n", escape_markup(query.trim()));
        }

        if !report.citations.is_empty() {
            out.push_str("== Findings\n\n");
            for (i, citation) in report.citations.iter().enumerate() {
                let _ = writeln!(out, "{}#cite-inline({})\n", escape_markup(&citation.claim), i + 1);
            }
        }

        if !report.conflicts.is_empty() {
            out.push_str("== Disputed Claims\n\n");
            for conflict in &report.conflicts {
                out.push_str(&conflict_box(conflict));
                out.push_str("\n\n");
            }
        }

        if !report.citations.is_empty() {
            out.push_str("== Sources\n\n");
            for (i, citation) in report.citations.iter().enumerate() {
                out.push_str(&cite_entry(i + 1, citation));
                out.push('\n');
            }
        }

        out
    }
}

impl Renderer for TypstRenderer {
    #[instrument(skip_all, fields(citations = report.citations.len(), conflicts = report.conflicts.len()))]
    fn render(&self, report: &Report, query: &str) -> String {
        // Replace only the first marker so text inside the body can't be re-expanded.
        self.template
            .replacen(CONTENT_MARKER, &Self::body(report, query), 1)
    }
}

fn cite_entry(num: usize, citation: &Citation) -> String {
    let url = citation
        .underlying_url
        .as_deref()
        .map(|u| format!(", url: \"{}\"", escape_string(u)))
        .unwrap_or_default();
    format!(
        "#cite-entry({num}, \"{}\", \"{}\"{url})",
        escape_string(&citation.claim),
        escape_string(&citation.llm_source)
    )
}

fn conflict_box(conflict: &Conflict) -> String {
    let positions: Vec<String> = conflict
        .positions
        .iter()
        .map(|p| {
            format!(
                "(source: \"{}\", claim: \"{}\")",
                escape_string(&p.llm_source),
                escape_string(&p.claim)
            )
        })
        .collect();
    let resolution = conflict
        .resolution
        .as_deref()
        .map(|r| format!("\"{}\"", escape_string(r)))
        .unwrap_or_else(|| "none".to_string());

    format!(
        "#conflict-box(\n  topic: \"{}\",\n  positions: ({},),\n  resolution: {resolution},\n)",
        escape_string(&conflict.topic),
        positions.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_shared::JobId;

    fn sample_report() -> Report {
        let citations = vec![
            Citation::new("X is true", "A, C", Some("https://a.example/x".into()), 0.9),
            Citation::new("Y says \"hi\"", "A", None, 0.7),
        ];
        let conflict = Conflict::new(
            "Release year",
            vec![
                Citation::new("2019", "A", None, 1.0),
                Citation::new("2020", "C", None, 1.0),
            ],
        )
        .unwrap();
        Report::new(JobId::new(), citations, vec![conflict])
    }

    #[test]
    fn renders_all_sections_in_order() {
        let doc = TypstRenderer::new().render(&sample_report(), "Is X true?");

        let heading = doc.find("= Is X true?").unwrap();
        let findings = doc.find("== Findings").unwrap();
        let disputed = doc.find("== Disputed Claims").unwrap();
        let sources = doc.find("== Sources").unwrap();
        assert!(heading < findings && findings < disputed && disputed < sources);

        assert!(doc.contains("X is true#cite-inline(1)"));
        assert!(doc.contains(r#"#cite-entry(1, "X is true", "A, C", url: "https://a.example/x")"#));
        assert!(doc.contains(r#"#cite-entry(2, "Y says \"hi\"", "A")"#));
        assert!(doc.contains(r#"positions: ((source: "A", claim: "2019"), (source: "C", claim: "2020"),),"#));
        assert!(doc.contains("resolution: none,"));
        assert!(!doc.contains(CONTENT_MARKER));
    }

    #[test]
    fn empty_report_omits_sections() {
        let report = Report::new(JobId::new(), vec![], vec![]);
        let doc = TypstRenderer::new().render(&report, "");
        assert!(!doc.contains("== Findings"));
        assert!(!doc.contains("== Sources"));
        assert!(!doc.contains("== Disputed Claims"));
    }

    #[test]
    fn custom_template_requires_marker() {
        assert!(TypstRenderer::with_template("#set page(\"a4\")").is_err());

        let renderer = TypstRenderer::with_template("HEAD\n// QUARRY:CONTENT\nTAIL").unwrap();
        let report = Report::new(JobId::new(), vec![], vec![]);
        let doc = renderer.render(&report, "Q");
        assert_eq!(doc, "HEAD\n= Q\n\n\nTAIL");
    }

    #[test]
    fn marker_inside_claim_is_not_expanded() {
        let citations = vec![Citation::new("// QUARRY:CONTENT", "A", None, 1.0)];
        let report = Report::new(JobId::new(), citations, vec![]);
        let doc = TypstRenderer::with_template("// QUARRY:CONTENT")
            .unwrap()
            .render(&report, "");
        assert_eq!(doc.matches("QUARRY:CONTENT").count(), 2);
    }
}
