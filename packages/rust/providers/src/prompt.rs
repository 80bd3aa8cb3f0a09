//! Prompt text shared by every research provider.

use quarry_shared::ContextDocument;

/// System prompt asking for the `{summary, claims}` JSON shape.
pub const RESEARCH_SYSTEM_PROMPT: &str = "\
You are a research assistant. Given a research query and optional source documents, \
produce a thorough, well-sourced research summary.

Respond with valid JSON in this exact format:
{
  \"summary\": \"A comprehensive narrative summary of your findings.\",
  \"claims\": [
    {
      \"text\": \"A specific factual claim.\",
      \"source_urls\": [\"https://example.com/source\"],
      \"confidence\": 0.95
    }
  ]
}

Rules:
- Break your findings into discrete, specific claims.
- For each claim, include source URLs you can cite. Use an empty list if no URL is available.
- Set confidence between 0.0 and 1.0 based on how well-supported the claim is.
- The summary should synthesize all claims into a readable narrative.
- If source documents are provided, prioritize information from them.";

/// Build the user message: the query, then each context document numbered from 1.
pub fn build_user_message(query: &str, context: &[ContextDocument]) -> String {
    let mut parts = vec![format!("Research query: {query}")];
    if !context.is_empty() {
        parts.push("\n--- Provided Sources ---".to_string());
        for (i, doc) in context.iter().enumerate() {
            parts.push(format!(
                "\n[Source {}] ({}):\n{}",
                i + 1,
                doc.kind.as_str(),
                doc.content
            ));
        }
    }
    parts.join("\n")
}
