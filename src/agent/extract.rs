//! Isolating the generated decision table from an agent response.
//!
//! The response is rendered markdown, so a fenced block may survive in the
//! extracted text or only as a `<pre>` element in the page HTML. Candidates are
//! tried in order and the first one that parses as a [`DecisionTable`] wins.

use crate::error::{Result, ScreenError};
use crate::logic::DecisionTable;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Containers holding one agent reply
pub const RESPONSE_CONTAINER_SELECTOR: &str =
    "model-response, .model-response-text, message-content, [data-test-id*='response']";

fn fence_regex() -> Option<&'static Regex> {
    static FENCE_RE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE_RE
        .get_or_init(|| Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[^\n]*\n(.*?)```").ok())
        .as_ref()
}

/// First fenced block, preferring one tagged `json`.
pub fn extract_fenced_block(text: &str) -> Option<String> {
    let re = fence_regex()?;
    let blocks: Vec<(String, String)> = re
        .captures_iter(text)
        .filter_map(|caps| {
            let lang = caps.get(1)?.as_str().to_ascii_lowercase();
            let body = caps.get(2)?.as_str().trim().to_string();
            (!body.is_empty()).then_some((lang, body))
        })
        .collect();

    blocks
        .iter()
        .find(|(lang, _)| lang == "json")
        .or_else(|| blocks.first())
        .map(|(_, body)| body.clone())
}

/// Text of the code blocks inside the last reply of the rendered page.
///
/// Falls back to every `<pre>` on the page when no reply container is found.
pub fn extract_code_from_html(html: &str) -> Result<Vec<String>> {
    let document = Html::parse_document(html);
    let container_selector = Selector::parse(RESPONSE_CONTAINER_SELECTOR)
        .map_err(|e| ScreenError::Extraction(e.to_string()))?;
    let code_selector =
        Selector::parse("pre").map_err(|e| ScreenError::Extraction(e.to_string()))?;

    let blocks: Vec<String> = match document.select(&container_selector).last() {
        Some(container) => container
            .select(&code_selector)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .collect(),
        None => document
            .select(&code_selector)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .collect(),
    };

    Ok(blocks.into_iter().filter(|b| !b.is_empty()).collect())
}

/// Outermost `{ ... }` span of the text
fn brace_span(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].to_string())
}

/// Pick the decision table out of a finished response.
///
/// Returns the block text exactly as extracted together with the parsed table.
pub fn isolate_table_block(response: &str, html: &str) -> Result<(String, DecisionTable)> {
    let mut candidates: Vec<(&str, String)> = Vec::new();
    if let Some(block) = extract_fenced_block(response) {
        candidates.push(("fenced block", block));
    }
    for block in extract_code_from_html(html)? {
        candidates.push(("rendered code block", block));
    }
    if let Some(span) = brace_span(response) {
        candidates.push(("inline JSON", span));
    }

    if candidates.is_empty() {
        let preview: String = response.chars().take(200).collect();
        return Err(ScreenError::Extraction(format!(
            "no code block found in the response (preview: {:?})",
            preview
        )));
    }

    let mut first_error = None;
    for (source, block) in candidates {
        match DecisionTable::from_json(&block) {
            Ok(table) => {
                info!(source = source, chars = block.len(), "Decision table extracted");
                return Ok((block, table));
            }
            Err(e) => {
                debug!(source = source, error = %e, "Candidate rejected");
                first_error.get_or_insert(e);
            }
        }
    }

    Err(ScreenError::Extraction(format!(
        "code block is not a valid decision table: {}",
        first_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"{"groups": {"t": ["x"]}, "rules": [], "default": {"decision": "Include", "reason": "ok"}}"#;

    #[test]
    fn test_extract_fenced_prefers_json() {
        let text = format!("Intro\n```text\nnot this\n```\nThen:\n```json\n{}\n```\nBye", TABLE);
        assert_eq!(extract_fenced_block(&text).as_deref(), Some(TABLE));
    }

    #[test]
    fn test_extract_fenced_any_language() {
        let text = "```\nplain block\n```";
        assert_eq!(extract_fenced_block(text).as_deref(), Some("plain block"));
    }

    #[test]
    fn test_extract_fenced_none() {
        assert!(extract_fenced_block("no fences here").is_none());
    }

    #[test]
    fn test_extract_code_from_html_uses_last_reply() -> Result<()> {
        let html = r#"<html><body>
            <model-response><pre>old</pre></model-response>
            <model-response><p>Here:</p><pre><code>new</code></pre></model-response>
        </body></html>"#;
        assert_eq!(extract_code_from_html(html)?, vec!["new".to_string()]);
        Ok(())
    }

    #[test]
    fn test_isolate_from_rendered_html() -> Result<()> {
        let html = format!("<div class=\"model-response-text\"><pre>{}</pre></div>", TABLE);
        let (block, table) = isolate_table_block("Here is your table (rendered)", &html)?;
        assert_eq!(block, TABLE);
        assert_eq!(table.groups.len(), 1);
        Ok(())
    }

    #[test]
    fn test_isolate_inline_json() -> Result<()> {
        let response = format!("Sure! {} Let me know.", TABLE);
        let (block, _) = isolate_table_block(&response, "")?;
        assert_eq!(block, TABLE);
        Ok(())
    }

    #[test]
    fn test_isolate_without_block_fails() {
        let err = isolate_table_block("I cannot help with that.", "<p>nothing</p>")
            .expect_err("no candidates");
        assert!(matches!(err, ScreenError::Extraction(_)));
        assert!(err.to_string().contains("no code block"));
    }

    #[test]
    fn test_isolate_invalid_table_fails() {
        let err = isolate_table_block("```json\n{\"rules\": 3}\n```", "").expect_err("invalid");
        assert!(err.to_string().contains("not a valid decision table"));
    }
}
