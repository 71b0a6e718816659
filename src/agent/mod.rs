//! Agent-driven generation of screening logic.
//!
//! A prompt is submitted to a web-based AI agent in a real browser, the reply
//! is awaited under a [`WaitPolicy`], and the decision table it contains is
//! validated and written to disk.
//!
//! ```rust,no_run
//! use rustscreen::agent::{generate_screening_logic, AgentSession, BrowserProfile};
//! use rustscreen::config::{parse_agent_url, BrowserOptions, WaitPolicy, DEFAULT_AGENT_URL};
//! use std::path::Path;
//!
//! # async fn run(prompt: &str) -> rustscreen::Result<()> {
//! let options = BrowserOptions::default();
//! let profile = BrowserProfile::for_channel(options.channel)?;
//! let session = AgentSession::launch(&profile, &options)?;
//! let mut chat = session.chat();
//! let url = parse_agent_url(DEFAULT_AGENT_URL)?;
//! let table = generate_screening_logic(
//!     &mut chat,
//!     prompt,
//!     &url,
//!     Path::new("screening_logic.json"),
//!     &WaitPolicy::default(),
//! )
//! .await?;
//! println!("{} rules", table.rules.len());
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod extract;
pub mod profile;
pub mod session;
pub mod wait;

pub use chat::{ChatSurface, ChromeChat};
pub use extract::isolate_table_block;
pub use profile::BrowserProfile;
pub use session::AgentSession;
pub use wait::{wait_for_login, wait_for_stable_response, StabilityDetector};

use crate::config::WaitPolicy;
use crate::error::{Result, ScreenError};
use crate::logic::DecisionTable;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use url::Url;

/// `<output>.partial-<timestamp>.txt`, next to the output file
pub fn partial_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "screening_logic".into());
    name.push(format!(".partial-{}.txt", Local::now().format("%Y%m%d_%H%M%S")));
    output.with_file_name(name)
}

/// Submit `prompt` to the agent and write the decision table it returns to
/// `output`.
///
/// Nothing is written to `output` unless a valid table was extracted. On a
/// response timeout the partial text is saved beside it.
pub async fn generate_screening_logic<S: ChatSurface>(
    surface: &mut S,
    prompt: &str,
    agent_url: &Url,
    output: &Path,
    policy: &WaitPolicy,
) -> Result<DecisionTable> {
    policy.validate()?;

    info!(url = %agent_url, "Opening AI agent");
    surface.open(agent_url)?;
    tokio::time::sleep(policy.settle_delay).await;

    wait_for_login(surface, policy).await?;

    info!(chars = prompt.len(), "Submitting prompt");
    surface.submit(prompt)?;

    let response = match wait_for_stable_response(surface, policy).await {
        Ok(text) => text,
        Err(ScreenError::GenerationTimeout { waited_secs, partial }) => {
            if !partial.is_empty() {
                let path = partial_path(output);
                match std::fs::write(&path, &partial) {
                    Ok(()) => warn!(path = %path.display(), "Partial response saved"),
                    Err(e) => warn!(error = %e, "Failed to save partial response"),
                }
            }
            return Err(ScreenError::GenerationTimeout { waited_secs, partial });
        }
        Err(e) => return Err(e),
    };

    let html = surface.page_html().unwrap_or_else(|e| {
        warn!(error = %e, "Could not read page HTML, using response text only");
        String::new()
    });

    let (block, table) = isolate_table_block(&response, &html)?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, &block)?;
    info!(
        path = %output.display(),
        groups = table.groups.len(),
        rules = table.rules.len(),
        "Screening logic saved"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::wait::tests::FakeChat;
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    const TABLE: &str = r#"{"groups": {"topic": ["diabetes"]}, "rules": [{"when": {"not": {"match": {"group": "topic", "field": "any"}}}, "decision": "Exclude", "reason": "off topic"}], "default": {"decision": "Include", "reason": "on topic"}}"#;

    fn policy() -> WaitPolicy {
        WaitPolicy {
            settle_delay: Duration::from_secs(1),
            login_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            idle_window: Duration::from_secs(2),
            response_timeout: Duration::from_secs(20),
        }
    }

    fn url() -> Url {
        Url::parse("https://agent.example/app").expect("valid url")
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_writes_block_verbatim() -> Result<()> {
        let dir = TempDir::new()?;
        let output = dir.path().join("logic").join("screening_logic.json");
        let reply = format!("Here you go:\n```json\n{}\n```\nGood luck!", TABLE);
        let mut chat = FakeChat {
            responses: vec![None, Some(reply)],
            ..Default::default()
        };

        let table = generate_screening_logic(&mut chat, "the prompt", &url(), &output, &policy()).await?;

        assert_eq!(table.rules.len(), 1);
        assert_eq!(std::fs::read_to_string(&output)?, TABLE);
        assert_eq!(chat.submitted, vec!["the prompt".to_string()]);
        assert_eq!(chat.opened, vec!["https://agent.example/app".to_string()]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_login_timeout_submits_nothing() -> Result<()> {
        let dir = TempDir::new()?;
        let output = dir.path().join("screening_logic.json");
        let mut chat = FakeChat {
            ready_after: usize::MAX,
            ..Default::default()
        };

        let err = generate_screening_logic(&mut chat, "p", &url(), &output, &policy())
            .await
            .expect_err("never logged in");
        assert!(matches!(err, ScreenError::AuthenticationTimeout { .. }));
        assert!(chat.submitted.is_empty());
        assert!(!output.exists());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_timeout_saves_partial() -> Result<()> {
        let dir = TempDir::new()?;
        let output = dir.path().join("screening_logic.json");
        let mut chat = FakeChat {
            responses: (1..=100).map(|n| Some(format!("chunk {}", n))).collect(),
            ..Default::default()
        };

        let err = generate_screening_logic(&mut chat, "p", &url(), &output, &policy())
            .await
            .expect_err("never stable");
        assert!(matches!(err, ScreenError::GenerationTimeout { .. }));
        assert!(!output.exists());

        let partials: Vec<_> = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("screening_logic.json.partial-") && n.ends_with(".txt"))
            .collect();
        assert_eq!(partials.len(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_without_block_writes_nothing() -> Result<()> {
        let dir = TempDir::new()?;
        let output = dir.path().join("screening_logic.json");
        let mut chat = FakeChat {
            responses: vec![Some("I cannot produce that.".to_string())],
            html: "<p>I cannot produce that.</p>".to_string(),
            ..Default::default()
        };

        let err = generate_screening_logic(&mut chat, "p", &url(), &output, &policy())
            .await
            .expect_err("no block");
        assert!(matches!(err, ScreenError::Extraction(_)));
        assert!(!output.exists());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_rejects_invalid_policy() {
        let mut chat = FakeChat::default();
        let bad = WaitPolicy {
            poll_interval: Duration::ZERO,
            ..policy()
        };
        let err = generate_screening_logic(&mut chat, "p", &url(), Path::new("x.json"), &bad)
            .await
            .expect_err("invalid policy");
        assert!(matches!(err, ScreenError::Config(_)));
        assert!(chat.opened.is_empty());
    }

    #[test]
    fn test_partial_path_format() {
        let path = partial_path(Path::new("out/screening_logic.json"));
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        assert!(name.starts_with("screening_logic.json.partial-"));
        assert!(name.ends_with(".txt"));
        assert_eq!(path.parent(), Some(Path::new("out")));
    }
}
