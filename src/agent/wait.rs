//! Bounded waits on the agent page.
//!
//! The chat page never signals that a reply is finished, so completion is
//! inferred: the reply is done once it is non-empty, the stop control is gone
//! and the text has not changed for the policy's idle window. The response
//! timeout is a hard deadline on top of that.

use super::chat::ChatSurface;
use crate::config::WaitPolicy;
use crate::error::{Result, ScreenError};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Poll until the prompt input shows up, giving the user time to log in.
pub async fn wait_for_login<S: ChatSurface>(surface: &mut S, policy: &WaitPolicy) -> Result<()> {
    let start = Instant::now();
    let mut prompted = false;

    loop {
        match surface.input_ready() {
            Ok(true) => {
                info!(waited_ms = start.elapsed().as_millis() as u64, "Login confirmed");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => debug!(error = %e, "Input probe failed"),
        }

        if !prompted {
            warn!(
                timeout_secs = policy.login_timeout.as_secs(),
                "Prompt input not found. Please log in to the AI agent in the opened browser window"
            );
            prompted = true;
        }

        if start.elapsed() >= policy.login_timeout {
            return Err(ScreenError::AuthenticationTimeout {
                waited_secs: policy.login_timeout.as_secs(),
            });
        }
        sleep(policy.poll_interval).await;
    }
}

/// State of the completion detector after a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Pending,
    Complete,
}

/// Idle-window completion detector over successive samples of the reply.
#[derive(Debug)]
pub struct StabilityDetector {
    idle_window: Duration,
    text: String,
    changed_at: Instant,
}

impl StabilityDetector {
    pub fn new(idle_window: Duration, now: Instant) -> Self {
        Self {
            idle_window,
            text: String::new(),
            changed_at: now,
        }
    }

    /// Record one sample taken at `now`.
    pub fn observe(&mut self, text: &str, generating: bool, now: Instant) -> Progress {
        if text != self.text {
            debug!(chars = text.len(), "Response changed");
            self.text = text.to_string();
            self.changed_at = now;
            return Progress::Pending;
        }
        if self.text.trim().is_empty() || generating {
            return Progress::Pending;
        }
        if now.duration_since(self.changed_at) >= self.idle_window {
            Progress::Complete
        } else {
            Progress::Pending
        }
    }

    /// Latest text seen
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Poll the reply until it stabilizes or the response timeout passes.
pub async fn wait_for_stable_response<S: ChatSurface>(
    surface: &mut S,
    policy: &WaitPolicy,
) -> Result<String> {
    let start = Instant::now();
    let mut detector = StabilityDetector::new(policy.idle_window, start);
    let mut last_report = start;

    loop {
        sleep(policy.poll_interval).await;
        let now = Instant::now();

        let text = match surface.response_text() {
            Ok(text) => text.unwrap_or_default(),
            Err(e) => {
                debug!(error = %e, "Response probe failed");
                detector.text().to_string()
            }
        };
        let generating = surface.is_generating().unwrap_or(false);

        if detector.observe(&text, generating, now) == Progress::Complete {
            info!(
                chars = detector.text().len(),
                waited_secs = now.duration_since(start).as_secs(),
                "Response complete"
            );
            return Ok(detector.into_text());
        }

        if now.duration_since(start) >= policy.response_timeout {
            return Err(ScreenError::GenerationTimeout {
                waited_secs: policy.response_timeout.as_secs(),
                partial: detector.into_text(),
            });
        }

        if now.duration_since(last_report) >= Duration::from_secs(15) {
            info!(
                chars = detector.text().len(),
                elapsed_secs = now.duration_since(start).as_secs(),
                "Still generating..."
            );
            last_report = now;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use url::Url;

    /// Scripted chat page: each probe pops the next scripted value and
    /// repeats the last one once the script runs out.
    #[derive(Default)]
    pub(crate) struct FakeChat {
        pub ready_after: usize,
        pub ready_probes: usize,
        pub responses: Vec<Option<String>>,
        pub response_probes: usize,
        pub generating_until: usize,
        pub html: String,
        pub submitted: Vec<String>,
        pub opened: Vec<String>,
    }

    impl ChatSurface for FakeChat {
        fn open(&mut self, url: &Url) -> Result<()> {
            self.opened.push(url.to_string());
            Ok(())
        }

        fn input_ready(&mut self) -> Result<bool> {
            self.ready_probes += 1;
            Ok(self.ready_probes > self.ready_after)
        }

        fn submit(&mut self, prompt: &str) -> Result<()> {
            self.submitted.push(prompt.to_string());
            Ok(())
        }

        fn is_generating(&mut self) -> Result<bool> {
            Ok(self.response_probes <= self.generating_until)
        }

        fn response_text(&mut self) -> Result<Option<String>> {
            let idx = self.response_probes.min(self.responses.len().saturating_sub(1));
            self.response_probes += 1;
            Ok(self.responses.get(idx).cloned().flatten())
        }

        fn page_html(&mut self) -> Result<String> {
            Ok(self.html.clone())
        }
    }

    fn policy() -> WaitPolicy {
        WaitPolicy {
            settle_delay: Duration::from_secs(1),
            login_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            idle_window: Duration::from_secs(3),
            response_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_detector_requires_idle_window() {
        let t0 = Instant::now();
        let mut detector = StabilityDetector::new(Duration::from_secs(3), t0);
        assert_eq!(detector.observe("abc", false, t0), Progress::Pending);
        assert_eq!(detector.observe("abc", false, t0 + Duration::from_secs(2)), Progress::Pending);
        assert_eq!(detector.observe("abc", false, t0 + Duration::from_secs(3)), Progress::Complete);
    }

    #[test]
    fn test_detector_resets_on_change_and_waits_for_stop_control() {
        let t0 = Instant::now();
        let mut detector = StabilityDetector::new(Duration::from_secs(3), t0);
        detector.observe("a", false, t0);
        assert_eq!(detector.observe("ab", false, t0 + Duration::from_secs(3)), Progress::Pending);
        assert_eq!(detector.observe("ab", true, t0 + Duration::from_secs(7)), Progress::Pending);
        assert_eq!(detector.observe("ab", false, t0 + Duration::from_secs(7)), Progress::Complete);
    }

    #[test]
    fn test_detector_ignores_empty_text() {
        let t0 = Instant::now();
        let mut detector = StabilityDetector::new(Duration::from_secs(1), t0);
        assert_eq!(detector.observe("", false, t0 + Duration::from_secs(60)), Progress::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_eventually_confirmed() -> Result<()> {
        let mut chat = FakeChat {
            ready_after: 3,
            ..Default::default()
        };
        wait_for_login(&mut chat, &policy()).await?;
        assert_eq!(chat.ready_probes, 4);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_times_out() {
        let mut chat = FakeChat {
            ready_after: usize::MAX,
            ..Default::default()
        };
        let err = wait_for_login(&mut chat, &policy()).await.expect_err("never logs in");
        assert!(matches!(err, ScreenError::AuthenticationTimeout { waited_secs: 10 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_stabilizes() -> Result<()> {
        let mut chat = FakeChat {
            responses: vec![None, Some("par".into()), Some("partial".into()), Some("partial done".into())],
            ..Default::default()
        };
        let text = wait_for_stable_response(&mut chat, &policy()).await?;
        assert_eq!(text, "partial done");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_timeout_keeps_partial_text() {
        let responses = (1..=100).map(|n| Some("x".repeat(n))).collect();
        let mut chat = FakeChat {
            responses,
            ..Default::default()
        };
        let err = wait_for_stable_response(&mut chat, &policy())
            .await
            .expect_err("text keeps growing");
        match err {
            ScreenError::GenerationTimeout { partial, waited_secs } => {
                assert_eq!(waited_secs, 30);
                assert!(partial.starts_with("xxx"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
