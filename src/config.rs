//! Run configuration: default file names, agent endpoint, wait policy and
//! browser options.
//!
//! Every value here has a default and can be overridden from the command line.

use crate::error::{Result, ScreenError};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default citation-exchange input file
pub const DEFAULT_BIB_FILE: &str = "articles.bib";

/// Intermediate parsed-articles file
pub const DEFAULT_PARSED_FILE: &str = "parsed_articles.json";

/// Generated decision table
pub const DEFAULT_LOGIC_FILE: &str = "screening_logic.json";

/// Screening results table
pub const DEFAULT_RESULTS_FILE: &str = "screening_results.csv";

/// Web endpoint of the AI agent
pub const DEFAULT_AGENT_URL: &str = "https://gemini.google.com/app";

/// User agent presented by the automated browser
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Bounded waits used while talking to the AI agent.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitPolicy {
    /// Pause after navigation before the first probe
    pub settle_delay: Duration,
    /// How long to wait for the user to finish an interactive login
    pub login_timeout: Duration,
    /// Interval between samples of the page
    pub poll_interval: Duration,
    /// The response counts as complete once unchanged for this long
    pub idle_window: Duration,
    /// Hard deadline for the whole response
    pub response_timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(5),
            login_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            idle_window: Duration::from_secs(10),
            response_timeout: Duration::from_secs(300),
        }
    }
}

impl WaitPolicy {
    /// Reject policies that can never complete.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(ScreenError::Config("poll interval must be positive".to_string()));
        }
        if self.idle_window < self.poll_interval {
            return Err(ScreenError::Config(format!(
                "idle window ({:?}) must be at least one poll interval ({:?})",
                self.idle_window, self.poll_interval
            )));
        }
        if self.response_timeout <= self.idle_window {
            return Err(ScreenError::Config(format!(
                "response timeout ({:?}) must exceed the idle window ({:?})",
                self.response_timeout, self.idle_window
            )));
        }
        Ok(())
    }
}

/// Browser flavour to drive. Each one gets its own profile directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BrowserChannel {
    Chrome,
    Msedge,
    Chromium,
}

impl BrowserChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserChannel::Chrome => "chrome",
            BrowserChannel::Msedge => "msedge",
            BrowserChannel::Chromium => "chromium",
        }
    }

    /// Well-known install locations, tried in order when no explicit path is given.
    pub fn executable_candidates(&self) -> &'static [&'static str] {
        match self {
            BrowserChannel::Chrome => &[
                "/usr/bin/google-chrome",
                "/usr/bin/google-chrome-stable",
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            ],
            BrowserChannel::Msedge => &[
                "/usr/bin/microsoft-edge",
                "/usr/bin/microsoft-edge-stable",
                "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
                r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
            ],
            BrowserChannel::Chromium => &["/usr/bin/chromium", "/usr/bin/chromium-browser"],
        }
    }

    /// First existing candidate, if any. `None` lets the driver auto-detect.
    pub fn locate(&self) -> Option<PathBuf> {
        self.executable_candidates()
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
    }
}

/// How the browser is launched for a generation run.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub channel: BrowserChannel,
    /// Explicit executable, overrides the channel lookup
    pub executable: Option<PathBuf>,
    /// Headed by default so the user can log in
    pub headless: bool,
    pub window_size: (u32, u32),
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            channel: BrowserChannel::Chrome,
            executable: None,
            headless: false,
            window_size: (1280, 900),
        }
    }
}

impl BrowserOptions {
    pub fn resolve_executable(&self) -> Option<PathBuf> {
        self.executable.clone().or_else(|| self.channel.locate())
    }
}

/// Parse and check the agent endpoint.
pub fn parse_agent_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| ScreenError::Config(format!("Invalid agent URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ScreenError::Config(format!(
            "Agent URL must be http(s), got '{}'",
            other
        ))),
    }
}
