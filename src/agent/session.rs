//! Browser session held for one generation run.

use super::chat::ChromeChat;
use super::profile::BrowserProfile;
use crate::config::{BrowserOptions, USER_AGENT};
use crate::error::{BrowserResultExt, Result};
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Flags that keep the agent page from treating the session as automated
const STEALTH_ARGS: [&str; 3] = [
    "--disable-blink-features=AutomationControlled",
    "--start-maximized",
    "--disable-infobars",
];

/// The browser stays alive at least this long without CDP traffic
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(900);

/// A launched browser on a persistent profile. Dropping it closes the browser.
///
/// Two sessions on the same profile directory are not supported; the browser
/// refuses to share a user-data directory between processes.
pub struct AgentSession {
    // field order matters: the tab goes before the browser
    tab: Arc<Tab>,
    _browser: Browser,
    profile: BrowserProfile,
}

impl AgentSession {
    /// Launch the browser on `profile`.
    pub fn launch(profile: &BrowserProfile, options: &BrowserOptions) -> Result<Self> {
        profile.ensure()?;

        let executable = options.resolve_executable();
        info!(
            browser = options.channel.as_str(),
            executable = ?executable,
            profile = %profile.path().display(),
            headless = options.headless,
            "Launching browser"
        );

        let launch_options = LaunchOptions::default_builder()
            .headless(options.headless)
            .sandbox(false)
            .window_size(Some(options.window_size))
            .user_data_dir(Some(profile.path().to_path_buf()))
            .path(executable)
            .args(STEALTH_ARGS.iter().map(OsStr::new).collect())
            .ignore_default_args(vec![OsStr::new("--enable-automation")])
            .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
            .build()
            .browser_ctx("build launch options")?;

        let browser = Browser::new(launch_options).browser_ctx("launch browser")?;
        let tab = browser.new_tab().browser_ctx("open tab")?;
        tab.set_user_agent(USER_AGENT, Some("en-US,en;q=0.9"), None)
            .browser_ctx("set user agent")?;
        debug!("Browser ready");

        Ok(Self {
            tab,
            _browser: browser,
            profile: profile.clone(),
        })
    }

    /// Chat page driver on this session's tab
    pub fn chat(&self) -> ChromeChat {
        ChromeChat::new(Arc::clone(&self.tab))
    }

    pub fn profile(&self) -> &BrowserProfile {
        &self.profile
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        info!(profile = %self.profile.path().display(), "Closing browser");
    }
}
