//! Driving the AI agent's chat page through the Chrome DevTools Protocol.
//!
//! [`ChatSurface`] is the small set of page interactions the generator needs.
//! [`ChromeChat`] implements it on a `headless_chrome` tab; tests use fakes.

use super::extract::RESPONSE_CONTAINER_SELECTOR;
use crate::error::{BrowserResultExt, Result};
use headless_chrome::protocol::cdp::Input;
use headless_chrome::Tab;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Prompt input: a rich-text editor or a plain textarea
pub const INPUT_SELECTOR: &str = "div[contenteditable='true'], textarea";

/// Control shown while the agent is still writing
pub const STOP_SELECTOR: &str = "button[aria-label*='Stop'], button[aria-label*='stop']";

/// Page interactions used to submit a prompt and read the reply.
pub trait ChatSurface {
    /// Navigate to the agent endpoint.
    fn open(&mut self, url: &Url) -> Result<()>;

    /// Whether the prompt input is visible, i.e. the user is logged in.
    fn input_ready(&mut self) -> Result<bool>;

    /// Type the prompt into the input and send it.
    fn submit(&mut self, prompt: &str) -> Result<()>;

    /// Whether the agent still shows its stop control.
    fn is_generating(&mut self) -> Result<bool>;

    /// Rendered text of the reply to the last submitted prompt, if one has
    /// appeared yet.
    fn response_text(&mut self) -> Result<Option<String>>;

    /// Full page HTML, used to recover code blocks lost in rendering.
    fn page_html(&mut self) -> Result<String>;
}

/// [`ChatSurface`] backed by a Chrome tab
pub struct ChromeChat {
    tab: Arc<Tab>,
    /// Replies already on the page when the prompt was sent
    baseline: usize,
}

impl ChromeChat {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self { tab, baseline: 0 }
    }

    fn eval(&self, js: &str) -> Result<Value> {
        let object = self.tab.evaluate(js, false).browser_ctx("evaluate script")?;
        Ok(object.value.unwrap_or(Value::Null))
    }

    fn response_count(&self) -> Result<usize> {
        let js = format!(
            "document.querySelectorAll({}).length",
            js_string(RESPONSE_CONTAINER_SELECTOR)
        );
        Ok(self.eval(&js)?.as_u64().unwrap_or(0) as usize)
    }
}

impl ChatSurface for ChromeChat {
    fn open(&mut self, url: &Url) -> Result<()> {
        debug!(url = %url, "Navigating");
        self.tab.navigate_to(url.as_str()).browser_ctx("navigate")?;
        self.tab.wait_until_navigated().browser_ctx("wait for navigation")?;
        Ok(())
    }

    fn input_ready(&mut self) -> Result<bool> {
        let js = format!(
            "(() => {{ const el = document.querySelector({}); return !!el && el.offsetParent !== null; }})()",
            js_string(INPUT_SELECTOR)
        );
        Ok(self.eval(&js)?.as_bool().unwrap_or(false))
    }

    fn submit(&mut self, prompt: &str) -> Result<()> {
        self.baseline = self.response_count()?;
        let input = self.tab.find_element(INPUT_SELECTOR).browser_ctx("find prompt input")?;
        input.click().browser_ctx("focus prompt input")?;
        self.tab
            .call_method(Input::InsertText {
                text: prompt.to_string(),
            })
            .browser_ctx("insert prompt")?;
        self.tab.press_key("Enter").browser_ctx("send prompt")?;
        debug!(chars = prompt.len(), baseline = self.baseline, "Prompt submitted");
        Ok(())
    }

    fn is_generating(&mut self) -> Result<bool> {
        let js = format!("!!document.querySelector({})", js_string(STOP_SELECTOR));
        Ok(self.eval(&js)?.as_bool().unwrap_or(false))
    }

    fn response_text(&mut self) -> Result<Option<String>> {
        let js = format!(
            "(() => {{ const els = document.querySelectorAll({}); \
             if (els.length <= {}) return null; \
             return els[els.length - 1].innerText; }})()",
            js_string(RESPONSE_CONTAINER_SELECTOR),
            self.baseline
        );
        Ok(self.eval(&js)?.as_str().map(str::to_string))
    }

    fn page_html(&mut self) -> Result<String> {
        self.tab.get_content().browser_ctx("read page content")
    }
}

/// Quote a Rust string as a JavaScript string literal.
fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string("a'b\"c"), r#""a'b\"c""#);
    }
}
