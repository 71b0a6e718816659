//! Custom error types for rustscreen.
//!
//! This module defines all error types used throughout the library.
//! All functions return `Result<T, ScreenError>` instead of using `unwrap()`.

use thiserror::Error;

/// Main error type for rustscreen operations.
///
/// Uses `thiserror` for ergonomic error handling and automatic `Display` implementation.
#[derive(Debug, Error)]
pub enum ScreenError {
    /// Unsupported or malformed criteria/citation file
    #[error("Format error: {0}")]
    Format(String),

    /// Interactive login was not completed within the allowed wait
    #[error(
        "Login not completed within {waited_secs}s. Log in to the AI agent manually in the opened browser window, then re-run"
    )]
    AuthenticationTimeout {
        /// Seconds spent waiting for the input surface
        waited_secs: u64,
    },

    /// The agent response never stabilized before the deadline
    #[error("AI response did not stabilize within {waited_secs}s ({} characters received)", partial.len())]
    GenerationTimeout {
        /// Seconds spent waiting for a stable response
        waited_secs: u64,
        /// Text captured before the deadline, kept for diagnosis
        partial: String,
    },

    /// No usable block could be isolated from the agent response
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Browser automation error (Chrome DevTools Protocol)
    #[error("Browser error: {0}")]
    Browser(String),

    /// Decision table or criteria failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias using `ScreenError`
pub type Result<T> = std::result::Result<T, ScreenError>;

impl From<zip::result::ZipError> for ScreenError {
    fn from(e: zip::result::ZipError) -> Self {
        ScreenError::Format(format!("Invalid document archive: {}", e))
    }
}

impl From<quick_xml::Error> for ScreenError {
    fn from(e: quick_xml::Error) -> Self {
        ScreenError::Format(format!("Invalid document XML: {}", e))
    }
}

/// Extension trait for turning foreign browser errors into `ScreenError`
pub trait BrowserResultExt<T> {
    /// Map the error into `ScreenError::Browser` with a short context prefix
    fn browser_ctx(self, what: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> BrowserResultExt<T> for std::result::Result<T, E> {
    fn browser_ctx(self, what: &str) -> Result<T> {
        self.map_err(|e| ScreenError::Browser(format!("{}: {}", what, e)))
    }
}
