//! Persistent browser profiles.
//!
//! The agent login lives in the browser's user-data directory, so it is kept
//! between runs. Each browser channel gets its own directory.

use crate::config::BrowserChannel;
use crate::error::{Result, ScreenError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default profile location: `~/.rustscreen/<browser>_profile`
fn default_profile_path(channel: BrowserChannel) -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".rustscreen").join(format!("{}_profile", channel.as_str())))
        .ok_or_else(|| ScreenError::Config("Cannot determine home directory".to_string()))
}

/// Browser user-data directory holding the agent login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserProfile {
    path: PathBuf,
}

impl BrowserProfile {
    /// Profile for `channel` under the home directory
    pub fn for_channel(channel: BrowserChannel) -> Result<Self> {
        Ok(Self {
            path: default_profile_path(channel)?,
        })
    }

    /// Profile for `channel`, falling back to `<browser>_profile_screening`
    /// in the working directory when there is no home directory.
    pub fn for_channel_or_local(channel: BrowserChannel) -> Self {
        Self::for_channel(channel).unwrap_or_else(|_| Self {
            path: PathBuf::from(format!("{}_profile_screening", channel.as_str())),
        })
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// Create the directory if needed.
    pub fn ensure(&self) -> Result<()> {
        if !self.exists() {
            std::fs::create_dir_all(&self.path)?;
            info!(path = %self.path.display(), "Created browser profile");
        } else {
            debug!(path = %self.path.display(), "Reusing browser profile");
        }
        Ok(())
    }

    /// Delete the profile, logging the user out of the agent.
    pub fn clear(&self) -> Result<()> {
        if self.exists() {
            std::fs::remove_dir_all(&self.path)?;
            info!(path = %self.path.display(), "Cleared browser profile");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_path_per_channel() {
        let chrome = BrowserProfile::for_channel_or_local(BrowserChannel::Chrome);
        let edge = BrowserProfile::for_channel_or_local(BrowserChannel::Msedge);
        assert_ne!(chrome, edge);
        assert!(chrome.path().to_string_lossy().contains("chrome_profile"));
        assert!(edge.path().to_string_lossy().contains("msedge_profile"));
    }

    #[test]
    fn test_ensure_and_clear() -> Result<()> {
        let dir = TempDir::new()?;
        let profile = BrowserProfile::with_path(dir.path().join("nested").join("chrome_profile"));
        assert!(!profile.exists());

        profile.ensure()?;
        assert!(profile.exists());
        std::fs::write(profile.path().join("Cookies"), "x")?;
        profile.ensure()?;
        assert!(profile.path().join("Cookies").exists());

        profile.clear()?;
        assert!(!profile.exists());
        // clearing twice is fine
        profile.clear()?;
        Ok(())
    }
}
