//! Browser session abstraction.
//!
//! The engine never talks to a browser directly. It acts through a
//! [`PageDriver`] obtained from a [`SessionLauncher`], wrapped in a
//! [`SessionHandle`] that owns the session for one pipeline run.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{FareError, Result};

/// Operations the engine needs from a live browser page.
///
/// Element arguments are CSS selectors, usually absolute paths produced by
/// [`crate::locator::css_path`] from a snapshot of [`PageDriver::content`].
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigates to `url` and waits for the load event.
    async fn goto(&self, url: &str) -> Result<()>;

    /// Returns the current rendered HTML.
    async fn content(&self) -> Result<String>;

    /// Clicks the element matching `css`.
    async fn click(&self, css: &str) -> Result<()>;

    /// Clears the input matching `css` and types `text` into it.
    async fn fill(&self, css: &str, text: &str) -> Result<()>;

    /// Sends an Enter key press to the element matching `css`.
    async fn press_enter(&self, css: &str) -> Result<()>;

    /// Closes the page and its browser.
    async fn close(&self) -> Result<()>;
}

/// Starts browser sessions.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageDriver>>;
}

/// Exclusive ownership of one browser session.
///
/// Not `Clone`: a session serves a single pipeline at a time. Call
/// [`SessionHandle::release`] on every exit path.
pub struct SessionHandle {
    page: Box<dyn PageDriver>,
    navigation_timeout: Duration,
    released: bool,
}

impl SessionHandle {
    /// Launches a session.
    pub async fn acquire(
        launcher: &dyn SessionLauncher,
        navigation_timeout: Duration,
    ) -> Result<Self> {
        let page = launcher.launch().await.map_err(|e| match e {
            FareError::Browser(reason) => FareError::Session(reason),
            other => other,
        })?;
        debug!("Browser session acquired");
        Ok(Self {
            page,
            navigation_timeout,
            released: false,
        })
    }

    /// Loads `url`, failing with a session error on timeout.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        debug!("Navigating to {}", url);
        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(result) => result.map_err(|e| match e {
                FareError::Browser(reason) => {
                    FareError::Session(format!("navigation to {} failed: {}", url, reason))
                }
                other => other,
            }),
            Err(_) => Err(FareError::Session(format!(
                "navigation to {} timed out after {}ms",
                url,
                self.navigation_timeout.as_millis()
            ))),
        }
    }

    /// Returns the page driver.
    pub fn page(&self) -> &dyn PageDriver {
        self.page.as_ref()
    }

    /// Closes the session. Consumes the handle, so it runs at most once.
    ///
    /// Bounded by the navigation timeout; a driver that does not close in
    /// time is abandoned with a warning.
    pub async fn release(mut self) {
        self.released = true;
        match tokio::time::timeout(self.navigation_timeout, self.page.close()).await {
            Ok(Ok(())) => debug!("Browser session released"),
            Ok(Err(e)) => warn!("Failed to close browser session cleanly: {}", e),
            Err(_) => warn!(
                "Browser session did not close within {}ms",
                self.navigation_timeout.as_millis()
            ),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if !self.released {
            warn!("Browser session dropped without release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedLauncher, ScriptedPage};

    #[tokio::test]
    async fn test_acquire_and_release_once() {
        let launcher = ScriptedLauncher::new(ScriptedPage::new("<html></html>"));
        let handle = SessionHandle::acquire(&launcher, Duration::from_secs(1))
            .await
            .unwrap();
        handle.navigate("https://example.com/").await.unwrap();
        handle.release().await;

        assert_eq!(launcher.launches(), 1);
        assert_eq!(launcher.closes(), 1);
        assert_eq!(launcher.visited(), vec!["https://example.com/".to_string()]);
    }

    #[tokio::test]
    async fn test_launch_failure_is_session_error() {
        let launcher = ScriptedLauncher::failing("chrome not found");
        let result = SessionHandle::acquire(&launcher, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(FareError::Session(ref r)) if r.contains("chrome not found")));
        assert_eq!(launcher.closes(), 0);
    }

    #[tokio::test]
    async fn test_release_is_bounded_when_close_hangs() {
        let page = ScriptedPage::new("<html></html>").with_close_delay(Duration::from_secs(3600));
        let launcher = ScriptedLauncher::new(page);
        let handle = SessionHandle::acquire(&launcher, Duration::from_millis(20))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        tokio::time::timeout(Duration::from_secs(5), handle.release())
            .await
            .expect("release must not wait on a hung close");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(launcher.closes(), 0);
    }

    #[tokio::test]
    async fn test_navigation_timeout_is_session_error() {
        let page = ScriptedPage::new("<html></html>").with_navigation_delay(Duration::from_secs(5));
        let launcher = ScriptedLauncher::new(page);
        let handle = SessionHandle::acquire(&launcher, Duration::from_millis(20))
            .await
            .unwrap();
        let err = handle.navigate("https://example.com/").await.unwrap_err();
        assert!(matches!(err, FareError::Session(ref r) if r.contains("timed out")));
        handle.release().await;
        assert_eq!(launcher.closes(), 1);
    }
}
