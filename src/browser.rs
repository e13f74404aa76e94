//! Chrome/Chromium session driver.
//!
//! This module is only available when the `headless` Cargo feature is enabled.
//! It launches one browser process per session and drives a single tab via
//! the Chrome DevTools Protocol.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::session::{PageDriver, SessionLauncher};
use crate::{FareError, Result};

/// Upper bound for each shutdown step of a session.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Browser launch configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Whether to run the browser in headless mode.
    pub headless: bool,
    /// Path to the Chrome/Chromium executable. If `None`, auto-detected.
    pub chrome_path: Option<PathBuf>,
    /// Proxy URL for the browser to use.
    pub proxy_url: Option<String>,
    /// Additional launch arguments for Chrome.
    pub launch_args: Vec<String>,
    /// User agent; defaults to a desktop Chrome string.
    pub user_agent: Option<String>,
    pub window_size: (u32, u32),
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            proxy_url: None,
            launch_args: Vec::new(),
            user_agent: None,
            window_size: (1366, 900),
        }
    }
}

/// Launches Chrome sessions.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    config: SessionConfig,
}

impl ChromeLauncher {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn browser_config(&self) -> Result<BrowserConfig> {
        let config = &self.config;
        let mut builder = BrowserConfig::builder();

        if config.headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        let chrome_path = match &config.chrome_path {
            Some(path) => path.clone(),
            None => crate::browser_setup::detect_chrome().ok_or_else(|| {
                FareError::Browser(
                    "Chrome/Chromium not found; install it or set the CHROME variable".to_string(),
                )
            })?,
        };
        debug!("Using Chrome at: {}", chrome_path.display());
        builder = builder.chrome_executable(chrome_path);

        let (width, height) = config.window_size;
        builder = builder
            .window_size(width, height)
            .arg(format!(
                "--user-agent={}",
                config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
            ))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run");

        if let Some(ref proxy) = config.proxy_url {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }
        for arg in &config.launch_args {
            builder = builder.arg(arg);
        }

        builder
            .build()
            .map_err(|e| FareError::Browser(format!("Failed to build browser config: {}", e)))
    }
}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>> {
        debug!("Launching browser (headless: {})", self.config.headless);
        let (browser, mut handler) = Browser::launch(self.browser_config()?)
            .await
            .map_err(|e| FareError::Browser(format!("Failed to launch browser: {}", e)))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("Browser CDP handler error: {}", e);
                }
            }
            debug!("Browser CDP handler exited");
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(FareError::Browser(format!("Failed to open tab: {}", e)));
            }
        };

        Ok(Box::new(ChromePage {
            page,
            browser: Mutex::new(Some(browser)),
            handler,
        }))
    }
}

/// One tab of a launched browser.
pub struct ChromePage {
    page: Page,
    browser: Mutex<Option<Browser>>,
    handler: JoinHandle<()>,
}

impl ChromePage {
    async fn element(&self, css: &str) -> Result<chromiumoxide::element::Element> {
        self.page
            .find_element(css)
            .await
            .map_err(|e| FareError::Browser(format!("Element '{}' not found: {}", css, e)))
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| FareError::Browser(format!("Navigation failed: {}", e)))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| FareError::Browser(format!("Navigation wait failed: {}", e)))?;
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| FareError::Browser(format!("Failed to get page content: {}", e)))
    }

    async fn click(&self, css: &str) -> Result<()> {
        self.element(css)
            .await?
            .click()
            .await
            .map_err(|e| FareError::Browser(format!("Click on '{}' failed: {}", css, e)))?;
        Ok(())
    }

    async fn fill(&self, css: &str, text: &str) -> Result<()> {
        let element = self.element(css).await?;
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(|e| FareError::Browser(format!("Clearing '{}' failed: {}", css, e)))?;
        element
            .focus()
            .await
            .map_err(|e| FareError::Browser(format!("Focusing '{}' failed: {}", css, e)))?;
        element
            .type_str(text)
            .await
            .map_err(|e| FareError::Browser(format!("Typing into '{}' failed: {}", css, e)))?;
        // Autocomplete lists render after the last keystroke.
        tokio::time::sleep(Duration::from_millis(400)).await;
        Ok(())
    }

    async fn press_enter(&self, css: &str) -> Result<()> {
        self.element(css)
            .await?
            .press_key("Enter")
            .await
            .map_err(|e| FareError::Browser(format!("Key press on '{}' failed: {}", css, e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        match timeout(CLOSE_TIMEOUT, self.page.clone().close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to close browser tab: {}", e),
            Err(_) => warn!("Closing browser tab timed out after {:?}", CLOSE_TIMEOUT),
        }
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            let closed = match timeout(CLOSE_TIMEOUT, browser.close()).await {
                Ok(result) => result
                    .map(|_| ())
                    .map_err(|e| FareError::Browser(format!("Failed to close browser: {}", e))),
                Err(_) => Err(FareError::Browser(format!(
                    "Closing browser timed out after {:?}",
                    CLOSE_TIMEOUT
                ))),
            };
            match timeout(CLOSE_TIMEOUT, browser.wait()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Browser process did not exit cleanly: {}", e),
                Err(_) => {
                    warn!("Browser process still running after {:?}, killing it", CLOSE_TIMEOUT);
                    if let Some(Err(e)) = browser.kill().await {
                        warn!("Failed to kill browser process: {}", e);
                    }
                }
            }
            self.handler.abort();
            closed?;
            debug!("Browser shut down");
        }
        Ok(())
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        self.handler.abort();
    }
}
