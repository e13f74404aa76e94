//! Scriptable in-memory browser for tests.
//!
//! [`ScriptedPage`] serves HTML snapshots, switches snapshots when an element
//! matching a trigger selector is clicked, and records every interaction.
//! Clones share state, so a test can keep one clone for inspection while the
//! engine drives another.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;

use crate::session::{PageDriver, SessionLauncher};
use crate::{FareError, Result};

/// One recorded interaction. Targets are element ids when present,
/// otherwise the selector that was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    Click(String),
    Fill { target: String, text: String },
    Enter(String),
}

type FrameFn = Box<dyn Fn(usize) -> String + Send + Sync>;

struct PageState {
    current: String,
    frames: VecDeque<String>,
    evolving: Option<FrameFn>,
    transitions: Vec<(Selector, String)>,
    failing_clicks: Vec<Selector>,
    on_navigate: Option<String>,
    visited: Vec<String>,
    interactions: Vec<Interaction>,
    content_calls: usize,
    cancel_at: Option<(usize, CancellationToken)>,
}

/// An in-memory page driven by scripted HTML.
#[derive(Clone)]
pub struct ScriptedPage {
    state: Arc<Mutex<PageState>>,
    closes: Arc<AtomicUsize>,
    navigation_delay: Duration,
    close_delay: Duration,
}

impl ScriptedPage {
    /// Creates a page that always shows `html`.
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(PageState {
                current: html.into(),
                frames: VecDeque::new(),
                evolving: None,
                transitions: Vec::new(),
                failing_clicks: Vec::new(),
                on_navigate: None,
                visited: Vec::new(),
                interactions: Vec::new(),
                content_calls: 0,
                cancel_at: None,
            })),
            closes: Arc::new(AtomicUsize::new(0)),
            navigation_delay: Duration::ZERO,
            close_delay: Duration::ZERO,
        }
    }

    /// Serves `frames` one per `content()` call, then keeps the last one.
    pub fn with_frames(self, frames: Vec<String>) -> Self {
        self.lock().frames = frames.into();
        self
    }

    /// Renders every `content()` call with `frame(call_index)`.
    pub fn evolving(self, frame: impl Fn(usize) -> String + Send + Sync + 'static) -> Self {
        self.lock().evolving = Some(Box::new(frame));
        self
    }

    /// Switches to `html` when an element matching `trigger` is clicked.
    pub fn on_click(self, trigger: &str, html: impl Into<String>) -> Self {
        if let Ok(selector) = Selector::parse(trigger) {
            self.lock().transitions.push((selector, html.into()));
        }
        self
    }

    /// Makes clicks on elements matching `css` fail, as with an
    /// intercepted or detached node.
    pub fn failing_click(self, css: &str) -> Self {
        if let Ok(selector) = Selector::parse(css) {
            self.lock().failing_clicks.push(selector);
        }
        self
    }

    /// Switches to `html` after each navigation.
    pub fn on_navigate(self, html: impl Into<String>) -> Self {
        self.lock().on_navigate = Some(html.into());
        self
    }

    /// Delays every navigation.
    pub fn with_navigation_delay(mut self, delay: Duration) -> Self {
        self.navigation_delay = delay;
        self
    }

    /// Delays every close, as with a browser that is slow to exit.
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    /// Cancels `token` while serving the `call`-th (one-based) `content()` call.
    pub fn cancel_on_content_call(self, call: usize, token: CancellationToken) -> Self {
        self.lock().cancel_at = Some((call, token));
        self
    }

    pub fn interactions(&self) -> Vec<Interaction> {
        self.lock().interactions.clone()
    }

    pub fn visited(&self) -> Vec<String> {
        self.lock().visited.clone()
    }

    pub fn content_calls(&self) -> usize {
        self.lock().content_calls
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolves `css` in the current snapshot. Returns the interaction target
    /// label and the html of the first matching transition, if any. Fails
    /// when the element is missing or rejects clicks and `clicking` is set.
    fn resolve(state: &PageState, css: &str, clicking: bool) -> Result<(String, Option<String>)> {
        let selector = Selector::parse(css)
            .map_err(|e| FareError::Browser(format!("invalid selector '{}': {:?}", css, e)))?;
        let document = Html::parse_document(&state.current);
        let element = document
            .select(&selector)
            .next()
            .ok_or_else(|| FareError::Browser(format!("no element matches '{}'", css)))?;
        if clicking && state.failing_clicks.iter().any(|s| s.matches(&element)) {
            return Err(FareError::Browser(format!("click on '{}' was intercepted", css)));
        }
        let target = element
            .value()
            .id()
            .map(str::to_string)
            .unwrap_or_else(|| css.to_string());
        let next = state
            .transitions
            .iter()
            .find(|(trigger, _)| trigger.matches(&element))
            .map(|(_, html)| html.clone());
        Ok((target, next))
    }
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn goto(&self, url: &str) -> Result<()> {
        if !self.navigation_delay.is_zero() {
            tokio::time::sleep(self.navigation_delay).await;
        }
        let mut state = self.lock();
        state.visited.push(url.to_string());
        if let Some(html) = state.on_navigate.clone() {
            state.current = html;
        }
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        let mut state = self.lock();
        let index = state.content_calls;
        state.content_calls += 1;
        if let Some(frame) = &state.evolving {
            state.current = frame(index);
        } else if let Some(next) = state.frames.pop_front() {
            state.current = next;
        }
        if let Some((call, token)) = &state.cancel_at {
            if *call == index + 1 {
                token.cancel();
            }
        }
        Ok(state.current.clone())
    }

    async fn click(&self, css: &str) -> Result<()> {
        let mut state = self.lock();
        let (target, next) = Self::resolve(&state, css, true)?;
        state.interactions.push(Interaction::Click(target));
        if let Some(html) = next {
            state.current = html;
        }
        Ok(())
    }

    async fn fill(&self, css: &str, text: &str) -> Result<()> {
        let mut state = self.lock();
        let (target, _) = Self::resolve(&state, css, false)?;
        state.interactions.push(Interaction::Fill {
            target,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn press_enter(&self, css: &str) -> Result<()> {
        let mut state = self.lock();
        let (target, _) = Self::resolve(&state, css, false)?;
        state.interactions.push(Interaction::Enter(target));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Launcher handing out clones of one [`ScriptedPage`].
pub struct ScriptedLauncher {
    page: ScriptedPage,
    failure: Option<String>,
    launches: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn new(page: ScriptedPage) -> Self {
        Self {
            page,
            failure: None,
            launches: AtomicUsize::new(0),
        }
    }

    /// A launcher whose every launch fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            page: ScriptedPage::new(""),
            failure: Some(reason.into()),
            launches: AtomicUsize::new(0),
        }
    }

    pub fn page(&self) -> &ScriptedPage {
        &self.page
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.page.closes()
    }

    pub fn visited(&self) -> Vec<String> {
        self.page.visited()
    }
}

#[async_trait]
impl SessionLauncher for ScriptedLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>> {
        if let Some(reason) = &self.failure {
            return Err(FareError::Browser(reason.clone()));
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.page.clone()))
    }
}
