//! Search pipeline orchestration.
//!
//! Stages run in order on the caller's task: session, form fill, result
//! wait, extraction, selection and report. Each stage is a hard gate, and
//! cancellation is checked at every boundary and raced against every stage.
//! The browser session is released on every exit path.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::collaborators::{
    Interpretation, QueryInterpreter, SummarizedReport, Summarizer, TextSearchOutcome,
};
use crate::extract::ResultExtractor;
use crate::form::FormFiller;
use crate::profile::SiteProfile;
use crate::rank::select;
use crate::report::Report;
use crate::request::SearchRequest;
use crate::session::{SessionHandle, SessionLauncher};
use crate::wait::ResultWaiter;
use crate::{FareError, Result, Stage};

/// Per-search options.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Number of options to select.
    pub candidates: usize,
    /// Attach every extracted option to the report.
    pub include_full_set: bool,
    /// Cancels the whole search once elapsed.
    pub overall_timeout: Option<Duration>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            candidates: 1,
            include_full_set: false,
            overall_timeout: None,
        }
    }
}

impl SearchOptions {
    pub fn with_candidates(mut self, candidates: usize) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_full_set(mut self, include: bool) -> Self {
        self.include_full_set = include;
        self
    }

    pub fn with_overall_timeout(mut self, limit: Duration) -> Self {
        self.overall_timeout = Some(limit);
        self
    }
}

/// Cancellation state of one run.
struct RunGuard {
    token: CancellationToken,
    timed_out: Arc<AtomicBool>,
    limit: Option<Duration>,
    timer: Option<JoinHandle<()>>,
}

impl RunGuard {
    fn new(parent: &CancellationToken, limit: Option<Duration>) -> Self {
        let token = parent.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = limit.map(|limit| {
            let token = token.clone();
            let timed_out = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                timed_out.store(true, Ordering::SeqCst);
                token.cancel();
            })
        });
        Self {
            token,
            timed_out,
            limit,
            timer,
        }
    }

    fn reason(&self) -> String {
        match self.limit {
            Some(limit) if self.timed_out.load(Ordering::SeqCst) => {
                format!("overall timeout of {}ms elapsed", limit.as_millis())
            }
            _ => "cancelled by caller".to_string(),
        }
    }

    fn check(&self, stage: Stage) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(FareError::aborted(stage, self.reason()));
        }
        Ok(())
    }

    /// Runs one stage, racing it against cancellation.
    async fn stage<T>(&self, stage: Stage, work: impl Future<Output = Result<T>>) -> Result<T> {
        self.check(stage)?;
        debug!("Entering {} stage", stage);
        let output = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(FareError::aborted(stage, self.reason())),
            output = work => output.map_err(|e| e.within(stage))?,
        };
        self.check(stage)?;
        Ok(output)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Fare search engine bound to one site profile.
pub struct FareSearch {
    profile: SiteProfile,
    launcher: Arc<dyn SessionLauncher>,
    form: FormFiller,
    extractor: ResultExtractor,
    clock: Arc<dyn Clock>,
    navigation_timeout: Duration,
}

impl FareSearch {
    /// Creates an engine, validating the profile and compiling its locators.
    pub fn new(profile: SiteProfile, launcher: Arc<dyn SessionLauncher>) -> Result<Self> {
        profile.validate()?;
        let form = FormFiller::new(&profile)?;
        let extractor = ResultExtractor::new(&profile.results)?;
        Ok(Self {
            profile,
            launcher,
            form,
            extractor,
            clock: Arc::new(SystemClock),
            navigation_timeout: Duration::from_secs(30),
        })
    }

    /// Sets the clock used for waiting and timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the per-navigation timeout.
    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Runs the full pipeline for a validated request.
    pub async fn search(
        &self,
        request: &SearchRequest,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Report> {
        let run = RunGuard::new(cancel, options.overall_timeout);
        info!(
            "Searching {} {} -> {} departing {}",
            self.profile.name,
            request.origin(),
            request.destination(),
            request.departure()
        );

        // Launch is not raced: a dropped launch future would orphan the browser.
        run.check(Stage::Session)?;
        let session = SessionHandle::acquire(self.launcher.as_ref(), self.navigation_timeout).await?;
        if let Err(e) = run.check(Stage::Session) {
            session.release().await;
            warn!("Search failed: {}", e);
            return Err(e);
        }
        let outcome = self.run_stages(&session, request, options, &run).await;
        session.release().await;

        match &outcome {
            Ok(report) => info!(
                "Search finished: {} of {} options selected",
                report.options.len(),
                report.available
            ),
            Err(e) => warn!("Search failed: {}", e),
        }
        outcome
    }

    async fn run_stages(
        &self,
        session: &SessionHandle,
        request: &SearchRequest,
        options: &SearchOptions,
        run: &RunGuard,
    ) -> Result<Report> {
        let clock = self.clock.as_ref();

        if !self.form.uses_deep_link() {
            run.stage(Stage::Session, session.navigate(&self.profile.base_url))
                .await?;
        }
        run.stage(Stage::FormFill, self.form.fill(session, request, clock))
            .await?;

        let waiter = ResultWaiter::new(&self.extractor, &self.profile.wait, clock);
        let timeout = Duration::from_millis(self.profile.wait.timeout_ms);
        run.stage(Stage::Wait, waiter.await_results(session.page(), timeout))
            .await?;

        let results = run
            .stage(Stage::Extract, self.extractor.extract(session.page(), clock))
            .await?;

        run.check(Stage::Select)?;
        let selection = select(&results, options.candidates)?;

        run.check(Stage::Report)?;
        let full_set = options.include_full_set.then_some(results);
        Ok(Report::build(request, selection, full_set)
            .with_site(self.profile.name.clone())
            .generated_at(clock.wall()))
    }

    /// Interprets free text, then searches if the query was complete.
    pub async fn search_text(
        &self,
        interpreter: &dyn QueryInterpreter,
        text: &str,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<TextSearchOutcome> {
        match interpreter.interpret(text).await? {
            Interpretation::Ready(request) => {
                let report = self.search(&request, options, cancel).await?;
                Ok(TextSearchOutcome::Report(Box::new(report)))
            }
            Interpretation::NeedsInfo { question } => {
                debug!("Interpreter asked a follow-up question");
                Ok(TextSearchOutcome::FollowUp(question))
            }
        }
    }

    /// Searches, then hands the report to a summarizer.
    pub async fn search_and_summarize(
        &self,
        request: &SearchRequest,
        options: &SearchOptions,
        cancel: &CancellationToken,
        summarizer: &dyn Summarizer,
    ) -> Result<SummarizedReport> {
        let report = self.search(request, options, cancel).await?;
        let summary = summarizer.summarize(&report).await?;
        Ok(SummarizedReport { report, summary })
    }
}
