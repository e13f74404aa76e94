//! Result waiter: decides when asynchronous result rendering has settled.
//!
//! Each poll takes a snapshot of the page and reduces it to a
//! [`ResultSample`]. A [`StabilityMonitor`] folds samples into a [`WaitState`];
//! the waiter sleeps with exponential backoff between polls until the state
//! is stable or the deadline passes.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::extract::ResultExtractor;
use crate::profile::WaitConfig;
use crate::session::PageDriver;
use crate::{FareError, Result, Stage};

/// What one snapshot of the result page shows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultSample {
    /// A loading indicator is visible.
    pub loading: bool,
    /// The explicit "no flights" indicator is visible.
    pub no_results: bool,
    /// The page is a bot check rather than a result page.
    pub blocked: bool,
    /// Number of candidate records.
    pub result_count: usize,
    /// Hash of the candidate records' text.
    pub fingerprint: u64,
}

impl ResultSample {
    fn is_terminal(&self) -> bool {
        self.no_results || self.blocked
    }
}

/// State of the stability monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitState {
    /// Still sampling. `streak` counts consecutive identical samples.
    Polling { polls: u32, streak: u32 },
    /// Results settled; holds the last sample.
    Stable(ResultSample),
    /// The deadline passed without a stable sample.
    TimedOut { polls: u32, waited: Duration },
}

/// Folds samples into a [`WaitState`] and computes poll delays.
#[derive(Debug)]
pub struct StabilityMonitor {
    started: Instant,
    timeout: Duration,
    initial_interval: Duration,
    max_interval: Duration,
    backoff_factor: f64,
    stable_samples: u32,
    polls: u32,
    streak: u32,
    last: Option<(usize, u64)>,
    state: WaitState,
}

impl StabilityMonitor {
    pub fn new(config: &WaitConfig, timeout: Duration, started: Instant) -> Self {
        Self {
            started,
            timeout,
            initial_interval: Duration::from_millis(config.initial_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms.max(config.initial_interval_ms)),
            backoff_factor: config.backoff_factor.max(1.0),
            stable_samples: config.stable_samples.max(1),
            polls: 0,
            streak: 0,
            last: None,
            state: WaitState::Polling { polls: 0, streak: 0 },
        }
    }

    pub fn state(&self) -> &WaitState {
        &self.state
    }

    /// Records one sample taken at `now`.
    pub fn observe(&mut self, sample: ResultSample, now: Instant) -> &WaitState {
        if matches!(self.state, WaitState::Stable(_) | WaitState::TimedOut { .. }) {
            return &self.state;
        }
        self.polls += 1;

        if sample.loading {
            self.streak = 0;
            self.last = None;
        } else if sample.is_terminal() {
            self.state = WaitState::Stable(sample);
            return &self.state;
        } else if sample.result_count > 0 {
            let key = (sample.result_count, sample.fingerprint);
            self.streak = if self.last == Some(key) { self.streak + 1 } else { 1 };
            self.last = Some(key);
            if self.streak >= self.stable_samples {
                self.state = WaitState::Stable(sample);
                return &self.state;
            }
        } else {
            self.streak = 0;
            self.last = None;
        }

        let waited = now.saturating_duration_since(self.started);
        self.state = if waited >= self.timeout {
            WaitState::TimedOut {
                polls: self.polls,
                waited,
            }
        } else {
            WaitState::Polling {
                polls: self.polls,
                streak: self.streak,
            }
        };
        &self.state
    }

    /// Delay before the next poll: `initial × factor^(polls-1)`, capped by
    /// the maximum interval and by the time left before the deadline.
    pub fn next_delay(&self, now: Instant) -> Duration {
        let exponent = self.polls.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_interval.as_secs_f64() * self.backoff_factor.powi(exponent);
        let interval = Duration::try_from_secs_f64(scaled)
            .unwrap_or(self.max_interval)
            .min(self.max_interval);
        interval.min(self.remaining(now))
    }

    /// Time left before the deadline.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.timeout
            .saturating_sub(now.saturating_duration_since(self.started))
    }

    /// Bound for one snapshot: the time left, but at least one poll interval
    /// so the sample taken at the deadline still gets a chance to complete.
    fn snapshot_bound(&self, now: Instant) -> Duration {
        self.remaining(now).max(self.initial_interval)
    }
}

/// Polls a page until its results are stable.
pub struct ResultWaiter<'a> {
    extractor: &'a ResultExtractor,
    config: &'a WaitConfig,
    clock: &'a dyn Clock,
}

impl<'a> ResultWaiter<'a> {
    pub fn new(extractor: &'a ResultExtractor, config: &'a WaitConfig, clock: &'a dyn Clock) -> Self {
        Self {
            extractor,
            config,
            clock,
        }
    }

    /// Waits up to `timeout` for the result list to settle.
    ///
    /// Returns the stable sample. Fails with [`FareError::Timeout`], also when
    /// a snapshot hangs, or with [`FareError::Extraction`] when the page never
    /// showed a single result record nor a loading indicator.
    pub async fn await_results(&self, page: &dyn PageDriver, timeout: Duration) -> Result<ResultSample> {
        let started = self.clock.now();
        let mut monitor = StabilityMonitor::new(self.config, timeout, started);
        loop {
            let bound = monitor.snapshot_bound(self.clock.now());
            let html = tokio::select! {
                biased;
                html = page.content() => html.map_err(|e| e.within(Stage::Wait))?,
                _ = self.clock.sleep(bound) => {
                    let waited = self.clock.now().saturating_duration_since(started);
                    warn!("Result snapshot did not complete within {}ms", bound.as_millis());
                    return Err(FareError::Timeout {
                        waited_ms: waited.as_millis() as u64,
                        polls: monitor.polls,
                    });
                }
            };
            let sample = self.extractor.sample(&html);
            let now = self.clock.now();
            debug!(
                "Result sample: loading={} no_results={} blocked={} count={}",
                sample.loading, sample.no_results, sample.blocked, sample.result_count
            );
            let unrecognized = !sample.loading && sample.result_count == 0;
            match monitor.observe(sample, now).clone() {
                WaitState::Stable(sample) => {
                    debug!("Results stable after {} polls", monitor.polls);
                    return Ok(sample);
                }
                WaitState::TimedOut { waited, .. } if unrecognized => {
                    return Err(FareError::Extraction(format!(
                        "no result records recognized within {}ms",
                        waited.as_millis()
                    )));
                }
                WaitState::TimedOut { polls, waited } => {
                    return Err(FareError::Timeout {
                        waited_ms: waited.as_millis() as u64,
                        polls,
                    });
                }
                WaitState::Polling { .. } => {}
            }
            self.clock.sleep(monitor.next_delay(now)).await;
        }
    }
}
