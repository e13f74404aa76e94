//! Site profile: everything the engine knows about the target site.
//!
//! A profile is plain data. Locators, timings and entry mode can be changed
//! from a JSON file to absorb layout drift without touching code.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::locator::LocatorSpec;
use crate::{FareError, Result, SearchRequest};

/// How the engine reaches the result page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EntryMode {
    /// Fill in and submit the search form.
    #[default]
    Form,
    /// Navigate straight to a templated results URL.
    ///
    /// Placeholders: `{origin}`, `{destination}`, `{departure}` and
    /// `{return_segment}` (`/<date>` for round trips, empty otherwise).
    DeepLink { template: String },
}

/// How dates are entered on the form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DateEntry {
    /// Type the formatted date into the field.
    Typed {
        /// chrono format string, e.g. `%m/%d/%Y`.
        format: String,
    },
    /// Open the date picker and page forward until the day is shown.
    Calendar {
        /// CSS template for a day cell; `{date}` is replaced with the date
        /// formatted by `day_format`.
        day_cell_css: String,
        day_format: String,
        next_month: LocatorSpec,
        #[serde(default = "default_max_month_steps")]
        max_month_steps: u32,
    },
}

fn default_max_month_steps() -> u32 {
    13
}

impl Default for DateEntry {
    fn default() -> Self {
        DateEntry::Typed {
            format: "%Y-%m-%d".to_string(),
        }
    }
}

/// Locators for the search form controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormLocators {
    /// Opens the trip type menu, when the options are hidden behind one.
    #[serde(default)]
    pub trip_menu: Option<LocatorSpec>,
    pub one_way: LocatorSpec,
    pub round_trip: LocatorSpec,
    pub origin: LocatorSpec,
    pub destination: LocatorSpec,
    pub departure_date: LocatorSpec,
    pub return_date: LocatorSpec,
    pub submit: LocatorSpec,
    /// Removes a prefilled airport before typing, when present.
    #[serde(default)]
    pub clear_selection: Option<LocatorSpec>,
    /// Autocomplete suggestion clicked after typing an airport code.
    #[serde(default)]
    pub suggestion: Option<LocatorSpec>,
    #[serde(default)]
    pub date_entry: DateEntry,
}

/// An interstitial overlay and the ordered strategies that dismiss it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayRule {
    pub name: String,
    pub detect: LocatorSpec,
    pub dismiss: Vec<LocatorSpec>,
}

/// Locators and policies for the result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultLocators {
    /// One match per candidate record.
    pub item: LocatorSpec,
    pub price: LocatorSpec,
    #[serde(default)]
    pub airline: Option<LocatorSpec>,
    #[serde(default)]
    pub departure_time: Option<LocatorSpec>,
    #[serde(default)]
    pub arrival_time: Option<LocatorSpec>,
    #[serde(default)]
    pub duration: Option<LocatorSpec>,
    #[serde(default)]
    pub stops: Option<LocatorSpec>,
    #[serde(default)]
    pub layovers: Option<LocatorSpec>,
    /// Explicit "no flights found" indicator.
    pub no_results: LocatorSpec,
    /// Present while results are still loading.
    #[serde(default)]
    pub loading: Option<LocatorSpec>,
    /// Attribute carrying a site-issued record id.
    #[serde(default)]
    pub id_attribute: Option<String>,
    /// Currency assumed when a price carries no marker.
    #[serde(default = "default_currency")]
    pub default_currency: String,
    /// Fewer parsed records than this marks the set partial.
    #[serde(default)]
    pub min_expected_results: usize,
    /// Page substrings that identify a bot-check or captcha page.
    #[serde(default = "default_block_markers")]
    pub block_markers: Vec<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_block_markers() -> Vec<String> {
    vec!["captcha".to_string(), "/sorry/index".to_string()]
}

/// Timing of the result waiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default = "default_wait_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Consecutive identical samples required for a stable state.
    #[serde(default = "default_stable_samples")]
    pub stable_samples: u32,
}

fn default_wait_timeout() -> u64 {
    45_000
}

fn default_initial_interval() -> u64 {
    250
}

fn default_max_interval() -> u64 {
    4_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_stable_samples() -> u32 {
    2
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_wait_timeout(),
            initial_interval_ms: default_initial_interval(),
            max_interval_ms: default_max_interval(),
            backoff_factor: default_backoff_factor(),
            stable_samples: default_stable_samples(),
        }
    }
}

/// Complete description of the target site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteProfile {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub entry: EntryMode,
    pub form: FormLocators,
    #[serde(default)]
    pub overlays: Vec<OverlayRule>,
    #[serde(default = "default_dismiss_attempts")]
    pub max_dismiss_attempts: u32,
    #[serde(default = "default_overlay_retry")]
    pub overlay_retry_interval_ms: u64,
    pub results: ResultLocators,
    #[serde(default)]
    pub wait: WaitConfig,
}

fn default_dismiss_attempts() -> u32 {
    3
}

fn default_overlay_retry() -> u64 {
    300
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self::kayak()
    }
}

impl SiteProfile {
    /// Built-in profile for kayak.com.
    pub fn kayak() -> Self {
        Self {
            name: "Kayak".to_string(),
            base_url: "https://www.kayak.com/flights".to_string(),
            entry: EntryMode::Form,
            form: FormLocators {
                trip_menu: Some(LocatorSpec::first_of(vec![
                    LocatorSpec::css("[aria-label*=\"Trip type\"]"),
                    LocatorSpec::css("[class*=\"trip-type\"] [role=\"button\"]"),
                ])),
                one_way: LocatorSpec::first_of(vec![
                    LocatorSpec::role("option", "One-way"),
                    LocatorSpec::text("One-way"),
                ]),
                round_trip: LocatorSpec::first_of(vec![
                    LocatorSpec::role("option", "Round-trip"),
                    LocatorSpec::text("Round-trip"),
                ]),
                origin: LocatorSpec::first_of(vec![
                    LocatorSpec::role("combobox", "Flight origin"),
                    LocatorSpec::role("textbox", "From"),
                ]),
                destination: LocatorSpec::first_of(vec![
                    LocatorSpec::role("combobox", "Flight destination"),
                    LocatorSpec::role("textbox", "To"),
                ]),
                departure_date: LocatorSpec::first_of(vec![
                    LocatorSpec::role("button", "Start date"),
                    LocatorSpec::css("[aria-label*=\"Departure\"]"),
                ]),
                return_date: LocatorSpec::first_of(vec![
                    LocatorSpec::role("button", "End date"),
                    LocatorSpec::css("[aria-label*=\"Return\"]"),
                ]),
                submit: LocatorSpec::first_of(vec![
                    LocatorSpec::role("button", "Search"),
                    LocatorSpec::css("button[type=\"submit\"]"),
                ]),
                clear_selection: Some(LocatorSpec::role("button", "Remove")),
                suggestion: Some(LocatorSpec::Position {
                    css: "[role=\"option\"][id*=\"smarty\"], ul[role=\"listbox\"] li".to_string(),
                    index: 0,
                }),
                date_entry: DateEntry::Calendar {
                    day_cell_css: "[role=\"button\"][aria-label*=\"{date}\"]".to_string(),
                    day_format: "%B %-d, %Y".to_string(),
                    next_month: LocatorSpec::role("button", "Next Month"),
                    max_month_steps: default_max_month_steps(),
                },
            },
            overlays: vec![
                OverlayRule {
                    name: "cookie consent".to_string(),
                    detect: LocatorSpec::first_of(vec![
                        LocatorSpec::css("[class*=\"cookie\"] button, #onetrust-banner-sdk"),
                        LocatorSpec::Text {
                            text: "cookies".to_string(),
                            within: Some("[role=\"dialog\"]".to_string()),
                        },
                    ]),
                    dismiss: vec![
                        LocatorSpec::role("button", "Accept all"),
                        LocatorSpec::role("button", "Accept"),
                        LocatorSpec::role("button", "Close"),
                    ],
                },
                OverlayRule {
                    name: "promotional modal".to_string(),
                    detect: LocatorSpec::css("[role=\"dialog\"][aria-modal=\"true\"]"),
                    dismiss: vec![
                        LocatorSpec::role("button", "Close"),
                        LocatorSpec::role("button", "No thanks"),
                        LocatorSpec::text("Not now"),
                    ],
                },
            ],
            max_dismiss_attempts: default_dismiss_attempts(),
            overlay_retry_interval_ms: default_overlay_retry(),
            results: ResultLocators {
                item: LocatorSpec::first_of(vec![
                    LocatorSpec::css("[data-resultid]"),
                    LocatorSpec::css(".nrc6"),
                ]),
                price: LocatorSpec::first_of(vec![
                    LocatorSpec::css(".f8F1-price-text"),
                    LocatorSpec::css("[class*=\"price-text\"]"),
                ]),
                airline: Some(LocatorSpec::first_of(vec![
                    LocatorSpec::css(".J0g6-operator-text"),
                    LocatorSpec::css("[class*=\"operator\"]"),
                ])),
                departure_time: Some(LocatorSpec::css(".vmXl-mod-variant-large")),
                arrival_time: None,
                duration: Some(LocatorSpec::Position {
                    css: ".xdW8 .vmXl-mod-variant-default".to_string(),
                    index: 0,
                }),
                stops: Some(LocatorSpec::css(".JWEO-stops-text")),
                layovers: Some(LocatorSpec::css(".JWEO .c_cgF")),
                no_results: LocatorSpec::first_of(vec![
                    LocatorSpec::css("[class*=\"no-results\"]"),
                    LocatorSpec::text("No matching results"),
                ]),
                loading: Some(LocatorSpec::first_of(vec![
                    LocatorSpec::css("[role=\"progressbar\"]"),
                    LocatorSpec::css("[class*=\"progress-bar\"]"),
                ])),
                id_attribute: Some("data-resultid".to_string()),
                default_currency: default_currency(),
                min_expected_results: 0,
                block_markers: default_block_markers(),
            },
            wait: WaitConfig::default(),
        }
    }

    /// Parses a profile from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let profile: SiteProfile = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Reads a profile from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serializes the profile as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.base_url)?;
        if self.max_dismiss_attempts == 0 {
            return Err(FareError::Config("max_dismiss_attempts must be at least 1".into()));
        }
        let wait = &self.wait;
        if wait.timeout_ms == 0 || wait.initial_interval_ms == 0 {
            return Err(FareError::Config("wait timeout and interval must be positive".into()));
        }
        if !(wait.backoff_factor.is_finite() && wait.backoff_factor >= 1.0) {
            return Err(FareError::Config("wait backoff_factor must be >= 1".into()));
        }
        if wait.stable_samples == 0 {
            return Err(FareError::Config("wait stable_samples must be at least 1".into()));
        }
        if let EntryMode::DeepLink { template } = &self.entry {
            if !template.contains("{origin}") || !template.contains("{destination}") {
                return Err(FareError::Config(
                    "deep link template needs {origin} and {destination}".into(),
                ));
            }
        }
        Ok(())
    }

    /// Expands the deep link template for a request, if the profile uses one.
    pub fn deep_link(&self, request: &SearchRequest) -> Result<Option<Url>> {
        match &self.entry {
            EntryMode::DeepLink { template } => expand_deep_link(template, request).map(Some),
            EntryMode::Form => Ok(None),
        }
    }
}

/// Fills a deep link template with the request's airports and dates.
pub fn expand_deep_link(template: &str, request: &SearchRequest) -> Result<Url> {
    let return_segment = request
        .return_date()
        .map(|date| format!("/{}", date.format("%Y-%m-%d")))
        .unwrap_or_default();
    let expanded = template
        .replace("{origin}", request.origin().as_str())
        .replace("{destination}", request.destination().as_str())
        .replace("{departure}", &request.departure().format("%Y-%m-%d").to_string())
        .replace("{return_segment}", &return_segment);
    Ok(Url::parse(&expanded)?)
}
