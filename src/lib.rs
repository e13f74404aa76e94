//! # farescout
//!
//! A browser-driven flight fare search engine.
//!
//! The engine drives a flight-comparison website through its search form,
//! waits for asynchronous results to settle, parses the rendered result list
//! into typed flight options and selects the cheapest ones:
//!
//! - Site knowledge lives in a JSON-configurable [`SiteProfile`]
//! - Locators are swappable strategies compiled from [`LocatorSpec`] values
//! - Every stage fails closed with a classified [`FareError`]
//! - Searches are cancellable through a `CancellationToken`
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "headless")]
//! # async fn run() -> anyhow::Result<()> {
//! use std::sync::Arc;
//!
//! use chrono::NaiveDate;
//! use farescout::{ChromeLauncher, FareSearch, SearchOptions, SearchRequest, SiteProfile};
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = FareSearch::new(SiteProfile::kayak(), Arc::new(ChromeLauncher::default()))?;
//! let request = SearchRequest::one_way("JFK", "LAX", NaiveDate::from_ymd_opt(2026, 12, 15).unwrap())?;
//! let report = engine
//!     .search(&request, &SearchOptions::default(), &CancellationToken::new())
//!     .await?;
//!
//! if let Some(best) = report.best() {
//!     println!("{} via {}", best.price, best.airlines.join(", "));
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod extract;
mod fields;
mod flight;
mod form;
mod rank;
mod report;
mod request;
mod search;

pub mod clock;
pub mod collaborators;
pub mod locator;
pub mod profile;
pub mod session;
pub mod testing;
pub mod wait;

#[cfg(feature = "headless")]
pub mod browser;
#[cfg(feature = "headless")]
pub mod browser_setup;

pub use error::{FareError, Result, Stage};
pub use extract::ResultExtractor;
pub use fields::{parse_duration, parse_price, parse_stops};
pub use flight::{FlightOption, ParseOutcome, Price, SearchResultSet, SkippedRecord};
pub use form::FormFiller;
pub use locator::{FieldLocator, LocatorSpec};
pub use profile::SiteProfile;
pub use rank::{rank, select, Selection};
pub use report::Report;
pub use request::{parse_travel_date, AirportCode, SearchRequest, TripType};
pub use search::{FareSearch, SearchOptions};

#[cfg(feature = "headless")]
pub use browser::{ChromeLauncher, SessionConfig};
