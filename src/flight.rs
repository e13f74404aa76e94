//! Flight option and result set types.

use std::fmt;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FareError, Result};

/// A price with its currency.
///
/// The amount is always finite and non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPrice")]
pub struct Price {
    currency: String,
    amount: f64,
}

#[derive(Deserialize)]
struct RawPrice {
    currency: String,
    amount: f64,
}

impl TryFrom<RawPrice> for Price {
    type Error = FareError;

    fn try_from(raw: RawPrice) -> Result<Self> {
        Price::new(raw.amount, &raw.currency)
    }
}

impl Price {
    /// Creates a price, rejecting negative or non-finite amounts.
    pub fn new(amount: f64, currency: &str) -> Result<Self> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(FareError::Extraction(format!(
                "price amount {} is not a non-negative number",
                amount
            )));
        }
        let currency = currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(FareError::Extraction(format!(
                "currency '{}' is not a three-letter code",
                currency
            )));
        }
        Ok(Self { currency, amount })
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.2}", self.currency, self.amount)
    }
}

/// A single flight option parsed from the result page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightOption {
    /// Stable identifier derived from the record's position and content.
    pub id: String,
    /// Zero-based position in the rendered result list.
    pub position: usize,
    /// Operating airline(s). Empty when the page did not show them.
    pub airlines: Vec<String>,
    pub departure_time: Option<NaiveTime>,
    pub arrival_time: Option<NaiveTime>,
    /// Days between departure and arrival (the `+1` marker).
    #[serde(default)]
    pub arrival_day_offset: u8,
    /// Total travel time in minutes.
    pub duration_minutes: Option<u32>,
    /// Number of stops, `Some(0)` for nonstop.
    pub layovers: Option<u32>,
    /// Airport codes of the layovers, when listed.
    pub layover_airports: Vec<String>,
    pub price: Price,
}

impl FlightOption {
    /// Creates an option with only the required fields set.
    pub fn new(id: impl Into<String>, position: usize, price: Price) -> Self {
        Self {
            id: id.into(),
            position,
            airlines: Vec::new(),
            departure_time: None,
            arrival_time: None,
            arrival_day_offset: 0,
            duration_minutes: None,
            layovers: None,
            layover_airports: Vec::new(),
            price,
        }
    }

    /// Sets the airlines.
    pub fn with_airlines(mut self, airlines: Vec<String>) -> Self {
        self.airlines = airlines;
        self
    }

    /// Sets the departure and arrival times.
    pub fn with_times(mut self, departure: NaiveTime, arrival: NaiveTime) -> Self {
        self.departure_time = Some(departure);
        self.arrival_time = Some(arrival);
        self
    }

    /// Sets the total duration in minutes.
    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    /// Sets the stop count and layover airports.
    pub fn with_layovers(mut self, stops: u32, airports: Vec<String>) -> Self {
        self.layovers = Some(stops);
        self.layover_airports = airports;
        self
    }

    /// Returns true if the flight has no stops.
    pub fn is_nonstop(&self) -> bool {
        self.layovers == Some(0)
    }
}

/// A candidate record that could not be turned into a flight option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub position: usize,
    pub reason: String,
}

/// Outcome of parsing one candidate node.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(FlightOption),
    Skipped(SkippedRecord),
}

/// Flight options extracted from one result page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultSet {
    options: Vec<FlightOption>,
    skipped: Vec<SkippedRecord>,
    /// When the page snapshot was taken.
    pub captured_at: DateTime<Utc>,
    /// Some records were dropped or fewer were found than expected.
    pub partial: bool,
    /// The page showed an explicit "no results" indicator.
    pub no_results: bool,
}

impl SearchResultSet {
    /// Creates a result set from parsed options and skipped records.
    pub fn new(
        options: Vec<FlightOption>,
        skipped: Vec<SkippedRecord>,
        captured_at: DateTime<Utc>,
        partial: bool,
    ) -> Self {
        Self {
            options,
            skipped,
            captured_at,
            partial,
            no_results: false,
        }
    }

    /// Creates the valid empty result of a page that reported no flights.
    pub fn no_results(captured_at: DateTime<Utc>) -> Self {
        Self {
            options: Vec::new(),
            skipped: Vec::new(),
            captured_at,
            partial: false,
            no_results: true,
        }
    }

    /// Returns the options in extraction order.
    pub fn items(&self) -> &[FlightOption] {
        &self.options
    }

    /// Returns the dropped candidate records.
    pub fn skipped(&self) -> &[SkippedRecord] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}
