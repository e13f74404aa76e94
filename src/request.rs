//! Flight search request representation.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{FareError, Result};

/// Trip type selected on the search form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TripType {
    #[default]
    OneWay,
    RoundTrip,
}

impl fmt::Display for TripType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripType::OneWay => f.write_str("one-way"),
            TripType::RoundTrip => f.write_str("round-trip"),
        }
    }
}

/// A three-letter IATA airport code, stored upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AirportCode(String);

impl AirportCode {
    /// Parses and normalizes an airport code.
    pub fn parse(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(FareError::InvalidRequest(format!(
                "airport code '{}' must be three letters",
                code
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AirportCode {
    type Error = FareError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<AirportCode> for String {
    fn from(code: AirportCode) -> Self {
        code.0
    }
}

impl fmt::Display for AirportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated, immutable flight search request.
///
/// The return date is present if and only if the trip is a round trip, and
/// never precedes the departure date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRequest")]
pub struct SearchRequest {
    origin: AirportCode,
    destination: AirportCode,
    trip_type: TripType,
    departure: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
struct RawRequest {
    origin: AirportCode,
    destination: AirportCode,
    trip_type: TripType,
    departure: NaiveDate,
    #[serde(default)]
    return_date: Option<NaiveDate>,
}

impl TryFrom<RawRequest> for SearchRequest {
    type Error = FareError;

    fn try_from(raw: RawRequest) -> Result<Self> {
        Self::new(
            raw.origin,
            raw.destination,
            raw.trip_type,
            raw.departure,
            raw.return_date,
        )
    }
}

impl SearchRequest {
    /// Creates a request, checking every invariant.
    pub fn new(
        origin: AirportCode,
        destination: AirportCode,
        trip_type: TripType,
        departure: NaiveDate,
        return_date: Option<NaiveDate>,
    ) -> Result<Self> {
        if origin == destination {
            return Err(FareError::InvalidRequest(format!(
                "origin and destination are both {}",
                origin
            )));
        }
        match (trip_type, return_date) {
            (TripType::OneWay, Some(_)) => {
                return Err(FareError::InvalidRequest(
                    "one-way trip cannot have a return date".into(),
                ));
            }
            (TripType::RoundTrip, None) => {
                return Err(FareError::InvalidRequest(
                    "round-trip requires a return date".into(),
                ));
            }
            (TripType::RoundTrip, Some(ret)) if ret < departure => {
                return Err(FareError::InvalidRequest(format!(
                    "return date {} is before departure {}",
                    ret, departure
                )));
            }
            _ => {}
        }
        Ok(Self {
            origin,
            destination,
            trip_type,
            departure,
            return_date,
        })
    }

    /// Creates a one-way request.
    pub fn one_way(origin: &str, destination: &str, departure: NaiveDate) -> Result<Self> {
        Self::new(
            AirportCode::parse(origin)?,
            AirportCode::parse(destination)?,
            TripType::OneWay,
            departure,
            None,
        )
    }

    /// Creates a round-trip request.
    pub fn round_trip(
        origin: &str,
        destination: &str,
        departure: NaiveDate,
        return_date: NaiveDate,
    ) -> Result<Self> {
        Self::new(
            AirportCode::parse(origin)?,
            AirportCode::parse(destination)?,
            TripType::RoundTrip,
            departure,
            Some(return_date),
        )
    }

    /// Builds a request from user-style date strings.
    ///
    /// Accepts `YYYY-MM-DD` or `MM/DD`. A `MM/DD` departure already in the
    /// past rolls over to next year; a `MM/DD` return earlier than the
    /// departure rolls over to the year after the departure.
    pub fn from_inputs(
        origin: &str,
        destination: &str,
        trip_type: TripType,
        departure: &str,
        return_date: Option<&str>,
        today: NaiveDate,
    ) -> Result<Self> {
        let departure = parse_travel_date(departure, today)?;
        let return_date = match return_date.map(str::trim).filter(|s| !s.is_empty()) {
            Some(input) => Some(parse_return_date(input, departure)?),
            None => None,
        };
        Self::new(
            AirportCode::parse(origin)?,
            AirportCode::parse(destination)?,
            trip_type,
            departure,
            return_date,
        )
    }

    pub fn origin(&self) -> &AirportCode {
        &self.origin
    }

    pub fn destination(&self) -> &AirportCode {
        &self.destination
    }

    pub fn trip_type(&self) -> TripType {
        self.trip_type
    }

    pub fn departure(&self) -> NaiveDate {
        self.departure
    }

    pub fn return_date(&self) -> Option<NaiveDate> {
        self.return_date
    }
}

/// Parses a departure date relative to `today`.
pub fn parse_travel_date(input: &str, today: NaiveDate) -> Result<NaiveDate> {
    let input = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(date);
    }
    let (month, day) = parse_month_day(input)?;
    let this_year = month_day_in(today.year(), month, day, input)?;
    if this_year < today {
        month_day_in(today.year() + 1, month, day, input)
    } else {
        Ok(this_year)
    }
}

fn parse_return_date(input: &str, departure: NaiveDate) -> Result<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(date);
    }
    let (month, day) = parse_month_day(input)?;
    let same_year = month_day_in(departure.year(), month, day, input)?;
    if same_year < departure {
        month_day_in(departure.year() + 1, month, day, input)
    } else {
        Ok(same_year)
    }
}

fn parse_month_day(input: &str) -> Result<(u32, u32)> {
    let invalid = || {
        FareError::InvalidRequest(format!(
            "date '{}' is not YYYY-MM-DD or MM/DD",
            input
        ))
    };
    let (month, day) = input.split_once('/').ok_or_else(invalid)?;
    let month = month.trim().parse::<u32>().map_err(|_| invalid())?;
    let day = day.trim().parse::<u32>().map_err(|_| invalid())?;
    Ok((month, day))
}

fn month_day_in(year: i32, month: u32, day: u32, input: &str) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        FareError::InvalidRequest(format!("date '{}' is not a calendar date in {}", input, year))
    })
}
