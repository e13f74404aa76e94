//! Final search report.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::flight::{FlightOption, SearchResultSet};
use crate::rank::Selection;
use crate::request::{SearchRequest, TripType};

/// Structured outcome of one fare search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Name of the site profile that produced the results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub request: SearchRequest,
    /// Selected options, best first. Never empty.
    pub options: Vec<FlightOption>,
    pub requested: usize,
    pub available: usize,
    /// Fewer options were found than requested.
    pub short: bool,
    /// Some result records could not be parsed.
    pub partial: bool,
    pub captured_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    /// Every extracted option, when asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_results: Option<SearchResultSet>,
}

impl Report {
    /// Assembles a report. Never fails.
    ///
    /// `generated_at` starts as the capture time; the pipeline stamps its own
    /// clock with [`Report::generated_at`].
    pub fn build(
        request: &SearchRequest,
        selection: Selection,
        full_set: Option<SearchResultSet>,
    ) -> Self {
        let short = selection.is_short();
        Self {
            site: None,
            request: request.clone(),
            options: selection.options,
            requested: selection.requested,
            available: selection.available,
            short,
            partial: selection.partial,
            captured_at: selection.captured_at,
            generated_at: selection.captured_at,
            all_results: full_set,
        }
    }

    /// Stamps the site name.
    pub fn with_site(mut self, name: impl Into<String>) -> Self {
        self.site = Some(name.into());
        self
    }

    /// Overrides the generation timestamp.
    pub fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = at;
        self
    }

    /// The cheapest selected option.
    pub fn best(&self) -> Option<&FlightOption> {
        self.options.first()
    }

    pub fn trip_type(&self) -> TripType {
        self.request.trip_type()
    }

    pub fn departure_date(&self) -> NaiveDate {
        self.request.departure()
    }

    /// Present exactly for round trips.
    pub fn return_date(&self) -> Option<NaiveDate> {
        self.request.return_date()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::Price;
    use crate::rank::select;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn results() -> SearchResultSet {
        let options = vec![
            FlightOption::new("a", 0, Price::new(210.0, "USD").unwrap()),
            FlightOption::new("b", 1, Price::new(180.0, "USD").unwrap()),
        ];
        SearchResultSet::new(options, Vec::new(), Utc::now(), false)
    }

    #[test]
    fn test_one_way_report_has_no_return_date() {
        let request = SearchRequest::one_way("JFK", "LAX", date(2026, 12, 15)).unwrap();
        let report = Report::build(&request, select(&results(), 1).unwrap(), None);
        assert_eq!(report.trip_type(), TripType::OneWay);
        assert!(report.return_date().is_none());
        assert_eq!(report.best().unwrap().id, "b");
        assert!(report.all_results.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("all_results").is_none());
        assert!(json["request"]["return_date"].is_null());
    }

    #[test]
    fn test_round_trip_report_carries_both_dates() {
        let request =
            SearchRequest::round_trip("PAR", "SFO", date(2026, 6, 17), date(2026, 6, 24)).unwrap();
        let report = Report::build(&request, select(&results(), 5).unwrap(), Some(results()))
            .with_site("Kayak");
        assert_eq!(report.departure_date(), date(2026, 6, 17));
        let ret = report.return_date().unwrap();
        assert!(report.departure_date() <= ret);
        assert!(report.short);
        assert_eq!(report.available, 2);
        assert_eq!(report.site.as_deref(), Some("Kayak"));
        assert_eq!(report.all_results.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_build_is_deterministic() {
        let request = SearchRequest::one_way("JFK", "LAX", date(2026, 12, 15)).unwrap();
        let captured = Utc.with_ymd_and_hms(2026, 10, 14, 9, 30, 0).unwrap();
        let set = SearchResultSet::new(results().items().to_vec(), Vec::new(), captured, false);

        let first = Report::build(&request, select(&set, 1).unwrap(), None);
        let second = Report::build(&request, select(&set, 1).unwrap(), None);
        assert_eq!(first, second);
        assert_eq!(first.generated_at, captured);

        let stamped = first.generated_at(captured + chrono::Duration::seconds(2));
        assert_eq!(stamped.generated_at - stamped.captured_at, chrono::Duration::seconds(2));
    }

    #[test]
    fn test_report_json_round_trip() {
        let request = SearchRequest::one_way("JFK", "LAX", date(2026, 12, 15)).unwrap();
        let report = Report::build(&request, select(&results(), 1).unwrap(), None);
        let json = serde_json::to_string(&report).unwrap();
        let parsed: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }
}
