//! Result extractor: turns a rendered result page into flight options.

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html};
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::clock::Clock;
use crate::fields::{
    parse_airlines, parse_airport_codes, parse_clock_time, parse_duration, parse_price,
    parse_stops, parse_time_range,
};
use crate::flight::{FlightOption, ParseOutcome, SearchResultSet, SkippedRecord};
use crate::locator::{element_text, FieldLocator, LocatorSpec};
use crate::profile::ResultLocators;
use crate::session::PageDriver;
use crate::wait::ResultSample;
use crate::{FareError, Result, Stage};

fn compile_optional(spec: &Option<LocatorSpec>) -> Result<Option<Box<dyn FieldLocator>>> {
    spec.as_ref().map(LocatorSpec::compile).transpose()
}

/// Compiled field-to-locator mapping for result records.
#[derive(Debug)]
pub struct ResultExtractor {
    item: Box<dyn FieldLocator>,
    price: Box<dyn FieldLocator>,
    airline: Option<Box<dyn FieldLocator>>,
    departure_time: Option<Box<dyn FieldLocator>>,
    arrival_time: Option<Box<dyn FieldLocator>>,
    duration: Option<Box<dyn FieldLocator>>,
    stops: Option<Box<dyn FieldLocator>>,
    layovers: Option<Box<dyn FieldLocator>>,
    no_results: Box<dyn FieldLocator>,
    loading: Option<Box<dyn FieldLocator>>,
    id_attribute: Option<String>,
    default_currency: String,
    min_expected_results: usize,
    block_markers: Vec<String>,
}

impl ResultExtractor {
    /// Compiles the result locators. Fails with a config error on bad selectors.
    pub fn new(locators: &ResultLocators) -> Result<Self> {
        Ok(Self {
            item: locators.item.compile()?,
            price: locators.price.compile()?,
            airline: compile_optional(&locators.airline)?,
            departure_time: compile_optional(&locators.departure_time)?,
            arrival_time: compile_optional(&locators.arrival_time)?,
            duration: compile_optional(&locators.duration)?,
            stops: compile_optional(&locators.stops)?,
            layovers: compile_optional(&locators.layovers)?,
            no_results: locators.no_results.compile()?,
            loading: compile_optional(&locators.loading)?,
            id_attribute: locators.id_attribute.clone(),
            default_currency: locators.default_currency.clone(),
            min_expected_results: locators.min_expected_results,
            block_markers: locators
                .block_markers
                .iter()
                .map(|marker| marker.to_lowercase())
                .collect(),
        })
    }

    /// Block markers only count on pages without result records.
    fn is_blocked(&self, html: &str, candidates: usize) -> bool {
        if candidates > 0 || self.block_markers.is_empty() {
            return false;
        }
        let lower = html.to_lowercase();
        self.block_markers.iter().any(|marker| lower.contains(marker))
    }

    /// Summarizes a snapshot for the result waiter.
    pub fn sample(&self, html: &str) -> ResultSample {
        let document = Html::parse_document(html);
        let root = document.root_element();
        let candidates = self.item.locate_all(root);
        let joined = candidates
            .iter()
            .map(|el| element_text(*el))
            .collect::<Vec<_>>()
            .join("\u{1f}");
        ResultSample {
            loading: self
                .loading
                .as_ref()
                .is_some_and(|locator| locator.locate(root).is_some()),
            no_results: candidates.is_empty() && self.no_results.locate(root).is_some(),
            blocked: self.is_blocked(html, candidates.len()),
            result_count: candidates.len(),
            fingerprint: xxh3_64(joined.as_bytes()),
        }
    }

    /// Reads the current page and extracts its result set.
    pub async fn extract(&self, page: &dyn PageDriver, clock: &dyn Clock) -> Result<SearchResultSet> {
        let html = page.content().await.map_err(|e| e.within(Stage::Extract))?;
        self.extract_html(&html, clock.wall())
    }

    /// Extracts a result set from a page snapshot.
    ///
    /// Running this twice on the same snapshot yields equal sets.
    pub fn extract_html(&self, html: &str, captured_at: DateTime<Utc>) -> Result<SearchResultSet> {
        let document = Html::parse_document(html);
        let root = document.root_element();
        let candidates = self.item.locate_all(root);

        if self.is_blocked(html, candidates.len()) {
            return Err(FareError::Extraction(
                "site served a bot check page instead of results".to_string(),
            ));
        }
        if candidates.is_empty() {
            if self.no_results.locate(root).is_some() {
                debug!("Page reports no matching flights");
                return Ok(SearchResultSet::no_results(captured_at));
            }
            return Err(FareError::Extraction(format!(
                "no result records matched {}",
                self.item.describe()
            )));
        }

        let mut options = Vec::new();
        let mut skipped = Vec::new();
        for (position, element) in candidates.into_iter().enumerate() {
            match self.parse_candidate(element, position) {
                ParseOutcome::Parsed(option) => options.push(option),
                ParseOutcome::Skipped(record) => {
                    debug!("Skipping record {}: {}", record.position, record.reason);
                    skipped.push(record);
                }
            }
        }

        if options.is_empty() {
            return Err(FareError::Extraction(format!(
                "none of {} result records could be parsed",
                skipped.len()
            )));
        }
        if let Some(first) = options.first() {
            let currency = first.price.currency();
            if let Some(other) = options.iter().find(|o| o.price.currency() != currency) {
                return Err(FareError::Extraction(format!(
                    "result set mixes currencies {} and {}",
                    currency,
                    other.price.currency()
                )));
            }
        }

        let partial = !skipped.is_empty() || options.len() < self.min_expected_results;
        if partial {
            warn!(
                "Partial result set: {} parsed, {} skipped, {} expected",
                options.len(),
                skipped.len(),
                self.min_expected_results
            );
        }
        debug!("Extracted {} flight options", options.len());
        Ok(SearchResultSet::new(options, skipped, captured_at, partial))
    }

    fn field_text(locator: &Option<Box<dyn FieldLocator>>, scope: ElementRef<'_>) -> Option<String> {
        locator
            .as_ref()
            .and_then(|l| l.locate(scope))
            .map(element_text)
            .filter(|text| !text.is_empty())
    }

    /// Parses one candidate record.
    ///
    /// A record without a readable price is skipped; every other field is
    /// optional.
    pub fn parse_candidate(&self, element: ElementRef<'_>, position: usize) -> ParseOutcome {
        let skip = |reason: String| ParseOutcome::Skipped(SkippedRecord { position, reason });

        let Some(price_el) = self.price.locate(element) else {
            return skip(format!("no price element ({})", self.price.describe()));
        };
        let price_text = element_text(price_el);
        let Some(price) = parse_price(&price_text, &self.default_currency) else {
            return skip(format!("unreadable price '{}'", price_text));
        };

        let id = self
            .id_attribute
            .as_deref()
            .and_then(|attr| element.value().attr(attr))
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!("{:03}-{:016x}", position, xxh3_64(element_text(element).as_bytes()))
            });

        let mut option = FlightOption::new(id, position, price);

        if let Some(text) = Self::field_text(&self.airline, element) {
            option.airlines = parse_airlines(&text);
        }

        let departure_text = Self::field_text(&self.departure_time, element);
        let arrival_text = Self::field_text(&self.arrival_time, element);
        match (departure_text, arrival_text) {
            (Some(dep), Some(arr)) => {
                option.departure_time = parse_clock_time(&dep).map(|t| t.time);
                if let Some(arrival) = parse_clock_time(&arr) {
                    option.arrival_time = Some(arrival.time);
                    option.arrival_day_offset = arrival.day_offset;
                }
            }
            (Some(dep), None) => {
                if let Some((departure, arrival)) = parse_time_range(&dep) {
                    option.departure_time = Some(departure.time);
                    option.arrival_time = Some(arrival.time);
                    option.arrival_day_offset = arrival.day_offset;
                } else {
                    option.departure_time = parse_clock_time(&dep).map(|t| t.time);
                }
            }
            (None, Some(arr)) => {
                if let Some(arrival) = parse_clock_time(&arr) {
                    option.arrival_time = Some(arrival.time);
                    option.arrival_day_offset = arrival.day_offset;
                }
            }
            (None, None) => {}
        }

        option.duration_minutes = Self::field_text(&self.duration, element)
            .as_deref()
            .and_then(parse_duration);
        option.layovers = Self::field_text(&self.stops, element)
            .as_deref()
            .and_then(parse_stops);
        if let Some(text) = Self::field_text(&self.layovers, element) {
            option.layover_airports = parse_airport_codes(&text);
        }
        if option.layovers.is_none() && !option.layover_airports.is_empty() {
            option.layovers = Some(option.layover_airports.len() as u32);
        }

        ParseOutcome::Parsed(option)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::profile::SiteProfile;
    use crate::testing::ScriptedPage;
    use chrono::NaiveTime;

    const JFK_LAX: &str = r#"
        <html><body><div class="results">
          <div class="card" data-rid="a1">
            <span class="carrier">American</span>
            <span class="times">6:00 am – 9:10 am</span>
            <span class="dur">6h 10m</span>
            <span class="stops">nonstop</span>
            <span class="price">$210</span>
          </div>
          <div class="card" data-rid="b2">
            <span class="carrier">JetBlue</span>
            <span class="times">8:00 am – 12:10 pm</span>
            <span class="dur">5h 10m</span>
            <span class="stops">1 stop</span>
            <span class="via">ORD</span>
            <span class="price">$180</span>
          </div>
          <div class="card">
            <span class="carrier">Delta</span>
            <span class="times">10:15 pm – 6:05 am+1</span>
            <span class="dur">4h 50m</span>
            <span class="stops">nonstop</span>
            <span class="price">$180</span>
          </div>
        </div></body></html>
    "#;

    fn locators() -> ResultLocators {
        let mut results = SiteProfile::kayak().results;
        results.item = LocatorSpec::css(".card");
        results.price = LocatorSpec::css(".price");
        results.airline = Some(LocatorSpec::css(".carrier"));
        results.departure_time = Some(LocatorSpec::css(".times"));
        results.arrival_time = None;
        results.duration = Some(LocatorSpec::css(".dur"));
        results.stops = Some(LocatorSpec::css(".stops"));
        results.layovers = Some(LocatorSpec::css(".via"));
        results.id_attribute = Some("data-rid".to_string());
        results
    }

    fn extractor() -> ResultExtractor {
        ResultExtractor::new(&locators()).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_extracts_all_fields() {
        let set = extractor().extract_html(JFK_LAX, Utc::now()).unwrap();
        assert_eq!(set.len(), 3);
        assert!(!set.partial);

        let first = &set.items()[0];
        assert_eq!(first.id, "a1");
        assert_eq!(first.airlines, vec!["American"]);
        assert_eq!(first.price.amount(), 210.0);
        assert_eq!(first.duration_minutes, Some(370));
        assert!(first.is_nonstop());

        let second = &set.items()[1];
        assert_eq!(second.layovers, Some(1));
        assert_eq!(second.layover_airports, vec!["ORD"]);

        let red_eye = &set.items()[2];
        assert_eq!(red_eye.departure_time, Some(hm(22, 15)));
        assert_eq!(red_eye.arrival_time, Some(hm(6, 5)));
        assert_eq!(red_eye.arrival_day_offset, 1);
        assert!(red_eye.id.starts_with("002-"));
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let extractor = extractor();
        let at = Utc::now();
        let first = extractor.extract_html(JFK_LAX, at).unwrap();
        let second = extractor.extract_html(JFK_LAX, at).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_record_without_price_is_skipped() {
        let html = r#"<html><body>
            <div class="card"><span class="price">$99</span></div>
            <div class="card"><span class="carrier">Ghost Air</span></div>
            <div class="card"><span class="price">call us</span></div>
        </body></html>"#;
        let set = extractor().extract_html(html, Utc::now()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.skipped().len(), 2);
        assert_eq!(set.skipped()[0].position, 1);
        assert!(set.partial);
        let option = &set.items()[0];
        assert!(option.airlines.is_empty());
        assert!(option.departure_time.is_none());
        assert!(option.duration_minutes.is_none());
    }

    #[test]
    fn test_no_results_page_is_empty_set() {
        let html = r#"<html><body><div class="no-results-banner">No flights found</div></body></html>"#;
        let set = extractor().extract_html(html, Utc::now()).unwrap();
        assert!(set.is_empty());
        assert!(set.no_results);
    }

    #[test]
    fn test_unrecognized_layout_is_extraction_error() {
        let html = r#"<html><body><table><tr><td>$120</td></tr></table></body></html>"#;
        let err = extractor().extract_html(html, Utc::now()).unwrap_err();
        assert!(matches!(err, FareError::Extraction(_)));
    }

    #[test]
    fn test_all_records_unparseable_is_extraction_error() {
        let html = r#"<html><body><div class="card">sold out</div></body></html>"#;
        let err = extractor().extract_html(html, Utc::now()).unwrap_err();
        assert!(matches!(err, FareError::Extraction(ref r) if r.contains("none of 1")));
    }

    #[test]
    fn test_mixed_currencies_fail_closed() {
        let html = r#"<html><body>
            <div class="card"><span class="price">$99</span></div>
            <div class="card"><span class="price">€89</span></div>
        </body></html>"#;
        let err = extractor().extract_html(html, Utc::now()).unwrap_err();
        assert!(matches!(err, FareError::Extraction(ref r) if r.contains("mixes currencies")));
    }

    #[test]
    fn test_blocked_page_is_extraction_error() {
        let html = r#"<html><body><form action="/sorry/index"><div class="g-recaptcha"></div></form></body></html>"#;
        let err = extractor().extract_html(html, Utc::now()).unwrap_err();
        assert!(matches!(err, FareError::Extraction(ref r) if r.contains("bot check")));
        assert!(extractor().sample(html).blocked);
    }

    #[test]
    fn test_min_expected_results_marks_partial() {
        let mut locators = locators();
        locators.min_expected_results = 5;
        let set = ResultExtractor::new(&locators)
            .unwrap()
            .extract_html(JFK_LAX, Utc::now())
            .unwrap();
        assert!(set.partial);
        assert!(set.skipped().is_empty());
    }

    #[test]
    fn test_separate_arrival_locator() {
        let mut locators = locators();
        locators.departure_time = Some(LocatorSpec::css(".dep"));
        locators.arrival_time = Some(LocatorSpec::css(".arr"));
        let html = r#"<html><body><div class="card">
            <span class="dep">7:05 am</span><span class="arr">10:15 am</span>
            <span class="price">USD 150</span>
        </div></body></html>"#;
        let set = ResultExtractor::new(&locators)
            .unwrap()
            .extract_html(html, Utc::now())
            .unwrap();
        let option = &set.items()[0];
        assert_eq!(option.departure_time, Some(hm(7, 5)));
        assert_eq!(option.arrival_time, Some(hm(10, 15)));
    }

    #[test]
    fn test_sample_fingerprint_tracks_content() {
        let extractor = extractor();
        let a = extractor.sample(JFK_LAX);
        let b = extractor.sample(&JFK_LAX.replace("$210", "$205"));
        assert_eq!(a.result_count, 3);
        assert_eq!(a.result_count, b.result_count);
        assert_ne!(a.fingerprint, b.fingerprint);
        assert_eq!(a, extractor.sample(JFK_LAX));
    }

    #[test]
    fn test_invalid_locator_is_config_error() {
        let mut locators = locators();
        locators.price = LocatorSpec::css("[[broken");
        assert!(matches!(ResultExtractor::new(&locators), Err(FareError::Config(_))));
    }

    #[tokio::test]
    async fn test_extract_reads_page_and_stamps_capture_time() {
        let page = ScriptedPage::new(JFK_LAX);
        let clock = ManualClock::default();
        let set = extractor().extract(&page, &clock).await.unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.captured_at, clock.wall());
    }
}
