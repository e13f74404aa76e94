//! Ranking and selection of flight options.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::flight::{FlightOption, SearchResultSet};
use crate::{FareError, Result};

/// The selected top options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Selected options, best first.
    pub options: Vec<FlightOption>,
    /// Number of options asked for.
    pub requested: usize,
    /// Number of options the result set held.
    pub available: usize,
    /// Carried from the result set.
    pub partial: bool,
    pub captured_at: DateTime<Utc>,
}

impl Selection {
    /// Fewer options were available than requested.
    pub fn is_short(&self) -> bool {
        self.options.len() < self.requested
    }

    /// The cheapest option.
    pub fn best(&self) -> Option<&FlightOption> {
        self.options.first()
    }
}

/// `None` sorts after every `Some`.
fn absent_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Total order used for ranking: price, then duration, then layovers.
///
/// Options equal under this order keep their extraction order.
pub fn compare(a: &FlightOption, b: &FlightOption) -> Ordering {
    a.price
        .amount()
        .total_cmp(&b.price.amount())
        .then_with(|| absent_last(a.duration_minutes, b.duration_minutes))
        .then_with(|| absent_last(a.layovers, b.layovers))
}

/// Returns all options in ranked order.
pub fn rank(results: &SearchResultSet) -> Vec<FlightOption> {
    let mut ranked = results.items().to_vec();
    // sort_by is stable
    ranked.sort_by(compare);
    ranked
}

/// Selects the best `n` options. A request for zero selects one.
pub fn select(results: &SearchResultSet, n: usize) -> Result<Selection> {
    let requested = n.max(1);
    if results.is_empty() {
        return Err(FareError::InsufficientResults { requested });
    }
    let mut options = rank(results);
    options.truncate(requested);
    debug!(
        "Selected {} of {} options (requested {})",
        options.len(),
        results.len(),
        requested
    );
    Ok(Selection {
        options,
        requested,
        available: results.len(),
        partial: results.partial,
        captured_at: results.captured_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::Price;

    fn option(id: &str, position: usize, amount: f64, duration: Option<u32>, stops: Option<u32>) -> FlightOption {
        let mut option = FlightOption::new(id, position, Price::new(amount, "USD").unwrap());
        option.duration_minutes = duration;
        option.layovers = stops;
        option
    }

    fn set(options: Vec<FlightOption>) -> SearchResultSet {
        SearchResultSet::new(options, Vec::new(), Utc::now(), false)
    }

    fn ids(selection: &Selection) -> Vec<&str> {
        selection.options.iter().map(|o| o.id.as_str()).collect()
    }

    #[test]
    fn test_jfk_lax_tie_broken_by_duration() {
        let results = set(vec![
            option("a", 0, 210.0, Some(370), Some(0)),
            option("b", 1, 180.0, Some(310), Some(1)),
            option("c", 2, 180.0, Some(290), Some(0)),
        ]);
        let selection = select(&results, 1).unwrap();
        assert_eq!(ids(&selection), vec!["c"]);
        assert_eq!(selection.best().unwrap().price.amount(), 180.0);
        assert!(!selection.is_short());
    }

    #[test]
    fn test_ordering_law() {
        let results = set(vec![
            option("a", 0, 300.0, None, None),
            option("b", 1, 120.0, Some(400), Some(2)),
            option("c", 2, 120.0, Some(400), Some(1)),
            option("d", 3, 120.0, None, Some(0)),
            option("e", 4, 99.5, Some(600), None),
        ]);
        let selection = select(&results, 5).unwrap();
        assert_eq!(ids(&selection), vec!["e", "c", "b", "d", "a"]);
        for pair in selection.options.windows(2) {
            assert!(pair[0].price.amount() <= pair[1].price.amount());
        }
    }

    #[test]
    fn test_full_ties_keep_extraction_order() {
        let results = set(vec![
            option("x", 0, 150.0, Some(300), Some(1)),
            option("y", 1, 150.0, Some(300), Some(1)),
            option("z", 2, 150.0, Some(300), Some(1)),
        ]);
        assert_eq!(ids(&select(&results, 3).unwrap()), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let results = set(vec![
            option("a", 0, 180.0, Some(310), None),
            option("b", 1, 180.0, Some(310), None),
            option("c", 2, 90.0, None, None),
        ]);
        let first = select(&results, 2).unwrap();
        let second = select(&results, 2).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_short_selection() {
        let results = set(vec![option("a", 0, 100.0, None, None), option("b", 1, 90.0, None, None)]);
        let selection = select(&results, 3).unwrap();
        assert_eq!(selection.options.len(), 2);
        assert_eq!(selection.requested, 3);
        assert_eq!(selection.available, 2);
        assert!(selection.is_short());
    }

    #[test]
    fn test_empty_set_is_insufficient() {
        let err = select(&set(Vec::new()), 2).unwrap_err();
        assert!(matches!(err, FareError::InsufficientResults { requested: 2 }));
        let err = select(&SearchResultSet::no_results(Utc::now()), 1).unwrap_err();
        assert!(err.is_no_flights());
    }

    #[test]
    fn test_zero_requested_selects_one() {
        let results = set(vec![option("a", 0, 100.0, None, None), option("b", 1, 90.0, None, None)]);
        let selection = select(&results, 0).unwrap();
        assert_eq!(selection.requested, 1);
        assert_eq!(ids(&selection), vec!["b"]);
    }

    #[test]
    fn test_partial_flag_is_carried() {
        let results = SearchResultSet::new(vec![option("a", 0, 1.0, None, None)], Vec::new(), Utc::now(), true);
        assert!(select(&results, 1).unwrap().partial);
    }
}
