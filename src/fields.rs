//! Parsers turning result-card text into typed field values.

use chrono::NaiveTime;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::flight::Price;

static PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<pre>US\$|C\$|A\$|[$€£¥₹]|\b[A-Z]{3}\b)?\s*(?P<num>\d[\d.,\u{a0} ]*)\s*(?P<post>[€£¥₹]|\b[A-Z]{3}\b)?")
        .expect("price regex is valid")
});

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:(?P<d>\d+)\s*d(?:ays?)?)?\s*(?:(?P<h>\d+)\s*h(?:(?:ou)?rs?)?)?\s*(?:(?P<m>\d+)\s*m(?:in(?:utes?)?)?)?\s*$")
        .expect("duration regex is valid")
});

static STOPS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*stops?").expect("stops regex is valid"));

static AIRPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{3}\b").expect("airport regex is valid"));

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?P<h>\d{1,2}):(?P<m>\d{2})\s*(?P<ampm>[ap]\.?m\.?)?\s*(?:\+(?P<plus>\d))?")
        .expect("time regex is valid")
});

/// Maps a currency symbol or code to a three-letter code.
fn currency_code(token: &str) -> Option<&str> {
    match token {
        "$" | "US$" => Some("USD"),
        "C$" => Some("CAD"),
        "A$" => Some("AUD"),
        "€" => Some("EUR"),
        "£" => Some("GBP"),
        "¥" => Some("JPY"),
        "₹" => Some("INR"),
        code if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) => Some(code),
        _ => None,
    }
}

/// Normalizes grouping and decimal separators.
///
/// The last separator is decimal only when followed by one or two digits;
/// every other separator groups thousands.
fn parse_amount(raw: &str) -> Option<f64> {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let digits = digits.trim_end_matches(['.', ',']);
    if digits.is_empty() {
        return None;
    }
    let (integer, fraction) = match digits.rfind(['.', ',']) {
        Some(idx) if (1..=2).contains(&(digits.len() - idx - 1)) => {
            (&digits[..idx], Some(&digits[idx + 1..]))
        }
        _ => (digits, None),
    };
    let mut normalized: String = integer.chars().filter(char::is_ascii_digit).collect();
    if let Some(fraction) = fraction {
        normalized.push('.');
        normalized.push_str(fraction);
    }
    normalized.parse().ok()
}

/// Parses a price such as `$180`, `US$ 1,234.50`, `1.234,50 €` or `EUR 99`.
///
/// `default_currency` is used when the text carries no currency marker.
pub fn parse_price(text: &str, default_currency: &str) -> Option<Price> {
    let caps = PRICE_RE.captures_iter(text).find(|c| c.name("num").is_some())?;
    let amount = parse_amount(caps.name("num")?.as_str())?;
    let currency = caps
        .name("pre")
        .or_else(|| caps.name("post"))
        .and_then(|m| currency_code(m.as_str()))
        .unwrap_or(default_currency);
    Price::new(amount, currency).ok()
}

/// Parses a duration such as `4h 50m`, `1d 2h`, `45m` or `5 hours` into minutes.
pub fn parse_duration(text: &str) -> Option<u32> {
    let caps = DURATION_RE.captures(text.trim())?;
    let part = |name: &str| -> Option<u32> { caps.name(name).and_then(|m| m.as_str().parse().ok()) };
    let (days, hours, minutes) = (part("d"), part("h"), part("m"));
    if days.is_none() && hours.is_none() && minutes.is_none() {
        return None;
    }
    // Out-of-range values are garbage, not long flights.
    days.unwrap_or(0)
        .checked_mul(24 * 60)?
        .checked_add(hours.unwrap_or(0).checked_mul(60)?)?
        .checked_add(minutes.unwrap_or(0))
}

/// Parses a stop count: `nonstop`/`direct` is zero, `2 stops` is two.
pub fn parse_stops(text: &str) -> Option<u32> {
    let lower = text.to_lowercase();
    if lower.contains("nonstop") || lower.contains("non-stop") || lower.contains("direct") {
        return Some(0);
    }
    STOPS_RE
        .captures(&lower)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Extracts three-letter airport codes, in order, without duplicates.
pub fn parse_airport_codes(text: &str) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    for m in AIRPORT_RE.find_iter(text) {
        if !codes.iter().any(|c| c == m.as_str()) {
            codes.push(m.as_str().to_string());
        }
    }
    codes
}

/// A clock time with its day offset marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTime {
    pub time: NaiveTime,
    pub day_offset: u8,
}

fn time_from_caps(caps: &regex::Captures<'_>) -> Option<ClockTime> {
    let mut hour: u32 = caps.name("h")?.as_str().parse().ok()?;
    let minute: u32 = caps.name("m")?.as_str().parse().ok()?;
    if let Some(ampm) = caps.name("ampm") {
        if !(1..=12).contains(&hour) {
            return None;
        }
        let pm = ampm.as_str().to_lowercase().starts_with('p');
        hour = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
    }
    let day_offset = caps
        .name("plus")
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    Some(ClockTime {
        time: NaiveTime::from_hms_opt(hour, minute, 0)?,
        day_offset,
    })
}

/// Parses the first clock time in `text` (`7:05 am`, `19:05`, `10:15 pm+1`).
pub fn parse_clock_time(text: &str) -> Option<ClockTime> {
    TIME_RE.captures(text).and_then(|caps| time_from_caps(&caps))
}

/// Parses a `departure – arrival` range such as `7:05 am – 10:15 pm+1`.
pub fn parse_time_range(text: &str) -> Option<(ClockTime, ClockTime)> {
    let mut times = TIME_RE.captures_iter(text).filter_map(|caps| time_from_caps(&caps));
    let departure = times.next()?;
    let arrival = times.next()?;
    Some((departure, arrival))
}

/// Splits an airline label such as `Delta, United` or `JetBlue + Alaska`.
pub fn parse_airlines(text: &str) -> Vec<String> {
    text.split([',', '+', '/', '\n'])
        .map(|part| part.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|part| !part.is_empty())
        .collect()
}

/// Parses the first integer in `text`, ignoring grouping separators.
pub fn parse_count(text: &str) -> Option<usize> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_parse_price_symbols() {
        let price = parse_price("$180", "USD").unwrap();
        assert_eq!(price.amount(), 180.0);
        assert_eq!(price.currency(), "USD");

        let price = parse_price("€ 99", "USD").unwrap();
        assert_eq!(price.currency(), "EUR");

        let price = parse_price("C$245", "USD").unwrap();
        assert_eq!(price.currency(), "CAD");
    }

    #[test]
    fn test_parse_price_separators() {
        assert_eq!(parse_price("US$ 1,234.50", "USD").unwrap().amount(), 1234.5);
        assert_eq!(parse_price("1.234,50 €", "USD").unwrap().amount(), 1234.5);
        assert_eq!(parse_price("$1,234", "USD").unwrap().amount(), 1234.0);
        assert_eq!(parse_price("£12,5", "USD").unwrap().amount(), 12.5);
    }

    #[test]
    fn test_parse_price_codes_and_default() {
        let price = parse_price("EUR 210", "USD").unwrap();
        assert_eq!(price.currency(), "EUR");
        let price = parse_price("1 450 SEK", "USD").unwrap();
        assert_eq!(price.currency(), "SEK");
        assert_eq!(price.amount(), 1450.0);
        let price = parse_price("312", "GBP").unwrap();
        assert_eq!(price.currency(), "GBP");
    }

    #[test]
    fn test_parse_price_rejects_text_without_number() {
        assert!(parse_price("Price unavailable", "USD").is_none());
        assert!(parse_price("", "USD").is_none());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("4h 50m"), Some(290));
        assert_eq!(parse_duration("5h10m"), Some(310));
        assert_eq!(parse_duration("45m"), Some(45));
        assert_eq!(parse_duration("1d 2h"), Some(26 * 60));
        assert_eq!(parse_duration("5 hours"), Some(300));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_parse_duration_rejects_overflowing_values() {
        assert_eq!(parse_duration("9999999d"), None);
        assert_eq!(parse_duration("4294967295h"), None);
        assert_eq!(parse_duration("2982616d 5h"), None);
        assert_eq!(parse_duration("2982616d"), Some(u32::MAX - 255));
    }

    #[test]
    fn test_parse_stops() {
        assert_eq!(parse_stops("nonstop"), Some(0));
        assert_eq!(parse_stops("Direct"), Some(0));
        assert_eq!(parse_stops("1 stop"), Some(1));
        assert_eq!(parse_stops("2 stops"), Some(2));
        assert_eq!(parse_stops("see details"), None);
    }

    #[test]
    fn test_parse_airport_codes() {
        assert_eq!(parse_airport_codes("ORD, DEN"), vec!["ORD", "DEN"]);
        assert_eq!(parse_airport_codes("1h 20m in ORD then ORD"), vec!["ORD"]);
        assert!(parse_airport_codes("nonstop").is_empty());
    }

    #[test]
    fn test_parse_clock_time() {
        let t = parse_clock_time("7:05 am").unwrap();
        assert_eq!(t.time, hm(7, 5));
        assert_eq!(t.day_offset, 0);
        assert_eq!(parse_clock_time("12:30 am").unwrap().time, hm(0, 30));
        assert_eq!(parse_clock_time("12:30 pm").unwrap().time, hm(12, 30));
        assert_eq!(parse_clock_time("19:05").unwrap().time, hm(19, 5));
        assert!(parse_clock_time("tbd").is_none());
        assert!(parse_clock_time("25:00").is_none());
    }

    #[test]
    fn test_parse_time_range_with_day_offset() {
        let (dep, arr) = parse_time_range("10:15 pm – 6:40 am+1").unwrap();
        assert_eq!(dep.time, hm(22, 15));
        assert_eq!(arr.time, hm(6, 40));
        assert_eq!(arr.day_offset, 1);
        assert!(parse_time_range("7:05 am").is_none());
    }

    #[test]
    fn test_parse_airlines() {
        assert_eq!(parse_airlines("Delta"), vec!["Delta"]);
        assert_eq!(
            parse_airlines("JetBlue +  Alaska Airlines"),
            vec!["JetBlue", "Alaska Airlines"]
        );
        assert!(parse_airlines("  ").is_empty());
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("1,204 results"), Some(1204));
        assert_eq!(parse_count("Showing 12 of 40"), Some(12));
        assert_eq!(parse_count("none"), None);
    }
}
