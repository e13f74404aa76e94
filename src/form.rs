//! Form filler: clears interstitials and submits the search form.
//!
//! Every control is found on a fresh snapshot right before it is used, so a
//! re-rendered form is handled as long as the control can still be located.
//! Required controls are checked up front; a form that is missing one is
//! never partially filled.

use std::time::Duration;

use chrono::NaiveDate;
use scraper::Html;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::locator::{css_path, parse_selector, FieldLocator, LocatorSpec};
use crate::profile::{expand_deep_link, DateEntry, EntryMode, SiteProfile};
use crate::request::{SearchRequest, TripType};
use crate::session::{PageDriver, SessionHandle};
use crate::{FareError, Result, Stage};

#[derive(Debug)]
struct Overlay {
    name: String,
    detect: Box<dyn FieldLocator>,
    dismiss: Vec<Box<dyn FieldLocator>>,
}

#[derive(Debug)]
enum DateInput {
    Typed {
        format: String,
    },
    Calendar {
        day_cell_css: String,
        day_format: String,
        next_month: Box<dyn FieldLocator>,
        max_month_steps: u32,
    },
}

/// Compiled form locators and overlay rules.
#[derive(Debug)]
pub struct FormFiller {
    deep_link: Option<String>,
    overlays: Vec<Overlay>,
    max_dismiss_attempts: u32,
    overlay_retry_interval: Duration,
    trip_menu: Option<Box<dyn FieldLocator>>,
    one_way: Box<dyn FieldLocator>,
    round_trip: Box<dyn FieldLocator>,
    origin: Box<dyn FieldLocator>,
    destination: Box<dyn FieldLocator>,
    departure_date: Box<dyn FieldLocator>,
    return_date: Box<dyn FieldLocator>,
    submit: Box<dyn FieldLocator>,
    clear_selection: Option<Box<dyn FieldLocator>>,
    suggestion: Option<Box<dyn FieldLocator>>,
    date_input: DateInput,
}

fn compile_optional(spec: &Option<LocatorSpec>) -> Result<Option<Box<dyn FieldLocator>>> {
    spec.as_ref().map(LocatorSpec::compile).transpose()
}

/// Locates `locator` in a snapshot and returns a selector for the live page.
fn locate_path(html: &str, locator: &dyn FieldLocator) -> Option<String> {
    let document = Html::parse_document(html);
    locator.locate(document.root_element()).map(css_path)
}

async fn snapshot(page: &dyn PageDriver) -> Result<String> {
    page.content().await.map_err(|e| e.within(Stage::FormFill))
}

async fn click(page: &dyn PageDriver, path: &str) -> Result<()> {
    page.click(path).await.map_err(|e| e.within(Stage::FormFill))
}

impl FormFiller {
    pub fn new(profile: &SiteProfile) -> Result<Self> {
        let form = &profile.form;
        let overlays = profile
            .overlays
            .iter()
            .map(|rule| {
                Ok(Overlay {
                    name: rule.name.clone(),
                    detect: rule.detect.compile()?,
                    dismiss: rule
                        .dismiss
                        .iter()
                        .map(LocatorSpec::compile)
                        .collect::<Result<Vec<_>>>()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let date_input = match &form.date_entry {
            DateEntry::Typed { format } => DateInput::Typed {
                format: format.clone(),
            },
            DateEntry::Calendar {
                day_cell_css,
                day_format,
                next_month,
                max_month_steps,
            } => DateInput::Calendar {
                day_cell_css: day_cell_css.clone(),
                day_format: day_format.clone(),
                next_month: next_month.compile()?,
                max_month_steps: *max_month_steps,
            },
        };
        Ok(Self {
            deep_link: match &profile.entry {
                EntryMode::DeepLink { template } => Some(template.clone()),
                EntryMode::Form => None,
            },
            overlays,
            max_dismiss_attempts: profile.max_dismiss_attempts.max(1),
            overlay_retry_interval: Duration::from_millis(profile.overlay_retry_interval_ms),
            trip_menu: compile_optional(&form.trip_menu)?,
            one_way: form.one_way.compile()?,
            round_trip: form.round_trip.compile()?,
            origin: form.origin.compile()?,
            destination: form.destination.compile()?,
            departure_date: form.departure_date.compile()?,
            return_date: form.return_date.compile()?,
            submit: form.submit.compile()?,
            clear_selection: compile_optional(&form.clear_selection)?,
            suggestion: compile_optional(&form.suggestion)?,
            date_input,
        })
    }

    /// Whether the profile skips the form and navigates to a results URL.
    pub fn uses_deep_link(&self) -> bool {
        self.deep_link.is_some()
    }

    /// Brings the session to the result page for `request`.
    ///
    /// In form mode the session must already show the search form.
    pub async fn fill(
        &self,
        session: &SessionHandle,
        request: &SearchRequest,
        clock: &dyn Clock,
    ) -> Result<()> {
        if let Some(template) = &self.deep_link {
            let url = expand_deep_link(template, request)?;
            info!("Opening results directly: {}", url);
            session.navigate(url.as_str()).await?;
            return self.dismiss_overlays(session.page(), clock).await;
        }
        self.fill_form(session.page(), request, clock).await
    }

    async fn fill_form(
        &self,
        page: &dyn PageDriver,
        request: &SearchRequest,
        clock: &dyn Clock,
    ) -> Result<()> {
        self.dismiss_overlays(page, clock).await?;
        let html = snapshot(page).await?;
        self.check_required(&html, request)?;

        if let Some(menu) = &self.trip_menu {
            let path = self.relocate(page, clock, "trip type menu", menu.as_ref()).await?;
            click(page, &path).await?;
        }
        let path = self
            .relocate(page, clock, "trip type", self.trip_option(request.trip_type()))
            .await?;
        click(page, &path).await?;
        debug!("Selected {} trip", request.trip_type());

        if let Some(clear) = &self.clear_selection {
            let html = snapshot(page).await?;
            if let Some(path) = locate_path(&html, clear.as_ref()) {
                click(page, &path).await?;
                debug!("Cleared prefilled origin");
            }
        }
        self.enter_airport(page, clock, "origin", self.origin.as_ref(), request.origin().as_str())
            .await?;
        self.enter_airport(
            page,
            clock,
            "destination",
            self.destination.as_ref(),
            request.destination().as_str(),
        )
        .await?;

        self.enter_date(page, clock, "departure date", self.departure_date.as_ref(), request.departure())
            .await?;
        if let Some(return_date) = request.return_date() {
            self.enter_date(page, clock, "return date", self.return_date.as_ref(), return_date)
                .await?;
        }

        let path = self.relocate(page, clock, "submit", self.submit.as_ref()).await?;
        click(page, &path).await?;
        info!(
            "Submitted search {} -> {} on {}",
            request.origin(),
            request.destination(),
            request.departure()
        );
        Ok(())
    }

    fn trip_option(&self, trip_type: TripType) -> &dyn FieldLocator {
        match trip_type {
            TripType::OneWay => self.one_way.as_ref(),
            TripType::RoundTrip => self.round_trip.as_ref(),
        }
    }

    /// Fails naming every required control the snapshot lacks.
    fn check_required(&self, html: &str, request: &SearchRequest) -> Result<()> {
        let trip = match &self.trip_menu {
            Some(menu) => menu.as_ref(),
            None => self.trip_option(request.trip_type()),
        };
        let mut required: Vec<(&str, &dyn FieldLocator)> = vec![
            ("trip type", trip),
            ("origin", self.origin.as_ref()),
            ("destination", self.destination.as_ref()),
            ("departure date", self.departure_date.as_ref()),
        ];
        if request.trip_type() == TripType::RoundTrip {
            required.push(("return date", self.return_date.as_ref()));
        }
        required.push(("submit", self.submit.as_ref()));

        let document = Html::parse_document(html);
        let root = document.root_element();
        let missing: Vec<String> = required
            .iter()
            .filter(|(_, locator)| locator.locate(root).is_none())
            .map(|(field, locator)| format!("{} ({})", field, locator.describe()))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(FareError::FormFill(format!(
                "form controls not found: {}",
                missing.join(", ")
            )))
        }
    }

    /// Overlays detected in a snapshot, each with its locatable dismissal
    /// controls in strategy order.
    fn blocking_overlays(&self, html: &str) -> Vec<(String, Vec<String>)> {
        let document = Html::parse_document(html);
        let root = document.root_element();
        self.overlays
            .iter()
            .filter(|overlay| overlay.detect.locate(root).is_some())
            .map(|overlay| {
                let controls = overlay
                    .dismiss
                    .iter()
                    .filter_map(|strategy| strategy.locate(root))
                    .map(css_path)
                    .collect();
                (overlay.name.clone(), controls)
            })
            .collect()
    }

    /// Dismisses every detected overlay, within a bounded number of attempts.
    pub async fn dismiss_overlays(&self, page: &dyn PageDriver, clock: &dyn Clock) -> Result<()> {
        if self.overlays.is_empty() {
            return Ok(());
        }
        for attempt in 1..=self.max_dismiss_attempts {
            let blocking = self.blocking_overlays(&snapshot(page).await?);
            if blocking.is_empty() {
                return Ok(());
            }
            for (name, controls) in blocking {
                if controls.is_empty() {
                    warn!("No dismiss control found for {} overlay", name);
                    continue;
                }
                info!("Dismissing {} overlay (attempt {})", name, attempt);
                for path in controls {
                    match page.click(&path).await {
                        Ok(()) => break,
                        Err(e) => warn!("Dismiss control {} of {} overlay failed: {}", path, name, e),
                    }
                }
            }
            clock.sleep(self.overlay_retry_interval).await;
        }
        let blocking = self.blocking_overlays(&snapshot(page).await?);
        match blocking.first() {
            None => Ok(()),
            Some((name, _)) => Err(FareError::FormFill(format!(
                "{} overlay still blocking after {} attempts",
                name, self.max_dismiss_attempts
            ))),
        }
    }

    /// Re-checks overlays, then locates a control on a fresh snapshot.
    async fn relocate(
        &self,
        page: &dyn PageDriver,
        clock: &dyn Clock,
        field: &str,
        locator: &dyn FieldLocator,
    ) -> Result<String> {
        self.dismiss_overlays(page, clock).await?;
        let html = snapshot(page).await?;
        locate_path(&html, locator).ok_or_else(|| {
            FareError::FormFill(format!(
                "{} control disappeared before interaction ({})",
                field,
                locator.describe()
            ))
        })
    }

    async fn enter_airport(
        &self,
        page: &dyn PageDriver,
        clock: &dyn Clock,
        field: &str,
        locator: &dyn FieldLocator,
        code: &str,
    ) -> Result<()> {
        let path = self.relocate(page, clock, field, locator).await?;
        click(page, &path).await?;
        page.fill(&path, code)
            .await
            .map_err(|e| e.within(Stage::FormFill))?;

        let suggestion = match &self.suggestion {
            Some(suggestion) => locate_path(&snapshot(page).await?, suggestion.as_ref()),
            None => None,
        };
        match suggestion {
            Some(choice) => click(page, &choice).await?,
            None => page
                .press_enter(&path)
                .await
                .map_err(|e| e.within(Stage::FormFill))?,
        }
        debug!("Entered {} {}", field, code);
        Ok(())
    }

    async fn enter_date(
        &self,
        page: &dyn PageDriver,
        clock: &dyn Clock,
        field: &str,
        locator: &dyn FieldLocator,
        date: NaiveDate,
    ) -> Result<()> {
        let path = self.relocate(page, clock, field, locator).await?;
        match &self.date_input {
            DateInput::Typed { format } => {
                page.fill(&path, &date.format(format).to_string())
                    .await
                    .map_err(|e| e.within(Stage::FormFill))?;
            }
            DateInput::Calendar {
                day_cell_css,
                day_format,
                next_month,
                max_month_steps,
            } => {
                click(page, &path).await?;
                let label = date.format(day_format).to_string();
                let cell_css = day_cell_css.replace("{date}", &label);
                self.pick_day(page, field, &cell_css, next_month.as_ref(), *max_month_steps)
                    .await?;
            }
        }
        debug!("Entered {} {}", field, date);
        Ok(())
    }

    /// Pages the open date picker forward until the day cell shows, then clicks it.
    async fn pick_day(
        &self,
        page: &dyn PageDriver,
        field: &str,
        cell_css: &str,
        next_month: &dyn FieldLocator,
        max_month_steps: u32,
    ) -> Result<()> {
        for step in 0..=max_month_steps {
            let html = snapshot(page).await?;
            let (cell, next) = calendar_controls(&html, cell_css, next_month)?;
            if let Some(cell) = cell {
                return click(page, &cell).await;
            }
            if step == max_month_steps {
                break;
            }
            let next = next.ok_or_else(|| {
                FareError::FormFill(format!("{}: next month control not found", field))
            })?;
            click(page, &next).await?;
        }
        Err(FareError::FormFill(format!(
            "{}: day '{}' not shown within {} months",
            field, cell_css, max_month_steps
        )))
    }
}

fn calendar_controls(
    html: &str,
    cell_css: &str,
    next_month: &dyn FieldLocator,
) -> Result<(Option<String>, Option<String>)> {
    let selector = parse_selector(cell_css)?;
    let document = Html::parse_document(html);
    let cell = document.select(&selector).next().map(css_path);
    let next = next_month.locate(document.root_element()).map(css_path);
    Ok((cell, next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::profile::OverlayRule;
    use crate::testing::{Interaction, ScriptedLauncher, ScriptedPage};

    const HOME: &str = r#"<html><body><form>
        <div id="trip" role="button" aria-label="Trip type">Round-trip</div>
        <ul role="listbox"><li id="ow" role="option">One-way</li><li id="rt" role="option">Round-trip</li></ul>
        <input id="origin" aria-label="Flight origin">
        <input id="dest" aria-label="Flight destination">
        <input id="depart" aria-label="Departure">
        <input id="return" aria-label="Return">
        <button id="search" type="submit">Search</button>
    </form></body></html>"#;

    fn with_cookie_banner(html: &str) -> String {
        html.replace(
            "<body>",
            r#"<body><div id="cookie"><p>We use cookies</p><button id="accept">Accept all</button></div>"#,
        )
    }

    fn profile() -> SiteProfile {
        let mut profile = SiteProfile::kayak();
        profile.form.trip_menu = Some(LocatorSpec::css("#trip"));
        profile.form.one_way = LocatorSpec::css("#ow");
        profile.form.round_trip = LocatorSpec::css("#rt");
        profile.form.origin = LocatorSpec::css("#origin");
        profile.form.destination = LocatorSpec::css("#dest");
        profile.form.departure_date = LocatorSpec::css("#depart");
        profile.form.return_date = LocatorSpec::css("#return");
        profile.form.submit = LocatorSpec::css("#search");
        profile.form.clear_selection = None;
        profile.form.suggestion = None;
        profile.form.date_entry = DateEntry::Typed {
            format: "%Y-%m-%d".into(),
        };
        profile.overlays = vec![OverlayRule {
            name: "cookie consent".into(),
            detect: LocatorSpec::css("#cookie"),
            dismiss: vec![LocatorSpec::css("#reject"), LocatorSpec::css("#accept")],
        }];
        profile
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn run(profile: &SiteProfile, page: ScriptedPage, request: &SearchRequest) -> (Result<()>, ScriptedPage) {
        let launcher = ScriptedLauncher::new(page.clone());
        let session = SessionHandle::acquire(&launcher, Duration::from_secs(1)).await.unwrap();
        let clock = ManualClock::default();
        let result = FormFiller::new(profile).unwrap().fill(&session, request, &clock).await;
        session.release().await;
        (result, page)
    }

    fn fill(target: &str, text: &str) -> Interaction {
        Interaction::Fill {
            target: target.into(),
            text: text.into(),
        }
    }

    fn click(target: &str) -> Interaction {
        Interaction::Click(target.into())
    }

    #[tokio::test]
    async fn test_one_way_fill_sequence() {
        let page = ScriptedPage::new(with_cookie_banner(HOME)).on_click("#accept", HOME);
        let request = SearchRequest::one_way("JFK", "LAX", date(2026, 12, 15)).unwrap();
        let (result, page) = run(&profile(), page, &request).await;
        result.unwrap();
        assert_eq!(
            page.interactions(),
            vec![
                click("accept"),
                click("trip"),
                click("ow"),
                click("origin"),
                fill("origin", "JFK"),
                Interaction::Enter("origin".into()),
                click("dest"),
                fill("dest", "LAX"),
                Interaction::Enter("dest".into()),
                fill("depart", "2026-12-15"),
                click("search"),
            ]
        );
    }

    #[tokio::test]
    async fn test_round_trip_enters_return_date() {
        let request =
            SearchRequest::round_trip("PAR", "SFO", date(2026, 6, 17), date(2026, 6, 24)).unwrap();
        let (result, page) = run(&profile(), ScriptedPage::new(HOME), &request).await;
        result.unwrap();
        let log = page.interactions();
        assert!(log.contains(&click("rt")));
        assert!(!log.contains(&click("ow")));
        assert!(log.contains(&fill("return", "2026-06-24")));
        assert_eq!(log.last(), Some(&click("search")));
    }

    #[tokio::test]
    async fn test_missing_control_aborts_before_any_input() {
        let page = ScriptedPage::new(HOME.replace(r#"<input id="dest" aria-label="Flight destination">"#, ""));
        let request = SearchRequest::one_way("JFK", "LAX", date(2026, 12, 15)).unwrap();
        let (result, page) = run(&profile(), page, &request).await;
        let err = result.unwrap_err();
        assert!(matches!(err, FareError::FormFill(ref r) if r.contains("destination")));
        assert!(page.interactions().is_empty());
    }

    #[tokio::test]
    async fn test_return_control_only_required_for_round_trip() {
        let page = ScriptedPage::new(HOME.replace(r#"<input id="return" aria-label="Return">"#, ""));
        let request = SearchRequest::one_way("JFK", "LAX", date(2026, 12, 15)).unwrap();
        let (result, _) = run(&profile(), page, &request).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stubborn_overlay_fails_after_bounded_attempts() {
        let page = ScriptedPage::new(with_cookie_banner(HOME));
        let request = SearchRequest::one_way("JFK", "LAX", date(2026, 12, 15)).unwrap();
        let (result, page) = run(&profile(), page, &request).await;
        let err = result.unwrap_err();
        assert!(matches!(err, FareError::FormFill(ref r) if r.contains("cookie consent")));
        assert_eq!(page.interactions(), vec![click("accept"); 3]);
    }

    #[tokio::test]
    async fn test_failed_dismiss_falls_through_to_next_strategy() {
        let banner = HOME.replace(
            "<body>",
            r#"<body><div id="cookie"><button id="reject">Reject</button><button id="accept">Accept all</button></div>"#,
        );
        let page = ScriptedPage::new(banner)
            .failing_click("#reject")
            .on_click("#accept", HOME);
        let request = SearchRequest::one_way("JFK", "LAX", date(2026, 12, 15)).unwrap();
        let (result, page) = run(&profile(), page, &request).await;
        result.unwrap();
        let log = page.interactions();
        assert_eq!(log.first(), Some(&click("accept")));
        assert_eq!(log.iter().filter(|i| **i == click("accept")).count(), 1);
    }

    #[tokio::test]
    async fn test_overlay_appearing_mid_form_is_dismissed() {
        let popup = with_cookie_banner(HOME);
        let page = ScriptedPage::new(HOME)
            .on_click("#ow", popup)
            .on_click("#accept", HOME);
        let request = SearchRequest::one_way("JFK", "LAX", date(2026, 12, 15)).unwrap();
        let (result, page) = run(&profile(), page, &request).await;
        result.unwrap();
        let log = page.interactions();
        let ow = log.iter().position(|i| *i == click("ow")).unwrap();
        assert_eq!(log[ow + 1], click("accept"));
        assert_eq!(log.last(), Some(&click("search")));
    }

    #[tokio::test]
    async fn test_suggestion_clicked_when_present() {
        let mut profile = profile();
        profile.form.suggestion = Some(LocatorSpec::css("#suggest li"));
        let html = HOME.replace(
            "</form>",
            r#"</form><ul id="suggest"><li id="s1">John F Kennedy Intl</li></ul>"#,
        );
        let request = SearchRequest::one_way("JFK", "LAX", date(2026, 12, 15)).unwrap();
        let (result, page) = run(&profile, ScriptedPage::new(html), &request).await;
        result.unwrap();
        let log = page.interactions();
        assert!(log.contains(&click("s1")));
        assert!(!log.contains(&Interaction::Enter("origin".into())));
    }

    fn month(label: &str, next_id: &str, days: &str) -> String {
        format!(
            r#"<html><body><div role="dialog"><h2>{}</h2><button id="{}" class="next">›</button>{}</div></body></html>"#,
            label, next_id, days
        )
    }

    fn calendar_profile(max_month_steps: u32) -> SiteProfile {
        let mut profile = profile();
        profile.overlays.clear();
        profile.form.date_entry = DateEntry::Calendar {
            day_cell_css: "[data-date=\"{date}\"]".into(),
            day_format: "%Y-%m-%d".into(),
            next_month: LocatorSpec::css(".next"),
            max_month_steps,
        };
        profile
    }

    fn calendar_page() -> ScriptedPage {
        let december = month(
            "December 2026",
            "next-jan",
            r#"<span id="d15" data-date="2026-12-15">15</span>"#,
        );
        ScriptedPage::new(HOME)
            .on_click("#depart", month("October 2026", "next-nov", ""))
            .on_click("#next-nov", month("November 2026", "next-dec", ""))
            .on_click("#next-dec", december)
            .on_click("#d15", HOME)
    }

    #[tokio::test]
    async fn test_calendar_pages_forward_to_day() {
        let request = SearchRequest::one_way("JFK", "LAX", date(2026, 12, 15)).unwrap();
        let (result, page) = run(&calendar_profile(13), calendar_page(), &request).await;
        result.unwrap();
        let log = page.interactions();
        let start = log.iter().position(|i| *i == click("depart")).unwrap();
        assert_eq!(
            &log[start..],
            &[
                click("depart"),
                click("next-nov"),
                click("next-dec"),
                click("d15"),
                click("search")
            ]
        );
    }

    #[tokio::test]
    async fn test_calendar_gives_up_after_max_steps() {
        let request = SearchRequest::one_way("JFK", "LAX", date(2026, 12, 15)).unwrap();
        let (result, page) = run(&calendar_profile(1), calendar_page(), &request).await;
        let err = result.unwrap_err();
        assert!(matches!(err, FareError::FormFill(ref r) if r.contains("departure date")));
        assert!(!page.interactions().contains(&click("search")));
    }

    #[tokio::test]
    async fn test_deep_link_navigates_instead_of_filling() {
        let mut profile = profile();
        profile.overlays.clear();
        profile.entry = EntryMode::DeepLink {
            template: "https://www.kayak.com/flights/{origin}-{destination}/{departure}{return_segment}".into(),
        };
        let request = SearchRequest::one_way("JFK", "LAX", date(2026, 12, 15)).unwrap();
        let (result, page) = run(&profile, ScriptedPage::new("<html></html>"), &request).await;
        result.unwrap();
        assert_eq!(
            page.visited(),
            vec!["https://www.kayak.com/flights/JFK-LAX/2026-12-15".to_string()]
        );
        assert!(page.interactions().is_empty());
        assert_eq!(page.content_calls(), 0);
    }
}
