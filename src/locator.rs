//! Field locators: swappable strategies for finding elements in a page snapshot.
//!
//! Locators are declared in the site profile as [`LocatorSpec`] values and
//! compiled once into [`FieldLocator`] trait objects. All strategies run
//! against a parsed DOM snapshot; interaction with the live page goes through
//! [`css_path`], which turns a located element into a selector the browser
//! can resolve.

use std::fmt;

use scraper::{ElementRef, Selector};
use serde::{Deserialize, Serialize};

use crate::{FareError, Result};

/// Capability interface for finding elements within a scope.
pub trait FieldLocator: Send + Sync + fmt::Debug {
    /// Returns all matches within `scope`, in document order.
    fn locate_all<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>>;

    /// Human-readable description for error messages.
    fn describe(&self) -> String;

    /// Returns the first match within `scope`.
    fn locate<'a>(&self, scope: ElementRef<'a>) -> Option<ElementRef<'a>> {
        self.locate_all(scope).into_iter().next()
    }
}

/// Declarative locator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LocatorSpec {
    /// Plain CSS selector.
    Css { css: String },
    /// ARIA role (explicit or implicit) with an optional accessible-name filter.
    Role {
        role: String,
        #[serde(default)]
        name: Option<String>,
    },
    /// Innermost element whose text contains `text` (case-insensitive).
    Text {
        text: String,
        /// Restricts candidates to this CSS selector.
        #[serde(default)]
        within: Option<String>,
    },
    /// The `index`-th (zero-based) match of a CSS selector.
    Position { css: String, index: usize },
    /// Tries each locator in order and uses the first that matches anything.
    FirstOf { locators: Vec<LocatorSpec> },
}

impl LocatorSpec {
    pub fn css(css: impl Into<String>) -> Self {
        LocatorSpec::Css { css: css.into() }
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        LocatorSpec::Role {
            role: role.into(),
            name: Some(name.into()),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        LocatorSpec::Text {
            text: text.into(),
            within: None,
        }
    }

    pub fn first_of(locators: Vec<LocatorSpec>) -> Self {
        LocatorSpec::FirstOf { locators }
    }

    /// Compiles into a locator, validating all selectors.
    pub fn compile(&self) -> Result<Box<dyn FieldLocator>> {
        Ok(match self {
            LocatorSpec::Css { css } => Box::new(CssLocator::new(css)?),
            LocatorSpec::Role { role, name } => Box::new(RoleLocator::new(role, name.as_deref())?),
            LocatorSpec::Text { text, within } => {
                Box::new(TextLocator::new(text, within.as_deref())?)
            }
            LocatorSpec::Position { css, index } => Box::new(PositionalLocator::new(css, *index)?),
            LocatorSpec::FirstOf { locators } => {
                if locators.is_empty() {
                    return Err(FareError::Config("first_of locator has no strategies".into()));
                }
                let compiled = locators
                    .iter()
                    .map(LocatorSpec::compile)
                    .collect::<Result<Vec<_>>>()?;
                Box::new(FallbackLocator::new(compiled))
            }
        })
    }
}

pub(crate) fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| FareError::Config(format!("invalid selector '{}': {:?}", css, e)))
}

/// Collapsed text content of an element.
pub fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Builds an absolute `:nth-child` selector path for an element.
pub fn css_path(element: ElementRef<'_>) -> String {
    let mut segments = Vec::new();
    let mut current = Some(element);
    while let Some(el) = current {
        let name = el.value().name();
        let parent = el.parent().and_then(ElementRef::wrap);
        if parent.is_some() {
            let index = el
                .prev_siblings()
                .filter(|node| node.value().is_element())
                .count()
                + 1;
            segments.push(format!("{}:nth-child({})", name, index));
        } else {
            segments.push(name.to_string());
        }
        current = parent;
    }
    segments.reverse();
    segments.join(" > ")
}

/// CSS selector strategy.
#[derive(Debug)]
pub struct CssLocator {
    css: String,
    selector: Selector,
}

impl CssLocator {
    pub fn new(css: &str) -> Result<Self> {
        Ok(Self {
            css: css.to_string(),
            selector: parse_selector(css)?,
        })
    }
}

impl FieldLocator for CssLocator {
    fn locate_all<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        scope.select(&self.selector).collect()
    }

    fn describe(&self) -> String {
        format!("css `{}`", self.css)
    }
}

/// Role-based strategy matching explicit `role` attributes and implicit roles.
#[derive(Debug)]
pub struct RoleLocator {
    role: String,
    name: Option<String>,
    selector: Selector,
}

impl RoleLocator {
    pub fn new(role: &str, name: Option<&str>) -> Result<Self> {
        let role = role.trim().to_ascii_lowercase();
        let selector = parse_selector(&implicit_role_selector(&role))?;
        Ok(Self {
            role,
            name: name.map(str::to_string),
            selector,
        })
    }
}

fn implicit_role_selector(role: &str) -> String {
    let implicit = match role {
        "button" => "button, input[type=\"submit\"], input[type=\"button\"]",
        "textbox" => "input:not([type]), input[type=\"text\"], input[type=\"search\"], textarea",
        "combobox" => "select, input[list]",
        "link" => "a[href]",
        "radio" => "input[type=\"radio\"]",
        "checkbox" => "input[type=\"checkbox\"]",
        "dialog" => "dialog",
        "list" => "ul, ol",
        "listitem" => "li",
        "heading" => "h1, h2, h3, h4, h5, h6",
        _ => "",
    };
    if implicit.is_empty() {
        format!("[role=\"{}\"]", role)
    } else {
        format!("[role=\"{}\"], {}", role, implicit)
    }
}

/// Approximates the accessible name of an element.
fn accessible_name(element: ElementRef<'_>) -> String {
    let attrs = element.value();
    for attr in ["aria-label", "placeholder", "title", "alt"] {
        if let Some(value) = attrs.attr(attr).map(str::trim).filter(|v| !v.is_empty()) {
            return value.to_string();
        }
    }
    if let Some(label) = attrs.id().and_then(|id| label_for(element, id)) {
        return label;
    }
    if let Some(value) = attrs.attr("value").filter(|_| attrs.name() == "input") {
        return value.trim().to_string();
    }
    element_text(element)
}

fn label_for(element: ElementRef<'_>, id: &str) -> Option<String> {
    let root = element.ancestors().filter_map(ElementRef::wrap).last()?;
    let selector = Selector::parse(&format!("label[for=\"{}\"]", id.replace('"', "\\\""))).ok()?;
    root.select(&selector).next().map(element_text)
}

impl FieldLocator for RoleLocator {
    fn locate_all<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        scope
            .select(&self.selector)
            .filter(|el| match &self.name {
                Some(name) => contains_ignore_case(&accessible_name(*el), name),
                None => true,
            })
            .collect()
    }

    fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("role `{}` named \"{}\"", self.role, name),
            None => format!("role `{}`", self.role),
        }
    }
}

/// Text-based strategy returning the innermost elements containing a string.
#[derive(Debug)]
pub struct TextLocator {
    text: String,
    selector: Selector,
}

impl TextLocator {
    pub fn new(text: &str, within: Option<&str>) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(FareError::Config("text locator needs non-empty text".into()));
        }
        Ok(Self {
            text: text.trim().to_string(),
            selector: parse_selector(within.unwrap_or("*"))?,
        })
    }
}

impl FieldLocator for TextLocator {
    fn locate_all<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        scope
            .select(&self.selector)
            .filter(|el| {
                let name = el.value().name();
                name != "script" && name != "style"
            })
            .filter(|el| contains_ignore_case(&element_text(*el), &self.text))
            .filter(|el| {
                !el.children()
                    .filter_map(ElementRef::wrap)
                    .any(|child| contains_ignore_case(&element_text(child), &self.text))
            })
            .collect()
    }

    fn describe(&self) -> String {
        format!("text \"{}\"", self.text)
    }
}

/// Positional fallback: the n-th match of a selector.
#[derive(Debug)]
pub struct PositionalLocator {
    css: String,
    index: usize,
    selector: Selector,
}

impl PositionalLocator {
    pub fn new(css: &str, index: usize) -> Result<Self> {
        Ok(Self {
            css: css.to_string(),
            index,
            selector: parse_selector(css)?,
        })
    }
}

impl FieldLocator for PositionalLocator {
    fn locate_all<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        scope.select(&self.selector).nth(self.index).into_iter().collect()
    }

    fn describe(&self) -> String {
        format!("match #{} of `{}`", self.index, self.css)
    }
}

/// Ordered chain of strategies; the first one with matches wins.
#[derive(Debug)]
pub struct FallbackLocator {
    strategies: Vec<Box<dyn FieldLocator>>,
}

impl FallbackLocator {
    pub fn new(strategies: Vec<Box<dyn FieldLocator>>) -> Self {
        Self { strategies }
    }
}

impl FieldLocator for FallbackLocator {
    fn locate_all<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        self.strategies
            .iter()
            .map(|strategy| strategy.locate_all(scope))
            .find(|matches| !matches.is_empty())
            .unwrap_or_default()
    }

    fn describe(&self) -> String {
        let parts: Vec<_> = self.strategies.iter().map(|s| s.describe()).collect();
        format!("first of [{}]", parts.join(", "))
    }
}
