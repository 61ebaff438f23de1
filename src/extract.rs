//! Heuristic target-URL extraction over a rendered page.
//!
//! The browser hands us a [`DocumentSnapshot`]: a flat, document-ordered list of
//! the buttons, links and containers on the page. [`find_candidate`] walks it,
//! keeps elements whose visible text carries an action phrase ("get link",
//! "download", ...) and returns the first one whose target URL can be recovered
//! from its link, click handler or data attributes.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

/// Elements scanned on a gate page, in document order.
pub const SCANNED_ELEMENTS: &str = "button, a, div, span";

/// Phrases that mark the real action element.
pub const STRICT_PHRASES: &[&str] = &["get link", "getlink", "download"];

/// Extra phrases accepted once the strict pass has come up empty.
pub const RELAXED_EXTRA_PHRASES: &[&str] = &["continue", "proceed"];

/// Data attributes checked, in order, by the relaxed rules.
pub const DATA_ATTRIBUTES: &[&str] = &["data-href", "data-url", "data-link"];

/// Page script producing a JSON [`DocumentSnapshot`].
///
/// `href` is read through the DOM property so the browser has already resolved
/// it against the document base.
pub const SNAPSHOT_JS: &str = r#"
    (() => {
        const attr = (el, name) => el.getAttribute(name);
        const elements = Array.from(document.querySelectorAll('button, a, div, span')).map(el => ({
            tag: el.tagName.toLowerCase(),
            text: (el.textContent || '').trim(),
            href: typeof el.href === 'string' ? el.href : attr(el, 'href'),
            onclick: attr(el, 'onclick'),
            data_href: attr(el, 'data-href'),
            data_url: attr(el, 'data-url'),
            data_link: attr(el, 'data-link'),
        }));
        return JSON.stringify({ url: window.location.href, elements });
    })()
"#;

static CLICK_HANDLER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"window\.open\(\s*['"]([^'"]+)['"]"#,
        r#"location\.href\s*=\s*['"]([^'"]+)['"]"#,
        r#"(?:window|document)\.location\s*=\s*['"]([^'"]+)['"]"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid click handler regex"))
    .collect()
});

static SCANNED_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(SCANNED_ELEMENTS).expect("valid element selector"));

/// One scanned element as seen at snapshot time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotElement {
    pub tag: String,
    /// Visible text, trimmed but not case-folded
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub onclick: Option<String>,
    #[serde(default)]
    pub data_href: Option<String>,
    #[serde(default)]
    pub data_url: Option<String>,
    #[serde(default)]
    pub data_link: Option<String>,
}

impl SnapshotElement {
    fn data_attribute(&self, name: &str) -> Option<&str> {
        match name {
            "data-href" => self.data_href.as_deref(),
            "data-url" => self.data_url.as_deref(),
            "data-link" => self.data_link.as_deref(),
            _ => None,
        }
    }
}

/// Serializable view of a rendered page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    /// URL of the page the snapshot was taken from
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub elements: Vec<SnapshotElement>,
}

impl DocumentSnapshot {
    /// Parse the output of [`SNAPSHOT_JS`].
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("page snapshot is not valid JSON")
    }

    /// Build a snapshot from serialized page HTML.
    pub fn from_html(html: &str, page_url: &str) -> Self {
        let document = Html::parse_document(html);
        let elements = document
            .select(&SCANNED_SELECTOR)
            .map(|el| {
                let value = el.value();
                let attr = |name: &str| value.attr(name).map(str::to_string);
                SnapshotElement {
                    tag: value.name().to_string(),
                    text: el.text().collect::<String>().trim().to_string(),
                    href: attr("href"),
                    onclick: attr("onclick"),
                    data_href: attr("data-href"),
                    data_url: attr("data-url"),
                    data_link: attr("data-link"),
                }
            })
            .collect();

        Self {
            url: page_url.to_string(),
            elements,
        }
    }
}

/// Lower-cased action phrases an element's text is matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseSet {
    phrases: Vec<String>,
}

impl PhraseSet {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn strict() -> Self {
        Self::new(STRICT_PHRASES)
    }

    pub fn relaxed() -> Self {
        Self::new(STRICT_PHRASES.iter().chain(RELAXED_EXTRA_PHRASES))
    }

    /// First phrase contained in `text` (already lower-cased).
    pub fn matched_in(&self, text: &str) -> Option<&str> {
        self.phrases
            .iter()
            .find(|phrase| text.contains(phrase.as_str()))
            .map(String::as_str)
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}

/// Where on a candidate the target URL may be read from.
///
/// The link attribute and the click handler are always consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetRules {
    pub data_attributes: bool,
}

impl TargetRules {
    pub fn strict() -> Self {
        Self {
            data_attributes: false,
        }
    }

    pub fn relaxed() -> Self {
        Self {
            data_attributes: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSource {
    Href,
    ClickHandler,
    DataAttribute(&'static str),
}

/// An element that matched a phrase and yielded a target URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Position among the snapshot's elements
    pub position: usize,
    pub tag: String,
    pub phrase: String,
    pub url: String,
    pub source: TargetSource,
}

/// First element, in document order, whose text carries one of `phrases` and
/// whose target URL can be recovered under `rules`.
pub fn find_candidate(
    snapshot: &DocumentSnapshot,
    phrases: &PhraseSet,
    rules: TargetRules,
) -> Option<Candidate> {
    let base = Url::parse(&snapshot.url).ok();

    snapshot
        .elements
        .iter()
        .enumerate()
        .find_map(|(position, element)| {
            let text = element.text.trim().to_lowercase();
            if text.is_empty() {
                return None;
            }
            let phrase = phrases.matched_in(&text)?;
            let (url, source) = resolve_target(element, base.as_ref(), rules)?;
            Some(Candidate {
                position,
                tag: element.tag.clone(),
                phrase: phrase.to_string(),
                url,
                source,
            })
        })
}

fn resolve_target(
    element: &SnapshotElement,
    base: Option<&Url>,
    rules: TargetRules,
) -> Option<(String, TargetSource)> {
    if let Some(url) = element.href.as_deref().and_then(|href| absolute_url(href, base)) {
        return Some((url, TargetSource::Href));
    }

    if let Some(url) = element
        .onclick
        .as_deref()
        .into_iter()
        .flat_map(urls_in_click_handler)
        .find_map(|raw| absolute_url(raw, base))
    {
        return Some((url, TargetSource::ClickHandler));
    }

    if rules.data_attributes {
        for name in DATA_ATTRIBUTES {
            if let Some(url) = element
                .data_attribute(name)
                .and_then(|raw| absolute_url(raw, base))
            {
                return Some((url, TargetSource::DataAttribute(*name)));
            }
        }
    }

    None
}

/// Quoted URL opened or assigned by an inline click handler.
pub fn url_in_click_handler(handler: &str) -> Option<String> {
    urls_in_click_handler(handler).next().map(str::to_string)
}

/// Every quoted URL a click handler opens or assigns, pattern by pattern.
fn urls_in_click_handler(handler: &str) -> impl Iterator<Item = &str> {
    CLICK_HANDLER_PATTERNS.iter().flat_map(move |re| {
        re.captures_iter(handler)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
    })
}

/// Absolute http(s) URL for `raw`, resolving relative references against
/// `base`. References back to the page itself are rejected. Absolute input is
/// returned as written.
fn absolute_url(raw: &str, base: Option<&Url>) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') || raw.to_lowercase().starts_with("javascript:") {
        return None;
    }

    let (url, as_written) = match Url::parse(raw) {
        Ok(url) => (url, true),
        Err(_) => (base?.join(raw).ok()?, false),
    };
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    if base.is_some_and(|page| same_document(page, &url)) {
        return None;
    }

    Some(if as_written { raw.to_string() } else { url.to_string() })
}

fn same_document(a: &Url, b: &Url) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    a.set_fragment(None);
    b.set_fragment(None);
    a == b
}
