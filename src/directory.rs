use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::extract::text::{element_text, squash_ws};
use crate::fetch::{FetchError, Fetcher};

pub const BASE: &str = "https://www.vatican.va/";
pub const POPE_INDEX_URL: &str = "https://www.vatican.va/holy_father/index.htm";

static ROMAN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[IVXLCDM]+$").unwrap());
static TITLECASE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z][a-z]+$").unwrap());
static CONTENT_LINK_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        "#corpo a[href*='/content/'][href$='en.html'], #corpo a[href*='/content/'][href$='en.htm']",
    )
    .unwrap()
});
static ANY_ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// One entry of the pope directory. The slug identifies the pope's whole
/// content tree; the landing URL is the English landing page.
#[derive(Debug, Clone)]
pub struct PopeRecord {
    pub display_name: String,
    pub slug: String,
    pub landing_url: String,
}

/// Collapse whitespace and trim a display name.
pub fn normalize_display_name(name: &str) -> String {
    squash_ws(name)
}

/// Accept a single Title-case word ("Francis"), or two or more words whose
/// last token is an uppercase Roman numeral and whose preceding tokens are
/// Title-case ("John Paul II"). Rejects navigational text like
/// "ROMAN CURIA" and lowercase numerals ("Paul vi").
pub fn looks_like_pope_name(name: &str) -> bool {
    let name = normalize_display_name(name);
    if name.is_empty() {
        return false;
    }
    let parts: Vec<&str> = name.split(' ').collect();
    if parts.len() == 1 {
        return TITLECASE_RE.is_match(parts[0]);
    }
    if !ROMAN_RE.is_match(parts[parts.len() - 1]) {
        return false;
    }
    parts[..parts.len() - 1]
        .iter()
        .all(|p| TITLECASE_RE.is_match(p))
}

/// Slug from a landing URL like
/// `https://www.vatican.va/content/francesco/en.html` -> `francesco`.
pub fn slug_from_content_url(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    if segments.len() >= 3 && segments[0] == "content" {
        Some(segments[1].to_string())
    } else {
        None
    }
}

/// Fetch the master pope index and return the directory, deduplicated by
/// slug in page order.
pub fn list_popes(fetcher: &Fetcher) -> Result<Vec<PopeRecord>, FetchError> {
    let page = fetcher.fetch(POPE_INDEX_URL)?;
    Ok(parse_pope_directory(&page.html, &page.final_url))
}

pub fn parse_pope_directory(html: &str, page_url: &Url) -> Vec<PopeRecord> {
    let doc = Html::parse_document(html);

    let scoped: Vec<_> = doc.select(&CONTENT_LINK_SEL).collect();
    let candidates: Vec<_> = if scoped.is_empty() {
        doc.select(&ANY_ANCHOR_SEL).collect()
    } else {
        scoped
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut records = Vec::new();
    for a in candidates {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        if !href.contains("/content/") || !(href.ends_with("en.html") || href.ends_with("en.htm"))
        {
            continue;
        }
        let name = normalize_display_name(&element_text(a, " "));
        if !looks_like_pope_name(&name) {
            continue;
        }
        let Ok(url) = page_url.join(href) else {
            continue;
        };
        let Some(slug) = slug_from_content_url(&url) else {
            continue;
        };
        if seen.insert(slug.clone()) {
            records.push(PopeRecord {
                display_name: name,
                slug,
                landing_url: url.to_string(),
            });
        }
    }
    records
}

/// Case-insensitive, whitespace-normalized exact match; first match wins.
pub fn find_pope<'a>(popes: &'a [PopeRecord], name: &str) -> Option<&'a PopeRecord> {
    let key = normalize_display_name(name).to_lowercase();
    popes
        .iter()
        .find(|p| normalize_display_name(&p.display_name).to_lowercase() == key)
}

// ── Tests ──
