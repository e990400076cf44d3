use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::directory::BASE;
use crate::extract::text::element_text;
use crate::pipeline::PipelineError;

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").unwrap());
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d+)\b").unwrap());
static SUBTITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".subtitle").unwrap());
static SINOTTICO_ROW_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".sinottico tr").unwrap());
static YEAR_ANCHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".open a[href*='/content/']").unwrap());
static ANY_ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// A validated content-section name ("angelus", "audiences", "speeches").
/// Validation happens before the name is embedded in URL-matching regexes,
/// so malformed input can never produce a broken pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section(String);

impl Section {
    pub fn parse(name: &str) -> Result<Self, PipelineError> {
        let s = name.trim().to_lowercase();
        if SECTION_RE.is_match(&s) {
            Ok(Section(s))
        } else {
            Err(PipelineError::InvalidSection(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a year spec like "2019,2021-2023" into a sorted, deduplicated
/// list. Reversed ranges are normalized; non-numeric parts are ignored.
pub fn parse_years(spec: &str) -> Vec<i32> {
    let mut years: HashSet<i32> = HashSet::new();
    for part in spec.split(',').map(str::trim) {
        if part.is_empty() {
            continue;
        }
        if let Some((a, b)) = part.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (a.trim().parse::<i32>(), b.trim().parse::<i32>()) {
                let (lo, hi) = if lo > hi { (hi, lo) } else { (lo, hi) };
                years.extend(lo..=hi);
            }
        } else if let Ok(y) = part.parse::<i32>() {
            years.insert(y);
        }
    }
    let mut out: Vec<i32> = years.into_iter().collect();
    out.sort_unstable();
    out
}

/// Biographical header fields from a pope's landing page. Every field is
/// optional; a missing pontificate end means the pope is still reigning.
#[derive(Debug, Clone, Default)]
pub struct PopeMetadata {
    pub pope_number: Option<String>,
    pub pontificate_begin: Option<String>,
    pub pontificate_end: Option<String>,
    pub secular_name: Option<String>,
    pub place_of_birth: Option<String>,
}

// The summary table is served in the language of the landing page, so
// labels are matched against the variants seen across the site.
const BEGIN_LABELS: &[&str] = &[
    "beginning of pontificate",
    "inizio pontificato",
    "inizio del pontificato",
    "début du pontificat",
];
const END_LABELS: &[&str] = &[
    "end of pontificate",
    "fine pontificato",
    "fine del pontificato",
    "fin du pontificat",
];
const SECULAR_LABELS: &[&str] = &["secular name", "name", "nome", "nome secolare", "nom"];
const BIRTH_LABELS: &[&str] = &[
    "place of birth",
    "birthplace",
    "luogo di nascita",
    "lieu de naissance",
];
const NUMBER_LABELS: &[&str] = &["number", "pope number", "numero", "numéro"];

pub fn fetch_metadata(html: &str) -> PopeMetadata {
    let doc = Html::parse_document(html);
    let mut meta = PopeMetadata::default();

    for row in doc.select(&SINOTTICO_ROW_SEL) {
        let cells: Vec<ElementRef> = row
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|el| {
                let name = el.value().name();
                name == "td" || name == "th"
            })
            .collect();
        if cells.len() < 2 {
            continue;
        }
        let label = normalize_label(&element_text(cells[0], " "));
        let value = element_text(cells[1], " ");
        if value.is_empty() {
            continue;
        }
        if BEGIN_LABELS.contains(&label.as_str()) {
            meta.pontificate_begin.get_or_insert(value);
        } else if END_LABELS.contains(&label.as_str()) {
            meta.pontificate_end.get_or_insert(value);
        } else if SECULAR_LABELS.contains(&label.as_str()) {
            meta.secular_name.get_or_insert(value);
        } else if BIRTH_LABELS.contains(&label.as_str()) {
            meta.place_of_birth.get_or_insert(value);
        } else if NUMBER_LABELS.contains(&label.as_str()) {
            meta.pope_number.get_or_insert(value);
        }
    }

    // The subtitle ("266th Pope of the Catholic Church") outranks any
    // table value for the pope number.
    if let Some(subtitle) = doc.select(&SUBTITLE_SEL).next() {
        let text = element_text(subtitle, " ");
        if !text.is_empty() {
            let number = NUMBER_RE
                .captures(&text)
                .map(|c| c[1].to_string())
                .unwrap_or(text);
            meta.pope_number = Some(number);
        }
    }

    meta
}

fn normalize_label(label: &str) -> String {
    label
        .trim()
        .trim_end_matches([':', '.', ';'])
        .trim()
        .to_lowercase()
}

/// One year-archive index page for a (pope, section, year).
#[derive(Debug, Clone)]
pub struct YearLink {
    pub year: i32,
    pub url: String,
}

fn year_href_re(section: &Section) -> Regex {
    Regex::new(&format!(
        r"/content/([^/]+)/en/{}/(\d{{4}})(?:\.index)?\.html?$",
        regex::escape(section.as_str())
    ))
    .unwrap()
}

fn candidate_anchors(doc: &Html) -> Vec<ElementRef<'_>> {
    let scoped: Vec<_> = doc.select(&YEAR_ANCHOR_SEL).collect();
    if scoped.is_empty() {
        doc.select(&ANY_ANCHOR_SEL).collect()
    } else {
        scoped
    }
}

/// Year index links on a landing page for the requested years, one URL per
/// year, first occurrence winning. Links to other popes' trees are skipped.
pub fn list_year_links(
    html: &str,
    slug: &str,
    years: &[i32],
    section: &Section,
) -> Vec<YearLink> {
    let doc = Html::parse_document(html);
    let href_re = year_href_re(section);
    let base = Url::parse(BASE).expect("base url is valid");

    let mut found: Vec<YearLink> = Vec::new();
    for a in candidate_anchors(&doc) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let Some(caps) = href_re.captures(href) else {
            continue;
        };
        if &caps[1] != slug {
            continue;
        }
        let year: i32 = match caps[2].parse() {
            Ok(y) => y,
            Err(_) => continue,
        };
        if !years.contains(&year) || found.iter().any(|l| l.year == year) {
            continue;
        }
        let Ok(abs) = base.join(href) else {
            continue;
        };
        found.push(YearLink {
            year,
            url: abs.to_string(),
        });
    }
    found.sort_by_key(|l| l.year);
    found
}

/// All years a landing page advertises for a section; used to build a
/// helpful diagnostic when the requested years are absent.
pub fn list_available_years(html: &str, slug: &str, section: &Section) -> Vec<i32> {
    let doc = Html::parse_document(html);
    let href_re = year_href_re(section);
    let mut years: HashSet<i32> = HashSet::new();
    for a in candidate_anchors(&doc) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let Some(caps) = href_re.captures(href) else {
            continue;
        };
        if &caps[1] != slug {
            continue;
        }
        if let Ok(y) = caps[2].parse() {
            years.insert(y);
        }
    }
    let mut out: Vec<i32> = years.into_iter().collect();
    out.sort_unstable();
    out
}

// ── Tests ──
