use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::text::{fix_mojibake, split_lines_on_br, squash_ws};

static HAS_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(19|20)\d{2}\b").unwrap());
static ABSTRACT_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".abstract").unwrap());
static TEXT_BLOCK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.text:nth-of-type(3)").unwrap());
static FONT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.text:nth-of-type(3) > font").unwrap());

const MAX_PLACE_LEN: usize = 120;
const MIN_ALPHA_CHARS: usize = 3;

/// Ordered location strategies; the first one to produce a plausible
/// place wins. Each looks for a two-line paragraph where the second line
/// carries the date (a four-digit year) and the first names the place.
const STRATEGIES: &[(&str, fn(&Html) -> Option<String>)] = &[
    ("abstract", from_abstract),
    ("font-block", from_font_block),
    ("text-block", from_text_block),
];

pub fn extract_location(doc: &Html) -> Option<String> {
    STRATEGIES.iter().find_map(|(_, strategy)| strategy(doc))
}

fn from_abstract(doc: &Html) -> Option<String> {
    let abstract_el = doc.select(&ABSTRACT_SEL).next()?;
    place_from_paragraphs(direct_paragraphs(abstract_el), false)
}

fn from_font_block(doc: &Html) -> Option<String> {
    for font in doc.select(&FONT_SEL) {
        if let Some(loc) = place_from_paragraphs(direct_paragraphs(font), true) {
            return Some(loc);
        }
    }
    None
}

fn from_text_block(doc: &Html) -> Option<String> {
    let block = doc.select(&TEXT_BLOCK_SEL).next()?;
    place_from_paragraphs(direct_paragraphs(block), true)
}

fn direct_paragraphs(el: ElementRef) -> Vec<ElementRef<'_>> {
    el.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| c.value().name() == "p")
        .collect()
}

/// Scan paragraphs for the place/date line pair. The heading paragraph of
/// body blocks is never a location, so those strategies skip the first.
fn place_from_paragraphs(paragraphs: Vec<ElementRef>, skip_first: bool) -> Option<String> {
    for (i, p) in paragraphs.into_iter().enumerate() {
        if skip_first && i == 0 {
            continue;
        }
        let lines = split_lines_on_br(p);
        if lines.len() >= 2 && HAS_YEAR_RE.is_match(&lines[1]) {
            if let Some(place) = clean_place(&lines[0]) {
                return Some(place);
            }
        }
    }
    None
}

fn clean_place(raw: &str) -> Option<String> {
    let s = squash_ws(&fix_mojibake(raw));
    let s = s
        .trim_matches([' ', ',', ';', '·', ':', '—', '–', '-'])
        .to_string();
    if looks_reasonable_place(&s) {
        Some(s)
    } else {
        None
    }
}

fn looks_reasonable_place(s: &str) -> bool {
    if s.chars().filter(|c| c.is_alphabetic()).count() < MIN_ALPHA_CHARS {
        return false;
    }
    if s.chars().count() > MAX_PLACE_LEN {
        return false;
    }
    !HAS_YEAR_RE.is_match(s)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abstract_place_over_date_line() {
        let html = Html::parse_document(
            "<html><body><div class='abstract'>\
             <p>Saint Peter's Square<br>Sunday, 12 March 2023</p>\
             </div></body></html>",
        );
        assert_eq!(
            extract_location(&html).as_deref(),
            Some("Saint Peter's Square")
        );
    }

    #[test]
    fn font_block_skips_heading_paragraph() {
        let html = Html::parse_document(
            "<html><body>\
             <div class='text'>a</div><div class='other'>x</div><div class='text'>\
             <font><p>ANGELUS</p>\
             <p>Library of the Apostolic Palace<br>Sunday, 10 May 2020</p></font>\
             </div></body></html>",
        );
        assert_eq!(
            extract_location(&html).as_deref(),
            Some("Library of the Apostolic Palace")
        );
    }

    #[test]
    fn missing_location_is_none() {
        let html = Html::parse_document(
            "<html><body><div class='text'><p>Dear brothers and sisters</p></div></body></html>",
        );
        assert_eq!(extract_location(&html), None);
    }

    #[test]
    fn rejects_year_lines_and_short_noise() {
        assert!(clean_place("Saint Peter's Square").is_some());
        assert!(clean_place("12 March 2023").is_none());
        assert!(clean_place("—").is_none());
        assert!(clean_place("x,").is_none());
        let long = "a".repeat(200);
        assert!(clean_place(&long).is_none());
    }

    #[test]
    fn trailing_punctuation_is_trimmed() {
        assert_eq!(clean_place("Rome, ").as_deref(), Some("Rome"));
    }
}
