use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

static TEXT_BLOCK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.text:nth-of-type(3)").unwrap());
static ANY_TEXT_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.text").unwrap());
static MULTIMEDIA_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='/content/vaticanevents/']").unwrap());
static BR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("br").unwrap());
static HREF_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Collapse runs of whitespace into single spaces and trim.
pub fn squash_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible text of an element: trimmed text nodes joined by `sep`.
pub fn element_text(el: ElementRef, sep: &str) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

/// Split a paragraph into visual lines. Paragraphs broken by `<br>` yield
/// one line per text run; paragraphs without a break are a single line.
pub fn split_lines_on_br(el: ElementRef) -> Vec<String> {
    let chunks: Vec<String> = el
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if chunks.is_empty() {
        return Vec::new();
    }
    if el.select(&BR_SEL).next().is_some() {
        chunks
    } else {
        vec![chunks.join(" ")]
    }
}

/// Repair Latin-1-as-UTF-8 double encoding, detectable by the Ã/Â/â
/// artifact characters. The re-decode is kept only when it does not
/// increase the replacement-character count.
pub fn fix_mojibake(s: &str) -> String {
    let s = s.replace('\u{a0}', " ");
    if !(s.contains('â') || s.contains('Ã') || s.contains('Â')) {
        return s;
    }
    let latin1_bytes: Vec<u8> = s
        .chars()
        .filter(|&c| (c as u32) <= 0xFF)
        .map(|c| c as u8)
        .collect();
    let repaired = String::from_utf8_lossy(&latin1_bytes).into_owned();
    let bad = |t: &str| t.matches('\u{FFFD}').count();
    if !repaired.is_empty() && bad(&repaired) <= bad(&s) {
        repaired
    } else {
        s
    }
}

/// The main speech container: the third `div.text` on document pages,
/// falling back to the first one on older layouts.
pub fn body_container(doc: &Html) -> Option<ElementRef<'_>> {
    doc.select(&TEXT_BLOCK_SEL)
        .next()
        .or_else(|| doc.select(&ANY_TEXT_SEL).next())
}

/// Body text of a speech page. When a multimedia embed block precedes the
/// text (marked by a vaticanevents anchor), only the content after that
/// block is kept.
pub fn body_text(doc: &Html) -> Option<String> {
    let container = body_container(doc)?;
    let text = text_after_multimedia(container)
        .unwrap_or_else(|| element_text(container, "\n"));
    let text = fix_mojibake(&text);
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn text_after_multimedia(container: ElementRef) -> Option<String> {
    let marker = container.select(&MULTIMEDIA_SEL).next()?;

    // Climb from the marker anchor to the container's direct child
    // holding it, then collect everything after that child.
    let mut child = None;
    for node in std::iter::once(*marker).chain(marker.ancestors()) {
        if node.parent().map(|p| p.id()) == Some(container.id()) {
            child = Some(node);
            break;
        }
    }
    let child = child?;

    let mut parts: Vec<String> = Vec::new();
    for sib in child.next_siblings() {
        match sib.value() {
            scraper::Node::Text(t) => {
                let t = t.trim();
                if !t.is_empty() {
                    parts.push(t.to_string());
                }
            }
            scraper::Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(sib) {
                    let t = element_text(el, "\n");
                    if !t.is_empty() {
                        parts.push(t);
                    }
                }
            }
            _ => {}
        }
    }
    let out = parts.join("\n").trim().to_string();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Ordered absolute URLs of anchors inside the body container.
pub fn embedded_links(doc: &Html, page_url: &Url) -> Vec<String> {
    let Some(container) = body_container(doc) else {
        return Vec::new();
    };
    container
        .select(&HREF_SEL)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| page_url.join(href).ok())
        .map(|u| u.to_string())
        .collect()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squash_collapses_runs() {
        assert_eq!(squash_ws("  a \t b\n\nc "), "a b c");
    }

    #[test]
    fn mojibake_repairs_double_encoding() {
        // "José" encoded to UTF-8 and misread as Latin-1 shows as "JosÃ©".
        assert_eq!(fix_mojibake("Jos\u{c3}\u{a9}"), "José");
        assert_eq!(fix_mojibake("PrÃ¨s de la place"), "Près de la place");
    }

    #[test]
    fn mojibake_leaves_clean_text_alone() {
        assert_eq!(fix_mojibake("Saint Peter's Square"), "Saint Peter's Square");
    }

    #[test]
    fn mojibake_replaces_nbsp() {
        assert_eq!(fix_mojibake("a\u{a0}b"), "a b");
    }

    #[test]
    fn lines_split_on_br_only() {
        let html = Html::parse_fragment("<p>Saint Peter's Square<br>Sunday, 12 March 2023</p>");
        let p = html
            .select(&Selector::parse("p").unwrap())
            .next()
            .unwrap();
        let lines = split_lines_on_br(p);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "Saint Peter's Square");

        let html = Html::parse_fragment("<p>One single line</p>");
        let p = html
            .select(&Selector::parse("p").unwrap())
            .next()
            .unwrap();
        assert_eq!(split_lines_on_br(p), vec!["One single line".to_string()]);
    }

    #[test]
    fn body_skips_multimedia_block() {
        let html = Html::parse_document(
            "<html><body>\
             <div class='text'>\
             <p><a href='/content/vaticanevents/en/2023/3/12/angelus.html'>[Multimedia]</a></p>\
             <p>Dear brothers and sisters,</p>\
             <p>today's Gospel speaks of living water.</p>\
             </div></body></html>",
        );
        let text = body_text(&html).unwrap();
        assert!(text.starts_with("Dear brothers and sisters,"));
        assert!(!text.contains("[Multimedia]"));
    }

    #[test]
    fn body_without_marker_is_full_container() {
        let html = Html::parse_document(
            "<html><body><div class='text'><p>Dear friends,</p><p>peace.</p></div></body></html>",
        );
        let text = body_text(&html).unwrap();
        assert!(text.contains("Dear friends,"));
        assert!(text.contains("peace."));
    }

    #[test]
    fn embedded_links_are_absolute_and_ordered() {
        let html = Html::parse_document(
            "<html><body><div class='text'>\
             <p><a href='/content/francesco/en/letters/a.html'>one</a></p>\
             <p><a href='https://example.org/b'>two</a></p>\
             </div></body></html>",
        );
        let base = Url::parse("https://www.vatican.va/content/francesco/en/angelus/2023.html")
            .unwrap();
        let links = embedded_links(&html, &base);
        assert_eq!(links.len(), 2);
        assert!(links[0].starts_with("https://www.vatican.va/content/francesco/en/letters/"));
        assert_eq!(links[1], "https://example.org/b");
    }
}
