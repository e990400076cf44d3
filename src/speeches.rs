use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::extract::text::element_text;
use crate::fetch::{FetchError, Fetcher};
use crate::years::{Section, YearLink};

static ITEM_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".documento ul li").unwrap());
static TITLE_ANCHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2 a[href]").unwrap());
static DATE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".data").unwrap());
static ANY_ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static DATE_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2}\s+[A-Z][a-z]+\s+\d{4})\b").unwrap());

/// A speech reference enumerated from an index page, prior to content
/// extraction. The URL is absolute with any fragment stripped, and is the
/// stub's identity within a page.
#[derive(Debug, Clone)]
pub struct SpeechStub {
    pub title: String,
    pub url: String,
    pub date_text: Option<String>,
}

/// Individual speech links from a year (or month) index page, deduplicated
/// by URL. Links outside the pope's tree or the requested section are
/// dropped.
pub fn list_speeches(
    html: &str,
    index_url: &Url,
    slug: &str,
    section: &Section,
) -> Vec<SpeechStub> {
    let doc = Html::parse_document(html);
    let slug_marker = format!("/content/{}/", slug);
    let section_marker = format!("/{}/", section.as_str());

    let mut seen: HashSet<String> = HashSet::new();
    let mut stubs = Vec::new();
    for li in doc.select(&ITEM_SEL) {
        let Some(a) = li.select(&TITLE_ANCHOR_SEL).next() else {
            continue;
        };
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let Ok(mut abs) = index_url.join(href) else {
            continue;
        };
        abs.set_fragment(None);
        let abs = abs.to_string();
        if !abs.contains(&slug_marker) || !abs.contains(&section_marker) {
            continue;
        }

        let title = element_text(a, " ");
        let date_text = li
            .select(&DATE_SEL)
            .next()
            .map(|d| element_text(d, " "))
            .filter(|d| !d.is_empty())
            .or_else(|| {
                DATE_TEXT_RE
                    .captures(&element_text(li, " "))
                    .map(|c| c[1].to_string())
            });

        if seen.insert(abs.clone()) {
            stubs.push(SpeechStub {
                title,
                url: abs,
                date_text,
            });
        }
    }
    stubs
}

fn month_href_re(slug: &str, section: &Section, year: i32) -> Regex {
    Regex::new(&format!(
        r"/content/{}/en/{}/{}/([a-z0-9]+)(?:\.index)?\.html?$",
        regex::escape(slug),
        regex::escape(section.as_str()),
        year
    ))
    .unwrap()
}

/// Month sub-page URLs on a year index, in page order, deduplicated.
pub fn list_month_links(
    html: &str,
    index_url: &Url,
    slug: &str,
    section: &Section,
    year: i32,
) -> Vec<String> {
    let doc = Html::parse_document(html);
    let href_re = month_href_re(slug, section, year);
    let mut seen: HashSet<String> = HashSet::new();
    let mut links = Vec::new();
    for a in doc.select(&ANY_ANCHOR_SEL) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        if !href_re.is_match(href) {
            continue;
        }
        let Ok(abs) = index_url.join(href) else {
            continue;
        };
        let abs = abs.to_string();
        if seen.insert(abs.clone()) {
            links.push(abs);
        }
    }
    links
}

/// Enumerate all speeches for one year link. Sections that paginate by
/// month (notably long-form speeches) list no `.documento` items on the
/// year page itself; in that case month sub-pages are discovered and
/// aggregated, retrying the non-index variant of the year URL when the
/// index variant shows no month links either.
pub fn enumerate_speeches(
    fetcher: &Fetcher,
    year_link: &YearLink,
    slug: &str,
    section: &Section,
) -> Result<Vec<SpeechStub>, FetchError> {
    let page = fetcher.fetch(&year_link.url)?;
    let direct = list_speeches(&page.html, &page.final_url, slug, section);
    if !direct.is_empty() {
        return Ok(direct);
    }

    let mut month_urls =
        list_month_links(&page.html, &page.final_url, slug, section, year_link.year);
    if month_urls.is_empty() {
        if let Some(plain_url) = non_index_variant(&year_link.url) {
            debug!("no month links on {}, retrying {}", year_link.url, plain_url);
            let plain = fetcher.fetch(&plain_url)?;
            month_urls =
                list_month_links(&plain.html, &plain.final_url, slug, section, year_link.year);
        }
    }
    if month_urls.is_empty() {
        return Ok(Vec::new());
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut stubs = Vec::new();
    for month_url in month_urls {
        let month_page = match fetcher.fetch(&month_url) {
            Ok(p) => p,
            Err(e) => {
                warn!("skipping month page {}: {}", month_url, e);
                continue;
            }
        };
        for stub in list_speeches(&month_page.html, &month_page.final_url, slug, section) {
            if seen.insert(stub.url.clone()) {
                stubs.push(stub);
            }
        }
    }
    Ok(stubs)
}

fn non_index_variant(url: &str) -> Option<String> {
    if url.contains(".index.") {
        Some(url.replacen(".index.", ".", 1))
    } else {
        None
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::years::Section;

    fn index_url() -> Url {
        Url::parse("https://www.vatican.va/content/francesco/en/angelus/2023.index.html").unwrap()
    }

    const YEAR_INDEX: &str = r#"<html><body><div class="documento"><ul>
      <li><h2><a href="/content/francesco/en/angelus/2023/documents/angelus-20230312.html#main">Angelus</a></h2>
          <div class="data">12 March 2023</div></li>
      <li><h2><a href="/content/francesco/en/angelus/2023/documents/angelus-20230319.html">Angelus</a></h2>
          Saint Peter's Square, 19 March 2023</li>
      <li><h2><a href="/content/francesco/en/angelus/2023/documents/angelus-20230312.html">Angelus dup</a></h2></li>
      <li><h2><a href="/content/francesco/en/audiences/2023/documents/udienza-20230301.html">Audience</a></h2></li>
      <li><h2><a href="/content/benedict-xvi/en/angelus/2010/documents/a.html">Other pope</a></h2></li>
      <li><p>no anchor here</p></li>
    </ul></div></body></html>"#;

    #[test]
    fn speeches_filtered_and_deduplicated() {
        let section = Section::parse("angelus").unwrap();
        let stubs = list_speeches(YEAR_INDEX, &index_url(), "francesco", &section);
        assert_eq!(stubs.len(), 2);
        assert!(stubs[0].url.ends_with("angelus-20230312.html"));
        assert!(!stubs[0].url.contains('#'));
    }

    #[test]
    fn date_from_element_or_item_text() {
        let section = Section::parse("angelus").unwrap();
        let stubs = list_speeches(YEAR_INDEX, &index_url(), "francesco", &section);
        assert_eq!(stubs[0].date_text.as_deref(), Some("12 March 2023"));
        assert_eq!(stubs[1].date_text.as_deref(), Some("19 March 2023"));
    }

    #[test]
    fn month_links_match_both_variants() {
        let html = r#"<body>
          <a href="/content/francesco/en/speeches/2019/january.index.html">January</a>
          <a href="/content/francesco/en/speeches/2019/february.html">February</a>
          <a href="/content/francesco/en/speeches/2018/march.index.html">wrong year</a>
          <a href="/content/benedict-xvi/en/speeches/2019/april.index.html">wrong pope</a>
        </body>"#;
        let url =
            Url::parse("https://www.vatican.va/content/francesco/en/speeches/2019.index.html")
                .unwrap();
        let section = Section::parse("speeches").unwrap();
        let links = list_month_links(html, &url, "francesco", &section, 2019);
        assert_eq!(links.len(), 2);
        assert!(links[0].ends_with("/2019/january.index.html"));
        assert!(links[1].ends_with("/2019/february.html"));
    }

    #[test]
    fn non_index_variant_strips_once() {
        assert_eq!(
            non_index_variant("https://x/2019.index.html").as_deref(),
            Some("https://x/2019.html")
        );
        assert_eq!(non_index_variant("https://x/2019.html"), None);
    }
}
