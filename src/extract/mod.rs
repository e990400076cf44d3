pub mod language;
pub mod location;
pub mod text;

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::directory::PopeRecord;
use crate::fetch::{FetchError, Fetcher};
use crate::speeches::SpeechStub;
use crate::years::{PopeMetadata, Section};
use language::{LangCode, NOT_AVAILABLE_TEXT};
use text::{body_text, embedded_links, fix_mojibake};

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})\s+([A-Z][a-z]+)\s+(\d{4})\b").unwrap());
static NON_ALNUM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]+").unwrap());

const TITLE_SLUG_MAX: usize = 40;

/// The final per-speech unit, ready for database upsert or snapshot
/// serialization.
#[derive(Debug, Clone, Serialize)]
pub struct SpeechRecord {
    pub speech_id: String,
    pub pope: String,
    pub pope_slug: String,
    pub pope_number: Option<String>,
    pub pontificate_begin: Option<String>,
    pub pontificate_end: Option<String>,
    pub secular_name: Option<String>,
    pub place_of_birth: Option<String>,
    pub section: String,
    pub year: i32,
    pub date: Option<String>,
    pub location: Option<String>,
    pub title: Option<String>,
    /// The language actually served, which may differ from the request.
    pub language: String,
    /// The URL the text was taken from: the translation URL when the
    /// requested language was served, else the base URL.
    pub url: String,
    pub text: Option<String>,
    pub embedded_links: Vec<String>,
}

/// Everything an extraction needs beyond the stub itself.
pub struct SpeechContext<'a> {
    pub pope: &'a PopeRecord,
    pub meta: &'a PopeMetadata,
    pub section: &'a Section,
    pub year: i32,
    pub want_lang: &'a LangCode,
}

/// Fetch one speech page, resolve its language variant, and extract the
/// structured record.
pub fn extract_speech(
    fetcher: &Fetcher,
    stub: &SpeechStub,
    ctx: &SpeechContext,
) -> Result<SpeechRecord, FetchError> {
    let base = fetcher.fetch(&stub.url)?;
    let resolution = language::resolve(fetcher, base, ctx.want_lang);

    let doc = Html::parse_document(&resolution.page.html);
    let location = location::extract_location(&doc);
    let links = embedded_links(&doc, &resolution.page.final_url);
    let text = if resolution.available {
        body_text(&doc)
    } else {
        Some(NOT_AVAILABLE_TEXT.to_string())
    };

    let title = Some(fix_mojibake(&stub.title)).filter(|t| !t.is_empty());
    let final_url = resolution.page.final_url.to_string();

    Ok(SpeechRecord {
        speech_id: speech_id(
            &ctx.pope.slug,
            ctx.section.as_str(),
            stub.date_text.as_deref(),
            title.as_deref(),
            &final_url,
        ),
        pope: ctx.pope.display_name.clone(),
        pope_slug: ctx.pope.slug.clone(),
        pope_number: ctx.meta.pope_number.clone(),
        pontificate_begin: ctx.meta.pontificate_begin.clone(),
        pontificate_end: ctx.meta.pontificate_end.clone(),
        secular_name: ctx.meta.secular_name.clone(),
        place_of_birth: ctx.meta.place_of_birth.clone(),
        section: ctx.section.as_str().to_string(),
        year: ctx.year,
        date: stub.date_text.clone(),
        location,
        title,
        language: resolution.language,
        url: final_url,
        text,
        embedded_links: links,
    })
}

/// Stable, human-legible content identifier:
/// `<pope>-<section>-<yyyymmdd|unknown>-<title-slug>-<url-hash>`.
/// Independent of database row order, collision-resistant via the URL
/// hash suffix.
pub fn speech_id(
    pope_slug: &str,
    section: &str,
    date_text: Option<&str>,
    title: Option<&str>,
    url: &str,
) -> String {
    let ymd = normalize_date_yyyymmdd(date_text);
    let title_slug = slugify(title.unwrap_or(""), TITLE_SLUG_MAX);
    let digest = Sha256::digest(url.as_bytes());
    let short = hex_prefix(&digest, 8);
    format!("{pope_slug}-{section}-{ymd}-{title_slug}-{short}")
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
        if out.len() >= len {
            break;
        }
    }
    out.truncate(len);
    out
}

const MONTHS_EN: &[(&str, &str)] = &[
    ("January", "01"),
    ("February", "02"),
    ("March", "03"),
    ("April", "04"),
    ("May", "05"),
    ("June", "06"),
    ("July", "07"),
    ("August", "08"),
    ("September", "09"),
    ("October", "10"),
    ("November", "11"),
    ("December", "12"),
];

/// `"Sunday, 12 March 2023"` -> `"20230312"`; unparsable input -> the
/// literal `"unknown"`.
pub fn normalize_date_yyyymmdd(date_text: Option<&str>) -> String {
    let Some(date_text) = date_text else {
        return "unknown".to_string();
    };
    let Some(caps) = DATE_RE.captures(date_text) else {
        return "unknown".to_string();
    };
    let day = &caps[1];
    let month = MONTHS_EN
        .iter()
        .find(|(name, _)| *name == &caps[2])
        .map(|(_, mm)| *mm)
        .unwrap_or("00");
    let year = &caps[3];
    format!("{year}{month}{:0>2}", day)
}

/// ASCII slug of a title, lowercased, non-alphanumerics collapsed to
/// dashes, truncated to `maxlen`.
pub fn slugify(text: &str, maxlen: usize) -> String {
    let ascii: String = text.chars().filter(|c| c.is_ascii()).collect();
    let slug = NON_ALNUM_RE
        .replace_all(&ascii, "-")
        .trim_matches('-')
        .to_lowercase();
    let slug = if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    };
    let truncated: String = slug.chars().take(maxlen).collect();
    truncated.trim_end_matches('-').to_string()
}

// ── Tests ──
