use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use rusqlite::Connection;

use crate::db;

// Abbreviations used by the site's English texts (Vulgate-style, both
// testaments plus deuterocanon). The whitelist keeps capitalized ordinary
// words from matching.
const BOOKS: &[&str] = &[
    "Gen", "Ex", "Lev", "Num", "Deut", "Josh", "Judg", "Ruth", "Sam", "Kings", "Chron", "Ezra",
    "Neh", "Tob", "Jdt", "Esth", "Macc", "Job", "Ps", "Prov", "Eccl", "Song", "Wis", "Sir", "Is",
    "Jer", "Lam", "Bar", "Ezek", "Dan", "Hos", "Joel", "Am", "Ob", "Jon", "Mic", "Nah", "Hab",
    "Zeph", "Hag", "Zech", "Mal", "Mt", "Mk", "Lk", "Jn", "Acts", "Rom", "Cor", "Gal", "Eph",
    "Phil", "Col", "Thess", "Tim", "Tit", "Phlm", "Heb", "Jas", "Pet", "Jude", "Rev",
];

static CITATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    let books = BOOKS.join("|");
    Regex::new(&format!(
        r"(?:cf\.\s*)?\b([123]\s)?({books})\.?\s?(\d{{1,3}}):(\d{{1,3}}(?:\s?[-–.,]\s?\d{{1,3}})*)"
    ))
    .unwrap()
});

/// One biblical citation found in a text, e.g. `1 Jn 4:8.16`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub book: String,
    pub chapter: u32,
    pub verses: String,
}

impl std::fmt::Display for Citation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}:{}", self.book, self.chapter, self.verses)
    }
}

/// Scan a text for biblical citations, in order of appearance.
pub fn find_citations(text: &str) -> Vec<Citation> {
    CITATION_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let chapter: u32 = caps[3].parse().ok()?;
            let book = match caps.get(1) {
                Some(prefix) => format!("{} {}", prefix.as_str().trim(), &caps[2]),
                None => caps[2].to_string(),
            };
            Some(Citation {
                book,
                chapter,
                verses: caps[4].to_string(),
            })
        })
        .collect()
}

/// Citations per stored text row.
pub struct TextCitations {
    pub texts_id: i64,
    pub title: Option<String>,
    pub date: Option<String>,
    pub citations: Vec<Citation>,
}

/// Scan every stored text for citations. Rows without any match are
/// omitted.
pub fn scan_texts(conn: &Connection, table: &str) -> Result<Vec<TextCitations>> {
    let rows = db::fetch_text_rows(conn, table)?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let citations = find_citations(row.text_content.as_deref()?);
            if citations.is_empty() {
                return None;
            }
            Some(TextCitations {
                texts_id: row._texts_id,
                title: row.title,
                date: row.date,
                citations,
            })
        })
        .collect())
}

// ── Tests ──
