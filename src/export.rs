use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;

use crate::db;
use crate::extract::SpeechRecord;

/// Write one JSON object per line. The snapshot is a columnar-friendly
/// dump meant for offline analysis, not for re-import.
fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(rows.len())
}

/// Snapshot the records collected by a pipeline run.
pub fn write_speech_snapshot(path: &Path, records: &[SpeechRecord]) -> Result<usize> {
    write_jsonl(path, records)
}

/// Dump a texts table in its fixed column order.
pub fn export_texts(conn: &Connection, table: &str, path: &Path) -> Result<usize> {
    let rows = db::fetch_text_rows(conn, table)?;
    write_jsonl(path, &rows)
}

/// Auto-generated snapshot filename, e.g.
/// `speeches_francesco_angelus_EN_2021-2023.jsonl`.
pub fn default_snapshot_name(slug: &str, section: &str, lang: &str, years: &[i32]) -> String {
    let span = match (years.first(), years.last()) {
        (Some(first), Some(last)) if first != last => format!("{first}-{last}"),
        (Some(first), _) => first.to_string(),
        _ => "all".to_string(),
    };
    format!("speeches_{slug}_{section}_{lang}_{span}.jsonl")
}

// ── Tests ──
