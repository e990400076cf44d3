use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;

use crate::extract::SpeechRecord;

const DB_PATH: &str = "data/vatican_texts.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Skip rows that hit a unique constraint; signalled by a zero row id.
    Ignore,
    /// Atomically replace the conflicting row, keeping the natural key.
    Replace,
}

pub fn connect() -> Result<Connection> {
    std::fs::create_dir_all("data")?;
    let conn = Connection::open(DB_PATH)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS popes (
            _pope_id            INTEGER PRIMARY KEY,
            pope_name           TEXT,
            pope_slug           TEXT,
            pope_number         TEXT,
            secular_name        TEXT,
            place_of_birth      TEXT,
            pontificate_begin   TEXT,
            pontificate_end     TEXT,
            entry_creation_date TEXT,
            UNIQUE(pope_name, pope_number)
        );

        CREATE TABLE IF NOT EXISTS texts (
            _texts_id           INTEGER PRIMARY KEY,
            pope_id             INTEGER NOT NULL
                                REFERENCES popes(_pope_id)
                                ON UPDATE CASCADE ON DELETE CASCADE,
            section             TEXT,
            year                INTEGER,
            date                TEXT,
            location            TEXT,
            title               TEXT,
            language            TEXT,
            url                 TEXT,
            text_content        TEXT,
            entry_creation_date TEXT,
            UNIQUE(pope_id, title, date)
        );
        CREATE INDEX IF NOT EXISTS idx_texts_url ON texts(url);
        CREATE INDEX IF NOT EXISTS idx_texts_section ON texts(section);
        ",
    )?;
    Ok(())
}

/// Upsert one speech: the pope row first (natural key pope_name +
/// pope_number), then the text row referencing its surrogate id (natural
/// key pope_id + title + date). Returns `(text_row_id, pope_row_id)`,
/// zero for a row skipped under the ignore policy.
pub fn upsert_speech(
    conn: &Connection,
    record: &SpeechRecord,
    policy: ConflictPolicy,
) -> Result<(i64, i64)> {
    let now = Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction()?;

    // The pope row is never REPLACEd: that would re-key _pope_id and
    // cascade-delete every text referencing it. Replace semantics update
    // the metadata in place instead.
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO popes
         (pope_name, pope_slug, pope_number, secular_name, place_of_birth,
          pontificate_begin, pontificate_end, entry_creation_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            record.pope,
            record.pope_slug,
            record.pope_number,
            record.secular_name,
            record.place_of_birth,
            record.pontificate_begin,
            record.pontificate_end,
            now,
        ],
    )?;
    let pope_id: i64 = tx.query_row(
        "SELECT _pope_id FROM popes WHERE pope_name IS ?1 AND pope_number IS ?2",
        rusqlite::params![record.pope, record.pope_number],
        |row| row.get(0),
    )?;
    let pope_row_id = if inserted > 0 {
        pope_id
    } else if policy == ConflictPolicy::Replace {
        tx.execute(
            "UPDATE popes SET pope_slug = ?2, secular_name = ?3, place_of_birth = ?4,
             pontificate_begin = ?5, pontificate_end = ?6
             WHERE _pope_id = ?1",
            rusqlite::params![
                pope_id,
                record.pope_slug,
                record.secular_name,
                record.place_of_birth,
                record.pontificate_begin,
                record.pontificate_end,
            ],
        )?;
        pope_id
    } else {
        0
    };

    let verb = match policy {
        ConflictPolicy::Ignore => "INSERT OR IGNORE",
        ConflictPolicy::Replace => "INSERT OR REPLACE",
    };
    let changed = tx.execute(
        &format!(
            "{verb} INTO texts
             (pope_id, section, year, date, location, title, language, url,
              text_content, entry_creation_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        rusqlite::params![
            pope_id,
            record.section,
            record.year,
            record.date,
            record.location,
            record.title,
            record.language,
            record.url,
            record.text,
            now,
        ],
    )?;
    let text_row_id = if changed > 0 { tx.last_insert_rowid() } else { 0 };

    tx.commit()?;
    Ok((text_row_id, pope_row_id))
}

/// Fast probe used to skip refetching speeches already stored.
pub fn exists_by_url(conn: &Connection, url: &str) -> Result<bool> {
    let mut stmt = conn.prepare_cached("SELECT 1 FROM texts WHERE url = ?1 LIMIT 1")?;
    Ok(stmt.exists(rusqlite::params![url])?)
}

/// Neutralize a table name for embedding in a quoted SQL identifier:
/// embedded double quotes are doubled.
pub fn sanitize_table_name(name: &str) -> String {
    name.replace('"', "\"\"")
}

/// One row of the texts table in its fixed column order.
#[derive(Debug, Clone, Serialize)]
pub struct TextRow {
    pub _texts_id: i64,
    pub pope_id: i64,
    pub section: Option<String>,
    pub year: Option<i64>,
    pub date: Option<String>,
    pub location: Option<String>,
    pub title: Option<String>,
    pub language: Option<String>,
    pub url: Option<String>,
    pub text_content: Option<String>,
    pub entry_creation_date: Option<String>,
}

pub fn fetch_text_rows(conn: &Connection, table: &str) -> Result<Vec<TextRow>> {
    let sql = format!(
        "SELECT _texts_id, pope_id, section, year, date, location, title,
                language, url, text_content, entry_creation_date
         FROM \"{}\" ORDER BY _texts_id",
        sanitize_table_name(table)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(TextRow {
                _texts_id: row.get(0)?,
                pope_id: row.get(1)?,
                section: row.get(2)?,
                year: row.get(3)?,
                date: row.get(4)?,
                location: row.get(5)?,
                title: row.get(6)?,
                language: row.get(7)?,
                url: row.get(8)?,
                text_content: row.get(9)?,
                entry_creation_date: row.get(10)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub popes: usize,
    pub texts: usize,
    pub by_section: Vec<(String, usize)>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let popes: usize = conn.query_row("SELECT COUNT(*) FROM popes", [], |r| r.get(0))?;
    let texts: usize = conn.query_row("SELECT COUNT(*) FROM texts", [], |r| r.get(0))?;
    let mut stmt = conn.prepare(
        "SELECT COALESCE(section, ''), COUNT(*) FROM texts GROUP BY section ORDER BY section",
    )?;
    let by_section = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Stats {
        popes,
        texts,
        by_section,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SpeechRecord {
        SpeechRecord {
            speech_id: "francesco-angelus-20230312-angelus-abcd1234".into(),
            pope: "Francis".into(),
            pope_slug: "francesco".into(),
            pope_number: Some("266".into()),
            pontificate_begin: Some("13 March 2013".into()),
            pontificate_end: None,
            secular_name: Some("Jorge Mario Bergoglio".into()),
            place_of_birth: Some("Buenos Aires (Argentina)".into()),
            section: "angelus".into(),
            year: 2023,
            date: Some("12 March 2023".into()),
            location: Some("Saint Peter's Square".into()),
            title: Some("Angelus".into()),
            language: "EN".into(),
            url: "https://www.vatican.va/content/francesco/en/angelus/2023/documents/a.html"
                .into(),
            text: Some("Dear brothers and sisters...".into()),
            embedded_links: vec![],
        }
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn upsert_inserts_pope_then_text() {
        let conn = test_conn();
        let (text_id, pope_id) = upsert_speech(&conn, &record(), ConflictPolicy::Ignore).unwrap();
        assert!(text_id > 0);
        assert!(pope_id > 0);

        let fk: i64 = conn
            .query_row("SELECT pope_id FROM texts WHERE _texts_id = ?1", [text_id], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(fk, pope_id);
    }

    #[test]
    fn ignore_policy_is_idempotent() {
        let conn = test_conn();
        upsert_speech(&conn, &record(), ConflictPolicy::Ignore).unwrap();
        let (text_id, pope_id) = upsert_speech(&conn, &record(), ConflictPolicy::Ignore).unwrap();
        assert_eq!(text_id, 0);
        assert_eq!(pope_id, 0);
        let count: usize = conn
            .query_row("SELECT COUNT(*) FROM texts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn replace_policy_overwrites_in_place() {
        let conn = test_conn();
        upsert_speech(&conn, &record(), ConflictPolicy::Ignore).unwrap();

        let mut updated = record();
        updated.text = Some("Updated body.".into());
        let (text_id, pope_id) = upsert_speech(&conn, &updated, ConflictPolicy::Replace).unwrap();
        assert!(text_id > 0);
        assert!(pope_id > 0);

        let count: usize = conn
            .query_row("SELECT COUNT(*) FROM texts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let body: String = conn
            .query_row("SELECT text_content FROM texts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(body, "Updated body.");
    }

    #[test]
    fn replace_keeps_pope_id_and_texts() {
        let conn = test_conn();
        let (_, pope_id) = upsert_speech(&conn, &record(), ConflictPolicy::Ignore).unwrap();
        let (_, pope_id_again) =
            upsert_speech(&conn, &record(), ConflictPolicy::Replace).unwrap();
        assert_eq!(pope_id, pope_id_again);
        let texts: usize = conn
            .query_row("SELECT COUNT(*) FROM texts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(texts, 1);
    }

    #[test]
    fn url_probe() {
        let conn = test_conn();
        assert!(!exists_by_url(&conn, &record().url).unwrap());
        upsert_speech(&conn, &record(), ConflictPolicy::Ignore).unwrap();
        assert!(exists_by_url(&conn, &record().url).unwrap());
    }

    #[test]
    fn table_name_sanitization() {
        assert_eq!(sanitize_table_name("texts"), "texts");
        assert_eq!(sanitize_table_name("user\"s"), "user\"\"s");
    }

    #[test]
    fn text_rows_in_fixed_order() {
        let conn = test_conn();
        upsert_speech(&conn, &record(), ConflictPolicy::Ignore).unwrap();
        let rows = fetch_text_rows(&conn, "texts").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].section.as_deref(), Some("angelus"));
        assert_eq!(rows[0].year, Some(2023));
        assert_eq!(
            rows[0].text_content.as_deref(),
            Some("Dear brothers and sisters...")
        );
    }

    #[test]
    fn stats_counts() {
        let conn = test_conn();
        upsert_speech(&conn, &record(), ConflictPolicy::Ignore).unwrap();
        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.popes, 1);
        assert_eq!(stats.texts, 1);
        assert_eq!(stats.by_section, vec![("angelus".to_string(), 1)]);
    }
}
