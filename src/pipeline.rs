use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::db::{self, ConflictPolicy};
use crate::directory::{self, PopeRecord};
use crate::extract::language::{rewrite_lang_url, LangCode};
use crate::extract::{extract_speech, SpeechContext, SpeechRecord};
use crate::fetch::{FetchError, Fetcher};
use crate::speeches::enumerate_speeches;
use crate::years::{self, Section};

/// Per-pope pipeline failures. The batch driver decides continuation per
/// error: input validation errors abort the batch before any network
/// call, everything else fails only the one pope's run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("bad section name: {0:?}")]
    InvalidSection(String),
    #[error("bad language code: {0:?} (want two letters, e.g. EN, FR, ES)")]
    InvalidLang(String),
    #[error("no valid years parsed from {0:?}")]
    InvalidYears(String),
    #[error("pope {name:?} not found. Available: {}", available.join(", "))]
    PopeNotFound { name: String, available: Vec<String> },
    #[error(
        "no {section} year index pages found for {pope} in requested years [{}]. \
         Available on page: {}",
        fmt_years(requested),
        fmt_years_or_none(available)
    )]
    YearsNotFound {
        pope: String,
        section: String,
        requested: Vec<i32>,
        available: Vec<i32>,
    },
    #[error("no speeches collected for the given filters ({pope})")]
    NoSpeeches { pope: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn fmt_years(years: &[i32]) -> String {
    years
        .iter()
        .map(|y| y.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn fmt_years_or_none(years: &[i32]) -> String {
    if years.is_empty() {
        "none yet".to_string()
    } else {
        fmt_years(years)
    }
}

/// Validated pipeline inputs. Construction rejects malformed input before
/// any network call.
pub struct RunOptions {
    pub years: Vec<i32>,
    pub section: Section,
    pub lang: LangCode,
    pub limit: Option<usize>,
    pub policy: ConflictPolicy,
}

impl RunOptions {
    pub fn new(
        years_spec: &str,
        section: &str,
        lang: &str,
        limit: Option<usize>,
        policy: ConflictPolicy,
    ) -> Result<Self, PipelineError> {
        let section = Section::parse(section)?;
        let lang = LangCode::parse(lang)?;
        let years = years::parse_years(years_spec);
        if years.is_empty() {
            return Err(PipelineError::InvalidYears(years_spec.to_string()));
        }
        Ok(Self {
            years,
            section,
            lang,
            limit,
            policy,
        })
    }
}

/// What one pope's run produced.
pub struct PopeReport {
    pub pope: String,
    pub records: Vec<SpeechRecord>,
    pub inserted: usize,
    pub ignored: usize,
    pub skipped_existing: usize,
}

/// Merge repeated `--pope` flags and a comma-separated `--popes` list into
/// one order-preserving, deduplicated list.
pub fn gather_popes(pope_flags: &[String], popes_csv: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        let name = name.trim();
        if !name.is_empty() && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    };
    for name in pope_flags {
        push(name);
    }
    if let Some(csv) = popes_csv {
        for name in csv.split(',') {
            push(name);
        }
    }
    out
}

/// Run the whole pipeline for one pope: landing page, metadata, year
/// links, enumeration, per-speech extraction and upsert.
pub fn run_pope(
    fetcher: &Fetcher,
    conn: &Connection,
    popes: &[PopeRecord],
    name: &str,
    opts: &RunOptions,
) -> Result<PopeReport, PipelineError> {
    let rec = directory::find_pope(popes, name).ok_or_else(|| PipelineError::PopeNotFound {
        name: name.to_string(),
        available: popes.iter().map(|p| p.display_name.clone()).collect(),
    })?;

    let landing = fetcher.fetch(&rec.landing_url)?;
    let meta = years::fetch_metadata(&landing.html);

    let year_links = years::list_year_links(&landing.html, &rec.slug, &opts.years, &opts.section);
    if year_links.is_empty() {
        return Err(PipelineError::YearsNotFound {
            pope: rec.display_name.clone(),
            section: opts.section.as_str().to_string(),
            requested: opts.years.clone(),
            available: years::list_available_years(&landing.html, &rec.slug, &opts.section),
        });
    }

    let mut report = PopeReport {
        pope: rec.display_name.clone(),
        records: Vec::new(),
        inserted: 0,
        ignored: 0,
        skipped_existing: 0,
    };
    let mut processed = 0usize;

    'years: for year_link in &year_links {
        let stubs = enumerate_speeches(fetcher, year_link, &rec.slug, &opts.section)?;
        if stubs.is_empty() {
            warn!(
                "no speeches found on {} for {}",
                year_link.url, rec.display_name
            );
            continue;
        }

        let pb = ProgressBar::new(stubs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("=> "),
        );
        pb.set_message(format!("{} {}", opts.section, year_link.year));

        for stub in &stubs {
            if let Some(limit) = opts.limit {
                if processed >= limit {
                    pb.finish_and_clear();
                    break 'years;
                }
            }
            processed += 1;

            if already_stored(conn, &stub.url, &opts.lang)? {
                info!("[skip] already in database (by url): {}", stub.url);
                report.skipped_existing += 1;
                pb.inc(1);
                continue;
            }

            info!("fetching speech: {}", stub.url);
            let ctx = SpeechContext {
                pope: rec,
                meta: &meta,
                section: &opts.section,
                year: year_link.year,
                want_lang: &opts.lang,
            };
            let record = extract_speech(fetcher, stub, &ctx)?;

            let (text_id, _pope_id) = db::upsert_speech(conn, &record, opts.policy)
                .map_err(PipelineError::Other)?;
            if text_id > 0 {
                report.inserted += 1;
            } else {
                report.ignored += 1;
            }
            report.records.push(record);
            pb.inc(1);
        }
        pb.finish_and_clear();
    }

    if report.records.is_empty() && report.skipped_existing == 0 {
        return Err(PipelineError::NoSpeeches {
            pope: rec.display_name.clone(),
        });
    }
    Ok(report)
}

/// A speech is already stored when its URL is in the database, or — for
/// non-English targets — when the language-rewritten guess of its URL is.
fn already_stored(
    conn: &Connection,
    url: &str,
    lang: &LangCode,
) -> Result<bool, PipelineError> {
    if db::exists_by_url(conn, url).map_err(PipelineError::Other)? {
        return Ok(true);
    }
    if !lang.is_english() {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(guess) = rewrite_lang_url(&parsed, lang) {
                return db::exists_by_url(conn, guess.as_str()).map_err(PipelineError::Other);
            }
        }
    }
    Ok(false)
}

/// Batch outcome over several popes. Failures never abort the batch; they
/// are collected and reported at the end.
pub struct BatchSummary {
    pub successes: Vec<PopeReport>,
    pub failures: Vec<(String, String)>,
}

impl BatchSummary {
    pub fn exit_code(&self) -> i32 {
        if self.failures.is_empty() {
            0
        } else {
            1
        }
    }
}

pub fn run_batch(
    fetcher: &Fetcher,
    conn: &Connection,
    pope_names: &[String],
    opts: &RunOptions,
) -> Result<BatchSummary, PipelineError> {
    let popes = directory::list_popes(fetcher)?;

    let mut summary = BatchSummary {
        successes: Vec::new(),
        failures: Vec::new(),
    };
    for name in pope_names {
        info!("=== pipeline for {} ===", name);
        match run_pope(fetcher, conn, &popes, name, opts) {
            Ok(report) => summary.successes.push(report),
            Err(e) => {
                warn!("{} failed: {}", name, e);
                summary.failures.push((name.clone(), e.to_string()));
            }
        }
    }
    Ok(summary)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_popes_merges_and_dedups() {
        let flags = vec!["Francis".to_string(), "Benedict XVI".to_string()];
        let popes = gather_popes(&flags, Some("Francis, John Paul II ,"));
        assert_eq!(popes, vec!["Francis", "Benedict XVI", "John Paul II"]);
        assert!(gather_popes(&[], None).is_empty());
    }

    #[test]
    fn options_reject_bad_input_before_network() {
        assert!(matches!(
            RunOptions::new("2023", "bad section!", "EN", None, ConflictPolicy::Ignore),
            Err(PipelineError::InvalidSection(_))
        ));
        assert!(matches!(
            RunOptions::new("2023", "angelus", "ENG", None, ConflictPolicy::Ignore),
            Err(PipelineError::InvalidLang(_))
        ));
        assert!(matches!(
            RunOptions::new("nope", "angelus", "EN", None, ConflictPolicy::Ignore),
            Err(PipelineError::InvalidYears(_))
        ));
        assert!(RunOptions::new("2023", "angelus", "en", None, ConflictPolicy::Ignore).is_ok());
    }

    #[test]
    fn not_found_error_lists_alternatives() {
        let err = PipelineError::PopeNotFound {
            name: "Leo XIII".into(),
            available: vec!["Francis".into(), "Benedict XVI".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Leo XIII"));
        assert!(msg.contains("Francis, Benedict XVI"));
    }

    #[test]
    fn years_not_found_reports_available() {
        let err = PipelineError::YearsNotFound {
            pope: "Francis".into(),
            section: "angelus".into(),
            requested: vec![1999],
            available: vec![],
        };
        assert!(err.to_string().contains("none yet"));

        let err = PipelineError::YearsNotFound {
            pope: "Francis".into(),
            section: "angelus".into(),
            requested: vec![1999, 2000],
            available: vec![2013, 2014],
        };
        let msg = err.to_string();
        assert!(msg.contains("[1999, 2000]"));
        assert!(msg.contains("2013, 2014"));
    }
}
