mod db;
mod directory;
mod export;
mod extract;
mod fetch;
mod pipeline;
mod search;
mod speeches;
mod years;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::bail;
use clap::{Parser, Subcommand};

use crate::db::ConflictPolicy;
use crate::fetch::Fetcher;
use crate::pipeline::{gather_popes, run_batch, RunOptions};

#[derive(Parser)]
#[command(
    name = "vatican_scraper",
    about = "Scrape papal speech texts from vatican.va into SQLite"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the pope directory (display name, slug, landing URL)
    Popes,
    /// Show a pope's metadata and year-archive links for a section
    Years {
        #[arg(long)]
        pope: String,
        /// e.g. "2020", "2019,2021-2023"
        #[arg(long)]
        years: String,
        /// e.g. angelus, audiences, speeches
        #[arg(long, default_value = "angelus")]
        section: String,
    },
    /// Enumerate individual speech links from year indexes
    Speeches {
        #[arg(long)]
        pope: String,
        #[arg(long)]
        years: String,
        #[arg(long, default_value = "angelus")]
        section: String,
    },
    /// Full pipeline: fetch, extract and upsert speeches for one or more popes
    Run {
        /// Repeatable, e.g. --pope "Francis" --pope "Benedict XVI"
        #[arg(long)]
        pope: Vec<String>,
        /// Comma-separated list, e.g. "Francis,Benedict XVI"
        #[arg(long)]
        popes: Option<String>,
        #[arg(long, default_value = "2025")]
        years: String,
        #[arg(long, default_value = "angelus")]
        section: String,
        /// Two-letter language code (EN, FR, ES, ...)
        #[arg(long, default_value = "EN")]
        lang: String,
        /// Max speeches processed per pope
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Replace rows hitting a unique constraint instead of ignoring them
        #[arg(long)]
        replace: bool,
        /// Write collected records to a JSON-lines snapshot
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show database statistics
    Stats,
    /// Dump the texts table to a JSON-lines snapshot
    Export {
        #[arg(long, default_value = "texts_snapshot.jsonl")]
        out: PathBuf,
        #[arg(long, default_value = "texts")]
        table: String,
    },
    /// Scan stored texts for biblical citations
    Search {
        #[arg(long, default_value = "texts")]
        table: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Popes => {
            let fetcher = Fetcher::new()?;
            let popes = directory::list_popes(&fetcher)?;
            println!("Found {} popes:", popes.len());
            for p in &popes {
                println!("  {:<16} {:<14} {}", p.display_name, p.slug, p.landing_url);
            }
            Ok(())
        }
        Commands::Years {
            pope,
            years: years_spec,
            section,
        } => cmd_years(&pope, &years_spec, &section),
        Commands::Speeches {
            pope,
            years: years_spec,
            section,
        } => cmd_speeches(&pope, &years_spec, &section),
        Commands::Run {
            pope,
            popes,
            years,
            section,
            lang,
            limit,
            replace,
            out,
        } => cmd_run(&pope, popes.as_deref(), &years, &section, &lang, limit, replace, out),
        Commands::Stats => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Popes: {}", s.popes);
            println!("Texts: {}", s.texts);
            for (section, count) in &s.by_section {
                println!("  {:<12} {}", section, count);
            }
            Ok(())
        }
        Commands::Export { out, table } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let written = export::export_texts(&conn, &table, &out)?;
            println!("Wrote {} rows to {}", written, out.display());
            Ok(())
        }
        Commands::Search { table } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let matches = search::scan_texts(&conn, &table)?;
            let total: usize = matches.iter().map(|m| m.citations.len()).sum();
            for m in &matches {
                println!(
                    "#{} {} ({}):",
                    m.texts_id,
                    m.title.as_deref().unwrap_or("untitled"),
                    m.date.as_deref().unwrap_or("no date"),
                );
                for c in &m.citations {
                    println!("    {}", c);
                }
            }
            println!("\n{} citations in {} texts", total, matches.len());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn cmd_years(pope: &str, years_spec: &str, section: &str) -> anyhow::Result<()> {
    let opts = RunOptions::new(years_spec, section, "EN", None, ConflictPolicy::Ignore)?;
    let fetcher = Fetcher::new()?;
    let popes = directory::list_popes(&fetcher)?;
    let rec = match directory::find_pope(&popes, pope) {
        Some(rec) => rec,
        None => {
            let available: Vec<String> = popes.iter().map(|p| p.display_name.clone()).collect();
            bail!("pope {:?} not found. Available: {}", pope, available.join(", "));
        }
    };

    let landing = fetcher.fetch(&rec.landing_url)?;
    let meta = years::fetch_metadata(&landing.html);
    println!(
        "META\t{}",
        serde_json::json!({
            "pope_number": meta.pope_number,
            "pontificate_begin": meta.pontificate_begin,
            "pontificate_end": meta.pontificate_end,
            "secular_name": meta.secular_name,
            "place_of_birth": meta.place_of_birth,
        })
    );

    let links = years::list_year_links(&landing.html, &rec.slug, &opts.years, &opts.section);
    if links.is_empty() {
        let available = years::list_available_years(&landing.html, &rec.slug, &opts.section);
        bail!(
            "no {} year index pages found for {} in requested years. Available: {}",
            opts.section,
            rec.display_name,
            if available.is_empty() {
                "none yet".to_string()
            } else {
                available
                    .iter()
                    .map(|y| y.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        );
    }
    for link in &links {
        println!("{}\t{}", link.year, link.url);
    }
    Ok(())
}

fn cmd_speeches(pope: &str, years_spec: &str, section: &str) -> anyhow::Result<()> {
    let opts = RunOptions::new(years_spec, section, "EN", None, ConflictPolicy::Ignore)?;
    let fetcher = Fetcher::new()?;
    let popes = directory::list_popes(&fetcher)?;
    let rec = match directory::find_pope(&popes, pope) {
        Some(rec) => rec,
        None => {
            let available: Vec<String> = popes.iter().map(|p| p.display_name.clone()).collect();
            bail!("pope {:?} not found. Available: {}", pope, available.join(", "));
        }
    };

    let landing = fetcher.fetch(&rec.landing_url)?;
    let links = years::list_year_links(&landing.html, &rec.slug, &opts.years, &opts.section);
    if links.is_empty() {
        bail!("no {} year index pages found for {}", opts.section, rec.display_name);
    }

    let mut any = false;
    for link in &links {
        let stubs = speeches::enumerate_speeches(&fetcher, link, &rec.slug, &opts.section)?;
        if stubs.is_empty() {
            eprintln!("No speeches found on {}", link.url);
            continue;
        }
        for s in &stubs {
            println!(
                "{}\t{}\t{}\t{}",
                link.year,
                s.date_text.as_deref().unwrap_or(""),
                s.title.replace('\t', " "),
                s.url
            );
            any = true;
        }
    }
    if !any {
        bail!("no speeches found in the requested years");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    pope_flags: &[String],
    popes_csv: Option<&str>,
    years: &str,
    section: &str,
    lang: &str,
    limit: Option<usize>,
    replace: bool,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut names = gather_popes(pope_flags, popes_csv);
    if names.is_empty() {
        names.push("Francis".to_string());
    }

    let policy = if replace {
        ConflictPolicy::Replace
    } else {
        ConflictPolicy::Ignore
    };
    // Inputs are validated before any network call.
    let opts = RunOptions::new(years, section, lang, limit, policy)?;

    let fetcher = Fetcher::new()?;
    let conn = db::connect()?;
    db::init_schema(&conn)?;

    let summary = run_batch(&fetcher, &conn, &names, &opts)?;

    if let Some(path) = out {
        if summary.successes.len() > 1 {
            // A single --out is ambiguous across popes; fall back to
            // per-pope auto-named files next to it.
            println!("[info] Multiple popes provided; using per-pope auto filenames.");
            let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
            for report in &summary.successes {
                let Some(first) = report.records.first() else {
                    continue;
                };
                let name = export::default_snapshot_name(
                    &first.pope_slug,
                    opts.section.as_str(),
                    opts.lang.as_str(),
                    &opts.years,
                );
                let target = dir.join(name);
                let written = export::write_speech_snapshot(&target, &report.records)?;
                println!("Wrote {} records to {}", written, target.display());
            }
        } else {
            let records: Vec<_> = summary
                .successes
                .iter()
                .flat_map(|r| r.records.iter().cloned())
                .collect();
            let written = export::write_speech_snapshot(&path, &records)?;
            println!("Wrote {} records to {}", written, path.display());
        }
    }

    if !summary.successes.is_empty() {
        println!("\n=== Succeeded ===");
        for report in &summary.successes {
            println!(
                "{}: {} inserted, {} ignored, {} already stored",
                report.pope, report.inserted, report.ignored, report.skipped_existing
            );
        }
    }
    if !summary.failures.is_empty() {
        println!("\n=== Failed ===");
        for (pope, msg) in &summary.failures {
            println!("{}: {}", pope, msg);
        }
    }
    println!("\nPipeline complete.");

    if summary.exit_code() != 0 {
        std::process::exit(summary.exit_code());
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
