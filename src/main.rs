mod config;
mod db;
mod fetch;
mod normalize;
mod parser;
mod pipeline;
mod walker;

use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use url::Url;

use crate::config::Settings;
use crate::fetch::HttpFetcher;
use crate::walker::{CrawlSession, WalkOptions};

#[derive(Parser)]
#[command(name = "inflation_scraper", about = "CPI inflation scraper for inflation.eu")]
struct Cli {
    /// SQLite database path (overrides INFLATION_DB_PATH)
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the CPI tables and store new country/year rows
    Crawl {
        /// Page to start from
        #[arg(long)]
        start_url: Option<String>,
        /// Stop after this many pages (default: until pagination is exhausted)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Concurrent page fetches
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// Pause between requests, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Send a fixed User-Agent instead of rotating browser strings
        #[arg(long)]
        no_rotate_ua: bool,
    },
    /// Show database statistics
    Stats,
    /// Countries ranked by average inflation
    Overview {
        /// Only this year
        #[arg(short, long)]
        year: Option<i32>,
        /// Leave out a country (repeatable)
        #[arg(short = 'x', long)]
        exclude: Vec<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// List stored countries
    Countries,
    /// Yearly figures for one country
    Series {
        country: String,
    },
    /// Dump every record as JSON
    Export {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;

    let result = match cli.command {
        Commands::Crawl {
            start_url,
            limit,
            concurrency,
            delay_ms,
            no_rotate_ua,
        } => {
            if let Some(u) = start_url {
                settings.start_url = u;
            }
            if limit.is_some() {
                settings.max_pages = limit;
            }
            if let Some(c) = concurrency {
                settings.concurrency = c;
            }
            if let Some(d) = delay_ms {
                settings.delay_ms = d;
            }
            if no_rotate_ua {
                settings.rotate_user_agent = false;
            }

            let start = Url::parse(&settings.start_url)
                .with_context(|| format!("Invalid start URL {:?}", settings.start_url))?;
            let options = WalkOptions {
                allowed_domain: settings.allowed_domain.clone(),
                concurrency: settings.concurrency,
                delay: Duration::from_millis(settings.delay_ms),
                max_pages: settings.max_pages,
            };
            let session = CrawlSession::new(HttpFetcher::new(&settings)?, start, options);

            let run_id = chrono::Utc::now().format("run-%Y%m%dT%H%M%S%.3fZ").to_string();
            println!("Crawling from {} ...", settings.start_url);
            let t = pipeline::crawl_into_db(&conn, session, &run_id, &settings.start_url).await?;
            println!(
                "Done: {} pages ({} failed), {} inserted, {} already stored, {} rejected, {} write errors, {} rows skipped.",
                t.pages, t.failed_pages, t.inserted, t.duplicates, t.rejected, t.failed_writes, t.rows_skipped
            );
            Ok(())
        }
        Commands::Stats => {
            let s = db::get_stats(&conn)?;
            println!("Records:      {}", s.records);
            println!("Countries:    {}", s.countries);
            match (s.first_year, s.last_year) {
                (Some(a), Some(b)) => println!("Years:        {}-{}", a, b),
                _ => println!("Years:        -"),
            }
            println!("No average:   {}", s.null_average);
            println!("No annual:    {}", s.null_annual);
            println!("Crawl runs:   {}", s.runs);
            if let Some((id, at)) = s.last_run {
                println!("Last run:     {} (finished {})", id, at);
            }
            Ok(())
        }
        Commands::Overview {
            year,
            exclude,
            limit,
        } => {
            let rows = db::fetch_overview(&conn, year, &exclude, limit)?;
            if rows.is_empty() {
                println!("No records found. Run 'crawl' first.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<24} | {:>4} | {:>10} | {:>10}",
                "#", "Country", "Year", "Average %", "Annual %"
            );
            println!("{}", "-".repeat(62));
            for (i, r) in rows.iter().enumerate() {
                println!(
                    "{:>3} | {:<24} | {:>4} | {:>10} | {:>10}",
                    i + 1,
                    truncate(&r.country, 24),
                    r.year.map(|y| y.to_string()).unwrap_or_else(|| "-".into()),
                    fmt_pct(r.average_inflation),
                    fmt_pct(r.annual_inflation)
                );
            }
            if !exclude.is_empty() {
                println!("\nExcluded: {}", exclude.join(", "));
            }
            Ok(())
        }
        Commands::Countries => {
            let countries = db::fetch_countries(&conn)?;
            for c in &countries {
                println!("{}", c);
            }
            println!("\n{} countries", countries.len());
            Ok(())
        }
        Commands::Series { country } => {
            let rows = db::fetch_series(&conn, &country)?;
            if rows.is_empty() {
                println!("No records for {:?}.", country);
                return Ok(());
            }
            println!("{:>4} | {:>10} | {:>10}", "Year", "Average %", "Annual %");
            println!("{}", "-".repeat(30));
            for r in &rows {
                println!(
                    "{:>4} | {:>10} | {:>10}",
                    r.year.map(|y| y.to_string()).unwrap_or_else(|| "-".into()),
                    fmt_pct(r.average_inflation),
                    fmt_pct(r.annual_inflation)
                );
            }
            Ok(())
        }
        Commands::Export { output } => {
            let rows = db::fetch_all(&conn)?;
            let json = serde_json::to_string_pretty(&rows)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
                    println!("Exported {} records to {}", rows.len(), path);
                }
                None => println!("{}", json),
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn fmt_pct(v: Option<f64>) -> String {
    v.map(|x| format!("{:.2}", x)).unwrap_or_else(|| "-".into())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
