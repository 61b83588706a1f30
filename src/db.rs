use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS inflation (
            id                INTEGER PRIMARY KEY,
            country           TEXT NOT NULL,
            year              INTEGER NOT NULL,
            average_inflation REAL,
            annual_inflation  REAL,
            source_url        TEXT,
            scraped_at        TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(country, year)
        );
        CREATE INDEX IF NOT EXISTS idx_inflation_year ON inflation(year);

        CREATE TABLE IF NOT EXISTS crawl_runs (
            run_id        TEXT PRIMARY KEY,
            start_url     TEXT NOT NULL,
            pages         INTEGER NOT NULL DEFAULT 0,
            failed_pages  INTEGER NOT NULL DEFAULT 0,
            rows_skipped  INTEGER NOT NULL DEFAULT 0,
            inserted      INTEGER NOT NULL DEFAULT 0,
            duplicates    INTEGER NOT NULL DEFAULT 0,
            rejected      INTEGER NOT NULL DEFAULT 0,
            failed_writes INTEGER NOT NULL DEFAULT 0,
            started_at    TEXT NOT NULL DEFAULT (datetime('now')),
            finished_at   TEXT
        );

        CREATE TABLE IF NOT EXISTS crawl_pages (
            id          INTEGER PRIMARY KEY,
            run_id      TEXT NOT NULL REFERENCES crawl_runs(run_id),
            url         TEXT NOT NULL,
            matched     INTEGER NOT NULL DEFAULT 0,
            skipped     INTEGER NOT NULL DEFAULT 0,
            error       TEXT,
            latency_ms  INTEGER,
            fetched_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_crawl_pages_run ON crawl_pages(run_id);
        ",
    )?;
    Ok(())
}

// ── Records ──

/// Normalized inflation figures for one country and year.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InflationRecord {
    pub country: String,
    pub year: Option<i32>,
    pub average_inflation: Option<f64>,
    pub annual_inflation: Option<f64>,
}

fn record_from_row(row: &rusqlite::Row) -> rusqlite::Result<InflationRecord> {
    Ok(InflationRecord {
        country: row.get(0)?,
        year: row.get(1)?,
        average_inflation: row.get(2)?,
        annual_inflation: row.get(3)?,
    })
}

pub fn find(conn: &Connection, country: &str, year: i32) -> Result<Option<InflationRecord>> {
    let row = conn
        .query_row(
            "SELECT country, year, average_inflation, annual_inflation
             FROM inflation WHERE country = ?1 AND year = ?2",
            rusqlite::params![country, year],
            record_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Plain INSERT: a duplicate `(country, year)` surfaces as a constraint error.
pub fn insert(conn: &Connection, record: &InflationRecord, source_url: &str) -> Result<()> {
    let year = record
        .year
        .with_context(|| format!("{} has no year", record.country))?;
    conn.execute(
        "INSERT INTO inflation (country, year, average_inflation, annual_inflation, source_url)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            record.country,
            year,
            record.average_inflation,
            record.annual_inflation,
            source_url,
        ],
    )?;
    Ok(())
}

// ── Crawl bookkeeping ──

pub struct PageRow {
    pub url: String,
    pub matched: usize,
    pub skipped: usize,
    pub error: Option<String>,
    pub latency_ms: i64,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunTotals {
    pub pages: usize,
    pub failed_pages: usize,
    pub rows_skipped: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub failed_writes: usize,
}

pub fn start_run(conn: &Connection, run_id: &str, start_url: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO crawl_runs (run_id, start_url) VALUES (?1, ?2)",
        rusqlite::params![run_id, start_url],
    )?;
    Ok(())
}

pub fn save_page(conn: &Connection, run_id: &str, page: &PageRow) -> Result<()> {
    conn.execute(
        "INSERT INTO crawl_pages (run_id, url, matched, skipped, error, latency_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            run_id,
            page.url,
            page.matched,
            page.skipped,
            page.error,
            page.latency_ms,
        ],
    )?;
    Ok(())
}

pub fn finish_run(conn: &Connection, run_id: &str, t: &RunTotals) -> Result<()> {
    conn.execute(
        "UPDATE crawl_runs
         SET pages = ?2, failed_pages = ?3, rows_skipped = ?4, inserted = ?5,
             duplicates = ?6, rejected = ?7, failed_writes = ?8,
             finished_at = datetime('now')
         WHERE run_id = ?1",
        rusqlite::params![
            run_id,
            t.pages,
            t.failed_pages,
            t.rows_skipped,
            t.inserted,
            t.duplicates,
            t.rejected,
            t.failed_writes,
        ],
    )?;
    Ok(())
}

// ── Reports ──

pub fn fetch_overview(
    conn: &Connection,
    year: Option<i32>,
    exclude: &[String],
    limit: usize,
) -> Result<Vec<InflationRecord>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(y) = year {
        conditions.push(format!("year = ?{}", params.len() + 1));
        params.push(Box::new(y));
    }
    if !exclude.is_empty() {
        let placeholders: Vec<String> = exclude
            .iter()
            .map(|c| {
                params.push(Box::new(c.clone()));
                format!("?{}", params.len())
            })
            .collect();
        conditions.push(format!("country NOT IN ({})", placeholders.join(", ")));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT country, year, average_inflation, annual_inflation
         FROM inflation{}
         ORDER BY average_inflation IS NULL, average_inflation DESC, country, year
         LIMIT {}",
        where_clause, limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_countries(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT country FROM inflation ORDER BY country")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_series(conn: &Connection, country: &str) -> Result<Vec<InflationRecord>> {
    let mut stmt = conn.prepare(
        "SELECT country, year, average_inflation, annual_inflation
         FROM inflation WHERE country = ?1 ORDER BY year",
    )?;
    let rows = stmt
        .query_map([country], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_all(conn: &Connection) -> Result<Vec<InflationRecord>> {
    let mut stmt = conn.prepare(
        "SELECT country, year, average_inflation, annual_inflation
         FROM inflation ORDER BY country, year",
    )?;
    let rows = stmt
        .query_map([], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub records: usize,
    pub countries: usize,
    pub first_year: Option<i32>,
    pub last_year: Option<i32>,
    pub null_average: usize,
    pub null_annual: usize,
    pub runs: usize,
    pub last_run: Option<(String, String)>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let (records, countries, first_year, last_year): (usize, usize, Option<i32>, Option<i32>) =
        conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT country), MIN(year), MAX(year) FROM inflation",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )?;
    let null_average: usize = conn.query_row(
        "SELECT COUNT(*) FROM inflation WHERE average_inflation IS NULL",
        [],
        |r| r.get(0),
    )?;
    let null_annual: usize = conn.query_row(
        "SELECT COUNT(*) FROM inflation WHERE annual_inflation IS NULL",
        [],
        |r| r.get(0),
    )?;
    let runs: usize = conn.query_row("SELECT COUNT(*) FROM crawl_runs", [], |r| r.get(0))?;
    let last_run = conn
        .query_row(
            "SELECT run_id, finished_at FROM crawl_runs
             WHERE finished_at IS NOT NULL
             ORDER BY finished_at DESC LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    Ok(Stats {
        records,
        countries,
        first_year,
        last_year,
        null_average,
        null_annual,
        runs,
        last_run,
    })
}
