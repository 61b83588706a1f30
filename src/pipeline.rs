use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{debug, error, info};

use crate::db::{self, InflationRecord, PageRow, RunTotals};
use crate::fetch::Fetch;
use crate::normalize::normalize;
use crate::walker::{CrawlSession, PageOutcome, PageReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    /// A row for this `(country, year)` already exists.
    Duplicate,
    /// No year, so no natural key.
    Rejected,
    Failed,
}

/// Existence check, then insert. Write errors are logged and reported, never raised.
pub fn persist(conn: &Connection, record: &InflationRecord, source_url: &str) -> SaveOutcome {
    let Some(year) = record.year else {
        debug!("Rejecting {} record without a year", record.country);
        return SaveOutcome::Rejected;
    };

    match db::find(conn, &record.country, year) {
        Ok(Some(_)) => return SaveOutcome::Duplicate,
        Ok(None) => {}
        Err(e) => {
            error!("Lookup failed for {} {}: {:#}", record.country, year, e);
            return SaveOutcome::Failed;
        }
    }

    match db::insert(conn, record, source_url) {
        Ok(()) => SaveOutcome::Inserted,
        Err(e) => {
            error!("Insert failed for {} {}: {:#}", record.country, year, e);
            SaveOutcome::Failed
        }
    }
}

impl RunTotals {
    fn count(&mut self, outcome: SaveOutcome) {
        match outcome {
            SaveOutcome::Inserted => self.inserted += 1,
            SaveOutcome::Duplicate => self.duplicates += 1,
            SaveOutcome::Rejected => self.rejected += 1,
            SaveOutcome::Failed => self.failed_writes += 1,
        }
    }

    fn add_writes(&mut self, other: &RunTotals) {
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.rejected += other.rejected;
        self.failed_writes += other.failed_writes;
    }
}

/// Persist one page's records in a single transaction. Per-record outcomes
/// only count once the commit succeeds.
fn save_records(conn: &Connection, page: &PageReport, url: &str) -> Result<RunTotals> {
    let tx = conn.unchecked_transaction()?;
    let mut writes = RunTotals::default();
    for raw in page.records() {
        let outcome = persist(&tx, &normalize(raw), url);
        debug!("{} -> {:?}", raw.label, outcome);
        writes.count(outcome);
    }
    tx.commit()?;
    Ok(writes)
}

/// Drive a crawl to completion, saving each page's records as it arrives.
/// Store failures past the initial run row are logged and counted, never fatal.
pub async fn crawl_into_db<F: Fetch>(
    conn: &Connection,
    mut session: CrawlSession<F>,
    run_id: &str,
    start_url: &str,
) -> Result<RunTotals> {
    db::start_run(conn, run_id, start_url)?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template(
        "{spinner:.green} [{elapsed_precise}] {pos} pages, {msg}",
    )?);

    let mut totals = RunTotals::default();

    while let Some(page) = session.next_page().await {
        totals.pages += 1;
        let url = page.url.to_string();
        let latency_ms = i64::try_from(page.latency.as_millis()).unwrap_or(i64::MAX);

        let row = match &page.outcome {
            PageOutcome::Failed(e) => {
                totals.failed_pages += 1;
                PageRow {
                    url,
                    matched: 0,
                    skipped: 0,
                    error: Some(e.to_string()),
                    latency_ms,
                }
            }
            PageOutcome::Parsed {
                links_found,
                links_scheduled,
                ..
            } => {
                let skipped = page.skipped().count();
                let matched = page.records().count();
                totals.rows_skipped += skipped;
                debug!("{}: {} pagination links, {} new", url, links_found, links_scheduled);

                match save_records(conn, &page, &url) {
                    Ok(writes) => totals.add_writes(&writes),
                    Err(e) => {
                        error!("Saving {} records from {} failed: {:#}", matched, url, e);
                        totals.failed_writes += matched;
                    }
                }

                PageRow {
                    url,
                    matched,
                    skipped,
                    error: None,
                    latency_ms,
                }
            }
        };

        if let Err(e) = db::save_page(conn, run_id, &row) {
            error!("Recording page {} failed: {:#}", row.url, e);
        }
        pb.inc(1);
        pb.set_message(format!(
            "{} inserted, {} pending, {} seen",
            totals.inserted,
            session.frontier().pending(),
            session.frontier().visited_count()
        ));
    }

    pb.finish_and_clear();
    if let Err(e) = db::finish_run(conn, run_id, &totals) {
        error!("Closing run {} failed: {:#}", run_id, e);
    }
    info!(
        "Crawled {} pages ({} failed): {} inserted, {} duplicates, {} rejected, {} write errors, {} rows skipped",
        totals.pages,
        totals.failed_pages,
        totals.inserted,
        totals.duplicates,
        totals.rejected,
        totals.failed_writes,
        totals.rows_skipped
    );

    Ok(totals)
}
