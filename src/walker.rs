use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::fetch::{Fetch, FetchError, FetchedPage};
use crate::parser::{self, RawRecord, RowOutcome, SkipReason};

/// Visited set plus pending queue. A URL is marked visited when it is
/// scheduled, so it can be queued at most once per session.
#[derive(Debug, Default)]
pub struct Frontier {
    visited: HashSet<String>,
    queue: VecDeque<Url>,
}

impl Frontier {
    fn key(url: &Url) -> String {
        let mut url = url.clone();
        url.set_fragment(None);
        url.into()
    }

    /// Returns `true` if the URL was not visited before.
    pub fn mark_visited(&mut self, url: &Url) -> bool {
        self.visited.insert(Self::key(url))
    }

    /// Add-then-check: queues the URL only if it was unvisited.
    pub fn schedule(&mut self, url: Url) -> bool {
        if self.mark_visited(&url) {
            self.queue.push_back(url);
            true
        } else {
            false
        }
    }

    pub fn pop(&mut self) -> Option<Url> {
        self.queue.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Only links on this host are followed.
    pub allowed_domain: Option<String>,
    pub concurrency: usize,
    pub delay: Duration,
    pub max_pages: Option<usize>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        WalkOptions {
            allowed_domain: None,
            concurrency: 1,
            delay: Duration::ZERO,
            max_pages: None,
        }
    }
}

#[derive(Debug)]
pub enum PageOutcome {
    Parsed {
        rows: Vec<RowOutcome>,
        links_found: usize,
        links_scheduled: usize,
    },
    Failed(FetchError),
}

#[derive(Debug)]
pub struct PageReport {
    pub url: Url,
    pub latency: Duration,
    pub outcome: PageOutcome,
}

impl PageReport {
    pub fn records(&self) -> impl Iterator<Item = &RawRecord> {
        self.rows().iter().filter_map(|r| match r {
            RowOutcome::Matched(rec) => Some(rec),
            RowOutcome::Skipped(_) => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &SkipReason> {
        self.rows().iter().filter_map(|r| match r {
            RowOutcome::Skipped(reason) => Some(reason),
            RowOutcome::Matched(_) => None,
        })
    }

    fn rows(&self) -> &[RowOutcome] {
        match &self.outcome {
            PageOutcome::Parsed { rows, .. } => rows,
            PageOutcome::Failed(_) => &[],
        }
    }
}

type FetchResult = (Url, Result<FetchedPage, FetchError>, Duration);

/// One crawl from a start URL. Owns the frontier; fetches run as tasks but
/// their results are folded back in here, so the visited set has one writer.
pub struct CrawlSession<F: Fetch> {
    fetcher: Arc<F>,
    frontier: Frontier,
    in_flight: JoinSet<FetchResult>,
    options: WalkOptions,
    dispatched: usize,
}

impl<F: Fetch> CrawlSession<F> {
    pub fn new(fetcher: F, start: Url, mut options: WalkOptions) -> Self {
        if options.allowed_domain.is_none() {
            options.allowed_domain = start.host_str().map(str::to_string);
        }
        options.concurrency = options.concurrency.max(1);

        let mut frontier = Frontier::default();
        frontier.schedule(start);

        CrawlSession {
            fetcher: Arc::new(fetcher),
            frontier,
            in_flight: JoinSet::new(),
            options,
            dispatched: 0,
        }
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    /// Next fetched page, or `None` once the queue is drained and nothing is
    /// in flight.
    pub async fn next_page(&mut self) -> Option<PageReport> {
        loop {
            self.dispatch().await;
            match self.in_flight.join_next().await? {
                Ok((url, result, latency)) => return Some(self.handle(url, result, latency)),
                Err(e) => error!("Fetch task failed: {}", e),
            }
        }
    }

    /// Drain the whole crawl into memory.
    pub async fn collect(mut self) -> Vec<PageReport> {
        let mut pages = Vec::new();
        while let Some(page) = self.next_page().await {
            pages.push(page);
        }
        pages
    }

    fn budget_left(&self) -> bool {
        self.options.max_pages.map_or(true, |max| self.dispatched < max)
    }

    async fn dispatch(&mut self) {
        while self.in_flight.len() < self.options.concurrency && self.budget_left() {
            let Some(url) = self.frontier.pop() else {
                break;
            };
            if self.dispatched > 0 && !self.options.delay.is_zero() {
                tokio::time::sleep(self.options.delay).await;
            }
            self.dispatched += 1;
            info!("Visiting: {}", url);

            let fetcher = Arc::clone(&self.fetcher);
            self.in_flight.spawn(async move {
                let start = Instant::now();
                let result = fetcher.fetch(&url).await;
                (url, result, start.elapsed())
            });
        }
    }

    fn handle(
        &mut self,
        requested: Url,
        result: Result<FetchedPage, FetchError>,
        latency: Duration,
    ) -> PageReport {
        let page = match result {
            Ok(page) => page,
            Err(e) => {
                warn!("Failed to fetch {}: {}", requested, e);
                return PageReport {
                    url: requested,
                    latency,
                    outcome: PageOutcome::Failed(e),
                };
            }
        };

        // Redirect targets count as visited too.
        self.frontier.mark_visited(&page.url);

        let parsed = parser::parse_page(&page.body, &page.url);
        let links_found = parsed.links.len();
        let mut links_scheduled = 0;
        for link in parsed.links {
            if !self.in_scope(&link) {
                debug!("Not following off-site link {}", link);
                continue;
            }
            if self.frontier.schedule(link) {
                links_scheduled += 1;
            }
        }

        for reason in parsed.rows.iter().filter_map(|r| match r {
            RowOutcome::Skipped(reason) => Some(reason),
            RowOutcome::Matched(_) => None,
        }) {
            debug!("Skipped row on {}: {}", page.url, reason);
        }

        PageReport {
            url: page.url,
            latency,
            outcome: PageOutcome::Parsed {
                rows: parsed.rows,
                links_found,
                links_scheduled,
            },
        }
    }

    fn in_scope(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        match &self.options.allowed_domain {
            Some(domain) => url.host_str() == Some(domain.as_str()),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    const BASE: &str = "https://www.inflation.eu/en/inflation-rates/";

    /// In-memory site that records every fetch.
    struct Site {
        pages: HashMap<String, String>,
        fetched: Arc<Mutex<Vec<String>>>,
    }

    impl Site {
        fn new(pages: &[(&str, String)]) -> (Self, Arc<Mutex<Vec<String>>>) {
            let fetched = Arc::new(Mutex::new(Vec::new()));
            let site = Site {
                pages: pages
                    .iter()
                    .map(|(p, body)| (format!("{BASE}{p}"), body.clone()))
                    .collect(),
                fetched: Arc::clone(&fetched),
            };
            (site, fetched)
        }
    }

    impl Fetch for Site {
        async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
            self.fetched.lock().unwrap().push(url.to_string());
            match self.pages.get(url.as_str()) {
                Some(body) => Ok(FetchedPage {
                    url: url.clone(),
                    body: body.clone(),
                }),
                None => Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }

    fn page(rows: &[(&str, &str, &str)], links: &[&str]) -> String {
        let rows: String = rows
            .iter()
            .enumerate()
            .map(|(i, (label, annual, average))| {
                let class = if i % 2 == 0 { "tabledata1" } else { "tabledata2" };
                format!(
                    r#"<tr class="{class}"><td><a href="x.aspx">{label}</a></td><td align="right">{annual}</td><td align="right">{average}</td></tr>"#
                )
            })
            .collect();
        let links: String = links
            .iter()
            .map(|l| format!(r#"<a class="notelinks" href="{l}">{l}</a>"#))
            .collect();
        format!(
            r#"<html><body><table>{rows}</table><table class="notelinkstable"><tr><td>{links}</td></tr></table></body></html>"#
        )
    }

    fn start(p: &str) -> Url {
        Url::parse(&format!("{BASE}{p}")).unwrap()
    }

    #[test]
    fn frontier_schedules_once() {
        let mut f = Frontier::default();
        let u = start("a.aspx");
        assert!(f.schedule(u.clone()));
        assert!(!f.schedule(u.clone()));
        assert!(!f.schedule(Url::parse(&format!("{u}#section")).unwrap()));
        assert_eq!(f.pending(), 1);
        assert_eq!(f.visited_count(), 1);
        assert_eq!(f.pop(), Some(u.clone()));
        assert!(!f.schedule(u));
        assert_eq!(f.pending(), 0);
    }

    #[tokio::test]
    async fn germany_end_to_end() {
        let (site, _) = Site::new(&[(
            "cpi-2021.aspx",
            page(&[("CPI inflation Germany 2021", "1,5&nbsp;%", "2,0&nbsp;%")], &[]),
        )]);
        let pages = CrawlSession::new(site, start("cpi-2021.aspx"), WalkOptions::default())
            .collect()
            .await;
        assert_eq!(pages.len(), 1);
        let records: Vec<&RawRecord> = pages[0].records().collect();
        assert_eq!(records.len(), 1);
        let r = crate::normalize::normalize(records[0]);
        assert_eq!(r.country, "Germany");
        assert_eq!(r.year, Some(2021));
        assert_eq!(r.annual_inflation, Some(1.5));
        assert_eq!(r.average_inflation, Some(2.0));
    }

    #[tokio::test]
    async fn follows_pagination_until_exhausted() {
        let (site, fetched) = Site::new(&[
            (
                "a.aspx",
                page(&[("CPI inflation France 2020", "0,5", "0,5")], &["b.aspx", "c.aspx"]),
            ),
            (
                "b.aspx",
                page(&[("CPI inflation France 2019", "1,1", "1,3")], &["a.aspx", "c.aspx"]),
            ),
            (
                "c.aspx",
                page(&[("CPI inflation Spain 2024", "-", "nan")], &["a.aspx", "b.aspx"]),
            ),
        ]);
        let pages = CrawlSession::new(site, start("a.aspx"), WalkOptions::default())
            .collect()
            .await;

        let fetched = fetched.lock().unwrap().clone();
        assert_eq!(
            fetched,
            [start("a.aspx"), start("b.aspx"), start("c.aspx")].map(String::from)
        );
        assert_eq!(pages.iter().flat_map(|p| p.records()).count(), 3);

        match &pages[1].outcome {
            PageOutcome::Parsed { links_found, links_scheduled, .. } => {
                assert_eq!(*links_found, 2);
                assert_eq!(*links_scheduled, 0);
            }
            PageOutcome::Failed(e) => panic!("unexpected failure {e}"),
        }
    }

    #[tokio::test]
    async fn visited_link_is_not_refetched() {
        let (site, fetched) = Site::new(&[(
            "a.aspx",
            page(&[("CPI inflation Chile 2010", "1,4", "3,0")], &["a.aspx", "a.aspx#top"]),
        )]);
        let pages = CrawlSession::new(site, start("a.aspx"), WalkOptions::default())
            .collect()
            .await;
        assert_eq!(pages.len(), 1);
        assert_eq!(fetched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_page_does_not_stop_crawl() {
        let (site, fetched) = Site::new(&[
            ("a.aspx", page(&[], &["missing.aspx", "b.aspx"])),
            ("b.aspx", page(&[("CPI inflation Peru 1990", "7.481,7", "7.649,6")], &[])),
        ]);
        let pages = CrawlSession::new(site, start("a.aspx"), WalkOptions::default())
            .collect()
            .await;
        assert_eq!(fetched.lock().unwrap().len(), 3);
        assert!(matches!(pages[1].outcome, PageOutcome::Failed(FetchError::Status { status: 404, .. })));
        assert_eq!(pages[2].records().count(), 1);
    }

    #[tokio::test]
    async fn off_site_links_not_followed() {
        let (site, fetched) = Site::new(&[(
            "a.aspx",
            page(&[], &["https://elsewhere.example/cpi.aspx", "mailto:someone@example.com"]),
        )]);
        CrawlSession::new(site, start("a.aspx"), WalkOptions::default())
            .collect()
            .await;
        assert_eq!(fetched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn max_pages_bounds_crawl() {
        let (site, fetched) = Site::new(&[
            ("a.aspx", page(&[], &["b.aspx"])),
            ("b.aspx", page(&[], &["c.aspx"])),
            ("c.aspx", page(&[], &[])),
        ]);
        let options = WalkOptions {
            max_pages: Some(2),
            ..WalkOptions::default()
        };
        let pages = CrawlSession::new(site, start("a.aspx"), options).collect().await;
        assert_eq!(pages.len(), 2);
        assert_eq!(fetched.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_fetches_visit_each_page_once() {
        let names: Vec<String> = (0..8).map(|i| format!("p{i}.aspx")).collect();
        let all: Vec<&str> = names.iter().map(String::as_str).collect();
        let pages: Vec<(&str, String)> = names
            .iter()
            .map(|n| (n.as_str(), page(&[], &all)))
            .collect();
        let (site, fetched) = Site::new(&pages);
        let options = WalkOptions {
            concurrency: 4,
            ..WalkOptions::default()
        };
        let reports = CrawlSession::new(site, start("p0.aspx"), options).collect().await;
        assert_eq!(reports.len(), 8);

        let mut fetched = fetched.lock().unwrap().clone();
        fetched.sort();
        fetched.dedup();
        assert_eq!(fetched.len(), 8);
    }

    #[tokio::test]
    async fn empty_page_and_all_skipped_are_distinguishable() {
        let (site, _) = Site::new(&[
            ("a.aspx", page(&[], &["b.aspx"])),
            ("b.aspx", page(&[("Something else 2020", "1", "2")], &[])),
        ]);
        let pages = CrawlSession::new(site, start("a.aspx"), WalkOptions::default())
            .collect()
            .await;
        assert_eq!(pages[0].skipped().count(), 0);
        assert_eq!(pages[0].records().count(), 0);
        assert_eq!(pages[1].records().count(), 0);
        assert_eq!(
            pages[1].skipped().collect::<Vec<_>>(),
            [&SkipReason::LabelMismatch {
                label: "Something else 2020".to_string()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delay_waits_before_later_dispatches_only() {
        let options = || WalkOptions {
            delay: Duration::from_secs(5),
            ..WalkOptions::default()
        };

        let (site, _) = Site::new(&[("a.aspx", page(&[], &[]))]);
        let t0 = tokio::time::Instant::now();
        let pages = CrawlSession::new(site, start("a.aspx"), options()).collect().await;
        assert_eq!(pages.len(), 1);
        assert!(t0.elapsed() < Duration::from_secs(5));

        let (site, fetched) = Site::new(&[
            ("a.aspx", page(&[], &["b.aspx"])),
            ("b.aspx", page(&[], &["c.aspx"])),
            ("c.aspx", page(&[], &[])),
        ]);
        let t0 = tokio::time::Instant::now();
        let pages = CrawlSession::new(site, start("a.aspx"), options()).collect().await;
        let elapsed = t0.elapsed();
        assert_eq!(pages.len(), 3);
        assert_eq!(fetched.lock().unwrap().len(), 3);
        assert!(elapsed >= Duration::from_secs(10), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(15), "{:?}", elapsed);
    }
}
