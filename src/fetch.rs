use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::Settings;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Rate limiting, server errors and transport hiccups are worth another try.
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            FetchError::Http { source, .. } => source.is_timeout() || source.is_connect(),
        }
    }
}

/// A successfully fetched page. `url` is the final URL after redirects.
pub struct FetchedPage {
    pub url: Url,
    pub body: String,
}

/// Page source for the walker. The HTTP implementation is [`HttpFetcher`];
/// tests plug in an in-memory site.
pub trait Fetch: Send + Sync + 'static {
    fn fetch(&self, url: &Url) -> impl Future<Output = Result<FetchedPage, FetchError>> + Send;
}

pub struct HttpFetcher {
    client: Client,
    rotate_user_agent: bool,
    max_retries: u32,
    backoff: Duration,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .default_headers(headers)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(HttpFetcher {
            client,
            rotate_user_agent: settings.rotate_user_agent,
            max_retries: settings.max_retries,
            backoff: Duration::from_millis(settings.backoff_ms),
        })
    }

    async fn fetch_once(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let mut request = self.client.get(url.clone());
        if self.rotate_user_agent {
            request = request.header(USER_AGENT, random_user_agent());
        }

        let http_err = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };

        let resp = request.send().await.map_err(http_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = resp.url().clone();
        let body = resp.text().await.map_err(http_err)?;
        Ok(FetchedPage {
            url: final_url,
            body,
        })
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_once(url).await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let backoff = self.backoff.saturating_mul(2u32.saturating_pow(attempt));
                    warn!(
                        "{} (attempt {}/{}), backing off {:.1}s",
                        e,
                        attempt + 1,
                        self.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Ok(page) => {
                    debug!("Fetched {} ({} bytes)", page.url, page.body.len());
                    return Ok(page);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
}
