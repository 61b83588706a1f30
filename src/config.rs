use anyhow::{Context, Result};
use config::{Config, Environment, File};
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_START_URL: &str =
    "https://www.inflation.eu/en/inflation-rates/cpi-inflation-2024.aspx";
const DEFAULT_DB_PATH: &str = "data/inflation.sqlite";

/// Runtime settings: built-in defaults, then `inflation.toml` if present,
/// then `INFLATION_*` environment variables. CLI flags are applied on top in `main`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub start_url: String,
    pub db_path: String,
    /// Host whose links are followed. Defaults to the start URL's host.
    pub allowed_domain: Option<String>,
    pub rotate_user_agent: bool,
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub delay_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_pages: Option<usize>,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("inflation.toml"))
    }

    fn load_from(file: &Path) -> Result<Self> {
        let defaults =
            Config::try_from(&Settings::default()).context("Failed to encode default settings")?;
        Config::builder()
            .add_source(defaults)
            .add_source(File::from(file).required(false))
            .add_source(Environment::with_prefix("INFLATION").try_parsing(true))
            .build()
            .context("Failed to load settings")?
            .try_deserialize()
            .context("Invalid settings")
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            start_url: DEFAULT_START_URL.to_string(),
            db_path: DEFAULT_DB_PATH.to_string(),
            allowed_domain: None,
            rotate_user_agent: true,
            concurrency: 1,
            timeout_secs: 30,
            delay_ms: 0,
            max_retries: 3,
            backoff_ms: 2000,
            max_pages: None,
        }
    }
}
