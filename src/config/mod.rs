use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Origin site and HTTP session settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    /// Listing search URL; `?page=N` is appended per iteration.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Phone reveal endpoint (POST, JSON).
    #[serde(default = "default_reveal_url")]
    pub reveal_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Crawl loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Ceiling on simultaneous detail-page fetches.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Fixed pause between listing pages.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    /// Random extra pause in `[0, jitter_ms]` on top of `page_delay_ms`.
    #[serde(default)]
    pub jitter_ms: u64,

    #[serde(default = "default_start_page")]
    pub start_page: u32,

    /// Safety cap on listing pages per run. Unset means "until exhausted".
    #[serde(default)]
    pub max_pages: Option<u32>,
}

impl PipelineConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://auto.ria.com/uk/car/used/".to_string()
}
fn default_reveal_url() -> String {
    "https://auto.ria.com/bff/final-page/public/auto/popUp".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    "Mozilla/5.0".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/autoria.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    2
}
fn default_page_delay_ms() -> u64 {
    3000
}
fn default_start_page() -> u32 {
    1
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            reveal_url: default_reveal_url(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            page_delay_ms: default_page_delay_ms(),
            jitter_ms: 0,
            start_page: default_start_page(),
            max_pages: None,
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("HARVEST").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|e| {
            tracing::warn!("Invalid configuration ({}), using defaults", e);
            AppConfig::default()
        });
        Ok(app_cfg)
    }
}
