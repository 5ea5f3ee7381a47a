use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub tally: TallyConfig,
    pub scrape: ScrapeConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TallyConfig {
    pub api_key: String,
    pub endpoint: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScrapeConfig {
    pub organization: String,
    pub requests_per_second: f64,
    pub workers: usize,
    pub page_size: u32,
    pub vote_page_size: u32,
    pub max_pages: u32,
    pub max_attempts: u32,
    pub rate_limit_cooldown_seconds: u64,
    #[serde(default)]
    pub run_timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub dir: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("tally.api_key", "")?
            .set_default("tally.endpoint", "https://api.tally.xyz/query")?
            .set_default("tally.timeout_seconds", 30)?
            .set_default("scrape.organization", "")?
            // The public API allows roughly one request per second
            .set_default("scrape.requests_per_second", 1.0)?
            .set_default("scrape.workers", 5)?
            .set_default("scrape.page_size", 100)?
            .set_default("scrape.vote_page_size", 200)?
            .set_default("scrape.max_pages", 10_000)?
            .set_default("scrape.max_attempts", 3)?
            .set_default("scrape.rate_limit_cooldown_seconds", 5)?
            .set_default("output.dir", "./reports")?
            // Load from config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (GOVSCOPE__TALLY__API_KEY, etc.)
            // Using double underscore as separator to handle nested keys with underscores
            .add_source(
                Environment::with_prefix("GOVSCOPE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
