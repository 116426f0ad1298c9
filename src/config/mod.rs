use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_macro_series")]
    pub macro_series: Vec<MacroSeriesConfig>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriceSourceKind {
    #[default]
    Yahoo,
    Csv,
}

/// Data provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub price_source: PriceSourceKind,

    /// Directory holding `{TICKER}.csv` files when `price_source = "csv"`.
    #[serde(default = "default_csv_dir")]
    pub csv_dir: PathBuf,

    #[serde(default = "default_yahoo_base_url")]
    pub yahoo_base_url: String,

    #[serde(default = "default_yahoo_cookie_url")]
    pub yahoo_cookie_url: String,

    #[serde(default = "default_fred_base_url")]
    pub fred_base_url: String,

    /// Without a key the macro fetcher runs in fallback mode.
    #[serde(default)]
    pub fred_api_key: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Fetch cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_history_years")]
    pub history_years: u32,

    #[serde(default = "default_horizon")]
    pub default_horizon: String,

    #[serde(default = "default_min_observations")]
    pub min_observations: usize,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_true")]
    pub export_csv: bool,

    #[serde(default = "default_interval_width")]
    pub interval_width: f64,

    #[serde(default = "default_cap_multiplier")]
    pub cap_multiplier: f64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FallbackCurve {
    Linear,
    Geometric,
}

/// One macro indicator pulled from FRED and joined onto the price dates.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MacroSeriesConfig {
    pub series_id: String,
    pub name: String,
    pub fallback_start: f64,
    pub fallback_end: f64,
    pub fallback_curve: FallbackCurve,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_csv_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_yahoo_base_url() -> String {
    "https://query1.finance.yahoo.com".to_string()
}
fn default_yahoo_cookie_url() -> String {
    "https://fc.yahoo.com".to_string()
}
fn default_fred_base_url() -> String {
    "https://api.stlouisfed.org/fred".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    300
}
fn default_jitter_ms() -> u64 {
    200
}
fn default_max_retries() -> u32 {
    3
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
        .to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data_cache/market.duckdb")
}
fn default_ttl_hours() -> i64 {
    12
}
fn default_true() -> bool {
    true
}
fn default_history_years() -> u32 {
    10
}
fn default_horizon() -> String {
    "1y".to_string()
}
fn default_min_observations() -> usize {
    30
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("static")
}
fn default_interval_width() -> f64 {
    0.8
}
fn default_cap_multiplier() -> f64 {
    2.0
}
fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}
fn default_macro_series() -> Vec<MacroSeriesConfig> {
    vec![
        MacroSeriesConfig {
            series_id: "DFF".to_string(),
            name: "interest_rate".to_string(),
            fallback_start: 0.5,
            fallback_end: 5.5,
            fallback_curve: FallbackCurve::Linear,
        },
        MacroSeriesConfig {
            series_id: "SP500".to_string(),
            name: "sp500".to_string(),
            fallback_start: 50.0,
            fallback_end: 4500.0,
            fallback_curve: FallbackCurve::Geometric,
        },
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            providers: ProvidersConfig::default(),
            storage: StorageConfig::default(),
            pipeline: PipelineConfig::default(),
            server: ServerConfig::default(),
            macro_series: default_macro_series(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            price_source: PriceSourceKind::default(),
            csv_dir: default_csv_dir(),
            yahoo_base_url: default_yahoo_base_url(),
            yahoo_cookie_url: default_yahoo_cookie_url(),
            fred_base_url: default_fred_base_url(),
            fred_api_key: None,
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            db_path: default_db_path(),
            ttl_hours: default_ttl_hours(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_years: default_history_years(),
            default_horizon: default_horizon(),
            min_observations: default_min_observations(),
            output_dir: default_output_dir(),
            export_csv: true,
            interval_width: default_interval_width(),
            cap_multiplier: default_cap_multiplier(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
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
            .add_source(config::Environment::with_prefix("STOCK_REPORT").separator("__"))
            .build()
            .context("Failed to read configuration sources")?;

        let mut app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;

        // The conventional variable wins when nothing more specific is set.
        if app_cfg.providers.fred_api_key.is_none() {
            app_cfg.providers.fred_api_key = std::env::var("FRED_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty());
        }

        Ok(app_cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[pipeline]\nmin_observations = 60\n[storage]\ncache_enabled = false\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.pipeline.min_observations, 60);
        assert_eq!(cfg.pipeline.default_horizon, "1y");
        assert!(!cfg.storage.cache_enabled);
        assert_eq!(cfg.providers.price_source, PriceSourceKind::Yahoo);
        assert_eq!(cfg.macro_series.len(), 2);
        assert_eq!(cfg.macro_series[0].series_id, "DFF");
    }

    #[test]
    fn test_default_has_no_fred_key() {
        let cfg = AppConfig::default();
        assert!(cfg.providers.fred_api_key.is_none());
        assert_eq!(cfg.server.bind, "0.0.0.0:5000");
        assert_eq!(cfg.macro_series.len(), 2);
    }
}
