//! Pipeline orchestrator: one report request end to end.
//!
//! ## Stages
//!
//!   1. Validate the ticker and horizon (no network on failure)
//!   2. Fetch prices, fundamentals and macro series concurrently
//!   3. Align onto the trading-day index, add indicator columns
//!   4. Fit + predict, evaluate on a hold-out, aggregate into periods
//!   5. Render the report in memory and persist it
//!
//! Stages 1–4 live in `prepare()` so they can be exercised without touching
//! the output directory.

use crate::aligner::align;
use crate::config::AppConfig;
use crate::error::{ReportError, ReportResult};
use crate::features::add_indicators;
use crate::forecast::aggregate::{aggregate, Aggregation};
use crate::forecast::horizon::parse_horizon;
use crate::forecast::Forecaster;
use crate::models::{
    ForecastResult, FundamentalsSnapshot, MacroSeries, MergedDataset, ModelEvaluation,
    NewsItem, ReportArtifact,
};
use crate::providers::cleaner::validate_ticker;
use crate::providers::DataFetcher;
use crate::report::{ReportAssembler, ReportInput};
use crate::storage::Repository;
use crate::utils::Timer;
use anyhow::{Context, Result};
use chrono::{Months, NaiveDate, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything the report needs, computed before anything is written.
#[derive(Debug, Clone)]
pub struct PreparedReport {
    pub dataset: MergedDataset,
    pub forecast: ForecastResult,
    pub aggregation: Aggregation,
    pub evaluation: Option<ModelEvaluation>,
    pub fundamentals: FundamentalsSnapshot,
    pub macros: Vec<MacroSeries>,
    pub news: Vec<NewsItem>,
    pub data_source: String,
}

pub struct Pipeline {
    fetcher: DataFetcher,
    forecaster: Forecaster,
    assembler: ReportAssembler,
    history_years: u32,
    default_horizon: String,
}

impl Pipeline {
    pub fn new(
        fetcher: DataFetcher,
        forecaster: Forecaster,
        assembler: ReportAssembler,
        history_years: u32,
        default_horizon: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            forecaster,
            assembler,
            history_years: history_years.max(1),
            default_horizon: default_horizon.into(),
        }
    }

    /// Build providers, cache, forecaster and assembler from configuration.
    /// A cache that cannot be opened is logged and skipped.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut fetcher = DataFetcher::from_config(config)?;

        if config.storage.cache_enabled {
            match open_cache(config) {
                Ok(repo) => fetcher = fetcher.with_cache(Arc::new(repo), config.storage.ttl_hours),
                Err(e) => warn!("Cache disabled: {:#}", e),
            }
        }

        let forecaster = Forecaster::from_config(&config.pipeline).context("Invalid forecast settings")?;
        info!(
            "Pipeline ready: prices from {:?}, model {}, output {:?}",
            config.providers.price_source,
            forecaster.backend_name(),
            config.pipeline.output_dir
        );

        Ok(Self::new(
            fetcher,
            forecaster,
            ReportAssembler::from_config(&config.pipeline),
            config.pipeline.history_years,
            config.pipeline.default_horizon.clone(),
        ))
    }

    pub fn default_horizon(&self) -> &str {
        &self.default_horizon
    }

    pub fn output_dir(&self) -> &Path {
        self.assembler.output_dir()
    }

    fn date_range(&self) -> (NaiveDate, NaiveDate) {
        let end = Utc::now().date_naive();
        let start = end
            .checked_sub_months(Months::new(12 * self.history_years))
            .unwrap_or(NaiveDate::MIN);
        (start, end)
    }

    /// Stages 1–4. Fails before the report assembler runs.
    pub async fn prepare(&self, ticker: &str, horizon: Option<&str>) -> ReportResult<PreparedReport> {
        let symbol =
            validate_ticker(ticker).ok_or_else(|| ReportError::InvalidTicker(ticker.trim().to_string()))?;
        let horizon = parse_horizon(horizon.unwrap_or(&self.default_horizon))?;
        let (start, end) = self.date_range();

        info!("=== Step 1: Fetching {} ({} → {}) ===", symbol, start, end);
        let data = self.fetcher.fetch(&symbol, start, end).await?;
        if let Some((first, last)) = data.prices.date_range() {
            info!("{}: history covers {} → {}", symbol, first, last);
        }

        info!("=== Step 2: Aligning and computing indicators ===");
        let dataset = align(&data.prices, &data.macros);
        if dataset.is_empty() {
            return Err(ReportError::data_unavailable(&symbol, "no complete price rows"));
        }
        let dataset = add_indicators(dataset);
        debug_assert!(dataset.has_indicators());

        info!("=== Step 3: Forecasting {} days ===", horizon);
        let forecast = self.forecaster.forecast(&dataset, horizon).await?;
        let evaluation = self.forecaster.evaluate(&dataset).await;
        if let Some(eval) = &evaluation {
            info!(
                "{}: hold-out {} rows, RMSE {:.4}, MAPE {}",
                symbol,
                eval.holdout,
                eval.rmse,
                eval.mape.map(|m| format!("{:.2}%", m)).unwrap_or_else(|| "n/a".into())
            );
        }
        let aggregation = aggregate(&Forecaster::observations(&dataset), &forecast.points, horizon);

        Ok(PreparedReport {
            dataset,
            forecast,
            aggregation,
            evaluation,
            fundamentals: data.fundamentals,
            macros: data.macros,
            news: data.news,
            data_source: data.prices.source().to_string(),
        })
    }

    /// Run one request end to end and return the written artifact.
    pub async fn run(&self, ticker: &str, horizon: Option<&str>) -> ReportResult<ReportArtifact> {
        let _t = Timer::start(format!("report {}", ticker.trim()));
        let prepared = self.prepare(ticker, horizon).await?;

        info!("=== Step 4: Assembling report ===");
        let artifact = self.assembler.assemble(&ReportInput {
            dataset: &prepared.dataset,
            forecast: &prepared.forecast,
            aggregation: &prepared.aggregation,
            fundamentals: &prepared.fundamentals,
            macros: &prepared.macros,
            news: &prepared.news,
            evaluation: prepared.evaluation.as_ref(),
            data_source: &prepared.data_source,
        })?;

        info!(
            "=== Done: {} | {} | {} ===",
            artifact.ticker,
            artifact.outlook.label(),
            artifact.file_name
        );
        Ok(artifact)
    }
}

fn open_cache(config: &AppConfig) -> Result<Repository> {
    if let Some(parent) = config.storage.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let repo = Repository::open(&config.storage.db_path).context("Failed to open DuckDB")?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }
    Ok(repo)
}
