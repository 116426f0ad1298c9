use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

// ── Price history ─────────────────────────────────────────────────────────────

/// One daily OHLCV bar as delivered by a provider. Any field may be missing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

/// Daily price history for one ticker, as fetched from one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    ticker: String,
    source: String,
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    pub fn new(ticker: impl Into<String>, source: impl Into<String>, mut bars: Vec<PriceBar>) -> Self {
        bars.sort_by_key(|b| b.date);
        Self {
            ticker: ticker.into(),
            source: source.into(),
            bars,
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((self.bars.first()?.date, self.bars.last()?.date))
    }
}

// ── Fundamentals ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FundamentalValue {
    Number(f64),
    Text(String),
}

/// Point-in-time company attributes keyed by provider field name
/// (`longName`, `sector`, `marketCap`, `trailingPE`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FundamentalsSnapshot {
    pub ticker: String,
    pub fetched_at: Option<DateTime<Utc>>,
    pub values: BTreeMap<String, FundamentalValue>,
    /// Latest analyst grade per firm, newest first (`Buy`, `Neutral`, ...).
    #[serde(default)]
    pub rating_grades: Vec<String>,
}

impl FundamentalsSnapshot {
    pub fn empty(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            FundamentalValue::Number(n) if n.is_finite() => Some(*n),
            FundamentalValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.values.get(key)? {
            FundamentalValue::Text(s) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        }
    }
}

// ── News ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsItem {
    pub title: String,
    pub publisher: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

// ── Macro series ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MacroOrigin {
    Fred,
    Cache,
    /// Synthetic series used when FRED is not configured or unreachable.
    Fallback,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MacroObservation {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroSeries {
    /// Column name in the merged dataset, e.g. `interest_rate`.
    pub name: String,
    /// Provider series id, e.g. `DFF`.
    pub series_id: String,
    pub origin: MacroOrigin,
    pub observations: Vec<MacroObservation>,
}

impl MacroSeries {
    pub fn new(
        name: impl Into<String>,
        series_id: impl Into<String>,
        origin: MacroOrigin,
        mut observations: Vec<MacroObservation>,
    ) -> Self {
        observations.sort_by_key(|o| o.date);
        observations.dedup_by_key(|o| o.date);
        Self {
            name: name.into(),
            series_id: series_id.into(),
            origin,
            observations,
        }
    }

    pub fn latest(&self) -> Option<&MacroObservation> {
        self.observations.last()
    }
}

// ── Merged dataset ────────────────────────────────────────────────────────────

/// Indicator columns. `None` while a rolling window is still filling.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IndicatorValues {
    pub days_since_start: i64,
    pub sma_7: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub volatility_7: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergedRow {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Forward-filled macro values plus their `_ma30` companions.
    pub macro_values: BTreeMap<String, f64>,
    pub indicators: Option<IndicatorValues>,
}

/// Trading-day table for one ticker: one row per date, strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedDataset {
    pub ticker: String,
    pub macro_columns: Vec<String>,
    pub rows: Vec<MergedRow>,
}

impl MergedDataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.close).collect()
    }

    pub fn last(&self) -> Option<&MergedRow> {
        self.rows.last()
    }

    pub fn has_indicators(&self) -> bool {
        !self.rows.is_empty() && self.rows.iter().all(|r| r.indicators.is_some())
    }
}

// ── Forecast ──────────────────────────────────────────────────────────────────

/// One `(date, close)` observation handed to a forecasting backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub predicted: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ForecastResult {
    pub ticker: String,
    pub horizon: usize,
    pub last_observed: NaiveDate,
    pub model: String,
    pub interval_width: f64,
    pub points: Vec<ForecastPoint>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn label(&self) -> &'static str {
        match self {
            Granularity::Daily => "Day",
            Granularity::Weekly => "Week",
            Granularity::Monthly => "Month",
        }
    }
}

/// Aggregated row used in the forecast table and chart.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PeriodSummary {
    pub period: String,
    pub low: f64,
    pub average: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ModelEvaluation {
    pub holdout: usize,
    pub mse: f64,
    pub mae: f64,
    pub rmse: f64,
    pub mape: Option<f64>,
    pub r2: Option<f64>,
}

// ── Report ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Outlook {
    StrongBullish,
    Bullish,
    Neutral,
    Bearish,
    StrongBearish,
}

impl Outlook {
    pub fn label(&self) -> &'static str {
        match self {
            Outlook::StrongBullish => "Strong Bullish",
            Outlook::Bullish => "Bullish",
            Outlook::Neutral => "Neutral",
            Outlook::Bearish => "Bearish",
            Outlook::StrongBearish => "Strong Bearish",
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            Outlook::StrongBullish => "sentiment-strong-bullish",
            Outlook::Bullish => "sentiment-bullish",
            Outlook::Neutral => "sentiment-neutral",
            Outlook::Bearish => "sentiment-bearish",
            Outlook::StrongBearish => "sentiment-strong-bearish",
        }
    }

    pub fn is_bearish(&self) -> bool {
        matches!(self, Outlook::Bearish | Outlook::StrongBearish)
    }
}

/// A report written to the output directory.
#[derive(Debug, Clone, Serialize)]
pub struct ReportArtifact {
    pub ticker: String,
    pub generated_at: DateTime<Utc>,
    pub path: PathBuf,
    pub file_name: String,
    pub outlook: Outlook,
    pub csv_path: Option<PathBuf>,
}

// ── Raw CSV rows ──────────────────────────────────────────────────────────────

/// Yahoo export: Date, Open, High, Low, Close, Adj Close, Volume
/// investing.com export: Date, Price, Open, High, Low, Vol., Change %
#[derive(Debug, Clone, Default)]
pub struct RawCsvRow {
    pub date: Option<String>,
    pub open: Option<String>,
    pub high: Option<String>,
    pub low: Option<String>,
    pub close: Option<String>,
    pub adj_close: Option<String>,
    pub volume: Option<String>,
}
