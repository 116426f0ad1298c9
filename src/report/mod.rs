//! Report assembly: analysis, charts and HTML rendered in memory, then
//! persisted under the output directory with a unique, timestamped name.

pub mod analysis;
pub mod charts;
pub mod html;

use crate::config::PipelineConfig;
use crate::error::{ReportError, ReportResult};
use crate::forecast::aggregate::Aggregation;
use crate::loader::export_merged_csv;
use crate::models::{
    ForecastResult, FundamentalsSnapshot, MacroOrigin, MacroSeries, MergedDataset, ModelEvaluation,
    NewsItem, Outlook, ReportArtifact,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use self::html::ReportView;

const MAX_NAME_ATTEMPTS: usize = 1000;

/// Inputs for one report, all computed upstream.
pub struct ReportInput<'a> {
    pub dataset: &'a MergedDataset,
    pub forecast: &'a ForecastResult,
    pub aggregation: &'a Aggregation,
    pub fundamentals: &'a FundamentalsSnapshot,
    pub macros: &'a [MacroSeries],
    pub news: &'a [NewsItem],
    pub evaluation: Option<&'a ModelEvaluation>,
    pub data_source: &'a str,
}

/// A fully rendered page that has not been written yet.
#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub html: String,
    pub outlook: Outlook,
}

#[derive(Debug, Clone)]
pub struct ReportAssembler {
    output_dir: PathBuf,
    export_csv: bool,
}

fn origin_label(origin: MacroOrigin) -> &'static str {
    match origin {
        MacroOrigin::Fred => "FRED",
        MacroOrigin::Cache => "FRED (cached)",
        MacroOrigin::Fallback => "Synthetic fallback",
    }
}

/// Ticker as it may appear in a file name: "BRK-A" → "BRK_A"
pub fn file_safe_ticker(ticker: &str) -> String {
    ticker
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn file_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// A claimed report name. The page is written to a hidden staging file and
/// only linked under `path` once complete, so the served name never holds a
/// partial page.
struct Reservation {
    path: PathBuf,
    staging: PathBuf,
    suffix: String,
    file: File,
}

impl Reservation {
    /// Write the page, then link it into place. `hard_link` refuses to
    /// replace an existing file, so a published report is never overwritten.
    fn publish(self, contents: &str) -> Result<PathBuf> {
        let Reservation {
            path,
            staging,
            mut file,
            ..
        } = self;

        let result = file
            .write_all(contents.as_bytes())
            .and_then(|_| file.sync_all())
            .with_context(|| format!("Failed to write {:?}", staging))
            .and_then(|_| {
                fs::hard_link(&staging, &path)
                    .with_context(|| format!("Failed to publish report as {:?}", path))
            });
        drop(file);
        let _ = fs::remove_file(&staging);
        result.map(|_| path)
    }
}

fn staging_path(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("report path has no file name")?;
    Ok(path.with_file_name(format!(".{}.tmp", file_name)))
}

/// Claim `{TICKER}_report_{stamp}[_{n}].html` in `dir` by creating its
/// staging file with `create_new`. Nothing appears under the final name yet.
fn reserve_report_path(dir: &Path, ticker: &str, stamp: &str) -> Result<Reservation> {
    for n in 0..MAX_NAME_ATTEMPTS {
        let suffix = if n == 0 { String::new() } else { format!("_{}", n) };
        let path = dir.join(format!("{}_report_{}{}.html", ticker, stamp, suffix));
        if fs::symlink_metadata(&path).is_ok() {
            continue;
        }
        let staging = staging_path(&path)?;
        match OpenOptions::new().write(true).create_new(true).open(&staging) {
            Ok(file) => {
                return Ok(Reservation {
                    path,
                    staging,
                    suffix,
                    file,
                });
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e).with_context(|| format!("Failed to create {:?}", staging)),
        }
    }
    anyhow::bail!("no free report name for {} at {}", ticker, stamp)
}

impl ReportAssembler {
    pub fn new(output_dir: impl Into<PathBuf>, export_csv: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            export_csv,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.output_dir.clone(), config.export_csv)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Build the page in memory. Nothing touches the filesystem here.
    pub fn render(&self, input: &ReportInput, generated_at: DateTime<Utc>) -> ReportResult<RenderedReport> {
        let ticker = input.dataset.ticker.as_str();
        let metrics = analysis::key_metrics(input.dataset, input.aggregation)
            .ok_or_else(|| ReportError::Render(format!("{} has no rows to report on", ticker)))?;
        let outlook = analysis::outlook(&metrics);
        let granularity = input.aggregation.granularity;

        let risks = analysis::risk_items(&metrics, outlook, granularity.label(), input.fundamentals);
        let forecast_rows = analysis::forecast_table(input.aggregation, metrics.current_price);
        let technical = analysis::technical_summary(input.dataset);
        let rsi_conclusion = analysis::rsi_conclusion(metrics.rsi);
        let macd_conclusion = analysis::macd_conclusion(input.dataset);
        let bollinger_conclusion = analysis::bollinger_conclusion(input.dataset);
        let fundamentals = analysis::fundamentals_sections(input.fundamentals);
        let recommendation = analysis::recommendation(input.fundamentals);
        let faq = analysis::faq(
            ticker,
            &metrics,
            outlook,
            granularity.label(),
            risks.len(),
            input.fundamentals,
        );

        let macro_notes: Vec<(String, &'static str, Option<f64>)> = input
            .macros
            .iter()
            .map(|s| (s.name.clone(), origin_label(s.origin), s.latest().map(|o| o.value)))
            .collect();

        let mut figures = vec![charts::forecast_chart(ticker, input.aggregation, &metrics)];
        figures.extend(
            [
                charts::historical_chart(ticker, input.dataset),
                charts::bollinger_chart(ticker, input.dataset),
                charts::rsi_chart(ticker, input.dataset),
                charts::macd_lines_chart(ticker, input.dataset),
                charts::macd_histogram_chart(ticker, input.dataset),
            ]
            .into_iter()
            .flatten(),
        );

        let view = ReportView {
            ticker,
            generated_at,
            data_source: input.data_source,
            model_name: &input.forecast.model,
            interval_width: input.forecast.interval_width,
            granularity,
            metrics: &metrics,
            outlook,
            risks: &risks,
            forecast_rows: &forecast_rows,
            technical: &technical,
            rsi_conclusion: &rsi_conclusion,
            macd_conclusion: &macd_conclusion,
            bollinger_conclusion: &bollinger_conclusion,
            fundamentals: &fundamentals,
            business_summary: analysis::business_summary(input.fundamentals),
            recommendation: recommendation.as_deref(),
            evaluation: input.evaluation,
            macro_notes: &macro_notes,
            news: input.news,
            faq: &faq,
            charts: &figures,
        };

        let html = html::render(&view).map_err(|e| ReportError::Render(format!("{:#}", e)))?;
        debug!("{}: rendered {} bytes, {} charts", ticker, html.len(), figures.len());
        Ok(RenderedReport { html, outlook })
    }

    /// Render, then persist. A render failure leaves no files behind.
    pub fn assemble(&self, input: &ReportInput) -> ReportResult<ReportArtifact> {
        let generated_at = Utc::now();
        let rendered = self.render(input, generated_at)?;
        self.persist(input.dataset, rendered, generated_at)
            .map_err(|e| ReportError::Render(format!("{:#}", e)))
    }

    fn persist(
        &self,
        dataset: &MergedDataset,
        rendered: RenderedReport,
        generated_at: DateTime<Utc>,
    ) -> Result<ReportArtifact> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create output directory {:?}", self.output_dir))?;

        let safe = file_safe_ticker(&dataset.ticker);
        let stamp = file_stamp(generated_at);
        let reservation = reserve_report_path(&self.output_dir, &safe, &stamp)?;

        let csv_path = if self.export_csv {
            let csv_path = self
                .output_dir
                .join(format!("{}_processed_{}{}.csv", safe, stamp, reservation.suffix));
            match export_merged_csv(dataset, &csv_path) {
                Ok(()) => Some(csv_path),
                Err(e) => {
                    warn!("{}: CSV export skipped: {:#}", dataset.ticker, e);
                    let _ = fs::remove_file(&csv_path);
                    None
                }
            }
        } else {
            None
        };

        let path = match reservation.publish(&rendered.html) {
            Ok(path) => path,
            Err(e) => {
                if let Some(csv) = &csv_path {
                    let _ = fs::remove_file(csv);
                }
                return Err(e);
            }
        };

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .context("report path has no file name")?;
        info!("{}: report written to {:?}", dataset.ticker, path);

        Ok(ReportArtifact {
            ticker: dataset.ticker.clone(),
            generated_at,
            path,
            file_name,
            outlook: rendered.outlook,
            csv_path,
        })
    }
}
