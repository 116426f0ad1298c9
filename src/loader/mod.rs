//! Local CSV files: an offline price source, and the processed-dataset
//! export written next to each report.

use crate::models::{IndicatorValues, MergedDataset, PriceSeries, RawCsvRow};
use crate::providers::PriceSource;
use crate::providers::cleaner::csv_row_to_bar;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ── Import ────────────────────────────────────────────────────────────────────

/// Column positions resolved from the header row. Handles both the Yahoo
/// export (`Date,Open,High,Low,Close,Adj Close,Volume`) and investing.com
/// (`Date,Price,Open,High,Low,Vol.,Change %`).
#[derive(Debug, Default, PartialEq)]
struct ColumnMap {
    date: Option<usize>,
    open: Option<usize>,
    high: Option<usize>,
    low: Option<usize>,
    close: Option<usize>,
    adj_close: Option<usize>,
    volume: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let mut map = ColumnMap::default();
        for (i, h) in headers.iter().enumerate() {
            let h = h.trim().trim_start_matches('\u{feff}').trim_matches('"').to_lowercase();
            let slot = match h.as_str() {
                "date" => &mut map.date,
                "open" => &mut map.open,
                "high" => &mut map.high,
                "low" => &mut map.low,
                "close" | "price" => &mut map.close,
                "adj close" | "adj_close" | "adjclose" => &mut map.adj_close,
                "volume" | "vol." | "vol" => &mut map.volume,
                _ => continue,
            };
            slot.get_or_insert(i);
        }
        map
    }

    fn row(&self, record: &csv::StringRecord) -> RawCsvRow {
        let get = |idx: Option<usize>| idx.and_then(|i| record.get(i)).map(|s| s.to_string());
        RawCsvRow {
            date: get(self.date),
            open: get(self.open),
            high: get(self.high),
            low: get(self.low),
            close: get(self.close),
            adj_close: get(self.adj_close),
            volume: get(self.volume),
        }
    }
}

/// Parse one price CSV into a series. Unparseable rows are skipped.
pub fn load_csv(path: &Path, ticker: &str) -> Result<PriceSeries> {
    debug!("Loading {} from {:?}", ticker, path);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {:?}", path))?;

    let columns = ColumnMap::from_headers(reader.headers()?);
    if columns.date.is_none() || columns.close.is_none() {
        bail!("{:?} has no Date/Close columns", path);
    }

    let mut bars = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };

        if let Some(bar) = csv_row_to_bar(ticker, &columns.row(&record)) {
            bars.push(bar);
        }
    }

    info!("{}: {} bars loaded", ticker, bars.len());
    Ok(PriceSeries::new(ticker, "csv", bars))
}

/// Reads `{dir}/{TICKER}.csv`.
pub struct CsvPriceSource {
    dir: PathBuf,
}

impl CsvPriceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", ticker))
    }
}

#[async_trait]
impl PriceSource for CsvPriceSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn cacheable(&self) -> bool {
        false
    }

    async fn fetch_prices(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceSeries> {
        let path = self.path_for(ticker);
        if !path.is_file() {
            bail!("no CSV file at {:?}", path);
        }

        let ticker_owned = ticker.to_string();
        let series = tokio::task::spawn_blocking(move || load_csv(&path, &ticker_owned))
            .await
            .context("CSV loader task panicked")??;

        let bars = series
            .bars()
            .iter()
            .filter(|b| b.date >= start && b.date <= end)
            .cloned()
            .collect();
        Ok(PriceSeries::new(ticker, self.name(), bars))
    }
}

// ── Export ────────────────────────────────────────────────────────────────────

const INDICATOR_COLUMNS: [&str; 13] = [
    "days_since_start",
    "sma_7",
    "sma_20",
    "sma_50",
    "sma_200",
    "rsi_14",
    "macd",
    "macd_signal",
    "macd_hist",
    "bb_upper",
    "bb_middle",
    "bb_lower",
    "volatility_7",
];

fn indicator_cells(ind: Option<&IndicatorValues>) -> Vec<String> {
    let Some(ind) = ind else {
        return vec![String::new(); INDICATOR_COLUMNS.len()];
    };
    let opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    vec![
        ind.days_since_start.to_string(),
        opt(ind.sma_7),
        opt(ind.sma_20),
        opt(ind.sma_50),
        opt(ind.sma_200),
        opt(ind.rsi_14),
        opt(ind.macd),
        opt(ind.macd_signal),
        opt(ind.macd_hist),
        opt(ind.bb_upper),
        opt(ind.bb_middle),
        opt(ind.bb_lower),
        opt(ind.volatility_7),
    ]
}

/// Write the merged dataset as CSV. Undefined indicator values are empty cells.
pub fn export_merged_csv(dataset: &MergedDataset, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;

    let mut header: Vec<String> = ["date", "open", "high", "low", "close", "volume"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(dataset.macro_columns.iter().cloned());
    header.extend(INDICATOR_COLUMNS.iter().map(|s| s.to_string()));
    writer.write_record(&header)?;

    for row in &dataset.rows {
        let mut record = vec![
            row.date.format("%Y-%m-%d").to_string(),
            row.open.to_string(),
            row.high.to_string(),
            row.low.to_string(),
            row.close.to_string(),
            row.volume.to_string(),
        ];
        for col in &dataset.macro_columns {
            record.push(row.macro_values.get(col).map(|v| v.to_string()).unwrap_or_default());
        }
        record.extend(indicator_cells(row.indicators.as_ref()));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    debug!("Exported {} rows to {:?}", dataset.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MergedRow;
    use std::collections::BTreeMap;
    use std::io::Write;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_load_yahoo_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("AAPL.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "Date,Open,High,Low,Close,Adj Close,Volume").unwrap();
        writeln!(f, "2024-01-03,184.22,185.88,183.43,184.25,184.25,58414500").unwrap();
        writeln!(f, "2024-01-02,187.15,188.44,183.89,185.64,185.64,82488700").unwrap();
        writeln!(f, "not-a-date,1,1,1,1,1,1").unwrap();

        let series = load_csv(&path, "AAPL").unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.bars()[0].date, d(2024, 1, 2));
        assert_eq!(series.bars()[1].volume, Some(58_414_500.0));
    }

    #[test]
    fn test_load_investing_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MTNN.csv");
        std::fs::write(
            &path,
            "\"Date\",\"Price\",\"Open\",\"High\",\"Low\",\"Vol.\",\"Change %\"\n\
             \"Feb 20, 2024\",\"1,234.50\",\"1,200.00\",\"1,250.00\",\"1,190.00\",\"1.2M\",\"+2.5%\"\n",
        )
        .unwrap();

        let series = load_csv(&path, "MTNN").unwrap();
        assert_eq!(series.len(), 1);
        let bar = &series.bars()[0];
        assert_eq!(bar.close, Some(1234.5));
        assert_eq!(bar.open, Some(1200.0));
        assert_eq!(bar.volume, Some(1_200_000.0));
    }

    #[tokio::test]
    async fn test_csv_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = CsvPriceSource::new(dir.path());
        let result = source.fetch_prices("NOPE", d(2024, 1, 1), d(2024, 2, 1)).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_export_merged_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let mut macro_values = BTreeMap::new();
        macro_values.insert("interest_rate".to_string(), 5.33);
        let dataset = MergedDataset {
            ticker: "AAPL".into(),
            macro_columns: vec!["interest_rate".into()],
            rows: vec![MergedRow {
                date: d(2024, 1, 2),
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 100.0,
                macro_values,
                indicators: Some(IndicatorValues::default()),
            }],
        };

        export_merged_csv(&dataset, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("date,open,high,low,close,volume,interest_rate,days_since_start"));
        assert_eq!(header.split(',').count(), 7 + INDICATOR_COLUMNS.len());
        assert!(lines.next().unwrap().starts_with("2024-01-02,1,2,0.5,1.5,100,5.33,0,,"));
    }
}
