pub mod indicators;

use crate::models::{IndicatorValues, MergedDataset};
use tracing::debug;

use self::indicators::{bollinger, macd, rolling_std, rsi, sma};

pub const SMA_SHORT: usize = 7;
pub const SMA_MEDIUM: usize = 20;
pub const SMA_LONG: usize = 50;
pub const SMA_TREND: usize = 200;
pub const RSI_WINDOW: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const BB_WINDOW: usize = 20;
pub const BB_STD: f64 = 2.0;
pub const VOLATILITY_WINDOW: usize = 7;

/// Attach indicator columns to every row. Never adds or removes rows.
pub fn add_indicators(mut dataset: MergedDataset) -> MergedDataset {
    let closes = dataset.closes();
    let Some(first_date) = dataset.rows.first().map(|r| r.date) else {
        return dataset;
    };

    let sma_7 = sma(&closes, SMA_SHORT);
    let sma_20 = sma(&closes, SMA_MEDIUM);
    let sma_50 = sma(&closes, SMA_LONG);
    let sma_200 = sma(&closes, SMA_TREND);
    let rsi_14 = rsi(&closes, RSI_WINDOW);
    let m = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
    let bb = bollinger(&closes, BB_WINDOW, BB_STD);
    let vol_7 = rolling_std(&closes, VOLATILITY_WINDOW);

    for (i, row) in dataset.rows.iter_mut().enumerate() {
        row.indicators = Some(IndicatorValues {
            days_since_start: (row.date - first_date).num_days(),
            sma_7: sma_7[i],
            sma_20: sma_20[i],
            sma_50: sma_50[i],
            sma_200: sma_200[i],
            rsi_14: rsi_14[i],
            macd: m.line[i],
            macd_signal: m.signal[i],
            macd_hist: m.histogram[i],
            bb_upper: bb.upper[i],
            bb_middle: bb.middle[i],
            bb_lower: bb.lower[i],
            volatility_7: vol_7[i],
        });
    }

    debug!("{}: indicators computed for {} rows", dataset.ticker, dataset.len());
    dataset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MergedRow;
    use chrono::{Days, NaiveDate};
    use std::collections::BTreeMap;

    fn dataset(n: usize) -> MergedDataset {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let rows = (0..n)
            .map(|i| {
                let close = 50.0 + (i as f64 / 4.0).cos() * 5.0 + i as f64 * 0.1;
                MergedRow {
                    date: start + Days::new(i as u64 * 2),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1000.0,
                    macro_values: BTreeMap::new(),
                    indicators: None,
                }
            })
            .collect();
        MergedDataset {
            ticker: "TEST".into(),
            macro_columns: vec![],
            rows,
        }
    }

    #[test]
    fn test_output_length_equals_input_length() {
        for n in [0, 1, 5, 19, 20, 60, 250] {
            let out = add_indicators(dataset(n));
            assert_eq!(out.len(), n);
            assert!(out.rows.iter().all(|r| r.indicators.is_some()));
        }
    }

    #[test]
    fn test_placeholders_until_windows_fill() {
        let out = add_indicators(dataset(60));
        let ind = |i: usize| out.rows[i].indicators.clone().unwrap();

        assert!(ind(5).sma_7.is_none());
        assert!(ind(6).sma_7.is_some());
        assert!(ind(18).bb_upper.is_none());
        assert!(ind(19).bb_upper.is_some());
        assert!(ind(13).rsi_14.is_none());
        assert!(ind(14).rsi_14.is_some());
        assert!(ind(59).sma_200.is_none());
        assert!(ind(59).macd_hist.is_some());
        assert_eq!(ind(0).days_since_start, 0);
        assert_eq!(ind(10).days_since_start, 20);
    }

    #[test]
    fn test_sma_windows_follow_constants() {
        let out = add_indicators(dataset(SMA_TREND));
        let ind = |i: usize| out.rows[i].indicators.clone().unwrap();

        assert!(ind(SMA_MEDIUM - 2).sma_20.is_none());
        assert!(ind(SMA_MEDIUM - 1).sma_20.is_some());
        assert!(ind(SMA_LONG - 2).sma_50.is_none());
        assert!(ind(SMA_LONG - 1).sma_50.is_some());
        assert!(ind(SMA_TREND - 2).sma_200.is_none());
        assert!(ind(SMA_TREND - 1).sma_200.is_some());

        let closes = out.closes();
        let expected: f64 = closes[SMA_LONG..2 * SMA_LONG].iter().sum::<f64>() / SMA_LONG as f64;
        assert!((ind(2 * SMA_LONG - 1).sma_50.unwrap() - expected).abs() < 1e-9);
    }
}
