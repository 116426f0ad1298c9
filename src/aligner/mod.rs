//! Joins a price series and macro series onto one trading-day table.

use crate::models::{MacroSeries, MergedDataset, MergedRow, PriceBar, PriceSeries};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Trailing window for the `{name}_ma30` macro companions.
pub const MACRO_MA_WINDOW: usize = 30;

/// Build the merged dataset.
///
/// Price rows missing open/high/low/close, or with a non-positive close, are
/// dropped. Duplicate dates keep the last delivered bar. Macro values are
/// joined as-of the row date; dates before a series' first observation take
/// that first observation.
pub fn align(prices: &PriceSeries, macros: &[MacroSeries]) -> MergedDataset {
    let mut by_date: BTreeMap<NaiveDate, MergedRow> = BTreeMap::new();
    let mut dropped = 0usize;

    for bar in prices.bars() {
        match complete_row(bar) {
            Some(row) => {
                by_date.insert(row.date, row);
            }
            None => dropped += 1,
        }
    }

    let mut rows: Vec<MergedRow> = by_date.into_values().collect();
    if dropped > 0 {
        info!("{}: dropped {} incomplete price rows", prices.ticker(), dropped);
    }

    let mut macro_columns = Vec::new();
    for series in macros {
        if series.observations.is_empty() {
            debug!("Macro series {} is empty, skipping", series.name);
            continue;
        }

        let values = as_of_join(&rows, series);
        let averages = trailing_mean(&values, MACRO_MA_WINDOW);
        let ma_name = format!("{}_ma30", series.name);

        for ((row, v), ma) in rows.iter_mut().zip(values).zip(averages) {
            row.macro_values.insert(series.name.clone(), v);
            row.macro_values.insert(ma_name.clone(), ma);
        }
        macro_columns.push(series.name.clone());
        macro_columns.push(ma_name);
    }

    debug!(
        "{}: merged {} rows with {} macro columns",
        prices.ticker(),
        rows.len(),
        macro_columns.len()
    );

    MergedDataset {
        ticker: prices.ticker().to_string(),
        macro_columns,
        rows,
    }
}

fn complete_row(bar: &PriceBar) -> Option<MergedRow> {
    let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
    let close = finite(bar.close).filter(|c| *c > 0.0)?;

    Some(MergedRow {
        date: bar.date,
        open: finite(bar.open)?,
        high: finite(bar.high)?,
        low: finite(bar.low)?,
        close,
        volume: finite(bar.volume).unwrap_or(0.0),
        macro_values: BTreeMap::new(),
        indicators: None,
    })
}

/// Value of `series` as of each row date. `rows` must be sorted and the
/// series non-empty.
fn as_of_join(rows: &[MergedRow], series: &MacroSeries) -> Vec<f64> {
    let obs = &series.observations;
    let first = obs[0].value;
    let mut idx = 0usize;
    let mut current: Option<f64> = None;

    rows.iter()
        .map(|row| {
            while idx < obs.len() && obs[idx].date <= row.date {
                current = Some(obs[idx].value);
                idx += 1;
            }
            current.unwrap_or(first)
        })
        .collect()
}

/// Trailing mean with partial windows at the start.
fn trailing_mean(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        let n = (i + 1).min(window);
        out.push(sum / n as f64);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MacroObservation, MacroOrigin};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn bar(day: u32, close: Option<f64>) -> PriceBar {
        PriceBar {
            date: d(day),
            open: close,
            high: close.map(|c| c + 1.0),
            low: close.map(|c| c - 1.0),
            close,
            volume: None,
        }
    }

    fn series(points: &[(u32, f64)]) -> MacroSeries {
        let obs = points
            .iter()
            .map(|(day, value)| MacroObservation { date: d(*day), value: *value })
            .collect();
        MacroSeries::new("interest_rate", "DFF", MacroOrigin::Fred, obs)
    }

    #[test]
    fn test_rows_sorted_unique_and_complete() {
        let prices = PriceSeries::new(
            "T",
            "test",
            vec![
                bar(3, Some(12.0)),
                bar(2, Some(11.0)),
                bar(2, Some(11.5)),
                bar(4, None),
                bar(5, Some(-1.0)),
                bar(8, Some(13.0)),
            ],
        );
        let merged = align(&prices, &[]);

        let dates: Vec<_> = merged.rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![d(2), d(3), d(8)]);
        // Last delivered duplicate wins.
        assert_eq!(merged.rows[0].close, 11.5);
        assert_eq!(merged.rows[0].volume, 0.0);
        assert!(merged.macro_columns.is_empty());
    }

    #[test]
    fn test_forward_fill_holds_value_between_observations() {
        let prices = PriceSeries::new("T", "test", (2..=12).map(|day| bar(day, Some(10.0))).collect());
        let macros = [series(&[(2, 5.0), (9, 5.25)])];
        let merged = align(&prices, &macros);

        for row in &merged.rows {
            let v = row.macro_values["interest_rate"];
            if row.date < d(9) {
                assert_eq!(v, 5.0);
            } else {
                assert_eq!(v, 5.25);
            }
        }
    }

    #[test]
    fn test_leading_gap_takes_first_observation() {
        let prices = PriceSeries::new("T", "test", (1..=4).map(|day| bar(day, Some(10.0))).collect());
        let merged = align(&prices, &[series(&[(3, 4.0)])]);
        assert_eq!(merged.rows[0].macro_values["interest_rate"], 4.0);
        assert_eq!(merged.rows[3].macro_values["interest_rate"], 4.0);
    }

    #[test]
    fn test_ma30_uses_partial_windows() {
        let prices = PriceSeries::new("T", "test", (1..=3).map(|day| bar(day, Some(10.0))).collect());
        let merged = align(&prices, &[series(&[(1, 1.0), (2, 2.0), (3, 6.0)])]);

        assert_eq!(
            merged.macro_columns,
            vec!["interest_rate".to_string(), "interest_rate_ma30".to_string()]
        );
        assert_eq!(merged.rows[0].macro_values["interest_rate_ma30"], 1.0);
        assert_eq!(merged.rows[1].macro_values["interest_rate_ma30"], 1.5);
        assert_eq!(merged.rows[2].macro_values["interest_rate_ma30"], 3.0);
    }

    #[test]
    fn test_trailing_mean_window() {
        let values: Vec<f64> = (1..=5).map(|v| v as f64).collect();
        assert_eq!(trailing_mean(&values, 2), vec![1.0, 1.5, 2.5, 3.5, 4.5]);
    }

    #[test]
    fn test_empty_macro_series_adds_no_column() {
        let prices = PriceSeries::new("T", "test", vec![bar(2, Some(10.0))]);
        let empty = MacroSeries::new("sp500", "SP500", MacroOrigin::Fred, vec![]);
        let merged = align(&prices, &[empty]);
        assert!(merged.macro_columns.is_empty());
        assert!(merged.rows[0].macro_values.is_empty());
    }
}
