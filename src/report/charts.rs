//! Plotly figures (`{data, layout}`) built as JSON values. The page
//! loads plotly.js from a CDN and calls `Plotly.newPlot` on each figure.

use crate::forecast::aggregate::Aggregation;
use crate::features::indicators::sma;
use crate::features::{BB_WINDOW, MACD_SIGNAL, MACD_SLOW, RSI_WINDOW, SMA_MEDIUM};
use crate::models::{IndicatorValues, MergedDataset, PeriodSummary};
use serde_json::{json, Value};

use super::analysis::KeyMetrics;

/// Actual periods shown before the forecast.
const ACTUAL_PERIODS: usize = 6;
const FORECAST_PERIODS: usize = 12;

#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    /// DOM id of the container div.
    pub id: &'static str,
    pub figure: Value,
}

fn layout(title: String, height: u32) -> Value {
    json!({
        "title": { "text": title },
        "template": "plotly_white",
        "height": height,
        "margin": { "l": 50, "r": 30, "t": 60, "b": 40 },
        "hovermode": "x unified",
        "legend": { "orientation": "h", "y": -0.2 },
    })
}

fn dates(dataset: &MergedDataset) -> Vec<String> {
    dataset.rows.iter().map(|r| r.date.to_string()).collect()
}

fn column(dataset: &MergedDataset, f: impl Fn(&IndicatorValues) -> Option<f64>) -> Vec<Option<f64>> {
    dataset
        .rows
        .iter()
        .map(|r| r.indicators.as_ref().and_then(&f))
        .collect()
}

/// Last actual periods against the first forecast periods, with the final
/// average annotated.
pub fn forecast_chart(ticker: &str, aggregation: &Aggregation, metrics: &KeyMetrics) -> Chart {
    let label = aggregation.granularity.label();
    let actual = &aggregation.history[aggregation.history.len().saturating_sub(ACTUAL_PERIODS)..];
    let forecast = &aggregation.forecast[..aggregation.forecast.len().min(FORECAST_PERIODS)];

    let mut axis: Vec<&str> = actual.iter().map(|p| p.period.as_str()).collect();
    for p in forecast {
        if !axis.contains(&p.period.as_str()) {
            axis.push(&p.period);
        }
    }

    let hover = |name: &str| format!("<b>%{{x}} ({label})</b><br><b>{name}</b>: %{{y:.2f}}<extra></extra>");
    let mut data = vec![json!({
        "type": "scatter",
        "mode": "lines+markers",
        "name": "Actual Aggregated",
        "x": actual.iter().map(|p| &p.period).collect::<Vec<_>>(),
        "y": actual.iter().map(|p| p.average).collect::<Vec<_>>(),
        "line": { "color": "#1f77b4", "width": 2.5 },
        "marker": { "size": 8 },
        "hovertemplate": hover("Avg Price"),
    })];

    let series: [(&str, &str, fn(&PeriodSummary) -> f64); 3] = [
        ("Low", "#d62728", |p| p.low),
        ("Average", "#2ca02c", |p| p.average),
        ("High", "#9467bd", |p| p.high),
    ];
    for (name, color, value) in series {
        data.push(json!({
            "type": "scatter",
            "mode": "lines+markers",
            "name": format!("Forecast {name}"),
            "x": forecast.iter().map(|p| &p.period).collect::<Vec<_>>(),
            "y": forecast.iter().map(value).collect::<Vec<_>>(),
            "line": { "color": color, "width": 2.5 },
            "marker": { "size": 8, "line": { "width": 1, "color": "#ffffff" } },
            "hovertemplate": hover(name),
        }));
    }

    let mut layout = layout(
        format!("{} {}-{} Price Forecast vs Actual", ticker, forecast.len(), label),
        500,
    );
    layout["xaxis"] = json!({
        "title": { "text": label },
        "type": "category",
        "categoryorder": "array",
        "categoryarray": axis,
    });
    layout["yaxis"] = json!({ "title": { "text": "Price" } });
    if let (Some(last), Some(avg)) = (forecast.last(), metrics.final_forecast) {
        layout["annotations"] = json!([{
            "x": last.period,
            "y": avg,
            "text": format!(
                "<b>{:.2}</b><br>{:+.1}% ({} {}s)",
                avg, metrics.forecast_change, forecast.len(), label
            ),
            "showarrow": true,
            "arrowhead": 2,
            "ax": 40,
            "ay": -40,
            "bgcolor": "rgba(255,255,255,0.8)",
            "bordercolor": "black",
            "borderwidth": 1,
            "font": { "color": "#2ca02c", "size": 10 },
        }]);
    }

    Chart {
        id: "forecast-chart",
        figure: json!({ "data": data, "layout": layout }),
    }
}

pub fn bollinger_chart(ticker: &str, dataset: &MergedDataset) -> Option<Chart> {
    if dataset.len() < BB_WINDOW {
        return None;
    }
    let x = dates(dataset);
    let band = |name: &str, y: Vec<Option<f64>>, color: &str, dash: &str| {
        json!({
            "type": "scatter", "mode": "lines", "name": name, "x": x, "y": y,
            "line": { "color": color, "width": 1, "dash": dash },
        })
    };
    let data = vec![
        json!({
            "type": "scatter", "mode": "lines", "name": "Close", "x": x,
            "y": dataset.closes(),
            "line": { "color": "#1f77b4", "width": 2 },
        }),
        band("Upper Band", column(dataset, |i| i.bb_upper), "rgba(214,39,40,0.7)", "dash"),
        band("Middle Band (SMA 20)", column(dataset, |i| i.bb_middle), "rgba(255,127,14,0.8)", "dot"),
        band("Lower Band", column(dataset, |i| i.bb_lower), "rgba(44,160,44,0.7)", "dash"),
    ];
    Some(Chart {
        id: "bollinger-chart",
        figure: json!({ "data": data, "layout": layout(format!("{} Price & Bollinger Bands", ticker), 350) }),
    })
}

pub fn rsi_chart(ticker: &str, dataset: &MergedDataset) -> Option<Chart> {
    if dataset.len() <= RSI_WINDOW {
        return None;
    }
    let x = dates(dataset);
    let mut layout = layout(format!("{} Relative Strength Index (RSI)", ticker), 350);
    layout["yaxis"] = json!({ "range": [0, 100], "title": { "text": "RSI" } });
    layout["shapes"] = json!([(70, "red"), (30, "green")].map(|(level, color)| json!({
        "type": "line", "xref": "paper", "x0": 0, "x1": 1, "y0": level, "y1": level,
        "line": { "color": color, "dash": "dash", "width": 1 },
    })));

    Some(Chart {
        id: "rsi-chart",
        figure: json!({
            "data": [{
                "type": "scatter", "mode": "lines", "name": "RSI", "x": x,
                "y": column(dataset, |i| i.rsi_14),
                "line": { "color": "#9467bd", "width": 2 },
            }],
            "layout": layout,
        }),
    })
}

pub fn macd_lines_chart(ticker: &str, dataset: &MergedDataset) -> Option<Chart> {
    if dataset.len() < MACD_SLOW + MACD_SIGNAL {
        return None;
    }
    let x = dates(dataset);
    Some(Chart {
        id: "macd-lines-chart",
        figure: json!({
            "data": [
                {
                    "type": "scatter", "mode": "lines", "name": "MACD", "x": x,
                    "y": column(dataset, |i| i.macd),
                    "line": { "color": "#1f77b4", "width": 2 },
                },
                {
                    "type": "scatter", "mode": "lines", "name": "Signal", "x": x,
                    "y": column(dataset, |i| i.macd_signal),
                    "line": { "color": "#ff7f0e", "width": 2 },
                },
            ],
            "layout": layout(format!("{} MACD Line & Signal", ticker), 350),
        }),
    })
}

pub fn macd_histogram_chart(ticker: &str, dataset: &MergedDataset) -> Option<Chart> {
    if dataset.len() < MACD_SLOW + MACD_SIGNAL {
        return None;
    }
    let hist = column(dataset, |i| i.macd_hist);
    let colors: Vec<&str> = hist
        .iter()
        .map(|h| match h {
            Some(v) if *v < 0.0 => "#d62728",
            _ => "#2ca02c",
        })
        .collect();
    Some(Chart {
        id: "macd-hist-chart",
        figure: json!({
            "data": [{
                "type": "bar", "name": "Histogram", "x": dates(dataset), "y": hist,
                "marker": { "color": colors },
            }],
            "layout": layout(format!("{} MACD Histogram", ticker), 300),
        }),
    })
}

/// Close price with volume and its 20-day average on a secondary axis.
pub fn historical_chart(ticker: &str, dataset: &MergedDataset) -> Option<Chart> {
    if dataset.is_empty() {
        return None;
    }
    let x = dates(dataset);
    let volumes: Vec<f64> = dataset.rows.iter().map(|r| r.volume).collect();
    let volume_sma = sma(&volumes, SMA_MEDIUM);

    let mut layout = layout(format!("{} Historical Price & Volume", ticker), 450);
    layout["yaxis"] = json!({ "title": { "text": "Price" } });
    layout["yaxis2"] = json!({
        "title": { "text": "Volume" },
        "overlaying": "y",
        "side": "right",
        "showgrid": false,
    });

    Some(Chart {
        id: "historical-chart",
        figure: json!({
            "data": [
                {
                    "type": "scatter", "mode": "lines", "name": "Close", "x": x,
                    "y": dataset.closes(),
                    "line": { "color": "#1f77b4", "width": 2 },
                },
                {
                    "type": "bar", "name": "Volume", "x": x, "y": volumes, "yaxis": "y2",
                    "marker": { "color": "rgba(128,128,128,0.35)" },
                },
                {
                    "type": "scatter", "mode": "lines", "name": "Volume SMA 20", "x": x,
                    "y": volume_sma, "yaxis": "y2",
                    "line": { "color": "#ff7f0e", "width": 1.5 },
                },
            ],
            "layout": layout,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::add_indicators;
    use crate::models::MergedRow;
    use chrono::{Days, NaiveDate};
    use std::collections::BTreeMap;

    fn dataset(n: usize) -> MergedDataset {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        add_indicators(MergedDataset {
            ticker: "TEST".into(),
            macro_columns: vec![],
            rows: (0..n)
                .map(|i| {
                    let c = 20.0 + (i as f64 / 3.0).sin();
                    MergedRow {
                        date: start + Days::new(i as u64),
                        open: c,
                        high: c,
                        low: c,
                        close: c,
                        volume: 500.0,
                        macro_values: BTreeMap::new(),
                        indicators: None,
                    }
                })
                .collect(),
        })
    }

    #[test]
    fn test_indicator_charts_need_enough_rows() {
        let short = dataset(16);
        assert!(bollinger_chart("T", &short).is_none());
        assert!(rsi_chart("T", &short).is_some());
        assert!(macd_lines_chart("T", &short).is_none());
        assert!(macd_histogram_chart("T", &short).is_none());
        assert!(historical_chart("T", &short).is_some());

        let long = dataset(60);
        assert!(bollinger_chart("T", &long).is_some());
        assert!(macd_histogram_chart("T", &long).is_some());
    }

    #[test]
    fn test_missing_values_serialize_as_null() {
        let chart = bollinger_chart("T", &dataset(30)).unwrap();
        let upper = &chart.figure["data"][1]["y"];
        assert!(upper[0].is_null());
        assert!(upper[19].is_number());
        assert_eq!(upper.as_array().unwrap().len(), 30);
    }

    #[test]
    fn test_histogram_bar_colors() {
        let chart = macd_histogram_chart("T", &dataset(60)).unwrap();
        let y = chart.figure["data"][0]["y"].as_array().unwrap().clone();
        let colors = chart.figure["data"][0]["marker"]["color"].as_array().unwrap().clone();
        for (v, c) in y.iter().zip(&colors) {
            if v.as_f64().is_some_and(|v| v < 0.0) {
                assert_eq!(c, "#d62728");
            } else {
                assert_eq!(c, "#2ca02c");
            }
        }
    }
}
