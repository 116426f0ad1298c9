use crate::models::{FundamentalValue, MacroObservation, NewsItem, PriceBar};
use anyhow::{Result, bail};
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

// ── Yahoo chart ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
    #[serde(default)]
    adjclose: Vec<ChartAdjClose>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct ChartAdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// Parse a `/v8/finance/chart` payload into split/dividend adjusted bars.
///
/// Timestamps are shifted by the exchange `gmtoffset` so that bar dates are
/// exchange-local trading days. Where `adjclose` is present, open/high/low
/// are rescaled by `adjclose / close` and close is replaced by `adjclose`.
pub fn parse_chart(json: &str) -> Result<Vec<PriceBar>> {
    let env: ChartEnvelope = serde_json::from_str(json)?;

    if let Some(err) = env.chart.error {
        bail!(
            "{}: {}",
            err.code.unwrap_or_else(|| "error".to_string()),
            err.description.unwrap_or_default()
        );
    }

    let Some(result) = env.chart.result.and_then(|r| r.into_iter().next()) else {
        bail!("chart response has no result");
    };

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let adj = result
        .indicators
        .adjclose
        .into_iter()
        .next()
        .map(|a| a.adjclose)
        .unwrap_or_default();

    let at = |v: &[Option<f64>], i: usize| v.get(i).copied().flatten().filter(|x| x.is_finite());

    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (i, ts) in result.timestamp.iter().enumerate() {
        let Some(dt) = DateTime::from_timestamp(ts + result.meta.gmtoffset, 0) else {
            warn!("Skipping out-of-range timestamp {}", ts);
            continue;
        };

        let close = at(&quote.close, i);
        let factor = match (close, at(&adj, i)) {
            (Some(c), Some(a)) if c > 0.0 => a / c,
            _ => 1.0,
        };
        let scale = |v: Option<f64>| v.map(|x| x * factor);

        bars.push(PriceBar {
            date: dt.date_naive(),
            open: scale(at(&quote.open, i)),
            high: scale(at(&quote.high, i)),
            low: scale(at(&quote.low, i)),
            close: scale(close),
            volume: at(&quote.volume, i),
        });
    }

    debug!(
        "Parsed {} chart rows for {}",
        bars.len(),
        result.meta.symbol.as_deref().unwrap_or("?")
    );
    Ok(bars)
}

// ── Yahoo quoteSummary ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryEnvelope {
    quote_summary: QuoteSummaryBody,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryBody {
    result: Option<Vec<BTreeMap<String, Value>>>,
    error: Option<ProviderError>,
}

/// Flatten the quoteSummary modules into one `field → value` map.
///
/// `{ "raw": 28.4, "fmt": "28.40" }` becomes a number, plain strings stay text,
/// empty objects, arrays and `maxAge` are dropped. When two modules carry the
/// same field the first one wins.
pub fn parse_quote_summary(json: &str) -> Result<BTreeMap<String, FundamentalValue>> {
    let env: QuoteSummaryEnvelope = serde_json::from_str(json)?;

    if let Some(err) = env.quote_summary.error {
        bail!(
            "{}: {}",
            err.code.unwrap_or_else(|| "error".to_string()),
            err.description.unwrap_or_default()
        );
    }

    let modules = env
        .quote_summary
        .result
        .and_then(|r| r.into_iter().next())
        .unwrap_or_default();

    let mut values = BTreeMap::new();
    for module in modules.values() {
        let Value::Object(fields) = module else {
            continue;
        };
        for (key, value) in fields {
            if key == "maxAge" {
                continue;
            }
            if let Some(v) = flatten_value(value) {
                values.entry(key.clone()).or_insert(v);
            }
        }
    }
    Ok(values)
}

fn flatten_value(value: &Value) -> Option<FundamentalValue> {
    match value {
        Value::Number(n) => n.as_f64().map(FundamentalValue::Number),
        Value::String(s) if !s.trim().is_empty() => Some(FundamentalValue::Text(s.clone())),
        Value::Object(obj) => match obj.get("raw") {
            Some(Value::Number(n)) => n.as_f64().map(FundamentalValue::Number),
            Some(Value::String(s)) => Some(FundamentalValue::Text(s.clone())),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Debug, Default, Deserialize)]
struct GradeHistory {
    #[serde(default)]
    history: Vec<GradeChange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GradeChange {
    firm: Option<String>,
    to_grade: Option<String>,
    epoch_grade_date: Option<i64>,
}

/// Current analyst grades from the `upgradeDowngradeHistory` module: the most
/// recent `toGrade` of each firm, newest first.
pub fn parse_rating_grades(json: &str) -> Result<Vec<String>> {
    let env: QuoteSummaryEnvelope = serde_json::from_str(json)?;
    let Some(module) = env
        .quote_summary
        .result
        .and_then(|r| r.into_iter().next())
        .and_then(|mut modules| modules.remove("upgradeDowngradeHistory"))
    else {
        return Ok(Vec::new());
    };

    let mut changes = serde_json::from_value::<GradeHistory>(module)
        .unwrap_or_default()
        .history;
    changes.sort_by_key(|c| std::cmp::Reverse(c.epoch_grade_date.unwrap_or(i64::MIN)));

    let mut seen = std::collections::HashSet::new();
    let grades = changes
        .into_iter()
        .filter_map(|c| {
            let grade = c.to_grade?.trim().to_string();
            if grade.is_empty() {
                return None;
            }
            match c.firm {
                Some(firm) if !seen.insert(firm.trim().to_lowercase()) => None,
                _ => Some(grade),
            }
        })
        .collect();
    Ok(grades)
}

// ── Yahoo search ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    news: Vec<SearchNews>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchNews {
    title: Option<String>,
    publisher: Option<String>,
    link: Option<String>,
    provider_publish_time: Option<i64>,
}

/// Headlines from the search endpoint, first `limit` with a title.
pub fn parse_news(json: &str, limit: usize) -> Result<Vec<NewsItem>> {
    let env: SearchEnvelope = serde_json::from_str(json)?;
    let non_empty = |s: Option<String>| s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    let items = env
        .news
        .into_iter()
        .filter_map(|n| {
            Some(NewsItem {
                title: non_empty(n.title)?,
                publisher: non_empty(n.publisher),
                link: non_empty(n.link),
                published: n.provider_publish_time.and_then(|t| DateTime::from_timestamp(t, 0)),
            })
        })
        .take(limit)
        .collect();
    Ok(items)
}

/// The crumb endpoint answers with the bare token as plain text.
pub fn parse_crumb(body: &str) -> Option<String> {
    let crumb = body.trim();
    let valid = !crumb.is_empty()
        && crumb.len() <= 64
        && !crumb.contains(char::is_whitespace)
        && !crumb.contains('<')
        && !crumb.contains('{');
    valid.then(|| crumb.to_string())
}

// ── FRED ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FredEnvelope {
    #[serde(default)]
    observations: Vec<FredObservation>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FredObservation {
    date: String,
    value: String,
}

/// Parse `series/observations` JSON. FRED marks missing values with ".".
pub fn parse_fred_observations(json: &str) -> Result<Vec<MacroObservation>> {
    let env: FredEnvelope = serde_json::from_str(json)?;

    if let Some(msg) = env.error_message {
        bail!("FRED error: {}", msg);
    }

    let observations = env
        .observations
        .into_iter()
        .filter_map(|o| {
            let date = NaiveDate::parse_from_str(&o.date, "%Y-%m-%d").ok()?;
            let value: f64 = o.value.trim().parse().ok()?;
            value.is_finite().then_some(MacroObservation { date, value })
        })
        .collect();

    Ok(observations)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
