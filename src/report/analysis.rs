//! Rule-based reading of the dataset and forecast: key metrics, outlook,
//! risk items, indicator conclusions, fundamentals tables and the FAQ.

use crate::features::indicators::{rsi, sma};
use crate::features::{RSI_WINDOW, SMA_LONG, SMA_MEDIUM, SMA_TREND};
use crate::forecast::aggregate::Aggregation;
use crate::models::{FundamentalsSnapshot, MergedDataset, Outlook, PeriodSummary};
use crate::utils::{fmt_value, ValueFormat};
use chrono::NaiveDate;

const TRADING_DAYS: f64 = 252.0;
const METRICS_WINDOW: usize = 30;
const MAX_TABLE_PERIODS: usize = 12;

// ── Key metrics ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct KeyMetrics {
    pub current_price: f64,
    pub last_date: NaiveDate,
    /// Annualized, in percent.
    pub volatility: Option<f64>,
    pub green_days: usize,
    pub total_days: usize,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub rsi: Option<f64>,
    pub first_forecast: Option<f64>,
    pub final_forecast: Option<f64>,
    /// Percent change from the current price to the last table period.
    pub forecast_change: f64,
    pub forecast_periods: usize,
}

fn last_defined(values: Vec<Option<f64>>) -> Option<f64> {
    values.last().copied().flatten()
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt())
}

pub fn key_metrics(dataset: &MergedDataset, aggregation: &Aggregation) -> Option<KeyMetrics> {
    let last = dataset.last()?;
    let closes = dataset.closes();

    let window = if closes.len() > METRICS_WINDOW {
        &closes[closes.len() - METRICS_WINDOW..]
    } else {
        &closes[..]
    };
    let returns: Vec<f64> = window
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    let volatility = sample_std(&returns).map(|s| s * TRADING_DAYS.sqrt() * 100.0);
    let green_days = window.windows(2).filter(|w| w[1] > w[0]).count();

    let table = &aggregation.forecast[..aggregation.forecast.len().min(MAX_TABLE_PERIODS)];
    let final_forecast = table.last().map(|p| p.average);
    let forecast_change = match final_forecast {
        Some(f) if last.close != 0.0 => (f - last.close) / last.close * 100.0,
        _ => 0.0,
    };

    Some(KeyMetrics {
        current_price: last.close,
        last_date: last.date,
        volatility,
        green_days,
        total_days: window.len().saturating_sub(1),
        sma_50: last_defined(sma(&closes, SMA_LONG)),
        sma_200: last_defined(sma(&closes, SMA_TREND)),
        rsi: last_defined(rsi(&closes, RSI_WINDOW)),
        first_forecast: aggregation.forecast.first().map(|p| p.average),
        final_forecast,
        forecast_change,
        forecast_periods: table.len(),
    })
}

// ── Outlook ───────────────────────────────────────────────────────────────────

/// Volatility (annualized %) at which the slope thresholds start to widen.
const VOLATILITY_BASE: f64 = 20.0;

/// Score the forecast slope, trend and momentum. Slope thresholds widen with
/// volatility so that a move inside a noisy stock's usual range scores lower.
pub fn outlook_score(m: &KeyMetrics) -> f64 {
    let scale = m
        .volatility
        .map(|v| (v / VOLATILITY_BASE).max(1.0))
        .unwrap_or(1.0);
    let change = m.forecast_change;

    let mut score = if change > 5.0 * scale {
        1.5
    } else if change > scale {
        0.5
    } else if change < -5.0 * scale {
        -1.5
    } else if change < -scale {
        -0.5
    } else {
        0.0
    };

    let price = m.current_price;
    if let Some(s50) = m.sma_50 {
        if price > s50 {
            score += 0.5;
        } else if price < s50 {
            score -= 0.5;
        }
    }
    if let Some(s200) = m.sma_200 {
        if price > s200 {
            score += 1.0;
        } else if price < s200 {
            score -= 1.0;
        }
    }
    if let (Some(s50), Some(s200)) = (m.sma_50, m.sma_200) {
        if s50 > s200 {
            score += 0.5;
        } else if s50 < s200 {
            score -= 0.5;
        }
    }
    match m.rsi {
        Some(r) if r > 65.0 => score += 0.5,
        Some(r) if r < 35.0 => score -= 0.5,
        _ => {}
    }
    score
}

pub fn outlook(m: &KeyMetrics) -> Outlook {
    let score = outlook_score(m);
    if score >= 2.5 {
        Outlook::StrongBullish
    } else if score >= 1.0 {
        Outlook::Bullish
    } else if score <= -2.5 {
        Outlook::StrongBearish
    } else if score <= -1.0 {
        Outlook::Bearish
    } else {
        Outlook::Neutral
    }
}

// ── Risks ─────────────────────────────────────────────────────────────────────

pub fn risk_items(
    m: &KeyMetrics,
    outlook: Outlook,
    granularity_label: &str,
    fundamentals: &FundamentalsSnapshot,
) -> Vec<String> {
    let mut items = Vec::new();

    if outlook.is_bearish() {
        items.push(format!("Overall technical outlook is {}.", outlook.label()));
    }
    if let Some(v) = m.volatility.filter(|v| *v > 40.0) {
        items.push(format!(
            "High annualized volatility ({:.1}%) suggests potentially large price swings.",
            v
        ));
    }
    if m.sma_50.is_some_and(|s| m.current_price < s) {
        items.push("Price below the 50-Day SMA (short-term weakness).".to_string());
    }
    if m.sma_200.is_some_and(|s| m.current_price < s) {
        items.push("Price below the 200-Day SMA (long-term weakness).".to_string());
    }
    if m.forecast_change < -5.0 {
        items.push(format!(
            "Negative {}-{} forecast trend ({:+.1}%).",
            m.forecast_periods, granularity_label, m.forecast_change
        ));
    }
    match m.rsi {
        Some(r) if r > 70.0 => items.push(format!(
            "RSI ({:.1}) is high (>70), potential overbought condition.",
            r
        )),
        Some(r) if r < 30.0 => items.push(format!(
            "RSI ({:.1}) is low (<30), potential oversold condition.",
            r
        )),
        _ => {}
    }
    if let Some(pe) = fundamentals.number("trailingPE") {
        if pe > 50.0 {
            items.push(format!("High Trailing P/E ratio ({:.2}x).", pe));
        } else if pe <= 0.0 {
            items.push(format!("Negative/Zero Trailing P/E ratio ({:.2}x).", pe));
        }
    }
    // Yahoo reports debt/equity in percent.
    if let Some(de) = fundamentals.number("debtToEquity").filter(|de| *de > 150.0) {
        items.push(format!("High Debt-to-Equity ratio ({:.2}%).", de));
    }

    items
}

// ── Indicator conclusions ─────────────────────────────────────────────────────

pub fn rsi_conclusion(rsi: Option<f64>) -> String {
    match rsi {
        None => "RSI data not available.".to_string(),
        Some(r) if r > 70.0 => format!(
            "RSI ({:.1}) is above 70, suggesting potential overbought conditions. \
             This could indicate a higher chance of a price pullback or consolidation.",
            r
        ),
        Some(r) if r < 30.0 => format!(
            "RSI ({:.1}) is below 30, suggesting potential oversold conditions. \
             This could indicate a higher chance of a price rebound.",
            r
        ),
        Some(r) => format!(
            "RSI ({:.1}) is in the neutral zone (30-70), not indicating extreme conditions.",
            r
        ),
    }
}

/// Latest two rows with a defined MACD histogram drive the crossover check.
pub fn macd_conclusion(dataset: &MergedDataset) -> String {
    let defined: Vec<(f64, f64, f64)> = dataset
        .rows
        .iter()
        .filter_map(|r| {
            let ind = r.indicators.as_ref()?;
            Some((ind.macd?, ind.macd_signal?, ind.macd_hist?))
        })
        .collect();
    let [.., (_, _, hist_prev), (line, signal, hist)] = defined[..] else {
        return "MACD conclusion requires more data.".to_string();
    };

    let mut parts = Vec::new();
    if hist > 0.0 && hist_prev < 0.0 {
        parts.push(
            "A bullish MACD crossover (histogram crossing above zero) may have recently occurred, \
             suggesting potential upward momentum."
                .to_string(),
        );
    } else if hist < 0.0 && hist_prev > 0.0 {
        parts.push(
            "A bearish MACD crossover (histogram crossing below zero) may have recently occurred, \
             suggesting potential downward momentum."
                .to_string(),
        );
    }
    if line > signal {
        parts.push(format!(
            "Currently, the MACD line ({:.2}) is above the signal line ({:.2}), generally considered a bullish signal.",
            line, signal
        ));
    } else {
        parts.push(format!(
            "Currently, the MACD line ({:.2}) is below the signal line ({:.2}), generally considered a bearish signal.",
            line, signal
        ));
    }
    if hist > 0.0 {
        parts.push(format!(
            "The positive histogram ({:.2}) indicates strengthening bullish momentum (or weakening bearish momentum).",
            hist
        ));
    } else {
        parts.push(format!(
            "The negative histogram ({:.2}) indicates strengthening bearish momentum (or weakening bullish momentum).",
            hist
        ));
    }
    parts.join(" ")
}

pub fn bollinger_conclusion(dataset: &MergedDataset) -> String {
    let latest = dataset.rows.iter().rev().find_map(|r| {
        let ind = r.indicators.as_ref()?;
        Some((r.close, ind.bb_upper?, ind.bb_middle?, ind.bb_lower?))
    });
    let Some((close, upper, middle, lower)) = latest else {
        return "Bollinger Band data not available.".to_string();
    };

    if close > upper {
        format!(
            "The price (${:.2}) is currently above the upper Bollinger Band (${:.2}), which can sometimes \
             indicate an overbought condition or a strong breakout. Caution is advised as prices may revert \
             towards the middle band (${:.2}).",
            close, upper, middle
        )
    } else if close < lower {
        format!(
            "The price (${:.2}) is currently below the lower Bollinger Band (${:.2}), which can sometimes \
             indicate an oversold condition or a strong breakdown. Prices may revert towards the middle \
             band (${:.2}).",
            close, lower, middle
        )
    } else {
        format!(
            "The price (${:.2}) is currently within the Bollinger Bands (Lower: ${:.2}, Upper: ${:.2}), \
             suggesting the price is trading within its typical volatility range relative to the 20-day \
             average (${:.2}).",
            close, lower, upper, middle
        )
    }
}

// ── Technical summary ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeTrend {
    Increasing,
    Decreasing,
    Mixed,
}

impl VolumeTrend {
    pub fn label(&self) -> &'static str {
        match self {
            VolumeTrend::Increasing => "Increasing",
            VolumeTrend::Decreasing => "Decreasing",
            VolumeTrend::Mixed => "Mixed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TechnicalSummary {
    /// (window, latest value) for SMA 20/50/100/200.
    pub smas: Vec<(usize, Option<f64>)>,
    pub volume_sma_20: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub volume_trend: Option<VolumeTrend>,
    pub support_30: Option<f64>,
    pub resistance_30: Option<f64>,
}

impl TechnicalSummary {
    pub fn sma(&self, window: usize) -> Option<f64> {
        self.smas
            .iter()
            .find(|(w, _)| *w == window)
            .and_then(|(_, v)| *v)
    }
}

pub fn technical_summary(dataset: &MergedDataset) -> TechnicalSummary {
    let closes = dataset.closes();
    let volumes: Vec<f64> = dataset.rows.iter().map(|r| r.volume).collect();
    let n = closes.len();

    let smas = [SMA_MEDIUM, SMA_LONG, 100, SMA_TREND]
        .into_iter()
        .map(|w| (w, last_defined(sma(&closes, w))))
        .collect();

    let volume_sma_20 = last_defined(sma(&volumes, SMA_MEDIUM));
    let volume_ratio = match (volumes.last(), volume_sma_20) {
        (Some(v), Some(avg)) if avg > 0.0 => Some(v / avg),
        _ => None,
    };

    let volume_trend = (n >= 6).then(|| {
        let latest = volumes[n - 1];
        let mean5 = volumes[n - 5..].iter().sum::<f64>() / 5.0;
        if latest > mean5 * 1.1 {
            VolumeTrend::Increasing
        } else if latest < mean5 * 0.9 {
            VolumeTrend::Decreasing
        } else {
            VolumeTrend::Mixed
        }
    });

    let (support_30, resistance_30) = if n >= METRICS_WINDOW {
        let recent = &dataset.rows[n - METRICS_WINDOW..];
        (
            Some(recent.iter().map(|r| r.low).fold(f64::INFINITY, f64::min)),
            Some(recent.iter().map(|r| r.high).fold(f64::NEG_INFINITY, f64::max)),
        )
    } else {
        (None, None)
    };

    TechnicalSummary {
        smas,
        volume_sma_20,
        volume_ratio,
        volume_trend,
        support_30,
        resistance_30,
    }
}

// ── Forecast table ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Buy,
    Hold,
    Short,
}

impl Action {
    pub fn from_roi(roi: f64) -> Self {
        if roi > 2.0 {
            Action::Buy
        } else if roi < -2.0 {
            Action::Short
        } else {
            Action::Hold
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Action::Buy => "Buy",
            Action::Hold => "Hold",
            Action::Short => "Short",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRow {
    pub summary: PeriodSummary,
    /// Percent versus the current price; `None` when the price is zero.
    pub roi: Option<f64>,
    pub action: Option<Action>,
}

pub fn forecast_table(aggregation: &Aggregation, current_price: f64) -> Vec<ForecastRow> {
    aggregation
        .forecast
        .iter()
        .take(MAX_TABLE_PERIODS)
        .map(|p| {
            let roi = (current_price != 0.0).then(|| (p.average - current_price) / current_price * 100.0);
            ForecastRow {
                summary: p.clone(),
                roi,
                action: roi.map(Action::from_roi),
            }
        })
        .collect()
}

// ── Fundamentals ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Field {
    Text,
    Value(ValueFormat),
    /// Already in percent units.
    PlainPercent,
    Recommendation,
    Website,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FundamentalsRow {
    pub label: &'static str,
    pub value: String,
    /// Set for links, rendered as an anchor.
    pub href: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FundamentalsSection {
    pub title: &'static str,
    pub rows: Vec<FundamentalsRow>,
}

const PROFILE: &[(&str, &str, Field)] = &[
    ("Company Name", "longName", Field::Text),
    ("Sector", "sector", Field::Text),
    ("Industry", "industry", Field::Text),
    ("Website", "website", Field::Website),
    ("Market Cap", "marketCap", Field::Value(ValueFormat::LargeNumber)),
    ("Employees", "fullTimeEmployees", Field::Value(ValueFormat::Integer)),
];

const VALUATION: &[(&str, &str, Field)] = &[
    ("Trailing P/E", "trailingPE", Field::Value(ValueFormat::Ratio)),
    ("Forward P/E", "forwardPE", Field::Value(ValueFormat::Ratio)),
    ("Price/Sales (TTM)", "priceToSalesTrailing12Months", Field::Value(ValueFormat::Ratio)),
    ("Price/Book", "priceToBook", Field::Value(ValueFormat::Ratio)),
    ("PEG Ratio", "pegRatio", Field::Value(ValueFormat::Ratio)),
    ("EV/Revenue", "enterpriseToRevenue", Field::Value(ValueFormat::Ratio)),
    ("EV/EBITDA", "enterpriseToEbitda", Field::Value(ValueFormat::Ratio)),
];

const FINANCIAL_HEALTH: &[(&str, &str, Field)] = &[
    ("Return on Equity", "returnOnEquity", Field::Value(ValueFormat::Percent)),
    ("Return on Assets", "returnOnAssets", Field::Value(ValueFormat::Percent)),
    ("Debt/Equity", "debtToEquity", Field::PlainPercent),
    ("Current Ratio", "currentRatio", Field::Value(ValueFormat::Ratio)),
    ("Quick Ratio", "quickRatio", Field::Value(ValueFormat::Ratio)),
    ("Total Cash", "totalCash", Field::Value(ValueFormat::LargeNumber)),
    ("Total Debt", "totalDebt", Field::Value(ValueFormat::LargeNumber)),
    ("Operating Cash Flow", "operatingCashflow", Field::Value(ValueFormat::LargeNumber)),
    ("Free Cash Flow", "freeCashflow", Field::Value(ValueFormat::LargeNumber)),
];

const PROFITABILITY: &[(&str, &str, Field)] = &[
    ("Profit Margin", "profitMargins", Field::Value(ValueFormat::Percent)),
    ("Operating Margin", "operatingMargins", Field::Value(ValueFormat::Percent)),
    ("Gross Margin", "grossMargins", Field::Value(ValueFormat::Percent)),
    ("EBITDA Margin", "ebitdaMargins", Field::Value(ValueFormat::Percent)),
    ("Revenue Growth (YoY)", "revenueGrowth", Field::Value(ValueFormat::Percent)),
    ("Earnings Growth (YoY)", "earningsGrowth", Field::Value(ValueFormat::Percent)),
];

const DIVIDENDS: &[(&str, &str, Field)] = &[
    ("Dividend Rate", "dividendRate", Field::Value(ValueFormat::Currency)),
    ("Dividend Yield", "dividendYield", Field::Value(ValueFormat::Percent)),
    ("Trailing Annual Dividend Rate", "trailingAnnualDividendRate", Field::Value(ValueFormat::Currency)),
    ("Trailing Annual Dividend Yield", "trailingAnnualDividendYield", Field::Value(ValueFormat::Percent)),
    ("5 Year Average Dividend Yield", "fiveYearAvgDividendYield", Field::PlainPercent),
    ("Payout Ratio", "payoutRatio", Field::Value(ValueFormat::Percent)),
    ("Ex-Dividend Date", "exDividendDate", Field::Value(ValueFormat::EpochDate)),
    ("Last Split Factor", "lastSplitFactor", Field::Text),
    ("Last Split Date", "lastSplitDate", Field::Value(ValueFormat::EpochDate)),
];

const ANALYST: &[(&str, &str, Field)] = &[
    ("Recommendation", "recommendationKey", Field::Recommendation),
    ("Mean Target Price", "targetMeanPrice", Field::Value(ValueFormat::Currency)),
    ("High Target Price", "targetHighPrice", Field::Value(ValueFormat::Currency)),
    ("Low Target Price", "targetLowPrice", Field::Value(ValueFormat::Currency)),
    ("Number of Analyst Opinions", "numberOfAnalystOpinions", Field::Value(ValueFormat::Integer)),
];

/// "strong_buy" → "Strong Buy"
fn title_case(key: &str) -> String {
    key.split(['_', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn field_row(f: &FundamentalsSnapshot, label: &'static str, key: &str, field: Field) -> FundamentalsRow {
    let na = || "N/A".to_string();
    let text = || f.text(key).map(str::to_string);
    let (value, href) = match field {
        Field::Text => (text().unwrap_or_else(na), None),
        Field::Value(fmt) => (fmt_value(f.number(key), fmt), None),
        Field::PlainPercent => (
            f.number(key).map(|v| format!("{:.2}%", v)).unwrap_or_else(na),
            None,
        ),
        Field::Recommendation => (recommendation(f).unwrap_or_else(na), None),
        Field::Website => {
            let url = text().filter(|u| u.starts_with("http://") || u.starts_with("https://"));
            match url {
                Some(u) => (u.clone(), Some(u)),
                None => (text().unwrap_or_else(na), None),
            }
        }
    };
    FundamentalsRow { label, value, href }
}

fn section(f: &FundamentalsSnapshot, title: &'static str, fields: &[(&'static str, &str, Field)]) -> FundamentalsSection {
    FundamentalsSection {
        title,
        rows: fields
            .iter()
            .map(|&(label, key, field)| field_row(f, label, key, field))
            .collect(),
    }
}

pub fn fundamentals_sections(f: &FundamentalsSnapshot) -> Vec<FundamentalsSection> {
    vec![
        section(f, "Company Profile", PROFILE),
        section(f, "Valuation Metrics", VALUATION),
        section(f, "Financial Health", FINANCIAL_HEALTH),
        section(f, "Profitability & Growth", PROFITABILITY),
        section(f, "Dividends & Splits", DIVIDENDS),
        section(f, "Analyst Ratings & Targets", ANALYST),
    ]
}

pub fn business_summary(f: &FundamentalsSnapshot) -> Option<&str> {
    f.text("longBusinessSummary")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rating {
    Buy,
    Hold,
    Sell,
}

const BUY_GRADES: &[&str] = &["strong buy", "outperform", "overweight", "buy"];
const HOLD_GRADES: &[&str] = &[
    "hold",
    "neutral",
    "peer perform",
    "market perform",
    "sector perform",
    "equal-weight",
    "equal weight",
];
const SELL_GRADES: &[&str] = &["strong sell", "underperform", "underweight", "sell"];

fn classify_grade(grade: &str) -> Option<Rating> {
    let grade = grade.to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| grade.contains(w));
    if any(BUY_GRADES) {
        Some(Rating::Buy)
    } else if any(HOLD_GRADES) {
        Some(Rating::Hold)
    } else if any(SELL_GRADES) {
        Some(Rating::Sell)
    } else {
        None
    }
}

/// Majority call over analyst grades, e.g. "Buy (12 Ratings)". A side wins
/// only with more votes than the other two combined; otherwise it is a hold.
pub fn rating_summary(grades: &[String]) -> Option<String> {
    let (mut buy, mut hold, mut sell) = (0usize, 0usize, 0usize);
    for rating in grades.iter().filter_map(|g| classify_grade(g)) {
        match rating {
            Rating::Buy => buy += 1,
            Rating::Hold => hold += 1,
            Rating::Sell => sell += 1,
        }
    }
    let total = buy + hold + sell;
    if total == 0 {
        return None;
    }
    let call = if buy > hold + sell {
        "Buy"
    } else if sell > hold + buy {
        "Sell"
    } else {
        "Hold"
    };
    Some(format!("{} ({} Ratings)", call, total))
}

/// Grade-based summary when rating history exists, else Yahoo's
/// `recommendationKey`.
pub fn recommendation(f: &FundamentalsSnapshot) -> Option<String> {
    rating_summary(&f.rating_grades).or_else(|| f.text("recommendationKey").map(title_case))
}

// ── FAQ ───────────────────────────────────────────────────────────────────────

/// Plain-text question and answer; escaped at render time.
#[derive(Debug, Clone, PartialEq)]
pub struct FaqItem {
    pub question: String,
    pub answer: String,
}

fn volatility_level(v: f64) -> &'static str {
    if v > 50.0 {
        "very high"
    } else if v > 30.0 {
        "high"
    } else if v > 15.0 {
        "moderate"
    } else {
        "low"
    }
}

fn pe_reading(pe: f64) -> &'static str {
    if pe <= 0.0 {
        "negative, which usually means the company is currently not profitable"
    } else if pe > 50.0 {
        "quite high, suggesting the market expects strong future growth or the stock is expensive"
    } else if pe > 25.0 {
        "moderately high, a premium valuation compared with the broad market"
    } else if pe < 15.0 {
        "relatively low, which may point to an undervalued stock or low growth expectations"
    } else {
        "relatively average compared with the broad market"
    }
}

/// Common investor questions answered from the computed metrics.
pub fn faq(
    ticker: &str,
    m: &KeyMetrics,
    outlook: Outlook,
    unit: &str,
    risk_count: usize,
    f: &FundamentalsSnapshot,
) -> Vec<FaqItem> {
    let item = |question: String, answer: String| FaqItem { question, answer };
    let money = |v: Option<f64>| fmt_value(v, ValueFormat::Currency);
    let mut items = Vec::with_capacity(6);

    items.push(item(
        format!("What is the {} stock price forecast?", ticker),
        format!(
            "The model projects an average price of about {} for {} by the end of the {}-{} forecast period, \
             a {:+.1}% change from the current price of {}. Forecasts carry substantial uncertainty.",
            money(m.final_forecast),
            ticker,
            m.forecast_periods,
            unit.to_lowercase(),
            m.forecast_change,
            money(Some(m.current_price)),
        ),
    ));

    let direction = if m.forecast_change > 1.0 {
        "go up"
    } else if m.forecast_change < -1.0 {
        "go down"
    } else {
        "stay relatively flat"
    };
    items.push(item(
        format!("Will {} stock go up or down?", ticker),
        format!(
            "Based on the forecast, {} is expected to {} over the forecast period ({:+.1}%). \
             Market conditions can change quickly.",
            ticker, direction, m.forecast_change
        ),
    ));

    let lean = match outlook {
        Outlook::StrongBullish | Outlook::Bullish => "positive",
        Outlook::Neutral => "neutral",
        Outlook::Bearish | Outlook::StrongBearish => "negative",
    };
    items.push(item(
        format!("Is {} a good stock to buy now?", ticker),
        format!(
            "The technical outlook is {} with a {} leaning, and the analysis flags {} risk factor(s). \
             This report is not investment advice; weigh your own goals and risk tolerance.",
            outlook.label(),
            lean,
            risk_count
        ),
    ));

    if let Some(vol) = m.volatility {
        items.push(item(
            format!("How volatile is {} stock?", ticker),
            format!(
                "The annualized volatility over the last 30 days is {:.1}%, which is considered {}.",
                vol,
                volatility_level(vol)
            ),
        ));
    }

    if let Some(pe) = f.number("trailingPE") {
        items.push(item(
            format!("Is {} considered expensive based on P/E ratio?", ticker),
            format!("The trailing P/E ratio is {:.2}, which is {}.", pe, pe_reading(pe)),
        ));
    }

    if let Some(rec) = recommendation(f) {
        let analysts = fmt_value(f.number("numberOfAnalystOpinions"), ValueFormat::Integer);
        items.push(item(
            format!("What do Wall Street analysts think of {}?", ticker),
            format!(
                "The analyst consensus is {} across {} covering analysts, with a mean price target of {}.",
                rec,
                analysts,
                money(f.number("targetMeanPrice"))
            ),
        ));
    }

    items
}
