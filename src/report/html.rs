//! String-built HTML for the report page.

use crate::models::{Granularity, ModelEvaluation, NewsItem, Outlook};
use crate::utils::{fmt_value, ValueFormat};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt::Write;

use super::analysis::{FaqItem, FundamentalsSection, ForecastRow, KeyMetrics, TechnicalSummary};
use super::charts::Chart;

const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";

const STYLE: &str = r#"
body { font-family: -apple-system, "Segoe UI", Roboto, sans-serif; background: #f4f6f9; color: #222; margin: 0; }
.report-container { max-width: 1100px; margin: 0 auto; padding: 1.5rem; }
.report-title { text-align: center; margin-bottom: 0.25rem; }
.report-meta { text-align: center; color: #666; font-size: 0.9rem; margin-bottom: 1.5rem; }
.section { background: #fff; border-radius: 8px; padding: 1.25rem 1.5rem; margin-bottom: 1.25rem; box-shadow: 0 1px 3px rgba(0,0,0,0.08); }
.metrics-grid { display: grid; grid-template-columns: repeat(auto-fit, minmax(180px, 1fr)); gap: 0.75rem; }
.metric { background: #f8f9fb; border-radius: 6px; padding: 0.75rem; }
.metric-label { font-size: 0.8rem; color: #666; }
.metric-value { font-size: 1.2rem; font-weight: 600; }
table { width: 100%; border-collapse: collapse; }
th, td { text-align: left; padding: 0.4rem 0.6rem; border-bottom: 1px solid #eee; }
.indicator-conclusion { margin-top: 0.75rem; color: #444; }
.sentiment-strong-bullish, .sentiment-bullish, .action-buy, .positive { color: #1e8e3e; }
.sentiment-strong-bearish, .sentiment-bearish, .action-short, .negative { color: #d93025; }
.sentiment-neutral, .action-hold { color: #b06000; }
.news-item { padding: 0.5rem 0; border-bottom: 1px solid #eee; }
.news-item h4 { margin: 0 0 0.25rem; }
.news-meta { font-size: 0.8rem; color: #777; margin-right: 1rem; }
details { border-bottom: 1px solid #eee; padding: 0.5rem 0; }
summary { cursor: pointer; font-weight: 600; }
.disclaimer { font-size: 0.8rem; color: #777; }
"#;

/// Everything the page shows, already computed.
pub struct ReportView<'a> {
    pub ticker: &'a str,
    pub generated_at: DateTime<Utc>,
    pub data_source: &'a str,
    pub model_name: &'a str,
    pub interval_width: f64,
    pub granularity: Granularity,
    pub metrics: &'a KeyMetrics,
    pub outlook: Outlook,
    pub risks: &'a [String],
    pub forecast_rows: &'a [ForecastRow],
    pub technical: &'a TechnicalSummary,
    pub rsi_conclusion: &'a str,
    pub macd_conclusion: &'a str,
    pub bollinger_conclusion: &'a str,
    pub fundamentals: &'a [FundamentalsSection],
    pub business_summary: Option<&'a str>,
    pub recommendation: Option<&'a str>,
    pub evaluation: Option<&'a ModelEvaluation>,
    /// (column name, origin label, latest value)
    pub macro_notes: &'a [(String, &'static str, Option<f64>)],
    pub news: &'a [NewsItem],
    pub faq: &'a [FaqItem],
    pub charts: &'a [Chart],
}

impl ReportView<'_> {
    fn chart(&self, id: &str) -> Option<&Chart> {
        self.charts.iter().find(|c| c.id == id)
    }
}

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// JSON safe to inline in a `<script>` element.
pub fn script_json(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}

fn money(v: Option<f64>) -> String {
    fmt_value(v, ValueFormat::Currency)
}

fn signed_class(v: f64) -> &'static str {
    if v > 0.0 {
        "positive"
    } else if v < 0.0 {
        "negative"
    } else {
        ""
    }
}

fn write_chart(out: &mut String, chart: Option<&Chart>) -> Result<()> {
    let Some(chart) = chart else {
        out.push_str("<p>Not enough history to draw this chart.</p>");
        return Ok(());
    };
    write!(
        out,
        r#"<div id="{id}" class="chart"></div>
<script>(function () {{ var fig = {figure}; Plotly.newPlot("{id}", fig.data, fig.layout, {{ responsive: true }}); }})();</script>"#,
        id = chart.id,
        figure = script_json(&chart.figure)?,
    )?;
    Ok(())
}

fn metric(out: &mut String, label: &str, value: &str, class: &str) -> Result<()> {
    write!(
        out,
        r#"<div class="metric"><div class="metric-label">{}</div><div class="metric-value {}">{}</div></div>"#,
        escape(label),
        class,
        escape(value)
    )?;
    Ok(())
}

fn write_summary(out: &mut String, v: &ReportView) -> Result<()> {
    let m = v.metrics;
    out.push_str(r#"<div class="section" id="summary"><h2>Key Metrics</h2><div class="metrics-grid">"#);
    metric(out, "Current Price", &money(Some(m.current_price)), "")?;
    metric(out, &format!("Next {} Forecast", v.granularity.label()), &money(m.first_forecast), "")?;
    metric(
        out,
        &format!("{}-{} Forecast", m.forecast_periods, v.granularity.label()),
        &money(m.final_forecast),
        "",
    )?;
    metric(
        out,
        "Forecast Change",
        &format!("{:+.2}%", m.forecast_change),
        signed_class(m.forecast_change),
    )?;
    metric(out, "Outlook", v.outlook.label(), v.outlook.css_class())?;
    metric(
        out,
        "Volatility (annualized)",
        &m.volatility.map(|x| format!("{:.1}%", x)).unwrap_or_else(|| "N/A".into()),
        "",
    )?;
    metric(
        out,
        "Green Days",
        &format!("{}/{}", m.green_days, m.total_days),
        "",
    )?;
    metric(out, "50-Day SMA", &money(m.sma_50), "")?;
    metric(out, "200-Day SMA", &money(m.sma_200), "")?;
    metric(
        out,
        "RSI (14)",
        &fmt_value(m.rsi, ValueFormat::Number),
        "",
    )?;
    out.push_str("</div></div>");
    Ok(())
}

fn write_forecast(out: &mut String, v: &ReportView) -> Result<()> {
    out.push_str(r#"<div class="section" id="forecast"><h2>Price Forecast</h2>"#);
    write_chart(out, v.chart("forecast-chart"))?;
    write!(
        out,
        "<h3>{} Forecast Table</h3><table><thead><tr><th>{}</th><th>Low</th><th>Average</th><th>High</th><th>Potential ROI</th><th>Action</th></tr></thead><tbody>",
        escape(v.ticker),
        v.granularity.label()
    )?;
    for row in v.forecast_rows {
        let roi = row
            .roi
            .map(|r| format!("{:+.2}%", r))
            .unwrap_or_else(|| "N/A".into());
        let (action, class) = match row.action {
            Some(a) => (a.label(), format!("action-{}", a.label().to_lowercase())),
            None => ("N/A", String::new()),
        };
        write!(
            out,
            r#"<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class="{}">{}</td><td class="{}">{}</td></tr>"#,
            escape(&row.summary.period),
            money(Some(row.summary.low)),
            money(Some(row.summary.average)),
            money(Some(row.summary.high)),
            row.roi.map(signed_class).unwrap_or(""),
            roi,
            class,
            action
        )?;
    }
    write!(
        out,
        r#"</tbody></table><p class="disclaimer">Model: {}. Bands show a {:.0}% prediction interval.</p></div>"#,
        escape(v.model_name),
        v.interval_width * 100.0
    )?;
    Ok(())
}

fn write_risks(out: &mut String, v: &ReportView) -> Result<()> {
    out.push_str(r#"<div class="section" id="risks"><h2>Risk Analysis</h2>"#);
    if v.risks.is_empty() {
        out.push_str("<p>No major risk factors identified from the technical and fundamental checks.</p>");
    } else {
        out.push_str("<ul>");
        for r in v.risks {
            write!(out, "<li>{}</li>", escape(r))?;
        }
        out.push_str("</ul>");
    }
    out.push_str("</div>");
    Ok(())
}

fn write_technical(out: &mut String, v: &ReportView) -> Result<()> {
    let t = v.technical;
    let price = v.metrics.current_price;
    write!(
        out,
        r#"<div class="section" id="technical"><h2>Technical Analysis Summary</h2><p>As of {}, {} closed at {} with a <span class="{}">{}</span> outlook.</p><table><tbody>"#,
        v.metrics.last_date,
        escape(v.ticker),
        money(Some(price)),
        v.outlook.css_class(),
        v.outlook.label()
    )?;
    for (window, value) in &t.smas {
        let position = match value {
            Some(s) if price > *s => "Price above",
            Some(s) if price < *s => "Price below",
            Some(_) => "Price at",
            None => "",
        };
        write!(
            out,
            "<tr><th>SMA {}</th><td>{}</td><td>{}</td></tr>",
            window,
            money(*value),
            position
        )?;
    }
    write!(
        out,
        "<tr><th>Volume vs SMA 20</th><td>{}</td><td>SMA 20: {}</td></tr>",
        t.volume_ratio
            .map(|r| format!("{:.2}x", r))
            .unwrap_or_else(|| "N/A".into()),
        fmt_value(t.volume_sma_20, ValueFormat::LargeNumber)
    )?;
    write!(
        out,
        "<tr><th>5-Day Volume Trend</th><td>{}</td><td></td></tr>",
        t.volume_trend.map(|x| x.label()).unwrap_or("N/A")
    )?;
    write!(
        out,
        "<tr><th>30-Day Support</th><td>{}</td><td></td></tr><tr><th>30-Day Resistance</th><td>{}</td><td></td></tr>",
        money(t.support_30),
        money(t.resistance_30)
    )?;
    out.push_str("</tbody></table></div>");
    Ok(())
}

fn write_indicator(out: &mut String, title: &str, charts: &[Option<&Chart>], conclusion: &str) -> Result<()> {
    write!(out, r#"<div class="section"><h2>{}</h2>"#, escape(title))?;
    for c in charts {
        write_chart(out, *c)?;
    }
    write!(out, r#"<div class="indicator-conclusion">{}</div></div>"#, escape(conclusion))?;
    Ok(())
}

fn write_evaluation(out: &mut String, eval: &ModelEvaluation) -> Result<()> {
    write!(
        out,
        r#"<div class="section" id="evaluation"><h2>Model Evaluation</h2><p>Hold-out of the last {} observations.</p><table><tbody>
<tr><th>MSE</th><td>{:.4}</td></tr><tr><th>MAE</th><td>{:.4}</td></tr><tr><th>RMSE</th><td>{:.4}</td></tr>
<tr><th>MAPE</th><td>{}</td></tr><tr><th>R²</th><td>{}</td></tr></tbody></table></div>"#,
        eval.holdout,
        eval.mse,
        eval.mae,
        eval.rmse,
        eval.mape.map(|m| format!("{:.2}%", m)).unwrap_or_else(|| "N/A".into()),
        eval.r2.map(|r| format!("{:.4}", r)).unwrap_or_else(|| "N/A".into()),
    )?;
    Ok(())
}

fn write_fundamentals(out: &mut String, v: &ReportView) -> Result<()> {
    for section in v.fundamentals {
        write!(out, r#"<div class="section"><h2>{}</h2><table><tbody>"#, escape(section.title))?;
        for row in &section.rows {
            let value = match &row.href {
                Some(href) => format!(
                    r#"<a href="{}" target="_blank" rel="noopener">{}</a>"#,
                    escape(href),
                    escape(&row.value)
                ),
                None => escape(&row.value),
            };
            write!(out, "<tr><th>{}</th><td>{}</td></tr>", escape(row.label), value)?;
        }
        out.push_str("</tbody></table>");
        if section.title == "Company Profile" {
            if let Some(summary) = v.business_summary {
                write!(out, "<p>{}</p>", escape(summary))?;
            }
        }
        out.push_str("</div>");
    }
    Ok(())
}

fn write_macro(out: &mut String, v: &ReportView) -> Result<()> {
    if v.macro_notes.is_empty() {
        return Ok(());
    }
    out.push_str(r#"<div class="section" id="macro"><h2>Macro Context</h2><table><tbody>"#);
    for (name, origin, latest) in v.macro_notes {
        write!(
            out,
            "<tr><th>{}</th><td>{}</td><td>{}</td></tr>",
            escape(name),
            fmt_value(*latest, ValueFormat::Number),
            origin
        )?;
    }
    out.push_str("</tbody></table></div>");
    Ok(())
}

fn is_web_link(link: &str) -> bool {
    link.starts_with("https://") || link.starts_with("http://")
}

fn write_news(out: &mut String, news: &[NewsItem]) -> Result<()> {
    out.push_str(r#"<div class="section" id="news"><h2>Recent News</h2>"#);
    if news.is_empty() {
        out.push_str("<p>No recent news headlines found.</p>");
    }
    for item in news {
        let title = escape(&item.title);
        let headline = match item.link.as_deref().filter(|l| is_web_link(l)) {
            Some(link) => format!(
                r#"<a href="{}" target="_blank" rel="noopener noreferrer">{}</a>"#,
                escape(link),
                title
            ),
            None => title,
        };
        write!(
            out,
            r#"<div class="news-item"><h4>{}</h4><span class="news-meta">Publisher: {}</span><span class="news-meta">Published: {}</span></div>"#,
            headline,
            escape(item.publisher.as_deref().unwrap_or("N/A")),
            item.published
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "N/A".into()),
        )?;
    }
    out.push_str("</div>");
    Ok(())
}

fn write_faq(out: &mut String, faq: &[FaqItem]) -> Result<()> {
    if faq.is_empty() {
        return Ok(());
    }
    out.push_str(r#"<div class="section" id="faq"><h2>Frequently Asked Questions</h2>"#);
    for item in faq {
        write!(
            out,
            "<details><summary>{}</summary><p>{}</p></details>",
            escape(&item.question),
            escape(&item.answer)
        )?;
    }
    out.push_str("</div>");
    Ok(())
}

fn write_conclusion(out: &mut String, v: &ReportView) -> Result<()> {
    let m = v.metrics;
    let direction = if m.forecast_change > 0.0 { "upside" } else { "downside" };
    write!(
        out,
        r#"<div class="section" id="conclusion"><h2>Overall Conclusion</h2><ul>
<li>Technical outlook for {ticker} is <strong class="{class}">{label}</strong>.</li>
<li>The model projects {change:+.1}% {direction} over the next {periods} {unit}s, to an average of {target}.</li>
<li>{risks} risk factor(s) identified.</li>"#,
        ticker = escape(v.ticker),
        class = v.outlook.css_class(),
        label = v.outlook.label(),
        change = m.forecast_change,
        direction = direction,
        periods = m.forecast_periods,
        unit = v.granularity.label().to_lowercase(),
        target = money(m.final_forecast),
        risks = v.risks.len(),
    )?;
    if let Some(rec) = v.recommendation {
        write!(out, "<li>Analyst consensus: <strong>{}</strong>.</li>", escape(rec))?;
    }
    out.push_str("</ul></div>");
    Ok(())
}

/// Render the whole page in memory.
pub fn render(v: &ReportView) -> Result<String> {
    let mut out = String::with_capacity(64 * 1024);
    write!(
        out,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{ticker} Stock Forecast &amp; Analysis</title>
<script src="{cdn}"></script>
<style>{style}</style>
</head>
<body><div class="report-container">
<h1 class="report-title">{ticker} Stock Forecast &amp; Analysis</h1>
<p class="report-meta">Generated {generated} · Data: {source}</p>
"#,
        ticker = escape(v.ticker),
        cdn = PLOTLY_CDN,
        style = STYLE,
        generated = v.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        source = escape(v.data_source),
    )?;

    write_summary(&mut out, v)?;
    write_forecast(&mut out, v)?;
    write_risks(&mut out, v)?;
    write_technical(&mut out, v)?;

    out.push_str(r#"<div class="section"><h2>Historical Price &amp; Volume</h2>"#);
    write_chart(&mut out, v.chart("historical-chart"))?;
    out.push_str("</div>");

    write_indicator(&mut out, "Bollinger Bands", &[v.chart("bollinger-chart")], v.bollinger_conclusion)?;
    write_indicator(&mut out, "Relative Strength Index", &[v.chart("rsi-chart")], v.rsi_conclusion)?;
    write_indicator(
        &mut out,
        "MACD",
        &[v.chart("macd-lines-chart"), v.chart("macd-hist-chart")],
        v.macd_conclusion,
    )?;

    if let Some(eval) = v.evaluation {
        write_evaluation(&mut out, eval)?;
    }
    write_fundamentals(&mut out, v)?;
    write_macro(&mut out, v)?;
    write_news(&mut out, v.news)?;
    write_conclusion(&mut out, v)?;
    write_faq(&mut out, v.faq)?;

    write!(
        out,
        r#"<div class="section disclaimer"><h2>Disclaimer</h2><p>This report is generated automatically from historical data and a statistical model. It is not investment advice. Forecasts are uncertain and past performance does not guarantee future results. Generated at {}.</p></div>
</div></body></html>
"#,
        v.generated_at.to_rfc3339()
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::analysis::{Action, VolumeTrend};
    use crate::models::PeriodSummary;
    use chrono::NaiveDate;
    use scraper::{Html, Selector};
    use serde_json::json;

    fn metrics() -> KeyMetrics {
        KeyMetrics {
            current_price: 100.0,
            last_date: NaiveDate::from_ymd_opt(2024, 6, 28).unwrap(),
            volatility: Some(22.5),
            green_days: 16,
            total_days: 29,
            sma_50: Some(98.0),
            sma_200: None,
            rsi: Some(55.0),
            first_forecast: Some(100.0),
            final_forecast: Some(104.0),
            forecast_change: 4.0,
            forecast_periods: 1,
        }
    }

    fn technical() -> TechnicalSummary {
        TechnicalSummary {
            smas: vec![(20, Some(99.0)), (50, Some(98.0)), (100, None), (200, None)],
            volume_sma_20: Some(1.5e6),
            volume_ratio: Some(1.2),
            volume_trend: Some(VolumeTrend::Increasing),
            support_30: Some(90.0),
            resistance_30: Some(110.0),
        }
    }

    fn render_with(ticker: &str, charts: &[Chart], risks: &[String]) -> String {
        render_full(ticker, charts, risks, &[], &[])
    }

    fn render_full(ticker: &str, charts: &[Chart], risks: &[String], news: &[NewsItem], faq: &[FaqItem]) -> String {
        let m = metrics();
        let t = technical();
        let rows = vec![ForecastRow {
            summary: PeriodSummary { period: "2024-07".into(), low: 95.0, average: 104.0, high: 110.0 },
            roi: Some(4.0),
            action: Some(Action::Buy),
        }];
        let view = ReportView {
            ticker,
            generated_at: Utc::now(),
            data_source: "yahoo",
            model_name: "test",
            interval_width: 0.8,
            granularity: Granularity::Monthly,
            metrics: &m,
            outlook: Outlook::Bullish,
            risks,
            forecast_rows: &rows,
            technical: &t,
            rsi_conclusion: "rsi text",
            macd_conclusion: "macd text",
            bollinger_conclusion: "bb text",
            fundamentals: &[],
            business_summary: None,
            recommendation: Some("Buy"),
            evaluation: None,
            macro_notes: &[],
            news,
            faq,
            charts,
        };
        render(&view).unwrap()
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn test_script_json_cannot_close_script() {
        let s = script_json(&json!({ "title": "</script><script>alert(1)</script>" })).unwrap();
        assert!(!s.contains("</script>"));
        let back: Value = serde_json::from_str(&s).unwrap();
        assert_eq!(back["title"], "</script><script>alert(1)</script>");
    }

    #[test]
    fn test_rendered_document_structure() {
        let chart = Chart {
            id: "forecast-chart",
            figure: json!({ "data": [], "layout": {} }),
        };
        let html = render_with("AAPL", &[chart], &["Price below the 50-Day SMA.".to_string()]);
        let doc = Html::parse_document(&html);

        let h1 = Selector::parse("h1.report-title").unwrap();
        let title: String = doc.select(&h1).next().unwrap().text().collect();
        assert_eq!(title, "AAPL Stock Forecast & Analysis");

        assert_eq!(doc.select(&Selector::parse("#forecast-chart").unwrap()).count(), 1);
        assert_eq!(doc.select(&Selector::parse("#risks li").unwrap()).count(), 1);

        let action = Selector::parse("#forecast td.action-buy").unwrap();
        assert_eq!(doc.select(&action).next().unwrap().text().collect::<String>(), "Buy");
        assert!(html.contains("Not enough history to draw this chart."));
    }

    #[test]
    fn test_user_text_is_escaped() {
        let html = render_with("<b>X</b>", &[], &["<script>bad()</script>".to_string()]);
        assert!(!html.contains("<b>X</b>"));
        assert!(!html.contains("<script>bad()"));
        assert!(html.contains("&lt;b&gt;X&lt;/b&gt;"));
    }

    #[test]
    fn test_news_section() {
        let html = render_with("AAPL", &[], &[]);
        let doc = Html::parse_document(&html);
        let empty: String = doc.select(&Selector::parse("#news p").unwrap()).next().unwrap().text().collect();
        assert_eq!(empty, "No recent news headlines found.");
        assert_eq!(doc.select(&Selector::parse("#faq").unwrap()).count(), 0);

        let news = vec![
            NewsItem {
                title: "Apple <beats> estimates".into(),
                publisher: Some("Reuters".into()),
                link: Some("https://example.com/a?x=1&y=2".into()),
                published: DateTime::from_timestamp(1_718_000_000, 0),
            },
            NewsItem {
                title: "Scripted".into(),
                publisher: None,
                link: Some("javascript:alert(1)".into()),
                published: None,
            },
        ];
        let html = render_full("AAPL", &[], &[], &news, &[]);
        let doc = Html::parse_document(&html);

        let links: Vec<_> = doc.select(&Selector::parse("#news .news-item h4 a").unwrap()).collect();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].value().attr("href"), Some("https://example.com/a?x=1&y=2"));
        assert_eq!(links[0].value().attr("rel"), Some("noopener noreferrer"));
        assert_eq!(links[0].text().collect::<String>(), "Apple <beats> estimates");
        assert!(!html.contains("javascript:"));
        assert!(html.contains("Published: 2024-06-10 06:13 UTC"));
        assert!(html.contains("Publisher: N/A"));
    }

    #[test]
    fn test_faq_section() {
        let faq = vec![FaqItem {
            question: "Will <AAPL> go up?".into(),
            answer: "Expected to go up (+4.0%).".into(),
        }];
        let html = render_full("AAPL", &[], &[], &[], &faq);
        let doc = Html::parse_document(&html);

        let summary = doc.select(&Selector::parse("#faq details summary").unwrap()).next().unwrap();
        assert_eq!(summary.text().collect::<String>(), "Will <AAPL> go up?");
        let answer = doc.select(&Selector::parse("#faq details p").unwrap()).next().unwrap();
        assert_eq!(answer.text().collect::<String>(), "Expected to go up (+4.0%).");
        assert!(html.find(r#"id="conclusion""#).unwrap() < html.find(r#"id="faq""#).unwrap());
    }
}
