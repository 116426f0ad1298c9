use super::http_client::{HttpClient, HttpError};
use super::parsers::{parse_chart, parse_crumb, parse_news, parse_quote_summary, parse_rating_grades};
use super::{FundamentalsSource, NewsSource, PriceSource};
use crate::config::ProvidersConfig;
use crate::models::{FundamentalsSnapshot, NewsItem, PriceSeries};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

const SUMMARY_MODULES: &str =
    "assetProfile,summaryDetail,defaultKeyStatistics,financialData,price,upgradeDowngradeHistory";

/// Yahoo Finance chart, quoteSummary and search client.
pub struct YahooProvider {
    client: HttpClient,
    base_url: String,
    cookie_url: String,
    crumb: Mutex<Option<String>>,
}

impl YahooProvider {
    pub fn new(config: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            base_url: config.yahoo_base_url.trim_end_matches('/').to_string(),
            cookie_url: config.yahoo_cookie_url.clone(),
            crumb: Mutex::new(None),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid Yahoo base URL {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Yahoo base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// e.g. AAPL → /v8/finance/chart/AAPL?period1=..&period2=..&interval=1d
    fn chart_url(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Url> {
        let period1 = start.and_hms_opt(0, 0, 0).map(|d| d.and_utc().timestamp()).unwrap_or(0);
        // period2 is exclusive; ask through the end of the last day.
        let period2 = end
            .checked_add_days(Days::new(1))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc().timestamp())
            .unwrap_or_else(|| Utc::now().timestamp());

        let mut url = self.endpoint(&["v8", "finance", "chart", ticker])?;
        url.query_pairs_mut()
            .append_pair("period1", &period1.to_string())
            .append_pair("period2", &period2.to_string())
            .append_pair("interval", "1d")
            .append_pair("events", "div,split")
            .append_pair("includeAdjustedClose", "true");
        Ok(url)
    }

    fn summary_url(&self, ticker: &str, crumb: &str) -> Result<Url> {
        let mut url = self.endpoint(&["v10", "finance", "quoteSummary", ticker])?;
        url.query_pairs_mut()
            .append_pair("modules", SUMMARY_MODULES)
            .append_pair("crumb", crumb);
        Ok(url)
    }

    /// e.g. AAPL → /v1/finance/search?q=AAPL&quotesCount=0&newsCount=5
    fn news_url(&self, ticker: &str, limit: usize) -> Result<Url> {
        let mut url = self.endpoint(&["v1", "finance", "search"])?;
        url.query_pairs_mut()
            .append_pair("q", ticker)
            .append_pair("quotesCount", "0")
            .append_pair("newsCount", &limit.to_string());
        Ok(url)
    }

    /// Cookie + crumb handshake. The crumb is reused until Yahoo rejects it.
    async fn crumb(&self, refresh: bool) -> Result<String> {
        let mut guard = self.crumb.lock().await;
        if !refresh {
            if let Some(c) = guard.as_ref() {
                return Ok(c.clone());
            }
        }

        if let Err(e) = self.client.prime_cookies(&self.cookie_url).await {
            warn!("Cookie priming failed: {}", e);
        }

        let url = self.endpoint(&["v1", "test", "getcrumb"])?;
        let body = self
            .client
            .get_text(url.as_str())
            .await
            .context("Failed to fetch Yahoo crumb")?;
        let Some(crumb) = parse_crumb(&body) else {
            bail!("Yahoo returned an unusable crumb");
        };

        debug!("Obtained new Yahoo crumb");
        *guard = Some(crumb.clone());
        Ok(crumb)
    }

    async fn fetch_summary(&self, ticker: &str, refresh: bool) -> Result<String, anyhow::Error> {
        let crumb = self.crumb(refresh).await?;
        let url = self.summary_url(ticker, &crumb)?;
        self.client
            .get_text(url.as_str())
            .await
            .map_err(anyhow::Error::from)
    }
}

#[async_trait]
impl PriceSource for YahooProvider {
    fn name(&self) -> &str {
        "yahoo"
    }

    async fn fetch_prices(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceSeries> {
        let url = self.chart_url(ticker, start, end)?;
        info!("Fetching {} prices {} → {}", ticker, start, end);

        let body = match self.client.get_text(url.as_str()).await {
            Ok(body) => body,
            // Unknown symbols answer 404 with a chart error object in the body.
            Err(HttpError::Status(404)) => bail!("symbol not found"),
            Err(e) => return Err(e).with_context(|| format!("chart request for {}", ticker)),
        };

        let bars = parse_chart(&body).with_context(|| format!("chart payload for {}", ticker))?;
        debug!("{}: {} bars from Yahoo", ticker, bars.len());
        Ok(PriceSeries::new(ticker, self.name(), bars))
    }
}

#[async_trait]
impl FundamentalsSource for YahooProvider {
    async fn fetch_fundamentals(&self, ticker: &str) -> Result<FundamentalsSnapshot> {
        let body = match self.fetch_summary(ticker, false).await {
            Ok(body) => body,
            Err(e)
                if matches!(
                    e.downcast_ref::<HttpError>().and_then(HttpError::status),
                    Some(401 | 403)
                ) =>
            {
                debug!("Crumb rejected for {}, refreshing", ticker);
                self.fetch_summary(ticker, true).await?
            }
            Err(e) => return Err(e),
        };

        let values = parse_quote_summary(&body)
            .with_context(|| format!("quoteSummary payload for {}", ticker))?;
        let rating_grades = parse_rating_grades(&body).unwrap_or_else(|e| {
            debug!("{}: no usable rating history ({})", ticker, e);
            Vec::new()
        });

        Ok(FundamentalsSnapshot {
            ticker: ticker.to_string(),
            fetched_at: Some(Utc::now()),
            values,
            rating_grades,
        })
    }
}

#[async_trait]
impl NewsSource for YahooProvider {
    async fn fetch_news(&self, ticker: &str, limit: usize) -> Result<Vec<NewsItem>> {
        let url = self.news_url(ticker, limit)?;
        let body = self
            .client
            .get_text(url.as_str())
            .await
            .with_context(|| format!("news request for {}", ticker))?;
        let items = parse_news(&body, limit).with_context(|| format!("news payload for {}", ticker))?;
        debug!("{}: {} headlines from Yahoo", ticker, items.len());
        Ok(items)
    }
}
