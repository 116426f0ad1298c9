pub mod cleaner;
pub mod fred;
pub mod http_client;
pub mod parsers;
pub mod yahoo;

use crate::config::{AppConfig, MacroSeriesConfig, PriceSourceKind};
use crate::error::{ReportError, ReportResult};
use crate::loader::CsvPriceSource;
use crate::models::{FundamentalsSnapshot, MacroOrigin, MacroSeries, NewsItem, PriceSeries};
use crate::storage::{Repository, macro_key, price_key};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info, warn};

use self::fred::{FredProvider, fallback_series};
use self::yahoo::YahooProvider;

// ── Source traits ─────────────────────────────────────────────────────────────

/// Swappable daily price history source.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    /// Whether results should go through the fetch cache.
    fn cacheable(&self) -> bool {
        true
    }

    async fn fetch_prices(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceSeries>;
}

#[async_trait]
pub trait FundamentalsSource: Send + Sync {
    async fn fetch_fundamentals(&self, ticker: &str) -> Result<FundamentalsSnapshot>;
}

#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Most recent headlines, at most `limit`.
    async fn fetch_news(&self, ticker: &str, limit: usize) -> Result<Vec<NewsItem>>;
}

#[async_trait]
pub trait MacroSource: Send + Sync {
    async fn fetch_series(
        &self,
        series: &MacroSeriesConfig,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<MacroSeries>;
}

// ── Fetcher ───────────────────────────────────────────────────────────────────

pub const NEWS_LIMIT: usize = 5;

/// Everything one report needs from the outside world.
#[derive(Debug, Clone)]
pub struct FetchedData {
    pub prices: PriceSeries,
    pub fundamentals: FundamentalsSnapshot,
    pub macros: Vec<MacroSeries>,
    pub news: Vec<NewsItem>,
}

pub struct DataFetcher {
    prices: Arc<dyn PriceSource>,
    fundamentals: Option<Arc<dyn FundamentalsSource>>,
    news: Option<Arc<dyn NewsSource>>,
    macro_source: Option<Arc<dyn MacroSource>>,
    macro_series: Vec<MacroSeriesConfig>,
    cache: Option<Arc<Repository>>,
    ttl_hours: i64,
}

impl DataFetcher {
    pub fn new(
        prices: Arc<dyn PriceSource>,
        fundamentals: Option<Arc<dyn FundamentalsSource>>,
        macro_source: Option<Arc<dyn MacroSource>>,
        macro_series: Vec<MacroSeriesConfig>,
    ) -> Self {
        Self {
            prices,
            fundamentals,
            news: None,
            macro_source,
            macro_series,
            cache: None,
            ttl_hours: 0,
        }
    }

    pub fn with_news(mut self, news: Arc<dyn NewsSource>) -> Self {
        self.news = Some(news);
        self
    }

    pub fn with_cache(mut self, cache: Arc<Repository>, ttl_hours: i64) -> Self {
        self.cache = Some(cache);
        self.ttl_hours = ttl_hours;
        self
    }

    /// Wire the configured providers. Without a FRED key the macro side
    /// runs in fallback mode.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let providers = &config.providers;

        let (prices, fundamentals, news) = match providers.price_source {
            PriceSourceKind::Yahoo => {
                let yahoo = Arc::new(
                    YahooProvider::new(providers).context("Failed to build Yahoo provider")?,
                );
                let prices: Arc<dyn PriceSource> = yahoo.clone();
                let fundamentals: Arc<dyn FundamentalsSource> = yahoo.clone();
                let news: Arc<dyn NewsSource> = yahoo;
                (prices, Some(fundamentals), Some(news))
            }
            PriceSourceKind::Csv => {
                // Offline mode: no fundamentals or news without the network.
                let prices: Arc<dyn PriceSource> = Arc::new(CsvPriceSource::new(&providers.csv_dir));
                (prices, None, None)
            }
        };

        let macro_source = match &providers.fred_api_key {
            Some(key) => {
                let fred: Arc<dyn MacroSource> = Arc::new(
                    FredProvider::new(providers, key).context("Failed to build FRED provider")?,
                );
                Some(fred)
            }
            None => {
                warn!("FRED_API_KEY not set; macro indicators will use fallback data");
                None
            }
        };

        let fetcher = Self::new(prices, fundamentals, macro_source, config.macro_series.clone());
        Ok(match news {
            Some(news) => fetcher.with_news(news),
            None => fetcher,
        })
    }

    /// Fetch prices, fundamentals, news and macro series concurrently.
    ///
    /// Only the price side can fail the request. Fundamentals degrade to an
    /// empty snapshot, news to no headlines, macro series to their fallback
    /// curves.
    pub async fn fetch(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ReportResult<FetchedData> {
        let (prices, fundamentals, news, macros) = tokio::join!(
            self.fetch_prices(ticker, start, end),
            self.fetch_fundamentals(ticker),
            self.fetch_news(ticker),
            self.fetch_macros(start, end),
        );

        let prices = prices?;
        info!(
            "{}: {} bars from {}, {} fundamentals fields, {} headlines, {} macro series",
            ticker,
            prices.len(),
            prices.source(),
            fundamentals.values.len(),
            news.len(),
            macros.len()
        );

        Ok(FetchedData {
            prices,
            fundamentals,
            macros,
            news,
        })
    }

    async fn fetch_prices(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ReportResult<PriceSeries> {
        let cache = self.cache.as_ref().filter(|_| self.prices.cacheable());
        let key = price_key(ticker);

        if let Some(repo) = cache {
            let (k, t, ttl) = (key.clone(), ticker.to_string(), self.ttl_hours);
            let cached = on_cache(repo, move |repo| {
                if !repo.is_fresh(&k, start, ttl)? {
                    return Ok(Vec::new());
                }
                repo.load_price_bars(&t, start, end)
            })
            .await;
            match cached {
                Ok(bars) if !bars.is_empty() => {
                    debug!("{}: serving {} bars from cache", ticker, bars.len());
                    let source = format!("{} (cached)", self.prices.name());
                    return Ok(PriceSeries::new(ticker, source, bars));
                }
                Ok(_) => {}
                Err(e) => warn!("Price cache lookup failed for {}: {:#}", ticker, e),
            }
        }

        let series = self
            .prices
            .fetch_prices(ticker, start, end)
            .await
            .map_err(|e| ReportError::data_unavailable(ticker, format!("{:#}", e)))?;

        if series.is_empty() {
            return Err(ReportError::data_unavailable(ticker, "provider returned no rows"));
        }

        if let Some(repo) = cache {
            let (t, bars) = (ticker.to_string(), series.bars().to_vec());
            let stored = on_cache(repo, move |repo| {
                let n = repo.upsert_price_bars(&t, &bars)?;
                repo.record_fetch(&key, start, n)
            })
            .await;
            if let Err(e) = stored {
                warn!("Could not cache prices for {}: {:#}", ticker, e);
            }
        }

        Ok(series)
    }

    async fn fetch_fundamentals(&self, ticker: &str) -> FundamentalsSnapshot {
        let Some(source) = &self.fundamentals else {
            return FundamentalsSnapshot::empty(ticker);
        };
        match source.fetch_fundamentals(ticker).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Fundamentals unavailable for {}: {:#}", ticker, e);
                FundamentalsSnapshot::empty(ticker)
            }
        }
    }

    async fn fetch_news(&self, ticker: &str) -> Vec<NewsItem> {
        let Some(source) = &self.news else {
            return Vec::new();
        };
        match source.fetch_news(ticker, NEWS_LIMIT).await {
            Ok(mut items) => {
                items.truncate(NEWS_LIMIT);
                items
            }
            Err(e) => {
                warn!("News unavailable for {}: {:#}", ticker, e);
                Vec::new()
            }
        }
    }

    async fn fetch_macros(&self, start: NaiveDate, end: NaiveDate) -> Vec<MacroSeries> {
        let mut out = Vec::with_capacity(self.macro_series.len());
        for series in &self.macro_series {
            out.push(self.fetch_macro(series, start, end).await);
        }
        out
    }

    async fn fetch_macro(
        &self,
        series: &MacroSeriesConfig,
        start: NaiveDate,
        end: NaiveDate,
    ) -> MacroSeries {
        let Some(source) = &self.macro_source else {
            return fallback_series(series, start, end);
        };
        let key = macro_key(&series.series_id);

        if let Some(repo) = &self.cache {
            let (k, id, ttl) = (key.clone(), series.series_id.clone(), self.ttl_hours);
            let cached = on_cache(repo, move |repo| {
                if !repo.is_fresh(&k, start, ttl)? {
                    return Ok(Vec::new());
                }
                repo.load_macro_observations(&id, start, end)
            })
            .await;
            match cached {
                Ok(obs) if !obs.is_empty() => {
                    debug!("{}: serving {} observations from cache", series.series_id, obs.len());
                    return MacroSeries::new(&series.name, &series.series_id, MacroOrigin::Cache, obs);
                }
                Ok(_) => {}
                Err(e) => warn!("Macro cache lookup failed for {}: {:#}", series.series_id, e),
            }
        }

        match source.fetch_series(series, start, end).await {
            Ok(fetched) if !fetched.observations.is_empty() => {
                if let Some(repo) = &self.cache {
                    let (id, obs) = (series.series_id.clone(), fetched.observations.clone());
                    let stored = on_cache(repo, move |repo| {
                        let n = repo.upsert_macro_observations(&id, &obs)?;
                        repo.record_fetch(&key, start, n)
                    })
                    .await;
                    if let Err(e) = stored {
                        warn!("Could not cache {}: {:#}", series.series_id, e);
                    }
                }
                fetched
            }
            Ok(_) => {
                warn!("{} returned no observations; using fallback data", series.series_id);
                fallback_series(series, start, end)
            }
            Err(e) => {
                warn!("{} unavailable ({:#}); using fallback data", series.series_id, e);
                fallback_series(series, start, end)
            }
        }
    }
}

/// DuckDB calls block; run them on the blocking pool.
async fn on_cache<T, F>(repo: &Arc<Repository>, op: F) -> Result<T>
where
    F: FnOnce(&Repository) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let repo = Arc::clone(repo);
    tokio::task::spawn_blocking(move || op(&repo))
        .await
        .context("Cache task panicked")?
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{FundamentalValue, MacroObservation, PriceBar};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic random-walk-ish prices on weekdays.
    pub(crate) fn synthetic_bars(start: NaiveDate, end: NaiveDate) -> Vec<PriceBar> {
        use chrono::Datelike;
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| d.weekday().num_days_from_monday() < 5)
            .enumerate()
            .map(|(i, date)| {
                let t = i as f64;
                let close = 100.0 + 0.05 * t + 3.0 * (t / 9.0).sin();
                PriceBar {
                    date,
                    open: Some(close - 0.5),
                    high: Some(close + 1.0),
                    low: Some(close - 1.0),
                    close: Some(close),
                    volume: Some(1_000_000.0 + 1_000.0 * (i % 7) as f64),
                }
            })
            .collect()
    }

    /// In-memory price source. Unknown tickers return an empty series.
    pub(crate) struct StubPrices {
        pub known: Vec<(String, Vec<PriceBar>)>,
        pub calls: AtomicUsize,
    }

    impl StubPrices {
        pub(crate) fn new(known: Vec<(&str, Vec<PriceBar>)>) -> Self {
            Self {
                known: known.into_iter().map(|(t, b)| (t.to_string(), b)).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PriceSource for StubPrices {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch_prices(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceSeries> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let bars = self
                .known
                .iter()
                .find(|(t, _)| t == ticker)
                .map(|(_, bars)| {
                    bars.iter()
                        .filter(|b| b.date >= start && b.date <= end)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            Ok(PriceSeries::new(ticker, "stub", bars))
        }
    }

    pub(crate) struct FailingFundamentals;

    #[async_trait]
    impl FundamentalsSource for FailingFundamentals {
        async fn fetch_fundamentals(&self, _ticker: &str) -> Result<FundamentalsSnapshot> {
            anyhow::bail!("HTTP error 401")
        }
    }

    pub(crate) struct StubFundamentals;

    #[async_trait]
    impl FundamentalsSource for StubFundamentals {
        async fn fetch_fundamentals(&self, ticker: &str) -> Result<FundamentalsSnapshot> {
            let mut snapshot = FundamentalsSnapshot::empty(ticker);
            snapshot
                .values
                .insert("longName".into(), FundamentalValue::Text(format!("{} Inc.", ticker)));
            snapshot
                .values
                .insert("trailingPE".into(), FundamentalValue::Number(28.4));
            Ok(snapshot)
        }
    }

    /// Serves `count` numbered headlines, or fails when `count` is `None`.
    pub(crate) struct StubNews {
        pub count: Option<usize>,
    }

    #[async_trait]
    impl NewsSource for StubNews {
        async fn fetch_news(&self, ticker: &str, _limit: usize) -> Result<Vec<NewsItem>> {
            let Some(count) = self.count else {
                anyhow::bail!("HTTP error 429");
            };
            Ok((1..=count)
                .map(|i| NewsItem {
                    title: format!("{} headline {}", ticker, i),
                    publisher: Some("Wire".into()),
                    link: Some(format!("https://news.example.com/{}/{}", ticker, i)),
                    published: chrono::DateTime::from_timestamp(1_718_000_000 + i as i64 * 3600, 0),
                })
                .collect())
        }
    }

    struct FailingMacro;

    #[async_trait]
    impl MacroSource for FailingMacro {
        async fn fetch_series(
            &self,
            _series: &MacroSeriesConfig,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<MacroSeries> {
            anyhow::bail!("HTTP error 400")
        }
    }

    struct CountingMacro {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MacroSource for CountingMacro {
        async fn fetch_series(
            &self,
            series: &MacroSeriesConfig,
            start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<MacroSeries> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let obs = vec![MacroObservation { date: start, value: 5.33 }];
            Ok(MacroSeries::new(&series.name, &series.series_id, MacroOrigin::Fred, obs))
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn macro_cfg() -> Vec<MacroSeriesConfig> {
        AppConfig::default().macro_series
    }

    #[tokio::test]
    async fn test_unknown_ticker_is_data_unavailable() {
        let prices = Arc::new(StubPrices::new(vec![]));
        let fetcher = DataFetcher::new(prices, None, None, macro_cfg());

        let err = fetcher.fetch("ZZZZINVALID", d(2024, 1, 1), d(2024, 3, 1)).await.unwrap_err();
        assert!(matches!(err, ReportError::DataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_degraded_fundamentals_and_macro() {
        let bars = synthetic_bars(d(2024, 1, 1), d(2024, 3, 1));
        let prices = Arc::new(StubPrices::new(vec![("AAPL", bars)]));
        let fetcher = DataFetcher::new(
            prices,
            Some(Arc::new(FailingFundamentals)),
            Some(Arc::new(FailingMacro)),
            macro_cfg(),
        );

        let data = fetcher.fetch("AAPL", d(2024, 1, 1), d(2024, 3, 1)).await.unwrap();
        assert!(data.fundamentals.is_empty());
        assert_eq!(data.macros.len(), 2);
        assert!(data.macros.iter().all(|m| m.origin == MacroOrigin::Fallback));
        assert_eq!(data.macros[0].name, "interest_rate");
    }

    #[tokio::test]
    async fn test_no_macro_source_uses_fallback() {
        let bars = synthetic_bars(d(2024, 1, 1), d(2024, 1, 31));
        let prices = Arc::new(StubPrices::new(vec![("AAPL", bars)]));
        let fetcher = DataFetcher::new(prices, Some(Arc::new(StubFundamentals)), None, macro_cfg());

        let data = fetcher.fetch("AAPL", d(2024, 1, 1), d(2024, 1, 31)).await.unwrap();
        assert_eq!(data.fundamentals.text("longName"), Some("AAPL Inc."));
        assert_eq!(data.macros[1].observations.len(), 31);
        assert_eq!(data.prices.date_range(), Some((d(2024, 1, 1), d(2024, 1, 31))));
    }

    #[tokio::test]
    async fn test_news_is_capped_and_degrades_to_empty() {
        let bars = synthetic_bars(d(2024, 1, 1), d(2024, 1, 31));
        let prices = Arc::new(StubPrices::new(vec![("AAPL", bars)]));

        let fetcher = DataFetcher::new(prices.clone(), None, None, macro_cfg())
            .with_news(Arc::new(StubNews { count: Some(8) }));
        let data = fetcher.fetch("AAPL", d(2024, 1, 1), d(2024, 1, 31)).await.unwrap();
        assert_eq!(data.news.len(), NEWS_LIMIT);
        assert_eq!(data.news[0].title, "AAPL headline 1");

        let fetcher = DataFetcher::new(prices.clone(), None, None, macro_cfg())
            .with_news(Arc::new(StubNews { count: None }));
        let data = fetcher.fetch("AAPL", d(2024, 1, 1), d(2024, 1, 31)).await.unwrap();
        assert!(data.news.is_empty());
        assert_eq!(data.prices.len(), 23);

        let fetcher = DataFetcher::new(prices, None, None, macro_cfg());
        let data = fetcher.fetch("AAPL", d(2024, 1, 1), d(2024, 1, 31)).await.unwrap();
        assert!(data.news.is_empty());
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_requests() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        repo.run_migrations().unwrap();

        let bars = synthetic_bars(d(2024, 1, 1), d(2024, 3, 1));
        let prices = Arc::new(StubPrices::new(vec![("AAPL", bars)]));
        let macros = Arc::new(CountingMacro { calls: AtomicUsize::new(0) });
        let fetcher = DataFetcher::new(prices.clone(), None, Some(macros.clone()), macro_cfg())
            .with_cache(repo, 12);

        let first = fetcher.fetch("AAPL", d(2024, 1, 1), d(2024, 3, 1)).await.unwrap();
        let second = fetcher.fetch("AAPL", d(2024, 1, 1), d(2024, 3, 1)).await.unwrap();

        assert_eq!(prices.calls.load(Ordering::SeqCst), 1);
        assert_eq!(macros.calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.prices.bars(), second.prices.bars());
        assert_eq!(second.prices.source(), "stub (cached)");
        assert!(second.macros.iter().all(|m| m.origin == MacroOrigin::Cache));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_broken_cache_falls_back_to_provider() {
        // No migrations: every cache call fails on the blocking pool.
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let bars = synthetic_bars(d(2024, 1, 1), d(2024, 3, 1));
        let prices = Arc::new(StubPrices::new(vec![("AAPL", bars)]));
        let macros = Arc::new(CountingMacro { calls: AtomicUsize::new(0) });
        let fetcher = DataFetcher::new(prices.clone(), None, Some(macros.clone()), macro_cfg())
            .with_cache(repo, 12);

        let data = fetcher.fetch("AAPL", d(2024, 1, 1), d(2024, 3, 1)).await.unwrap();
        fetcher.fetch("AAPL", d(2024, 1, 1), d(2024, 3, 1)).await.unwrap();

        assert_eq!(data.prices.source(), "stub");
        assert_eq!(prices.calls.load(Ordering::SeqCst), 2);
        assert_eq!(macros.calls.load(Ordering::SeqCst), 4);
        assert!(data.macros.iter().all(|m| m.origin == MacroOrigin::Fred));
    }

    #[tokio::test]
    async fn test_cache_task_panic_is_an_error() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let err = on_cache(&repo, |_| -> Result<()> { panic!("boom") }).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Cache task panicked"));

        let count = on_cache(&repo, |r| r.run_migrations().map(|_| 3)).await.unwrap();
        assert_eq!(count, 3);
    }
}
