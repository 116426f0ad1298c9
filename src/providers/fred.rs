use super::MacroSource;
use super::http_client::HttpClient;
use super::parsers::parse_fred_observations;
use crate::config::{FallbackCurve, MacroSeriesConfig, ProvidersConfig};
use crate::models::{MacroObservation, MacroOrigin, MacroSeries};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info};
use url::Url;

/// FRED `series/observations` client. Only built when an API key is configured.
pub struct FredProvider {
    client: HttpClient,
    base_url: String,
    api_key: String,
}

impl FredProvider {
    pub fn new(config: &ProvidersConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            base_url: config.fred_base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn observations_url(&self, series_id: &str, start: NaiveDate, end: NaiveDate) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/series/observations", self.base_url))
            .with_context(|| format!("Invalid FRED base URL {}", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("series_id", series_id)
            .append_pair("api_key", &self.api_key)
            .append_pair("file_type", "json")
            .append_pair("observation_start", &start.format("%Y-%m-%d").to_string())
            .append_pair("observation_end", &end.format("%Y-%m-%d").to_string());
        Ok(url)
    }
}

#[async_trait]
impl MacroSource for FredProvider {
    async fn fetch_series(
        &self,
        series: &MacroSeriesConfig,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<MacroSeries> {
        let url = self.observations_url(&series.series_id, start, end)?;
        info!("Fetching FRED series {} ({})", series.series_id, series.name);

        let body = self
            .client
            .get_text(url.as_str())
            .await
            .with_context(|| format!("FRED request for {}", series.series_id))?;
        let observations = parse_fred_observations(&body)
            .with_context(|| format!("FRED payload for {}", series.series_id))?;

        debug!("{}: {} observations", series.series_id, observations.len());
        Ok(MacroSeries::new(
            &series.name,
            &series.series_id,
            MacroOrigin::Fred,
            observations,
        ))
    }
}

/// Deterministic stand-in used when FRED is not configured or unreachable:
/// one value per calendar day from `start` to `end`, moving from
/// `fallback_start` to `fallback_end` along a linear or geometric curve.
pub fn fallback_series(series: &MacroSeriesConfig, start: NaiveDate, end: NaiveDate) -> MacroSeries {
    let dates: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= end).collect();
    let n = dates.len();
    let (a, b) = (series.fallback_start, series.fallback_end);

    let observations = dates
        .into_iter()
        .enumerate()
        .map(|(i, date)| {
            let t = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
            let value = match series.fallback_curve {
                FallbackCurve::Linear => a + (b - a) * t,
                FallbackCurve::Geometric if a > 0.0 && b > 0.0 => a * (b / a).powf(t),
                FallbackCurve::Geometric => a + (b - a) * t,
            };
            MacroObservation { date, value }
        })
        .collect();

    MacroSeries::new(&series.name, &series.series_id, MacroOrigin::Fallback, observations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_fallback_linear_and_geometric() {
        let cfg = AppConfig::default();
        let rate = fallback_series(&cfg.macro_series[0], d(2024, 1, 1), d(2024, 1, 11));
        assert_eq!(rate.origin, MacroOrigin::Fallback);
        assert_eq!(rate.observations.len(), 11);
        assert!((rate.observations[0].value - 0.5).abs() < 1e-12);
        assert!((rate.observations[5].value - 3.0).abs() < 1e-12);
        assert!((rate.observations[10].value - 5.5).abs() < 1e-12);

        let index = fallback_series(&cfg.macro_series[1], d(2024, 1, 1), d(2024, 1, 3));
        let mid = index.observations[1].value;
        assert!((mid - (50.0f64 * 4500.0).sqrt()).abs() < 1e-9);
        assert!((index.observations[2].value - 4500.0).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_single_day() {
        let cfg = AppConfig::default();
        let s = fallback_series(&cfg.macro_series[0], d(2024, 1, 1), d(2024, 1, 1));
        assert_eq!(s.observations.len(), 1);
        assert_eq!(s.observations[0].value, 0.5);
    }

    #[test]
    fn test_observations_url() {
        let fred = FredProvider::new(&ProvidersConfig::default(), "k3y").unwrap();
        let url = fred.observations_url("DFF", d(2024, 1, 1), d(2024, 6, 30)).unwrap();
        assert_eq!(url.path(), "/fred/series/observations");
        let q = url.query().unwrap();
        assert!(q.contains("series_id=DFF"));
        assert!(q.contains("api_key=k3y"));
        assert!(q.contains("observation_end=2024-06-30"));
    }
}
