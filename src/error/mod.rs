//! User-facing failure taxonomy for one report request.
//!
//! Everything below the pipeline speaks `anyhow`; the pipeline maps those
//! failures onto one of these variants so the HTTP layer and the CLI can show
//! a friendly message instead of a backtrace.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("invalid ticker symbol {0:?}")]
    InvalidTicker(String),

    #[error("invalid forecast horizon: {0}")]
    InvalidHorizon(String),

    #[error("no data available for {ticker}: {reason}")]
    DataUnavailable { ticker: String, reason: String },

    #[error("forecast failed: {0}")]
    Forecast(String),

    #[error("report rendering failed: {0}")]
    Render(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ReportError {
    pub fn data_unavailable(ticker: &str, reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            ticker: ticker.to_string(),
            reason: reason.into(),
        }
    }

    /// Message safe to show to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidTicker(_) => {
                "Invalid ticker symbol format. Please use standard symbols (e.g. AAPL, BRK-A, ^GSPC)."
                    .to_string()
            }
            Self::InvalidHorizon(msg) => format!("Invalid forecast horizon: {msg}."),
            Self::DataUnavailable { ticker, .. } => format!(
                "No market data could be found for {ticker}. Check the symbol and try again."
            ),
            Self::Forecast(msg) => format!("A forecast could not be produced: {msg}."),
            Self::Render(_) => "The report could not be generated. Please try again later.".to_string(),
            Self::Internal(_) => "An unexpected error occurred.".to_string(),
        }
    }

    /// Short machine-readable tag, used in logs and the JSON API.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidTicker(_) => "invalid_ticker",
            Self::InvalidHorizon(_) => "invalid_horizon",
            Self::DataUnavailable { .. } => "data_unavailable",
            Self::Forecast(_) => "forecast_error",
            Self::Render(_) => "render_error",
            Self::Internal(_) => "internal",
        }
    }
}

pub type ReportResult<T> = std::result::Result<T, ReportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_internal_detail() {
        let err = ReportError::Internal(anyhow::anyhow!("duckdb exploded at /tmp/x"));
        assert!(!err.user_message().contains("duckdb"));
        assert_eq!(err.kind(), "internal");
    }

    #[test]
    fn test_data_unavailable_mentions_ticker() {
        let err = ReportError::data_unavailable("ZZZZINVALID", "empty chart");
        assert!(err.user_message().contains("ZZZZINVALID"));
        assert!(err.to_string().contains("empty chart"));
    }
}
