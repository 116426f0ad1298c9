use crate::models::{PriceBar, RawCsvRow};
use chrono::NaiveDate;
use tracing::warn;

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse price: strip everything except digits, dot, minus.
/// "$1,234.56" → 1234.56 | "610.00" → 610.0
pub fn parse_price(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" || s == "-" || s == "—" || s == "null" {
        return None;
    }
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse().ok().filter(|v: &f64| v.is_finite())
}

/// Parse volume with K/M/B suffixes.
/// "1.2M" → 1,200,000 | "345K" → 345,000 | "12345" → 12345
pub fn parse_volume_shorthand(s: &str) -> Option<f64> {
    let s = s.trim().to_uppercase().replace(',', "");

    if s.is_empty() || s == "N/A" || s == "-" || s == "—" {
        return None;
    }

    let (num_str, multiplier) = if s.ends_with('B') {
        (s.trim_end_matches('B'), 1_000_000_000.0)
    } else if s.ends_with('M') {
        (s.trim_end_matches('M'), 1_000_000.0)
    } else if s.ends_with('K') {
        (s.trim_end_matches('K'), 1_000.0)
    } else {
        (s.as_str(), 1.0)
    };

    let num: f64 = num_str.trim().parse().ok()?;
    Some((num * multiplier).round())
}

/// Parse dates: ISO, "Feb 20, 2024" (investing.com) and a few numeric layouts.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    // Yahoo exports sometimes carry a time component.
    let s = s.split_whitespace().next().filter(|d| d.contains('-')).unwrap_or(s);

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%b %d, %Y") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%m/%d/%Y") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%d %b %Y") {
        return Some(d);
    }

    None
}

// ── Tickers ───────────────────────────────────────────────────────────────────

pub fn normalise_ticker(s: &str) -> String {
    s.trim().to_uppercase()
}

/// Normalise and validate a user-supplied symbol.
/// Accepts letters, digits and `^ . -` (AAPL, BRK-A, ^GSPC, RDS.A).
pub fn validate_ticker(s: &str) -> Option<String> {
    let t = normalise_ticker(s);
    let ok = !t.is_empty()
        && t.len() <= 12
        && t
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '^' | '.' | '-'))
        && t.chars().any(|c| c.is_ascii_alphanumeric());
    ok.then_some(t)
}

// ── CSV → PriceBar ────────────────────────────────────────────────────────────

/// Convert one raw CSV row. When an adjusted close is present the whole bar
/// is rescaled by `adj_close / close`, matching the Yahoo chart adjustment.
pub fn csv_row_to_bar(ticker: &str, row: &RawCsvRow) -> Option<PriceBar> {
    let date = parse_date(row.date.as_deref()?)?;

    let close = row.close.as_deref().and_then(parse_price);
    if let Some(c) = close {
        if c <= 0.0 {
            warn!("Invalid close {} for {} on {}", c, ticker, date);
            return None;
        }
    }

    let factor = match (close, row.adj_close.as_deref().and_then(parse_price)) {
        (Some(c), Some(adj)) if c > 0.0 && adj > 0.0 => adj / c,
        _ => 1.0,
    };
    let scale = |v: Option<f64>| v.map(|x| x * factor);

    Some(PriceBar {
        date,
        open: scale(row.open.as_deref().and_then(parse_price)),
        high: scale(row.high.as_deref().and_then(parse_price)),
        low: scale(row.low.as_deref().and_then(parse_price)),
        close: scale(close),
        volume: row.volume.as_deref().and_then(parse_volume_shorthand),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_volume_shorthand() {
        assert_eq!(parse_volume_shorthand("1.2M"), Some(1_200_000.0));
        assert_eq!(parse_volume_shorthand("345K"), Some(345_000.0));
        assert_eq!(parse_volume_shorthand("1.5B"), Some(1_500_000_000.0));
        assert_eq!(parse_volume_shorthand("12,345"), Some(12345.0));
        assert_eq!(parse_volume_shorthand("-"), None);
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("$1,234.56"), Some(1234.56));
        assert_eq!(parse_price("N/A"), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 20).unwrap();
        assert_eq!(parse_date("2024-02-20"), Some(d));
        assert_eq!(parse_date("Feb 20, 2024"), Some(d));
        assert_eq!(parse_date("02/20/2024"), Some(d));
        assert_eq!(parse_date("2024-02-20 00:00:00-05:00"), Some(d));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_validate_ticker() {
        assert_eq!(validate_ticker(" aapl "), Some("AAPL".to_string()));
        assert_eq!(validate_ticker("brk-a"), Some("BRK-A".to_string()));
        assert_eq!(validate_ticker("^GSPC"), Some("^GSPC".to_string()));
        assert_eq!(validate_ticker(""), None);
        assert_eq!(validate_ticker("AA PL"), None);
        assert_eq!(validate_ticker("<script>"), None);
        assert_eq!(validate_ticker("^^^"), None);
        assert_eq!(validate_ticker("ABCDEFGHIJKLMN"), None);
    }

    #[test]
    fn test_csv_row_applies_adjustment() {
        let row = RawCsvRow {
            date: Some("2024-01-02".into()),
            open: Some("100".into()),
            high: Some("110".into()),
            low: Some("90".into()),
            close: Some("100".into()),
            adj_close: Some("50".into()),
            volume: Some("1000".into()),
        };
        let bar = csv_row_to_bar("TEST", &row).unwrap();
        assert_eq!(bar.close, Some(50.0));
        assert_eq!(bar.high, Some(55.0));
        assert_eq!(bar.volume, Some(1000.0));
    }

    #[test]
    fn test_csv_row_rejects_bad_close() {
        let row = RawCsvRow {
            date: Some("2024-01-02".into()),
            close: Some("0".into()),
            ..Default::default()
        };
        assert!(csv_row_to_bar("TEST", &row).is_none());
    }
}
