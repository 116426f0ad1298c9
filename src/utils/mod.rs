use chrono::DateTime;
use std::time::Instant;
use tracing::info;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.start.elapsed()
        );
    }
}

/// Format a number with thousands separators and a fixed precision.
/// 1234567.891 → "1,234,567.89"
pub fn fmt_number(n: f64, precision: usize) -> String {
    let formatted = format!("{:.*}", precision, n.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::new();
    for (i, ch) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if n < 0.0 && n.abs() >= 0.5 * 10f64.powi(-(precision as i32)) {
        grouped.push('-');
    }
    let mut result: String = grouped.chars().rev().collect();
    if let Some(frac) = frac_part {
        result.push('.');
        result.push_str(frac);
    }
    result
}

/// How a fundamentals value is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    Currency,
    /// Provider fraction, rendered as percent: 0.1234 → "12.34%"
    Percent,
    Ratio,
    LargeNumber,
    Number,
    Integer,
    /// Epoch seconds rendered as a date.
    EpochDate,
}

pub fn fmt_value(value: Option<f64>, format: ValueFormat) -> String {
    let Some(v) = value.filter(|v| v.is_finite()) else {
        return "N/A".to_string();
    };
    match format {
        ValueFormat::Currency => {
            if v < 0.0 {
                format!("-${}", fmt_number(-v, 2))
            } else {
                format!("${}", fmt_number(v, 2))
            }
        }
        ValueFormat::Percent => format!("{:.2}%", v * 100.0),
        ValueFormat::Ratio => format!("{:.2}x", v),
        ValueFormat::LargeNumber => fmt_large_number(v),
        ValueFormat::Number => fmt_number(v, 2),
        ValueFormat::Integer => fmt_number(v, 0),
        ValueFormat::EpochDate => DateTime::from_timestamp(v as i64, 0)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "N/A".to_string()),
    }
}

/// 2.5e12 → "2.50 T" | 3.1e9 → "3.10 B" | 999 → "999.00"
pub fn fmt_large_number(v: f64) -> String {
    let a = v.abs();
    if a >= 1e12 {
        format!("{:.2} T", v / 1e12)
    } else if a >= 1e9 {
        format!("{:.2} B", v / 1e9)
    } else if a >= 1e6 {
        format!("{:.2} M", v / 1e6)
    } else if a >= 1e3 {
        format!("{:.2} K", v / 1e3)
    } else {
        fmt_number(v, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_number() {
        assert_eq!(fmt_number(1_234_567.0, 0), "1,234,567");
        assert_eq!(fmt_number(0.0, 0), "0");
        assert_eq!(fmt_number(-42_000.0, 0), "-42,000");
        assert_eq!(fmt_number(999.0, 0), "999");
        assert_eq!(fmt_number(1234.567, 2), "1,234.57");
    }

    #[test]
    fn test_fmt_value_variants() {
        assert_eq!(fmt_value(None, ValueFormat::Currency), "N/A");
        assert_eq!(fmt_value(Some(f64::NAN), ValueFormat::Ratio), "N/A");
        assert_eq!(fmt_value(Some(1520.5), ValueFormat::Currency), "$1,520.50");
        assert_eq!(fmt_value(Some(0.1234), ValueFormat::Percent), "12.34%");
        assert_eq!(fmt_value(Some(28.456), ValueFormat::Ratio), "28.46x");
        assert_eq!(fmt_value(Some(2.5e12), ValueFormat::LargeNumber), "2.50 T");
        assert_eq!(fmt_value(Some(164_000.0), ValueFormat::Integer), "164,000");
        assert_eq!(fmt_value(Some(1_700_000_000.0), ValueFormat::EpochDate), "2023-11-14");
    }
}
