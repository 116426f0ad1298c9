use crate::models::{ForecastPoint, Granularity, Observation, PeriodSummary};
use chrono::{Datelike, Days, Months, NaiveDate};
use std::collections::BTreeMap;

/// History and forecast grouped into display periods.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub granularity: Granularity,
    pub history: Vec<PeriodSummary>,
    pub forecast: Vec<PeriodSummary>,
}

pub fn granularity_for(horizon: usize) -> Granularity {
    match horizon {
        0..=30 => Granularity::Daily,
        31..=90 => Granularity::Weekly,
        _ => Granularity::Monthly,
    }
}

/// Label of the period containing `date`. Weeks end on Sunday and carry the
/// Sunday's date. All labels sort chronologically as strings.
pub fn period_label(date: NaiveDate, granularity: Granularity) -> String {
    match granularity {
        Granularity::Daily => date.format("%Y-%m-%d").to_string(),
        Granularity::Weekly => {
            let to_sunday = 6 - date.weekday().num_days_from_monday() as u64;
            date.checked_add_days(Days::new(to_sunday))
                .unwrap_or(date)
                .format("%Y-%m-%d")
                .to_string()
        }
        Granularity::Monthly => date.format("%Y-%m").to_string(),
    }
}

/// First history date shown for a granularity.
fn history_start(last: NaiveDate, granularity: Granularity) -> NaiveDate {
    let start = match granularity {
        Granularity::Daily => last.checked_sub_days(Days::new(15)),
        Granularity::Weekly => last.checked_sub_months(Months::new(3)),
        Granularity::Monthly => last.checked_sub_months(Months::new(8)),
    };
    start.unwrap_or(NaiveDate::MIN)
}

pub fn aggregate(history: &[Observation], forecast: &[ForecastPoint], horizon: usize) -> Aggregation {
    let granularity = granularity_for(horizon);
    let Some(last) = history.last().map(|o| o.date) else {
        return Aggregation {
            granularity,
            history: Vec::new(),
            forecast: Vec::new(),
        };
    };
    let start = history_start(last, granularity);

    let mut hist_groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for o in history.iter().filter(|o| o.date >= start) {
        hist_groups
            .entry(period_label(o.date, granularity))
            .or_default()
            .push(o.value);
    }
    let history: Vec<PeriodSummary> = hist_groups
        .into_iter()
        .map(|(period, values)| PeriodSummary {
            period,
            low: values.iter().copied().fold(f64::INFINITY, f64::min),
            average: mean(&values),
            high: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
        .collect();

    let mut fc_groups: BTreeMap<String, Vec<&ForecastPoint>> = BTreeMap::new();
    for p in forecast {
        fc_groups
            .entry(period_label(p.date, granularity))
            .or_default()
            .push(p);
    }
    let mut forecast: Vec<PeriodSummary> = fc_groups
        .into_iter()
        .map(|(period, points)| PeriodSummary {
            period,
            low: points.iter().map(|p| p.lower).fold(f64::INFINITY, f64::min),
            average: mean(&points.iter().map(|p| p.predicted).collect::<Vec<_>>()),
            high: points.iter().map(|p| p.upper).fold(f64::NEG_INFINITY, f64::max),
        })
        .collect();

    // The first forecast period starts from where history left off.
    if let (Some(last_actual), Some(first)) = (history.last(), forecast.first_mut()) {
        first.low = last_actual.average;
        first.average = last_actual.average;
        first.high = last_actual.average;
    }

    Aggregation {
        granularity,
        history,
        forecast,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn history(start: NaiveDate, n: u64) -> Vec<Observation> {
        (0..n)
            .map(|i| Observation {
                date: start + Days::new(i),
                value: 100.0 + i as f64,
            })
            .collect()
    }

    fn forecast(after: NaiveDate, n: u64) -> Vec<ForecastPoint> {
        (1..=n)
            .map(|i| ForecastPoint {
                date: after + Days::new(i),
                predicted: 200.0 + i as f64,
                lower: 190.0 + i as f64,
                upper: 210.0 + i as f64,
            })
            .collect()
    }

    #[test]
    fn test_granularity_thresholds() {
        assert_eq!(granularity_for(30), Granularity::Daily);
        assert_eq!(granularity_for(31), Granularity::Weekly);
        assert_eq!(granularity_for(90), Granularity::Weekly);
        assert_eq!(granularity_for(91), Granularity::Monthly);
    }

    #[test]
    fn test_week_label_is_sunday() {
        // 2024-01-03 is a Wednesday; the week ends Sunday 2024-01-07.
        assert_eq!(period_label(d(2024, 1, 3), Granularity::Weekly), "2024-01-07");
        assert_eq!(period_label(d(2024, 1, 7), Granularity::Weekly), "2024-01-07");
        assert_eq!(period_label(d(2024, 1, 8), Granularity::Weekly), "2024-01-14");
        assert_eq!(period_label(d(2024, 1, 8), Granularity::Monthly), "2024-01");
    }

    #[test]
    fn test_daily_aggregation() {
        let hist = history(d(2024, 1, 1), 60);
        let last = hist.last().unwrap().date;
        let fc = forecast(last, 10);
        let agg = aggregate(&hist, &fc, 10);

        assert_eq!(agg.granularity, Granularity::Daily);
        // last date minus 15 days, inclusive
        assert_eq!(agg.history.len(), 16);
        assert_eq!(agg.forecast.len(), 10);

        let last_avg = agg.history.last().unwrap().average;
        assert_eq!(agg.forecast[0].average, last_avg);
        assert_eq!(agg.forecast[0].low, last_avg);
        assert_eq!(agg.forecast[1].average, 202.0);
        assert_eq!(agg.forecast[1].low, 192.0);
    }

    #[test]
    fn test_monthly_aggregation_takes_extremes() {
        let hist = history(d(2023, 1, 1), 365);
        let last = hist.last().unwrap().date;
        let fc = forecast(last, 365);
        let agg = aggregate(&hist, &fc, 365);

        assert_eq!(agg.granularity, Granularity::Monthly);
        assert_eq!(agg.history.first().unwrap().period, "2023-04");
        assert_eq!(agg.history.last().unwrap().period, "2023-12");
        assert_eq!(agg.forecast.len(), 12);
        assert_eq!(agg.forecast[1].period, "2024-02");
        // February: forecast days 32..=60
        assert_eq!(agg.forecast[1].low, 190.0 + 32.0);
        assert_eq!(agg.forecast[1].high, 210.0 + 60.0);
    }
}
