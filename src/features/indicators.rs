//! Closed-form rolling indicators over a close-price column.
//!
//! Every function returns a vector the same length as its input; positions
//! where the window has not filled yet are `None`.

/// Trailing arithmetic mean over `window` values.
pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }
    let mut sum: f64 = values[..window].iter().sum();
    out[window - 1] = Some(sum / window as f64);
    for i in window..values.len() {
        sum += values[i] - values[i - window];
        out[i] = Some(sum / window as f64);
    }
    out
}

/// Trailing sample standard deviation (n - 1 denominator).
pub fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window < 2 {
        return out;
    }
    for i in (window - 1)..values.len() {
        let slice = &values[i + 1 - window..=i];
        let mean = slice.iter().sum::<f64>() / window as f64;
        let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window - 1) as f64;
        out[i] = Some(var.sqrt());
    }
    out
}

/// Recursive EMA with `alpha = 2 / (span + 1)`, seeded with the first
/// defined value. Leading `None`s in the input are skipped, and the output
/// stays `None` until `span` defined values have been seen.
pub fn ema(values: &[Option<f64>], span: usize) -> Vec<Option<f64>> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = vec![None; values.len()];
    let mut state: Option<f64> = None;
    let mut seen = 0usize;

    for (i, v) in values.iter().enumerate() {
        let Some(x) = v else {
            continue;
        };
        let next = match state {
            None => *x,
            Some(prev) => alpha * x + (1.0 - alpha) * prev,
        };
        state = Some(next);
        seen += 1;
        if seen >= span {
            out[i] = Some(next);
        }
    }
    out
}

/// RSI from simple rolling means of gains and losses over `window` changes.
/// A zero mean loss is replaced by 1e-10, so a straight rally reads ~100.
pub fn rsi(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() <= window {
        return out;
    }

    let gains: Vec<f64> = values.windows(2).map(|w| (w[1] - w[0]).max(0.0)).collect();
    let losses: Vec<f64> = values.windows(2).map(|w| (w[0] - w[1]).max(0.0)).collect();
    let avg_gain = sma(&gains, window);
    let avg_loss = sma(&losses, window);

    for (i, (g, l)) in avg_gain.iter().zip(&avg_loss).enumerate() {
        if let (Some(g), Some(l)) = (g, l) {
            let l = if *l == 0.0 { 1e-10 } else { *l };
            let rs = g / l;
            // change i sits between close i and close i + 1
            out[i + 1] = Some(100.0 - 100.0 / (1.0 + rs));
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub line: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let input: Vec<Option<f64>> = values.iter().copied().map(Some).collect();
    let fast_ema = ema(&input, fast);
    let slow_ema = ema(&input, slow);

    let line: Vec<Option<f64>> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal_line = ema(&line, signal);
    let histogram = line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| Some((*m)? - (*s)?))
        .collect();

    Macd {
        line,
        signal: signal_line,
        histogram,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bollinger {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

pub fn bollinger(values: &[f64], window: usize, num_std: f64) -> Bollinger {
    let middle = sma(values, window);
    let std = rolling_std(values, window);
    let band = |sign: f64| -> Vec<Option<f64>> {
        middle
            .iter()
            .zip(&std)
            .map(|(m, s)| Some((*m)? + sign * num_std * (*s)?))
            .collect()
    };
    Bollinger {
        upper: band(1.0),
        lower: band(-1.0),
        middle,
    }
}
