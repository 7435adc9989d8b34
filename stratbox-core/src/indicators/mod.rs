//! Indicator math exposed to guest programs.
//!
//! Pure functions over value slices. Outputs are the same length as the
//! input with `NaN` padding over the warmup window, so a guest can pair an
//! indicator series with the bar sequence index-for-index.

/// Simple moving average. First valid value at index `period - 1`.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    let mut sum: f64 = values[..period].iter().sum();
    result[period - 1] = sum / period as f64;
    for i in period..n {
        sum += values[i] - values[i - period];
        result[i] = sum / period as f64;
    }
    result
}

/// Exponential moving average, seeded with an SMA over the first window.
///
/// Smoothing factor alpha = 2 / (period + 1).
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    result[period - 1] = seed;
    let mut prev = seed;
    for i in period..n {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = prev;
    }
    result
}

/// Relative Strength Index with Wilder smoothing.
///
/// RSI = 100 - 100 / (1 + avg_gain / avg_loss).
/// Edge cases: no losses → 100, no gains → 0, flat window → 50.
pub fn rsi(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return result;
    }

    // Seed: simple averages over the first `period` changes.
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = values[i] - values[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    result[period] = rsi_value(avg_gain, avg_loss);

    // Wilder smoothing thereafter.
    for i in (period + 1)..n {
        let change = values[i] - values[i - 1];
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        result[i] = rsi_value(avg_gain, avg_loss);
    }
    result
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Rate of change over `period` bars, in percent.
pub fn roc(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n <= period {
        return result;
    }
    for i in period..n {
        let base = values[i - period];
        if base != 0.0 {
            result[i] = (values[i] - base) / base * 100.0;
        }
    }
    result
}

/// Rolling maximum over a trailing `period` window (inclusive of current).
pub fn highest(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, |w| {
        w.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    })
}

/// Rolling minimum over a trailing `period` window (inclusive of current).
pub fn lowest(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, |w| {
        w.iter().copied().fold(f64::INFINITY, f64::min)
    })
}

fn rolling(values: &[f64], period: usize, f: impl Fn(&[f64]) -> f64) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }
    for i in (period - 1)..n {
        result[i] = f(&values[i + 1 - period..=i]);
    }
    result
}
