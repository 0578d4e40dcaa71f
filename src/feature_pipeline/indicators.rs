//! Indicator math.
//!
//! Grounded on the teacher's `src/strategy/indicators.rs` (same function
//! names: `sma`, `ema`, `rsi`, `atr`, `macd`, `bollinger_bands`, `stochastic`)
//! but with the approximations it documents as "simplified" replaced by the
//! real definitions the spec calls for: MACD's signal line is a true EMA(9)
//! over the MACD-line history rather than a blend of the current value with
//! itself, stochastic %D is SMA(3) of %K rather than %K itself, and RSI/ATR/ADX
//! use Wilder smoothing rather than a flat-window average.

use crate::types::Candle;

pub fn sma(values: &[f64], period: usize) -> f64 {
    if values.len() < period || period == 0 {
        return 0.0;
    }
    let sum: f64 = values[values.len() - period..].iter().sum();
    sum / period as f64
}

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Exponential moving average over the full series, seeded by the SMA of the
/// first `period` values (standard convention).
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.len() < period || period == 0 {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len() - period + 1);
    let mut prev = sma(&values[..period], period);
    out.push(prev);
    for v in &values[period..] {
        prev = (v - prev) * k + prev;
        out.push(prev);
    }
    out
}

pub fn ema(values: &[f64], period: usize) -> f64 {
    ema_series(values, period).last().copied().unwrap_or(0.0)
}

/// Wilder-smoothed RSI(period).
pub fn rsi(values: &[f64], period: usize) -> f64 {
    if values.len() < period + 1 {
        return 50.0;
    }
    let deltas: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let mut avg_gain: f64 = deltas[..period].iter().map(|d| d.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss: f64 = deltas[..period].iter().map(|d| (-d).max(0.0)).sum::<f64>() / period as f64;

    for d in &deltas[period..] {
        let gain = d.max(0.0);
        let loss = (-d).max(0.0);
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// True range series.
fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    let mut out = Vec::with_capacity(candles.len());
    for (i, c) in candles.iter().enumerate() {
        let prev_close = if i > 0 { candles[i - 1].close } else { c.open };
        let tr = (c.high - c.low)
            .max((c.high - prev_close).abs())
            .max((c.low - prev_close).abs());
        out.push(tr);
    }
    out
}

/// Wilder-smoothed ATR(period).
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    let tr = true_ranges(candles);
    if tr.len() < period + 1 {
        return 0.0;
    }
    let mut avg: f64 = tr[1..=period].iter().sum::<f64>() / period as f64;
    for t in &tr[period + 1..] {
        avg = (avg * (period - 1) as f64 + t) / period as f64;
    }
    avg
}

pub struct Macd {
    pub value: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD(fast, slow, signal) with a real EMA(signal) over the MACD-line
/// history (not just the latest value).
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    if values.len() < slow + signal {
        return Macd { value: 0.0, signal: 0.0, histogram: 0.0 };
    }
    let fast_series = ema_series(values, fast);
    let slow_series = ema_series(values, slow);
    // Align: fast_series is longer (starts earlier) than slow_series.
    let offset = fast_series.len() - slow_series.len();
    let macd_line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, s)| fast_series[i + offset] - s)
        .collect();
    let signal_series = ema_series(&macd_line, signal);
    let value = *macd_line.last().unwrap();
    let sig = *signal_series.last().unwrap();
    Macd { value, signal: sig, histogram: value - sig }
}

pub struct Bollinger {
    pub upper: f64,
    pub mid: f64,
    pub lower: f64,
}

pub fn bollinger_bands(values: &[f64], period: usize, std_dev_multiplier: f64) -> Bollinger {
    if values.len() < period {
        return Bollinger { upper: 0.0, mid: 0.0, lower: 0.0 };
    }
    let window = &values[values.len() - period..];
    let mid = sma(values, period);
    let variance: f64 = window.iter().map(|v| (v - mid).powi(2)).sum::<f64>() / period as f64;
    let sd = variance.sqrt();
    Bollinger {
        upper: mid + std_dev_multiplier * sd,
        mid,
        lower: mid - std_dev_multiplier * sd,
    }
}

pub struct Stochastic {
    pub k: f64,
    pub d: f64,
}

/// Stochastic(k_period, d_period): %D is SMA(d_period) of the %K series, not
/// a copy of the latest %K.
pub fn stochastic(candles: &[Candle], k_period: usize, d_period: usize) -> Stochastic {
    if candles.len() < k_period {
        return Stochastic { k: 50.0, d: 50.0 };
    }
    let mut k_series = Vec::with_capacity(candles.len() - k_period + 1);
    for end in k_period..=candles.len() {
        let window = &candles[end - k_period..end];
        let hh = window.iter().fold(f64::MIN, |a, c| a.max(c.high));
        let ll = window.iter().fold(f64::MAX, |a, c| a.min(c.low));
        let close = window.last().unwrap().close;
        let k = if hh == ll { 50.0 } else { 100.0 * (close - ll) / (hh - ll) };
        k_series.push(k);
    }
    let k = *k_series.last().unwrap();
    let d = sma(&k_series, d_period.min(k_series.len()));
    Stochastic { k, d: if d == 0.0 { k } else { d } }
}

/// CCI(period) = (TP - SMA(TP)) / (0.015 * mean deviation).
pub fn cci(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period {
        return 0.0;
    }
    let tp: Vec<f64> = candles.iter().map(|c| (c.high + c.low + c.close) / 3.0).collect();
    let window = &tp[tp.len() - period..];
    let sma_tp = window.iter().sum::<f64>() / period as f64;
    let mean_dev = window.iter().map(|v| (v - sma_tp).abs()).sum::<f64>() / period as f64;
    if mean_dev == 0.0 {
        return 0.0;
    }
    (tp.last().unwrap() - sma_tp) / (0.015 * mean_dev)
}

/// On-balance volume: cumulative signed volume by close-over-prev-close.
pub fn obv(candles: &[Candle]) -> f64 {
    let mut acc = 0.0;
    for w in candles.windows(2) {
        if w[1].close > w[0].close {
            acc += w[1].volume;
        } else if w[1].close < w[0].close {
            acc -= w[1].volume;
        }
    }
    acc
}

/// Wilder-smoothed ADX(period) via +DI/-DI -> DX -> EMA.
pub fn adx(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period * 2 {
        return 0.0;
    }
    let tr = true_ranges(candles);
    let mut plus_dm = vec![0.0; candles.len()];
    let mut minus_dm = vec![0.0; candles.len()];
    for i in 1..candles.len() {
        let up = candles[i].high - candles[i - 1].high;
        let down = candles[i - 1].low - candles[i].low;
        if up > down && up > 0.0 {
            plus_dm[i] = up;
        }
        if down > up && down > 0.0 {
            minus_dm[i] = down;
        }
    }

    let wilder = |series: &[f64]| -> Vec<f64> {
        if series.len() <= period {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(series.len() - period);
        let mut avg: f64 = series[1..=period].iter().sum::<f64>() / period as f64;
        out.push(avg);
        for v in &series[period + 1..] {
            avg = (avg * (period - 1) as f64 + v) / period as f64;
            out.push(avg);
        }
        out
    };

    let atr_series = wilder(&tr);
    let plus_di_smoothed = wilder(&plus_dm);
    let minus_di_smoothed = wilder(&minus_dm);

    let n = atr_series.len().min(plus_di_smoothed.len()).min(minus_di_smoothed.len());
    if n == 0 {
        return 0.0;
    }
    let mut dx_series = Vec::with_capacity(n);
    for i in 0..n {
        let atr_v = atr_series[i];
        if atr_v == 0.0 {
            dx_series.push(0.0);
            continue;
        }
        let plus_di = 100.0 * plus_di_smoothed[i] / atr_v;
        let minus_di = 100.0 * minus_di_smoothed[i] / atr_v;
        let sum = plus_di + minus_di;
        let dx = if sum == 0.0 { 0.0 } else { 100.0 * (plus_di - minus_di).abs() / sum };
        dx_series.push(dx);
    }

    ema(&dx_series, period.min(dx_series.len()).max(1))
}

/// Fibonacci retracement levels from the high/low over the given window.
pub fn fib_levels(candles: &[Candle]) -> [f64; 5] {
    let high = candles.iter().fold(f64::MIN, |a, c| a.max(c.high));
    let low = candles.iter().fold(f64::MAX, |a, c| a.min(c.low));
    let range = high - low;
    [
        high,
        high - range * 0.236,
        high - range * 0.5,
        high - range * 0.618,
        low,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candle(close: f64) -> Candle {
        Candle {
            open_time: Utc::now(),
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let values: Vec<f64> = (1..=30).map(|i| i as f64).collect();
        assert_eq!(rsi(&values, 14), 100.0);
    }

    #[test]
    fn rsi_neutral_on_short_series() {
        assert_eq!(rsi(&[1.0, 2.0], 14), 50.0);
    }

    #[test]
    fn stochastic_bounds() {
        let candles: Vec<Candle> = (1..=20).map(|i| candle(i as f64)).collect();
        let s = stochastic(&candles, 14, 3);
        assert!(s.k >= 0.0 && s.k <= 100.0);
        assert!(s.d >= 0.0 && s.d <= 100.0);
    }

    #[test]
    fn obv_tracks_direction() {
        let candles = vec![candle(10.0), candle(11.0), candle(10.5)];
        // up then down: +vol - vol = 0
        assert_eq!(obv(&candles), 0.0);
    }
}
