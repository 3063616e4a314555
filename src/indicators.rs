use crate::models::Candle;

/// All series are aligned 1:1 with the input; `None` marks indices
/// where the lookback window is not yet filled. Indicators never
/// fabricate a value for a short window.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let mut window_sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(window_sum / period as f64);
    for i in period..values.len() {
        window_sum += values[i] - values[i - period];
        out[i] = Some(window_sum / period as f64);
    }

    out
}

/// Exponential moving average with factor 2/(n+1), seeded by the SMA
/// of the first n values.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);

    let mut prev = seed;
    for i in period..values.len() {
        let next = values[i] * multiplier + prev * (1.0 - multiplier);
        out[i] = Some(next);
        prev = next;
    }

    out
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Wilder's RSI. First value at index `period`; 100 when the average
/// loss is zero, 0 when the average gain is zero with losses present.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period + 1 {
        return out;
    }

    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    for i in 1..=period {
        let delta = values[i] - values[i - 1];
        if delta >= 0.0 {
            sum_gain += delta;
        } else {
            sum_loss += -delta;
        }
    }

    let mut avg_gain = sum_gain / period as f64;
    let mut avg_loss = sum_loss / period as f64;
    out[period] = Some(rsi_from_avgs(avg_gain, avg_loss));

    for i in (period + 1)..values.len() {
        let delta = values[i] - values[i - 1];
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = Some(rsi_from_avgs(avg_gain, avg_loss));
    }

    out
}

pub fn rsi_at(values: &[f64], period: usize, index: usize) -> Option<f64> {
    if index >= values.len() {
        return None;
    }
    rsi(&values[..=index], period)[index]
}

pub struct BollingerBands {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
    /// (upper - lower) / middle, the squeeze measure.
    pub width: Vec<Option<f64>>,
}

/// Bands at middle +/- k * population standard deviation of the window.
pub fn bollinger(values: &[f64], period: usize, std_devs: f64) -> BollingerBands {
    let middle = sma(values, period);
    let mut upper = vec![None; values.len()];
    let mut lower = vec![None; values.len()];
    let mut width = vec![None; values.len()];

    if period == 0 || values.len() < period {
        return BollingerBands {
            upper,
            middle,
            lower,
            width,
        };
    }

    for i in (period - 1)..values.len() {
        let mean = match middle[i] {
            Some(mean) => mean,
            None => continue,
        };
        let window = &values[i + 1 - period..=i];
        let variance =
            window.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / period as f64;
        let deviation = variance.sqrt();
        let band_upper = mean + std_devs * deviation;
        let band_lower = mean - std_devs * deviation;
        upper[i] = Some(band_upper);
        lower[i] = Some(band_lower);
        if mean != 0.0 {
            width[i] = Some((band_upper - band_lower) / mean);
        }
    }

    BollingerBands {
        upper,
        middle,
        lower,
        width,
    }
}

fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    let mut out = Vec::with_capacity(candles.len().saturating_sub(1));
    for i in 1..candles.len() {
        let candle = &candles[i];
        let prev_close = candles[i - 1].close;
        let tr = (candle.high - candle.low)
            .max((candle.high - prev_close).abs())
            .max((candle.low - prev_close).abs());
        out.push(tr);
    }
    out
}

/// Wilder ATR, seeded with the simple mean of the first n true ranges.
/// First value at index `period`.
pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let n = candles.len();
    let mut out = vec![None; n];
    if period == 0 || n < period + 1 {
        return out;
    }

    let trs = true_ranges(candles);
    let seed: f64 = trs[..period].iter().sum::<f64>() / period as f64;
    out[period] = Some(seed);

    let mut prev = seed;
    for i in (period + 1)..n {
        // trs[i - 1] is the true range of candle i
        let next = (prev * (period as f64 - 1.0) + trs[i - 1]) / period as f64;
        out[i] = Some(next);
        prev = next;
    }

    out
}

pub fn atr_at(candles: &[Candle], period: usize, index: usize) -> Option<f64> {
    if index >= candles.len() {
        return None;
    }
    atr(&candles[..=index], period)[index]
}

/// Average Directional Index from Wilder-smoothed +DM/-DM and TR.
/// First value at index `2 * period - 1`.
pub fn adx(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let n = candles.len();
    let mut out = vec![None; n];
    if period == 0 || n < 2 * period {
        return out;
    }

    let trs = true_ranges(candles);
    let mut dm_plus = Vec::with_capacity(n - 1);
    let mut dm_minus = Vec::with_capacity(n - 1);
    for i in 1..n {
        let up_move = candles[i].high - candles[i - 1].high;
        let down_move = candles[i - 1].low - candles[i].low;
        dm_plus.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        dm_minus.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
    }

    // Wilder smoothing: seed with plain sums over the first window,
    // then smoothed = prev - prev/n + current.
    let mut tr_smooth: f64 = trs[..period].iter().sum();
    let mut plus_smooth: f64 = dm_plus[..period].iter().sum();
    let mut minus_smooth: f64 = dm_minus[..period].iter().sum();

    let mut dx_values: Vec<f64> = Vec::new();
    for i in period..n {
        if i > period {
            let j = i - 1;
            tr_smooth = tr_smooth - tr_smooth / period as f64 + trs[j];
            plus_smooth = plus_smooth - plus_smooth / period as f64 + dm_plus[j];
            minus_smooth = minus_smooth - minus_smooth / period as f64 + dm_minus[j];
        }

        let (di_plus, di_minus) = if tr_smooth > 0.0 {
            (
                plus_smooth / tr_smooth * 100.0,
                minus_smooth / tr_smooth * 100.0,
            )
        } else {
            (0.0, 0.0)
        };
        let di_sum = di_plus + di_minus;
        let dx = if di_sum > 0.0 {
            (di_plus - di_minus).abs() / di_sum * 100.0
        } else {
            0.0
        };
        dx_values.push(dx);

        // ADX is the Wilder average of DX, seeded once a full window
        // of DX values exists.
        if dx_values.len() == period {
            let seed = dx_values.iter().sum::<f64>() / period as f64;
            out[i] = Some(seed);
        } else if dx_values.len() > period {
            let prev = out[i - 1].expect("adx seeded at the previous index");
            out[i] = Some((prev * (period as f64 - 1.0) + dx) / period as f64);
        }
    }

    out
}

/// Indicator settings used to build aligned snapshot series.
#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub sma_fast_period: usize,
    pub sma_slow_period: usize,
    pub rsi_period: usize,
    pub atr_period: usize,
    pub bb_period: usize,
    pub bb_std_devs: f64,
    pub adx_period: usize,
    pub volume_period: usize,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            sma_fast_period: 20,
            sma_slow_period: 50,
            rsi_period: 14,
            atr_period: 14,
            bb_period: 20,
            bb_std_devs: 2.0,
            adx_period: 14,
            volume_period: 20,
        }
    }
}

impl SnapshotSettings {
    /// Candles needed before every field of a snapshot is populated.
    pub fn min_candles(&self) -> usize {
        [
            self.sma_fast_period,
            self.sma_slow_period,
            self.rsi_period + 1,
            self.atr_period + 1,
            self.bb_period,
            self.adx_period * 2,
            self.volume_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// Indicator values aligned to one candle index. `None` fields are not
/// yet available at that index. Snapshots for past indices are never
/// recomputed differently; the whole series derives from the candles.
#[derive(Debug, Clone, Default)]
pub struct IndicatorSnapshot {
    pub sma_fast: Option<f64>,
    pub sma_slow: Option<f64>,
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_width: Option<f64>,
    pub adx: Option<f64>,
    pub volume_sma: Option<f64>,
}

/// Builds the full snapshot series for a candle history in one pass.
pub fn build_snapshots(candles: &[Candle], settings: &SnapshotSettings) -> Vec<IndicatorSnapshot> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let sma_fast = sma(&closes, settings.sma_fast_period);
    let sma_slow = sma(&closes, settings.sma_slow_period);
    let rsi_series = rsi(&closes, settings.rsi_period);
    let atr_series = atr(candles, settings.atr_period);
    let bands = bollinger(&closes, settings.bb_period, settings.bb_std_devs);
    let adx_series = adx(candles, settings.adx_period);
    let volume_sma = sma(&volumes, settings.volume_period);

    (0..candles.len())
        .map(|i| IndicatorSnapshot {
            sma_fast: sma_fast[i],
            sma_slow: sma_slow[i],
            rsi: rsi_series[i],
            atr: atr_series[i],
            bb_upper: bands.upper[i],
            bb_middle: bands.middle[i],
            bb_lower: bands.lower[i],
            bb_width: bands.width[i],
            adx: adx_series[i],
            volume_sma: volume_sma[i],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candle(offset: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            timeframe: "15m".to_string(),
            open_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::minutes(offset * 15),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    // Deterministic wobble, no RNG allowed near the replay path.
    fn wavy_candles(count: usize) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                let base = 45_000.0 + (i as f64 * 0.7).sin() * 800.0 + i as f64 * 3.0;
                candle(
                    i as i64,
                    base - 20.0,
                    base + 150.0,
                    base - 150.0,
                    base,
                    1_000.0 + (i as f64 * 1.3).cos().abs() * 500.0,
                )
            })
            .collect()
    }

    #[test]
    fn sma_matches_manual_window_mean() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = sma(&values, 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert_eq!(out[2], Some(2.0));
        assert_eq!(out[4], Some(4.0));
    }

    #[test]
    fn sma_short_window_is_unavailable_not_zero() {
        let out = sma(&[100.0, 101.0, 102.0], 5);
        assert!(out.iter().all(|value| value.is_none()));
    }

    #[test]
    fn ema_is_seeded_with_sma_of_first_period() {
        let values = [10.0, 11.0, 12.0, 13.0, 14.0, 15.0];
        let out = ema(&values, 3);
        assert_eq!(out[2], Some(11.0));
        // Multiplier 0.5: 13 * 0.5 + 11 * 0.5
        assert_eq!(out[3], Some(12.0));
    }

    #[test]
    fn rsi_stays_within_bounds() {
        let candles = wavy_candles(120);
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        for value in rsi(&closes, 14).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn rsi_hits_boundaries_on_one_sided_series() {
        let rising: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let falling: Vec<f64> = (0..30).map(|i| 200.0 - i as f64).collect();
        assert_eq!(rsi(&rising, 14)[20], Some(100.0));
        assert_eq!(rsi(&falling, 14)[20], Some(0.0));
    }

    #[test]
    fn bollinger_bands_are_ordered_and_centered_on_sma() {
        let candles = wavy_candles(80);
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let bands = bollinger(&closes, 20, 2.0);
        let baseline = sma(&closes, 20);
        for i in 19..closes.len() {
            let (upper, middle, lower) = (
                bands.upper[i].unwrap(),
                bands.middle[i].unwrap(),
                bands.lower[i].unwrap(),
            );
            assert!(upper >= middle && middle >= lower);
            assert_eq!(Some(middle), baseline[i]);
        }
    }

    #[test]
    fn atr_is_nonnegative_and_gated_on_lookback() {
        let candles = wavy_candles(60);
        let out = atr(&candles, 14);
        for i in 0..14 {
            assert_eq!(out[i], None);
        }
        for value in out.into_iter().flatten() {
            assert!(value >= 0.0);
        }
    }

    #[test]
    fn atr_seed_is_mean_of_first_true_ranges() {
        // Constant 10-point range, no gaps: every TR is 10.
        let candles: Vec<Candle> = (0..20)
            .map(|i| candle(i, 100.0, 105.0, 95.0, 100.0, 1.0))
            .collect();
        let out = atr(&candles, 14);
        assert_eq!(out[14], Some(10.0));
        assert_eq!(out[19], Some(10.0));
    }

    #[test]
    fn point_accessors_match_the_full_series() {
        let candles = wavy_candles(60);
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        assert_eq!(rsi_at(&closes, 14, 40), rsi(&closes, 14)[40]);
        assert_eq!(atr_at(&candles, 14, 40), atr(&candles, 14)[40]);
        assert_eq!(rsi_at(&closes, 14, 5), None);
        assert_eq!(atr_at(&candles, 14, 200), None);
    }

    #[test]
    fn adx_is_bounded_and_gated() {
        let candles = wavy_candles(120);
        let out = adx(&candles, 14);
        for i in 0..27 {
            assert_eq!(out[i], None);
        }
        assert!(out[27].is_some());
        for value in out.into_iter().flatten() {
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn snapshots_align_with_candles_and_fill_after_warmup() {
        let candles = wavy_candles(120);
        let settings = SnapshotSettings::default();
        let snapshots = build_snapshots(&candles, &settings);
        assert_eq!(snapshots.len(), candles.len());

        let first = &snapshots[0];
        assert!(first.sma_slow.is_none() && first.adx.is_none());

        let warm = &snapshots[settings.min_candles()];
        assert!(warm.sma_fast.is_some());
        assert!(warm.sma_slow.is_some());
        assert!(warm.rsi.is_some());
        assert!(warm.atr.is_some());
        assert!(warm.bb_width.is_some());
        assert!(warm.adx.is_some());
        assert!(warm.volume_sma.is_some());
    }

    #[test]
    fn snapshot_series_is_deterministic() {
        let candles = wavy_candles(90);
        let settings = SnapshotSettings::default();
        let first = build_snapshots(&candles, &settings);
        let second = build_snapshots(&candles, &settings);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.sma_fast, b.sma_fast);
            assert_eq!(a.adx, b.adx);
            assert_eq!(a.bb_width, b.bb_width);
        }
    }
}
