use crate::error::CoreError;
use crate::models::Candle;
use std::collections::HashMap;

/// Checks the feed contract for one symbol's series: strictly
/// increasing open_time, no duplicates. Violations are data gaps and
/// skip that symbol's cycle, not the whole scan.
pub fn validate_series(candles: &[Candle]) -> Result<(), CoreError> {
    for pair in candles.windows(2) {
        if pair[1].open_time <= pair[0].open_time {
            return Err(CoreError::data_gap(
                pair[1].symbol.clone(),
                format!(
                    "non-monotonic open_time: {} then {}",
                    pair[0].open_time, pair[1].open_time
                ),
            ));
        }
    }
    Ok(())
}

/// Groups candles by symbol, each group sorted by open_time.
pub fn group_by_symbol(candles: &[Candle]) -> HashMap<String, Vec<Candle>> {
    let mut grouped: HashMap<String, Vec<Candle>> = HashMap::new();
    for candle in candles {
        grouped
            .entry(candle.symbol.clone())
            .or_default()
            .push(candle.clone());
    }
    for series in grouped.values_mut() {
        series.sort_by(|a, b| a.open_time.cmp(&b.open_time));
    }
    grouped
}

/// Candles per 24h for a timeframe label; None for unknown labels.
pub fn candles_per_day(timeframe: &str) -> Option<usize> {
    match timeframe.trim().to_lowercase().as_str() {
        "1m" => Some(1440),
        "5m" => Some(288),
        "15m" => Some(96),
        "30m" => Some(48),
        "1h" => Some(24),
        "4h" => Some(6),
        "1d" => Some(1),
        _ => None,
    }
}

/// Quote volume (close * base volume) summed over the trailing 24h
/// window; used as the scanner's ranking tie-breaker.
pub fn trailing_quote_volume_24h(candles: &[Candle]) -> f64 {
    let Some(last) = candles.last() else {
        return 0.0;
    };
    let window = candles_per_day(&last.timeframe).unwrap_or(1);
    candles
        .iter()
        .rev()
        .take(window)
        .map(|c| c.close * c.volume)
        .sum()
}

pub fn normalize_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}
