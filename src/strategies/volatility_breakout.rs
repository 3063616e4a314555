use crate::config::VolatilityBreakoutParams;
use crate::indicators::IndicatorSnapshot;
use crate::models::{Candle, StrategySignal};

/// Returns true when band width dipped below the squeeze threshold on
/// any of the `lookback` candles before `index`. Derived from the
/// snapshot history each call; there is no squeeze counter.
fn squeezed_recently(
    snapshots: &[IndicatorSnapshot],
    index: usize,
    lookback: usize,
    threshold: f64,
) -> bool {
    let start = index.saturating_sub(lookback);
    snapshots[start..index]
        .iter()
        .any(|snapshot| matches!(snapshot.bb_width, Some(width) if width < threshold))
}

/// Bollinger breakout out of a squeeze: a close beyond a band only
/// counts within `squeeze_lookback` candles of a low-width reading.
pub fn evaluate(
    snapshots: &[IndicatorSnapshot],
    candles: &[Candle],
    index: usize,
    params: &VolatilityBreakoutParams,
) -> StrategySignal {
    let current = &snapshots[index];
    let (Some(upper), Some(lower)) = (current.bb_upper, current.bb_lower) else {
        return StrategySignal::hold();
    };

    if !squeezed_recently(
        snapshots,
        index,
        params.squeeze_lookback,
        params.squeeze_threshold,
    ) {
        return StrategySignal::hold();
    }

    let close = candles[index].close;
    let band_span = upper - lower;
    if band_span <= 0.0 {
        return StrategySignal::hold();
    }

    if close > upper {
        let strength = ((close - upper) / band_span + 0.5).min(1.0);
        StrategySignal::buy(strength)
    } else if close < lower {
        let strength = ((lower - close) / band_span + 0.5).min(1.0);
        StrategySignal::sell(strength)
    } else {
        StrategySignal::hold()
    }
}
