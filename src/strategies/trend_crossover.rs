use crate::config::TrendCrossoverParams;
use crate::indicators::IndicatorSnapshot;
use crate::models::{Candle, StrategySignal};

/// Fast/slow SMA crossover gated by trend strength.
///
/// A cross requires the fast average at or below the slow one on the
/// prior candle and strictly beyond it on this candle; touching the
/// slow average without crossing it is not a cross.
pub fn evaluate(
    snapshots: &[IndicatorSnapshot],
    _candles: &[Candle],
    index: usize,
    params: &TrendCrossoverParams,
) -> StrategySignal {
    if index == 0 {
        return StrategySignal::hold();
    }

    let current = &snapshots[index];
    let previous = &snapshots[index - 1];
    let (Some(fast), Some(slow), Some(prev_fast), Some(prev_slow), Some(adx)) = (
        current.sma_fast,
        current.sma_slow,
        previous.sma_fast,
        previous.sma_slow,
        current.adx,
    ) else {
        return StrategySignal::hold();
    };

    if adx <= params.adx_threshold {
        return StrategySignal::hold();
    }

    let crossed_up = prev_fast <= prev_slow && fast > slow;
    let crossed_down = prev_fast >= prev_slow && fast < slow;
    let strength = ((adx - params.adx_threshold) / 50.0 + 0.5).min(1.0);

    if crossed_up {
        StrategySignal::buy(strength)
    } else if crossed_down {
        StrategySignal::sell(strength)
    } else {
        StrategySignal::hold()
    }
}
