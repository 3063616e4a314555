use crate::config::MeanReversionParams;
use crate::indicators::IndicatorSnapshot;
use crate::models::{Candle, StrategySignal};

/// RSI reversion with a volume filter: extremes only count when the
/// candle traded meaningfully above its average volume.
pub fn evaluate(
    snapshots: &[IndicatorSnapshot],
    candles: &[Candle],
    index: usize,
    params: &MeanReversionParams,
) -> StrategySignal {
    let current = &snapshots[index];
    let (Some(rsi), Some(volume_sma)) = (current.rsi, current.volume_sma) else {
        return StrategySignal::hold();
    };

    let volume = candles[index].volume;
    if volume_sma <= 0.0 || volume <= volume_sma * params.volume_multiplier {
        return StrategySignal::hold();
    }

    if rsi < params.oversold_level {
        let strength = ((params.oversold_level - rsi) / params.oversold_level + 0.5).min(1.0);
        return StrategySignal::buy(strength);
    }

    if rsi > params.overbought_level {
        let strength = ((rsi - params.overbought_level) / (100.0 - params.overbought_level) + 0.5)
            .min(1.0);
        return StrategySignal::sell(strength);
    }

    StrategySignal::hold()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalAction;
    use chrono::{Duration, TimeZone, Utc};

    fn snapshot(rsi: f64, volume_sma: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi: Some(rsi),
            volume_sma: Some(volume_sma),
            ..Default::default()
        }
    }

    fn candle_with_volume(volume: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            timeframe: "15m".to_string(),
            open_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(15),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.0,
            volume,
        }
    }

    #[test]
    fn oversold_with_volume_surge_buys() {
        // RSI 25 under the 30 floor, volume at twice the 20-period
        // average against a 1.5x multiplier.
        let snapshots = vec![snapshot(25.0, 1_000.0)];
        let candles = vec![candle_with_volume(2_000.0)];
        let signal = evaluate(&snapshots, &candles, 0, &MeanReversionParams::default());
        assert_eq!(signal.action, SignalAction::Buy);
        assert!(signal.strength > 0.5);
    }

    #[test]
    fn oversold_without_volume_is_held() {
        let snapshots = vec![snapshot(25.0, 1_000.0)];
        let candles = vec![candle_with_volume(1_200.0)];
        let signal = evaluate(&snapshots, &candles, 0, &MeanReversionParams::default());
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[test]
    fn overbought_with_volume_sells() {
        let snapshots = vec![snapshot(80.0, 1_000.0)];
        let candles = vec![candle_with_volume(2_000.0)];
        let signal = evaluate(&snapshots, &candles, 0, &MeanReversionParams::default());
        assert_eq!(signal.action, SignalAction::Sell);
    }

    #[test]
    fn neutral_rsi_is_held_even_on_volume() {
        let snapshots = vec![snapshot(50.0, 1_000.0)];
        let candles = vec![candle_with_volume(5_000.0)];
        let signal = evaluate(&snapshots, &candles, 0, &MeanReversionParams::default());
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[test]
    fn missing_rsi_is_held() {
        let snapshots = vec![IndicatorSnapshot {
            volume_sma: Some(1_000.0),
            ..Default::default()
        }];
        let candles = vec![candle_with_volume(5_000.0)];
        let signal = evaluate(&snapshots, &candles, 0, &MeanReversionParams::default());
        assert_eq!(signal.action, SignalAction::Hold);
    }
}
