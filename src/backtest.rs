use crate::candle_utils::validate_series;
use crate::config::{BacktestConfig, RiskConfig};
use crate::error::{CoreError, ReplayError};
use crate::models::{
    BacktestResult, Candle, EquityPoint, ExitReason, Side, SignalAction, StrategySignal, Trade,
};
use crate::performance::PerformanceCalculator;
use crate::risk::RiskManager;
use crate::strategy::StrategyConfig;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, checked once per candle. A cancelled
/// run publishes nothing.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct OpenPosition {
    trade: Trade,
    stop_loss: f64,
    take_profit: f64,
}

/// Exit check for one open position on one candle, in fixed priority
/// order: stop, then target, then an opposing signal. Stop and target
/// fill at the trigger level, never the candle extreme; the opposing
/// signal fills at the candle close.
pub(crate) fn exit_for_candle(
    side: Side,
    stop_loss: f64,
    take_profit: f64,
    candle: &Candle,
    signal: &StrategySignal,
) -> Option<(f64, ExitReason)> {
    match side {
        Side::Buy => {
            if candle.low <= stop_loss {
                return Some((stop_loss, ExitReason::StopLoss));
            }
            if candle.high >= take_profit {
                return Some((take_profit, ExitReason::TakeProfit));
            }
            if signal.action == SignalAction::Sell {
                return Some((candle.close, ExitReason::Signal));
            }
        }
        Side::Sell => {
            if candle.high >= stop_loss {
                return Some((stop_loss, ExitReason::StopLoss));
            }
            if candle.low <= take_profit {
                return Some((take_profit, ExitReason::TakeProfit));
            }
            if signal.action == SignalAction::Buy {
                return Some((candle.close, ExitReason::Signal));
            }
        }
    }
    None
}

/// Replays one strategy over one symbol's history, candle by candle.
/// Identical (candles, config) always produce an identical result: the
/// simulation path reads no clock and no randomness source.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    fn entry_fill_price(&self, close: f64, side: Side) -> f64 {
        close * (1.0 + side.sign() * self.config.slippage_rate)
    }

    fn exit_fill_price(&self, close: f64, side: Side) -> f64 {
        close * (1.0 - side.sign() * self.config.slippage_rate)
    }

    fn equity(&self, cash: f64, open: &[OpenPosition], close: f64) -> f64 {
        cash + open
            .iter()
            .map(|p| p.trade.side.sign() * p.trade.quantity * close)
            .sum::<f64>()
    }

    /// Applies an exit to the cash ledger and the trade log.
    fn settle_exit(
        &self,
        mut position: OpenPosition,
        exit_price: f64,
        exit_time: chrono::DateTime<chrono::Utc>,
        reason: ExitReason,
        cash: &mut f64,
        risk: &mut RiskManager,
        trades: &mut Vec<Trade>,
    ) {
        let proceeds = position.trade.quantity * exit_price;
        let commission = proceeds * self.config.commission_rate;
        match position.trade.side {
            Side::Buy => *cash += proceeds - commission,
            Side::Sell => *cash -= proceeds + commission,
        }
        position.trade.close(exit_price, exit_time, reason, commission);
        let pnl = position.trade.pnl.unwrap_or(0.0);
        risk.record_exit(exit_time, *cash, pnl);
        trades.push(position.trade);
    }

    pub fn run(
        &self,
        strategy_id: &str,
        strategy: &StrategyConfig,
        risk_config: &RiskConfig,
        candles: &[Candle],
        cancel: &CancelToken,
    ) -> Result<BacktestResult, CoreError> {
        strategy.validate()?;
        let mut risk = RiskManager::new(risk_config.clone())?;
        validate_series(candles)?;

        let window: Vec<Candle> = candles
            .iter()
            .filter(|c| c.open_time >= self.config.start_date && c.open_time <= self.config.end_date)
            .cloned()
            .collect();
        if window.is_empty() {
            return Err(ReplayError::EmptyRange.into());
        }

        let snapshots = crate::indicators::build_snapshots(&window, &strategy.snapshot_settings());

        let mut cash = self.config.initial_capital;
        let mut open: Vec<OpenPosition> = Vec::new();
        let mut trades: Vec<Trade> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(window.len());

        for (i, candle) in window.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ReplayError::Cancelled.into());
            }

            let signal = strategy.evaluate(&snapshots, &window, i);
            let open_at_start = !open.is_empty();

            // OPEN state: exits only, first match wins per position.
            if open_at_start {
                let mut still_open = Vec::with_capacity(open.len());
                for position in open.drain(..) {
                    match exit_for_candle(
                        position.trade.side,
                        position.stop_loss,
                        position.take_profit,
                        candle,
                        &signal,
                    ) {
                        Some((trigger_price, reason)) => {
                            let exit_price = if reason == ExitReason::Signal {
                                self.exit_fill_price(trigger_price, position.trade.side)
                            } else {
                                trigger_price
                            };
                            self.settle_exit(
                                position,
                                exit_price,
                                candle.open_time,
                                reason,
                                &mut cash,
                                &mut risk,
                                &mut trades,
                            );
                        }
                        None => still_open.push(position),
                    }
                }
                open = still_open;
            }

            // FLAT state (or same-side adds in multi-position mode):
            // hand the signal to the risk manager.
            let may_enter = signal.is_tradable()
                && (open.len() as u32) < self.config.max_positions
                && (!open_at_start
                    || (self.config.max_positions > 1
                        && open.iter().all(|p| {
                            p.trade.side
                                == match signal.action {
                                    SignalAction::Buy => Side::Buy,
                                    _ => Side::Sell,
                                }
                        })));
            if may_enter {
                self.try_enter(
                    strategy_id,
                    &signal,
                    &snapshots[i],
                    candle,
                    &mut cash,
                    &mut open,
                    &mut risk,
                );
            }

            // Force-close anything still open on the final candle so
            // the run ends with fully realized equity.
            if i == window.len() - 1 {
                for position in open.drain(..) {
                    let exit_price = self.exit_fill_price(candle.close, position.trade.side);
                    self.settle_exit(
                        position,
                        exit_price,
                        candle.open_time,
                        ExitReason::EndOfData,
                        &mut cash,
                        &mut risk,
                        &mut trades,
                    );
                }
            }

            equity_curve.push(EquityPoint {
                time: candle.open_time,
                equity: self.equity(cash, &open, candle.close),
            });
        }

        let final_capital = cash;
        let performance = PerformanceCalculator::calculate(
            &trades,
            &equity_curve,
            self.config.initial_capital,
            final_capital,
            self.config.start_date,
            self.config.end_date,
        );

        Ok(BacktestResult {
            strategy_id: strategy_id.to_string(),
            symbol: self.config.symbol.clone(),
            timeframe: self.config.timeframe.clone(),
            start_date: self.config.start_date,
            end_date: self.config.end_date,
            initial_capital: self.config.initial_capital,
            final_capital,
            performance,
            equity_curve,
            trades,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn try_enter(
        &self,
        strategy_id: &str,
        signal: &StrategySignal,
        snapshot: &crate::indicators::IndicatorSnapshot,
        candle: &Candle,
        cash: &mut f64,
        open: &mut Vec<OpenPosition>,
        risk: &mut RiskManager,
    ) {
        let Some(atr) = snapshot.atr else {
            // Not enough history for protective levels; no entry.
            return;
        };

        let side = match signal.action {
            SignalAction::Buy => Side::Buy,
            SignalAction::Sell => Side::Sell,
            SignalAction::Hold => return,
        };
        let fill = self.entry_fill_price(candle.close, side);
        let equity = self.equity(*cash, open, candle.close);

        let decision = match risk.evaluate_entry(
            candle.open_time,
            equity,
            signal.action,
            signal.strength,
            fill,
            atr,
        ) {
            Ok(decision) => decision,
            Err(rejection) => {
                debug!(
                    "{} entry rejected at {}: {}",
                    candle.symbol, candle.open_time, rejection
                );
                return;
            }
        };

        let (stop_loss, take_profit) = if self.config.use_atr_stops {
            (decision.stop_loss, decision.take_profit)
        } else {
            match side {
                Side::Buy => (
                    fill * (1.0 - self.config.stop_loss_pct),
                    fill * (1.0 + self.config.take_profit_pct),
                ),
                Side::Sell => (
                    fill * (1.0 + self.config.stop_loss_pct),
                    fill * (1.0 - self.config.take_profit_pct),
                ),
            }
        };

        let notional = decision.quantity * fill;
        let commission = notional * self.config.commission_rate;
        let required = match side {
            Side::Buy => notional + commission,
            Side::Sell => commission,
        };
        if required > *cash {
            debug!(
                "{} entry skipped at {}: requires {:.2}, cash {:.2}",
                candle.symbol, candle.open_time, required, cash
            );
            return;
        }

        match side {
            Side::Buy => *cash -= notional + commission,
            Side::Sell => *cash += notional - commission,
        }

        open.push(OpenPosition {
            trade: Trade {
                symbol: candle.symbol.clone(),
                strategy_id: strategy_id.to_string(),
                side,
                entry_time: candle.open_time,
                entry_price: fill,
                quantity: decision.quantity,
                exit_time: None,
                exit_price: None,
                exit_reason: None,
                commission,
                pnl: None,
                pnl_percent: None,
            },
            stop_loss,
            take_profit,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeanReversionParams;
    use crate::strategy::StrategyKind;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn candle(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            timeframe: "1h".to_string(),
            open_time: start() + Duration::hours(i as i64),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn flat_series(count: usize) -> Vec<Candle> {
        (0..count)
            .map(|i| candle(i, 100.0, 100.5, 99.5, 100.0, 1_000.0))
            .collect()
    }

    /// Steady decline pushing RSI to the floor, then a volume spike
    /// that satisfies the mean-reversion entry filter.
    fn declining_series_with_spike(count: usize, spike_at: usize) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                let close = 200.0 - i as f64;
                let volume = if i == spike_at { 3_000.0 } else { 1_000.0 };
                candle(i, close + 0.5, close + 1.0, close - 1.0, close, volume)
            })
            .collect()
    }

    fn config_for(candles: &[Candle]) -> BacktestConfig {
        let mut config = BacktestConfig::new(
            "BTCUSDT",
            "1h",
            candles.first().unwrap().open_time,
            candles.last().unwrap().open_time + Duration::hours(1),
            10_000.0,
        );
        config.commission_rate = 0.0;
        config
    }

    fn reversion_strategy() -> StrategyConfig {
        StrategyConfig::MeanReversion(MeanReversionParams::default())
    }

    #[test]
    fn exit_priority_is_stop_then_target_then_signal() {
        let wide = candle(0, 100.0, 120.0, 80.0, 100.0, 1.0);
        // Both stop and target are inside the candle range: stop wins.
        let exit = exit_for_candle(Side::Buy, 90.0, 110.0, &wide, &StrategySignal::sell(1.0));
        assert_eq!(exit, Some((90.0, ExitReason::StopLoss)));

        let above = candle(0, 100.0, 120.0, 95.0, 100.0, 1.0);
        let exit = exit_for_candle(Side::Buy, 90.0, 110.0, &above, &StrategySignal::hold());
        assert_eq!(exit, Some((110.0, ExitReason::TakeProfit)));

        let quiet = candle(0, 100.0, 101.0, 99.0, 100.5, 1.0);
        let exit = exit_for_candle(Side::Buy, 90.0, 110.0, &quiet, &StrategySignal::sell(1.0));
        assert_eq!(exit, Some((100.5, ExitReason::Signal)));

        let exit = exit_for_candle(Side::Buy, 90.0, 110.0, &quiet, &StrategySignal::hold());
        assert_eq!(exit, None);
    }

    #[test]
    fn stop_fills_at_the_stop_level_not_the_candle_low() {
        // Stop at 44000; the candle trades down to 43900.
        let breach = candle(0, 44_500.0, 44_600.0, 43_900.0, 44_100.0, 1.0);
        let exit = exit_for_candle(
            Side::Buy,
            44_000.0,
            48_000.0,
            &breach,
            &StrategySignal::hold(),
        );
        assert_eq!(exit, Some((44_000.0, ExitReason::StopLoss)));
    }

    #[test]
    fn short_exits_are_mirrored() {
        let spike = candle(0, 100.0, 112.0, 99.0, 105.0, 1.0);
        let exit = exit_for_candle(Side::Sell, 110.0, 90.0, &spike, &StrategySignal::hold());
        assert_eq!(exit, Some((110.0, ExitReason::StopLoss)));

        let slide = candle(0, 100.0, 101.0, 88.0, 92.0, 1.0);
        let exit = exit_for_candle(Side::Sell, 110.0, 90.0, &slide, &StrategySignal::hold());
        assert_eq!(exit, Some((90.0, ExitReason::TakeProfit)));
    }

    #[test]
    fn flat_market_produces_no_trades_and_preserves_capital() {
        let candles = flat_series(80);
        let engine = BacktestEngine::new(config_for(&candles)).unwrap();
        let result = engine
            .run(
                "s1",
                &reversion_strategy(),
                &RiskConfig::default(),
                &candles,
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(result.performance.total_trades, 0);
        assert_eq!(result.final_capital, result.initial_capital);
        assert_eq!(result.performance.profit_factor, 0.0);
        assert_eq!(result.equity_curve.len(), candles.len());
    }

    #[test]
    fn stop_loss_round_trip_settles_at_the_stop_price() {
        let mut candles = declining_series_with_spike(42, 40);
        // Candle after the entry breaches the ATR stop (entry 160,
        // ATR 2, stop 156) without reaching it at the close.
        candles.push(candle(42, 158.0, 158.0, 150.0, 155.0, 1_000.0));

        let engine = BacktestEngine::new(config_for(&candles)).unwrap();
        let result = engine
            .run(
                "s1",
                &reversion_strategy(),
                &RiskConfig::default(),
                &candles,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(result.performance.total_trades, 1);
        let trade = &result.trades[0];
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.entry_price, 160.0);
        assert_eq!(trade.exit_reason, Some(ExitReason::StopLoss));
        // Fills at the stop level (156), not the candle low (150).
        assert_eq!(trade.exit_price, Some(156.0));
    }

    #[test]
    fn ledger_identity_holds_with_commission() {
        let mut candles = declining_series_with_spike(42, 40);
        candles.push(candle(42, 158.0, 158.0, 150.0, 155.0, 1_000.0));

        let mut config = config_for(&candles);
        config.commission_rate = 0.001;
        let engine = BacktestEngine::new(config).unwrap();
        let result = engine
            .run(
                "s1",
                &reversion_strategy(),
                &RiskConfig::default(),
                &candles,
                &CancelToken::new(),
            )
            .unwrap();

        let pnl_sum: f64 = result.trades.iter().filter_map(|t| t.pnl).sum();
        let commission_sum: f64 = result.trades.iter().map(|t| t.commission).sum();
        let expected = result.initial_capital + pnl_sum - commission_sum;
        assert!((result.final_capital - expected).abs() < 1e-9);
    }

    #[test]
    fn still_open_position_is_force_closed_at_last_close() {
        // Entry fires on the last spike candle's predecessor window;
        // nothing breaches the stop afterwards, so the run must close
        // the position at the end.
        let candles = declining_series_with_spike(42, 40);
        let engine = BacktestEngine::new(config_for(&candles)).unwrap();
        let result = engine
            .run(
                "s1",
                &reversion_strategy(),
                &RiskConfig::default(),
                &candles,
                &CancelToken::new(),
            )
            .unwrap();

        assert!(result.performance.total_trades >= 1);
        let last = result.trades.last().unwrap();
        assert_eq!(last.exit_reason, Some(ExitReason::EndOfData));
        assert_eq!(last.exit_price, Some(candles.last().unwrap().close));
        let final_point = result.equity_curve.last().unwrap();
        assert!((final_point.equity - result.final_capital).abs() < 1e-9);
    }

    #[test]
    fn replay_is_deterministic() {
        let mut candles = declining_series_with_spike(42, 40);
        candles.push(candle(42, 158.0, 158.0, 150.0, 155.0, 1_000.0));
        let engine = BacktestEngine::new(config_for(&candles)).unwrap();

        let run = || {
            engine
                .run(
                    "s1",
                    &reversion_strategy(),
                    &RiskConfig::default(),
                    &candles,
                    &CancelToken::new(),
                )
                .unwrap()
        };
        let first = serde_json::to_string(&run()).unwrap();
        let second = serde_json::to_string(&run()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_range_fails_without_partial_result() {
        let candles = flat_series(50);
        let mut config = config_for(&candles);
        config.start_date = start() + Duration::days(30);
        config.end_date = start() + Duration::days(31);
        let engine = BacktestEngine::new(config).unwrap();
        let result = engine.run(
            "s1",
            &reversion_strategy(),
            &RiskConfig::default(),
            &candles,
            &CancelToken::new(),
        );
        assert!(matches!(
            result,
            Err(CoreError::Replay(ReplayError::EmptyRange))
        ));
    }

    #[test]
    fn cancelled_run_reports_cancellation() {
        let candles = flat_series(50);
        let engine = BacktestEngine::new(config_for(&candles)).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = engine.run(
            "s1",
            &reversion_strategy(),
            &RiskConfig::default(),
            &candles,
            &cancel,
        );
        assert!(matches!(
            result,
            Err(CoreError::Replay(ReplayError::Cancelled))
        ));
    }

    #[test]
    fn out_of_order_candles_are_a_data_gap() {
        let mut candles = flat_series(50);
        candles.swap(10, 20);
        let engine = BacktestEngine::new(config_for(&candles)).unwrap();
        let result = engine.run(
            "s1",
            &reversion_strategy(),
            &RiskConfig::default(),
            &candles,
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(CoreError::DataGap { .. })));
    }
}
