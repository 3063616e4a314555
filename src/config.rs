use crate::error::CoreError;
use crate::indicators::SnapshotSettings;
use crate::strategy::StrategyKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn require_positive(value: f64, name: &str) -> Result<(), CoreError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(CoreError::configuration(format!(
            "{} must be a positive number (value: {})",
            name, value
        )));
    }
    Ok(())
}

fn require_rate(value: f64, name: &str) -> Result<(), CoreError> {
    if !value.is_finite() || !(0.0..1.0).contains(&value) {
        return Err(CoreError::configuration(format!(
            "{} must be in [0, 1) (value: {})",
            name, value
        )));
    }
    Ok(())
}

fn require_period(value: usize, name: &str) -> Result<(), CoreError> {
    if value == 0 {
        return Err(CoreError::configuration(format!(
            "{} must be a positive period",
            name
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendCrossoverParams {
    pub fast_period: usize,
    pub slow_period: usize,
    pub adx_period: usize,
    pub adx_threshold: f64,
}

impl Default for TrendCrossoverParams {
    fn default() -> Self {
        Self {
            fast_period: 20,
            slow_period: 50,
            adx_period: 14,
            adx_threshold: 20.0,
        }
    }
}

impl TrendCrossoverParams {
    pub fn validate(&self) -> Result<(), CoreError> {
        require_period(self.fast_period, "fastPeriod")?;
        require_period(self.slow_period, "slowPeriod")?;
        require_period(self.adx_period, "adxPeriod")?;
        if self.fast_period >= self.slow_period {
            return Err(CoreError::configuration(format!(
                "fastPeriod ({}) must be shorter than slowPeriod ({})",
                self.fast_period, self.slow_period
            )));
        }
        require_positive(self.adx_threshold, "adxThreshold")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeanReversionParams {
    pub rsi_period: usize,
    pub oversold_level: f64,
    pub overbought_level: f64,
    pub volume_period: usize,
    pub volume_multiplier: f64,
}

impl Default for MeanReversionParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            oversold_level: 30.0,
            overbought_level: 70.0,
            volume_period: 20,
            volume_multiplier: 1.5,
        }
    }
}

impl MeanReversionParams {
    pub fn validate(&self) -> Result<(), CoreError> {
        require_period(self.rsi_period, "rsiPeriod")?;
        require_period(self.volume_period, "volumePeriod")?;
        require_positive(self.volume_multiplier, "volumeMultiplier")?;
        if !(0.0..100.0).contains(&self.oversold_level)
            || !(0.0..=100.0).contains(&self.overbought_level)
            || self.oversold_level >= self.overbought_level
        {
            return Err(CoreError::configuration(format!(
                "RSI levels must satisfy 0 <= oversold ({}) < overbought ({}) <= 100",
                self.oversold_level, self.overbought_level
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolatilityBreakoutParams {
    pub bb_period: usize,
    pub bb_std_devs: f64,
    /// Band width below this flags a squeeze.
    pub squeeze_threshold: f64,
    /// A breakout counts only within this many candles of a squeeze.
    pub squeeze_lookback: usize,
}

impl Default for VolatilityBreakoutParams {
    fn default() -> Self {
        Self {
            bb_period: 20,
            bb_std_devs: 2.0,
            squeeze_threshold: 0.06,
            squeeze_lookback: 10,
        }
    }
}

impl VolatilityBreakoutParams {
    pub fn validate(&self) -> Result<(), CoreError> {
        require_period(self.bb_period, "bbPeriod")?;
        require_period(self.squeeze_lookback, "squeezeLookback")?;
        require_positive(self.bb_std_devs, "bbStdDevs")?;
        require_positive(self.squeeze_threshold, "squeezeThreshold")
    }
}

/// Risk thresholds are product defaults, not invariants; every field is
/// overridable per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskConfig {
    pub stop_multiplier: f64,
    pub target_multiplier: f64,
    pub max_position_fraction: f64,
    pub kelly_fraction: f64,
    pub min_trade_notional: f64,
    /// Minimum tradable quantity increment; quantities are floored to it.
    pub quantity_increment: f64,
    pub daily_loss_limit_pct: f64,
    pub max_consecutive_losses: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stop_multiplier: 2.0,
            target_multiplier: 3.0,
            max_position_fraction: 0.10,
            kelly_fraction: 0.25,
            min_trade_notional: 10.0,
            quantity_increment: 1e-6,
            daily_loss_limit_pct: 0.05,
            max_consecutive_losses: 3,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        require_positive(self.stop_multiplier, "stopMultiplier")?;
        require_positive(self.target_multiplier, "targetMultiplier")?;
        require_rate(self.max_position_fraction, "maxPositionFraction")?;
        require_rate(self.kelly_fraction, "kellyFraction")?;
        require_positive(self.min_trade_notional, "minTradeNotional")?;
        require_positive(self.quantity_increment, "quantityIncrement")?;
        require_rate(self.daily_loss_limit_pct, "dailyLossLimitPct")?;
        if self.max_consecutive_losses == 0 {
            return Err(CoreError::configuration(
                "maxConsecutiveLosses must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestConfig {
    pub symbol: String,
    pub timeframe: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub slippage_rate: f64,
    /// Concurrent open positions per (symbol, strategy); 1 is the
    /// single-position state machine.
    pub max_positions: u32,
    /// ATR-based stops from the risk manager when true; fixed-percent
    /// stops otherwise.
    pub use_atr_stops: bool,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl BacktestConfig {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        initial_capital: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            start_date,
            end_date,
            initial_capital,
            commission_rate: 0.001,
            slippage_rate: 0.0,
            max_positions: 1,
            use_atr_stops: true,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.symbol.trim().is_empty() {
            return Err(CoreError::configuration("symbol must not be empty"));
        }
        if self.start_date >= self.end_date {
            return Err(CoreError::configuration(format!(
                "startDate ({}) must be before endDate ({})",
                self.start_date, self.end_date
            )));
        }
        require_positive(self.initial_capital, "initialCapital")?;
        require_rate(self.commission_rate, "commissionRate")?;
        require_rate(self.slippage_rate, "slippageRate")?;
        if self.max_positions == 0 {
            return Err(CoreError::configuration("maxPositions must be at least 1"));
        }
        if !self.use_atr_stops {
            require_rate(self.stop_loss_pct, "stopLossPct")?;
            require_rate(self.take_profit_pct, "takeProfitPct")?;
        }
        Ok(())
    }
}

/// Scoring weights and recommendation thresholds for the market
/// scanner. The shipped numbers are the product defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerConfig {
    pub trend_weight: f64,
    pub volatility_weight: f64,
    pub momentum_weight: f64,
    pub volume_weight: f64,
    /// trend_score above this recommends trend-crossover.
    pub trend_recommend_threshold: f64,
    /// volatility_score below this recommends volatility-breakout.
    pub volatility_recommend_threshold: f64,
    pub rsi_extreme_low: f64,
    pub rsi_extreme_high: f64,
    /// ATR/price ratio that maps to a volatility score of 1.0.
    pub volatility_reference: f64,
    pub top_n: usize,
    pub default_strategy: StrategyKind,
    pub snapshot: SnapshotSettingsConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            trend_weight: 0.30,
            volatility_weight: 0.20,
            momentum_weight: 0.25,
            volume_weight: 0.25,
            trend_recommend_threshold: 0.7,
            volatility_recommend_threshold: 0.3,
            rsi_extreme_low: 30.0,
            rsi_extreme_high: 70.0,
            volatility_reference: 0.05,
            top_n: 10,
            default_strategy: StrategyKind::TrendCrossover,
            snapshot: SnapshotSettingsConfig::default(),
        }
    }
}

impl ScannerConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        for (value, name) in [
            (self.trend_weight, "trendWeight"),
            (self.volatility_weight, "volatilityWeight"),
            (self.momentum_weight, "momentumWeight"),
            (self.volume_weight, "volumeWeight"),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::configuration(format!(
                    "{} must be non-negative (value: {})",
                    name, value
                )));
            }
        }
        let total = self.trend_weight
            + self.volatility_weight
            + self.momentum_weight
            + self.volume_weight;
        if (total - 1.0).abs() > 1e-9 {
            return Err(CoreError::configuration(format!(
                "scanner weights must sum to 1.0 (sum: {})",
                total
            )));
        }
        require_positive(self.volatility_reference, "volatilityReference")?;
        if self.top_n == 0 {
            return Err(CoreError::configuration("topN must be at least 1"));
        }
        Ok(())
    }
}

/// Serializable mirror of [`SnapshotSettings`] so scan configs travel
/// as plain records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSettingsConfig {
    pub sma_fast_period: usize,
    pub sma_slow_period: usize,
    pub rsi_period: usize,
    pub atr_period: usize,
    pub bb_period: usize,
    pub bb_std_devs: f64,
    pub adx_period: usize,
    pub volume_period: usize,
}

impl Default for SnapshotSettingsConfig {
    fn default() -> Self {
        let settings = SnapshotSettings::default();
        Self {
            sma_fast_period: settings.sma_fast_period,
            sma_slow_period: settings.sma_slow_period,
            rsi_period: settings.rsi_period,
            atr_period: settings.atr_period,
            bb_period: settings.bb_period,
            bb_std_devs: settings.bb_std_devs,
            adx_period: settings.adx_period,
            volume_period: settings.volume_period,
        }
    }
}

impl From<&SnapshotSettingsConfig> for SnapshotSettings {
    fn from(config: &SnapshotSettingsConfig) -> Self {
        Self {
            sma_fast_period: config.sma_fast_period,
            sma_slow_period: config.sma_slow_period,
            rsi_period: config.rsi_period,
            atr_period: config.atr_period,
            bb_period: config.bb_period,
            bb_std_devs: config.bb_std_devs,
            adx_period: config.adx_period,
            volume_period: config.volume_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_pass_validation() {
        TrendCrossoverParams::default().validate().unwrap();
        MeanReversionParams::default().validate().unwrap();
        VolatilityBreakoutParams::default().validate().unwrap();
        RiskConfig::default().validate().unwrap();
        ScannerConfig::default().validate().unwrap();
    }

    #[test]
    fn trend_params_reject_inverted_periods() {
        let params = TrendCrossoverParams {
            fast_period: 50,
            slow_period: 20,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn mean_reversion_rejects_crossed_levels() {
        let params = MeanReversionParams {
            oversold_level: 70.0,
            overbought_level: 30.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn backtest_config_rejects_bad_dates_and_capital() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let valid = BacktestConfig::new("BTCUSDT", "15m", start, end, 10_000.0);
        valid.validate().unwrap();

        let inverted = BacktestConfig::new("BTCUSDT", "15m", end, start, 10_000.0);
        assert!(inverted.validate().is_err());

        let broke = BacktestConfig::new("BTCUSDT", "15m", start, end, -5.0);
        assert!(broke.validate().is_err());

        let zero_period = BacktestConfig::new("BTCUSDT", "15m", start, start, 10_000.0);
        assert!(zero_period.validate().is_err());
    }

    #[test]
    fn scanner_weights_must_sum_to_one() {
        let config = ScannerConfig {
            trend_weight: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
