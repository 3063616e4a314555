use crate::config::{MeanReversionParams, TrendCrossoverParams, VolatilityBreakoutParams};
use crate::error::CoreError;
use crate::indicators::{IndicatorSnapshot, SnapshotSettings};
use crate::models::{Candle, StrategySignal};
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[path = "strategies/trend_crossover.rs"]
pub mod trend_crossover;

#[path = "strategies/mean_reversion.rs"]
pub mod mean_reversion;

#[path = "strategies/volatility_breakout.rs"]
pub mod volatility_breakout;

/// The closed set of strategies. Adding one means adding a variant
/// here and an arm in [`StrategyConfig::evaluate`], nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    TrendCrossover,
    MeanReversion,
    VolatilityBreakout,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::TrendCrossover => "trend_crossover",
            StrategyKind::MeanReversion => "mean_reversion",
            StrategyKind::VolatilityBreakout => "volatility_breakout",
        }
    }

    pub fn all() -> [StrategyKind; 3] {
        [
            StrategyKind::TrendCrossover,
            StrategyKind::MeanReversion,
            StrategyKind::VolatilityBreakout,
        ]
    }
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trend_crossover" | "sma_crossover" => Ok(StrategyKind::TrendCrossover),
            "mean_reversion" | "rsi_reversion" => Ok(StrategyKind::MeanReversion),
            "volatility_breakout" | "bb_breakout" => Ok(StrategyKind::VolatilityBreakout),
            other => Err(anyhow!("Unknown strategy type '{}'", other)),
        }
    }
}

/// Strategy selection plus its named parameters, as one tagged value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StrategyConfig {
    TrendCrossover(TrendCrossoverParams),
    MeanReversion(MeanReversionParams),
    VolatilityBreakout(VolatilityBreakoutParams),
}

impl StrategyConfig {
    pub fn default_for(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::TrendCrossover => {
                StrategyConfig::TrendCrossover(TrendCrossoverParams::default())
            }
            StrategyKind::MeanReversion => {
                StrategyConfig::MeanReversion(MeanReversionParams::default())
            }
            StrategyKind::VolatilityBreakout => {
                StrategyConfig::VolatilityBreakout(VolatilityBreakoutParams::default())
            }
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyConfig::TrendCrossover(_) => StrategyKind::TrendCrossover,
            StrategyConfig::MeanReversion(_) => StrategyKind::MeanReversion,
            StrategyConfig::VolatilityBreakout(_) => StrategyKind::VolatilityBreakout,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            StrategyConfig::TrendCrossover(params) => params.validate(),
            StrategyConfig::MeanReversion(params) => params.validate(),
            StrategyConfig::VolatilityBreakout(params) => params.validate(),
        }
    }

    /// Indicator periods this strategy needs in its snapshot series.
    pub fn snapshot_settings(&self) -> SnapshotSettings {
        let mut settings = SnapshotSettings::default();
        match self {
            StrategyConfig::TrendCrossover(params) => {
                settings.sma_fast_period = params.fast_period;
                settings.sma_slow_period = params.slow_period;
                settings.adx_period = params.adx_period;
            }
            StrategyConfig::MeanReversion(params) => {
                settings.rsi_period = params.rsi_period;
                settings.volume_period = params.volume_period;
            }
            StrategyConfig::VolatilityBreakout(params) => {
                settings.bb_period = params.bb_period;
                settings.bb_std_devs = params.bb_std_devs;
            }
        }
        settings
    }

    pub fn min_candles(&self) -> usize {
        self.snapshot_settings().min_candles()
    }

    /// Single dispatch point: evaluates the strategy at one candle
    /// index against the aligned snapshot history. Pure; any squeeze
    /// or crossover memory is derived from the history itself.
    pub fn evaluate(
        &self,
        snapshots: &[IndicatorSnapshot],
        candles: &[Candle],
        index: usize,
    ) -> StrategySignal {
        if index >= snapshots.len() || snapshots.len() != candles.len() {
            return StrategySignal::hold();
        }
        match self {
            StrategyConfig::TrendCrossover(params) => {
                trend_crossover::evaluate(snapshots, candles, index, params)
            }
            StrategyConfig::MeanReversion(params) => {
                mean_reversion::evaluate(snapshots, candles, index, params)
            }
            StrategyConfig::VolatilityBreakout(params) => {
                volatility_breakout::evaluate(snapshots, candles, index, params)
            }
        }
    }
}
