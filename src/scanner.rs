use crate::candle_utils::{trailing_quote_volume_24h, validate_series};
use crate::config::ScannerConfig;
use crate::error::CoreError;
use crate::indicators::{build_snapshots, SnapshotSettings};
use crate::models::Candle;
use crate::strategy::StrategyKind;
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One ranked scan row. Sub-scores are normalized to [0, 1] before
/// weighting so the composite is comparable across symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolScore {
    pub symbol: String,
    pub score: f64,
    pub trend_score: f64,
    pub volatility_score: f64,
    pub momentum_score: f64,
    pub volume_score: f64,
    pub rsi: f64,
    pub quote_volume_24h: f64,
    pub recommended_strategy: StrategyKind,
}

fn score_symbol(
    symbol: &str,
    candles: &[Candle],
    config: &ScannerConfig,
) -> Result<SymbolScore, CoreError> {
    validate_series(candles)?;

    let settings = SnapshotSettings::from(&config.snapshot);
    if candles.len() < settings.min_candles() {
        return Err(CoreError::InsufficientData(format!(
            "{}: {} candles, need {}",
            symbol,
            candles.len(),
            settings.min_candles()
        )));
    }

    let snapshots = build_snapshots(candles, &settings);
    let last = snapshots
        .last()
        .expect("length checked against min_candles");
    let close = candles.last().expect("non-empty").close;

    let (Some(adx), Some(atr), Some(rsi), Some(volume_sma)) =
        (last.adx, last.atr, last.rsi, last.volume_sma)
    else {
        return Err(CoreError::InsufficientData(format!(
            "{}: indicator warmup incomplete",
            symbol
        )));
    };

    if close <= 0.0 || volume_sma <= 0.0 {
        return Err(CoreError::data_gap(
            symbol,
            "non-positive close or average volume",
        ));
    }

    let trend_score = (adx / 50.0).clamp(0.0, 1.0);
    let volatility_score = ((atr / close) / config.volatility_reference).clamp(0.0, 1.0);
    let momentum_score = ((rsi - 50.0).abs() / 50.0).clamp(0.0, 1.0);
    let volume = candles.last().expect("non-empty").volume;
    let volume_score = (volume / volume_sma / 2.0).clamp(0.0, 1.0);

    let score = config.trend_weight * trend_score
        + config.volatility_weight * volatility_score
        + config.momentum_weight * momentum_score
        + config.volume_weight * volume_score;

    // Recommendation thresholds are checked in a fixed order so the
    // mapping is reproducible from the same indicator inputs.
    let recommended_strategy = if trend_score > config.trend_recommend_threshold {
        StrategyKind::TrendCrossover
    } else if volatility_score < config.volatility_recommend_threshold {
        StrategyKind::VolatilityBreakout
    } else if rsi <= config.rsi_extreme_low || rsi >= config.rsi_extreme_high {
        StrategyKind::MeanReversion
    } else {
        config.default_strategy
    };

    Ok(SymbolScore {
        symbol: symbol.to_string(),
        score,
        trend_score,
        volatility_score,
        momentum_score,
        volume_score,
        rsi,
        quote_volume_24h: trailing_quote_volume_24h(candles),
        recommended_strategy,
    })
}

/// Scores a universe and returns the top-N candidates, ranked by
/// composite score with 24h quote volume as the tie-breaker. Failures
/// are isolated per symbol: a gap or short history skips that symbol
/// and the scan continues.
pub fn scan(
    universe: &[(String, Vec<Candle>)],
    config: &ScannerConfig,
) -> Result<Vec<SymbolScore>, CoreError> {
    config.validate()?;

    let mut scored: Vec<SymbolScore> = universe
        .par_iter()
        .filter_map(
            |(symbol, candles)| match score_symbol(symbol, candles, config) {
                Ok(score) => Some(score),
                Err(error) if error.is_recoverable() => {
                    warn!("Skipping {} in scan: {}", symbol, error);
                    None
                }
                Err(error) => {
                    warn!("Skipping {} in scan (unexpected): {}", symbol, error);
                    None
                }
            },
        )
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(
                b.quote_volume_24h
                    .partial_cmp(&a.quote_volume_24h)
                    .unwrap_or(Ordering::Equal),
            )
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    scored.truncate(config.top_n);

    debug!("Scan produced {} ranked candidates", scored.len());
    Ok(scored)
}
