use crate::backtest::{BacktestEngine, CancelToken};
use crate::config::{BacktestConfig, RiskConfig};
use crate::error::ReplayError;
use crate::models::{BacktestResult, Candle};
use crate::strategy::{StrategyConfig, StrategyKind};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

/// Backtest request as received from the dashboard/control
/// collaborators. Optional fields fall back to config defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRequest {
    pub strategy_id: String,
    pub strategy_type: String,
    pub symbol: String,
    pub timeframe: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: f64,
    #[serde(default)]
    pub commission_rate: Option<f64>,
    #[serde(default)]
    pub slippage_rate: Option<f64>,
    #[serde(default)]
    pub max_positions: Option<u32>,
    /// Full typed parameter override; must match `strategy_type`.
    #[serde(default)]
    pub strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub risk: Option<RiskConfig>,
}

/// Strict response schema: every numeric field is a plain number, or
/// null for undefined ratios. Consumers never unwrap objects or coerce
/// strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<BacktestResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BacktestResponse {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            results: None,
            error: Some(error.into()),
        }
    }
}

/// Any non-finite number outside the profit-factor sentinel is a
/// malformed result; fail the request instead of defaulting to 0.
fn check_well_formed(result: &BacktestResult) -> Result<(), ReplayError> {
    let p = &result.performance;
    let plain_numbers = [
        ("totalReturn", p.total_return),
        ("annualReturn", p.annual_return),
        ("winRate", p.win_rate),
        ("maxDrawdown", p.max_drawdown),
        ("avgWin", p.avg_win),
        ("avgLoss", p.avg_loss),
        ("bestTrade", p.best_trade),
        ("worstTrade", p.worst_trade),
        ("finalCapital", result.final_capital),
    ];
    for (name, value) in plain_numbers {
        if !value.is_finite() {
            return Err(ReplayError::MalformedValue(name.to_string()));
        }
    }
    if p.profit_factor.is_nan() {
        return Err(ReplayError::MalformedValue("profitFactor".to_string()));
    }
    for ratio in [p.sharpe_ratio, p.sortino_ratio].into_iter().flatten() {
        if !ratio.is_finite() {
            return Err(ReplayError::MalformedValue("ratio".to_string()));
        }
    }
    Ok(())
}

/// Service entry point for the backtest use case. The caller supplies
/// the candle history; the core performs no I/O.
pub fn run_backtest(request: &BacktestRequest, candles: &[Candle]) -> BacktestResponse {
    run_backtest_with_cancel(request, candles, &CancelToken::new())
}

pub fn run_backtest_with_cancel(
    request: &BacktestRequest,
    candles: &[Candle],
    cancel: &CancelToken,
) -> BacktestResponse {
    let kind: StrategyKind = match request.strategy_type.parse() {
        Ok(kind) => kind,
        Err(error) => return BacktestResponse::failure(error.to_string()),
    };

    let strategy = match &request.strategy {
        Some(config) if config.kind() != kind => {
            return BacktestResponse::failure(format!(
                "strategy parameters are for '{}', request asked for '{}'",
                config.kind().as_str(),
                kind.as_str()
            ));
        }
        Some(config) => config.clone(),
        None => StrategyConfig::default_for(kind),
    };

    let mut config = BacktestConfig::new(
        request.symbol.clone(),
        request.timeframe.clone(),
        request.start_date,
        request.end_date,
        request.initial_capital,
    );
    if let Some(rate) = request.commission_rate {
        config.commission_rate = rate;
    }
    if let Some(rate) = request.slippage_rate {
        config.slippage_rate = rate;
    }
    if let Some(max) = request.max_positions {
        config.max_positions = max;
    }

    let risk = request.risk.clone().unwrap_or_default();

    let engine = match BacktestEngine::new(config) {
        Ok(engine) => engine,
        Err(error) => return BacktestResponse::failure(error.to_string()),
    };

    info!(
        "Running backtest for strategy {} ({}) on {} {}",
        request.strategy_id,
        kind.as_str(),
        request.symbol,
        request.timeframe
    );

    match engine.run(&request.strategy_id, &strategy, &risk, candles, cancel) {
        Ok(result) => match check_well_formed(&result) {
            Ok(()) => BacktestResponse {
                success: true,
                results: Some(result),
                error: None,
            },
            Err(error) => BacktestResponse::failure(error.to_string()),
        },
        Err(error) => BacktestResponse::failure(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn candles(count: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let close = 100.0 + (i as f64 * 0.5).sin() * 3.0;
                Candle {
                    symbol: "BTCUSDT".to_string(),
                    timeframe: "1h".to_string(),
                    open_time: start + Duration::hours(i as i64),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    fn request() -> BacktestRequest {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        BacktestRequest {
            strategy_id: "strat-1".to_string(),
            strategy_type: "mean_reversion".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: "1h".to_string(),
            start_date: start,
            end_date: start + Duration::days(10),
            initial_capital: 10_000.0,
            commission_rate: None,
            slippage_rate: None,
            max_positions: None,
            strategy: None,
            risk: None,
        }
    }

    #[test]
    fn successful_run_returns_results_without_error() {
        let response = run_backtest(&request(), &candles(200));
        assert!(response.success, "{:?}", response.error);
        let results = response.results.unwrap();
        assert_eq!(results.strategy_id, "strat-1");
        assert_eq!(results.initial_capital, 10_000.0);
        assert!(response.error.is_none());
    }

    #[test]
    fn unknown_strategy_type_fails_cleanly() {
        let mut bad = request();
        bad.strategy_type = "martingale".to_string();
        let response = run_backtest(&bad, &candles(200));
        assert!(!response.success);
        assert!(response.results.is_none());
        assert!(response.error.unwrap().contains("martingale"));
    }

    #[test]
    fn legacy_strategy_names_are_accepted() {
        let mut legacy = request();
        legacy.strategy_type = "rsi_reversion".to_string();
        let response = run_backtest(&legacy, &candles(200));
        assert!(response.success);
    }

    #[test]
    fn mismatched_parameter_block_is_rejected() {
        let mut bad = request();
        bad.strategy = Some(StrategyConfig::default_for(StrategyKind::TrendCrossover));
        let response = run_backtest(&bad, &candles(200));
        assert!(!response.success);
    }

    #[test]
    fn inverted_dates_fail_before_any_computation() {
        let mut bad = request();
        std::mem::swap(&mut bad.start_date, &mut bad.end_date);
        let response = run_backtest(&bad, &candles(200));
        assert!(!response.success);
    }

    #[test]
    fn response_serializes_ratios_as_numbers_or_null() {
        let response = run_backtest(&request(), &candles(200));
        let json = serde_json::to_value(&response).unwrap();
        let performance = &json["results"]["performance"];
        // Quiet sine market, no trades: ratios are undefined and must
        // surface as null, not as 0 or an object.
        assert!(performance["winRate"].is_number());
        assert!(performance["profitFactor"].is_number() || performance["profitFactor"].is_null());
        let sharpe = &performance["sharpeRatio"];
        assert!(sharpe.is_number() || sharpe.is_null());
    }
}
