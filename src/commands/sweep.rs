use super::{load_candles, parse_date};
use crate::backtest::CancelToken;
use crate::candle_utils::normalize_symbol;
use crate::config::{BacktestConfig, RiskConfig};
use crate::strategy::{StrategyConfig, StrategyKind};
use crate::sweep::{self, SweepObjective, SweepTask};
use anyhow::{anyhow, Result};
use log::info;
use std::path::Path;
use std::sync::Arc;

#[allow(clippy::too_many_arguments)]
pub fn run(
    data_file: &Path,
    strategy_type: &str,
    symbol: &str,
    timeframe: &str,
    start: &str,
    end: &str,
    capital: f64,
    stop_multipliers: &[f64],
    objective: &str,
) -> Result<()> {
    let kind: StrategyKind = strategy_type.parse()?;
    let objective = match objective.trim().to_lowercase().as_str() {
        "total-return" | "total_return" | "return" => SweepObjective::TotalReturn,
        "sharpe" | "sharpe_ratio" => SweepObjective::Sharpe,
        other => return Err(anyhow!("objective must be total-return or sharpe (got {})", other)),
    };
    if stop_multipliers.is_empty() {
        return Err(anyhow!("at least one stop multiplier is required"));
    }

    let symbol =
        normalize_symbol(symbol).ok_or_else(|| anyhow!("symbol must not be empty"))?;
    let candles = load_candles(data_file)?;
    let symbol_candles: Vec<_> = candles
        .into_iter()
        .filter(|c| c.symbol.eq_ignore_ascii_case(&symbol) && c.timeframe == timeframe)
        .collect();
    info!(
        "Sweeping {} stop multipliers over {} candles",
        stop_multipliers.len(),
        symbol_candles.len()
    );

    let mut config = BacktestConfig::new(
        symbol,
        timeframe,
        parse_date(start)?,
        parse_date(end)?,
        capital,
    );
    config.commission_rate = 0.001;

    let tasks: Vec<SweepTask> = stop_multipliers
        .iter()
        .map(|&stop_multiplier| SweepTask {
            label: format!("stop-{stop_multiplier}"),
            config: config.clone(),
            strategy: StrategyConfig::default_for(kind),
            risk: RiskConfig {
                stop_multiplier,
                ..Default::default()
            },
        })
        .collect();

    let outcomes = sweep::run(
        "sweep",
        tasks,
        Arc::new(symbol_candles),
        objective,
        true,
        &CancelToken::new(),
    );

    println!(
        "{:<12} {:>12} {:>10} {:>8} {:>10}",
        "config", "return", "sharpe", "trades", "drawdown"
    );
    for outcome in &outcomes {
        match &outcome.result {
            Ok(result) => {
                let p = &result.performance;
                println!(
                    "{:<12} {:>11.2}% {:>10} {:>8} {:>9.2}%",
                    outcome.label,
                    p.total_return * 100.0,
                    p.sharpe_ratio
                        .map(|s| format!("{s:.3}"))
                        .unwrap_or_else(|| "n/a".to_string()),
                    p.total_trades,
                    p.max_drawdown * 100.0
                );
            }
            Err(error) => println!("{:<12} failed: {}", outcome.label, error),
        }
    }
    Ok(())
}
