use super::{load_candles, parse_date};
use crate::candle_utils::normalize_symbol;
use crate::service::{run_backtest, BacktestRequest};
use anyhow::{anyhow, Result};
use log::info;
use std::path::Path;

#[allow(clippy::too_many_arguments)]
pub fn run(
    data_file: &Path,
    strategy_id: &str,
    strategy_type: &str,
    symbol: &str,
    timeframe: &str,
    start: &str,
    end: &str,
    capital: f64,
    commission: f64,
) -> Result<()> {
    let symbol =
        normalize_symbol(symbol).ok_or_else(|| anyhow!("symbol must not be empty"))?;
    let candles = load_candles(data_file)?;
    let symbol_candles: Vec<_> = candles
        .into_iter()
        .filter(|c| c.symbol.eq_ignore_ascii_case(&symbol) && c.timeframe == timeframe)
        .collect();
    info!(
        "Loaded {} candles for {} {}",
        symbol_candles.len(),
        symbol,
        timeframe
    );

    let request = BacktestRequest {
        strategy_id: strategy_id.to_string(),
        strategy_type: strategy_type.to_string(),
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        start_date: parse_date(start)?,
        end_date: parse_date(end)?,
        initial_capital: capital,
        commission_rate: Some(commission),
        slippage_rate: None,
        max_positions: None,
        strategy: None,
        risk: None,
    };

    let response = run_backtest(&request, &symbol_candles);
    println!("{}", serde_json::to_string_pretty(&response)?);

    if response.success {
        Ok(())
    } else {
        Err(anyhow!(
            "backtest failed: {}",
            response.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}
