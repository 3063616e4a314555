use super::load_candles;
use crate::candle_utils::group_by_symbol;
use crate::config::ScannerConfig;
use crate::scanner::scan;
use anyhow::Result;
use log::info;
use std::path::Path;

pub fn run(data_file: &Path, top: usize) -> Result<()> {
    let candles = load_candles(data_file)?;
    let mut universe: Vec<_> = group_by_symbol(&candles).into_iter().collect();
    universe.sort_by(|a, b| a.0.cmp(&b.0));
    info!("Scanning {} symbols", universe.len());

    let config = ScannerConfig {
        top_n: top,
        ..Default::default()
    };
    let ranked = scan(&universe, &config)?;

    println!(
        "{:<12} {:>7} {:>7} {:>7} {:>7} {:>7} {:>7}  {}",
        "symbol", "score", "trend", "vol", "mom", "volume", "rsi", "recommended"
    );
    for row in &ranked {
        println!(
            "{:<12} {:>7.3} {:>7.3} {:>7.3} {:>7.3} {:>7.3} {:>7.1}  {}",
            row.symbol,
            row.score,
            row.trend_score,
            row.volatility_score,
            row.momentum_score,
            row.volume_score,
            row.rsi,
            row.recommended_strategy.as_str()
        );
    }
    Ok(())
}
