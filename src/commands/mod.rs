pub mod backtest;
pub mod scan;
pub mod sweep;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

pub(crate) fn load_candles(path: &std::path::Path) -> Result<Vec<crate::models::Candle>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read candle file {}", path.display()))?;
    let candles: Vec<crate::models::Candle> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse candle file {}", path.display()))?;
    Ok(candles)
}

pub(crate) fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("date '{}' must be YYYY-MM-DD", raw))?;
    Ok(DateTime::from_naive_utc_and_offset(
        date.and_hms_opt(0, 0, 0).expect("midnight is valid"),
        Utc,
    ))
}
