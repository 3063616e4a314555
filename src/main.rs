use anyhow::Result;
use clap::{Parser, Subcommand};
use quantcore::commands::{backtest, scan, sweep};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quantcore")]
#[command(about = "Quantitative decision core: scan markets, backtest and sweep strategies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay one strategy over a candle file and print the result
    Backtest {
        /// JSON candle file (array of candle records)
        data_file: PathBuf,
        /// Strategy id recorded on the result
        #[arg(long, default_value = "cli")]
        strategy_id: String,
        /// trend_crossover, mean_reversion or volatility_breakout
        #[arg(long)]
        strategy: String,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "1h")]
        timeframe: String,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: String,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: String,
        #[arg(long, default_value_t = 10_000.0)]
        capital: f64,
        #[arg(long, default_value_t = 0.001)]
        commission: f64,
    },
    /// Score a universe of symbols and print the ranked candidates
    Scan {
        /// JSON candle file covering the whole universe
        data_file: PathBuf,
        /// Number of candidates to report
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Replay a strategy over a grid of stop multipliers in parallel
    Sweep {
        data_file: PathBuf,
        #[arg(long)]
        strategy: String,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "1h")]
        timeframe: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value_t = 10_000.0)]
        capital: f64,
        /// Comma separated ATR stop multipliers to try
        #[arg(long, value_delimiter = ',', default_value = "1.5,2.0,2.5,3.0")]
        stop_multipliers: Vec<f64>,
        /// Ranking objective: total-return or sharpe
        #[arg(long, default_value = "total-return")]
        objective: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match cli.command {
        Commands::Backtest {
            data_file,
            strategy_id,
            strategy,
            symbol,
            timeframe,
            start,
            end,
            capital,
            commission,
        } => backtest::run(
            &data_file,
            &strategy_id,
            &strategy,
            &symbol,
            &timeframe,
            &start,
            &end,
            capital,
            commission,
        ),
        Commands::Scan { data_file, top } => scan::run(&data_file, top),
        Commands::Sweep {
            data_file,
            strategy,
            symbol,
            timeframe,
            start,
            end,
            capital,
            stop_multipliers,
            objective,
        } => sweep::run(
            &data_file,
            &strategy,
            &symbol,
            &timeframe,
            &start,
            &end,
            capital,
            &stop_multipliers,
            &objective,
        ),
    }
}
