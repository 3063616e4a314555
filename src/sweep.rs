use crate::backtest::{BacktestEngine, CancelToken};
use crate::config::{BacktestConfig, RiskConfig};
use crate::models::{BacktestResult, Candle};
use crate::strategy::StrategyConfig;
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::cmp::Ordering;
use std::sync::Arc;
use std::thread;

/// One replay in a parameter sweep. Each task owns private config and
/// state; independent replays share nothing mutable.
#[derive(Debug, Clone)]
pub struct SweepTask {
    pub label: String,
    pub config: BacktestConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
}

#[derive(Debug)]
pub struct SweepOutcome {
    pub label: String,
    pub result: Result<BacktestResult, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepObjective {
    TotalReturn,
    Sharpe,
}

impl SweepObjective {
    pub fn label(self) -> &'static str {
        match self {
            SweepObjective::TotalReturn => "total return",
            SweepObjective::Sharpe => "Sharpe ratio",
        }
    }

    fn score(self, result: &BacktestResult) -> f64 {
        match self {
            SweepObjective::TotalReturn => result.performance.total_return,
            SweepObjective::Sharpe => result.performance.sharpe_ratio.unwrap_or(f64::NEG_INFINITY),
        }
    }
}

/// Runs every task against the shared candle history on a worker pool
/// and returns outcomes ranked by the objective (failures last). The
/// cancel token aborts remaining replays between candles.
pub fn run(
    strategy_id: &str,
    tasks: Vec<SweepTask>,
    candles: Arc<Vec<Candle>>,
    objective: SweepObjective,
    show_progress: bool,
    cancel: &CancelToken,
) -> Vec<SweepOutcome> {
    let total = tasks.len();
    if total == 0 {
        return Vec::new();
    }

    let num_workers = std::cmp::min(total, std::cmp::max(1, num_cpus::get()));
    info!(
        "Sweeping {} configurations on {} worker threads (objective: {})",
        total,
        num_workers,
        objective.label()
    );

    let (task_tx, task_rx): (Sender<SweepTask>, Receiver<SweepTask>) = bounded(total);
    let (result_tx, result_rx): (Sender<SweepOutcome>, Receiver<SweepOutcome>) = bounded(total);

    let mut handles = Vec::with_capacity(num_workers);
    for _ in 0..num_workers {
        let rx = task_rx.clone();
        let tx = result_tx.clone();
        let candles = candles.clone();
        let cancel = cancel.clone();
        let strategy_id = strategy_id.to_string();

        let handle = thread::spawn(move || {
            while let Ok(task) = rx.recv() {
                let SweepTask {
                    label,
                    config,
                    strategy,
                    risk,
                } = task;
                let result = BacktestEngine::new(config)
                    .and_then(|engine| {
                        engine.run(&strategy_id, &strategy, &risk, candles.as_slice(), &cancel)
                    })
                    .map_err(|error| error.to_string());
                if tx.send(SweepOutcome { label, result }).is_err() {
                    break;
                }
            }
        });
        handles.push(handle);
    }
    drop(result_tx);

    for task in tasks {
        task_tx.send(task).expect("queue sized to task count");
    }
    drop(task_tx);

    let progress = if show_progress {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
                .expect("static progress template"),
        );
        Some(bar)
    } else {
        None
    };

    let mut outcomes = Vec::with_capacity(total);
    while let Ok(outcome) = result_rx.recv() {
        if let Some(bar) = &progress {
            bar.inc(1);
            bar.set_message(outcome.label.clone());
        }
        if let Err(error) = &outcome.result {
            warn!("Sweep run '{}' failed: {}", outcome.label, error);
        }
        outcomes.push(outcome);
    }
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }
    for handle in handles {
        let _ = handle.join();
    }

    outcomes.sort_by(|a, b| match (&a.result, &b.result) {
        (Ok(ra), Ok(rb)) => objective
            .score(rb)
            .partial_cmp(&objective.score(ra))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.label.cmp(&b.label)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.label.cmp(&b.label),
    });

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyKind;
    use chrono::{Duration, TimeZone, Utc};

    fn candles(count: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let close = 200.0 - i as f64 * 0.5 + (i as f64 * 0.9).sin() * 2.0;
                let volume = if i % 37 == 0 { 3_000.0 } else { 1_000.0 };
                Candle {
                    symbol: "BTCUSDT".to_string(),
                    timeframe: "1h".to_string(),
                    open_time: start + Duration::hours(i as i64),
                    open: close,
                    high: close + 2.0,
                    low: close - 2.0,
                    close,
                    volume,
                }
            })
            .collect()
    }

    fn task(label: &str, stop_multiplier: f64, candles: &[Candle]) -> SweepTask {
        let mut config = BacktestConfig::new(
            "BTCUSDT",
            "1h",
            candles.first().unwrap().open_time,
            candles.last().unwrap().open_time,
            10_000.0,
        );
        config.commission_rate = 0.001;
        SweepTask {
            label: label.to_string(),
            config,
            strategy: StrategyConfig::default_for(StrategyKind::MeanReversion),
            risk: RiskConfig {
                stop_multiplier,
                ..Default::default()
            },
        }
    }

    #[test]
    fn sweep_runs_all_tasks_and_ranks_them() {
        let data = Arc::new(candles(300));
        let tasks = vec![
            task("stop-1.5", 1.5, &data),
            task("stop-2.0", 2.0, &data),
            task("stop-3.0", 3.0, &data),
        ];
        let outcomes = run(
            "sweep-test",
            tasks,
            data,
            SweepObjective::TotalReturn,
            false,
            &CancelToken::new(),
        );
        assert_eq!(outcomes.len(), 3);
        let scores: Vec<f64> = outcomes
            .iter()
            .map(|o| o.result.as_ref().unwrap().performance.total_return)
            .collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn sweep_ranking_is_deterministic() {
        let data = Arc::new(candles(300));
        let tasks: Vec<SweepTask> = [1.0, 1.5, 2.0, 2.5, 3.0]
            .iter()
            .map(|&m| task(&format!("stop-{m}"), m, &data))
            .collect();

        let labels = |outcomes: &[SweepOutcome]| -> Vec<String> {
            outcomes.iter().map(|o| o.label.clone()).collect()
        };
        let first = run(
            "sweep-test",
            tasks.clone(),
            data.clone(),
            SweepObjective::TotalReturn,
            false,
            &CancelToken::new(),
        );
        let second = run(
            "sweep-test",
            tasks,
            data,
            SweepObjective::TotalReturn,
            false,
            &CancelToken::new(),
        );
        assert_eq!(labels(&first), labels(&second));
    }

    #[test]
    fn cancelled_sweep_reports_failures_not_partials() {
        let data = Arc::new(candles(300));
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcomes = run(
            "sweep-test",
            vec![task("stop-2.0", 2.0, &data)],
            data,
            SweepObjective::Sharpe,
            false,
            &cancel,
        );
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_err());
    }
}
