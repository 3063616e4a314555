use crate::backtest::exit_for_candle;
use crate::indicators::build_snapshots;
use crate::models::{Candle, Position, PositionStatus, Side, Signal, SignalAction};
use crate::portfolio::PortfolioManager;
use crate::retry::RetryPolicy;
use crate::risk::RiskManager;
use crate::strategy::StrategyConfig;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Order intent handed to the execution collaborator. The collaborator
/// owns placement and fills; executed fields reported back are
/// authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderIntent {
    pub id: Uuid,
    pub symbol: String,
    pub strategy_id: String,
    pub side: Side,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

pub trait ExecutionPort: Send + Sync {
    fn submit_intent(&self, intent: &OrderIntent) -> anyhow::Result<()>;
}

/// Executed entry reported back by the collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub time: DateTime<Utc>,
}

/// Events delivered to one symbol's evaluation task. The feed
/// collaborator owns reconnects; the core only ever sees candles,
/// gaps, and fills.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    CandleClosed(Candle),
    Gap { symbol: String, detail: String },
    Fill(Fill),
}

/// Circuit-breaker state and the allocation table are shared across
/// all symbol tasks; every admission check and equity update happens
/// as one atomic step under this lock.
pub struct SharedBooks {
    pub risk: RiskManager,
    pub portfolio: PortfolioManager,
}

#[derive(Clone)]
pub struct TraderConfig {
    pub strategy_id: String,
    pub strategy: StrategyConfig,
    /// Candle history window kept per task.
    pub history_limit: usize,
    /// Retry schedule for intent submission to the execution
    /// collaborator.
    pub retry: RetryPolicy,
}

impl TraderConfig {
    pub fn new(strategy_id: impl Into<String>, strategy: StrategyConfig) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            strategy,
            history_limit: 500,
            retry: RetryPolicy::default(),
        }
    }
}

fn position_from_intent(
    intent: &OrderIntent,
    entry_price: f64,
    entry_time: DateTime<Utc>,
) -> Position {
    Position {
        symbol: intent.symbol.clone(),
        strategy_id: intent.strategy_id.clone(),
        side: intent.side,
        entry_price,
        entry_quantity: intent.quantity,
        entry_time,
        stop_loss: intent.stop_loss,
        take_profit: intent.take_profit,
        status: PositionStatus::Open,
        exit_price: None,
        exit_time: None,
        pnl: 0.0,
        pnl_percent: 0.0,
    }
}

fn close_position(position: &mut Position, exit_price: f64, exit_time: DateTime<Utc>) {
    let pnl =
        position.side.sign() * (exit_price - position.entry_price) * position.entry_quantity;
    let exposure = position.entry_price * position.entry_quantity;
    position.exit_price = Some(exit_price);
    position.exit_time = Some(exit_time);
    position.pnl = pnl;
    position.pnl_percent = if exposure > 0.0 {
        pnl / exposure * 100.0
    } else {
        0.0
    };
    position.status = PositionStatus::Closed;
}

/// Records handed back to the persistence collaborator when a task
/// stops.
#[derive(Debug, Default)]
pub struct TaskOutput {
    pub closed_positions: Vec<Position>,
    pub signals: Vec<Signal>,
}

/// One symbol's evaluation task. Owns its candle history and position
/// state exclusively; no other task mutates them. Stops only between
/// candle boundaries and returns closed positions and tradable
/// signals for the persistence collaborator.
pub async fn run_symbol_task(
    config: TraderConfig,
    shared: Arc<Mutex<SharedBooks>>,
    execution: Arc<dyn ExecutionPort>,
    mut events: mpsc::Receiver<FeedEvent>,
    shutdown: Arc<AtomicBool>,
) -> TaskOutput {
    let mut history: Vec<Candle> = Vec::new();
    let mut open: Option<Position> = None;
    let mut output = TaskOutput::default();
    let settings = config.strategy.snapshot_settings();

    while let Some(event) = events.recv().await {
        // Candle-boundary cancellation point: never mid-decision.
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let candle = match event {
            FeedEvent::CandleClosed(candle) => candle,
            FeedEvent::Gap { symbol, detail } => {
                warn!("Data gap on {}: {}; skipping cycle", symbol, detail);
                continue;
            }
            FeedEvent::Fill(fill) => {
                match open.as_mut() {
                    Some(position)
                        if position.symbol == fill.symbol && position.side == fill.side =>
                    {
                        // Executed numbers win over our intent.
                        position.entry_price = fill.price;
                        position.entry_quantity = fill.quantity;
                    }
                    _ => warn!("Fill for {} with no matching open position", fill.symbol),
                }
                continue;
            }
        };

        if let Some(last) = history.last() {
            if candle.open_time <= last.open_time {
                warn!(
                    "Out-of-order candle for {} at {}; skipping cycle",
                    candle.symbol, candle.open_time
                );
                continue;
            }
        }
        history.push(candle.clone());
        if history.len() > config.history_limit {
            let excess = history.len() - config.history_limit;
            history.drain(..excess);
        }

        let snapshots = build_snapshots(&history, &settings);
        let index = history.len() - 1;
        let signal = config.strategy.evaluate(&snapshots, &history, index);
        if signal.is_tradable() {
            output.signals.push(Signal {
                symbol: candle.symbol.clone(),
                strategy_id: config.strategy_id.clone(),
                action: signal.action,
                strength: signal.strength,
                generated_at: candle.open_time,
            });
        }

        if let Some(mut position) = open.take() {
            // Exits run even while a circuit breaker blocks entries.
            let exit = exit_for_candle(
                position.side,
                position.stop_loss,
                position.take_profit,
                &candle,
                &signal,
            );
            match exit {
                Some((exit_price, reason)) => {
                    let intent = OrderIntent {
                        id: Uuid::new_v4(),
                        symbol: position.symbol.clone(),
                        strategy_id: config.strategy_id.clone(),
                        side: match position.side {
                            Side::Buy => Side::Sell,
                            Side::Sell => Side::Buy,
                        },
                        quantity: position.entry_quantity,
                        stop_loss: 0.0,
                        take_profit: 0.0,
                    };
                    if let Err(error) = config
                        .retry
                        .run("exit intent submission", || async {
                            execution.submit_intent(&intent)
                        })
                        .await
                    {
                        warn!(
                            "Exit intent for {} failed: {}; holding position",
                            position.symbol, error
                        );
                        open = Some(position);
                        continue;
                    }

                    close_position(&mut position, exit_price, candle.open_time);
                    let entry_notional = position.entry_price * position.entry_quantity;
                    {
                        let mut books = shared.lock().expect("shared books lock");
                        books.portfolio.register_exit(
                            &config.strategy_id,
                            entry_notional,
                            position.pnl,
                        );
                        let equity = books.portfolio.total_equity();
                        books.risk.record_exit(candle.open_time, equity, position.pnl);
                    }
                    info!(
                        "{} closed {} ({}): pnl {:.2}",
                        config.strategy_id,
                        position.symbol,
                        reason.as_str(),
                        position.pnl
                    );
                    output.closed_positions.push(position);
                }
                None => open = Some(position),
            }
            continue;
        }

        if !signal.is_tradable() {
            continue;
        }

        // Entry admission: risk sizing and allocation headroom checked
        // and committed atomically so two tasks cannot double-spend.
        let admitted = {
            let mut books = shared.lock().expect("shared books lock");
            let equity = books.portfolio.total_equity();
            let Some(atr) = snapshots[index].atr else {
                continue;
            };
            match books.risk.evaluate_entry(
                candle.open_time,
                equity,
                signal.action,
                signal.strength,
                candle.close,
                atr,
            ) {
                Ok(decision) => {
                    let notional = decision.quantity * decision.entry_price;
                    match books.portfolio.register_entry(&config.strategy_id, notional) {
                        Ok(()) => Some(decision),
                        Err(rejection) => {
                            info!(
                                "{} entry for {} rejected: {}",
                                config.strategy_id, candle.symbol, rejection
                            );
                            None
                        }
                    }
                }
                Err(rejection) => {
                    debug!(
                        "{} entry for {} rejected: {}",
                        config.strategy_id, candle.symbol, rejection
                    );
                    None
                }
            }
        };
        let Some(decision) = admitted else {
            continue;
        };

        let intent = OrderIntent {
            id: Uuid::new_v4(),
            symbol: candle.symbol.clone(),
            strategy_id: config.strategy_id.clone(),
            side: match signal.action {
                SignalAction::Buy => Side::Buy,
                _ => Side::Sell,
            },
            quantity: decision.quantity,
            stop_loss: decision.stop_loss,
            take_profit: decision.take_profit,
        };
        match config
            .retry
            .run("entry intent submission", || async {
                execution.submit_intent(&intent)
            })
            .await
        {
            Ok(()) => {
                open = Some(position_from_intent(
                    &intent,
                    decision.entry_price,
                    candle.open_time,
                ));
            }
            Err(error) => {
                warn!(
                    "Entry intent for {} failed after retries: {}; releasing allocation",
                    candle.symbol, error
                );
                let mut books = shared.lock().expect("shared books lock");
                books.portfolio.register_exit(
                    &config.strategy_id,
                    decision.quantity * decision.entry_price,
                    0.0,
                );
            }
        }
    }

    if let Some(position) = open {
        info!(
            "Task for {} stopping with position still open; left for the execution collaborator",
            position.symbol
        );
        output.closed_positions.push(position);
    }
    output
}
