use crate::config::RiskConfig;
use crate::error::{BreakerReason, CoreError, RiskRejection};
use crate::models::{RiskDecision, Side, SignalAction};
use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};

pub const PRICE_EPSILON: f64 = 1e-9;

/// Portfolio-wide halt state. Resets at the start of each trading day
/// and is otherwise monotonic: a winning trade never clears a trip
/// mid-day. The external trip is owned by the execution collaborator
/// and survives day rollover until explicitly cleared.
#[derive(Debug, Clone, Default)]
struct BreakerState {
    day: Option<NaiveDate>,
    day_start_equity: f64,
    realized_loss: f64,
    consecutive_losses: u32,
    tripped: Option<BreakerReason>,
    external: bool,
}

/// Computes protective levels and position size for prospective
/// entries and enforces the circuit breakers. Exits are never blocked.
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    breaker: BreakerState,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self {
            config,
            breaker: BreakerState::default(),
        })
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    fn roll_day(&mut self, now: DateTime<Utc>, equity: f64) {
        let today = now.date_naive();
        if self.breaker.day != Some(today) {
            if self.breaker.tripped.is_some() {
                info!("Circuit breaker reset at start of trading day {}", today);
            }
            self.breaker.day = Some(today);
            self.breaker.day_start_equity = equity;
            self.breaker.realized_loss = 0.0;
            self.breaker.consecutive_losses = 0;
            self.breaker.tripped = None;
        }
    }

    pub fn breaker_active(&self) -> Option<BreakerReason> {
        if self.breaker.external {
            return Some(BreakerReason::External);
        }
        self.breaker.tripped
    }

    /// Reported by the execution collaborator on persistent
    /// feed/connectivity failure.
    pub fn trip_external(&mut self) {
        warn!("External connectivity trip: halting new entries");
        self.breaker.external = true;
    }

    pub fn clear_external(&mut self) {
        self.breaker.external = false;
    }

    /// Folds a realized exit into the breaker state. `equity_after` is
    /// the account equity once the exit settles.
    pub fn record_exit(&mut self, now: DateTime<Utc>, equity_after: f64, pnl: f64) {
        self.roll_day(now, equity_after);

        if pnl < 0.0 {
            self.breaker.realized_loss += -pnl;
            self.breaker.consecutive_losses += 1;
        } else if pnl > 0.0 {
            self.breaker.consecutive_losses = 0;
        }

        if self.breaker.tripped.is_some() {
            return;
        }

        let loss_limit = self.config.daily_loss_limit_pct * self.breaker.day_start_equity;
        if loss_limit > 0.0 && self.breaker.realized_loss > loss_limit {
            warn!(
                "Daily loss {:.2} exceeded limit {:.2}; halting new entries for the day",
                self.breaker.realized_loss, loss_limit
            );
            self.breaker.tripped = Some(BreakerReason::DailyLoss);
        } else if self.breaker.consecutive_losses >= self.config.max_consecutive_losses {
            warn!(
                "{} consecutive losing exits; halting new entries for the day",
                self.breaker.consecutive_losses
            );
            self.breaker.tripped = Some(BreakerReason::ConsecutiveLosses);
        }
    }

    /// Evaluates a prospective entry. Breaker checks run before any
    /// sizing; a rejection means the entry simply does not occur.
    pub fn evaluate_entry(
        &mut self,
        now: DateTime<Utc>,
        equity: f64,
        action: SignalAction,
        strength: f64,
        entry_price: f64,
        atr: f64,
    ) -> Result<RiskDecision, RiskRejection> {
        self.roll_day(now, equity);

        if let Some(reason) = self.breaker_active() {
            return Err(RiskRejection::CircuitBreaker(reason));
        }

        let side = match action {
            SignalAction::Buy => Side::Buy,
            SignalAction::Sell => Side::Sell,
            SignalAction::Hold => return Err(RiskRejection::NotAnEntry),
        };

        if !entry_price.is_finite() || entry_price <= 0.0 {
            return Err(RiskRejection::NonPositivePrice(entry_price));
        }
        if !atr.is_finite() || atr <= 0.0 {
            return Err(RiskRejection::InvalidAtr(atr));
        }

        let (stop_loss, take_profit) = self.protective_levels(side, entry_price, atr);

        let strength = strength.clamp(0.0, 1.0);
        let cap = self.config.max_position_fraction * equity;
        let kelly = self.config.kelly_fraction * equity * strength;
        let allocation = cap.min(kelly).max(0.0);

        let raw_quantity = allocation / entry_price;
        let increment = self.config.quantity_increment;
        let quantity = (raw_quantity / increment).floor() * increment;

        let notional = quantity * entry_price;
        if notional + PRICE_EPSILON < self.config.min_trade_notional {
            return Err(RiskRejection::BelowMinimumNotional {
                notional,
                minimum: self.config.min_trade_notional,
            });
        }

        Ok(RiskDecision {
            entry_price,
            quantity,
            stop_loss,
            take_profit,
        })
    }

    /// ATR-multiple stop and target, mirrored for shorts. Levels are
    /// floored at zero.
    pub fn protective_levels(&self, side: Side, entry_price: f64, atr: f64) -> (f64, f64) {
        let stop_distance = atr * self.config.stop_multiplier;
        let target_distance = atr * self.config.target_multiplier;
        match side {
            Side::Buy => (
                (entry_price - stop_distance).max(0.0),
                entry_price + target_distance,
            ),
            Side::Sell => (
                entry_price + stop_distance,
                (entry_price - target_distance).max(0.0),
            ),
        }
    }
}
