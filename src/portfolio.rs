use crate::error::{AllocationRejection, CoreError};
use crate::models::PortfolioAllocation;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const NOTIONAL_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
struct StrategyBook {
    allocation: PortfolioAllocation,
    open_positions: u32,
    open_notional: f64,
    realized_pnl: f64,
}

/// Read-only view of one strategy's book for reporting collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyBookSummary {
    pub strategy_id: String,
    pub allocation_percent: f64,
    pub max_positions: u32,
    pub open_positions: u32,
    pub open_notional: f64,
    pub realized_pnl: f64,
}

/// Allocates capital across concurrently-active strategies. The
/// portfolio manager is the single writer of allocations; entry
/// admission and equity updates are intended to run as one atomic
/// step under the caller's lock.
#[derive(Debug, Clone)]
pub struct PortfolioManager {
    total_equity: f64,
    books: BTreeMap<String, StrategyBook>,
}

impl PortfolioManager {
    pub fn new(total_equity: f64) -> Result<Self, CoreError> {
        if !total_equity.is_finite() || total_equity <= 0.0 {
            return Err(CoreError::configuration(format!(
                "total equity must be positive (value: {})",
                total_equity
            )));
        }
        Ok(Self {
            total_equity,
            books: BTreeMap::new(),
        })
    }

    pub fn total_equity(&self) -> f64 {
        self.total_equity
    }

    /// Registers or replaces a strategy's allocation. The sum of all
    /// allocation percents may not exceed 100.
    pub fn set_allocation(
        &mut self,
        strategy_id: &str,
        allocation: PortfolioAllocation,
    ) -> Result<(), CoreError> {
        if !allocation.allocation_percent.is_finite() || allocation.allocation_percent < 0.0 {
            return Err(CoreError::configuration(format!(
                "allocation percent must be non-negative (value: {})",
                allocation.allocation_percent
            )));
        }
        if allocation.max_positions == 0 {
            return Err(CoreError::configuration("maxPositions must be at least 1"));
        }

        let other_total: f64 = self
            .books
            .iter()
            .filter(|(id, _)| id.as_str() != strategy_id)
            .map(|(_, book)| book.allocation.allocation_percent)
            .sum();
        if other_total + allocation.allocation_percent > 100.0 + NOTIONAL_EPSILON {
            return Err(CoreError::configuration(format!(
                "allocations would sum to {:.2}%, above 100%",
                other_total + allocation.allocation_percent
            )));
        }

        self.books
            .entry(strategy_id.to_string())
            .and_modify(|book| book.allocation = allocation)
            .or_insert(StrategyBook {
                allocation,
                open_positions: 0,
                open_notional: 0.0,
                realized_pnl: 0.0,
            });
        Ok(())
    }

    pub fn allocation(&self, strategy_id: &str) -> Option<PortfolioAllocation> {
        self.books.get(strategy_id).map(|book| book.allocation)
    }

    pub fn open_positions(&self, strategy_id: &str) -> u32 {
        self.books
            .get(strategy_id)
            .map(|book| book.open_positions)
            .unwrap_or(0)
    }

    fn headroom(&self, book: &StrategyBook) -> f64 {
        let allocated = self.total_equity * book.allocation.allocation_percent / 100.0;
        (allocated - book.open_notional).max(0.0)
    }

    /// Checks the position cap and allocation headroom for an entry.
    /// Rejections are reported, never silently downsized.
    pub fn authorize_entry(
        &self,
        strategy_id: &str,
        notional: f64,
    ) -> Result<(), AllocationRejection> {
        let book = self
            .books
            .get(strategy_id)
            .ok_or_else(|| AllocationRejection::UnknownStrategy(strategy_id.to_string()))?;

        if book.open_positions >= book.allocation.max_positions {
            return Err(AllocationRejection::PositionCapReached {
                open: book.open_positions,
                max: book.allocation.max_positions,
            });
        }

        let available = self.headroom(book);
        if notional > available + NOTIONAL_EPSILON {
            return Err(AllocationRejection::AllocationExceeded {
                requested: notional,
                available,
            });
        }

        Ok(())
    }

    /// Admission plus commitment as one step.
    pub fn register_entry(
        &mut self,
        strategy_id: &str,
        notional: f64,
    ) -> Result<(), AllocationRejection> {
        self.authorize_entry(strategy_id, notional)?;
        let book = self
            .books
            .get_mut(strategy_id)
            .expect("authorized strategy exists");
        book.open_positions += 1;
        book.open_notional += notional;
        Ok(())
    }

    /// Releases an entry's notional and folds realized pnl into the
    /// strategy book and total equity.
    pub fn register_exit(&mut self, strategy_id: &str, entry_notional: f64, pnl: f64) {
        let Some(book) = self.books.get_mut(strategy_id) else {
            warn!("Exit reported for unknown strategy '{}'", strategy_id);
            return;
        };
        if book.open_positions == 0 {
            warn!("Exit reported for '{}' with no open positions", strategy_id);
            return;
        }
        book.open_positions -= 1;
        book.open_notional = (book.open_notional - entry_notional).max(0.0);
        book.realized_pnl += pnl;
        self.total_equity += pnl;
    }

    /// Recomputes allocation shares from realized pnl, preserving the
    /// total allocated percentage. Refused while any strategy has an
    /// open position; rebalancing happens only between trading cycles.
    pub fn rebalance(&mut self) -> Result<(), AllocationRejection> {
        if let Some((id, _)) = self
            .books
            .iter()
            .find(|(_, book)| book.open_positions > 0)
        {
            return Err(AllocationRejection::RebalanceWhileOpen(id.clone()));
        }

        let total_percent: f64 = self
            .books
            .values()
            .map(|book| book.allocation.allocation_percent)
            .sum();
        if total_percent <= 0.0 {
            return Ok(());
        }

        let strategy_equity: BTreeMap<String, f64> = self
            .books
            .iter()
            .map(|(id, book)| {
                let base = self.total_equity * book.allocation.allocation_percent / 100.0;
                (id.clone(), (base + book.realized_pnl).max(0.0))
            })
            .collect();
        let equity_sum: f64 = strategy_equity.values().sum();
        if equity_sum <= 0.0 {
            return Ok(());
        }

        for (id, book) in self.books.iter_mut() {
            let share = strategy_equity[id] / equity_sum;
            book.allocation.allocation_percent = share * total_percent;
            book.realized_pnl = 0.0;
        }
        info!("Rebalanced {} strategy allocations", self.books.len());
        Ok(())
    }

    pub fn summaries(&self) -> Vec<StrategyBookSummary> {
        self.books
            .iter()
            .map(|(id, book)| StrategyBookSummary {
                strategy_id: id.clone(),
                allocation_percent: book.allocation.allocation_percent,
                max_positions: book.allocation.max_positions,
                open_positions: book.open_positions,
                open_notional: book.open_notional,
                realized_pnl: book.realized_pnl,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portfolio() -> PortfolioManager {
        let mut manager = PortfolioManager::new(100_000.0).unwrap();
        manager
            .set_allocation(
                "trend",
                PortfolioAllocation {
                    allocation_percent: 40.0,
                    max_positions: 2,
                },
            )
            .unwrap();
        manager
            .set_allocation(
                "reversion",
                PortfolioAllocation {
                    allocation_percent: 30.0,
                    max_positions: 1,
                },
            )
            .unwrap();
        manager
    }

    #[test]
    fn allocations_cannot_exceed_one_hundred_percent() {
        let mut manager = portfolio();
        let result = manager.set_allocation(
            "breakout",
            PortfolioAllocation {
                allocation_percent: 40.0,
                max_positions: 1,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn entry_is_rejected_beyond_allocation_headroom() {
        let mut manager = portfolio();
        // 40% of 100k = 40k allocated to "trend".
        manager.register_entry("trend", 30_000.0).unwrap();
        let result = manager.authorize_entry("trend", 15_000.0);
        assert!(matches!(
            result,
            Err(AllocationRejection::AllocationExceeded { .. })
        ));
    }

    #[test]
    fn entry_is_rejected_at_position_cap() {
        let mut manager = portfolio();
        manager.register_entry("reversion", 10_000.0).unwrap();
        let result = manager.authorize_entry("reversion", 1_000.0);
        assert!(matches!(
            result,
            Err(AllocationRejection::PositionCapReached { open: 1, max: 1 })
        ));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let manager = portfolio();
        assert!(matches!(
            manager.authorize_entry("momentum", 100.0),
            Err(AllocationRejection::UnknownStrategy(_))
        ));
    }

    #[test]
    fn exit_releases_notional_and_updates_equity() {
        let mut manager = portfolio();
        manager.register_entry("trend", 30_000.0).unwrap();
        manager.register_exit("trend", 30_000.0, 2_500.0);
        assert_eq!(manager.open_positions("trend"), 0);
        assert_eq!(manager.total_equity(), 102_500.0);
        // Headroom is back: the same entry fits again.
        manager.register_entry("trend", 30_000.0).unwrap();
    }

    #[test]
    fn rebalance_is_refused_while_positions_are_open() {
        let mut manager = portfolio();
        manager.register_entry("trend", 10_000.0).unwrap();
        assert!(matches!(
            manager.rebalance(),
            Err(AllocationRejection::RebalanceWhileOpen(_))
        ));
    }

    #[test]
    fn rebalance_shifts_share_toward_realized_winners() {
        let mut manager = portfolio();
        manager.register_entry("trend", 10_000.0).unwrap();
        manager.register_exit("trend", 10_000.0, 10_000.0);
        manager.rebalance().unwrap();

        let trend = manager.allocation("trend").unwrap().allocation_percent;
        let reversion = manager.allocation("reversion").unwrap().allocation_percent;
        assert!(trend > 40.0);
        assert!(reversion < 30.0);
        // Total allocated share is preserved.
        assert!((trend + reversion - 70.0).abs() < 1e-9);

        let summaries = manager.summaries();
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|s| s.realized_pnl == 0.0));
        assert!(summaries.iter().all(|s| s.open_positions == 0));
    }
}
