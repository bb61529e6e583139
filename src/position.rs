//! C4 — Position Manager.
//!
//! Positions are keyed by `(Symbol, Direction)`: a single symbol can carry
//! one Long slot and one Short slot at once. Adapted from the teacher
//! crate's `oms::types::Position` (single-direction, FIFO-costed) into a
//! dual-direction book with T+1 settlement, since backtest accounting
//! needs both slots open simultaneously during a close-opposite/open-same
//! fill and needs `available` to lag `total` by one trading day.

use crate::types::{Direction, Money, Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether shares bought today become sellable today (T+0) or only on a
/// later trading day (T+1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingRule {
    T0,
    T1,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub symbol: Symbol,
    pub direction: Direction,
}

/// A single `(symbol, direction)` position. `available` always satisfies
/// `available = total - today_open` under T+1, or `available = total`
/// under T+0. The entry never exists with `total == 0` — zeroing it out
/// removes the map entry (no ghost positions skewing market value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub direction: Direction,
    pub total: Money,
    pub available: Money,
    pub today_open: Money,
    pub avg_cost: Money,
    pub market_price: Money,
    pub realized_pnl: Money,
}

impl Position {
    fn new(symbol: Symbol, direction: Direction, fill_qty: Money, fill_price: Money) -> Self {
        Position {
            symbol,
            direction,
            total: fill_qty,
            available: Money::ZERO,
            today_open: fill_qty,
            avg_cost: fill_price,
            market_price: fill_price,
            realized_pnl: Money::ZERO,
        }
    }

    pub fn market_value(&self) -> Money {
        self.total * self.market_price
    }

    pub fn unrealized_pnl(&self) -> Money {
        let diff = self.market_price - self.avg_cost;
        match self.direction {
            Direction::Long => diff * self.total,
            Direction::Short => -diff * self.total,
        }
    }

    fn invariant_ok(&self) -> bool {
        self.available <= self.total
            && !self.available.is_negative()
            && !self.total.is_negative()
    }
}

/// Owns every open position, keyed by `(symbol, direction)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionManager {
    positions: HashMap<PositionKey, Position>,
    rule: TradingRuleOpt,
}

/// Stored separately from `Position` so `Default` derives cleanly; holds
/// the configured T+1/T+0 rule for settlement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct TradingRuleOpt(TradingRule);

impl Default for TradingRuleOpt {
    fn default() -> Self {
        TradingRuleOpt(TradingRule::T1)
    }
}

impl PositionManager {
    pub fn new(rule: TradingRule) -> Self {
        PositionManager {
            positions: HashMap::new(),
            rule: TradingRuleOpt(rule),
        }
    }

    pub fn rule(&self) -> TradingRule {
        self.rule.0
    }

    pub fn get(&self, symbol: &Symbol, direction: Direction) -> Option<&Position> {
        self.positions.get(&PositionKey {
            symbol: symbol.clone(),
            direction,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn iter_symbol<'a>(&'a self, symbol: &'a Symbol) -> impl Iterator<Item = &'a Position> {
        self.positions
            .values()
            .filter(move |p| &p.symbol == symbol)
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Add `qty` at `price` to the (symbol, direction) slot, creating it if
    /// absent. New size is cost-averaged against the prior total.
    pub fn open_or_add(
        &mut self,
        symbol: &Symbol,
        direction: Direction,
        qty: Money,
        price: Money,
        now: DateTime<Utc>,
    ) {
        let key = PositionKey {
            symbol: symbol.clone(),
            direction,
        };
        match self.positions.get_mut(&key) {
            Some(pos) => {
                let new_total = pos.total + qty;
                pos.avg_cost = if new_total.is_zero() {
                    Money::ZERO
                } else {
                    (pos.avg_cost * pos.total + price * qty) / new_total
                };
                pos.total = new_total;
                pos.today_open += qty;
                pos.market_price = price;
            }
            None => {
                let _ = now;
                self.positions
                    .insert(key, Position::new(symbol.clone(), direction, qty, price));
            }
        }
        debug_assert!(self
            .positions
            .get(&PositionKey {
                symbol: symbol.clone(),
                direction
            })
            .map(|p| p.total.is_positive() || p.total.is_zero())
            .unwrap_or(true));
    }

    /// Close up to `qty` from the (symbol, direction) slot, booking realized
    /// PnL at `price`. Returns the amount actually closed (≤ `qty`, capped
    /// at the slot's total). Removes the slot entirely once its total hits
    /// zero. Closes always draw from `total`, mirroring `available` only
    /// indirectly via the settlement-time T+1 recompute.
    pub fn close(
        &mut self,
        symbol: &Symbol,
        direction: Direction,
        qty: Money,
        price: Money,
    ) -> Money {
        let key = PositionKey {
            symbol: symbol.clone(),
            direction,
        };
        let Some(pos) = self.positions.get_mut(&key) else {
            return Money::ZERO;
        };

        let closed = qty.min(pos.total);
        let diff = price - pos.avg_cost;
        let realized = match direction {
            Direction::Long => diff * closed,
            Direction::Short => -diff * closed,
        };
        pos.realized_pnl += realized;
        pos.total -= closed;
        pos.available = pos.available.min(pos.total);
        pos.today_open = pos.today_open.min(pos.total);
        pos.market_price = price;

        if pos.total.is_zero() {
            self.positions.remove(&key);
        }

        closed
    }

    /// Amount of `symbol`/`direction` sellable/closeable right now.
    pub fn available(&self, symbol: &Symbol, direction: Direction) -> Money {
        self.get(symbol, direction)
            .map(|p| p.available)
            .unwrap_or(Money::ZERO)
    }

    pub fn total(&self, symbol: &Symbol, direction: Direction) -> Money {
        self.get(symbol, direction)
            .map(|p| p.total)
            .unwrap_or(Money::ZERO)
    }

    /// Mark every position to `price_of(symbol)`, recomputing unrealized
    /// PnL. Called once per day at settlement, before the T+1 availability
    /// roll described below.
    pub fn mark_to_market<F: Fn(&Symbol) -> Option<Money>>(&mut self, price_of: F) {
        for pos in self.positions.values_mut() {
            if let Some(price) = price_of(&pos.symbol) {
                pos.market_price = price;
            }
        }
    }

    /// End-of-day roll: under T+1, `available = total - today_open`, then
    /// `today_open` resets to zero for the next day. Under T+0, everything
    /// bought today is immediately available.
    pub fn roll_day(&mut self) {
        for pos in self.positions.values_mut() {
            match self.rule.0 {
                TradingRule::T1 => {
                    pos.available = pos.total - pos.today_open;
                }
                TradingRule::T0 => {
                    pos.available = pos.total;
                }
            }
            pos.today_open = Money::ZERO;
            debug_assert!(pos.invariant_ok());
        }
    }

    pub fn long_market_value(&self) -> Money {
        self.positions
            .values()
            .filter(|p| p.direction == Direction::Long)
            .map(|p| p.market_value())
            .sum()
    }

    pub fn short_market_value(&self) -> Money {
        self.positions
            .values()
            .filter(|p| p.direction == Direction::Short)
            .map(|p| p.market_value())
            .sum()
    }

    pub fn total_unrealized_pnl(&self) -> Money {
        self.positions.values().map(|p| p.unrealized_pnl()).sum()
    }

    /// Snapshot every position as of now, keyed for `position_snapshots[date]`.
    pub fn snapshot(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    /// Rebuild a manager from a prior day's snapshot (fork rebuild, §4.5).
    pub fn from_snapshot(rule: TradingRule, positions: Vec<Position>) -> Self {
        let mut map = HashMap::new();
        for pos in positions {
            map.insert(
                PositionKey {
                    symbol: pos.symbol.clone(),
                    direction: pos.direction,
                },
                pos,
            );
        }
        PositionManager {
            positions: map,
            rule: TradingRuleOpt(rule),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sym() -> Symbol {
        Symbol::new("BTCUSDT")
    }

    #[test]
    fn t1_availability_lags_by_one_roll() {
        let mut pm = PositionManager::new(TradingRule::T1);
        pm.open_or_add(&sym(), Direction::Long, Money::from_f64(100.0), Money::from_f64(10.0), Utc::now());
        assert_eq!(pm.available(&sym(), Direction::Long), Money::ZERO);

        pm.roll_day();
        assert_eq!(pm.available(&sym(), Direction::Long), Money::from_f64(100.0));
    }

    #[test]
    fn closing_all_removes_entry() {
        let mut pm = PositionManager::new(TradingRule::T0);
        pm.open_or_add(&sym(), Direction::Long, Money::from_f64(10.0), Money::from_f64(5.0), Utc::now());
        pm.roll_day();
        let closed = pm.close(&sym(), Direction::Long, Money::from_f64(10.0), Money::from_f64(6.0));
        assert_eq!(closed, Money::from_f64(10.0));
        assert!(pm.get(&sym(), Direction::Long).is_none());
    }

    #[test]
    fn cost_averages_on_add() {
        let mut pm = PositionManager::new(TradingRule::T0);
        pm.open_or_add(&sym(), Direction::Long, Money::from_f64(10.0), Money::from_f64(10.0), Utc::now());
        pm.open_or_add(&sym(), Direction::Long, Money::from_f64(10.0), Money::from_f64(20.0), Utc::now());
        let pos = pm.get(&sym(), Direction::Long).unwrap();
        assert_eq!(pos.avg_cost, Money::from_f64(15.0));
        assert_eq!(pos.total, Money::from_f64(20.0));
    }

    #[test]
    fn long_and_short_coexist_on_same_symbol() {
        let mut pm = PositionManager::new(TradingRule::T0);
        pm.open_or_add(&sym(), Direction::Long, Money::from_f64(5.0), Money::from_f64(10.0), Utc::now());
        pm.open_or_add(&sym(), Direction::Short, Money::from_f64(3.0), Money::from_f64(10.0), Utc::now());
        assert_eq!(pm.total(&sym(), Direction::Long), Money::from_f64(5.0));
        assert_eq!(pm.total(&sym(), Direction::Short), Money::from_f64(3.0));
    }
}
