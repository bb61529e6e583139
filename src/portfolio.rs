//! C3 — Portfolio.
//!
//! Cash, margin, and the derived net-worth figures every other component
//! reads. Grounded in the teacher crate's equity-curve tracking in
//! `backtest.rs` (running cash balance plus a daily snapshot series), split
//! out here as its own component since spec.md treats account accounting
//! separately from the run loop that drives it.

use crate::position::PositionManager;
use crate::types::Money;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One day's closing snapshot, appended once per settlement (§4.3). Forms
/// the `equity.csv` artifact (§6.4) and the `position_snapshots[date]`
/// lookup fork rebuild depends on (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub cash: Money,
    pub long_market_value: Money,
    pub short_market_value: Money,
    pub net_worth: Money,
    pub returns: f64,
}

/// Cash plus the derived account figures. Market values are never stored
/// here directly — they're read live off the `PositionManager` each time,
/// so there is exactly one place `long_market_value`/`short_market_value`
/// can disagree with the position book: nowhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash: Money,
    pub margin_rate: Money,
    history: Vec<DailyRecord>,
}

impl Portfolio {
    pub fn new(initial_cash: Money, margin_rate: Money) -> Self {
        Portfolio {
            cash: initial_cash,
            margin_rate,
            history: Vec::new(),
        }
    }

    /// Margin reserved against open short positions, released as they close.
    pub fn reserved_margin(&self, positions: &PositionManager) -> Money {
        positions.short_market_value() * self.margin_rate
    }

    pub fn available_cash(&self, positions: &PositionManager) -> Money {
        self.cash - self.reserved_margin(positions)
    }

    pub fn total_assets(&self, positions: &PositionManager) -> Money {
        self.cash + positions.long_market_value()
    }

    /// I1 — net worth, the single figure every invariant and scenario in
    /// spec.md §8 is stated in terms of.
    pub fn net_worth(&self, positions: &PositionManager) -> Money {
        self.cash + positions.long_market_value() - positions.short_market_value()
    }

    /// Deduct a buy's notional plus commission/tax, or credit a sell's
    /// proceeds minus commission/tax. `delta` is signed: positive credits
    /// cash (a sell), negative debits it (a buy).
    pub fn apply_cash_delta(&mut self, delta: Money) {
        self.cash += delta;
    }

    /// Append the day's closing snapshot and return it. Called once by the
    /// scheduler after settlement marks every position to market.
    pub fn close_day(&mut self, date: NaiveDate, positions: &PositionManager) -> DailyRecord {
        let net_worth = self.net_worth(positions);
        let prior_net_worth = self.history.last().map(|r| r.net_worth).unwrap_or(net_worth);
        let returns = if prior_net_worth.is_zero() {
            0.0
        } else {
            ((net_worth - prior_net_worth) / prior_net_worth).to_f64()
        };
        let record = DailyRecord {
            date,
            cash: self.cash,
            long_market_value: positions.long_market_value(),
            short_market_value: positions.short_market_value(),
            net_worth,
            returns,
        };
        self.history.push(record.clone());
        record
    }

    pub fn history(&self) -> &[DailyRecord] {
        &self.history
    }

    /// Fork rebuild (§4.5): truncate daily history to before `fork_date` and
    /// restore cash from the last retained day's close. The caller is
    /// responsible for rebuilding positions separately from
    /// `position_snapshots[fork_date - 1]`.
    pub fn fork_at(&self, fork_date: NaiveDate) -> Portfolio {
        let history: Vec<DailyRecord> = self
            .history
            .iter()
            .filter(|r| r.date < fork_date)
            .cloned()
            .collect();
        let cash = history.last().map(|r| r.cash).unwrap_or(self.cash);
        Portfolio {
            cash,
            margin_rate: self.margin_rate,
            history,
        }
    }

    pub fn restore(cash: Money, margin_rate: Money, history: Vec<DailyRecord>) -> Self {
        Portfolio {
            cash,
            margin_rate,
            history,
        }
    }
}
