//! C10 — Snapshot/Fork subsystem.
//!
//! Persists and restores a run's full account state as a self-describing,
//! component-keyed JSON envelope. Grounded in the teacher crate's
//! `state_manager.rs` (which serialized engine state to SQLite rows keyed
//! by component name); here each component owns one JSON object key so an
//! unrecognized section round-trips untouched, matching §6.4's "unknown
//! component section is preserved on re-save" requirement — a relational
//! schema can't do that without a migration, a `serde_json::Value` map can.

use crate::context::AccountState;
use crate::order::{Order, OrderManager};
use crate::portfolio::{DailyRecord, Portfolio};
use crate::position::{Position, PositionManager, TradingRule};
use crate::types::Money;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Which of the three terminal states a run ended in. Only `Paused` is
/// resumable or forkable — `Interrupted` and `Finished` envelopes are
/// read-only historical records (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    Paused,
    Interrupted,
    Finished,
}

impl EnvelopeKind {
    pub fn file_suffix(self) -> &'static str {
        match self {
            EnvelopeKind::Paused => "_pause",
            EnvelopeKind::Interrupted => "_interrupt",
            EnvelopeKind::Finished => "_final",
        }
    }

    pub fn is_resumable(self) -> bool {
        self == EnvelopeKind::Paused
    }
}

/// The account component, the one section QTrader itself always writes and
/// reads. Other sections (strategy user_data, arbitrary extension state)
/// are carried in `extra` verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub cash: Money,
    pub margin_rate: Money,
    pub trading_rule: TradingRule,
    pub positions: Vec<Position>,
    pub position_snapshots: BTreeMap<NaiveDate, Vec<Position>>,
    pub daily_history: Vec<DailyRecord>,
    pub order_history: Vec<Order>,
    pub order_open_book: Vec<Order>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub as_of: NaiveDate,
    pub account: AccountSnapshot,
    pub user_data: Value,
    /// Unrecognized top-level sections, preserved byte-for-byte across a
    /// load/save cycle.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Envelope {
    pub fn capture(
        kind: EnvelopeKind,
        as_of: NaiveDate,
        state: &AccountState,
        position_snapshots: BTreeMap<NaiveDate, Vec<Position>>,
        user_data: Value,
    ) -> Self {
        Envelope {
            kind,
            as_of,
            account: AccountSnapshot {
                cash: state.portfolio.cash,
                margin_rate: state.portfolio.margin_rate,
                trading_rule: state.positions.rule(),
                positions: state.positions.snapshot(),
                position_snapshots,
                daily_history: state.portfolio.history().to_vec(),
                order_history: state.orders.history().to_vec(),
                order_open_book: state.orders.open_book_raw().to_vec(),
            },
            user_data,
            extra: HashMap::new(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Resume: rebuild `AccountState` verbatim from a `Paused` envelope. The
    /// caller is responsible for rejecting non-resumable envelopes before
    /// calling this (§4.5: "resuming a non-PAUSED envelope is a Fatal
    /// error, not a silent no-op").
    pub fn restore_account(&self) -> AccountState {
        AccountState {
            portfolio: Portfolio::restore(
                self.account.cash,
                self.account.margin_rate,
                self.account.daily_history.clone(),
            ),
            positions: PositionManager::from_snapshot(self.account.trading_rule, self.account.positions.clone()),
            orders: OrderManager::restore(
                self.account.order_open_book.clone(),
                self.account.order_history.clone(),
            ),
        }
    }

    /// Fork (§4.5): truncate all history strictly before `fork_date`,
    /// rebuild positions from `position_snapshots[fork_date - 1]` (empty if
    /// absent — a fork date with no prior snapshot starts flat), and carry
    /// over only filled orders whose fill date precedes `fork_date`.
    /// `reinitialize` additionally clears `user_data`, forcing the
    /// strategy's `initialize` hook to rebuild its own state from scratch
    /// rather than resuming mid-stream bookkeeping.
    pub fn fork(&self, fork_date: NaiveDate, reinitialize: bool) -> Envelope {
        let day_before = fork_date.pred_opt().unwrap_or(fork_date);
        let positions = self
            .account
            .position_snapshots
            .get(&day_before)
            .cloned()
            .unwrap_or_default();

        let daily_history: Vec<DailyRecord> = self
            .account
            .daily_history
            .iter()
            .filter(|r| r.date < fork_date)
            .cloned()
            .collect();

        let order_history: Vec<Order> = self
            .account
            .order_history
            .iter()
            .filter(|o| {
                o.status == crate::order::OrderStatus::Filled
                    && o.filled_at.map(|t| t.date_naive() < fork_date).unwrap_or(false)
            })
            .cloned()
            .collect();

        let position_snapshots = self
            .account
            .position_snapshots
            .iter()
            .filter(|(date, _)| **date < fork_date)
            .map(|(d, p)| (*d, p.clone()))
            .collect();

        let cash = daily_history.last().map(|r| r.cash).unwrap_or(self.account.cash);

        Envelope {
            kind: EnvelopeKind::Paused,
            as_of: day_before,
            account: AccountSnapshot {
                cash,
                margin_rate: self.account.margin_rate,
                trading_rule: self.account.trading_rule,
                positions,
                position_snapshots,
                daily_history,
                order_history,
                order_open_book: Vec::new(),
            },
            user_data: if reinitialize { Value::Null } else { self.user_data.clone() },
            extra: self.extra.clone(),
        }
    }
}
