//! C5 — Order Manager.
//!
//! Order identity and lifecycle, adapted from the teacher crate's
//! `oms::types::Order` (which modeled Market/Limit/Stop/StopLimit with a
//! richer partial-fill state machine) down to the two order types and five
//! terminal states spec.md §3/§4.1 actually call for. Order history is
//! append-only and survives across days; today's open book is reset
//! nightly — two containers, because the distinction is load-bearing for
//! fork (§4.5 copies only filled orders below the fork date).

use crate::types::{Money, Side, Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub type OrderId = u64;

static ORDER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

pub fn next_order_id() -> OrderId {
    ORDER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
    Expired,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Open)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    pub amount: Money,
    pub side: Side,
    pub order_type: OrderType,
    pub limit_price: Option<Money>,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub filled_price: Money,
    pub commission: Money,
    pub status: OrderStatus,
    /// Set once a Limit order survives a matching pulse without filling.
    /// A fresh (`false`) Limit order fills at the touch if marketable; a
    /// resting (`true`) one fills at its own limit price, gated on the
    /// current print rather than the touch, so it can never look ahead
    /// into liquidity it wasn't resting against. Ignored for Market orders.
    pub is_resting: bool,
}

impl Order {
    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }
}

/// Why a submission or fill attempt was refused, surfaced as a result
/// value rather than raised — `OrderRejected` from spec.md §7 is not an
/// exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    NonIntegerOrZeroQuantity,
    LimitPriceMissingOrNonPositive,
    /// `DataProvider::symbol_info` returned `None` (unknown symbol, or no
    /// bar for it today) or reported the symbol suspended.
    SymbolUnavailable,
}

/// Owns the day's open book plus the append-only filled-order history.
/// Two containers by design: `open_book` resets nightly (`reset_day`),
/// `history` survives across resume and fork.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderManager {
    open_book: Vec<Order>,
    history: Vec<Order>,
}

impl OrderManager {
    pub fn new() -> Self {
        OrderManager {
            open_book: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Submit a signed `amount`: positive is Buy, negative is Sell. Quantity
    /// must be a positive integer multiple of `lot_size`; a Limit order
    /// without a positive `limit_price` is rejected before it ever enters
    /// the book. Returns the new order's id, or `Err` with the rejection
    /// reason (the order is not stored — spec.md §4.1: "Quantity 0 or
    /// non-integer lot ⇒ REJECTED (not stored)").
    pub fn submit(
        &mut self,
        symbol: Symbol,
        signed_amount: i64,
        order_type: OrderType,
        limit_price: Option<Money>,
        lot_size: i64,
        now: DateTime<Utc>,
    ) -> Result<OrderId, RejectReason> {
        if signed_amount == 0 || signed_amount.abs() % lot_size.max(1) != 0 {
            return Err(RejectReason::NonIntegerOrZeroQuantity);
        }

        if order_type == OrderType::Limit {
            match limit_price {
                Some(p) if p.is_positive() => {}
                _ => return Err(RejectReason::LimitPriceMissingOrNonPositive),
            }
        }

        let side = if signed_amount > 0 { Side::Buy } else { Side::Sell };
        let order = Order {
            id: next_order_id(),
            symbol,
            amount: Money::from_i64(signed_amount.abs()),
            side,
            order_type,
            limit_price,
            created_at: now,
            filled_at: None,
            filled_price: Money::ZERO,
            commission: Money::ZERO,
            status: OrderStatus::Open,
            is_resting: false,
        };
        let id = order.id;
        self.open_book.push(order);
        Ok(id)
    }

    /// Cancel any OPEN order. Later matching pulses skip it.
    pub fn cancel(&mut self, id: OrderId) -> bool {
        if let Some(order) = self.open_book.iter_mut().find(|o| o.id == id && o.is_open()) {
            order.status = OrderStatus::Cancelled;
            true
        } else {
            false
        }
    }

    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.open_book.iter().filter(|o| o.is_open())
    }

    pub fn open_orders_mut(&mut self) -> impl Iterator<Item = &mut Order> {
        self.open_book.iter_mut().filter(|o| o.is_open())
    }

    pub fn filled_today(&self) -> impl Iterator<Item = &Order> {
        self.open_book
            .iter()
            .filter(|o| o.status == OrderStatus::Filled)
    }

    pub fn history(&self) -> &[Order] {
        &self.history
    }

    pub fn all_known(&self) -> impl Iterator<Item = &Order> {
        self.history.iter().chain(self.open_book.iter())
    }

    /// Nightly reset (called by Matching's `settle`): every still-OPEN order
    /// expires, filled orders move to history, the open book is cleared.
    /// History is retained across resume.
    pub fn reset_day(&mut self) {
        for order in self.open_book.iter_mut() {
            if order.is_open() {
                order.status = OrderStatus::Expired;
            }
        }
        self.history.append(&mut self.open_book);
        self.open_book.clear();
    }

    /// Fork rebuild (§4.5): copy only filled orders whose fill date is
    /// strictly before `fork_date`. OPEN/CANCELLED/EXPIRED orders do not
    /// survive a fork.
    pub fn fork_at(&self, fork_date: chrono::NaiveDate) -> OrderManager {
        let history = self
            .history
            .iter()
            .filter(|o| {
                o.status == OrderStatus::Filled
                    && o.filled_at.map(|t| t.date_naive() < fork_date).unwrap_or(false)
            })
            .cloned()
            .collect();
        OrderManager {
            open_book: Vec::new(),
            history,
        }
    }

    pub fn restore(open_book: Vec<Order>, history: Vec<Order>) -> Self {
        OrderManager { open_book, history }
    }

    pub fn open_book_raw(&self) -> &[Order] {
        &self.open_book
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn zero_quantity_is_rejected_and_not_stored() {
        let mut om = OrderManager::new();
        let res = om.submit(Symbol::new("BTCUSDT"), 0, OrderType::Market, None, 1, Utc::now());
        assert!(res.is_err());
        assert_eq!(om.all_known().count(), 0);
    }

    #[test]
    fn quantity_not_a_multiple_of_lot_size_is_rejected() {
        let mut om = OrderManager::new();
        let res = om.submit(Symbol::new("BTCUSDT"), 15, OrderType::Market, None, 10, Utc::now());
        assert_eq!(res, Err(RejectReason::NonIntegerOrZeroQuantity));
    }

    #[test]
    fn limit_without_price_is_rejected() {
        let mut om = OrderManager::new();
        let res = om.submit(Symbol::new("BTCUSDT"), 10, OrderType::Limit, None, 1, Utc::now());
        assert_eq!(res, Err(RejectReason::LimitPriceMissingOrNonPositive));
    }

    #[test]
    fn sign_determines_side() {
        let mut om = OrderManager::new();
        let buy_id = om
            .submit(Symbol::new("BTCUSDT"), 10, OrderType::Market, None, 1, Utc::now())
            .unwrap();
        let sell_id = om
            .submit(Symbol::new("BTCUSDT"), -5, OrderType::Market, None, 1, Utc::now())
            .unwrap();
        let buy = om.all_known().find(|o| o.id == buy_id).unwrap();
        let sell = om.all_known().find(|o| o.id == sell_id).unwrap();
        assert_eq!(buy.side, Side::Buy);
        assert_eq!(sell.side, Side::Sell);
        assert_eq!(sell.amount, Money::from_i64(5));
    }

    #[test]
    fn reset_day_expires_open_orders_and_retains_history() {
        let mut om = OrderManager::new();
        om.submit(Symbol::new("BTCUSDT"), 10, OrderType::Market, None, 1, Utc::now())
            .unwrap();
        om.reset_day();
        assert_eq!(om.open_orders().count(), 0);
        assert_eq!(om.history().len(), 1);
        assert_eq!(om.history()[0].status, OrderStatus::Expired);
    }

    #[test]
    fn cancel_only_affects_open_orders() {
        let mut om = OrderManager::new();
        let id = om
            .submit(Symbol::new("BTCUSDT"), 10, OrderType::Market, None, 1, Utc::now())
            .unwrap();
        assert!(om.cancel(id));
        assert!(!om.cancel(id));
    }
}
