//! C6 — Matching Engine.
//!
//! Turns an open order plus a tick's `Quote` into a fill, or leaves the
//! order resting. Grounded in the teacher crate's `risk.rs` precondition
//! checks (funds/position gate before a trade is allowed) and
//! `backtest.rs`'s commission math, generalized to the price-selection and
//! close-opposite-then-open-same routine spec.md §4.2 specifies.

use crate::order::{Order, OrderStatus, OrderType};
use crate::portfolio::Portfolio;
use crate::position::PositionManager;
use crate::provider::Quote;
use crate::types::{Direction, Money, Side, Symbol, TradingMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Commission schedule: `max(min_commission, notional * rate) + notional * tax`.
/// `tax` applies to sells only (matching most equity markets' stamp duty),
/// `rate`/`min_commission` apply to both sides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CommissionSchedule {
    pub rate: Money,
    pub min_commission: Money,
    pub tax_rate: Money,
    pub slippage: Money,
}

impl CommissionSchedule {
    pub fn commission(&self, notional: Money) -> Money {
        (notional * self.rate).max(self.min_commission)
    }

    pub fn tax(&self, notional: Money, side: Side) -> Money {
        match side {
            Side::Sell => notional * self.tax_rate,
            Side::Buy => Money::ZERO,
        }
    }

    /// Buy slips the execution price up, sell slips it down — always against
    /// the trader.
    pub fn slip(&self, price: Money, side: Side) -> Money {
        match side {
            Side::Buy => price * (Money::ONE + self.slippage),
            Side::Sell => price * (Money::ONE - self.slippage),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillOutcome {
    Filled { price: Money, commission: Money },
    Deferred,
    Rejected(String),
}

/// Resolve the raw execution price for `order` against `quote`, before
/// slippage. Market orders cross the spread (buy at ask, sell at bid). A
/// fresh Limit order (submitted this bar) fills at the touch if marketable,
/// the same as a market order but capped at its limit. A resting Limit
/// order (it already survived at least one prior pulse) instead fills at
/// its own limit price, gated on `current_price` rather than the touch —
/// filling at the touch here would let it trade through liquidity it was
/// never actually resting against.
fn select_price(order: &Order, quote: &Quote) -> Option<Money> {
    match order.order_type {
        OrderType::Market => Some(match order.side {
            Side::Buy => quote.ask(),
            Side::Sell => quote.bid(),
        }),
        OrderType::Limit => {
            let limit = order.limit_price?;
            if order.is_resting {
                match order.side {
                    Side::Buy if quote.current_price <= limit => Some(limit),
                    Side::Sell if quote.current_price >= limit => Some(limit),
                    _ => None,
                }
            } else {
                match order.side {
                    Side::Buy if quote.ask() <= limit => Some(quote.ask().min(limit)),
                    Side::Sell if quote.bid() >= limit => Some(quote.bid().max(limit)),
                    _ => None,
                }
            }
        }
    }
}

/// Matches one open order against the current tick. Mutates `positions` and
/// `portfolio` in place on a fill — close-opposite-then-open-same happens
/// atomically so a reversing order never leaves both slots transiently
/// inconsistent.
pub struct MatchingEngine {
    pub schedule: CommissionSchedule,
    pub trading_mode: TradingMode,
}

impl MatchingEngine {
    pub fn new(schedule: CommissionSchedule, trading_mode: TradingMode) -> Self {
        MatchingEngine { schedule, trading_mode }
    }

    /// Attempt to fill `order` against `quote` at time `now`. On fill,
    /// updates `order` in place (status/filled_at/filled_price/commission),
    /// closes any opposite-direction position first, then opens/adds the
    /// requested direction with the remainder, and books the cash delta
    /// onto `portfolio`.
    pub fn try_fill(
        &self,
        order: &mut Order,
        quote: &Quote,
        positions: &mut PositionManager,
        portfolio: &mut Portfolio,
        now: DateTime<Utc>,
    ) -> FillOutcome {
        if !order.is_open() {
            return FillOutcome::Rejected("order not open".to_string());
        }

        if !quote.within_limits(quote.current_price) {
            return FillOutcome::Deferred;
        }

        let Some(raw_price) = select_price(order, quote) else {
            return FillOutcome::Deferred;
        };

        let direction_requested = match order.side {
            Side::Buy => Direction::Long,
            Side::Sell => Direction::Short,
        };
        let opposite = match direction_requested {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        };

        // An order closes up to the opposite slot's total before it opens
        // anything new — but it may only ever close what's actually
        // available today; requesting more than that is rejected whole,
        // before any mutation, rather than silently capped.
        let closing_available = positions.available(&order.symbol, opposite);
        let closing_total = positions.total(&order.symbol, opposite);
        let closing_qty = order.amount.min(closing_total);
        if closing_qty.is_positive() && closing_qty > closing_available {
            return FillOutcome::Rejected(format!(
                "{closing_qty} requested to close but only {closing_available} is available"
            ));
        }

        let opening_qty = order.amount - closing_qty;
        if opening_qty.is_positive()
            && direction_requested == Direction::Short
            && self.trading_mode == TradingMode::LongOnly
        {
            return FillOutcome::Rejected("opening a short position is not permitted under long_only trading mode".to_string());
        }

        let price = self.schedule.slip(raw_price, order.side);
        let notional = price * order.amount;
        let commission = self.schedule.commission(notional);
        let tax = self.schedule.tax(notional, order.side);
        let total_cost = commission + tax;

        if order.side == Side::Buy && portfolio.available_cash(positions) < notional + total_cost {
            return FillOutcome::Rejected("insufficient funds".to_string());
        }

        self.settle_fill(
            order,
            &order.symbol.clone(),
            direction_requested,
            opposite,
            order.amount,
            price,
            commission,
            tax,
            positions,
            portfolio,
            now,
        );

        FillOutcome::Filled { price, commission }
    }

    #[allow(clippy::too_many_arguments)]
    fn settle_fill(
        &self,
        order: &mut Order,
        symbol: &Symbol,
        direction_requested: Direction,
        opposite: Direction,
        qty: Money,
        price: Money,
        commission: Money,
        tax: Money,
        positions: &mut PositionManager,
        portfolio: &mut Portfolio,
        now: DateTime<Utc>,
    ) {
        let opposite_total = positions.total(symbol, opposite);
        let closing_qty = qty.min(opposite_total);
        let opening_qty = qty - closing_qty;

        if closing_qty.is_positive() {
            positions.close(symbol, opposite, closing_qty, price);
        }
        if opening_qty.is_positive() {
            positions.open_or_add(symbol, direction_requested, opening_qty, price, now);
        }

        let notional = price * qty;
        let cash_delta = match order.side {
            Side::Buy => -(notional + commission + tax),
            Side::Sell => notional - commission - tax,
        };
        portfolio.apply_cash_delta(cash_delta);

        order.status = OrderStatus::Filled;
        order.filled_at = Some(now);
        order.filled_price = price;
        order.commission = commission + tax;
    }

    /// Run one matching pulse over every open order that has a quote this
    /// tick. Orders without a quote are left resting (`Deferred`).
    pub fn pulse<F: Fn(&Symbol) -> Option<Quote>>(
        &self,
        orders: &mut [Order],
        quote_of: F,
        positions: &mut PositionManager,
        portfolio: &mut Portfolio,
        now: DateTime<Utc>,
    ) -> Vec<FillOutcome> {
        let mut outcomes = Vec::new();
        for order in orders.iter_mut().filter(|o| o.is_open()) {
            let Some(quote) = quote_of(&order.symbol) else {
                outcomes.push(FillOutcome::Deferred);
                order.is_resting = true;
                continue;
            };
            let outcome = self.try_fill(order, &quote, positions, portfolio, now);
            if let FillOutcome::Rejected(_) = &outcome {
                order.status = OrderStatus::Rejected;
            }
            if order.is_open() {
                order.is_resting = true;
            }
            outcomes.push(outcome);
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{next_order_id, OrderType};
    use crate::position::TradingRule;

    fn schedule() -> CommissionSchedule {
        CommissionSchedule {
            rate: Money::from_f64(0.001),
            min_commission: Money::from_f64(5.0),
            tax_rate: Money::from_f64(0.001),
            slippage: Money::ZERO,
        }
    }

    fn new_order(side: Side, amount: f64) -> Order {
        Order {
            id: next_order_id(),
            symbol: Symbol::new("BTCUSDT"),
            amount: Money::from_f64(amount),
            side,
            order_type: OrderType::Market,
            limit_price: None,
            created_at: Utc::now(),
            filled_at: None,
            filled_price: Money::ZERO,
            commission: Money::ZERO,
            status: OrderStatus::Open,
            is_resting: false,
        }
    }

    #[test]
    fn market_buy_fills_at_ask_and_deducts_commission() {
        let engine = MatchingEngine::new(schedule(), TradingMode::LongShort);
        let mut positions = PositionManager::new(TradingRule::T0);
        let mut portfolio = Portfolio::new(Money::from_f64(100_000.0), Money::ZERO);
        let mut order = new_order(Side::Buy, 10.0);
        let quote = Quote::simple(Money::from_f64(100.0));

        let outcome = engine.try_fill(&mut order, &quote, &mut positions, &mut portfolio, Utc::now());
        assert!(matches!(outcome, FillOutcome::Filled { .. }));
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(positions.total(&order.symbol, Direction::Long), Money::from_f64(10.0));
        assert_eq!(portfolio.cash, Money::from_f64(100_000.0) - Money::from_f64(1_000.0) - Money::from_f64(5.0));
    }

    #[test]
    fn naked_short_is_rejected_under_long_only_mode() {
        let engine = MatchingEngine::new(schedule(), TradingMode::LongOnly);
        let mut positions = PositionManager::new(TradingRule::T0);
        let mut portfolio = Portfolio::new(Money::from_f64(100_000.0), Money::ZERO);
        let mut order = new_order(Side::Sell, 10.0);
        let quote = Quote::simple(Money::from_f64(100.0));

        let outcome = engine.try_fill(&mut order, &quote, &mut positions, &mut portfolio, Utc::now());
        assert_eq!(
            outcome,
            FillOutcome::Rejected(
                "opening a short position is not permitted under long_only trading mode".to_string()
            )
        );
    }

    #[test]
    fn naked_short_is_allowed_under_long_short_mode() {
        let engine = MatchingEngine::new(schedule(), TradingMode::LongShort);
        let mut positions = PositionManager::new(TradingRule::T0);
        let mut portfolio = Portfolio::new(Money::from_f64(100_000.0), Money::ZERO);
        let mut order = new_order(Side::Sell, 10.0);
        let quote = Quote::simple(Money::from_f64(100.0));

        let outcome = engine.try_fill(&mut order, &quote, &mut positions, &mut portfolio, Utc::now());
        assert!(matches!(outcome, FillOutcome::Filled { .. }));
        assert_eq!(positions.total(&order.symbol, Direction::Short), Money::from_f64(10.0));
    }

    #[test]
    fn sell_beyond_available_is_rejected_before_any_mutation() {
        let engine = MatchingEngine::new(schedule(), TradingMode::LongShort);
        let mut positions = PositionManager::new(TradingRule::T1);
        let mut portfolio = Portfolio::new(Money::from_f64(100_000.0), Money::ZERO);
        let symbol = Symbol::new("BTCUSDT");
        positions.open_or_add(&symbol, Direction::Long, Money::from_f64(10.0), Money::from_f64(90.0), Utc::now());
        // T+1: nothing bought today is available until `roll_day` runs.
        assert_eq!(positions.available(&symbol, Direction::Long), Money::ZERO);

        let mut order = new_order(Side::Sell, 10.0);
        let quote = Quote::simple(Money::from_f64(100.0));
        let outcome = engine.try_fill(&mut order, &quote, &mut positions, &mut portfolio, Utc::now());

        assert!(matches!(outcome, FillOutcome::Rejected(_)));
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(positions.total(&symbol, Direction::Long), Money::from_f64(10.0));
        assert_eq!(portfolio.cash, Money::from_f64(100_000.0));
    }

    #[test]
    fn reversing_order_closes_opposite_before_opening_same() {
        let engine = MatchingEngine::new(schedule(), TradingMode::LongShort);
        let mut positions = PositionManager::new(TradingRule::T0);
        let mut portfolio = Portfolio::new(Money::from_f64(100_000.0), Money::ZERO);
        positions.open_or_add(&Symbol::new("BTCUSDT"), Direction::Short, Money::from_f64(5.0), Money::from_f64(100.0), Utc::now());

        let mut order = new_order(Side::Buy, 10.0);
        let quote = Quote::simple(Money::from_f64(90.0));
        engine.try_fill(&mut order, &quote, &mut positions, &mut portfolio, Utc::now());

        assert!(positions.get(&Symbol::new("BTCUSDT"), Direction::Short).is_none());
        assert_eq!(positions.total(&Symbol::new("BTCUSDT"), Direction::Long), Money::from_f64(5.0));
    }

    #[test]
    fn fresh_limit_order_rests_until_market_trades_through() {
        let order = new_order(Side::Buy, 10.0);
        let mut limit_order = order.clone_for_test_as_limit(Money::from_f64(90.0));
        let quote_too_high = Quote::simple(Money::from_f64(100.0));
        assert!(select_price(&limit_order, &quote_too_high).is_none());

        let quote_trades_through = Quote::simple(Money::from_f64(85.0));
        let price = select_price(&limit_order, &quote_trades_through).unwrap();
        assert_eq!(price, Money::from_f64(85.0));
        limit_order.status = OrderStatus::Filled;
    }

    #[test]
    fn resting_limit_order_fills_at_limit_price_not_touch() {
        let order = new_order(Side::Buy, 10.0);
        let mut limit_order = order.clone_for_test_as_limit(Money::from_f64(90.0));
        limit_order.is_resting = true;

        // The touch (ask1) has already traded through the limit, but the
        // current print has not — a resting order must not fill here.
        let quote_touch_only = Quote {
            current_price: Money::from_f64(95.0),
            ask1: Some(Money::from_f64(88.0)),
            bid1: Some(Money::from_f64(86.0)),
            high_limit: None,
            low_limit: None,
        };
        assert!(select_price(&limit_order, &quote_touch_only).is_none());

        let quote_print_trades_through = Quote {
            current_price: Money::from_f64(88.0),
            ask1: Some(Money::from_f64(95.0)),
            bid1: Some(Money::from_f64(93.0)),
            high_limit: None,
            low_limit: None,
        };
        let price = select_price(&limit_order, &quote_print_trades_through).unwrap();
        assert_eq!(price, Money::from_f64(90.0));
    }

    #[test]
    fn unfilled_limit_order_becomes_resting_after_one_pulse() {
        let engine = MatchingEngine::new(schedule(), TradingMode::LongShort);
        let mut positions = PositionManager::new(TradingRule::T0);
        let mut portfolio = Portfolio::new(Money::from_f64(100_000.0), Money::ZERO);
        let mut order = new_order(Side::Buy, 10.0);
        order.order_type = OrderType::Limit;
        order.limit_price = Some(Money::from_f64(50.0));
        let quote = Quote::simple(Money::from_f64(100.0));

        let outcome = engine.try_fill(&mut order, &quote, &mut positions, &mut portfolio, Utc::now());
        assert_eq!(outcome, FillOutcome::Deferred);
        assert!(!order.is_resting);
    }

    impl Order {
        fn clone_for_test_as_limit(&self, limit_price: Money) -> Order {
            let mut o = self.clone();
            o.order_type = OrderType::Limit;
            o.limit_price = Some(limit_price);
            o
        }
    }
}
