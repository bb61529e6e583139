//! C7 — Context.
//!
//! The single façade a strategy's hooks see: current time, calendar,
//! read-only portfolio/position views, order submission, and a small user
//! scratch dict for state that survives across hook calls. Grounded in the
//! teacher crate's `strategy.rs` `StrategyContext`, generalized from a
//! single-symbol bar view into the full account/order surface spec.md §6.2
//! describes, and made `Send + Sync` behind `parking_lot::RwLock` so the
//! lifecycle sandbox (§5) can copy state out for snapshotting without
//! holding a lock across a strategy callback.

use crate::calendar::Calendar;
use crate::order::{OrderId, OrderManager, OrderType};
use crate::portfolio::Portfolio;
use crate::position::PositionManager;
use crate::provider::{DataProvider, Quote};
use crate::types::{Money, Symbol};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Mutable account state shared between the scheduler and every strategy
/// hook invocation. Lives behind an `Arc` so the sandbox can hold a handle
/// across a watchdog-timed call without cloning the whole account.
pub struct AccountState {
    pub portfolio: Portfolio,
    pub positions: PositionManager,
    pub orders: OrderManager,
}

/// The façade passed into every strategy hook. Reads are synchronous;
/// writes (`order_value`/`order_shares`/`cancel_order`) mutate the account
/// state behind the lock and return immediately — fills happen on the next
/// matching pulse, not inline.
pub struct Context {
    pub now: DateTime<Utc>,
    pub date: NaiveDate,
    pub calendar: Arc<Calendar>,
    provider: Arc<dyn DataProvider>,
    account: Arc<RwLock<AccountState>>,
    pub user_data: Value,
    order_lot_size: i64,
}

impl Context {
    pub fn new(
        now: DateTime<Utc>,
        calendar: Arc<Calendar>,
        provider: Arc<dyn DataProvider>,
        account: Arc<RwLock<AccountState>>,
        user_data: Value,
        order_lot_size: i64,
    ) -> Self {
        Context {
            date: now.date_naive(),
            now,
            calendar,
            provider,
            account,
            user_data,
            order_lot_size,
        }
    }

    pub fn current_price(&self, symbol: &Symbol) -> anyhow::Result<Option<Quote>> {
        self.provider.current_price(symbol, self.now)
    }

    pub fn net_worth(&self) -> Money {
        let state = self.account.read();
        state.portfolio.net_worth(&state.positions)
    }

    pub fn available_cash(&self) -> Money {
        let state = self.account.read();
        state.portfolio.available_cash(&state.positions)
    }

    pub fn position_total(&self, symbol: &Symbol, direction: crate::types::Direction) -> Money {
        self.account.read().positions.total(symbol, direction)
    }

    pub fn position_available(&self, symbol: &Symbol, direction: crate::types::Direction) -> Money {
        self.account.read().positions.available(symbol, direction)
    }

    /// Submit an order for a fixed share amount (signed: positive buys,
    /// negative sells). Rejected outright, before it reaches the order
    /// book, if `symbol_info` reports the symbol unknown or suspended for
    /// today (§4.2/§6.1: "nil from `symbol_info` on the day ⇒ orders for
    /// that symbol are REJECTED").
    pub fn order_shares(
        &self,
        symbol: &Symbol,
        signed_amount: i64,
        order_type: OrderType,
        limit_price: Option<Money>,
    ) -> anyhow::Result<Result<OrderId, crate::order::RejectReason>> {
        let info = self.provider.symbol_info(symbol, self.date)?;
        if !info.map(|i| !i.is_suspended).unwrap_or(false) {
            return Ok(Err(crate::order::RejectReason::SymbolUnavailable));
        }

        Ok(self.account.write().orders.submit(
            symbol.clone(),
            signed_amount,
            order_type,
            limit_price,
            self.order_lot_size,
            self.now,
        ))
    }

    /// Submit an order sized by target notional `value` rather than a raw
    /// share count, converting at the current tick's price. Fractional
    /// shares truncate toward zero (integer-lot orders only, §4.1).
    pub fn order_value(
        &self,
        symbol: &Symbol,
        value: Money,
        order_type: OrderType,
        limit_price: Option<Money>,
    ) -> anyhow::Result<Result<OrderId, crate::order::RejectReason>> {
        let Some(quote) = self.current_price(symbol)? else {
            return Ok(Err(crate::order::RejectReason::NonIntegerOrZeroQuantity));
        };
        if quote.current_price.is_zero() {
            return Ok(Err(crate::order::RejectReason::NonIntegerOrZeroQuantity));
        }
        let shares = (value / quote.current_price).to_f64().trunc() as i64;
        self.order_shares(symbol, shares, order_type, limit_price)
    }

    pub fn cancel_order(&self, id: OrderId) -> bool {
        self.account.write().orders.cancel(id)
    }

    pub fn open_order_ids(&self) -> Vec<OrderId> {
        self.account.read().orders.open_orders().map(|o| o.id).collect()
    }
}

/// Scratch storage a strategy can stash arbitrary JSON-serializable state
/// into across hook calls; persisted verbatim in the run-state envelope
/// (§6.4) so it survives pause/resume.
#[derive(Debug, Clone, Default)]
pub struct UserDict(HashMap<String, Value>);

impl UserDict {
    pub fn new() -> Self {
        UserDict(HashMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => UserDict(map.into_iter().collect()),
            _ => UserDict::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Calendar;
    use crate::position::TradingRule;
    use crate::provider::csv_provider::CsvDataProvider;
    use crate::provider::SymbolInfo;

    fn account() -> Arc<RwLock<AccountState>> {
        Arc::new(RwLock::new(AccountState {
            portfolio: Portfolio::new(Money::from_f64(10_000.0), Money::ZERO),
            positions: PositionManager::new(TradingRule::T1),
            orders: OrderManager::new(),
        }))
    }

    /// A provider that reports every symbol tradeable, for tests exercising
    /// order submission without needing real loaded bar data.
    struct AlwaysTradeableProvider;

    impl DataProvider for AlwaysTradeableProvider {
        fn trading_calendar(&self, _start: NaiveDate, _end: NaiveDate) -> anyhow::Result<Vec<NaiveDate>> {
            Ok(Vec::new())
        }

        fn current_price(&self, _symbol: &Symbol, _at: DateTime<Utc>) -> anyhow::Result<Option<Quote>> {
            Ok(None)
        }

        fn symbol_info(&self, symbol: &Symbol, _date: NaiveDate) -> anyhow::Result<Option<SymbolInfo>> {
            Ok(Some(SymbolInfo { symbol_name: symbol.to_string(), is_suspended: false }))
        }
    }

    #[test]
    fn order_shares_enqueues_into_account_open_book() {
        let ctx = Context::new(
            Utc::now(),
            Arc::new(Calendar::new(vec![], vec![])),
            Arc::new(AlwaysTradeableProvider),
            account(),
            Value::Null,
            1,
        );
        let id = ctx
            .order_shares(&Symbol::new("BTCUSDT"), 10, OrderType::Market, None)
            .unwrap()
            .unwrap();
        assert!(ctx.open_order_ids().contains(&id));
    }

    #[test]
    fn order_shares_rejects_unknown_symbol() {
        let ctx = Context::new(
            Utc::now(),
            Arc::new(Calendar::new(vec![], vec![])),
            Arc::new(CsvDataProvider::new()),
            account(),
            Value::Null,
            1,
        );
        let result = ctx
            .order_shares(&Symbol::new("BTCUSDT"), 10, OrderType::Market, None)
            .unwrap();
        assert_eq!(result, Err(crate::order::RejectReason::SymbolUnavailable));
        assert!(ctx.open_order_ids().is_empty());
    }

    #[test]
    fn user_dict_round_trips_through_json_value() {
        let mut dict = UserDict::new();
        dict.set("streak", Value::from(3));
        let value = dict.to_value();
        let restored = UserDict::from_value(value);
        assert_eq!(restored.get("streak"), Some(&Value::from(3)));
    }
}
