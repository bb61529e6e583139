//! §6.2 — Strategy contract.
//!
//! The hook set every user strategy implements. Adapted from the teacher
//! crate's `strategy::Strategy` trait (which exposed a single
//! `generate_signal(&self, candles, position) -> Signal`) into the full
//! lifecycle spec.md §6.2 names: one-time `initialize`, a per-day
//! `before_trading`/`after_trading` pair, the per-bar `handle_bar`, the
//! post-settlement `broker_settle`, and the terminal `on_end`. Every hook
//! except `initialize` receives a `&Context`; none return a `Result` — a
//! hook that panics or returns an error is a `StrategyFault`, caught by the
//! sandbox (C8), never propagated to the scheduler.

use crate::config::Config;
use crate::context::Context;
use crate::provider::csv_provider::Bar;
use crate::types::{Money, Symbol};
use anyhow::{bail, Context as _, Result};
use chrono::NaiveTime;
use std::collections::HashMap;

/// A point in the trading day a strategy wants called back at, beyond the
/// fixed before/after-trading and per-bar hooks. Registered once during
/// `initialize` via `add_schedule`; schedules don't change mid-run so
/// they're read once by the scheduler, not re-queried every tick.
#[derive(Debug, Clone, Copy)]
pub struct SchedulePoint {
    pub time: NaiveTime,
    pub label: &'static str,
}

pub trait Strategy: Send {
    /// Called once before the first trading day. Panicking here is a fatal
    /// startup fault unless `strict_init` is disabled in configuration
    /// (§4.4), in which case the run continues with no further hooks fired
    /// that day.
    fn initialize(&mut self, ctx: &Context);

    fn before_trading(&mut self, ctx: &Context) {
        let _ = ctx;
    }

    /// Fired once per bar per subscribed symbol, or once per day if the
    /// strategy subscribes at daily resolution (§9 Open Question:
    /// `handle_bar` supports both per-symbol single-bar calls and an
    /// end-of-day batch call across every symbol's final bar of the day —
    /// resolved here by always passing the full per-symbol bar map for the
    /// current tick, letting the strategy treat a one-entry map as the
    /// per-bar case and a multi-entry end-of-day map as the batch case).
    fn handle_bar(&mut self, ctx: &Context, bars: &HashMap<Symbol, Bar>);

    fn after_trading(&mut self, ctx: &Context) {
        let _ = ctx;
    }

    /// Fired after the matching engine's nightly settlement, once positions
    /// and cash reflect the day's fills. `Context` is always the live
    /// account state, so a strategy reconciling its own bookkeeping here
    /// reads `ctx` directly rather than through a separate alignment call.
    fn broker_settle(&mut self, ctx: &Context) {
        let _ = ctx;
    }

    fn on_end(&mut self, ctx: &Context) {
        let _ = ctx;
    }

    fn schedule(&self) -> Vec<SchedulePoint> {
        Vec::new()
    }
}

impl Strategy for Box<dyn Strategy> {
    fn initialize(&mut self, ctx: &Context) {
        (**self).initialize(ctx)
    }

    fn before_trading(&mut self, ctx: &Context) {
        (**self).before_trading(ctx)
    }

    fn handle_bar(&mut self, ctx: &Context, bars: &HashMap<Symbol, Bar>) {
        (**self).handle_bar(ctx, bars)
    }

    fn after_trading(&mut self, ctx: &Context) {
        (**self).after_trading(ctx)
    }

    fn broker_settle(&mut self, ctx: &Context) {
        (**self).broker_settle(ctx)
    }

    fn on_end(&mut self, ctx: &Context) {
        (**self).on_end(ctx)
    }

    fn schedule(&self) -> Vec<SchedulePoint> {
        (**self).schedule()
    }
}

/// Build the strategy named in `config.strategy`, shared by every command
/// that starts or resumes a run so the set of known strategies lives in one
/// place.
pub fn build(config: &Config, symbols: &[Symbol]) -> Result<Box<dyn Strategy>> {
    let name = config.strategy_name()?;
    match name.as_str() {
        "buy_and_hold" => {
            let symbol = symbols
                .first()
                .cloned()
                .context("buy_and_hold requires at least one symbol")?;
            let target_value = config
                .strategy
                .get("target_value")
                .and_then(|v| v.as_f64())
                .map(Money::from_f64)
                .unwrap_or(config.account.initial_capital_money());
            Ok(Box::new(examples::BuyAndHold::new(symbol, target_value)))
        }
        other => bail!("unknown strategy: {other}. Available strategies: buy_and_hold"),
    }
}

pub mod examples {
    //! A minimal reference strategy exercised by the integration tests:
    //! buy a fixed target notional of a single symbol on day one, then hold.

    use super::*;
    use crate::order::OrderType;

    pub struct BuyAndHold {
        pub symbol: Symbol,
        pub target_value: crate::types::Money,
        bought: bool,
    }

    impl BuyAndHold {
        pub fn new(symbol: Symbol, target_value: crate::types::Money) -> Self {
            BuyAndHold {
                symbol,
                target_value,
                bought: false,
            }
        }
    }

    impl Strategy for BuyAndHold {
        fn initialize(&mut self, _ctx: &Context) {}

        fn handle_bar(&mut self, ctx: &Context, bars: &HashMap<Symbol, Bar>) {
            if self.bought || !bars.contains_key(&self.symbol) {
                return;
            }
            if ctx
                .order_value(&self.symbol, self.target_value, OrderType::Market, None)
                .is_ok()
            {
                self.bought = true;
            }
        }
    }
}
