//! C9 — Scheduler.
//!
//! Drives the strategy through a run, either as a deterministic backtest
//! loop over historical bars or as a simulation state machine tracking
//! wall-clock phases. Grounded in the teacher crate's `backtest.rs` event
//! loop (day-by-day iteration calling strategy hooks, then settling),
//! generalized to the explicit phase machine and resume/resync semantics
//! spec.md §4.3 and §8's I4/I8 describe.

use crate::calendar::Calendar;
use crate::context::{AccountState, Context};
use crate::matching::MatchingEngine;
use crate::order::OrderStatus;
use crate::provider::{csv_provider::Bar, DataProvider};
use crate::sandbox::{Sandbox, SandboxConfig};
use crate::strategy::{SchedulePoint, Strategy};
use crate::types::Symbol;
use chrono::NaiveDate;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Phases of a single trading day, fired in this fixed order every day the
/// scheduler processes. `Closed` is not a phase of a trading day; it marks
/// non-trading days skipped entirely (no hooks fire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPhase {
    BeforeTrading,
    Trading,
    AfterTrading,
    Settlement,
    Closed,
}

/// One day's outcome, returned for artifact writers (§6.4) to consume.
pub struct DayResult {
    pub date: NaiveDate,
    pub net_worth: crate::types::Money,
    pub fills: usize,
    pub rejections: usize,
}

/// Drives a backtest: iterates the calendar day by day, firing
/// before_trading → per-bar handle_bar calls → after_trading → settlement,
/// then rolling T+1 availability and appending the day's equity record.
pub struct Scheduler<S: Strategy> {
    pub calendar: Arc<Calendar>,
    provider: Arc<dyn DataProvider>,
    account: Arc<RwLock<AccountState>>,
    matching: MatchingEngine,
    sandbox: Sandbox<S>,
    symbols: Vec<Symbol>,
    user_data: Value,
    position_snapshots: std::collections::BTreeMap<NaiveDate, Vec<crate::position::Position>>,
    order_lot_size: i64,
    /// Schedule points declared in configuration (`hooks.handle_bar`),
    /// merged with the strategy's own `Strategy::schedule()` at the start
    /// of every day. Unlike the strategy's, these don't require a live
    /// strategy instance to read, so they're stored here rather than
    /// re-derived from config on every call.
    configured_schedule: Vec<SchedulePoint>,
}

impl<S: Strategy> Scheduler<S> {
    pub fn new(
        calendar: Calendar,
        provider: Arc<dyn DataProvider>,
        account: Arc<RwLock<AccountState>>,
        matching: MatchingEngine,
        strategy: S,
        sandbox_config: SandboxConfig,
        symbols: Vec<Symbol>,
        order_lot_size: i64,
        configured_schedule: Vec<SchedulePoint>,
    ) -> Self {
        Scheduler {
            calendar: Arc::new(calendar),
            provider,
            account,
            matching,
            sandbox: Sandbox::new(strategy, sandbox_config),
            symbols,
            user_data: Value::Null,
            position_snapshots: std::collections::BTreeMap::new(),
            order_lot_size,
            configured_schedule,
        }
    }

    pub fn position_snapshots(&self) -> &std::collections::BTreeMap<NaiveDate, Vec<crate::position::Position>> {
        &self.position_snapshots
    }

    /// Seed prior-day position snapshots carried over from a resumed
    /// envelope, so a later fork against this run can still look up
    /// `position_snapshots[fork_date - 1]` for days before the resume point.
    pub fn seed_position_snapshots(
        &mut self,
        snapshots: std::collections::BTreeMap<NaiveDate, Vec<crate::position::Position>>,
    ) {
        self.position_snapshots.extend(snapshots);
    }

    pub fn set_initial_state(&mut self, user_data: Value) {
        self.user_data = user_data;
    }

    fn make_context(&self, now: chrono::DateTime<chrono::Utc>) -> Context {
        Context::new(
            now,
            Arc::clone(&self.calendar),
            Arc::clone(&self.provider),
            Arc::clone(&self.account),
            self.user_data.clone(),
            self.order_lot_size,
        )
    }

    /// Every point in the day `handle_bar` fires at: the strategy's own
    /// `Strategy::schedule()` plus configuration's `hooks.handle_bar`,
    /// merged and sorted. Falls back to a single point at the first
    /// session's open so a strategy that declares no schedule still gets
    /// exactly one `handle_bar` call a day.
    pub(crate) fn schedule_points(&self) -> Vec<SchedulePoint> {
        let mut points = self.sandbox.inner().schedule();
        points.extend(self.configured_schedule.iter().copied());
        if points.is_empty() {
            let open = self.calendar.sessions().first().map(|s| s.open).unwrap_or_default();
            points.push(SchedulePoint { time: open, label: "session_open" });
        }
        points.sort_by_key(|p| p.time);
        points.dedup_by_key(|p| p.time);
        points
    }

    /// Run every trading day in `[start, end]`, in calendar order. Returns
    /// one `DayResult` per trading day processed. A `StrategyFault` on any
    /// hook is logged and the day continues; a provider error that isn't
    /// "no quote this tick" is treated as `Fatal` and aborts the run with no
    /// partial mutation beyond the already-settled days (§7).
    ///
    /// Fires `initialize` once before the first day and `on_end` once after
    /// the last — callers driving one day at a time (the wall-clock
    /// simulation loop) should use `initialize`/`run_single_day`/`on_end`
    /// directly instead, so those hooks fire exactly once per run rather
    /// than once per call.
    pub fn run_backtest(&mut self, start: NaiveDate, end: NaiveDate) -> anyhow::Result<Vec<DayResult>> {
        self.initialize(start)?;

        let mut results = Vec::new();
        let dates: Vec<NaiveDate> = self
            .calendar
            .days()
            .iter()
            .filter(|&&d| d >= start && d <= end)
            .copied()
            .collect();
        for date in dates {
            results.push(self.run_single_day(date)?);
        }

        self.finalize(end);
        Ok(results)
    }

    /// Resume a previously-started run from `start` without re-firing
    /// `initialize` or re-seeding strategy state — the caller has already
    /// restored the strategy's in-memory state and `user_data` from a
    /// snapshot envelope, and the resume contract (§8) forbids running
    /// `initialize` a second time. Still fires `on_end` once at `end`.
    pub fn resume_backtest(&mut self, start: NaiveDate, end: NaiveDate) -> anyhow::Result<Vec<DayResult>> {
        let mut results = Vec::new();
        let dates: Vec<NaiveDate> = self
            .calendar
            .days()
            .iter()
            .filter(|&&d| d >= start && d <= end)
            .copied()
            .collect();
        for date in dates {
            results.push(self.run_single_day(date)?);
        }

        self.finalize(end);
        Ok(results)
    }

    pub fn initialize(&mut self, at: NaiveDate) -> anyhow::Result<()> {
        let init_ctx = self.make_context(self.calendar.datetime_at(at, Default::default()));
        if let Err(e) = self.sandbox.initialize(&init_ctx) {
            error!(error = %e, "fatal: strategy initialize faulted under strict_init");
            return Err(anyhow::anyhow!(e));
        }
        Ok(())
    }

    pub fn finalize(&mut self, at: NaiveDate) {
        let final_ctx = self.make_context(self.calendar.datetime_at(at, Default::default()));
        let _ = self.sandbox.on_end(&final_ctx);
    }

    /// Process exactly one trading day's full hook sequence and settlement.
    /// Safe to call repeatedly from a long-lived driver — unlike
    /// `run_backtest`, it never re-fires `initialize`/`on_end`.
    pub fn run_single_day(&mut self, date: NaiveDate) -> anyhow::Result<DayResult> {
        self.run_day(date)
    }

    fn run_day(&mut self, date: NaiveDate) -> anyhow::Result<DayResult> {
        let points = self.schedule_points();
        let open_time = points.first().map(|p| p.time).unwrap_or_default();
        let close_time = points.last().copied().map(|p| p.time).unwrap_or(open_time);

        self.before_trading_at(date, open_time);

        let mut fills = 0;
        for point in &points {
            fills += self.handle_bar_at(date, *point)?;
        }

        self.after_trading_at(date, close_time);
        self.settle_day(date, fills)
    }

    /// Fire `before_trading` at `time` on `date`. Exposed separately from
    /// `run_day` so the wall-clock simulation loop (§4.3's second scheduler
    /// mode) can drive the same phase through real time instead of all at
    /// once.
    pub fn before_trading_at(&mut self, date: NaiveDate, time: chrono::NaiveTime) {
        let ctx = self.make_context(self.calendar.datetime_at(date, time));
        if let Err(e) = self.sandbox.before_trading(&ctx) {
            warn!(error = %e, date = %date, "before_trading faulted, continuing");
        }
    }

    /// Fire `handle_bar` for a single schedule point, then pulse the
    /// matching engine against that tick's quotes. Returns the number of
    /// orders filled at this tick.
    pub fn handle_bar_at(&mut self, date: NaiveDate, point: SchedulePoint) -> anyhow::Result<usize> {
        let tick_now = self.calendar.datetime_at(date, point.time);
        let tick_ctx = self.make_context(tick_now);
        let bars = self.collect_bars(date, tick_now)?;
        if let Err(e) = self.sandbox.handle_bar(&tick_ctx, &bars) {
            warn!(error = %e, date = %date, label = point.label, "handle_bar faulted, continuing");
        }
        self.run_matching_pulse(tick_now)
    }

    pub fn after_trading_at(&mut self, date: NaiveDate, time: chrono::NaiveTime) {
        let ctx = self.make_context(self.calendar.datetime_at(date, time));
        if let Err(e) = self.sandbox.after_trading(&ctx) {
            warn!(error = %e, date = %date, "after_trading faulted, continuing");
        }
    }

    /// Settlement phase: mark to market, roll T+1, fire `broker_settle`,
    /// clear any watchdog resync request, and assemble the day's result.
    /// `fills` is the running count the caller accumulated across the
    /// day's `handle_bar_at` calls.
    pub fn settle_day(&mut self, date: NaiveDate, fills: usize) -> anyhow::Result<DayResult> {
        self.settle(date)?;

        let now = self.calendar.datetime_at(date, Default::default());
        let settle_ctx = self.make_context(now);
        if let Err(e) = self.sandbox.broker_settle(&settle_ctx) {
            warn!(error = %e, date = %date, "broker_settle faulted, continuing");
        }

        if self.sandbox.resync_requested() {
            warn!(date = %date, "resync requested by watchdog; clearing after this day's settlement");
            self.sandbox.clear_resync();
        }

        let net_worth = {
            let state = self.account.read();
            state.portfolio.net_worth(&state.positions)
        };

        let rejections = {
            let state = self.account.read();
            state
                .orders
                .open_book_raw()
                .iter()
                .filter(|o| o.status == OrderStatus::Rejected)
                .count()
        };

        info!(date = %date, %net_worth, fills, rejections, "day settled");

        Ok(DayResult {
            date,
            net_worth,
            fills,
            rejections,
        })
    }

    fn collect_bars(
        &self,
        date: NaiveDate,
        now: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<HashMap<Symbol, Bar>> {
        let _ = date;
        let mut bars = HashMap::new();
        for symbol in &self.symbols {
            if let Some(quote) = self.provider.current_price(symbol, now)? {
                bars.insert(
                    symbol.clone(),
                    Bar {
                        datetime: now,
                        open: quote.current_price.to_f64(),
                        high: quote.current_price.to_f64(),
                        low: quote.current_price.to_f64(),
                        close: quote.current_price.to_f64(),
                        volume: 0.0,
                    },
                );
            }
        }
        Ok(bars)
    }

    fn run_matching_pulse(&mut self, now: chrono::DateTime<chrono::Utc>) -> anyhow::Result<usize> {
        let mut state = self.account.write();
        let AccountState { portfolio, positions, orders } = &mut *state;
        let provider = Arc::clone(&self.provider);
        let mut open_orders: Vec<_> = orders.open_book_raw().to_vec();

        let outcomes = self.matching.pulse(
            &mut open_orders,
            |symbol| provider.current_price(symbol, now).ok().flatten(),
            positions,
            portfolio,
            now,
        );

        *orders = crate::order::OrderManager::restore(open_orders, orders.history().to_vec());

        Ok(outcomes
            .iter()
            .filter(|o| matches!(o, crate::matching::FillOutcome::Filled { .. }))
            .count())
    }

    /// Nightly settlement: mark every position to the day's closing price,
    /// roll T+1 availability, expire unfilled open orders into history, and
    /// append the day's equity record.
    fn settle(&mut self, date: NaiveDate) -> anyhow::Result<()> {
        let now = self.calendar.datetime_at(date, Default::default());
        let mut state = self.account.write();
        let provider = Arc::clone(&self.provider);
        state.positions.mark_to_market(|symbol| {
            provider.current_price(symbol, now).ok().flatten().map(|q| q.current_price)
        });
        state.positions.roll_day();
        state.orders.reset_day();
        let AccountState { portfolio, positions, .. } = &mut *state;
        portfolio.close_day(date, positions);
        self.position_snapshots.insert(date, state.positions.snapshot());
        Ok(())
    }

    /// Watchdog resync (I8, §4.3): after an interruption, run `settle`-only
    /// for every missed trading day, firing no strategy hooks, then expire
    /// any OPEN order left over from before the interruption.
    pub fn resync(&mut self, after: NaiveDate, until: NaiveDate) -> anyhow::Result<()> {
        for date in self.calendar.missed_days(after, until) {
            self.settle(date)?;
        }
        let mut state = self.account.write();
        for order in state.orders.open_orders_mut() {
            order.status = OrderStatus::Expired;
        }
        Ok(())
    }

    pub fn inner_strategy(&self) -> &S {
        self.sandbox.inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Session;
    use crate::matching::CommissionSchedule;
    use crate::order::OrderManager;
    use crate::portfolio::Portfolio;
    use crate::position::{PositionManager, TradingRule};
    use crate::provider::csv_provider::CsvDataProvider;
    use crate::strategy::examples::BuyAndHold;
    use crate::types::{Money, TradingMode};
    use chrono::NaiveTime;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn backtest_runs_every_calendar_day_and_settles_each() {
        let mut provider = CsvDataProvider::new();
        let symbol = Symbol::new("BTCUSDT");
        let _ = &mut provider;

        let calendar = Calendar::new(
            vec![date("2026-01-02"), date("2026-01-05")],
            vec![Session::parse("00:00:00", "23:59:59").unwrap()],
        );

        let account = Arc::new(RwLock::new(AccountState {
            portfolio: Portfolio::new(Money::from_f64(10_000.0), Money::ZERO),
            positions: PositionManager::new(TradingRule::T1),
            orders: OrderManager::new(),
        }));

        let schedule = CommissionSchedule {
            rate: Money::ZERO,
            min_commission: Money::ZERO,
            tax_rate: Money::ZERO,
            slippage: Money::ZERO,
        };

        let strategy = BuyAndHold::new(symbol.clone(), Money::from_f64(1_000.0));
        let mut scheduler = Scheduler::new(
            calendar,
            Arc::new(provider),
            account,
            MatchingEngine::new(schedule, TradingMode::LongOnly),
            strategy,
            SandboxConfig::default(),
            vec![symbol],
            1,
            Vec::new(),
        );

        let results = scheduler
            .run_backtest(date("2026-01-02"), date("2026-01-05"))
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    struct CountsHandleBarCalls {
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Strategy for CountsHandleBarCalls {
        fn initialize(&mut self, _ctx: &Context) {}
        fn handle_bar(&mut self, _ctx: &Context, _bars: &HashMap<Symbol, Bar>) {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn configured_schedule_points_each_fire_handle_bar_once_per_day() {
        let provider = CsvDataProvider::new();
        let calendar = Calendar::new(
            vec![date("2026-01-02")],
            vec![Session::parse("09:00:00", "15:00:00").unwrap()],
        );
        let account = Arc::new(RwLock::new(AccountState {
            portfolio: Portfolio::new(Money::from_f64(10_000.0), Money::ZERO),
            positions: PositionManager::new(TradingRule::T1),
            orders: OrderManager::new(),
        }));
        let schedule = CommissionSchedule {
            rate: Money::ZERO,
            min_commission: Money::ZERO,
            tax_rate: Money::ZERO,
            slippage: Money::ZERO,
        };
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let strategy = CountsHandleBarCalls { calls: Arc::clone(&calls) };

        let configured = vec![
            SchedulePoint { time: NaiveTime::parse_from_str("09:30:00", "%H:%M:%S").unwrap(), label: "configured_handle_bar" },
            SchedulePoint { time: NaiveTime::parse_from_str("14:00:00", "%H:%M:%S").unwrap(), label: "configured_handle_bar" },
            SchedulePoint { time: NaiveTime::parse_from_str("09:30:00", "%H:%M:%S").unwrap(), label: "configured_handle_bar" },
        ];

        let mut scheduler = Scheduler::new(
            calendar,
            Arc::new(provider),
            account,
            MatchingEngine::new(schedule, TradingMode::LongOnly),
            strategy,
            SandboxConfig::default(),
            vec![],
            1,
            configured,
        );

        scheduler.run_backtest(date("2026-01-02"), date("2026-01-02")).unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
