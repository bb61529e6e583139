//! C8 — Lifecycle Sandbox.
//!
//! Isolates every strategy callback so a panic, an unwind, or a call that
//! blocks past `block_threshold_seconds` never takes the scheduler down
//! with it. Grounded in the teacher crate's `state_manager.rs`, which wraps
//! persistence calls in `catch_unwind` to keep a single corrupt write from
//! aborting the whole run — generalized here to wrap every strategy hook.

use crate::context::Context;
use crate::error::QTraderError;
use crate::provider::csv_provider::Bar;
use crate::strategy::Strategy;
use crate::types::Symbol;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Configuration for how strictly the sandbox treats a misbehaving
/// strategy, mapped 1:1 onto spec.md §4.4's lifecycle fields.
#[derive(Debug, Clone, Copy)]
pub struct SandboxConfig {
    /// A hook call running longer than this is logged as a stall; it is
    /// never killed mid-flight (Rust has no safe async cancellation of a
    /// synchronous call), but it sets `resync_requested` so the scheduler
    /// re-synchronizes the clock before continuing.
    pub block_threshold_seconds: f64,
    /// If true, a panic in `initialize` is a fatal startup fault that
    /// aborts the run. If false, the run continues with the strategy
    /// effectively inert for the day `initialize` failed on.
    pub strict_init: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            block_threshold_seconds: 5.0,
            strict_init: true,
        }
    }
}

/// Wraps a `Strategy` and runs every hook through `catch_unwind` plus a
/// wall-clock stall check. A caught panic becomes `QTraderError::StrategyFault`
/// and is logged; it never reaches the scheduler as a propagating error.
pub struct Sandbox<S: Strategy> {
    strategy: S,
    config: SandboxConfig,
    resync_requested: bool,
}

impl<S: Strategy> Sandbox<S> {
    pub fn new(strategy: S, config: SandboxConfig) -> Self {
        Sandbox {
            strategy,
            config,
            resync_requested: false,
        }
    }

    pub fn resync_requested(&self) -> bool {
        self.resync_requested
    }

    pub fn clear_resync(&mut self) {
        self.resync_requested = false;
    }

    fn guard<F: FnOnce(&mut S)>(
        &mut self,
        hook: &'static str,
        ctx: &Context,
        f: F,
    ) -> Result<(), QTraderError> {
        let _ = ctx;
        let started = Instant::now();
        let strategy = &mut self.strategy;
        let result = panic::catch_unwind(AssertUnwindSafe(move || f(strategy)));

        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs_f64(self.config.block_threshold_seconds) {
            warn!(hook, elapsed_secs = elapsed.as_secs_f64(), "strategy hook exceeded block threshold");
            self.resync_requested = true;
        }

        result.map_err(|payload| {
            let message = panic_message(&payload);
            error!(hook, %message, "strategy fault caught by sandbox");
            QTraderError::StrategyFault {
                hook,
                source: anyhow::anyhow!(message),
            }
        })
    }

    pub fn initialize(&mut self, ctx: &Context) -> Result<(), QTraderError> {
        let outcome = self.guard("initialize", ctx, |s| s.initialize(ctx));
        if outcome.is_err() && self.config.strict_init {
            return outcome;
        }
        if let Err(e) = &outcome {
            warn!(error = %e, "initialize faulted under non-strict_init; continuing");
        }
        Ok(())
    }

    pub fn before_trading(&mut self, ctx: &Context) -> Result<(), QTraderError> {
        self.guard("before_trading", ctx, |s| s.before_trading(ctx))
    }

    pub fn handle_bar(
        &mut self,
        ctx: &Context,
        bars: &HashMap<Symbol, Bar>,
    ) -> Result<(), QTraderError> {
        self.guard("handle_bar", ctx, |s| s.handle_bar(ctx, bars))
    }

    pub fn after_trading(&mut self, ctx: &Context) -> Result<(), QTraderError> {
        self.guard("after_trading", ctx, |s| s.after_trading(ctx))
    }

    pub fn broker_settle(&mut self, ctx: &Context) -> Result<(), QTraderError> {
        self.guard("broker_settle", ctx, |s| s.broker_settle(ctx))
    }

    pub fn on_end(&mut self, ctx: &Context) -> Result<(), QTraderError> {
        self.guard("on_end", ctx, |s| s.on_end(ctx))
    }

    pub fn inner(&self) -> &S {
        &self.strategy
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "strategy panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Calendar;
    use crate::context::AccountState;
    use crate::order::OrderManager;
    use crate::portfolio::Portfolio;
    use crate::position::{PositionManager, TradingRule};
    use crate::provider::csv_provider::CsvDataProvider;
    use crate::types::Money;
    use parking_lot::RwLock;
    use std::sync::Arc;

    struct PanicsOnBar;
    impl Strategy for PanicsOnBar {
        fn initialize(&mut self, _ctx: &Context) {}
        fn handle_bar(&mut self, _ctx: &Context, _bars: &HashMap<Symbol, Bar>) {
            panic!("deliberate strategy fault");
        }
    }

    fn ctx() -> Context {
        let account = Arc::new(RwLock::new(AccountState {
            portfolio: Portfolio::new(Money::from_f64(1000.0), Money::ZERO),
            positions: PositionManager::new(TradingRule::T1),
            orders: OrderManager::new(),
        }));
        Context::new(
            chrono::Utc::now(),
            Arc::new(Calendar::new(vec![], vec![])),
            Arc::new(CsvDataProvider::new()),
            account,
            serde_json::Value::Null,
            1,
        )
    }

    #[test]
    fn panic_in_handle_bar_is_caught_as_strategy_fault() {
        let mut sandbox = Sandbox::new(PanicsOnBar, SandboxConfig::default());
        let c = ctx();
        let result = sandbox.handle_bar(&c, &HashMap::new());
        assert!(matches!(result, Err(QTraderError::StrategyFault { hook: "handle_bar", .. })));
    }

    #[test]
    fn non_strict_init_swallows_initialize_panic() {
        struct PanicsOnInit;
        impl Strategy for PanicsOnInit {
            fn initialize(&mut self, _ctx: &Context) {
                panic!("boom");
            }
            fn handle_bar(&mut self, _ctx: &Context, _bars: &HashMap<Symbol, Bar>) {}
        }
        let mut sandbox = Sandbox::new(
            PanicsOnInit,
            SandboxConfig { block_threshold_seconds: 5.0, strict_init: false },
        );
        let c = ctx();
        assert!(sandbox.initialize(&c).is_ok());
    }
}
