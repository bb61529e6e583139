//! `backtest` command — run a fresh deterministic backtest end to end.

use anyhow::{Context as _, Result};
use qtrader::artifacts::{write_daily_positions_csv, write_equity_csv, write_orders_csv};
use qtrader::calendar::Calendar;
use qtrader::config::{Config, RunMode};
use qtrader::context::AccountState;
use qtrader::matching::MatchingEngine;
use qtrader::portfolio::Portfolio;
use qtrader::position::PositionManager;
use qtrader::provider::csv_provider::CsvDataProvider;
use qtrader::provider::DataProvider;
use qtrader::sandbox::SandboxConfig;
use qtrader::scheduler::Scheduler;
use qtrader::sim::SimulationDriver;
use qtrader::snapshot::{Envelope, EnvelopeKind};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub fn run(config_path: String) -> Result<()> {
    info!(config_path, "starting backtest");
    let config = Config::from_file(&config_path)?;

    let symbols = config.account.symbols();
    let mut provider = CsvDataProvider::new();
    for symbol in &symbols {
        let path = Path::new(&config.engine.data_dir).join(format!("{}.csv", symbol.as_str()));
        provider
            .load_symbol(symbol.clone(), &path)
            .with_context(|| format!("failed to load price data for {symbol}"))?;
    }

    let calendar_days =
        provider.trading_calendar(config.engine.start_date, config.engine.end_date)?;
    let calendar = Calendar::new(calendar_days, config.engine.sessions()?);

    let account = Arc::new(RwLock::new(AccountState {
        portfolio: Portfolio::new(config.account.initial_capital_money(), config.account.margin_rate_money()),
        positions: PositionManager::new(config.account.trading_rule.into()),
        orders: qtrader::order::OrderManager::new(),
    }));

    let strategy = qtrader::strategy::build(&config, &symbols)?;
    let mut scheduler = Scheduler::new(
        calendar,
        Arc::new(provider),
        Arc::clone(&account),
        MatchingEngine::new(config.matching.to_schedule(), config.account.trading_mode.into()),
        strategy,
        config.lifecycle.to_sandbox_config(),
        symbols,
        config.account.order_lot_size,
        config.hooks.handle_bar.schedule_points()?,
    );

    // §4.3's two scheduler modes: `backtest` drives the whole calendar
    // range deterministically in one pass; `simulation` gates each tick to
    // `tick_interval_seconds` of real wall-clock time via `SimulationDriver`.
    let position_snapshots: BTreeMap<_, _> = match config.engine.mode {
        RunMode::Backtest => {
            let results = scheduler.run_backtest(config.engine.start_date, config.engine.end_date)?;
            info!(days = results.len(), "backtest complete");
            scheduler.position_snapshots().clone()
        }
        RunMode::Simulation => {
            let mut driver = SimulationDriver::new(scheduler, config.engine.tick_interval(), config.engine.end_date);
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            let runtime = tokio::runtime::Runtime::new()?;
            let processed = runtime.block_on(driver.run(config.engine.start_date, rx))?;
            info!(days = processed, "simulation complete");
            driver.scheduler().position_snapshots().clone()
        }
    };

    std::fs::create_dir_all(&config.engine.results_dir)?;
    let results_dir = Path::new(&config.engine.results_dir);
    {
        let state = account.read();
        write_equity_csv(results_dir.join("equity.csv"), state.portfolio.history())?;
        write_orders_csv(results_dir.join("orders.csv"), &state.orders)?;
        write_daily_positions_csv(results_dir.join("daily_positions.csv"), &position_snapshots)?;
    }

    let snapshot_dir = Path::new(&config.snapshot.dir);
    std::fs::create_dir_all(snapshot_dir)?;
    let state = account.read();
    let envelope = Envelope::capture(
        EnvelopeKind::Finished,
        config.engine.end_date,
        &state,
        position_snapshots,
        serde_json::Value::Null,
    );
    envelope.save(snapshot_dir.join(format!("run{}.json", EnvelopeKind::Finished.file_suffix())))?;

    Ok(())
}
