//! `resume` command — continue a paused run from its snapshot envelope.

use anyhow::{bail, Context as _, Result};
use qtrader::artifacts::{write_daily_positions_csv, write_equity_csv, write_orders_csv};
use qtrader::calendar::Calendar;
use qtrader::config::Config;
use qtrader::matching::MatchingEngine;
use qtrader::provider::csv_provider::CsvDataProvider;
use qtrader::provider::DataProvider;
use qtrader::scheduler::Scheduler;
use qtrader::snapshot::Envelope;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub fn run(config_path: String, snapshot_path: String) -> Result<()> {
    info!(config_path, snapshot_path, "resuming run from snapshot");
    let config = Config::from_file(&config_path)?;
    let envelope = Envelope::load(&snapshot_path).context("failed to load snapshot envelope")?;

    if !envelope.kind.is_resumable() {
        bail!("snapshot at {snapshot_path} is {:?}, not PAUSED — not resumable", envelope.kind);
    }

    let symbols = config.account.symbols();
    let mut provider = CsvDataProvider::new();
    for symbol in &symbols {
        let path = Path::new(&config.engine.data_dir).join(format!("{}.csv", symbol.as_str()));
        provider.load_symbol(symbol.clone(), &path)?;
    }

    let calendar_days = provider.trading_calendar(config.engine.start_date, config.engine.end_date)?;
    let calendar = Calendar::new(calendar_days, config.engine.sessions()?);

    let account = Arc::new(RwLock::new(envelope.restore_account()));

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

    scheduler.seed_position_snapshots(envelope.account.position_snapshots.clone());
    scheduler.set_initial_state(envelope.user_data.clone());

    if config.watchdog.enabled {
        scheduler.resync(envelope.as_of, config.engine.end_date)?;
    }

    let resume_from = scheduler
        .calendar
        .next_day(envelope.as_of)
        .unwrap_or(config.engine.end_date);
    // `resume_backtest`, not `run_backtest`: the strategy's `initialize`
    // already ran before this snapshot was taken and must not run again.
    let results = scheduler.resume_backtest(resume_from, config.engine.end_date)?;
    info!(days = results.len(), "resume complete");

    std::fs::create_dir_all(&config.engine.results_dir)?;
    let results_dir = Path::new(&config.engine.results_dir);
    let state = account.read();
    write_equity_csv(results_dir.join("equity.csv"), state.portfolio.history())?;
    write_orders_csv(results_dir.join("orders.csv"), &state.orders)?;
    write_daily_positions_csv(results_dir.join("daily_positions.csv"), scheduler.position_snapshots())?;

    Ok(())
}
