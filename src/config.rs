//! Configuration management (§6.3).
//!
//! Loads a run's JSON configuration file, adapted from the teacher crate's
//! `Config::from_file` (flat exchange/trading/tax/backtest sections) into
//! the engine/account/matching/lifecycle/benchmark/snapshot/watchdog
//! section layout spec.md §6.3 names.

use crate::calendar::Session;
use crate::matching::CommissionSchedule;
use crate::position::TradingRule;
use crate::sandbox::SandboxConfig;
use crate::strategy::SchedulePoint;
use crate::types::{Money, Symbol, TradingMode};
use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub account: AccountConfig,
    pub matching: MatchingConfig,
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub benchmark: Option<BenchmarkConfig>,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    /// Arbitrary strategy parameters, opaque to the engine and handed to
    /// the strategy's constructor unparsed.
    #[serde(default)]
    pub strategy: serde_json::Value,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("failed to read config file")?;
        let config: Config = serde_json::from_str(&contents).context("failed to parse config JSON")?;
        Ok(config)
    }

    pub fn strategy_name(&self) -> Result<String> {
        self.strategy
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .context("'strategy.name' is required in config, e.g. {\"strategy\": {\"name\": \"buy_and_hold\"}}")
    }
}

/// Whether a run is driven deterministically against historical bars, or
/// gated against real wall-clock time (§4.3's two scheduler modes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Backtest,
    Simulation,
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Backtest
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionWindowConfig {
    pub open: String,
    pub close: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub start_date: chrono::NaiveDate,
    pub end_date: chrono::NaiveDate,
    #[serde(default)]
    pub mode: RunMode,
    pub trading_sessions: Vec<SessionWindowConfig>,
    #[serde(default = "default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    pub data_dir: String,
    pub results_dir: String,
}

fn default_tick_interval_seconds() -> u64 {
    1
}

impl EngineConfig {
    pub fn sessions(&self) -> Result<Vec<Session>> {
        self.trading_sessions
            .iter()
            .map(|s| Session::parse(&s.open, &s.close))
            .collect()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub symbols: Vec<String>,
    pub initial_capital: f64,
    pub margin_rate: f64,
    #[serde(default = "default_trading_rule")]
    pub trading_rule: TradingRuleConfig,
    #[serde(default)]
    pub trading_mode: TradingModeConfig,
    #[serde(default = "default_order_lot_size")]
    pub order_lot_size: i64,
}

fn default_trading_rule() -> TradingRuleConfig {
    TradingRuleConfig::T1
}

fn default_order_lot_size() -> i64 {
    1
}

/// Whether the account may open a naked short (`long_short`) or is
/// restricted to closing-only sells against an existing long (`long_only`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingModeConfig {
    LongOnly,
    LongShort,
}

impl Default for TradingModeConfig {
    fn default() -> Self {
        TradingModeConfig::LongOnly
    }
}

impl From<TradingModeConfig> for TradingMode {
    fn from(value: TradingModeConfig) -> Self {
        match value {
            TradingModeConfig::LongOnly => TradingMode::LongOnly,
            TradingModeConfig::LongShort => TradingMode::LongShort,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingRuleConfig {
    T0,
    T1,
}

impl From<TradingRuleConfig> for TradingRule {
    fn from(value: TradingRuleConfig) -> Self {
        match value {
            TradingRuleConfig::T0 => TradingRule::T0,
            TradingRuleConfig::T1 => TradingRule::T1,
        }
    }
}

impl AccountConfig {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.iter().map(Symbol::new).collect()
    }

    pub fn initial_capital_money(&self) -> Money {
        Money::from_f64(self.initial_capital)
    }

    pub fn margin_rate_money(&self) -> Money {
        Money::from_f64(self.margin_rate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub commission_rate: f64,
    pub min_commission: f64,
    pub tax_rate: f64,
    pub slippage: f64,
}

impl MatchingConfig {
    pub fn to_schedule(&self) -> CommissionSchedule {
        CommissionSchedule {
            rate: Money::from_f64(self.commission_rate),
            min_commission: Money::from_f64(self.min_commission),
            tax_rate: Money::from_f64(self.tax_rate),
            slippage: Money::from_f64(self.slippage),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            commission_rate: 0.0003,
            min_commission: 5.0,
            tax_rate: 0.001,
            slippage: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_block_threshold")]
    pub block_threshold_seconds: f64,
    #[serde(default = "default_strict_init")]
    pub strict_init: bool,
}

fn default_block_threshold() -> f64 {
    5.0
}

fn default_strict_init() -> bool {
    true
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            block_threshold_seconds: default_block_threshold(),
            strict_init: default_strict_init(),
        }
    }
}

impl LifecycleConfig {
    pub fn to_sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            block_threshold_seconds: self.block_threshold_seconds,
            strict_init: self.strict_init,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub symbol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_dir")]
    pub dir: String,
    #[serde(default)]
    pub auto_save_mode: AutoSaveMode,
    /// Number of trading days between auto-saves when `auto_save_mode` is
    /// `Interval`. Ignored otherwise.
    #[serde(default = "default_auto_save_interval")]
    pub auto_save_interval: u32,
}

fn default_snapshot_dir() -> String {
    "snapshots".to_string()
}

fn default_auto_save_interval() -> u32 {
    1
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            dir: default_snapshot_dir(),
            auto_save_mode: AutoSaveMode::default(),
            auto_save_interval: default_auto_save_interval(),
        }
    }
}

/// When the run should write an intermediate `Paused` envelope to
/// `snapshot.dir` as it progresses, independent of the final envelope
/// always written at the end of a `backtest`/`resume` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoSaveMode {
    Manual,
    EveryDay,
    Interval,
}

impl Default for AutoSaveMode {
    fn default() -> Self {
        AutoSaveMode::Manual
    }
}

impl AutoSaveMode {
    /// Whether day `index` (0-based, counting trading days processed this
    /// run) should trigger an auto-save under this mode.
    pub fn fires_on(&self, index: usize, interval: u32) -> bool {
        match self {
            AutoSaveMode::Manual => false,
            AutoSaveMode::EveryDay => true,
            AutoSaveMode::Interval => interval > 0 && (index + 1) % interval as usize == 0,
        }
    }
}

/// Extra callback times beyond the fixed before/after-trading and
/// settlement hooks, merged with `Strategy::schedule()` into the day's
/// ordered schedule-point list (§6.3's `hooks.handle_bar`). Accepts either
/// a single `"HH:MM:SS"` string or a list, matching the teacher's tolerant
/// single-or-list config fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleTimesConfig {
    Single(String),
    Many(Vec<String>),
}

impl Default for ScheduleTimesConfig {
    fn default() -> Self {
        ScheduleTimesConfig::Many(Vec::new())
    }
}

impl ScheduleTimesConfig {
    pub fn schedule_points(&self) -> Result<Vec<SchedulePoint>> {
        let raw: Vec<&str> = match self {
            ScheduleTimesConfig::Single(s) => vec![s.as_str()],
            ScheduleTimesConfig::Many(v) => v.iter().map(String::as_str).collect(),
        };
        raw.iter()
            .map(|s| {
                NaiveTime::parse_from_str(s, "%H:%M:%S")
                    .map(|time| SchedulePoint { time, label: "configured_handle_bar" })
                    .with_context(|| format!("invalid hooks.handle_bar time {s:?}"))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub handle_bar: ScheduleTimesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_watchdog_enabled")]
    pub enabled: bool,
}

fn default_watchdog_enabled() -> bool {
    true
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig {
            enabled: default_watchdog_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_json() {
        let json = r#"{
            "engine": {
                "start_date": "2026-01-02",
                "end_date": "2026-01-30",
                "trading_sessions": [{"open": "09:15:00", "close": "15:30:00"}],
                "data_dir": "data",
                "results_dir": "results"
            },
            "account": {
                "symbols": ["BTCUSDT"],
                "initial_capital": 100000.0,
                "margin_rate": 0.5
            },
            "matching": {
                "commission_rate": 0.0003,
                "min_commission": 5.0,
                "tax_rate": 0.001,
                "slippage": 0.0
            },
            "lifecycle": {},
            "strategy": { "name": "buy_and_hold" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.account.trading_rule, TradingRuleConfig::T1);
        assert_eq!(config.account.trading_mode, TradingModeConfig::LongOnly);
        assert_eq!(config.account.order_lot_size, 1);
        assert_eq!(config.engine.mode, RunMode::Backtest);
        assert_eq!(config.engine.tick_interval_seconds, 1);
        assert_eq!(config.strategy_name().unwrap(), "buy_and_hold");
        assert!(config.lifecycle.strict_init);
    }

    #[test]
    fn engine_sessions_parses_trading_sessions_list() {
        let json = r#"{
            "engine": {
                "start_date": "2026-01-02",
                "end_date": "2026-01-30",
                "mode": "simulation",
                "tick_interval_seconds": 5,
                "trading_sessions": [
                    {"open": "09:15:00", "close": "11:30:00"},
                    {"open": "13:00:00", "close": "15:30:00"}
                ],
                "data_dir": "data",
                "results_dir": "results"
            },
            "account": {
                "symbols": ["BTCUSDT"],
                "initial_capital": 100000.0,
                "margin_rate": 0.5,
                "trading_mode": "long_short",
                "order_lot_size": 100
            },
            "matching": {
                "commission_rate": 0.0003,
                "min_commission": 5.0,
                "tax_rate": 0.001,
                "slippage": 0.0
            },
            "lifecycle": {},
            "hooks": { "handle_bar": ["10:00:00", "14:00:00"] },
            "strategy": { "name": "buy_and_hold" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.engine.mode, RunMode::Simulation);
        assert_eq!(config.engine.tick_interval(), Duration::from_secs(5));
        assert_eq!(config.engine.sessions().unwrap().len(), 2);
        assert_eq!(config.account.trading_mode, TradingModeConfig::LongShort);
        assert_eq!(config.account.order_lot_size, 100);
        assert_eq!(config.hooks.handle_bar.schedule_points().unwrap().len(), 2);
    }
}
