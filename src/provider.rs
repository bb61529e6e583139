//! C2 — Data Provider contract (external dependency, §6.1).
//!
//! QTrader never implements a market-data store; it only consumes this
//! trait. A `nil` quote during trading means "no print this tick" — the
//! matching engine defers the order rather than rejecting it. A `nil`
//! `symbol_info` on the day means orders for that symbol are rejected.

use crate::types::{Money, Symbol};
use chrono::{DateTime, NaiveDate, Utc};

/// One tick's worth of quote data for `(symbol, now)`. Only `current_price`
/// is required; the rest fall back per §4.2's price-selection rules.
#[derive(Debug, Clone, Copy)]
pub struct Quote {
    pub current_price: Money,
    pub ask1: Option<Money>,
    pub bid1: Option<Money>,
    pub high_limit: Option<Money>,
    pub low_limit: Option<Money>,
}

impl Quote {
    pub fn simple(price: Money) -> Self {
        Quote {
            current_price: price,
            ask1: None,
            bid1: None,
            high_limit: None,
            low_limit: None,
        }
    }

    pub fn ask(&self) -> Money {
        self.ask1.unwrap_or(self.current_price)
    }

    pub fn bid(&self) -> Money {
        self.bid1.unwrap_or(self.current_price)
    }

    pub fn within_limits(&self, price: Money) -> bool {
        let above_low = self.low_limit.map(|l| price >= l).unwrap_or(true);
        let below_high = self.high_limit.map(|h| price <= h).unwrap_or(true);
        above_low && below_high
    }
}

#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub symbol_name: String,
    pub is_suspended: bool,
}

/// The minimal inbound contract every backtest/simulation run depends on.
/// Implementations must be deterministic per `(inputs)` in backtest mode;
/// the framework issues at most one `current_price` call at a time.
pub trait DataProvider: Send + Sync {
    /// Ordered list of `"YYYY-MM-DD"` trading days in `[start, end]`. May be
    /// empty if the provider has no calendar data for the window.
    fn trading_calendar(&self, start: NaiveDate, end: NaiveDate) -> anyhow::Result<Vec<NaiveDate>>;

    /// `None` means "no quote this tick" — the caller must defer, not reject.
    fn current_price(&self, symbol: &Symbol, at: DateTime<Utc>) -> anyhow::Result<Option<Quote>>;

    /// `None` means orders for `symbol` on `date` are rejected outright.
    fn symbol_info(&self, symbol: &Symbol, date: NaiveDate) -> anyhow::Result<Option<SymbolInfo>>;
}

pub mod csv_provider {
    //! Reference `DataProvider` backed by on-disk OHLCV CSVs, following the
    //! teacher crate's `data::load_csv` loader. Bars are keyed by exact
    //! timestamp; `current_price` returns the close of the bar at `at`
    //! with no synthetic ask/bid spread, `symbol_info` reports "not
    //! suspended" for any symbol with at least one loaded bar.

    use super::{DataProvider, Quote, SymbolInfo};
    use crate::types::{Money, Symbol};
    use anyhow::{Context, Result};
    use chrono::{DateTime, NaiveDate, Utc};
    use std::collections::{BTreeMap, HashMap};
    use std::path::Path;

    #[derive(Debug, Clone)]
    pub struct Bar {
        pub datetime: DateTime<Utc>,
        pub open: f64,
        pub high: f64,
        pub low: f64,
        pub close: f64,
        pub volume: f64,
    }

    pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
        let mut reader = csv::Reader::from_path(path.as_ref()).context("failed to open CSV file")?;
        let mut bars = Vec::new();

        for (row_idx, result) in reader.records().enumerate() {
            let record = result.with_context(|| format!("failed to read row {}", row_idx + 1))?;
            let dt_str = record.get(0).context("missing datetime column")?;
            let datetime = dt_str.parse::<DateTime<Utc>>().or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(dt_str, "%Y-%m-%d %H:%M:%S")
                    .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            })?;

            bars.push(Bar {
                datetime,
                open: record.get(1).context("missing open")?.parse()?,
                high: record.get(2).context("missing high")?.parse()?,
                low: record.get(3).context("missing low")?.parse()?,
                close: record.get(4).context("missing close")?.parse()?,
                volume: record.get(5).context("missing volume")?.parse()?,
            });
        }

        Ok(bars)
    }

    pub struct CsvDataProvider {
        bars: HashMap<Symbol, BTreeMap<DateTime<Utc>, Bar>>,
    }

    impl CsvDataProvider {
        pub fn new() -> Self {
            CsvDataProvider {
                bars: HashMap::new(),
            }
        }

        pub fn load_symbol(&mut self, symbol: Symbol, path: impl AsRef<Path>) -> Result<()> {
            let bars = load_csv(path)?;
            let map = bars.into_iter().map(|b| (b.datetime, b)).collect();
            self.bars.insert(symbol, map);
            Ok(())
        }

        pub fn bars(&self, symbol: &Symbol) -> Option<&BTreeMap<DateTime<Utc>, Bar>> {
            self.bars.get(symbol)
        }
    }

    impl Default for CsvDataProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    impl DataProvider for CsvDataProvider {
        fn trading_calendar(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
            let mut days: Vec<NaiveDate> = self
                .bars
                .values()
                .flat_map(|m| m.keys())
                .map(|dt| dt.date_naive())
                .filter(|d| *d >= start && *d <= end)
                .collect();
            days.sort();
            days.dedup();
            Ok(days)
        }

        fn current_price(&self, symbol: &Symbol, at: DateTime<Utc>) -> Result<Option<Quote>> {
            let Some(map) = self.bars.get(symbol) else {
                return Ok(None);
            };
            Ok(map.get(&at).map(|bar| Quote::simple(Money::from_f64(bar.close))))
        }

        fn symbol_info(&self, symbol: &Symbol, date: NaiveDate) -> Result<Option<SymbolInfo>> {
            let Some(map) = self.bars.get(symbol) else {
                return Ok(None);
            };
            let has_bar_on_date = map.keys().any(|dt| dt.date_naive() == date);
            if !has_bar_on_date {
                return Ok(None);
            }
            Ok(Some(SymbolInfo {
                symbol_name: symbol.to_string(),
                is_suspended: false,
            }))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn missing_symbol_yields_none_quote_not_rejection() {
            let provider = CsvDataProvider::new();
            let sym = Symbol::new("BTCUSDT");
            let quote = provider
                .current_price(&sym, Utc::now())
                .unwrap();
            assert!(quote.is_none());
        }
    }
}
