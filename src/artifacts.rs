//! §6.4 — Persisted artifacts.
//!
//! Writes the three CSV artifacts a completed run leaves behind:
//! `equity.csv` (daily net worth), `orders.csv` (every known order,
//! terminal or not), and `daily_positions.csv` (the position book at each
//! day's close). Mirrors the `csv` crate usage in `provider::csv_provider`'s
//! reader side, just in the write direction.

use crate::order::{Order, OrderManager};
use crate::portfolio::DailyRecord;
use crate::position::Position;
use anyhow::{Context, Result};
use std::path::Path;

pub fn write_equity_csv(path: impl AsRef<Path>, history: &[DailyRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref()).context("failed to create equity.csv")?;
    writer.write_record(["date", "cash", "long_market_value", "short_market_value", "net_worth", "returns"])?;
    for record in history {
        writer.write_record([
            record.date.to_string(),
            record.cash.to_string(),
            record.long_market_value.to_string(),
            record.short_market_value.to_string(),
            record.net_worth.to_string(),
            record.returns.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_orders_csv(path: impl AsRef<Path>, orders: &OrderManager) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref()).context("failed to create orders.csv")?;
    writer.write_record([
        "id", "symbol", "side", "order_type", "amount", "limit_price",
        "created_at", "filled_at", "filled_price", "commission", "status",
    ])?;
    for order in orders.all_known() {
        write_order_row(&mut writer, order)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_order_row(writer: &mut csv::Writer<std::fs::File>, order: &Order) -> Result<()> {
    writer.write_record([
        order.id.to_string(),
        order.symbol.to_string(),
        format!("{:?}", order.side),
        format!("{:?}", order.order_type),
        order.amount.to_string(),
        order.limit_price.map(|p| p.to_string()).unwrap_or_default(),
        order.created_at.to_rfc3339(),
        order.filled_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
        order.filled_price.to_string(),
        order.commission.to_string(),
        format!("{:?}", order.status),
    ])?;
    Ok(())
}

pub fn write_daily_positions_csv(
    path: impl AsRef<Path>,
    snapshots: &std::collections::BTreeMap<chrono::NaiveDate, Vec<Position>>,
) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path.as_ref()).context("failed to create daily_positions.csv")?;
    writer.write_record([
        "date", "symbol", "direction", "total", "available", "avg_cost", "market_price", "realized_pnl",
    ])?;
    for (date, positions) in snapshots {
        for pos in positions {
            writer.write_record([
                date.to_string(),
                pos.symbol.to_string(),
                format!("{:?}", pos.direction),
                pos.total.to_string(),
                pos.available.to_string(),
                pos.avg_cost.to_string(),
                pos.market_price.to_string(),
                pos.realized_pnl.to_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Money;
    use chrono::NaiveDate;

    #[test]
    fn equity_csv_writes_one_row_per_day() {
        let history = vec![DailyRecord {
            date: NaiveDate::parse_from_str("2026-01-02", "%Y-%m-%d").unwrap(),
            cash: Money::from_f64(1000.0),
            long_market_value: Money::ZERO,
            short_market_value: Money::ZERO,
            net_worth: Money::from_f64(1000.0),
            returns: 0.0,
        }];
        let path = std::env::temp_dir().join("qtrader_equity_csv_test.csv");
        write_equity_csv(&path, &history).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let _ = std::fs::remove_file(&path);
    }
}
