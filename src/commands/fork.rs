//! `fork` command — branch a new run off an existing snapshot at an
//! earlier date, truncating everything from `fork_date` onward.

use anyhow::{bail, Context as _, Result};
use qtrader::snapshot::Envelope;
use tracing::info;

pub fn run(snapshot_path: String, fork_date: String, reinitialize: bool, output_path: String) -> Result<()> {
    let fork_date = chrono::NaiveDate::parse_from_str(&fork_date, "%Y-%m-%d")
        .context("fork_date must be YYYY-MM-DD")?;
    let envelope = Envelope::load(&snapshot_path)?;

    if !envelope.kind.is_resumable() {
        bail!("snapshot at {snapshot_path} is {:?}, not PAUSED — cannot fork from it", envelope.kind);
    }
    if fork_date > envelope.as_of {
        bail!("fork_date {fork_date} is after the snapshot's as_of date {}", envelope.as_of);
    }

    let forked = envelope.fork(fork_date, reinitialize);
    forked.save(&output_path)?;
    info!(output_path, %fork_date, reinitialize, "fork written");
    Ok(())
}
