//! Typed error taxonomy.
//!
//! Four kinds, distinguished by who handles them: `StrategyFault` is caught
//! by the lifecycle sandbox and never propagates past it; `OrderRejected`
//! is not really an exception (it surfaces as a `None` order id or an order
//! status) but is modeled here so internal plumbing can return it uniformly;
//! `ProviderUnavailable` defers the affected order rather than failing it;
//! `Fatal` aborts a run before any mutation of the workspace is visible.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QTraderError {
    /// Propagated from user strategy code, caught by the sandbox and logged;
    /// never surfaces past `LifecycleSandbox::invoke`.
    #[error("strategy fault in {hook}: {source}")]
    StrategyFault {
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A submission or fill precondition failed. Reported back as a result
    /// value, not raised as a control-flow exception.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// The data provider returned no quote, or a transient failure occurred.
    /// Orders affected by this stay OPEN and are retried on the next pulse.
    #[error("provider unavailable for {symbol} at {at}")]
    ProviderUnavailable {
        symbol: String,
        at: chrono::DateTime<chrono::Utc>,
    },

    /// Snapshot corruption, resuming a non-PAUSED envelope, or an unreadable
    /// code snapshot. The engine refuses to start; no partial mutation of
    /// the workspace is allowed once this is returned.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl QTraderError {
    pub fn fatal(msg: impl Into<String>) -> Self {
        QTraderError::Fatal(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        QTraderError::OrderRejected(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, QTraderError>;
