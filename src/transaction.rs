//! Scoped transactions.
//!
//! Entry points live on [`Db`](crate::db::Db): `with_transaction` and
//! `with_transaction_options`. Semantics:
//!
//! 1. If the current executor is already a transaction, the callback runs
//!    directly on it (nested flat, no savepoints).
//! 2. Otherwise a transaction begins with the given options and the callback
//!    receives a scope whose executor is that transaction.
//! 3. An `Err` from the callback rolls back and surfaces unchanged; success
//!    commits, and a commit failure surfaces as `TransactionCommit`.
//! 4. Rolling back an already-completed transaction is a no-op.
//!
//! If the callback's future is dropped mid-flight (panic or cancellation),
//! the underlying driver transaction rolls back when its handle drops.

use std::sync::Arc;

use sqlx::postgres::PgPool;

use stratum_core::{Result, StratumError};

use crate::executor::TxHandle;

/// Standard isolation levels; `Default` leaves the server setting alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    Default,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(self) -> Option<&'static str> {
        match self {
            IsolationLevel::Default => None,
            IsolationLevel::ReadCommitted => Some("ISOLATION LEVEL READ COMMITTED"),
            IsolationLevel::RepeatableRead => Some("ISOLATION LEVEL REPEATABLE READ"),
            IsolationLevel::Serializable => Some("ISOLATION LEVEL SERIALIZABLE"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
}

/// Begin a transaction on the pool and apply the options.
pub(crate) async fn begin(pool: &PgPool, opts: &TxOptions) -> Result<Arc<TxHandle>> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StratumError::TransactionBegin(e.to_string()))?;

    let mut clauses: Vec<&str> = Vec::new();
    if let Some(isolation) = opts.isolation.as_sql() {
        clauses.push(isolation);
    }
    if opts.read_only {
        clauses.push("READ ONLY");
    }
    if !clauses.is_empty() {
        let stmt = format!("SET TRANSACTION {}", clauses.join(", "));
        sqlx::query(&stmt)
            .execute(&mut *tx)
            .await
            .map_err(|e| StratumError::TransactionBegin(e.to_string()))?;
    }

    tracing::info!(read_only = opts.read_only, "stratum.transaction.begin");
    Ok(Arc::new(TxHandle::new(tx)))
}
