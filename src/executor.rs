//! The executor capability.
//!
//! An [`Executor`] runs parameterized statements either on the shared
//! connection pool or inside a transaction; query construction and migration
//! apply are polymorphic over it. An optional [`QueryLogger`] wraps every
//! call with `(sql, args, elapsed, err)`; the default logger emits `tracing`
//! events and everything else is pass-through.
//!
//! Driver errors surface unchanged except for the well-known not-found
//! sentinel, which single-row reads translate, and SQLSTATE constraint codes,
//! which map into the error taxonomy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::postgres::{PgDatabaseError, PgPool, PgRow};
use sqlx::{Postgres, Transaction};
use tokio::sync::Mutex;

use stratum_core::{ConstraintKind, PgValue, Result, StratumError};

/// Observable transaction lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// A live transaction shared by every repository in its scope.
pub struct TxHandle {
    slot: Mutex<Option<Transaction<'static, Postgres>>>,
    state: std::sync::Mutex<TxState>,
}

impl TxHandle {
    pub(crate) fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            slot: Mutex::new(Some(tx)),
            state: std::sync::Mutex::new(TxState::Active),
        }
    }

    pub fn state(&self) -> TxState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: TxState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub(crate) async fn commit(&self) -> Result<()> {
        let tx = {
            let mut slot = self.slot.lock().await;
            slot.take()
        };
        match tx {
            Some(tx) => {
                tx.commit()
                    .await
                    .map_err(|e| StratumError::TransactionCommit(e.to_string()))?;
                self.set_state(TxState::Committed);
                Ok(())
            }
            // Idempotent close.
            None => Ok(()),
        }
    }

    pub(crate) async fn rollback(&self) -> Result<()> {
        let tx = {
            let mut slot = self.slot.lock().await;
            slot.take()
        };
        match tx {
            Some(tx) => {
                tx.rollback()
                    .await
                    .map_err(|e| StratumError::TransactionRollback(e.to_string()))?;
                self.set_state(TxState::RolledBack);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxHandle").field("state", &self.state()).finish()
    }
}

/// Sink for per-statement observability.
pub trait QueryLogger: Send + Sync {
    fn log_query(&self, sql: &str, args: &[PgValue], elapsed: Duration, err: Option<&StratumError>);
}

/// Default logger: one `tracing` event per statement.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl QueryLogger for TracingLogger {
    fn log_query(&self, sql: &str, args: &[PgValue], elapsed: Duration, err: Option<&StratumError>) {
        match err {
            None => tracing::debug!(
                sql = %sql,
                params = args.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "stratum.query"
            ),
            Some(e) => tracing::warn!(
                sql = %sql,
                params = args.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "stratum.query"
            ),
        }
    }
}

#[derive(Clone)]
enum ExecutorKind {
    Pool(PgPool),
    Tx(Arc<TxHandle>),
}

/// Statement runner over the pool or an ambient transaction.
#[derive(Clone)]
pub struct Executor {
    kind: ExecutorKind,
    logger: Option<Arc<dyn QueryLogger>>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            ExecutorKind::Pool(_) => "pool",
            ExecutorKind::Tx(_) => "transaction",
        };
        f.debug_struct("Executor").field("kind", &kind).finish()
    }
}

impl Executor {
    pub fn pool(pool: PgPool) -> Self {
        Self {
            kind: ExecutorKind::Pool(pool),
            logger: None,
        }
    }

    pub(crate) fn transaction(handle: Arc<TxHandle>) -> Self {
        Self {
            kind: ExecutorKind::Tx(handle),
            logger: None,
        }
    }

    /// Wrap this executor with a statement logger; all other behavior is
    /// pass-through.
    pub fn with_logger(mut self, logger: Arc<dyn QueryLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn logger(&self) -> Option<Arc<dyn QueryLogger>> {
        self.logger.clone()
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self.kind, ExecutorKind::Tx(_))
    }

    pub(crate) fn pg_pool(&self) -> Option<&PgPool> {
        match &self.kind {
            ExecutorKind::Pool(pool) => Some(pool),
            ExecutorKind::Tx(_) => None,
        }
    }

    pub fn driver_name(&self) -> &'static str {
        "postgres"
    }

    /// Run a statement, returning the number of affected rows.
    pub async fn execute(&self, sql: &str, args: &[PgValue]) -> Result<u64> {
        let start = Instant::now();
        let result = self.execute_inner(sql, args).await;
        self.log(sql, args, start.elapsed(), &result);
        result
    }

    /// Run a query, returning every matching row.
    pub async fn fetch_all(&self, sql: &str, args: &[PgValue]) -> Result<Vec<PgRow>> {
        let start = Instant::now();
        let result = self.fetch_all_inner(sql, args).await;
        self.log(sql, args, start.elapsed(), &result);
        result
    }

    /// Run a single-row query; zero rows is the not-found sentinel.
    pub async fn fetch_one(&self, sql: &str, args: &[PgValue]) -> Result<PgRow> {
        let start = Instant::now();
        let result = self.fetch_one_inner(sql, args).await;
        self.log(sql, args, start.elapsed(), &result);
        result
    }

    /// Run a single-row query that may match nothing.
    pub async fn fetch_optional(&self, sql: &str, args: &[PgValue]) -> Result<Option<PgRow>> {
        let start = Instant::now();
        let result = self.fetch_optional_inner(sql, args).await;
        self.log(sql, args, start.elapsed(), &result);
        result
    }

    fn log<T>(&self, sql: &str, args: &[PgValue], elapsed: Duration, result: &Result<T>) {
        if let Some(logger) = &self.logger {
            logger.log_query(sql, args, elapsed, result.as_ref().err());
        }
    }

    async fn execute_inner(&self, sql: &str, args: &[PgValue]) -> Result<u64> {
        match &self.kind {
            ExecutorKind::Pool(pool) => {
                let done = bind_all(sqlx::query(sql), args)
                    .execute(pool)
                    .await
                    .map_err(map_db_err)?;
                Ok(done.rows_affected())
            }
            ExecutorKind::Tx(handle) => {
                let mut slot = handle.slot.lock().await;
                let tx = active_tx(&mut slot)?;
                let done = bind_all(sqlx::query(sql), args)
                    .execute(&mut **tx)
                    .await
                    .map_err(map_db_err)?;
                Ok(done.rows_affected())
            }
        }
    }

    async fn fetch_all_inner(&self, sql: &str, args: &[PgValue]) -> Result<Vec<PgRow>> {
        match &self.kind {
            ExecutorKind::Pool(pool) => bind_all(sqlx::query(sql), args)
                .fetch_all(pool)
                .await
                .map_err(map_db_err),
            ExecutorKind::Tx(handle) => {
                let mut slot = handle.slot.lock().await;
                let tx = active_tx(&mut slot)?;
                bind_all(sqlx::query(sql), args)
                    .fetch_all(&mut **tx)
                    .await
                    .map_err(map_db_err)
            }
        }
    }

    async fn fetch_one_inner(&self, sql: &str, args: &[PgValue]) -> Result<PgRow> {
        match &self.kind {
            ExecutorKind::Pool(pool) => bind_all(sqlx::query(sql), args)
                .fetch_one(pool)
                .await
                .map_err(map_db_err),
            ExecutorKind::Tx(handle) => {
                let mut slot = handle.slot.lock().await;
                let tx = active_tx(&mut slot)?;
                bind_all(sqlx::query(sql), args)
                    .fetch_one(&mut **tx)
                    .await
                    .map_err(map_db_err)
            }
        }
    }

    async fn fetch_optional_inner(&self, sql: &str, args: &[PgValue]) -> Result<Option<PgRow>> {
        match &self.kind {
            ExecutorKind::Pool(pool) => bind_all(sqlx::query(sql), args)
                .fetch_optional(pool)
                .await
                .map_err(map_db_err),
            ExecutorKind::Tx(handle) => {
                let mut slot = handle.slot.lock().await;
                let tx = active_tx(&mut slot)?;
                bind_all(sqlx::query(sql), args)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(map_db_err)
            }
        }
    }
}

fn active_tx<'a>(
    slot: &'a mut Option<Transaction<'static, Postgres>>,
) -> Result<&'a mut Transaction<'static, Postgres>> {
    slot.as_mut().ok_or_else(|| {
        StratumError::TransactionRollback("transaction has already completed".into())
    })
}

fn bind_all<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    args: &[PgValue],
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    let mut query = query;
    for arg in args {
        query = query.bind(arg.clone());
    }
    query
}

/// Map a driver error into the taxonomy, preserving unknown messages verbatim.
pub fn map_db_err(err: sqlx::Error) -> StratumError {
    match err {
        sqlx::Error::RowNotFound => StratumError::NotFound,
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            let constraint = db.constraint().map(String::from);
            let kind = match db
                .try_downcast_ref::<PgDatabaseError>()
                .map(|pg| pg.code())
            {
                Some("23505") => Some(ConstraintKind::Unique),
                Some("23503") => Some(ConstraintKind::ForeignKey),
                Some("23514") => Some(ConstraintKind::Check),
                Some("23502") => Some(ConstraintKind::NotNull),
                _ => None,
            };
            match kind {
                Some(kind) => StratumError::ConstraintViolation {
                    kind,
                    constraint,
                    message,
                },
                None => StratumError::Driver(message),
            }
        }
        other => StratumError::Driver(other.to_string()),
    }
}
