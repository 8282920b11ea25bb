//! The toolkit handle.
//!
//! A [`Db`] owns the connection pool and the current executor (pool or
//! transaction scope), hands out typed repositories, and hosts the
//! transaction entry points. Swappable collaborators (logger, migrator) are
//! injected here rather than through process-wide state.

use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions};

use stratum_core::{Result, StratumError};
use stratum_migrations::Migrator;

use crate::config::RuntimeConfig;
use crate::executor::{map_db_err, Executor, QueryLogger, TracingLogger, TxHandle};
use crate::model::Model;
use crate::repository::Repository;
use crate::transaction::{self, TxOptions};

#[derive(Clone, Debug)]
pub struct Db {
    pool: PgPool,
    executor: Executor,
    database_url: Option<String>,
    migrations_table: String,
    migrations_dir: String,
}

impl Db {
    /// Open a pool from a validated configuration.
    pub async fn connect(config: &RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_open_conns)
            .min_connections(config.max_idle_conns)
            .max_lifetime(config.conn_max_lifetime())
            .connect(&config.database_url)
            .await
            .map_err(map_db_err)?;

        let mut db = Self::from_pool(pool);
        db.database_url = Some(config.database_url.clone());
        db.migrations_table = config.migrations_table.clone();
        db.migrations_dir = config.migrations_dir.clone();
        Ok(db)
    }

    /// Wrap an existing pool. The default logger emits `tracing` events.
    pub fn from_pool(pool: PgPool) -> Self {
        let executor = Executor::pool(pool.clone()).with_logger(Arc::new(TracingLogger));
        Self {
            pool,
            executor,
            database_url: None,
            migrations_table: "schema_migrations".to_string(),
            migrations_dir: "./migrations".to_string(),
        }
    }

    /// Replace the statement logger on the current executor.
    pub fn with_logger(mut self, logger: Arc<dyn QueryLogger>) -> Self {
        self.executor = self.executor.clone().with_logger(logger);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn in_transaction(&self) -> bool {
        self.executor.is_transaction()
    }

    /// A typed repository bound to the current executor.
    pub fn repository<T: Model>(&self) -> Repository<T> {
        Repository::new(self.executor.clone())
    }

    /// The migration engine for this database. Requires the connection URL,
    /// so it is only available on handles built by [`connect`](Self::connect).
    pub fn migrator(&self) -> Result<Migrator> {
        let url = self.database_url.as_ref().ok_or_else(|| {
            StratumError::InvalidArgument(
                "migrator requires a handle opened with Db::connect".into(),
            )
        })?;
        Ok(Migrator::new(self.pool.clone(), url.clone())
            .with_history_table(&self.migrations_table)
            .with_migrations_dir(self.migrations_dir.clone()))
    }

    fn tx_scope(&self, handle: Arc<TxHandle>) -> Db {
        let executor = match self.executor.logger() {
            Some(logger) => Executor::transaction(handle).with_logger(logger),
            None => Executor::transaction(handle),
        };
        Db {
            pool: self.pool.clone(),
            executor,
            database_url: self.database_url.clone(),
            migrations_table: self.migrations_table.clone(),
            migrations_dir: self.migrations_dir.clone(),
        }
    }

    /// Run `f` inside a transaction with default options.
    pub async fn with_transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: for<'a> FnOnce(&'a Db) -> BoxFuture<'a, Result<R>>,
        R: Send,
    {
        self.with_transaction_options(TxOptions::default(), f).await
    }

    /// Run `f` inside a transaction.
    ///
    /// If this handle is already transactional the callback runs directly on
    /// the same executor (nested flat). Otherwise a transaction begins with
    /// `opts`; an `Err` return rolls back and surfaces unchanged, success
    /// commits with commit failures reported as `TransactionCommit`.
    pub async fn with_transaction_options<F, R>(&self, opts: TxOptions, f: F) -> Result<R>
    where
        F: for<'a> FnOnce(&'a Db) -> BoxFuture<'a, Result<R>>,
        R: Send,
    {
        if self.in_transaction() {
            return f(self).await;
        }

        let handle = transaction::begin(&self.pool, &opts).await?;
        let scope = self.tx_scope(handle.clone());

        match f(&scope).await {
            Ok(value) => {
                handle.commit().await?;
                tracing::info!("stratum.transaction.commit");
                Ok(value)
            }
            Err(err) => {
                // Inner error wins; rollback failures on a completed
                // transaction are silent.
                let _ = handle.rollback().await;
                tracing::info!("stratum.transaction.rollback");
                Err(err)
            }
        }
    }
}
