//! The migration engine.
//!
//! `auto_migrate` reconciles the live database to a desired realm:
//! introspect, diff, gate destructive changes, apply, record history. The
//! whole operation runs under a process-global advisory lock taken on a
//! dedicated connection, so concurrent runners serialize; a runner that
//! cannot get the lock within the timeout fails with `MigrationLockTimeout`
//! without touching the database. File-based migrations (`<name>.up.sql` /
//! `<name>.down.sql`) apply through the same history table.
//!
//! Plans are computed by normalizing the desired DDL through a scratch
//! database: load the DDL there, introspect it back, and diff
//! introspected-vs-introspected. That makes convenience spellings
//! (`BIGSERIAL`, type aliases) compare cleanly against the live realm.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Connection, Row};

use stratum_core::{Result, StratumError};

use crate::ddl;
use crate::diff::{diff_realms, MigrationPlan};
use crate::history::{checksum, load_dir, HistoryTable, MigrationFile, MigrationRecord};
use crate::introspect::Introspector;
use crate::schema::Realm;
use crate::splitter::{is_create_database, split_statements};
use crate::tempdb::{admin_url, database_name, TempDb};

/// The fixed advisory lock identifier every runner agrees on.
pub const MIGRATION_LOCK_ID: i64 = 8_675_309;

const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoMigrateOptions {
    pub allow_destructive: bool,
    pub dry_run: bool,
    pub create_db_if_not_exists: bool,
    /// Seconds to wait for the advisory lock.
    pub lock_timeout: u64,
}

impl Default for AutoMigrateOptions {
    fn default() -> Self {
        Self {
            allow_destructive: false,
            dry_run: false,
            create_db_if_not_exists: false,
            lock_timeout: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }
}

impl AutoMigrateOptions {
    pub fn lock_timeout(&self) -> Duration {
        match self.lock_timeout {
            0 => Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    pub applied: usize,
    pub pending: usize,
    pub available: usize,
}

fn driver_err(err: sqlx::Error) -> StratumError {
    StratumError::Driver(err.to_string())
}

fn is_missing_database(err: &StratumError) -> bool {
    err.to_string().contains("does not exist")
}

/// Holds the advisory lock on its own connection for the migration scope.
/// If the owner dies without releasing, the server frees the lock when the
/// session closes.
struct LockGuard {
    conn: PgConnection,
}

impl LockGuard {
    async fn release(mut self) {
        let _ = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&mut self.conn)
            .await;
        let _ = self.conn.close().await;
    }
}

#[derive(Debug, Clone)]
pub struct Migrator {
    pool: PgPool,
    database_url: String,
    history: HistoryTable,
    migrations_dir: PathBuf,
}

impl Migrator {
    pub fn new(pool: PgPool, database_url: impl Into<String>) -> Self {
        Self {
            pool,
            database_url: database_url.into(),
            history: HistoryTable::default(),
            migrations_dir: PathBuf::from("./migrations"),
        }
    }

    pub fn with_history_table(mut self, name: &str) -> Self {
        self.history = HistoryTable::new(name);
        self
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    // ==================== auto migration ====================

    /// Reconcile the live schema to `desired` and apply the plan.
    pub async fn auto_migrate(
        &self,
        desired: &Realm,
        opts: &AutoMigrateOptions,
    ) -> Result<MigrationPlan> {
        if opts.dry_run {
            return self.auto_migrate_dry_run(desired, opts).await;
        }

        let guard = self.acquire_lock(opts.lock_timeout()).await?;
        let result = self.reconcile(desired, opts).await;
        guard.release().await;
        result
    }

    /// Compute the plan without touching the target database.
    pub async fn auto_migrate_dry_run(
        &self,
        desired: &Realm,
        opts: &AutoMigrateOptions,
    ) -> Result<MigrationPlan> {
        let current = self.current_realm(opts.create_db_if_not_exists).await?;
        let (plan, _) = self.plan_against_scratch(&current, desired).await?;
        Ok(plan)
    }

    /// Reconcile with destructive changes permitted.
    pub async fn auto_migrate_destructive(
        &self,
        desired: &Realm,
        opts: &AutoMigrateOptions,
    ) -> Result<MigrationPlan> {
        let opts = AutoMigrateOptions {
            allow_destructive: true,
            ..opts.clone()
        };
        self.auto_migrate(desired, &opts).await
    }

    async fn reconcile(
        &self,
        desired: &Realm,
        opts: &AutoMigrateOptions,
    ) -> Result<MigrationPlan> {
        if opts.create_db_if_not_exists {
            self.ensure_database().await?;
        }

        let current = self.current_realm(opts.create_db_if_not_exists).await?;
        let (plan, statements) = self.plan_against_scratch(&current, desired).await?;
        if plan.is_empty() {
            tracing::info!("no schema changes detected");
            return Ok(plan);
        }

        let (destructive, descriptions) = plan.count_destructive();
        if destructive > 0 && !opts.allow_destructive {
            return Err(StratumError::DestructiveChange { descriptions });
        }

        let script = statements.join(";\n");
        let name = format!("{}_auto_migration", Utc::now().format("%Y%m%d%H%M%S"));

        self.ensure_history().await?;
        let mut tx = self.pool.begin().await.map_err(driver_err)?;
        for statement in &statements {
            if let Err(err) = sqlx::query(statement).execute(&mut *tx).await {
                let _ = tx.rollback().await;
                return Err(driver_err(err));
            }
        }
        sqlx::query(&self.history.record_sql())
            .bind(&name)
            .bind(Utc::now())
            .bind(checksum(&script))
            .execute(&mut *tx)
            .await
            .map_err(driver_err)?;
        tx.commit().await.map_err(driver_err)?;

        tracing::info!(changes = plan.changes.len(), name = %name, "auto-migration applied");
        Ok(plan)
    }

    /// Normalize the desired realm through a scratch database and diff it
    /// against `current`. Returns the plan and its rendered statements.
    async fn plan_against_scratch(
        &self,
        current: &Realm,
        desired: &Realm,
    ) -> Result<(MigrationPlan, Vec<String>)> {
        let scratch = TempDb::create(&self.database_url).await?;

        let computed = async {
            let pool = PgPoolOptions::new()
                .max_connections(2)
                .connect(scratch.url())
                .await
                .map_err(driver_err)?;

            for statement in ddl::realm_sql(desired) {
                sqlx::query(&statement)
                    .execute(&pool)
                    .await
                    .map_err(|e| {
                        StratumError::SchemaIntrospection(format!(
                            "desired DDL failed in scratch database: {e}"
                        ))
                    })?;
            }

            let normalized = Introspector::new(pool.clone()).inspect().await?;
            pool.close().await;

            let plan = diff_realms(current, &normalized);
            let statements = ddl::plan_sql(&plan, current, &normalized);
            Ok::<_, StratumError>((plan, statements))
        }
        .await;

        // Explicit cleanup on the success and error paths; if this future
        // panics or is cancelled instead, the scratch handle's drop guard
        // schedules the same DROP DATABASE on the runtime.
        if let Err(err) = scratch.cleanup().await {
            tracing::warn!(error = %err, "failed to drop scratch database");
        }

        computed
    }

    async fn current_realm(&self, allow_missing: bool) -> Result<Realm> {
        match Introspector::new(self.pool.clone()).inspect().await {
            Ok(mut realm) => {
                // The history table is engine-owned and never diffed.
                realm.tables.remove(self.history.name());
                Ok(realm)
            }
            Err(err) if allow_missing && is_missing_database(&err) => Ok(Realm::default()),
            Err(err) => Err(err),
        }
    }

    async fn ensure_database(&self) -> Result<()> {
        let Some(name) = database_name(&self.database_url) else {
            return Err(StratumError::InvalidArgument(
                "database URL has no database name".into(),
            ));
        };

        let mut conn = PgConnection::connect(&admin_url(&self.database_url))
            .await
            .map_err(driver_err)?;
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
            .bind(name)
            .fetch_optional(&mut conn)
            .await
            .map_err(driver_err)?;
        if exists.is_none() {
            sqlx::query(&format!(
                "CREATE DATABASE {}",
                stratum_core::quote_ident(name)
            ))
            .execute(&mut conn)
            .await
            .map_err(driver_err)?;
            tracing::info!(database = name, "created missing database");
        }
        let _ = conn.close().await;
        Ok(())
    }

    async fn acquire_lock(&self, timeout: Duration) -> Result<LockGuard> {
        let acquire = async {
            let mut conn = PgConnection::connect(&self.database_url)
                .await
                .map_err(driver_err)?;
            sqlx::query("SELECT pg_advisory_lock($1)")
                .bind(MIGRATION_LOCK_ID)
                .execute(&mut conn)
                .await
                .map_err(driver_err)?;
            Ok::<_, StratumError>(LockGuard { conn })
        };

        match tokio::time::timeout(timeout, acquire).await {
            Ok(Ok(guard)) => Ok(guard),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(StratumError::MigrationLockTimeout),
        }
    }

    // ==================== file-based migrations ====================

    /// Apply one migration: split, execute, record. Already-applied names
    /// are skipped.
    pub async fn apply(&self, migration: &MigrationFile) -> Result<()> {
        self.ensure_history().await?;
        if self.is_applied(&migration.name).await? {
            tracing::info!(name = %migration.name, "migration already applied");
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(driver_err)?;
        for statement in split_statements(&migration.up_sql) {
            if is_create_database(&statement) {
                // Database creation cannot run inside the transaction; the
                // create-if-missing path owns it.
                tracing::info!("skipping CREATE DATABASE inside migration");
                continue;
            }
            if let Err(err) = sqlx::query(&statement).execute(&mut *tx).await {
                let _ = tx.rollback().await;
                return Err(StratumError::Driver(format!(
                    "migration {} failed at `{statement}`: {err}",
                    migration.name
                )));
            }
        }

        sqlx::query(&self.history.record_sql())
            .bind(&migration.name)
            .bind(Utc::now())
            .bind(&migration.checksum)
            .execute(&mut *tx)
            .await
            .map_err(driver_err)?;
        tx.commit().await.map_err(driver_err)?;

        tracing::info!(name = %migration.name, "migration applied");
        Ok(())
    }

    /// Run the down script and remove the history row.
    pub async fn rollback(&self, migration: &MigrationFile) -> Result<()> {
        self.ensure_history().await?;
        if !self.is_applied(&migration.name).await? {
            tracing::info!(name = %migration.name, "migration not applied");
            return Ok(());
        }

        let down_sql = migration.down_sql.as_ref().ok_or_else(|| {
            StratumError::InvalidArgument(format!(
                "migration {} has no down script",
                migration.name
            ))
        })?;

        let mut tx = self.pool.begin().await.map_err(driver_err)?;
        for statement in split_statements(down_sql) {
            if let Err(err) = sqlx::query(&statement).execute(&mut *tx).await {
                let _ = tx.rollback().await;
                return Err(StratumError::Driver(format!(
                    "rollback of {} failed at `{statement}`: {err}",
                    migration.name
                )));
            }
        }
        sqlx::query(&self.history.remove_sql())
            .bind(&migration.name)
            .execute(&mut *tx)
            .await
            .map_err(driver_err)?;
        tx.commit().await.map_err(driver_err)?;

        tracing::info!(name = %migration.name, "migration rolled back");
        Ok(())
    }

    pub async fn status(&self) -> Result<MigrationStatus> {
        let applied = self.applied_names().await?;
        let pending = self.pending().await?;
        Ok(MigrationStatus {
            applied: applied.len(),
            pending: pending.len(),
            available: applied.len() + pending.len(),
        })
    }

    /// Applied migrations, most recent first.
    pub async fn history(&self) -> Result<Vec<MigrationRecord>> {
        self.ensure_history().await?;
        let rows = sqlx::query(&self.history.history_sql())
            .fetch_all(&self.pool)
            .await
            .map_err(driver_err)?;

        rows.iter()
            .map(|row| {
                Ok(MigrationRecord {
                    name: row.try_get(0).map_err(driver_err)?,
                    applied_at: row.try_get(1).map_err(driver_err)?,
                    checksum: row.try_get(2).map_err(driver_err)?,
                })
            })
            .collect()
    }

    /// Migration files on disk that have not been applied yet.
    pub async fn pending(&self) -> Result<Vec<MigrationFile>> {
        self.ensure_history().await?;
        let applied = self.applied_names().await?;
        let applied: std::collections::HashSet<String> = applied.into_iter().collect();
        Ok(load_dir(&self.migrations_dir)?
            .into_iter()
            .filter(|m| !applied.contains(&m.name))
            .collect())
    }

    // ==================== helpers ====================

    async fn ensure_history(&self) -> Result<()> {
        sqlx::query(&self.history.ensure_sql())
            .execute(&self.pool)
            .await
            .map_err(driver_err)?;
        Ok(())
    }

    async fn is_applied(&self, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(&self.history.is_applied_sql())
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(driver_err)?;
        Ok(count > 0)
    }

    async fn applied_names(&self) -> Result<Vec<String>> {
        self.ensure_history().await?;
        sqlx::query_scalar(&self.history.applied_names_sql())
            .fetch_all(&self.pool)
            .await
            .map_err(driver_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_defaults_and_respects_overrides() {
        let opts = AutoMigrateOptions::default();
        assert_eq!(opts.lock_timeout(), Duration::from_secs(30));

        let opts = AutoMigrateOptions {
            lock_timeout: 5,
            ..Default::default()
        };
        assert_eq!(opts.lock_timeout(), Duration::from_secs(5));

        // Zero falls back to the default rather than disabling the wait.
        let opts = AutoMigrateOptions {
            lock_timeout: 0,
            ..Default::default()
        };
        assert_eq!(opts.lock_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: AutoMigrateOptions =
            serde_json::from_value(serde_json::json!({"allow_destructive": true})).unwrap();
        assert!(opts.allow_destructive);
        assert!(!opts.dry_run);
        assert_eq!(opts.lock_timeout, 30);
    }
}
