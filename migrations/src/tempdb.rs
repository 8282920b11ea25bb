//! Scratch databases for dry runs.
//!
//! A dry run loads the desired DDL into a throwaway database created from
//! the admin connection, introspects it, and diffs the result against the
//! live realm. The scratch database is always dropped afterwards: callers
//! run [`TempDb::cleanup`] on their normal paths, and the `Drop` guard
//! schedules the same `DROP DATABASE` on the runtime when the owning future
//! panics or is cancelled before cleanup runs.

use sqlx::postgres::PgConnection;
use sqlx::Connection;

use stratum_core::{quote_ident, Result, StratumError};

/// Swap the database segment of a connection URL, preserving any query
/// string.
pub fn swap_database(base_url: &str, database: &str) -> String {
    let Some(slash) = base_url.rfind('/') else {
        return base_url.to_string();
    };
    match base_url[slash..].find('?') {
        Some(query) => format!(
            "{}/{}{}",
            &base_url[..slash],
            database,
            &base_url[slash + query..]
        ),
        None => format!("{}/{}", &base_url[..slash], database),
    }
}

/// The same server's maintenance database.
pub fn admin_url(base_url: &str) -> String {
    swap_database(base_url, "postgres")
}

/// The database name segment of a connection URL.
pub fn database_name(base_url: &str) -> Option<&str> {
    let slash = base_url.rfind('/')?;
    let rest = &base_url[slash + 1..];
    let name = match rest.find('?') {
        Some(query) => &rest[..query],
        None => rest,
    };
    (!name.is_empty()).then_some(name)
}

fn driver_err(err: sqlx::Error) -> StratumError {
    StratumError::Driver(err.to_string())
}

async fn drop_database(admin_url: &str, name: &str) -> Result<()> {
    let mut conn = PgConnection::connect(admin_url).await.map_err(driver_err)?;
    sqlx::query(&format!("DROP DATABASE IF EXISTS {}", quote_ident(name)))
        .execute(&mut conn)
        .await
        .map_err(driver_err)?;
    let _ = conn.close().await;
    Ok(())
}

/// A scratch database on the same server as the target.
#[derive(Debug)]
pub struct TempDb {
    name: String,
    url: String,
    admin_url: String,
    cleaned: bool,
}

impl TempDb {
    /// Create a fresh scratch database next to `base_url`'s database.
    pub async fn create(base_url: &str) -> Result<Self> {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let name = format!("stratum_scratch_{}_{nanos}", std::process::id());

        let admin = admin_url(base_url);
        let mut conn = PgConnection::connect(&admin).await.map_err(driver_err)?;
        sqlx::query(&format!("CREATE DATABASE {}", quote_ident(&name)))
            .execute(&mut conn)
            .await
            .map_err(driver_err)?;
        let _ = conn.close().await;

        Ok(Self {
            url: swap_database(base_url, &name),
            admin_url: admin,
            name,
            cleaned: false,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop the scratch database now, reporting failures to the caller.
    pub async fn cleanup(mut self) -> Result<()> {
        self.cleaned = true;
        drop_database(&self.admin_url, &self.name).await
    }
}

/// Last line of defense for panic and cancellation paths: if the handle is
/// dropped before [`TempDb::cleanup`] ran, schedule the `DROP DATABASE` on
/// the current runtime. Without a runtime the database leaks and a warning
/// names it.
impl Drop for TempDb {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        let admin_url = std::mem::take(&mut self.admin_url);
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = drop_database(&admin_url, &name).await {
                        tracing::warn!(
                            database = %name,
                            error = %err,
                            "failed to drop scratch database"
                        );
                    }
                });
            }
            Err(_) => {
                tracing::warn!(database = %name, "scratch database leaked; no runtime for cleanup");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swaps_database_segment_and_keeps_query() {
        assert_eq!(
            swap_database("postgres://u:p@localhost:5432/app", "scratch"),
            "postgres://u:p@localhost:5432/scratch"
        );
        assert_eq!(
            swap_database("postgres://u:p@localhost/app?sslmode=disable", "scratch"),
            "postgres://u:p@localhost/scratch?sslmode=disable"
        );
    }

    #[test]
    fn admin_url_targets_the_maintenance_database() {
        assert_eq!(
            admin_url("postgres://localhost/app"),
            "postgres://localhost/postgres"
        );
    }

    #[test]
    fn database_name_extraction() {
        assert_eq!(
            database_name("postgres://localhost:5432/app?sslmode=disable"),
            Some("app")
        );
        assert_eq!(database_name("postgres://localhost:5432/"), None);
    }
}
