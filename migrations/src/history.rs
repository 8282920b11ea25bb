//! Migration history.
//!
//! Applied migrations are recorded in a configurable history table:
//! `(name VARCHAR(255) PRIMARY KEY, applied_at TIMESTAMPTZ NOT NULL DEFAULT
//! NOW(), checksum VARCHAR(64) NOT NULL)`. The checksum is SHA-256 of the
//! up-script text and exists for human-visible drift detection only.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use stratum_core::{quote_ident, Result, StratumError};

pub const DEFAULT_HISTORY_TABLE: &str = "schema_migrations";

/// One applied-migration row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationRecord {
    pub name: String,
    pub applied_at: DateTime<Utc>,
    pub checksum: String,
}

/// SQL for the configurable history table.
#[derive(Debug, Clone)]
pub struct HistoryTable {
    name: String,
}

impl HistoryTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn ident(&self) -> String {
        quote_ident(&self.name)
    }

    pub fn ensure_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                name VARCHAR(255) PRIMARY KEY,\n    \
                applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),\n    \
                checksum VARCHAR(64) NOT NULL\n)",
            self.ident()
        )
    }

    pub fn is_applied_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM {} WHERE name = $1", self.ident())
    }

    pub fn record_sql(&self) -> String {
        format!(
            "INSERT INTO {} (name, applied_at, checksum) VALUES ($1, $2, $3)",
            self.ident()
        )
    }

    pub fn remove_sql(&self) -> String {
        format!("DELETE FROM {} WHERE name = $1", self.ident())
    }

    pub fn applied_names_sql(&self) -> String {
        format!("SELECT name FROM {} ORDER BY applied_at", self.ident())
    }

    pub fn history_sql(&self) -> String {
        format!(
            "SELECT name, applied_at, checksum FROM {} ORDER BY applied_at DESC",
            self.ident()
        )
    }
}

impl Default for HistoryTable {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_TABLE)
    }
}

/// SHA-256 hex digest of a script; stable across runs.
pub fn checksum(sql: &str) -> String {
    let digest = Sha256::digest(sql.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

/// A file-based migration: `<name>.up.sql` with an optional `.down.sql`
/// sibling.
#[derive(Debug, Clone)]
pub struct MigrationFile {
    pub name: String,
    pub up_sql: String,
    pub down_sql: Option<String>,
    pub checksum: String,
}

impl MigrationFile {
    pub fn new(name: impl Into<String>, up_sql: impl Into<String>) -> Self {
        let up_sql = up_sql.into();
        let checksum = checksum(&up_sql);
        Self {
            name: name.into(),
            up_sql,
            down_sql: None,
            checksum,
        }
    }

    pub fn with_down(mut self, down_sql: impl Into<String>) -> Self {
        self.down_sql = Some(down_sql.into());
        self
    }

    /// Load one migration from its up-script path.
    pub fn load(up_path: &Path) -> Result<Self> {
        let file_name = up_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let name = file_name
            .strip_suffix(".up.sql")
            .ok_or_else(|| {
                StratumError::InvalidArgument(format!(
                    "migration file {file_name} does not end in .up.sql"
                ))
            })?
            .to_string();

        let up_sql = std::fs::read_to_string(up_path)
            .map_err(|e| StratumError::InvalidArgument(format!("read {file_name}: {e}")))?;

        let down_path: PathBuf = up_path.with_file_name(format!("{name}.down.sql"));
        let down_sql = match down_path.exists() {
            true => Some(std::fs::read_to_string(&down_path).map_err(|e| {
                StratumError::InvalidArgument(format!("read {name}.down.sql: {e}"))
            })?),
            false => None,
        };

        let checksum = checksum(&up_sql);
        Ok(Self {
            name,
            up_sql,
            down_sql,
            checksum,
        })
    }
}

/// Load every migration in a directory, sorted by name. Names are globally
/// unique; a duplicate is an error.
pub fn load_dir(dir: &Path) -> Result<Vec<MigrationFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| StratumError::InvalidArgument(format!("read {}: {e}", dir.display())))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".up.sql"))
        })
        .collect();
    files.sort();

    let mut migrations = Vec::with_capacity(files.len());
    let mut seen = std::collections::HashSet::new();
    for path in files {
        let migration = MigrationFile::load(&path)?;
        if !seen.insert(migration.name.clone()) {
            return Err(StratumError::InvalidArgument(format!(
                "duplicate migration name {}",
                migration.name
            )));
        }
        migrations.push(migration);
    }

    Ok(migrations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_and_hex_encoded() {
        let a = checksum("CREATE TABLE users(id BIGINT);");
        let b = checksum("CREATE TABLE users(id BIGINT);");
        let c = checksum("CREATE TABLE users(id BIGINT PRIMARY KEY);");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn history_table_sql_uses_the_configured_name() {
        let table = HistoryTable::new("my_migrations");
        assert!(table.ensure_sql().contains("\"my_migrations\""));
        assert!(table.ensure_sql().contains("name VARCHAR(255) PRIMARY KEY"));
        assert!(table.ensure_sql().contains("checksum VARCHAR(64) NOT NULL"));
        assert_eq!(
            table.record_sql(),
            "INSERT INTO \"my_migrations\" (name, applied_at, checksum) VALUES ($1, $2, $3)"
        );
    }

    #[test]
    fn load_dir_pairs_up_and_down_scripts() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("0001_init.up.sql"),
            "CREATE TABLE users(id BIGINT);",
        )
        .unwrap();
        std::fs::write(dir.path().join("0001_init.down.sql"), "DROP TABLE users;").unwrap();
        std::fs::write(
            dir.path().join("0002_posts.up.sql"),
            "CREATE TABLE posts(id BIGINT);",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let migrations = load_dir(dir.path()).unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].name, "0001_init");
        assert!(migrations[0].down_sql.is_some());
        assert_eq!(migrations[1].name, "0002_posts");
        assert!(migrations[1].down_sql.is_none());
    }

    #[test]
    fn missing_directory_is_empty_not_an_error() {
        let migrations = load_dir(Path::new("/nonexistent/migrations")).unwrap();
        assert!(migrations.is_empty());
    }
}
