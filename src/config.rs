//! Runtime configuration surface.
//!
//! Consumed by CLI collaborators and service bootstrap code; deserializable
//! from JSON/YAML-shaped maps via serde and overridable from the
//! environment. Validation enforces the documented ranges before a pool is
//! opened.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use stratum_core::{Result, StratumError};
use stratum_migrations::AutoMigrateOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NamingConvention {
    #[default]
    #[serde(rename = "snake_case")]
    SnakeCase,
    #[serde(rename = "camelCase")]
    CamelCase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub database_url: String,
    pub driver: String,

    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    /// Connection lifetime in seconds.
    pub conn_max_lifetime: u64,

    pub models_package: String,
    pub migrations_dir: String,
    pub migrations_table: String,

    pub auto_migrate: bool,
    pub auto_migrate_opts: AutoMigrateOptions,

    pub strict_mode: bool,
    pub naming_convention: NamingConvention,
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            driver: "postgres".to_string(),
            max_open_conns: 25,
            max_idle_conns: 5,
            conn_max_lifetime: 3600,
            models_package: "./models".to_string(),
            migrations_dir: "./migrations".to_string(),
            migrations_table: "schema_migrations".to_string(),
            auto_migrate: false,
            auto_migrate_opts: AutoMigrateOptions::default(),
            strict_mode: false,
            naming_convention: NamingConvention::SnakeCase,
            debug: false,
        }
    }
}

impl RuntimeConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }

    pub fn conn_max_lifetime(&self) -> Duration {
        Duration::from_secs(self.conn_max_lifetime)
    }

    /// Apply environment overrides (`STRATUM_DATABASE_URL` wins over
    /// `DATABASE_URL`).
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var("STRATUM_DATABASE_URL") {
            self.database_url = url;
        } else if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(dir) = std::env::var("STRATUM_MIGRATIONS_DIR") {
            self.migrations_dir = dir;
        }
        if let Ok(table) = std::env::var("STRATUM_MIGRATIONS_TABLE") {
            self.migrations_table = table;
        }
        if let Ok(debug) = std::env::var("STRATUM_DEBUG") {
            self.debug = matches!(debug.as_str(), "1" | "true" | "yes");
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(StratumError::InvalidArgument(
                "database_url must not be empty".into(),
            ));
        }
        if self.driver.is_empty() {
            return Err(StratumError::InvalidArgument(
                "driver must not be empty".into(),
            ));
        }
        if self.driver != "postgres" {
            return Err(StratumError::DialectUnsupported(format!(
                "driver {}",
                self.driver
            )));
        }
        if self.max_open_conns < 1 {
            return Err(StratumError::InvalidArgument(
                "max_open_conns must be at least 1".into(),
            ));
        }
        if self.max_idle_conns > self.max_open_conns {
            return Err(StratumError::InvalidArgument(format!(
                "max_idle_conns {} exceeds max_open_conns {}",
                self.max_idle_conns, self.max_open_conns
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.driver, "postgres");
        assert_eq!(config.max_open_conns, 25);
        assert_eq!(config.max_idle_conns, 5);
        assert_eq!(config.conn_max_lifetime(), Duration::from_secs(3600));
        assert_eq!(config.migrations_table, "schema_migrations");
        assert_eq!(config.naming_convention, NamingConvention::SnakeCase);
    }

    #[test]
    fn validation_requires_url_and_sane_pool_bounds() {
        assert!(RuntimeConfig::default().validate().is_err());

        let config = RuntimeConfig::new("postgres://localhost/app");
        assert!(config.validate().is_ok());

        let mut bad = RuntimeConfig::new("postgres://localhost/app");
        bad.max_open_conns = 0;
        assert!(bad.validate().is_err());

        let mut bad = RuntimeConfig::new("postgres://localhost/app");
        bad.max_idle_conns = 99;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn non_postgres_driver_is_unsupported() {
        let mut config = RuntimeConfig::new("mysql://localhost/app");
        config.driver = "mysql".to_string();
        assert!(matches!(
            config.validate(),
            Err(StratumError::DialectUnsupported(_))
        ));
    }

    #[test]
    fn deserializes_from_partial_map() {
        let config: RuntimeConfig = serde_json::from_value(serde_json::json!({
            "database_url": "postgres://localhost/app",
            "max_open_conns": 10,
            "naming_convention": "camelCase"
        }))
        .unwrap();
        assert_eq!(config.max_open_conns, 10);
        assert_eq!(config.max_idle_conns, 5);
        assert_eq!(config.naming_convention, NamingConvention::CamelCase);
    }
}
