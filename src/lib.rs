//! Stratum - a PostgreSQL ORM toolkit.
//!
//! From declarative record metadata, stratum derives a type-safe query and
//! mutation surface per record type, a schema diff/migration engine that
//! reconciles declared types with the live database, and a composable
//! request-processing pipeline (middleware + authorization) that can rewrite
//! every operation before it reaches the driver.
//!
//! # Example
//!
//! ```no_run
//! use stratum::{Db, RuntimeConfig};
//!
//! # #[derive(sqlx::FromRow)]
//! # struct User { id: i64, email: String }
//! # impl stratum::Model for User {
//! #     fn metadata() -> &'static stratum::TableMeta<Self> { unimplemented!() }
//! # }
//! #[tokio::main]
//! async fn main() -> stratum::Result<()> {
//!     let config = RuntimeConfig::new("postgres://localhost/app");
//!     let db = Db::connect(&config).await?;
//!
//!     let users = db.repository::<User>();
//!     let active = users
//!         .query()
//!         .r#where(stratum::TextColumn::new("users", "email").like("%@example.com"))
//!         .find()
//!         .await?;
//!
//!     println!("{} users", active.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod executor;
pub mod middleware;
pub mod model;
pub mod plan;
pub mod query;
pub mod relation;
pub mod repository;
pub mod transaction;

// Re-export the core algebra and the migration engine.
pub use stratum_core::{
    and, annotations, not, or, raw, Action, ActionValue, ArrayColumn, BoolColumn, Column,
    ColumnInfo, ColumnMeta, Condition, ConstraintKind, ForeignKeyRef, JsonColumn, JsonData,
    NumericColumn, PgValue, RelationKind, RelationMeta, Result, SchemaRegistry, StratumError,
    StringArray, TableInfo, TableMeta, TextColumn, TimeColumn,
};
pub use stratum_migrations::{
    AutoMigrateOptions, Change, Migrator, MigrationPlan, MigrationRecord, Realm,
};

pub use config::{NamingConvention, RuntimeConfig};
pub use db::Db;
pub use executor::{Executor, QueryLogger, TracingLogger, TxState};
pub use middleware::{from_fn, Middleware, MiddlewareManager, Next, OpContext, Terminal};
pub use model::Model;
pub use plan::{DeletePlan, InsertPlan, Join, JoinKind, OnConflict, OpKind, Plan, SelectPlan, UpdatePlan};
pub use query::{Include, Query};
pub use repository::{AuthorizeFn, Repository, UpsertOptions};
pub use transaction::{IsolationLevel, TxOptions};
