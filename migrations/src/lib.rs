//! Stratum Migrations - schema reconciliation for PostgreSQL.
//!
//! Three stages, each usable on its own:
//!
//! - **Introspect**: read the live `public` schema into a normalized realm.
//! - **Diff**: compute the ordered, destructive-aware change plan between
//!   two realms.
//! - **Execute**: apply plans or file-based migrations under an advisory
//!   lock, with history tracking and dry runs against a scratch database.

pub mod ddl;
pub mod desired;
pub mod diff;
pub mod history;
pub mod introspect;
pub mod migrator;
pub mod schema;
pub mod splitter;
pub mod tempdb;

pub use desired::{map_type, realm_from_tables};
pub use diff::{diff_realms, Change, MigrationPlan, TableChange};
pub use history::{checksum, load_dir, HistoryTable, MigrationFile, MigrationRecord};
pub use introspect::Introspector;
pub use migrator::{AutoMigrateOptions, MigrationStatus, Migrator, MIGRATION_LOCK_ID};
pub use schema::{
    Column, Constraint, DbMetadata, EnumType, ForeignKey, Function, Index, IndexColumn,
    PrimaryKey, Realm, Sequence, Table, View,
};
pub use splitter::split_statements;
pub use tempdb::TempDb;
