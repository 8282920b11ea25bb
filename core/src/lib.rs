//! Stratum Core - values, predicates, actions, and record metadata
//!
//! This crate holds everything the runtime and the schema reconciler share:
//! the parameter value sum type, the placeholder rewriter, the condition and
//! action algebra with their typed column constructors, the per-record
//! metadata registry, and the annotation grammar that record definitions are
//! declared in.
//!
//! The SQL dialect is PostgreSQL throughout; placeholders render as `$1`,
//! `$2`, … with a running index.

pub mod action;
pub mod annotations;
pub mod array;
pub mod column;
pub mod condition;
pub mod error;
pub mod json;
pub mod metadata;
pub mod placeholder;
pub mod value;

// Re-export key types and traits
pub use action::{Action, ActionValue};
pub use array::StringArray;
pub use column::{
    ArrayColumn, BoolColumn, Column, JsonColumn, NumericColumn, TextColumn, TimeColumn,
};
pub use condition::{and, not, or, raw, CmpOp, Condition};
pub use error::{ConstraintKind, Result, StratumError};
pub use json::JsonData;
pub use metadata::{
    ColumnInfo, ColumnMeta, ForeignKeyRef, RelationKind, RelationMeta, SchemaRegistry, TableInfo,
    TableMeta,
};
pub use placeholder::{quote_ident, ParamBinder};
pub use value::PgValue;
