//! The record metadata registry.
//!
//! Each record type owns one [`TableMeta`] built at first use and shared
//! read-only for the life of the process. The runtime reads it for column
//! lists, insert-field selection, and relationship loading; the reconciler
//! reads its type-erased [`TableInfo`] form to derive the desired schema.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::postgres::PgRow;

use crate::error::{Result, StratumError};
use crate::value::PgValue;

/// Foreign-key target for a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
}

/// Type-erased column description, shared with the schema reconciler.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Field name on the record type.
    pub field: String,
    /// Column name in the database.
    pub db_name: String,
    /// Declared database type (`TEXT`, `BIGINT`, `TIMESTAMPTZ`, …).
    pub db_type: String,
    pub nullable: bool,
    /// Identity, `DEFAULT now()`, generated id columns, and the like.
    pub auto_generated: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub default: Option<String>,
    pub foreign_key: Option<ForeignKeyRef>,
    pub check: Option<String>,
    pub enum_values: Option<Vec<String>>,
}

impl ColumnInfo {
    pub fn new(field: impl Into<String>, db_name: impl Into<String>, db_type: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            db_name: db_name.into(),
            db_type: db_type.into(),
            nullable: false,
            auto_generated: false,
            primary_key: false,
            unique: false,
            default: None,
            foreign_key: None,
            check: None,
            enum_values: None,
        }
    }
}

/// Column metadata bound to a record type: the erased info plus accessors.
pub struct ColumnMeta<T> {
    pub info: ColumnInfo,
    /// Read the column value out of a record.
    pub get: fn(&T) -> PgValue,
    /// Nil test for optional fields; `None` for required fields.
    pub is_nil: Option<fn(&T) -> bool>,
}

impl<T> std::fmt::Debug for ColumnMeta<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnMeta").field("info", &self.info).finish()
    }
}

/// The four relationship shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    BelongsTo {
        /// Target table name.
        target: String,
        /// Foreign-key column on this record.
        foreign_key: String,
        /// Key column on the target, `id` by default.
        target_key: String,
    },
    HasOne {
        target: String,
        /// Foreign-key column on the target.
        foreign_key: String,
        /// Key column on this record, `id` by default.
        source_key: String,
    },
    HasMany {
        target: String,
        foreign_key: String,
        source_key: String,
    },
    HasManyThrough {
        target: String,
        join_table: String,
        source_fk: String,
        target_fk: String,
        source_key: String,
        target_key: String,
    },
}

impl RelationKind {
    pub fn target_table(&self) -> &str {
        match self {
            RelationKind::BelongsTo { target, .. }
            | RelationKind::HasOne { target, .. }
            | RelationKind::HasMany { target, .. }
            | RelationKind::HasManyThrough { target, .. } => target,
        }
    }
}

/// Materialization contract: given the parent record and the child rows the
/// loader fetched, decode and assign them onto the parent's relationship
/// field. Each relationship kind supplies its own closure.
pub type ScanToModel<T> = Arc<dyn Fn(&mut T, Vec<PgRow>) -> Result<()> + Send + Sync>;

pub struct RelationMeta<T> {
    pub name: String,
    pub kind: RelationKind,
    pub scan: ScanToModel<T>,
}

impl<T> std::fmt::Debug for RelationMeta<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationMeta")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Complete metadata for one record type.
pub struct TableMeta<T> {
    pub table_name: String,
    /// Ordered primary-key column names; at least one.
    pub primary_keys: Vec<String>,
    pub columns: Vec<ColumnMeta<T>>,
    /// Column name → field name.
    reverse: HashMap<String, String>,
    relationships: HashMap<String, RelationMeta<T>>,
    /// Table-level index declarations, consumed by schema derivation.
    pub indexes: Vec<crate::annotations::IndexSpec>,
}

impl<T> std::fmt::Debug for TableMeta<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableMeta")
            .field("table_name", &self.table_name)
            .field("primary_keys", &self.primary_keys)
            .field("columns", &self.columns)
            .finish()
    }
}

impl<T> TableMeta<T> {
    pub fn new(
        table_name: impl Into<String>,
        primary_keys: Vec<&str>,
        columns: Vec<ColumnMeta<T>>,
    ) -> Self {
        let reverse = columns
            .iter()
            .map(|c| (c.info.db_name.clone(), c.info.field.clone()))
            .collect();
        Self {
            table_name: table_name.into(),
            primary_keys: primary_keys.into_iter().map(String::from).collect(),
            columns,
            reverse,
            relationships: HashMap::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_relationship(mut self, relation: RelationMeta<T>) -> Self {
        self.relationships.insert(relation.name.clone(), relation);
        self
    }

    pub fn with_indexes(mut self, indexes: Vec<crate::annotations::IndexSpec>) -> Self {
        self.indexes = indexes;
        self
    }

    /// Look up a column by its field name.
    pub fn column(&self, field: &str) -> Option<&ColumnMeta<T>> {
        self.columns.iter().find(|c| c.info.field == field)
    }

    /// Look up a column by its database name.
    pub fn column_by_db_name(&self, db_name: &str) -> Option<&ColumnMeta<T>> {
        self.columns.iter().find(|c| c.info.db_name == db_name)
    }

    /// Column name → field name map.
    pub fn reverse_map(&self) -> &HashMap<String, String> {
        &self.reverse
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationMeta<T>> {
        self.relationships.get(name)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &RelationMeta<T>> {
        self.relationships.values()
    }

    /// Database column names, in declaration order.
    pub fn db_columns(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.info.db_name.as_str()).collect()
    }

    /// Columns populated by the database rather than the caller.
    pub fn auto_generated_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.info.auto_generated)
            .map(|c| c.info.db_name.as_str())
            .collect()
    }

    /// Primary-key values of a record, in key order.
    pub fn primary_key_values(&self, record: &T) -> Vec<(String, PgValue)> {
        self.primary_keys
            .iter()
            .filter_map(|pk| {
                let field = self.reverse.get(pk)?;
                let column = self.column(field)?;
                Some((pk.clone(), (column.get)(record)))
            })
            .collect()
    }

    /// Check the per-table invariants: unique column names, every primary key
    /// resolves to a declared column.
    pub fn validate(&self) -> Result<()> {
        if self.primary_keys.is_empty() {
            return Err(StratumError::InvalidArgument(format!(
                "table {} declares no primary key",
                self.table_name
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.info.db_name.as_str()) {
                return Err(StratumError::InvalidArgument(format!(
                    "table {} declares column {} more than once",
                    self.table_name, column.info.db_name
                )));
            }
        }

        for pk in &self.primary_keys {
            if self.column_by_db_name(pk).is_none() {
                return Err(StratumError::InvalidArgument(format!(
                    "table {} primary key {} is not a declared column",
                    self.table_name, pk
                )));
            }
        }

        Ok(())
    }

    /// Type-erased view for the schema reconciler.
    pub fn info(&self) -> TableInfo {
        TableInfo {
            table_name: self.table_name.clone(),
            primary_keys: self.primary_keys.clone(),
            columns: self.columns.iter().map(|c| c.info.clone()).collect(),
            indexes: self.indexes.clone(),
        }
    }
}

/// Type-erased table description.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub table_name: String,
    pub primary_keys: Vec<String>,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<crate::annotations::IndexSpec>,
}

/// Cross-table view over every registered record type.
///
/// Foreign-key targets can only be checked once all tables are known, so the
/// per-table `validate` leaves them to this registry.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: Vec<TableInfo>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, table: TableInfo) {
        self.tables.push(table);
    }

    pub fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    /// Every foreign-key target must resolve to a registered `(table, column)`.
    pub fn validate(&self) -> Result<()> {
        for table in &self.tables {
            for column in &table.columns {
                let Some(fk) = &column.foreign_key else {
                    continue;
                };
                let target = self
                    .tables
                    .iter()
                    .find(|t| t.table_name == fk.table)
                    .ok_or_else(|| {
                        StratumError::InvalidArgument(format!(
                            "{}.{} references unknown table {}",
                            table.table_name, column.db_name, fk.table
                        ))
                    })?;
                if !target.columns.iter().any(|c| c.db_name == fk.column) {
                    return Err(StratumError::InvalidArgument(format!(
                        "{}.{} references unknown column {}.{}",
                        table.table_name, column.db_name, fk.table, fk.column
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        id: i64,
        email: String,
    }

    fn dummy_meta() -> TableMeta<Dummy> {
        TableMeta::new(
            "dummies",
            vec!["id"],
            vec![
                ColumnMeta {
                    info: {
                        let mut c = ColumnInfo::new("id", "id", "BIGINT");
                        c.primary_key = true;
                        c.auto_generated = true;
                        c
                    },
                    get: |d: &Dummy| d.id.into(),
                    is_nil: None,
                },
                ColumnMeta {
                    info: ColumnInfo::new("email", "email", "TEXT"),
                    get: |d: &Dummy| d.email.clone().into(),
                    is_nil: None,
                },
            ],
        )
    }

    #[test]
    fn reverse_map_resolves_db_names_to_fields() {
        let meta = dummy_meta();
        assert_eq!(meta.reverse_map().get("email").map(String::as_str), Some("email"));
        assert_eq!(meta.db_columns(), vec!["id", "email"]);
        assert_eq!(meta.auto_generated_columns(), vec!["id"]);
    }

    #[test]
    fn primary_key_values_read_through_accessors() {
        let meta = dummy_meta();
        let record = Dummy {
            id: 9,
            email: "a@b.c".into(),
        };
        let pks = meta.primary_key_values(&record);
        assert_eq!(pks, vec![("id".to_string(), PgValue::Int8(9))]);
    }

    #[test]
    fn validate_rejects_missing_primary_key_column() {
        let meta: TableMeta<Dummy> = TableMeta::new(
            "dummies",
            vec!["missing"],
            vec![ColumnMeta {
                info: ColumnInfo::new("id", "id", "BIGINT"),
                get: |d: &Dummy| d.id.into(),
                is_nil: None,
            }],
        );
        assert!(meta.validate().is_err());
    }

    #[test]
    fn registry_checks_foreign_key_targets() {
        let mut users = TableInfo {
            table_name: "users".into(),
            primary_keys: vec!["id".into()],
            columns: vec![ColumnInfo::new("id", "id", "BIGINT")],
            indexes: Vec::new(),
        };
        users.columns[0].primary_key = true;

        let mut post_user = ColumnInfo::new("user_id", "user_id", "BIGINT");
        post_user.foreign_key = Some(ForeignKeyRef {
            table: "users".into(),
            column: "id".into(),
            on_delete: Some("CASCADE".into()),
            on_update: None,
        });
        let posts = TableInfo {
            table_name: "posts".into(),
            primary_keys: vec!["id".into()],
            columns: vec![ColumnInfo::new("id", "id", "BIGINT"), post_user],
            indexes: Vec::new(),
        };

        let mut registry = SchemaRegistry::new();
        registry.register(users);
        registry.register(posts.clone());
        assert!(registry.validate().is_ok());

        let mut bad = SchemaRegistry::new();
        bad.register(posts);
        assert!(bad.validate().is_err());
    }
}
