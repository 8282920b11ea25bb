//! The normalized schema model.
//!
//! Both the introspector (live realm) and the metadata deriver (desired
//! realm) produce this shape; the diff engine consumes two of them. The model
//! serializes for snapshot files and drift reports.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The top-level container of everything the reconciler sees in a database.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Realm {
    pub tables: BTreeMap<String, Table>,
    pub enums: BTreeMap<String, EnumType>,
    pub views: BTreeMap<String, View>,
    pub sequences: BTreeMap<String, Sequence>,
    pub functions: BTreeMap<String, Function>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DbMetadata>,
}

impl Realm {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
            && self.enums.is_empty()
            && self.views.is_empty()
            && self.sequences.is_empty()
            && self.functions.is_empty()
    }

    pub fn add_table(&mut self, table: Table) {
        self.tables.insert(table.name.clone(), table);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Table {
    pub name: String,
    /// Ordered by ordinal position.
    pub columns: Vec<Column>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<PrimaryKey>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<Index>,
    pub constraints: Vec<Constraint>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn foreign_key(&self, name: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    /// Normalized type name (`text`, `bigint`, `timestamptz`, …).
    pub db_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub char_length: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_precision: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_scale: Option<i32>,
    pub ordinal: i32,
}

impl Column {
    pub fn new(name: impl Into<String>, db_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db_type: db_type.into(),
            ..Default::default()
        }
    }

    /// Rendered type including length/precision qualifiers.
    pub fn type_sql(&self) -> String {
        match (self.char_length, self.numeric_precision, self.numeric_scale) {
            (Some(len), _, _) => format!("{}({len})", self.db_type),
            (None, Some(p), Some(s)) => format!("{}({p}, {s})", self.db_type),
            (None, Some(p), None) => format!("{}({p})", self.db_type),
            _ => self.db_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PrimaryKey {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_update: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IndexColumn {
    pub name: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Index {
    pub name: String,
    pub columns: Vec<IndexColumn>,
    pub unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub using: Option<String>,
}

/// Table constraints beyond the explicit PK/FK slots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    Unique { name: String, columns: Vec<String> },
    Check { name: String, expression: String },
}

impl Constraint {
    pub fn name(&self) -> &str {
        match self {
            Constraint::Unique { name, .. } | Constraint::Check { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EnumType {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct View {
    pub name: String,
    pub definition: String,
    pub materialized: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Sequence {
    pub name: String,
    pub data_type: String,
    pub start_value: String,
    pub min_value: String,
    pub max_value: String,
    pub increment: String,
    pub cycle: bool,
    pub cache_size: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Function {
    pub name: String,
    pub language: String,
    pub result_type: String,
    pub argument_types: String,
}

/// Database-level facts collected alongside the structural snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbMetadata {
    pub version: String,
    pub encoding: String,
    pub collation: String,
    pub size_bytes: i64,
    pub table_count: i64,
    pub index_count: i64,
    pub constraint_count: i64,
    pub inspected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_type_sql_includes_qualifiers() {
        let mut column = Column::new("name", "varchar");
        column.char_length = Some(255);
        assert_eq!(column.type_sql(), "varchar(255)");

        let mut column = Column::new("price", "numeric");
        column.numeric_precision = Some(10);
        column.numeric_scale = Some(2);
        assert_eq!(column.type_sql(), "numeric(10, 2)");

        assert_eq!(Column::new("id", "bigint").type_sql(), "bigint");
    }

    #[test]
    fn realm_snapshot_round_trips_through_serde() {
        let mut realm = Realm::default();
        let mut table = Table::new("users");
        table.columns.push(Column::new("id", "bigint"));
        table.primary_key = Some(PrimaryKey {
            name: "users_pkey".into(),
            columns: vec!["id".into()],
        });
        realm.add_table(table);
        realm.enums.insert(
            "status".into(),
            EnumType {
                name: "status".into(),
                values: vec!["active".into(), "blocked".into()],
            },
        );

        let json = serde_json::to_string(&realm).unwrap();
        let back: Realm = serde_json::from_str(&json).unwrap();
        assert_eq!(back, realm);
    }
}
