//! The record annotation grammar.
//!
//! Record definitions declare their schema with semicolon-separated
//! attribute strings (`column:id;type:cuid;primary_key`). The attribute sets
//! are closed: a field carries either column attributes or relationship
//! attributes, never both, and table-level attributes live on a sentinel
//! field. This module parses those strings into typed attribute values with
//! the documented defaults, which the schema reconciler consumes when
//! deriving the desired realm.

use heck::ToSnakeCase;

use crate::error::{Result, StratumError};
use crate::metadata::ForeignKeyRef;

/// Parsed column attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnSpec {
    pub column: Option<String>,
    pub db_type: Option<String>,
    pub primary_key: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<String>,
    pub check: Option<String>,
    pub foreign_key: Option<ForeignKeyRef>,
    pub enum_values: Vec<String>,
    pub array_type: Option<String>,
    pub ignore: bool,
    pub immutable: bool,
    pub computed: Option<String>,
}

/// Relationship kinds as they appear in annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKindSpec {
    BelongsTo,
    HasOne,
    HasMany,
    HasManyThrough,
}

impl RelationKindSpec {
    /// The annotation keyword for this kind.
    pub fn keyword(self) -> &'static str {
        match self {
            RelationKindSpec::BelongsTo => "belongs_to",
            RelationKindSpec::HasOne => "has_one",
            RelationKindSpec::HasMany => "has_many",
            RelationKindSpec::HasManyThrough => "has_many_through",
        }
    }
}

/// Parsed relationship attributes, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationSpec {
    pub kind: RelationKindSpec,
    pub target: String,
    pub foreign_key: String,
    pub source_key: String,
    pub target_key: String,
    pub join_table: Option<String>,
    pub source_fk: Option<String>,
    pub target_fk: Option<String>,
    pub order_by: Option<String>,
    pub dependent: Option<Dependent>,
    pub inverse: Option<String>,
    pub polymorphic: Option<String>,
    pub through: Option<String>,
    pub counter: Option<String>,
    pub validate: bool,
    pub autosave: bool,
    pub conditions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependent {
    Destroy,
    Delete,
    Nullify,
    Restrict,
}

/// One field's annotation: a column or a relationship, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSpec {
    Column(ColumnSpec),
    Relation(RelationSpec),
}

/// An index declaration from a table-level annotation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub where_clause: Option<String>,
    pub using: Option<String>,
}

/// Table-level attributes from the sentinel field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSpec {
    pub name: Option<String>,
    pub indexes: Vec<IndexSpec>,
}

fn split_attrs(input: &str) -> impl Iterator<Item = &str> {
    input.split(';').map(str::trim).filter(|s| !s.is_empty())
}

fn invalid(attr: &str, reason: &str) -> StratumError {
    StratumError::InvalidArgument(format!("bad annotation '{attr}': {reason}"))
}

/// Parse a field annotation into a column or relationship spec.
pub fn parse_field(input: &str) -> Result<FieldSpec> {
    let mut column = ColumnSpec::default();
    let mut saw_column_attr = false;

    let mut relation_kind: Option<(RelationKindSpec, String)> = None;
    let mut rel_foreign_key = None;
    let mut rel_source_key = None;
    let mut rel_target_key = None;
    let mut join_table = None;
    let mut source_fk = None;
    let mut target_fk = None;
    let mut order_by = None;
    let mut dependent = None;
    let mut inverse = None;
    let mut polymorphic = None;
    let mut through = None;
    let mut counter = None;
    let mut validate = true;
    let mut autosave = false;
    let mut conditions = Vec::new();
    let mut saw_relation_attr = false;

    for attr in split_attrs(input) {
        let (key, value) = match attr.split_once(':') {
            Some((k, v)) => (k.trim(), Some(v.trim())),
            None => (attr, None),
        };

        let require_value = |v: Option<&str>| {
            v.filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| invalid(attr, "missing value"))
        };

        match key {
            // ---- column attributes ----
            "column" => {
                column.column = Some(require_value(value)?);
                saw_column_attr = true;
            }
            "type" => {
                column.db_type = Some(require_value(value)?);
                saw_column_attr = true;
            }
            "primary_key" => {
                column.primary_key = true;
                saw_column_attr = true;
            }
            "not_null" => {
                column.not_null = true;
                saw_column_attr = true;
            }
            "unique" => {
                column.unique = true;
                saw_column_attr = true;
            }
            "default" => {
                column.default = Some(require_value(value)?);
                saw_column_attr = true;
            }
            "check" => {
                column.check = Some(require_value(value)?);
                saw_column_attr = true;
            }
            "foreign_key" if relation_kind.is_none() && !saw_relation_attr => {
                let target = require_value(value)?;
                let (table, col) = target
                    .split_once('.')
                    .ok_or_else(|| invalid(attr, "expected table.column"))?;
                column.foreign_key = Some(ForeignKeyRef {
                    table: table.to_string(),
                    column: col.to_string(),
                    on_delete: None,
                    on_update: None,
                });
                saw_column_attr = true;
            }
            "on_delete" => {
                let action = require_value(value)?;
                match &mut column.foreign_key {
                    Some(fk) => fk.on_delete = Some(action),
                    None => return Err(invalid(attr, "on_delete without foreign_key")),
                }
            }
            "on_update" => {
                let action = require_value(value)?;
                match &mut column.foreign_key {
                    Some(fk) => fk.on_update = Some(action),
                    None => return Err(invalid(attr, "on_update without foreign_key")),
                }
            }
            "enum" => {
                column.enum_values = require_value(value)?
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .collect();
                saw_column_attr = true;
            }
            "array_type" => {
                column.array_type = Some(require_value(value)?);
                saw_column_attr = true;
            }
            "ignore" => {
                column.ignore = true;
                saw_column_attr = true;
            }
            "immutable" => {
                column.immutable = true;
                saw_column_attr = true;
            }
            "computed" => {
                column.computed = Some(require_value(value)?);
                saw_column_attr = true;
            }

            // ---- relationship attributes ----
            "relation" => {
                let spec = require_value(value)?;
                let (kind, target) = spec
                    .split_once(':')
                    .ok_or_else(|| invalid(attr, "expected relation:<kind>:<target>"))?;
                let kind = match kind {
                    "belongs_to" => RelationKindSpec::BelongsTo,
                    "has_one" => RelationKindSpec::HasOne,
                    "has_many" => RelationKindSpec::HasMany,
                    "has_many_through" => RelationKindSpec::HasManyThrough,
                    other => return Err(invalid(attr, &format!("unknown kind {other}"))),
                };
                relation_kind = Some((kind, target.to_string()));
                saw_relation_attr = true;
            }
            "foreign_key" => {
                rel_foreign_key = Some(require_value(value)?);
                saw_relation_attr = true;
            }
            "source_key" => {
                rel_source_key = Some(require_value(value)?);
                saw_relation_attr = true;
            }
            "target_key" => {
                rel_target_key = Some(require_value(value)?);
                saw_relation_attr = true;
            }
            "join_table" => {
                join_table = Some(require_value(value)?);
                saw_relation_attr = true;
            }
            "source_fk" => {
                source_fk = Some(require_value(value)?);
                saw_relation_attr = true;
            }
            "target_fk" => {
                target_fk = Some(require_value(value)?);
                saw_relation_attr = true;
            }
            "order_by" => {
                order_by = Some(require_value(value)?);
                saw_relation_attr = true;
            }
            "dependent" => {
                dependent = Some(match require_value(value)?.as_str() {
                    "destroy" => Dependent::Destroy,
                    "delete" => Dependent::Delete,
                    "nullify" => Dependent::Nullify,
                    "restrict" => Dependent::Restrict,
                    other => return Err(invalid(attr, &format!("unknown dependent {other}"))),
                });
                saw_relation_attr = true;
            }
            "inverse" => {
                inverse = Some(require_value(value)?);
                saw_relation_attr = true;
            }
            "polymorphic" => {
                polymorphic = Some(require_value(value)?);
                saw_relation_attr = true;
            }
            "through" => {
                through = Some(require_value(value)?);
                saw_relation_attr = true;
            }
            "counter" => {
                counter = Some(require_value(value)?);
                saw_relation_attr = true;
            }
            "validate" => {
                validate = true;
                saw_relation_attr = true;
            }
            "no_validate" => {
                validate = false;
                saw_relation_attr = true;
            }
            "autosave" => {
                autosave = true;
                saw_relation_attr = true;
            }
            "no_autosave" => {
                autosave = false;
                saw_relation_attr = true;
            }
            "conditions" => {
                conditions = require_value(value)?
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .collect();
                saw_relation_attr = true;
            }

            other => return Err(invalid(attr, &format!("unknown attribute {other}"))),
        }
    }

    match relation_kind {
        Some((kind, target)) => {
            if saw_column_attr {
                return Err(StratumError::InvalidArgument(format!(
                    "annotation '{input}' mixes column and relationship attributes"
                )));
            }

            if kind == RelationKindSpec::HasManyThrough
                && (join_table.is_none() || source_fk.is_none() || target_fk.is_none())
            {
                return Err(StratumError::InvalidArgument(format!(
                    "has_many_through '{target}' requires join_table, source_fk, and target_fk"
                )));
            }

            // Only belongs_to has a documented foreign-key default; the
            // has_* kinds name a column on another table and must be
            // explicit. Through relationships carry their keys on the join
            // table, so a bare foreign_key is passed along but never
            // fabricated.
            let foreign_key = match kind {
                RelationKindSpec::BelongsTo => rel_foreign_key
                    .unwrap_or_else(|| format!("{}_id", target.to_snake_case())),
                RelationKindSpec::HasOne | RelationKindSpec::HasMany => {
                    match rel_foreign_key {
                        Some(foreign_key) => foreign_key,
                        None => {
                            return Err(StratumError::InvalidArgument(format!(
                                "foreign_key is required for {} relationships",
                                kind.keyword()
                            )))
                        }
                    }
                }
                RelationKindSpec::HasManyThrough => rel_foreign_key.unwrap_or_default(),
            };

            Ok(FieldSpec::Relation(RelationSpec {
                kind,
                target,
                foreign_key,
                source_key: rel_source_key.unwrap_or_else(|| "id".to_string()),
                target_key: rel_target_key.unwrap_or_else(|| "id".to_string()),
                join_table,
                source_fk,
                target_fk,
                order_by,
                dependent,
                inverse,
                polymorphic,
                through,
                counter,
                validate,
                autosave,
                conditions,
            }))
        }
        None if saw_relation_attr => Err(StratumError::InvalidArgument(format!(
            "annotation '{input}' uses relationship attributes without relation:<kind>:<target>"
        ))),
        None => Ok(FieldSpec::Column(column)),
    }
}

/// Parse a table-level annotation from the sentinel field.
pub fn parse_table(input: &str) -> Result<TableSpec> {
    let mut spec = TableSpec::default();

    for attr in split_attrs(input) {
        let (key, value) = match attr.split_once(':') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => return Err(invalid(attr, "table attributes take values")),
        };

        match key {
            "table" => spec.name = Some(value.to_string()),
            "index" => spec.indexes.push(parse_index(attr, value, false)?),
            "unique" => spec.indexes.push(parse_index(attr, value, true)?),
            other => return Err(invalid(attr, &format!("unknown table attribute {other}"))),
        }
    }

    Ok(spec)
}

/// Index grammar: `<name,col[,col…][ where:<expr>][ using:<method>]`.
fn parse_index(attr: &str, value: &str, unique: bool) -> Result<IndexSpec> {
    let mut where_clause = None;
    let mut using = None;

    let mut body = value;
    if let Some(pos) = body.find(" using:") {
        using = Some(body[pos + " using:".len()..].trim().to_string());
        body = &body[..pos];
    }
    if let Some(pos) = body.find(" where:") {
        where_clause = Some(body[pos + " where:".len()..].trim().to_string());
        body = &body[..pos];
    }

    let mut parts = body.split(',').map(str::trim).filter(|s| !s.is_empty());
    let name = parts
        .next()
        .ok_or_else(|| invalid(attr, "index needs a name"))?
        .to_string();
    let columns: Vec<String> = parts.map(String::from).collect();
    if columns.is_empty() {
        return Err(invalid(attr, "index needs at least one column"));
    }

    Ok(IndexSpec {
        name,
        columns,
        unique,
        where_clause,
        using,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_annotation_with_flags_and_values() {
        let spec = parse_field("column:email;type:varchar(255);not_null;unique").unwrap();
        let FieldSpec::Column(col) = spec else {
            panic!("expected column spec");
        };
        assert_eq!(col.column.as_deref(), Some("email"));
        assert_eq!(col.db_type.as_deref(), Some("varchar(255)"));
        assert!(col.not_null);
        assert!(col.unique);
        assert!(!col.primary_key);
    }

    #[test]
    fn foreign_key_with_actions() {
        let spec =
            parse_field("column:user_id;type:bigint;foreign_key:users.id;on_delete:CASCADE")
                .unwrap();
        let FieldSpec::Column(col) = spec else {
            panic!("expected column spec");
        };
        let fk = col.foreign_key.unwrap();
        assert_eq!(fk.table, "users");
        assert_eq!(fk.column, "id");
        assert_eq!(fk.on_delete.as_deref(), Some("CASCADE"));
    }

    #[test]
    fn belongs_to_defaults_foreign_key_and_target_key() {
        let spec = parse_field("relation:belongs_to:UserProfile").unwrap();
        let FieldSpec::Relation(rel) = spec else {
            panic!("expected relation spec");
        };
        assert_eq!(rel.kind, RelationKindSpec::BelongsTo);
        assert_eq!(rel.foreign_key, "user_profile_id");
        assert_eq!(rel.target_key, "id");
        assert!(rel.validate);
    }

    #[test]
    fn has_one_and_has_many_require_an_explicit_foreign_key() {
        let err = parse_field("relation:has_many:posts").unwrap_err();
        assert!(
            err.to_string()
                .contains("foreign_key is required for has_many"),
            "got {err}"
        );

        let err = parse_field("relation:has_one:profile").unwrap_err();
        assert!(
            err.to_string()
                .contains("foreign_key is required for has_one"),
            "got {err}"
        );

        let ok = parse_field("relation:has_many:posts;foreign_key:user_id").unwrap();
        let FieldSpec::Relation(rel) = ok else {
            panic!("expected relation spec");
        };
        assert_eq!(rel.kind, RelationKindSpec::HasMany);
        assert_eq!(rel.foreign_key, "user_id");
        assert_eq!(rel.source_key, "id");
    }

    #[test]
    fn has_many_through_requires_join_plumbing() {
        let err = parse_field("relation:has_many_through:tags").unwrap_err();
        assert!(err.to_string().contains("join_table"));

        let ok = parse_field(
            "relation:has_many_through:tags;join_table:post_tags;source_fk:post_id;target_fk:tag_id",
        )
        .unwrap();
        let FieldSpec::Relation(rel) = ok else {
            panic!("expected relation spec");
        };
        assert_eq!(rel.join_table.as_deref(), Some("post_tags"));
    }

    #[test]
    fn mixing_column_and_relationship_attributes_fails() {
        let err = parse_field("column:user_id;relation:belongs_to:users").unwrap_err();
        assert!(err.to_string().contains("mixes"));
    }

    #[test]
    fn table_annotation_with_indexes() {
        let spec = parse_table(
            "table:posts;index:idx_posts_user,user_id where:deleted_at IS NULL using:btree;unique:uq_posts_slug,slug",
        )
        .unwrap();
        assert_eq!(spec.name.as_deref(), Some("posts"));
        assert_eq!(spec.indexes.len(), 2);

        let idx = &spec.indexes[0];
        assert_eq!(idx.name, "idx_posts_user");
        assert_eq!(idx.columns, vec!["user_id"]);
        assert_eq!(idx.where_clause.as_deref(), Some("deleted_at IS NULL"));
        assert_eq!(idx.using.as_deref(), Some("btree"));
        assert!(!idx.unique);
        assert!(spec.indexes[1].unique);
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        assert!(parse_field("column:id;sparkles").is_err());
    }
}
