//! Desired-realm derivation.
//!
//! Turns registered record metadata into the realm the database should
//! converge to, applying the dialect type map. The desired realm is rendered
//! to DDL and normalized through a scratch database before diffing, so
//! convenience spellings (`bigserial`, `cuid`) compare cleanly against what
//! the server reports.

use stratum_core::{ColumnInfo, TableInfo};

use crate::schema::{
    Column, Constraint, EnumType, ForeignKey, Index, IndexColumn, PrimaryKey, Realm, Table,
};

/// Map a declared type (language-level or SQL-level) to its postgres form.
///
/// Unknown declarations fall back to TEXT with a warning.
pub fn map_type(declared: &str) -> String {
    let decl = declared.trim();
    if decl.is_empty() {
        tracing::warn!("empty type declaration; defaulting to TEXT");
        return "TEXT".to_string();
    }

    // Array spellings map their element type.
    if let Some(element) = decl.strip_prefix("[]") {
        return format!("{}[]", map_type(element));
    }
    if let Some(inner) = decl
        .strip_prefix("Vec<")
        .and_then(|s| s.strip_suffix('>'))
    {
        return format!("{}[]", map_type(inner));
    }

    match decl.to_ascii_lowercase().as_str() {
        "string" | "str" | "text" => "TEXT".into(),
        "int" | "int32" | "i32" | "integer" => "INTEGER".into(),
        "int64" | "i64" | "bigint" => "BIGINT".into(),
        "int16" | "i16" | "smallint" => "SMALLINT".into(),
        "float32" | "f32" | "real" => "REAL".into(),
        "float64" | "f64" | "double precision" => "DOUBLE PRECISION".into(),
        "bool" | "boolean" => "BOOLEAN".into(),
        "time" | "datetime" | "timestamptz" | "timestamp" => "TIMESTAMPTZ".into(),
        "bytes" | "[]byte" | "bytea" => "BYTEA".into(),
        "cuid" => "CHAR(25)".into(),
        "cuid2" => "VARCHAR(32)".into(),
        "json" | "jsonb" => "JSONB".into(),
        "uuid" => "UUID".into(),
        "date" => "DATE".into(),
        "serial" => "SERIAL".into(),
        "bigserial" => "BIGSERIAL".into(),
        other => {
            if other.starts_with("varchar")
                || other.starts_with("char")
                || other.starts_with("numeric")
                || other.starts_with("decimal")
            {
                decl.to_string()
            } else {
                tracing::warn!(declared = %decl, "unknown type declaration; defaulting to TEXT");
                "TEXT".to_string()
            }
        }
    }
}

/// Split `varchar(255)` / `numeric(10, 2)` into base type and qualifiers.
fn split_qualifiers(type_sql: &str) -> (String, Option<i32>, Option<i32>, Option<i32>) {
    let Some(open) = type_sql.find('(') else {
        return (type_sql.to_string(), None, None, None);
    };
    let Some(close) = type_sql.rfind(')') else {
        return (type_sql.to_string(), None, None, None);
    };

    let base = type_sql[..open].trim().to_string();
    let args: Vec<i32> = type_sql[open + 1..close]
        .split(',')
        .filter_map(|a| a.trim().parse().ok())
        .collect();

    match (base.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("varchar" | "char" | "character varying" | "character", [len]) => {
            (base, Some(*len), None, None)
        }
        ("numeric" | "decimal", [p]) => (base, None, Some(*p), None),
        ("numeric" | "decimal", [p, s]) => (base, None, Some(*p), Some(*s)),
        _ => (base, None, None, None),
    }
}

fn desired_column(table: &TableInfo, info: &ColumnInfo, ordinal: i32) -> Column {
    let mapped = match info.enum_values.as_ref() {
        // Enum columns use their dedicated type.
        Some(_) => format!("{}_{}", table.table_name, info.db_name),
        None => {
            let declared = map_type(&info.db_type);
            match info.auto_generated && info.primary_key {
                true => match declared.as_str() {
                    "INTEGER" => "SERIAL".to_string(),
                    "BIGINT" => "BIGSERIAL".to_string(),
                    "SMALLINT" => "SMALLSERIAL".to_string(),
                    _ => declared,
                },
                false => declared,
            }
        }
    };

    let (base, char_length, precision, scale) = split_qualifiers(&mapped);
    Column {
        name: info.db_name.clone(),
        db_type: base,
        nullable: info.nullable && !info.primary_key,
        default: info.default.clone(),
        char_length,
        numeric_precision: precision,
        numeric_scale: scale,
        ordinal,
    }
}

/// Build the desired realm from registered table metadata.
pub fn realm_from_tables(tables: &[TableInfo]) -> Realm {
    let mut realm = Realm::default();

    for info in tables {
        let mut table = Table::new(info.table_name.clone());

        for (i, column) in info.columns.iter().enumerate() {
            table
                .columns
                .push(desired_column(info, column, i as i32 + 1));

            if let Some(values) = &column.enum_values {
                let name = format!("{}_{}", info.table_name, column.db_name);
                realm.enums.insert(
                    name.clone(),
                    EnumType {
                        name,
                        values: values.clone(),
                    },
                );
            }

            if let Some(fk) = &column.foreign_key {
                table.foreign_keys.push(ForeignKey {
                    name: format!("{}_{}_fkey", info.table_name, column.db_name),
                    columns: vec![column.db_name.clone()],
                    ref_table: fk.table.clone(),
                    ref_columns: vec![fk.column.clone()],
                    on_delete: fk.on_delete.clone(),
                    on_update: fk.on_update.clone(),
                });
            }

            if column.unique && !column.primary_key {
                table.constraints.push(Constraint::Unique {
                    name: format!("{}_{}_key", info.table_name, column.db_name),
                    columns: vec![column.db_name.clone()],
                });
            }

            if let Some(check) = &column.check {
                table.constraints.push(Constraint::Check {
                    name: format!("{}_{}_check", info.table_name, column.db_name),
                    expression: check.clone(),
                });
            }
        }

        if !info.primary_keys.is_empty() {
            table.primary_key = Some(PrimaryKey {
                name: format!("{}_pkey", info.table_name),
                columns: info.primary_keys.clone(),
            });
        }

        for spec in &info.indexes {
            table.indexes.push(Index {
                name: spec.name.clone(),
                columns: spec
                    .columns
                    .iter()
                    .map(|c| IndexColumn {
                        name: c.clone(),
                        descending: false,
                    })
                    .collect(),
                unique: spec.unique,
                where_clause: spec.where_clause.clone(),
                using: spec.using.clone(),
            });
        }

        realm.add_table(table);
    }

    realm
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::ForeignKeyRef;

    fn column(field: &str, db_type: &str) -> ColumnInfo {
        ColumnInfo::new(field, field, db_type)
    }

    #[test]
    fn type_map_covers_the_documented_spellings() {
        assert_eq!(map_type("string"), "TEXT");
        assert_eq!(map_type("i32"), "INTEGER");
        assert_eq!(map_type("int64"), "BIGINT");
        assert_eq!(map_type("i16"), "SMALLINT");
        assert_eq!(map_type("f32"), "REAL");
        assert_eq!(map_type("float64"), "DOUBLE PRECISION");
        assert_eq!(map_type("bool"), "BOOLEAN");
        assert_eq!(map_type("time"), "TIMESTAMPTZ");
        assert_eq!(map_type("[]byte"), "BYTEA");
        assert_eq!(map_type("cuid"), "CHAR(25)");
        assert_eq!(map_type("cuid2"), "VARCHAR(32)");
        assert_eq!(map_type("[]string"), "TEXT[]");
        assert_eq!(map_type("Vec<i64>"), "BIGINT[]");
        assert_eq!(map_type("json"), "JSONB");
        assert_eq!(map_type("something_weird"), "TEXT");
    }

    #[test]
    fn auto_generated_integer_pk_becomes_serial() {
        let mut id = column("id", "i64");
        id.primary_key = true;
        id.auto_generated = true;
        let info = TableInfo {
            table_name: "users".into(),
            primary_keys: vec!["id".into()],
            columns: vec![id],
            indexes: Vec::new(),
        };

        let realm = realm_from_tables(&[info]);
        let table = &realm.tables["users"];
        assert_eq!(table.columns[0].db_type, "BIGSERIAL");
        assert_eq!(
            table.primary_key.as_ref().map(|pk| pk.name.as_str()),
            Some("users_pkey")
        );
    }

    #[test]
    fn foreign_keys_uniques_and_enums_land_in_the_realm() {
        let mut id = column("id", "i64");
        id.primary_key = true;
        let mut email = column("email", "varchar(255)");
        email.unique = true;
        let mut status = column("status", "string");
        status.enum_values = Some(vec!["active".into(), "blocked".into()]);
        let mut org = column("org_id", "i64");
        org.foreign_key = Some(ForeignKeyRef {
            table: "orgs".into(),
            column: "id".into(),
            on_delete: Some("CASCADE".into()),
            on_update: None,
        });

        let info = TableInfo {
            table_name: "users".into(),
            primary_keys: vec!["id".into()],
            columns: vec![id, email, status, org],
            indexes: Vec::new(),
        };

        let realm = realm_from_tables(&[info]);
        let table = &realm.tables["users"];

        assert_eq!(table.columns[1].db_type, "varchar");
        assert_eq!(table.columns[1].char_length, Some(255));
        assert_eq!(table.columns[2].db_type, "users_status");
        assert!(realm.enums.contains_key("users_status"));
        assert_eq!(table.foreign_keys[0].ref_table, "orgs");
        assert!(matches!(
            &table.constraints[0],
            Constraint::Unique { columns, .. } if columns == &vec!["email".to_string()]
        ));
    }
}
