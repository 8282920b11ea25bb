//! Live-schema introspection.
//!
//! Reads the `public` schema of a running database into the normalized realm
//! model: tables with columns in ordinal order, primary keys, foreign keys
//! with their referential actions, indexes (excluding constraint-backed
//! ones), unique and check constraints, plus enums, views, sequences,
//! functions, and a database-level metadata tuple.

use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::Row;

use stratum_core::{Result, StratumError};

use crate::schema::{
    Column, Constraint, DbMetadata, EnumType, ForeignKey, Function, Index, IndexColumn,
    PrimaryKey, Realm, Sequence, Table, View,
};

/// SQL queries for postgres introspection.
pub mod queries {
    pub const TABLES: &str = r#"
        SELECT tablename
        FROM pg_tables
        WHERE schemaname = 'public'
        ORDER BY tablename
    "#;

    pub const COLUMNS: &str = r#"
        SELECT
            c.table_name,
            c.column_name,
            c.udt_name,
            c.is_nullable = 'YES' AS nullable,
            c.column_default,
            c.character_maximum_length::int4 AS char_length,
            CASE WHEN c.udt_name IN ('numeric', 'decimal')
                 THEN c.numeric_precision::int4 END AS numeric_precision,
            CASE WHEN c.udt_name IN ('numeric', 'decimal')
                 THEN c.numeric_scale::int4 END AS numeric_scale,
            c.ordinal_position::int4 AS ordinal
        FROM information_schema.columns c
        WHERE c.table_schema = 'public'
        ORDER BY c.table_name, c.ordinal_position
    "#;

    pub const PRIMARY_KEYS: &str = r#"
        SELECT
            t.relname AS table_name,
            con.conname AS name,
            (SELECT array_agg(a.attname ORDER BY k.ord)
               FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
               JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
            ) AS columns
        FROM pg_constraint con
        JOIN pg_class t ON t.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        WHERE con.contype = 'p' AND n.nspname = 'public'
        ORDER BY t.relname
    "#;

    pub const FOREIGN_KEYS: &str = r#"
        SELECT
            t.relname AS table_name,
            con.conname AS name,
            rt.relname AS ref_table,
            (SELECT array_agg(a.attname ORDER BY k.ord)
               FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
               JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
            ) AS columns,
            (SELECT array_agg(a.attname ORDER BY k.ord)
               FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
               JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
            ) AS ref_columns,
            con.confdeltype::text AS on_delete,
            con.confupdtype::text AS on_update
        FROM pg_constraint con
        JOIN pg_class t ON t.oid = con.conrelid
        JOIN pg_class rt ON rt.oid = con.confrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        WHERE con.contype = 'f' AND n.nspname = 'public'
        ORDER BY t.relname, con.conname
    "#;

    pub const UNIQUE_CONSTRAINTS: &str = r#"
        SELECT
            t.relname AS table_name,
            con.conname AS name,
            (SELECT array_agg(a.attname ORDER BY k.ord)
               FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
               JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
            ) AS columns
        FROM pg_constraint con
        JOIN pg_class t ON t.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        WHERE con.contype = 'u' AND n.nspname = 'public'
        ORDER BY t.relname, con.conname
    "#;

    pub const CHECK_CONSTRAINTS: &str = r#"
        SELECT
            t.relname AS table_name,
            con.conname AS name,
            pg_get_constraintdef(con.oid) AS definition
        FROM pg_constraint con
        JOIN pg_class t ON t.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        WHERE con.contype = 'c' AND n.nspname = 'public'
        ORDER BY t.relname, con.conname
    "#;

    /// Constraint-backed indexes are excluded; they travel as constraints.
    pub const INDEXES: &str = r#"
        SELECT
            t.relname AS table_name,
            i.relname AS name,
            ix.indisunique AS is_unique,
            am.amname AS method,
            pg_get_expr(ix.indpred, ix.indrelid) AS where_clause,
            pg_get_indexdef(ix.indexrelid) AS definition
        FROM pg_index ix
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_am am ON am.oid = i.relam
        JOIN pg_namespace n ON n.oid = t.relnamespace
        WHERE n.nspname = 'public'
          AND NOT ix.indisprimary
          AND NOT EXISTS (
            SELECT 1 FROM pg_constraint con WHERE con.conindid = ix.indexrelid
          )
        ORDER BY t.relname, i.relname
    "#;

    pub const ENUMS: &str = r#"
        SELECT
            t.typname AS name,
            array_agg(e.enumlabel ORDER BY e.enumsortorder) AS values
        FROM pg_type t
        JOIN pg_enum e ON t.oid = e.enumtypid
        JOIN pg_namespace n ON n.oid = t.typnamespace
        WHERE n.nspname = 'public'
        GROUP BY t.typname
        ORDER BY t.typname
    "#;

    pub const VIEWS: &str = r#"
        SELECT viewname AS name, definition, FALSE AS materialized
        FROM pg_views
        WHERE schemaname = 'public'
        UNION ALL
        SELECT matviewname AS name, definition, TRUE AS materialized
        FROM pg_matviews
        WHERE schemaname = 'public'
        ORDER BY name
    "#;

    pub const SEQUENCES: &str = r#"
        SELECT
            sequencename AS name,
            data_type::text,
            start_value::text,
            min_value::text,
            max_value::text,
            increment_by::text AS increment,
            cycle,
            cache_size::text
        FROM pg_sequences
        WHERE schemaname = 'public'
        ORDER BY sequencename
    "#;

    pub const FUNCTIONS: &str = r#"
        SELECT
            p.proname AS name,
            l.lanname AS language,
            pg_get_function_result(p.oid) AS result_type,
            pg_get_function_arguments(p.oid) AS argument_types
        FROM pg_proc p
        JOIN pg_namespace n ON n.oid = p.pronamespace
        JOIN pg_language l ON l.oid = p.prolang
        WHERE n.nspname = 'public' AND p.prokind = 'f'
        ORDER BY p.proname
    "#;

    pub const DATABASE_FACTS: &str = r#"
        SELECT
            version() AS version,
            pg_encoding_to_char(d.encoding) AS encoding,
            d.datcollate AS collation,
            pg_database_size(current_database()) AS size_bytes
        FROM pg_database d
        WHERE d.datname = current_database()
    "#;

    pub const CONSTRAINT_COUNT: &str = r#"
        SELECT COUNT(*) FROM pg_constraint con
        JOIN pg_class t ON t.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        WHERE n.nspname = 'public'
    "#;

    pub const INDEX_COUNT: &str = r#"
        SELECT COUNT(*) FROM pg_indexes WHERE schemaname = 'public'
    "#;
}

fn introspect_err(context: &str, err: sqlx::Error) -> StratumError {
    StratumError::SchemaIntrospection(format!("{context}: {err}"))
}

/// Translate `pg_constraint` action codes into SQL keywords; `NO ACTION` is
/// the default and travels as `None`.
fn referential_action(code: &str) -> Option<String> {
    match code {
        "r" => Some("RESTRICT".to_string()),
        "c" => Some("CASCADE".to_string()),
        "n" => Some("SET NULL".to_string()),
        "d" => Some("SET DEFAULT".to_string()),
        _ => None,
    }
}

/// Pull `(column, DESC?)` pairs out of a `pg_get_indexdef` rendering.
fn parse_index_columns(definition: &str) -> Vec<IndexColumn> {
    let Some(open) = definition.find('(') else {
        return Vec::new();
    };
    let Some(close) = definition.rfind(')') else {
        return Vec::new();
    };

    let mut columns = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in definition[open + 1..close].chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                columns.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        columns.push(current);
    }

    columns
        .into_iter()
        .map(|part| {
            let part = part.trim();
            let descending = part.to_ascii_uppercase().ends_with(" DESC");
            let name = part
                .trim_end_matches(" DESC")
                .trim_end_matches(" desc")
                .trim_matches('"')
                .to_string();
            IndexColumn { name, descending }
        })
        .collect()
}

/// Strip the `CHECK ((…))` wrapper `pg_get_constraintdef` produces.
fn check_expression(definition: &str) -> String {
    let trimmed = definition.trim();
    let mut body = trimmed.strip_prefix("CHECK").unwrap_or(trimmed).trim();
    while body.starts_with('(') && body.ends_with(')') && wrapped_in_one_pair(body) {
        body = body[1..body.len() - 1].trim();
    }
    body.to_string()
}

/// True when the leading `(` closes at the final character.
fn wrapped_in_one_pair(s: &str) -> bool {
    let mut depth = 0usize;
    for (i, ch) in s.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == s.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// Reads the live realm through a connection pool.
#[derive(Debug, Clone)]
pub struct Introspector {
    pool: PgPool,
}

impl Introspector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Read the complete realm, including the database metadata tuple.
    pub async fn inspect(&self) -> Result<Realm> {
        let mut realm = Realm::default();

        let table_rows = sqlx::query(queries::TABLES)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| introspect_err("tables", e))?;
        for row in &table_rows {
            let name: String = row.try_get(0).map_err(|e| introspect_err("tables", e))?;
            realm.add_table(Table::new(name));
        }

        self.load_columns(&mut realm).await?;
        self.load_primary_keys(&mut realm).await?;
        self.load_foreign_keys(&mut realm).await?;
        self.load_constraints(&mut realm).await?;
        self.load_indexes(&mut realm).await?;
        self.load_enums(&mut realm).await?;
        self.load_views(&mut realm).await?;
        self.load_sequences(&mut realm).await?;
        self.load_functions(&mut realm).await?;
        realm.metadata = Some(self.load_metadata(&realm).await?);

        Ok(realm)
    }

    async fn load_columns(&self, realm: &mut Realm) -> Result<()> {
        let rows = sqlx::query(queries::COLUMNS)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| introspect_err("columns", e))?;

        for row in &rows {
            let table: String = row.try_get("table_name").map_err(|e| introspect_err("columns", e))?;
            let Some(entry) = realm.tables.get_mut(&table) else {
                continue;
            };
            entry.columns.push(Column {
                name: row.try_get("column_name").map_err(|e| introspect_err("columns", e))?,
                db_type: row.try_get("udt_name").map_err(|e| introspect_err("columns", e))?,
                nullable: row.try_get("nullable").map_err(|e| introspect_err("columns", e))?,
                default: row.try_get("column_default").map_err(|e| introspect_err("columns", e))?,
                char_length: row.try_get("char_length").map_err(|e| introspect_err("columns", e))?,
                numeric_precision: row
                    .try_get("numeric_precision")
                    .map_err(|e| introspect_err("columns", e))?,
                numeric_scale: row
                    .try_get("numeric_scale")
                    .map_err(|e| introspect_err("columns", e))?,
                ordinal: row.try_get("ordinal").map_err(|e| introspect_err("columns", e))?,
            });
        }
        Ok(())
    }

    async fn load_primary_keys(&self, realm: &mut Realm) -> Result<()> {
        let rows = sqlx::query(queries::PRIMARY_KEYS)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| introspect_err("primary keys", e))?;

        for row in &rows {
            let table: String = row.try_get("table_name").map_err(|e| introspect_err("primary keys", e))?;
            let Some(entry) = realm.tables.get_mut(&table) else {
                continue;
            };
            entry.primary_key = Some(PrimaryKey {
                name: row.try_get("name").map_err(|e| introspect_err("primary keys", e))?,
                columns: row.try_get("columns").map_err(|e| introspect_err("primary keys", e))?,
            });
        }
        Ok(())
    }

    async fn load_foreign_keys(&self, realm: &mut Realm) -> Result<()> {
        let rows = sqlx::query(queries::FOREIGN_KEYS)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| introspect_err("foreign keys", e))?;

        for row in &rows {
            let table: String = row.try_get("table_name").map_err(|e| introspect_err("foreign keys", e))?;
            let Some(entry) = realm.tables.get_mut(&table) else {
                continue;
            };
            let on_delete: String = row.try_get("on_delete").map_err(|e| introspect_err("foreign keys", e))?;
            let on_update: String = row.try_get("on_update").map_err(|e| introspect_err("foreign keys", e))?;
            entry.foreign_keys.push(ForeignKey {
                name: row.try_get("name").map_err(|e| introspect_err("foreign keys", e))?,
                columns: row.try_get("columns").map_err(|e| introspect_err("foreign keys", e))?,
                ref_table: row.try_get("ref_table").map_err(|e| introspect_err("foreign keys", e))?,
                ref_columns: row.try_get("ref_columns").map_err(|e| introspect_err("foreign keys", e))?,
                on_delete: referential_action(&on_delete),
                on_update: referential_action(&on_update),
            });
        }
        Ok(())
    }

    async fn load_constraints(&self, realm: &mut Realm) -> Result<()> {
        let rows = sqlx::query(queries::UNIQUE_CONSTRAINTS)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| introspect_err("unique constraints", e))?;
        for row in &rows {
            let table: String = row
                .try_get("table_name")
                .map_err(|e| introspect_err("unique constraints", e))?;
            let Some(entry) = realm.tables.get_mut(&table) else {
                continue;
            };
            entry.constraints.push(Constraint::Unique {
                name: row.try_get("name").map_err(|e| introspect_err("unique constraints", e))?,
                columns: row
                    .try_get("columns")
                    .map_err(|e| introspect_err("unique constraints", e))?,
            });
        }

        let rows = sqlx::query(queries::CHECK_CONSTRAINTS)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| introspect_err("check constraints", e))?;
        for row in &rows {
            let table: String = row
                .try_get("table_name")
                .map_err(|e| introspect_err("check constraints", e))?;
            let Some(entry) = realm.tables.get_mut(&table) else {
                continue;
            };
            let definition: String = row
                .try_get("definition")
                .map_err(|e| introspect_err("check constraints", e))?;
            entry.constraints.push(Constraint::Check {
                name: row.try_get("name").map_err(|e| introspect_err("check constraints", e))?,
                expression: check_expression(&definition),
            });
        }
        Ok(())
    }

    async fn load_indexes(&self, realm: &mut Realm) -> Result<()> {
        let rows = sqlx::query(queries::INDEXES)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| introspect_err("indexes", e))?;

        for row in &rows {
            let table: String = row.try_get("table_name").map_err(|e| introspect_err("indexes", e))?;
            let Some(entry) = realm.tables.get_mut(&table) else {
                continue;
            };
            let definition: String = row.try_get("definition").map_err(|e| introspect_err("indexes", e))?;
            let method: String = row.try_get("method").map_err(|e| introspect_err("indexes", e))?;
            entry.indexes.push(Index {
                name: row.try_get("name").map_err(|e| introspect_err("indexes", e))?,
                columns: parse_index_columns(&definition),
                unique: row.try_get("is_unique").map_err(|e| introspect_err("indexes", e))?,
                where_clause: row
                    .try_get("where_clause")
                    .map_err(|e| introspect_err("indexes", e))?,
                using: Some(method),
            });
        }
        Ok(())
    }

    async fn load_enums(&self, realm: &mut Realm) -> Result<()> {
        let rows = sqlx::query(queries::ENUMS)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| introspect_err("enums", e))?;
        for row in &rows {
            let name: String = row.try_get("name").map_err(|e| introspect_err("enums", e))?;
            let values: Vec<String> = row.try_get("values").map_err(|e| introspect_err("enums", e))?;
            realm.enums.insert(name.clone(), EnumType { name, values });
        }
        Ok(())
    }

    async fn load_views(&self, realm: &mut Realm) -> Result<()> {
        let rows = sqlx::query(queries::VIEWS)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| introspect_err("views", e))?;
        for row in &rows {
            let name: String = row.try_get("name").map_err(|e| introspect_err("views", e))?;
            realm.views.insert(
                name.clone(),
                View {
                    name,
                    definition: row.try_get("definition").map_err(|e| introspect_err("views", e))?,
                    materialized: row
                        .try_get("materialized")
                        .map_err(|e| introspect_err("views", e))?,
                },
            );
        }
        Ok(())
    }

    async fn load_sequences(&self, realm: &mut Realm) -> Result<()> {
        let rows = sqlx::query(queries::SEQUENCES)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| introspect_err("sequences", e))?;
        for row in &rows {
            let name: String = row.try_get("name").map_err(|e| introspect_err("sequences", e))?;
            realm.sequences.insert(
                name.clone(),
                Sequence {
                    name,
                    data_type: row.try_get("data_type").map_err(|e| introspect_err("sequences", e))?,
                    start_value: row
                        .try_get("start_value")
                        .map_err(|e| introspect_err("sequences", e))?,
                    min_value: row.try_get("min_value").map_err(|e| introspect_err("sequences", e))?,
                    max_value: row.try_get("max_value").map_err(|e| introspect_err("sequences", e))?,
                    increment: row.try_get("increment").map_err(|e| introspect_err("sequences", e))?,
                    cycle: row.try_get("cycle").map_err(|e| introspect_err("sequences", e))?,
                    cache_size: row.try_get("cache_size").map_err(|e| introspect_err("sequences", e))?,
                },
            );
        }
        Ok(())
    }

    async fn load_functions(&self, realm: &mut Realm) -> Result<()> {
        let rows = sqlx::query(queries::FUNCTIONS)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| introspect_err("functions", e))?;
        for row in &rows {
            let name: String = row.try_get("name").map_err(|e| introspect_err("functions", e))?;
            realm.functions.insert(
                name.clone(),
                Function {
                    name,
                    language: row.try_get("language").map_err(|e| introspect_err("functions", e))?,
                    result_type: row
                        .try_get("result_type")
                        .map_err(|e| introspect_err("functions", e))?,
                    argument_types: row
                        .try_get("argument_types")
                        .map_err(|e| introspect_err("functions", e))?,
                },
            );
        }
        Ok(())
    }

    async fn load_metadata(&self, realm: &Realm) -> Result<DbMetadata> {
        let facts = sqlx::query(queries::DATABASE_FACTS)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| introspect_err("database facts", e))?;
        let index_count: i64 = sqlx::query_scalar(queries::INDEX_COUNT)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| introspect_err("index count", e))?;
        let constraint_count: i64 = sqlx::query_scalar(queries::CONSTRAINT_COUNT)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| introspect_err("constraint count", e))?;

        Ok(DbMetadata {
            version: facts.try_get("version").map_err(|e| introspect_err("database facts", e))?,
            encoding: facts.try_get("encoding").map_err(|e| introspect_err("database facts", e))?,
            collation: facts
                .try_get("collation")
                .map_err(|e| introspect_err("database facts", e))?,
            size_bytes: facts
                .try_get("size_bytes")
                .map_err(|e| introspect_err("database facts", e))?,
            table_count: realm.tables.len() as i64,
            index_count,
            constraint_count,
            inspected_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referential_actions_map_constraint_codes() {
        assert_eq!(referential_action("c").as_deref(), Some("CASCADE"));
        assert_eq!(referential_action("r").as_deref(), Some("RESTRICT"));
        assert_eq!(referential_action("n").as_deref(), Some("SET NULL"));
        assert_eq!(referential_action("d").as_deref(), Some("SET DEFAULT"));
        assert_eq!(referential_action("a"), None);
    }

    #[test]
    fn index_columns_parse_names_and_direction() {
        let definition =
            "CREATE INDEX idx_users ON public.users USING btree (email, created_at DESC)";
        let columns = parse_index_columns(definition);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "email");
        assert!(!columns[0].descending);
        assert_eq!(columns[1].name, "created_at");
        assert!(columns[1].descending);
    }

    #[test]
    fn index_columns_keep_function_expressions_whole() {
        let definition = "CREATE INDEX idx ON t USING btree (lower(email), id)";
        let columns = parse_index_columns(definition);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "lower(email)");
    }

    #[test]
    fn check_expression_strips_the_wrapper() {
        assert_eq!(
            check_expression("CHECK ((length(email) > 3))"),
            "length(email) > 3"
        );
        assert_eq!(
            check_expression("CHECK (((a > 1) OR (b > 2)))"),
            "(a > 1) OR (b > 2)"
        );
    }
}
