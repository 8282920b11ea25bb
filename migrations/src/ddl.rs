//! DDL generation.
//!
//! Renders realm objects and plan changes into executable statements. Every
//! identifier goes through the shared quoting helper; column modifications
//! use `ALTER COLUMN … SET DATA TYPE / SET NOT NULL / SET DEFAULT` so the
//! server validates convertibility.

use stratum_core::quote_ident;

use crate::diff::{order_by_dependencies, Change, MigrationPlan, TableChange};
use crate::schema::{Column, Constraint, ForeignKey, Index, Realm, Table};

/// One column definition inside CREATE TABLE / ADD COLUMN.
fn column_def(column: &Column) -> String {
    let mut def = format!("{} {}", quote_ident(&column.name), column.type_sql());
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        def.push_str(&format!(" DEFAULT {default}"));
    }
    def
}

fn foreign_key_clause(fk: &ForeignKey) -> String {
    let columns: Vec<String> = fk.columns.iter().map(|c| quote_ident(c)).collect();
    let ref_columns: Vec<String> = fk.ref_columns.iter().map(|c| quote_ident(c)).collect();
    let mut clause = format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_ident(&fk.name),
        columns.join(", "),
        quote_ident(&fk.ref_table),
        ref_columns.join(", ")
    );
    if let Some(action) = &fk.on_delete {
        clause.push_str(&format!(" ON DELETE {action}"));
    }
    if let Some(action) = &fk.on_update {
        clause.push_str(&format!(" ON UPDATE {action}"));
    }
    clause
}

/// CREATE TABLE with inline primary key and constraints; foreign keys are
/// included only when `include_fks` is set (cycle members defer theirs).
pub fn create_table_sql(table: &Table, include_fks: bool) -> String {
    let mut parts: Vec<String> = table.columns.iter().map(column_def).collect();

    if let Some(pk) = &table.primary_key {
        let columns: Vec<String> = pk.columns.iter().map(|c| quote_ident(c)).collect();
        parts.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            quote_ident(&pk.name),
            columns.join(", ")
        ));
    }

    for constraint in &table.constraints {
        match constraint {
            Constraint::Unique { name, columns } => {
                let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
                parts.push(format!(
                    "CONSTRAINT {} UNIQUE ({})",
                    quote_ident(name),
                    columns.join(", ")
                ));
            }
            Constraint::Check { name, expression } => {
                parts.push(format!(
                    "CONSTRAINT {} CHECK ({expression})",
                    quote_ident(name)
                ));
            }
        }
    }

    if include_fks {
        for fk in &table.foreign_keys {
            parts.push(foreign_key_clause(fk));
        }
    }

    format!(
        "CREATE TABLE {} (\n    {}\n)",
        quote_ident(&table.name),
        parts.join(",\n    ")
    )
}

pub fn create_index_sql(table: &str, index: &Index) -> String {
    let columns: Vec<String> = index
        .columns
        .iter()
        .map(|c| {
            let quoted = quote_ident(&c.name);
            match c.descending {
                true => format!("{quoted} DESC"),
                false => quoted,
            }
        })
        .collect();

    let mut sql = format!(
        "CREATE {}INDEX {} ON {}",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&index.name),
        quote_ident(table)
    );
    if let Some(using) = &index.using {
        sql.push_str(&format!(" USING {using}"));
    }
    sql.push_str(&format!(" ({})", columns.join(", ")));
    if let Some(where_clause) = &index.where_clause {
        sql.push_str(&format!(" WHERE {where_clause}"));
    }
    sql
}

fn add_foreign_key_sql(table: &str, fk: &ForeignKey) -> String {
    format!(
        "ALTER TABLE {} ADD {}",
        quote_ident(table),
        foreign_key_clause(fk)
    )
}

fn modify_column_sql(table: &str, from: &Column, to: &Column) -> Vec<String> {
    let table = quote_ident(table);
    let column = quote_ident(&to.name);
    let mut statements = Vec::new();

    if from.type_sql() != to.type_sql() {
        statements.push(format!(
            "ALTER TABLE {table} ALTER COLUMN {column} SET DATA TYPE {}",
            to.type_sql()
        ));
    }
    if from.nullable != to.nullable {
        let verb = if to.nullable { "DROP" } else { "SET" };
        statements.push(format!(
            "ALTER TABLE {table} ALTER COLUMN {column} {verb} NOT NULL"
        ));
    }
    if from.default != to.default {
        match &to.default {
            Some(default) => statements.push(format!(
                "ALTER TABLE {table} ALTER COLUMN {column} SET DEFAULT {default}"
            )),
            None => statements.push(format!(
                "ALTER TABLE {table} ALTER COLUMN {column} DROP DEFAULT"
            )),
        }
    }

    statements
}

fn table_change_sql(table: &str, change: &TableChange) -> Vec<String> {
    match change {
        TableChange::AddColumn(column) => vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(table),
            column_def(column)
        )],
        TableChange::DropColumn(column) => vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_ident(table),
            quote_ident(column)
        )],
        TableChange::ModifyColumn { from, to } => modify_column_sql(table, from, to),
        TableChange::AddIndex(index) => vec![create_index_sql(table, index)],
        TableChange::DropIndex(index) => vec![format!("DROP INDEX {}", quote_ident(index))],
        TableChange::RebuildIndex { from, to } => vec![
            format!("DROP INDEX {}", quote_ident(&from.name)),
            create_index_sql(table, to),
        ],
        TableChange::AddForeignKey(fk) => vec![add_foreign_key_sql(table, fk)],
        TableChange::DropForeignKey(name) => vec![format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            quote_ident(table),
            quote_ident(name)
        )],
    }
}

/// Statements for a single change.
pub fn change_sql(change: &Change) -> Vec<String> {
    match change {
        Change::AddTable(table) => {
            let mut statements = vec![create_table_sql(table, true)];
            for index in &table.indexes {
                statements.push(create_index_sql(&table.name, index));
            }
            statements
        }
        Change::DropTable(name) => vec![format!("DROP TABLE {}", quote_ident(name))],
        Change::ModifyTable { table, changes } => changes
            .iter()
            .flat_map(|c| table_change_sql(table, c))
            .collect(),
        Change::AddColumn { table, column } => {
            table_change_sql(table, &TableChange::AddColumn(column.clone()))
        }
        Change::DropColumn { table, column } => {
            table_change_sql(table, &TableChange::DropColumn(column.clone()))
        }
        Change::ModifyColumn { table, from, to } => modify_column_sql(table, from, to),
        Change::AddIndex { table, index } => vec![create_index_sql(table, index)],
        Change::DropIndex { index, .. } => vec![format!("DROP INDEX {}", quote_ident(index))],
        Change::AddForeignKey {
            table,
            foreign_key,
        } => vec![add_foreign_key_sql(table, foreign_key)],
        Change::DropForeignKey {
            table,
            foreign_key,
        } => vec![format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            quote_ident(table),
            quote_ident(foreign_key)
        )],
    }
}

/// Statements for a whole plan, with `CREATE TYPE` preambles for enum types
/// the desired realm introduces.
pub fn plan_sql(plan: &MigrationPlan, current: &Realm, desired: &Realm) -> Vec<String> {
    let mut statements = Vec::new();

    for (name, enum_type) in &desired.enums {
        if !current.enums.contains_key(name) {
            let values: Vec<String> = enum_type
                .values
                .iter()
                .map(|v| format!("'{}'", v.replace('\'', "''")))
                .collect();
            statements.push(format!(
                "CREATE TYPE {} AS ENUM ({})",
                quote_ident(name),
                values.join(", ")
            ));
        }
    }

    for change in &plan.changes {
        statements.extend(change_sql(change));
    }

    statements
}

/// The complete DDL of a desired realm, used to seed the dry-run scratch
/// database. Tables come out in dependency order with cycle members' foreign
/// keys appended at the end.
pub fn realm_sql(realm: &Realm) -> Vec<String> {
    let mut statements = Vec::new();

    for enum_type in realm.enums.values() {
        let values: Vec<String> = enum_type
            .values
            .iter()
            .map(|v| format!("'{}'", v.replace('\'', "''")))
            .collect();
        statements.push(format!(
            "CREATE TYPE {} AS ENUM ({})",
            quote_ident(&enum_type.name),
            values.join(", ")
        ));
    }

    let tables: Vec<&Table> = realm.tables.values().collect();
    let (ordered, cyclic) = order_by_dependencies(&tables);
    let mut deferred: Vec<(&str, &ForeignKey)> = Vec::new();

    for name in &ordered {
        let table = &realm.tables[name];
        if cyclic.contains(name) {
            statements.push(create_table_sql(table, false));
            deferred.extend(table.foreign_keys.iter().map(|fk| (name.as_str(), fk)));
        } else {
            statements.push(create_table_sql(table, true));
        }
        for index in &table.indexes {
            statements.push(create_index_sql(name, index));
        }
    }

    for (table, fk) in deferred {
        statements.push(add_foreign_key_sql(table, fk));
    }

    statements
}
