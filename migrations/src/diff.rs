//! Schema diffing and change planning.
//!
//! `diff_realms` computes the ordered change list that turns the current
//! realm into the desired one. Ordering guarantees:
//!
//! - Table creates come first, in dependency order (topological over foreign
//!   keys). A reference cycle falls back to lexicographic order with a
//!   warning, and the cycle members' foreign keys are deferred to a later
//!   pass.
//! - Drops come last, in reverse dependency order.
//! - Within a table modification: adds, then drops, then modifies, with
//!   foreign-key changes always last.
//!
//! A change is destructive iff it drops structure (table, column, index,
//! foreign key) or transitively contains such a drop.

use std::collections::{BTreeMap, BTreeSet};

use crate::schema::{Column, ForeignKey, Index, Realm, Table};

#[derive(Debug, Clone, PartialEq)]
pub enum TableChange {
    AddColumn(Column),
    DropColumn(String),
    ModifyColumn { from: Column, to: Column },
    AddIndex(Index),
    DropIndex(String),
    /// Same-name index whose definition changed; drops then recreates.
    RebuildIndex { from: Index, to: Index },
    AddForeignKey(ForeignKey),
    DropForeignKey(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    AddTable(Table),
    DropTable(String),
    ModifyTable {
        table: String,
        changes: Vec<TableChange>,
    },
    AddColumn {
        table: String,
        column: Column,
    },
    DropColumn {
        table: String,
        column: String,
    },
    ModifyColumn {
        table: String,
        from: Column,
        to: Column,
    },
    AddIndex {
        table: String,
        index: Index,
    },
    DropIndex {
        table: String,
        index: String,
    },
    AddForeignKey {
        table: String,
        foreign_key: ForeignKey,
    },
    DropForeignKey {
        table: String,
        foreign_key: String,
    },
}

impl Change {
    pub fn is_destructive(&self) -> bool {
        match self {
            Change::DropTable(_)
            | Change::DropColumn { .. }
            | Change::DropIndex { .. }
            | Change::DropForeignKey { .. } => true,
            Change::ModifyTable { changes, .. } => changes.iter().any(|c| {
                matches!(
                    c,
                    TableChange::DropColumn(_)
                        | TableChange::DropIndex(_)
                        | TableChange::DropForeignKey(_)
                )
            }),
            _ => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Change::AddTable(table) => format!("create table {}", table.name),
            Change::DropTable(name) => format!("drop table {name}"),
            Change::ModifyTable { table, changes } => {
                format!("modify table {table} ({} changes)", changes.len())
            }
            Change::AddColumn { table, column } => {
                format!("add column {table}.{}", column.name)
            }
            Change::DropColumn { table, column } => format!("drop column {table}.{column}"),
            Change::ModifyColumn { table, to, .. } => {
                format!("modify column {table}.{}", to.name)
            }
            Change::AddIndex { table, index } => format!("add index {} on {table}", index.name),
            Change::DropIndex { table, index } => format!("drop index {index} on {table}"),
            Change::AddForeignKey {
                table,
                foreign_key,
            } => format!("add foreign key {} on {table}", foreign_key.name),
            Change::DropForeignKey {
                table,
                foreign_key,
            } => format!("drop foreign key {foreign_key} on {table}"),
        }
    }
}

/// The ordered output of a diff.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationPlan {
    pub changes: Vec<Change>,
    pub warnings: Vec<String>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Count destructive changes with one human-readable description each.
    pub fn count_destructive(&self) -> (usize, Vec<String>) {
        let mut descriptions = Vec::new();
        for change in &self.changes {
            if !change.is_destructive() {
                continue;
            }
            match change {
                Change::ModifyTable { table, changes } => {
                    for inner in changes {
                        match inner {
                            TableChange::DropColumn(column) => {
                                descriptions.push(format!("drop column {table}.{column}"))
                            }
                            TableChange::DropIndex(index) => {
                                descriptions.push(format!("drop index {index} on {table}"))
                            }
                            TableChange::DropForeignKey(fk) => {
                                descriptions.push(format!("drop foreign key {fk} on {table}"))
                            }
                            _ => {}
                        }
                    }
                }
                other => descriptions.push(other.describe()),
            }
        }
        (
            self.changes.iter().filter(|c| c.is_destructive()).count(),
            descriptions,
        )
    }
}

/// Compute the ordered changes turning `current` into `desired`.
pub fn diff_realms(current: &Realm, desired: &Realm) -> MigrationPlan {
    let mut plan = MigrationPlan::default();

    // ---- creates, dependency ordered ----
    let new_tables: Vec<&Table> = desired
        .tables
        .values()
        .filter(|t| !current.tables.contains_key(&t.name))
        .collect();

    let (ordered, cyclic) = order_by_dependencies(&new_tables);
    if !cyclic.is_empty() {
        plan.warnings.push(format!(
            "foreign-key cycle among {}; creating in name order with deferred foreign keys",
            cyclic.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
        tracing::warn!(tables = ?cyclic, "foreign-key cycle; deferring foreign keys");
    }

    let mut deferred_fks: Vec<(String, ForeignKey)> = Vec::new();
    for name in &ordered {
        let Some(table) = desired.tables.get(name) else {
            continue;
        };
        if cyclic.contains(name) {
            let mut stripped = table.clone();
            for fk in stripped.foreign_keys.drain(..) {
                deferred_fks.push((name.clone(), fk));
            }
            plan.changes.push(Change::AddTable(stripped));
        } else {
            plan.changes.push(Change::AddTable(table.clone()));
        }
    }

    // ---- modifications ----
    for (name, desired_table) in &desired.tables {
        let Some(current_table) = current.tables.get(name) else {
            continue;
        };
        let mut changes = diff_table(current_table, desired_table);
        match changes.len() {
            0 => {}
            1 => plan.changes.push(flatten_single(name, changes.remove(0))),
            _ => plan.changes.push(Change::ModifyTable {
                table: name.clone(),
                changes,
            }),
        }
    }

    for (table, foreign_key) in deferred_fks {
        plan.changes.push(Change::AddForeignKey {
            table,
            foreign_key,
        });
    }

    // ---- drops, reverse dependency ordered ----
    let dropped: Vec<&Table> = current
        .tables
        .values()
        .filter(|t| !desired.tables.contains_key(&t.name))
        .collect();
    let (drop_order, _) = order_by_dependencies(&dropped);
    for name in drop_order.iter().rev() {
        plan.changes.push(Change::DropTable(name.clone()));
    }

    plan
}

/// A single-change table modification surfaces as its flat variant.
fn flatten_single(table: &str, change: TableChange) -> Change {
    let table = table.to_string();
    match change {
        TableChange::AddColumn(column) => Change::AddColumn { table, column },
        TableChange::DropColumn(column) => Change::DropColumn { table, column },
        TableChange::ModifyColumn { from, to } => Change::ModifyColumn { table, from, to },
        TableChange::AddIndex(index) => Change::AddIndex { table, index },
        TableChange::DropIndex(index) => Change::DropIndex { table, index },
        TableChange::RebuildIndex { from, to } => Change::ModifyTable {
            table,
            changes: vec![TableChange::RebuildIndex { from, to }],
        },
        TableChange::AddForeignKey(foreign_key) => Change::AddForeignKey {
            table,
            foreign_key,
        },
        TableChange::DropForeignKey(foreign_key) => Change::DropForeignKey {
            table,
            foreign_key,
        },
    }
}

fn diff_table(current: &Table, desired: &Table) -> Vec<TableChange> {
    let mut adds = Vec::new();
    let mut drops = Vec::new();
    let mut modifies = Vec::new();
    let mut fks = Vec::new();

    for column in &desired.columns {
        match current.column(&column.name) {
            None => adds.push(TableChange::AddColumn(column.clone())),
            Some(existing) if !columns_equal(existing, column) => {
                modifies.push(TableChange::ModifyColumn {
                    from: existing.clone(),
                    to: column.clone(),
                });
            }
            Some(_) => {}
        }
    }
    for column in &current.columns {
        if desired.column(&column.name).is_none() {
            drops.push(TableChange::DropColumn(column.name.clone()));
        }
    }

    for index in &desired.indexes {
        match current.index(&index.name) {
            None => adds.push(TableChange::AddIndex(index.clone())),
            Some(existing) if existing != index => modifies.push(TableChange::RebuildIndex {
                from: existing.clone(),
                to: index.clone(),
            }),
            Some(_) => {}
        }
    }
    for index in &current.indexes {
        if desired.index(&index.name).is_none() {
            drops.push(TableChange::DropIndex(index.name.clone()));
        }
    }

    for fk in &current.foreign_keys {
        match desired.foreign_key(&fk.name) {
            Some(wanted) if wanted == fk => {}
            // Changed definitions drop and re-add under the same name.
            _ => fks.push(TableChange::DropForeignKey(fk.name.clone())),
        }
    }
    for fk in &desired.foreign_keys {
        match current.foreign_key(&fk.name) {
            Some(existing) if existing == fk => {}
            _ => fks.push(TableChange::AddForeignKey(fk.clone())),
        }
    }

    let mut changes = adds;
    changes.extend(drops);
    changes.extend(modifies);
    changes.extend(fks);
    changes
}

fn columns_equal(a: &Column, b: &Column) -> bool {
    normalize_type(&a.db_type) == normalize_type(&b.db_type)
        && a.nullable == b.nullable
        && a.char_length == b.char_length
        && a.numeric_precision == b.numeric_precision
        && a.numeric_scale == b.numeric_scale
        && normalize_default(a.default.as_deref()) == normalize_default(b.default.as_deref())
}

/// Collapse the aliases postgres reports for the same type.
pub fn normalize_type(db_type: &str) -> String {
    match db_type.to_ascii_lowercase().as_str() {
        "int8" | "bigint" => "bigint".into(),
        "int4" | "int" | "integer" => "integer".into(),
        "int2" | "smallint" => "smallint".into(),
        "float8" | "double precision" => "double precision".into(),
        "float4" | "real" => "real".into(),
        "bool" | "boolean" => "boolean".into(),
        "character varying" | "varchar" => "varchar".into(),
        "character" | "bpchar" | "char" => "char".into(),
        "timestamptz" | "timestamp with time zone" => "timestamptz".into(),
        "timestamp" | "timestamp without time zone" => "timestamp".into(),
        other => other.to_string(),
    }
}

/// Strip cast suffixes and case noise from reported defaults.
fn normalize_default(default: Option<&str>) -> Option<String> {
    let default = default?;
    let trimmed = match default.find("::") {
        Some(pos) => &default[..pos],
        None => default,
    };
    Some(trimmed.trim().to_ascii_lowercase())
}

/// Topologically order tables by their foreign-key references (referenced
/// tables first). Returns the order plus the set of cycle members, which are
/// appended lexicographically.
pub(crate) fn order_by_dependencies(tables: &[&Table]) -> (Vec<String>, BTreeSet<String>) {
    let names: BTreeSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    let mut deps: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for table in tables {
        let entry = deps.entry(table.name.as_str()).or_default();
        for fk in &table.foreign_keys {
            if fk.ref_table != table.name && names.contains(fk.ref_table.as_str()) {
                entry.insert(fk.ref_table.as_str());
            }
        }
    }

    let mut ordered = Vec::new();
    let mut remaining = deps.clone();
    loop {
        let ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, d)| d.iter().all(|dep| !remaining.contains_key(dep)))
            .map(|(name, _)| *name)
            .collect();
        if ready.is_empty() {
            break;
        }
        for name in ready {
            ordered.push(name.to_string());
            remaining.remove(name);
        }
    }

    // Whatever is left participates in a cycle.
    let cyclic: BTreeSet<String> = remaining.keys().map(|n| n.to_string()).collect();
    ordered.extend(cyclic.iter().cloned());
    (ordered, cyclic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ForeignKey, PrimaryKey};

    fn users_table() -> Table {
        let mut table = Table::new("users");
        table.columns.push(with_ordinal(Column::new("id", "bigint"), 1));
        table
            .columns
            .push(with_ordinal(Column::new("email", "text"), 2));
        table.primary_key = Some(PrimaryKey {
            name: "users_pkey".into(),
            columns: vec!["id".into()],
        });
        table
    }

    fn with_ordinal(mut column: Column, ordinal: i32) -> Column {
        column.ordinal = ordinal;
        column
    }

    fn realm_with(tables: Vec<Table>) -> Realm {
        let mut realm = Realm::default();
        for table in tables {
            realm.add_table(table);
        }
        realm
    }

    #[test]
    fn identical_realms_diff_to_nothing() {
        let realm = realm_with(vec![users_table()]);
        assert!(diff_realms(&realm, &realm).is_empty());
    }

    #[test]
    fn single_added_column_flattens_to_add_column() {
        let current = realm_with(vec![users_table()]);
        let mut desired_table = users_table();
        let mut created_at = Column::new("created_at", "timestamptz");
        created_at.default = Some("now()".into());
        created_at.ordinal = 3;
        desired_table.columns.push(created_at);
        let desired = realm_with(vec![desired_table]);

        let plan = diff_realms(&current, &desired);
        assert_eq!(plan.changes.len(), 1);
        assert!(matches!(
            &plan.changes[0],
            Change::AddColumn { table, column } if table == "users" && column.name == "created_at"
        ));
        let (count, _) = plan.count_destructive();
        assert_eq!(count, 0);
    }

    #[test]
    fn dropped_column_is_destructive_with_qualified_description() {
        let current = realm_with(vec![users_table()]);
        let mut desired_table = users_table();
        desired_table.columns.retain(|c| c.name != "email");
        let desired = realm_with(vec![desired_table]);

        let plan = diff_realms(&current, &desired);
        let (count, descriptions) = plan.count_destructive();
        assert_eq!(count, 1);
        assert_eq!(descriptions, vec!["drop column users.email"]);
    }

    #[test]
    fn varchar_widening_is_a_plain_modify() {
        let mut current_table = users_table();
        current_table.columns[1].db_type = "varchar".into();
        current_table.columns[1].char_length = Some(100);
        let mut desired_table = users_table();
        desired_table.columns[1].db_type = "varchar".into();
        desired_table.columns[1].char_length = Some(255);

        let plan = diff_realms(
            &realm_with(vec![current_table]),
            &realm_with(vec![desired_table]),
        );
        assert_eq!(plan.changes.len(), 1);
        assert!(matches!(plan.changes[0], Change::ModifyColumn { .. }));
        assert_eq!(plan.count_destructive().0, 0);
    }

    #[test]
    fn creates_are_dependency_ordered() {
        let users = users_table();
        let mut posts = Table::new("posts");
        posts.columns.push(Column::new("id", "bigint"));
        posts.columns.push(Column::new("user_id", "bigint"));
        posts.foreign_keys.push(ForeignKey {
            name: "posts_user_id_fkey".into(),
            columns: vec!["user_id".into()],
            ref_table: "users".into(),
            ref_columns: vec!["id".into()],
            on_delete: None,
            on_update: None,
        });

        // BTreeMap iteration would visit posts before users; the planner must
        // not.
        let desired = realm_with(vec![posts, users]);
        let plan = diff_realms(&Realm::default(), &desired);

        let names: Vec<&str> = plan
            .changes
            .iter()
            .filter_map(|c| match c {
                Change::AddTable(t) => Some(t.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["users", "posts"]);
    }

    #[test]
    fn drops_are_reverse_dependency_ordered() {
        let users = users_table();
        let mut posts = Table::new("posts");
        posts.foreign_keys.push(ForeignKey {
            name: "posts_user_id_fkey".into(),
            columns: vec!["user_id".into()],
            ref_table: "users".into(),
            ref_columns: vec!["id".into()],
            on_delete: None,
            on_update: None,
        });

        let current = realm_with(vec![posts, users]);
        let plan = diff_realms(&current, &Realm::default());

        let names: Vec<&str> = plan
            .changes
            .iter()
            .filter_map(|c| match c {
                Change::DropTable(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["posts", "users"]);
    }

    #[test]
    fn cycles_fall_back_to_name_order_with_deferred_foreign_keys() {
        let mut a = Table::new("alpha");
        a.foreign_keys.push(ForeignKey {
            name: "alpha_beta_fkey".into(),
            columns: vec!["beta_id".into()],
            ref_table: "beta".into(),
            ref_columns: vec!["id".into()],
            on_delete: None,
            on_update: None,
        });
        let mut b = Table::new("beta");
        b.foreign_keys.push(ForeignKey {
            name: "beta_alpha_fkey".into(),
            columns: vec!["alpha_id".into()],
            ref_table: "alpha".into(),
            ref_columns: vec!["id".into()],
            on_delete: None,
            on_update: None,
        });

        let plan = diff_realms(&Realm::default(), &realm_with(vec![a, b]));
        assert!(!plan.warnings.is_empty());

        // Both tables are created stripped; their FKs arrive afterwards.
        let creates: Vec<&Table> = plan
            .changes
            .iter()
            .filter_map(|c| match c {
                Change::AddTable(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(creates.len(), 2);
        assert!(creates.iter().all(|t| t.foreign_keys.is_empty()));

        let fk_adds = plan
            .changes
            .iter()
            .filter(|c| matches!(c, Change::AddForeignKey { .. }))
            .count();
        assert_eq!(fk_adds, 2);
    }

    #[test]
    fn modify_table_orders_adds_drops_modifies_then_fks() {
        let mut current = users_table();
        current.columns.push(with_ordinal(Column::new("age", "integer"), 3));
        current.indexes.push(Index {
            name: "old_idx".into(),
            columns: vec![crate::schema::IndexColumn {
                name: "email".into(),
                descending: false,
            }],
            unique: false,
            where_clause: None,
            using: None,
        });

        let mut desired = users_table();
        desired.columns[1].nullable = true; // modify email
        desired
            .columns
            .push(with_ordinal(Column::new("bio", "text"), 3));
        desired.foreign_keys.push(ForeignKey {
            name: "users_org_fkey".into(),
            columns: vec!["org_id".into()],
            ref_table: "orgs".into(),
            ref_columns: vec!["id".into()],
            on_delete: None,
            on_update: None,
        });

        let plan = diff_realms(&realm_with(vec![current]), &realm_with(vec![desired]));
        let Change::ModifyTable { changes, .. } = &plan.changes[0] else {
            panic!("expected ModifyTable, got {:?}", plan.changes);
        };

        let kinds: Vec<&str> = changes
            .iter()
            .map(|c| match c {
                TableChange::AddColumn(_) => "add_col",
                TableChange::DropColumn(_) => "drop_col",
                TableChange::DropIndex(_) => "drop_idx",
                TableChange::ModifyColumn { .. } => "modify_col",
                TableChange::AddForeignKey(_) => "add_fk",
                other => panic!("unexpected change {other:?}"),
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["add_col", "drop_col", "drop_idx", "modify_col", "add_fk"]
        );
    }

    #[test]
    fn type_aliases_do_not_produce_modifications() {
        let mut current = users_table();
        current.columns[0].db_type = "int8".into();
        let mut desired = users_table();
        desired.columns[0].db_type = "bigint".into();

        let plan = diff_realms(&realm_with(vec![current]), &realm_with(vec![desired]));
        assert!(plan.is_empty(), "got {:?}", plan.changes);
    }
}
