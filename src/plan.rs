//! Renderable statement plans.
//!
//! A [`Plan`] is the builder value the middleware pipeline sees: a sum over
//! the four statement shapes with typed accessors. Middleware may replace the
//! plan with a new one of a different case (a soft-delete middleware swaps
//! `Delete` for `Update`) as long as it updates the operation kind to match.
//! Rendering assigns placeholder indices with one running counter per
//! statement: SET expressions first, then WHERE parameters.

use stratum_core::{quote_ident, Action, Condition, ParamBinder, PgValue, Result, StratumError};

/// Operation kinds carried through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Query,
    Create,
    Update,
    UpdateMany,
    Delete,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OpKind::Query => "query",
            OpKind::Create => "create",
            OpKind::Update => "update",
            OpKind::UpdateMany => "update_many",
            OpKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL OUTER JOIN",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub on: String,
}

#[derive(Debug, Clone, Default)]
pub struct SelectPlan {
    /// Rendered select list entries (`"users"."id"`, `COUNT(*)`, …).
    pub columns: Vec<String>,
    pub table: String,
    /// Optional bare alias after the FROM table (`FROM "posts" t`).
    pub alias: Option<String>,
    pub joins: Vec<Join>,
    pub conjuncts: Vec<Condition>,
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectPlan {
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            columns,
            table: table.into(),
            ..Default::default()
        }
    }

    /// Append another WHERE conjunct.
    pub fn and_where(&mut self, condition: Condition) {
        self.conjuncts.push(condition);
    }

    pub fn render(&self) -> Result<(String, Vec<PgValue>)> {
        let mut binder = ParamBinder::new();
        let mut sql = format!(
            "SELECT {} FROM {}",
            self.columns.join(", "),
            quote_ident(&self.table)
        );
        if let Some(alias) = &self.alias {
            sql.push(' ');
            sql.push_str(alias);
        }

        for join in &self.joins {
            sql.push_str(&format!(
                " {} {} ON {}",
                join.kind.keyword(),
                join.table,
                join.on
            ));
        }

        render_where(&mut sql, &self.conjuncts, &mut binder);

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        Ok((sql, binder.finish()))
    }
}

/// Conflict handling for inserts.
#[derive(Debug, Clone)]
pub struct OnConflict {
    pub columns: Vec<String>,
    /// Columns updated from `EXCLUDED`; `None` means `DO NOTHING`.
    pub update_columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct InsertPlan {
    pub table: String,
    pub columns: Vec<String>,
    /// One inner vector per row, arity matching `columns`.
    pub rows: Vec<Vec<PgValue>>,
    pub on_conflict: Option<OnConflict>,
    pub returning: Option<String>,
}

impl InsertPlan {
    pub fn render(&self) -> Result<(String, Vec<PgValue>)> {
        if self.columns.is_empty() || self.rows.is_empty() {
            return Err(StratumError::InvalidArgument(
                "insert has no columns or rows".into(),
            ));
        }

        let mut binder = ParamBinder::new();
        let quoted: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ",
            quote_ident(&self.table),
            quoted.join(", ")
        );

        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(StratumError::InvalidArgument(format!(
                    "insert row {i} has {} values for {} columns",
                    row.len(),
                    self.columns.len()
                )));
            }
            if i > 0 {
                sql.push_str(", ");
            }
            let list = binder.push_list(row.iter().cloned());
            sql.push_str(&format!("({list})"));
        }

        if let Some(conflict) = &self.on_conflict {
            let targets: Vec<String> = conflict.columns.iter().map(|c| quote_ident(c)).collect();
            sql.push_str(&format!(" ON CONFLICT ({})", targets.join(", ")));
            match &conflict.update_columns {
                None => sql.push_str(" DO NOTHING"),
                Some(columns) => {
                    let sets: Vec<String> = columns
                        .iter()
                        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
                        .collect();
                    sql.push_str(&format!(" DO UPDATE SET {}", sets.join(", ")));
                }
            }
        }

        if let Some(returning) = &self.returning {
            sql.push_str(&format!(" RETURNING {returning}"));
        }

        Ok((sql, binder.finish()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdatePlan {
    pub table: String,
    pub actions: Vec<Action>,
    pub conjuncts: Vec<Condition>,
}

impl UpdatePlan {
    pub fn render(&self) -> Result<(String, Vec<PgValue>)> {
        if self.actions.is_empty() {
            return Err(StratumError::InvalidArgument("no actions provided".into()));
        }

        let mut binder = ParamBinder::new();
        let sets: Vec<String> = self
            .actions
            .iter()
            .map(|action| binder.rewrite_action(action.expression(), action.value()))
            .collect();

        let mut sql = format!("UPDATE {} SET {}", quote_ident(&self.table), sets.join(", "));
        render_where(&mut sql, &self.conjuncts, &mut binder);

        Ok((sql, binder.finish()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeletePlan {
    pub table: String,
    pub conjuncts: Vec<Condition>,
}

impl DeletePlan {
    pub fn render(&self) -> Result<(String, Vec<PgValue>)> {
        let mut binder = ParamBinder::new();
        let mut sql = format!("DELETE FROM {}", quote_ident(&self.table));
        render_where(&mut sql, &self.conjuncts, &mut binder);
        Ok((sql, binder.finish()))
    }
}

fn render_where(sql: &mut String, conjuncts: &[Condition], binder: &mut ParamBinder) {
    match conjuncts.len() {
        0 => {}
        1 => {
            sql.push_str(" WHERE ");
            sql.push_str(&conjuncts[0].render(binder));
        }
        _ => {
            sql.push_str(" WHERE ");
            let parts: Vec<String> = conjuncts
                .iter()
                .map(|c| format!("({})", c.render(binder)))
                .collect();
            sql.push_str(&parts.join(" AND "));
        }
    }
}

/// The builder sum the pipeline carries.
#[derive(Debug, Clone)]
pub enum Plan {
    Select(SelectPlan),
    Insert(InsertPlan),
    Update(UpdatePlan),
    Delete(DeletePlan),
}

impl Plan {
    pub fn render(&self) -> Result<(String, Vec<PgValue>)> {
        match self {
            Plan::Select(p) => p.render(),
            Plan::Insert(p) => p.render(),
            Plan::Update(p) => p.render(),
            Plan::Delete(p) => p.render(),
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Plan::Select(p) => &p.table,
            Plan::Insert(p) => &p.table,
            Plan::Update(p) => &p.table,
            Plan::Delete(p) => &p.table,
        }
    }

    pub fn as_select(&self) -> Option<&SelectPlan> {
        match self {
            Plan::Select(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_select_mut(&mut self) -> Option<&mut SelectPlan> {
        match self {
            Plan::Select(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_update_mut(&mut self) -> Option<&mut UpdatePlan> {
        match self {
            Plan::Update(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_delete_mut(&mut self) -> Option<&mut DeletePlan> {
        match self {
            Plan::Delete(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_insert_mut(&mut self) -> Option<&mut InsertPlan> {
        match self {
            Plan::Insert(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{BoolColumn, NumericColumn, TextColumn};

    #[test]
    fn select_renders_joins_order_and_pagination() {
        let mut plan = SelectPlan::new("users", vec!["\"users\".\"id\"".into()]);
        plan.joins.push(Join {
            kind: JoinKind::Left,
            table: "posts".into(),
            on: "posts.user_id = users.id".into(),
        });
        let age = NumericColumn::<i32>::new("users", "age");
        plan.and_where(age.ge(21));
        plan.order_by.push("id DESC".into());
        plan.limit = Some(10);
        plan.offset = Some(5);

        let (sql, args) = plan.render().unwrap();
        assert_eq!(
            sql,
            "SELECT \"users\".\"id\" FROM \"users\" LEFT JOIN posts ON posts.user_id = users.id \
             WHERE age >= $1 ORDER BY id DESC LIMIT 10 OFFSET 5"
        );
        assert_eq!(args, vec![PgValue::Int4(21)]);
    }

    #[test]
    fn update_binds_actions_before_where() {
        let name = TextColumn::new("users", "name");
        let login_count = NumericColumn::<i64>::new("users", "login_count");
        let is_active = BoolColumn::new("users", "is_active");

        let plan = UpdatePlan {
            table: "users".into(),
            actions: vec![name.set("X"), login_count.increment(1)],
            conjuncts: vec![is_active.eq(true)],
        };

        let (sql, args) = plan.render().unwrap();
        assert_eq!(
            sql,
            "UPDATE \"users\" SET name = $1, login_count = login_count + $2 WHERE is_active = $3"
        );
        assert_eq!(
            args,
            vec![
                PgValue::Text("X".into()),
                PgValue::Int8(1),
                PgValue::Bool(true)
            ]
        );
    }

    #[test]
    fn update_without_actions_is_invalid() {
        let plan = UpdatePlan {
            table: "users".into(),
            ..Default::default()
        };
        assert!(matches!(
            plan.render(),
            Err(StratumError::InvalidArgument(_))
        ));
    }

    #[test]
    fn delete_without_where_hits_whole_table() {
        let plan = DeletePlan {
            table: "users".into(),
            ..Default::default()
        };
        let (sql, args) = plan.render().unwrap();
        assert_eq!(sql, "DELETE FROM \"users\"");
        assert!(args.is_empty());
    }

    #[test]
    fn insert_renders_multi_row_values_and_conflict_clause() {
        let plan = InsertPlan {
            table: "users".into(),
            columns: vec!["email".into(), "name".into()],
            rows: vec![
                vec![PgValue::Text("a@x".into()), PgValue::Text("A".into())],
                vec![PgValue::Text("b@x".into()), PgValue::Text("B".into())],
            ],
            on_conflict: Some(OnConflict {
                columns: vec!["email".into()],
                update_columns: Some(vec!["name".into()]),
            }),
            returning: Some("*".into()),
        };

        let (sql, args) = plan.render().unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"email\", \"name\") VALUES ($1, $2), ($3, $4) \
             ON CONFLICT (\"email\") DO UPDATE SET \"name\" = EXCLUDED.\"name\" RETURNING *"
        );
        assert_eq!(args.len(), 4);
    }

    #[test]
    fn insert_do_nothing_when_no_update_columns() {
        let plan = InsertPlan {
            table: "users".into(),
            columns: vec!["email".into()],
            rows: vec![vec![PgValue::Text("a@x".into())]],
            on_conflict: Some(OnConflict {
                columns: vec!["email".into()],
                update_columns: None,
            }),
            returning: None,
        };
        let (sql, _) = plan.render().unwrap();
        assert!(sql.ends_with("ON CONFLICT (\"email\") DO NOTHING"));
    }

    #[test]
    fn multiple_conjuncts_are_parenthesized() {
        let age = NumericColumn::<i32>::new("users", "age");
        let name = TextColumn::new("users", "name");
        let mut plan = SelectPlan::new("users", vec!["*".into()]);
        plan.and_where(age.ge(21));
        plan.and_where(name.like("J%"));

        let (sql, _) = plan.render().unwrap();
        assert!(sql.ends_with("WHERE (age >= $1) AND (name LIKE $2)"));
    }
}
