//! The fluent query builder.
//!
//! One [`Query`] carries the state for a single terminal call: accumulated
//! WHERE conjuncts, ordering, pagination, joins, and include directives.
//! Chaining is lazy; the first builder-level error short-circuits every later
//! call and surfaces at the terminal operation. Every terminal runs through
//! the middleware pipeline before the driver sees it.

use std::sync::Arc;

use stratum_core::{quote_ident, Action, Condition, PgValue, Result, StratumError, TableMeta};

use crate::executor::{map_db_err, Executor};
use crate::middleware::{MiddlewareManager, OpContext, Terminal};
use crate::model::Model;
use crate::plan::{DeletePlan, Join, JoinKind, OpKind, Plan, SelectPlan, UpdatePlan};
use crate::relation;

/// One include directive: a relationship name plus extra child conditions.
#[derive(Debug, Clone)]
pub struct Include {
    pub name: String,
    pub conditions: Vec<Condition>,
}

pub struct Query<T: Model> {
    pub(crate) executor: Executor,
    pub(crate) meta: &'static TableMeta<T>,
    pub(crate) middleware: Arc<MiddlewareManager>,
    pub(crate) conjuncts: Vec<Condition>,
    pub(crate) order_by: Vec<String>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) joins: Vec<Join>,
    pub(crate) includes: Vec<Include>,
    pub(crate) err: Option<StratumError>,
}

impl<T: Model> Query<T> {
    pub(crate) fn new(
        executor: Executor,
        meta: &'static TableMeta<T>,
        middleware: Arc<MiddlewareManager>,
    ) -> Self {
        Self {
            executor,
            meta,
            middleware,
            conjuncts: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            joins: Vec::new(),
            includes: Vec::new(),
            err: None,
        }
    }

    fn ok(&self) -> bool {
        self.err.is_none()
    }

    // ==================== chain methods ====================

    pub fn r#where(mut self, condition: Condition) -> Self {
        if self.ok() {
            self.conjuncts.push(condition);
        }
        self
    }

    pub fn order_by(mut self, expressions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        if self.ok() {
            self.order_by.extend(expressions.into_iter().map(Into::into));
        }
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        if self.ok() {
            self.limit = Some(limit);
        }
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        if self.ok() {
            self.offset = Some(offset);
        }
        self
    }

    pub fn join(
        mut self,
        kind: JoinKind,
        table: impl Into<String>,
        on: impl Into<String>,
    ) -> Self {
        if self.ok() {
            self.joins.push(Join {
                kind,
                table: table.into(),
                on: on.into(),
            });
        }
        self
    }

    pub fn inner_join(self, table: impl Into<String>, on: impl Into<String>) -> Self {
        self.join(JoinKind::Inner, table, on)
    }

    pub fn left_join(self, table: impl Into<String>, on: impl Into<String>) -> Self {
        self.join(JoinKind::Left, table, on)
    }

    pub fn right_join(self, table: impl Into<String>, on: impl Into<String>) -> Self {
        self.join(JoinKind::Right, table, on)
    }

    pub fn full_join(self, table: impl Into<String>, on: impl Into<String>) -> Self {
        self.join(JoinKind::Full, table, on)
    }

    /// Request post-fetch materialization of relationships by name.
    pub fn include(mut self, relationships: impl IntoIterator<Item = impl Into<String>>) -> Self {
        if self.ok() {
            for name in relationships {
                self.includes.push(Include {
                    name: name.into(),
                    conditions: Vec::new(),
                });
            }
        }
        self
    }

    /// Include one relationship with extra conditions AND-ed onto the child
    /// query.
    pub fn include_where(
        mut self,
        relationship: impl Into<String>,
        conditions: impl IntoIterator<Item = Condition>,
    ) -> Self {
        if self.ok() {
            self.includes.push(Include {
                name: relationship.into(),
                conditions: conditions.into_iter().collect(),
            });
        }
        self
    }

    /// Run this query's terminals on a transaction scope instead of the pool.
    pub fn with_tx(mut self, scope: &crate::db::Db) -> Self {
        if self.ok() {
            self.executor = scope.executor().clone();
        }
        self
    }

    // ==================== rendering ====================

    fn qualified_columns(&self) -> Vec<String> {
        self.meta
            .db_columns()
            .iter()
            .map(|c| format!("{}.{}", quote_ident(&self.meta.table_name), quote_ident(c)))
            .collect()
    }

    pub(crate) fn base_select(&self) -> SelectPlan {
        SelectPlan {
            columns: self.qualified_columns(),
            table: self.meta.table_name.clone(),
            alias: None,
            joins: self.joins.clone(),
            conjuncts: self.conjuncts.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
        }
    }

    fn take_err(&mut self) -> Result<()> {
        match self.err.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // ==================== terminal operations ====================

    /// Fetch all matching records, materializing includes afterwards.
    pub async fn find(mut self) -> Result<Vec<T>> {
        self.take_err()?;

        if !self.includes.is_empty() {
            return Box::pin(self.find_with_relationships()).await;
        }

        let cx = OpContext::new(OpKind::Query, Plan::Select(self.base_select()));
        let mut records: Vec<T> = Vec::new();
        {
            let executor = &self.executor;
            let records_ref = &mut records;
            let terminal: Terminal<'_> = Box::new(move |cx: OpContext| {
                Box::pin(async move {
                    let (sql, args) = cx.rendered()?;
                    let rows = executor.fetch_all(&sql, &args).await?;
                    for row in &rows {
                        records_ref.push(T::from_row(row).map_err(map_db_err)?);
                    }
                    Ok(cx)
                })
            });

            self.middleware
                .run(cx, terminal)
                .await
                .map_err(|e| e.op("find", &self.meta.table_name))?;
        }

        Ok(records)
    }

    async fn find_with_relationships(mut self) -> Result<Vec<T>> {
        let includes = std::mem::take(&mut self.includes);

        let executor = self.executor.clone();
        let middleware = self.middleware.clone();
        let meta = self.meta;

        let mut records = self.find().await?;
        if records.is_empty() {
            return Ok(records);
        }

        for include in &includes {
            relation::load_relationship(&executor, &middleware, meta, &mut records, include)
                .await
                .map_err(|e| e.op("include", &meta.table_name))?;
        }

        Ok(records)
    }

    /// Fetch the first matching record; absence is the not-found sentinel.
    pub async fn first(mut self) -> Result<T> {
        self.take_err()?;
        let table = self.meta.table_name.clone();
        let mut records = self.limit(1).find().await?;
        match records.is_empty() {
            true => Err(StratumError::NotFound.op("first", table)),
            false => Ok(records.remove(0)),
        }
    }

    /// Count matching rows. Ordering and pagination do not apply.
    pub async fn count(mut self) -> Result<i64> {
        self.take_err()?;

        let cx = OpContext::new(
            OpKind::Query,
            Plan::Select(SelectPlan {
                columns: vec!["COUNT(*)".to_string()],
                table: self.meta.table_name.clone(),
                alias: None,
                joins: self.joins.clone(),
                conjuncts: self.conjuncts.clone(),
                order_by: Vec::new(),
                limit: None,
                offset: None,
            }),
        );

        let mut count: i64 = 0;
        {
            let executor = &self.executor;
            let count_ref = &mut count;
            let terminal: Terminal<'_> = Box::new(move |cx: OpContext| {
                Box::pin(async move {
                    let (sql, args) = cx.rendered()?;
                    let row = executor.fetch_one(&sql, &args).await?;
                    *count_ref = sqlx::Row::try_get::<i64, _>(&row, 0).map_err(map_db_err)?;
                    Ok(cx)
                })
            });

            self.middleware
                .run(cx, terminal)
                .await
                .map_err(|e| e.op("count", &self.meta.table_name))?;
        }

        Ok(count)
    }

    pub async fn exists(self) -> Result<bool> {
        Ok(self.count().await? > 0)
    }

    /// Delete matching rows, returning the affected count.
    ///
    /// With no WHERE conditions this deletes every row in the table.
    pub async fn delete(mut self) -> Result<u64> {
        self.take_err()?;

        let plan = Plan::Delete(DeletePlan {
            table: self.meta.table_name.clone(),
            conjuncts: self.conjuncts.clone(),
        });

        run_statement(
            &self.executor,
            &self.middleware,
            OpKind::Delete,
            plan,
            "delete",
            &self.meta.table_name,
        )
        .await
    }

    /// Apply the supplied actions to matching rows.
    pub async fn update(mut self, actions: impl IntoIterator<Item = Action>) -> Result<u64> {
        self.take_err()?;

        let actions: Vec<Action> = actions.into_iter().collect();
        if actions.is_empty() {
            return Err(StratumError::InvalidArgument("no actions provided".into())
                .op("update", &self.meta.table_name));
        }

        let plan = Plan::Update(UpdatePlan {
            table: self.meta.table_name.clone(),
            actions,
            conjuncts: self.conjuncts.clone(),
        });

        run_statement(
            &self.executor,
            &self.middleware,
            OpKind::UpdateMany,
            plan,
            "update",
            &self.meta.table_name,
        )
        .await
    }

    /// Run a caller-supplied statement, decoding rows as this record type.
    /// Bypasses the pipeline by design.
    pub async fn execute_raw(mut self, sql: &str, args: Vec<PgValue>) -> Result<Vec<T>> {
        self.take_err()?;

        let rows = self
            .executor
            .fetch_all(sql, &args)
            .await
            .map_err(|e| e.op("execute_raw", &self.meta.table_name))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(
                T::from_row(row)
                    .map_err(map_db_err)
                    .map_err(|e| e.op("execute_raw", &self.meta.table_name))?,
            );
        }
        Ok(records)
    }
}

/// Run a mutation plan through the pipeline, returning rows affected.
pub(crate) async fn run_statement(
    executor: &Executor,
    middleware: &MiddlewareManager,
    op: OpKind,
    plan: Plan,
    op_name: &'static str,
    table: &str,
) -> Result<u64> {
    let cx = OpContext::new(op, plan);
    let mut affected: u64 = 0;
    {
        let affected_ref = &mut affected;
        let terminal: Terminal<'_> = Box::new(move |cx: OpContext| {
            Box::pin(async move {
                let (sql, args) = cx.rendered()?;
                *affected_ref = executor.execute(&sql, &args).await?;
                Ok(cx)
            })
        });

        middleware
            .run(cx, terminal)
            .await
            .map_err(|e| e.op(op_name, table))?;
    }

    Ok(affected)
}
