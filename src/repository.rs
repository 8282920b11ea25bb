//! Typed repositories.
//!
//! A [`Repository`] pairs one record type's metadata with an executor and the
//! middleware pipeline, and exposes the convenience operations on top of the
//! query builder. Authorization stacking is immutable: `authorize` returns a
//! new repository whose list is the old one with the callback appended, and
//! the callbacks run in insertion order when a query is constructed, before
//! any middleware.

use std::sync::Arc;

use stratum_core::{Action, PgValue, Result, StratumError, TableMeta};

use crate::executor::{map_db_err, Executor};
use crate::middleware::{Middleware, MiddlewareManager, OpContext, Terminal};
use crate::model::Model;
use crate::plan::{DeletePlan, InsertPlan, OnConflict, OpKind, Plan, UpdatePlan};
use crate::query::{run_statement, Query};
use crate::transaction::{self, TxOptions};

/// Query rewriter invoked at query construction.
pub type AuthorizeFn<T> = Arc<dyn Fn(Query<T>) -> Query<T> + Send + Sync>;

/// Conflict handling for [`Repository::upsert`].
#[derive(Debug, Clone)]
pub struct UpsertOptions {
    pub conflict_columns: Vec<String>,
    /// Columns updated from the excluded row; `None` means `DO NOTHING`.
    pub update_columns: Option<Vec<String>>,
}

pub struct Repository<T: Model> {
    executor: Executor,
    meta: &'static TableMeta<T>,
    middleware: Arc<MiddlewareManager>,
    authorize: Vec<AuthorizeFn<T>>,
}

impl<T: Model> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            meta: self.meta,
            middleware: self.middleware.clone(),
            authorize: self.authorize.clone(),
        }
    }
}

impl<T: Model> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("table", &self.meta.table_name)
            .field("authorize_len", &self.authorize.len())
            .finish()
    }
}

impl<T: Model> Repository<T> {
    pub fn new(executor: Executor) -> Self {
        Self {
            executor,
            meta: T::metadata(),
            middleware: Arc::new(MiddlewareManager::new()),
            authorize: Vec::new(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.meta.table_name
    }

    pub fn primary_keys(&self) -> Vec<&str> {
        self.meta.primary_keys.iter().map(String::as_str).collect()
    }

    pub fn columns(&self) -> Vec<&str> {
        self.meta.db_columns()
    }

    pub fn metadata(&self) -> &'static TableMeta<T> {
        self.meta
    }

    /// Append a middleware to this record type's pipeline.
    pub fn add_middleware(&self, middleware: impl Middleware) {
        self.middleware.add(middleware);
    }

    pub(crate) fn middleware(&self) -> &Arc<MiddlewareManager> {
        &self.middleware
    }

    /// Return a new repository with `f` appended to the authorization list.
    /// The receiver is unchanged; distinct chains are fully independent.
    pub fn authorize(&self, f: impl Fn(Query<T>) -> Query<T> + Send + Sync + 'static) -> Self {
        let mut authorize = Vec::with_capacity(self.authorize.len() + 1);
        authorize.extend(self.authorize.iter().cloned());
        authorize.push(Arc::new(f) as AuthorizeFn<T>);
        Self {
            executor: self.executor.clone(),
            meta: self.meta,
            middleware: self.middleware.clone(),
            authorize,
        }
    }

    pub(crate) fn authorize_len(&self) -> usize {
        self.authorize.len()
    }

    /// Start a query. Authorization callbacks run here, in insertion order,
    /// before any middleware sees the operation.
    pub fn query(&self) -> Query<T> {
        let mut query = Query::new(self.executor.clone(), self.meta, self.middleware.clone());
        for f in &self.authorize {
            query = f(query);
        }
        query
    }

    // ==================== convenience operations ====================

    /// Fetch one record by its single-column primary key.
    pub async fn find_by_id(&self, id: impl Into<PgValue>) -> Result<T> {
        self.find_by_pk(vec![id.into()]).await
    }

    /// Fetch one record by its (possibly composite) primary key.
    pub async fn find_by_pk(&self, ids: Vec<PgValue>) -> Result<T> {
        if ids.len() != self.meta.primary_keys.len() {
            return Err(StratumError::InvalidArgument(format!(
                "expected {} primary key values, got {}",
                self.meta.primary_keys.len(),
                ids.len()
            ))
            .op("find_by_id", &self.meta.table_name));
        }

        let mut query = self.query();
        for (pk, id) in self.meta.primary_keys.iter().zip(ids) {
            query = query.r#where(stratum_core::raw(format!("{pk} = ?"), [id]));
        }

        let mut records = query.limit(1).find().await?;
        match records.is_empty() {
            true => Err(StratumError::NotFound.op("find_by_id", &self.meta.table_name)),
            false => Ok(records.remove(0)),
        }
    }

    /// Insert a record. Auto-generated columns come back populated.
    pub async fn create(&self, record: T) -> Result<T> {
        self.create_with(&self.executor, record).await
    }

    async fn create_with(&self, executor: &Executor, record: T) -> Result<T> {
        let (columns, values) = self.insert_fields(&record);
        let has_generated = !self.meta.auto_generated_columns().is_empty();

        let plan = Plan::Insert(InsertPlan {
            table: self.meta.table_name.clone(),
            columns,
            rows: vec![values],
            on_conflict: None,
            returning: has_generated.then(|| "*".to_string()),
        });

        let cx = OpContext::new(OpKind::Create, plan);
        let mut created: Option<T> = None;
        {
            let created_ref = &mut created;
            let terminal: Terminal<'_> = Box::new(move |cx: OpContext| {
                Box::pin(async move {
                    let (sql, args) = cx.rendered()?;
                    if sql.contains("RETURNING") {
                        let row = executor.fetch_one(&sql, &args).await?;
                        *created_ref = Some(T::from_row(&row).map_err(map_db_err)?);
                    } else {
                        executor.execute(&sql, &args).await?;
                    }
                    Ok(cx)
                })
            });

            self.middleware
                .run(cx, terminal)
                .await
                .map_err(|e| e.op("create", &self.meta.table_name))?;
        }

        Ok(created.unwrap_or(record))
    }

    /// Insert many records inside a single transaction. Empty input is a
    /// no-op success.
    pub async fn create_many(&self, records: Vec<T>) -> Result<Vec<T>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        if self.executor.is_transaction() {
            let mut out = Vec::with_capacity(records.len());
            for record in records {
                out.push(self.create_with(&self.executor, record).await?);
            }
            return Ok(out);
        }

        let pool = self.executor.pg_pool().ok_or_else(|| {
            StratumError::TransactionBegin("executor is not a connection pool".into())
        })?;
        let handle = transaction::begin(pool, &TxOptions::default()).await?;
        let tx_executor = match self.executor.logger() {
            Some(logger) => Executor::transaction(handle.clone()).with_logger(logger),
            None => Executor::transaction(handle.clone()),
        };

        let mut out = Vec::with_capacity(records.len());
        for record in records {
            match self.create_with(&tx_executor, record).await {
                Ok(created) => out.push(created),
                Err(err) => {
                    let _ = handle.rollback().await;
                    return Err(err);
                }
            }
        }

        handle.commit().await?;
        Ok(out)
    }

    /// Write every non-key, non-generated column of a record back by primary
    /// key. Zero matched rows is the not-found sentinel.
    pub async fn update(&self, record: &T) -> Result<()> {
        let actions: Vec<Action> = self
            .meta
            .columns
            .iter()
            .filter(|c| !c.info.primary_key && !c.info.auto_generated)
            .map(|c| Action::assign(c.info.db_name.clone(), (c.get)(record)))
            .collect();
        if actions.is_empty() {
            return Err(StratumError::InvalidArgument("no updatable columns".into())
                .op("update", &self.meta.table_name));
        }

        let plan = Plan::Update(UpdatePlan {
            table: self.meta.table_name.clone(),
            actions,
            conjuncts: self.pk_conjuncts(record),
        });

        let affected = run_statement(
            &self.executor,
            &self.middleware,
            OpKind::Update,
            plan,
            "update",
            &self.meta.table_name,
        )
        .await?;

        match affected {
            0 => Err(StratumError::NotFound.op("update", &self.meta.table_name)),
            _ => Ok(()),
        }
    }

    /// Delete a specific record; repeat deletion reports not-found.
    pub async fn delete_record(&self, record: &T) -> Result<()> {
        let plan = Plan::Delete(DeletePlan {
            table: self.meta.table_name.clone(),
            conjuncts: self.pk_conjuncts(record),
        });

        let affected = run_statement(
            &self.executor,
            &self.middleware,
            OpKind::Delete,
            plan,
            "delete",
            &self.meta.table_name,
        )
        .await?;

        match affected {
            0 => Err(StratumError::NotFound.op("delete", &self.meta.table_name)),
            _ => Ok(()),
        }
    }

    /// Delete by single-column primary key, returning rows affected.
    pub async fn delete(&self, id: impl Into<PgValue>) -> Result<u64> {
        let pk = self.single_pk("delete")?;
        let plan = Plan::Delete(DeletePlan {
            table: self.meta.table_name.clone(),
            conjuncts: vec![stratum_core::raw(format!("{pk} = ?"), [id.into()])],
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

    /// Insert-or-update on a conflict target.
    pub async fn upsert(&self, record: &T, opts: &UpsertOptions) -> Result<u64> {
        self.upsert_with(&self.executor, record, opts).await
    }

    async fn upsert_with(
        &self,
        executor: &Executor,
        record: &T,
        opts: &UpsertOptions,
    ) -> Result<u64> {
        self.check_conflict_target(opts)?;

        let (columns, values) = self.insert_fields(record);
        let plan = Plan::Insert(InsertPlan {
            table: self.meta.table_name.clone(),
            columns,
            rows: vec![values],
            on_conflict: Some(OnConflict {
                columns: opts.conflict_columns.clone(),
                update_columns: opts.update_columns.clone(),
            }),
            returning: None,
        });

        let cx = OpContext::new(OpKind::Create, plan);
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

            self.middleware
                .run(cx, terminal)
                .await
                .map_err(|e| e.op("upsert", &self.meta.table_name))?;
        }

        Ok(affected)
    }

    /// Upsert many records inside a single transaction. Empty input is a
    /// no-op success.
    pub async fn upsert_many(&self, records: &[T], opts: &UpsertOptions) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        if self.executor.is_transaction() {
            let mut total = 0;
            for record in records {
                total += self.upsert_with(&self.executor, record, opts).await?;
            }
            return Ok(total);
        }

        let pool = self.executor.pg_pool().ok_or_else(|| {
            StratumError::TransactionBegin("executor is not a connection pool".into())
        })?;
        let handle = transaction::begin(pool, &TxOptions::default()).await?;
        let tx_executor = match self.executor.logger() {
            Some(logger) => Executor::transaction(handle.clone()).with_logger(logger),
            None => Executor::transaction(handle.clone()),
        };

        let mut total = 0;
        for record in records {
            match self.upsert_with(&tx_executor, record, opts).await {
                Ok(n) => total += n,
                Err(err) => {
                    let _ = handle.rollback().await;
                    return Err(err);
                }
            }
        }

        handle.commit().await?;
        Ok(total)
    }

    /// Load, patch named columns, and reload one record by primary key.
    pub async fn update_fields(
        &self,
        id: impl Into<PgValue>,
        fields: Vec<(String, PgValue)>,
    ) -> Result<T> {
        let pk = self.single_pk("update_fields")?.to_string();
        if fields.is_empty() {
            return Err(StratumError::InvalidArgument("no updates provided".into())
                .op("update_fields", &self.meta.table_name));
        }
        for (column, _) in &fields {
            if self.meta.column_by_db_name(column).is_none() {
                return Err(StratumError::InvalidArgument(format!(
                    "unknown column {column}"
                ))
                .op("update_fields", &self.meta.table_name));
            }
        }

        let id = id.into();
        // Existence check first so a missing row reports not-found rather
        // than zero-rows-updated.
        self.find_by_pk(vec![id.clone()]).await?;

        let actions: Vec<Action> = fields
            .into_iter()
            .map(|(column, value)| Action::assign(column, value))
            .collect();

        let plan = Plan::Update(UpdatePlan {
            table: self.meta.table_name.clone(),
            actions,
            conjuncts: vec![stratum_core::raw(format!("{pk} = ?"), [id.clone()])],
        });

        let affected = run_statement(
            &self.executor,
            &self.middleware,
            OpKind::Update,
            plan,
            "update_fields",
            &self.meta.table_name,
        )
        .await?;
        if affected == 0 {
            return Err(StratumError::NotFound.op("update_fields", &self.meta.table_name));
        }

        self.find_by_pk(vec![id]).await
    }

    // ==================== helpers ====================

    /// Insert column list: every non-generated column whose optional field is
    /// set; nil optionals are omitted so the database default applies.
    fn insert_fields(&self, record: &T) -> (Vec<String>, Vec<PgValue>) {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for column in &self.meta.columns {
            if column.info.auto_generated {
                continue;
            }
            if let Some(is_nil) = column.is_nil {
                if is_nil(record) {
                    continue;
                }
            }
            columns.push(column.info.db_name.clone());
            values.push((column.get)(record));
        }
        (columns, values)
    }

    fn pk_conjuncts(&self, record: &T) -> Vec<stratum_core::Condition> {
        self.meta
            .primary_key_values(record)
            .into_iter()
            .map(|(pk, value)| stratum_core::raw(format!("{pk} = ?"), [value]))
            .collect()
    }

    fn single_pk(&self, op: &'static str) -> Result<&str> {
        match self.meta.primary_keys.as_slice() {
            [pk] => Ok(pk.as_str()),
            _ => Err(StratumError::InvalidArgument(
                "operation requires a single-column primary key".into(),
            )
            .op(op, &self.meta.table_name)),
        }
    }

    fn check_conflict_target(&self, opts: &UpsertOptions) -> Result<()> {
        if opts.conflict_columns.is_empty() {
            return Err(
                StratumError::Conflict("no conflict columns given".into())
                    .op("upsert", &self.meta.table_name),
            );
        }
        for column in &opts.conflict_columns {
            if self.meta.column_by_db_name(column).is_none() {
                return Err(StratumError::Conflict(format!(
                    "conflict column {column} does not exist on {}",
                    self.meta.table_name
                ))
                .op("upsert", &self.meta.table_name));
            }
        }
        if let Some(update_columns) = &opts.update_columns {
            for column in update_columns {
                if self.meta.column_by_db_name(column).is_none() {
                    return Err(StratumError::Conflict(format!(
                        "update column {column} does not exist on {}",
                        self.meta.table_name
                    ))
                    .op("upsert", &self.meta.table_name));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::LazyLock;
    use stratum_core::{ColumnInfo, ColumnMeta, Column};

    #[derive(Debug, Clone, sqlx::FromRow)]
    struct TestUser {
        id: i64,
        name: String,
        email: Option<String>,
        is_active: bool,
    }

    impl Model for TestUser {
        fn metadata() -> &'static TableMeta<Self> {
            static META: LazyLock<TableMeta<TestUser>> = LazyLock::new(|| {
                TableMeta::new(
                    "users",
                    vec!["id"],
                    vec![
                        ColumnMeta {
                            info: {
                                let mut c = ColumnInfo::new("id", "id", "i64");
                                c.primary_key = true;
                                c.auto_generated = true;
                                c
                            },
                            get: |u: &TestUser| u.id.into(),
                            is_nil: None,
                        },
                        ColumnMeta {
                            info: ColumnInfo::new("name", "name", "string"),
                            get: |u: &TestUser| u.name.clone().into(),
                            is_nil: None,
                        },
                        ColumnMeta {
                            info: {
                                let mut c = ColumnInfo::new("email", "email", "string");
                                c.nullable = true;
                                c
                            },
                            get: |u: &TestUser| u.email.clone().into(),
                            is_nil: Some(|u: &TestUser| u.email.is_none()),
                        },
                        ColumnMeta {
                            info: ColumnInfo::new("is_active", "is_active", "bool"),
                            get: |u: &TestUser| u.is_active.into(),
                            is_nil: None,
                        },
                    ],
                )
            });
            &META
        }
    }

    fn repo() -> Repository<TestUser> {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost:5432/stratum_test")
            .expect("lazy pool");
        Repository::new(Executor::pool(pool))
    }

    fn sample_user() -> TestUser {
        TestUser {
            id: 0,
            name: "Ada".into(),
            email: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn authorize_returns_a_grown_copy_and_leaves_the_receiver_alone() {
        let base = repo();
        assert_eq!(base.authorize_len(), 0);

        let scoped = base.authorize(|q| q.r#where(Column::<i64>::new("users", "user_id").eq(7)));
        assert_eq!(base.authorize_len(), 0);
        assert_eq!(scoped.authorize_len(), 1);

        // Distinct chains stay independent.
        let one = scoped.authorize(|q| q.limit(1));
        let two = scoped.authorize(|q| q.limit(2));
        assert_eq!(scoped.authorize_len(), 1);
        assert_eq!(one.authorize_len(), 2);
        assert_eq!(two.authorize_len(), 2);
    }

    #[tokio::test]
    async fn authorization_rewrites_the_query_at_construction() {
        let tenant = 7i64;
        let scoped =
            repo().authorize(move |q| q.r#where(Column::<i64>::new("users", "user_id").eq(tenant)));

        let query = scoped.query();
        let (sql, args) = query.base_select().render().unwrap();
        assert!(sql.contains("WHERE user_id = $1"), "got {sql}");
        assert_eq!(args, vec![PgValue::Int8(7)]);
    }

    #[tokio::test]
    async fn insert_fields_skip_generated_and_nil_optionals() {
        let repository = repo();

        let (columns, values) = repository.insert_fields(&sample_user());
        assert_eq!(columns, vec!["name", "is_active"]);
        assert_eq!(
            values,
            vec![PgValue::Text("Ada".into()), PgValue::Bool(true)]
        );

        let with_email = TestUser {
            email: Some("ada@example.com".into()),
            ..sample_user()
        };
        let (columns, _) = repository.insert_fields(&with_email);
        assert_eq!(columns, vec!["name", "email", "is_active"]);
    }

    #[tokio::test]
    async fn upsert_validates_its_conflict_target() {
        let repository = repo();

        let missing = UpsertOptions {
            conflict_columns: vec!["nope".into()],
            update_columns: None,
        };
        let err = repository.check_conflict_target(&missing).unwrap_err();
        assert!(err.to_string().contains("nope"));

        let empty = UpsertOptions {
            conflict_columns: Vec::new(),
            update_columns: None,
        };
        assert!(repository.check_conflict_target(&empty).is_err());

        let ok = UpsertOptions {
            conflict_columns: vec!["email".into()],
            update_columns: Some(vec!["name".into()]),
        };
        assert!(repository.check_conflict_target(&ok).is_ok());
    }

    #[tokio::test]
    async fn find_by_id_checks_primary_key_arity() {
        let err = repo().find_by_pk(vec![]).await.unwrap_err();
        assert!(err.to_string().contains("primary key"));
    }

    #[tokio::test]
    async fn update_with_no_actions_is_invalid() {
        let err = repo().query().update(Vec::new()).await.unwrap_err();
        assert!(err.to_string().contains("no actions provided"));
    }

    #[tokio::test]
    async fn update_fields_with_empty_map_is_invalid() {
        let err = repo().update_fields(1i64, Vec::new()).await.unwrap_err();
        assert!(err.to_string().contains("no updates provided"));
    }

    #[tokio::test]
    async fn create_many_with_empty_input_issues_nothing() {
        // The lazy pool never connects, so success proves no statement ran.
        let created = repo().create_many(Vec::new()).await.unwrap();
        assert!(created.is_empty());

        let upserted = repo()
            .upsert_many(
                &[],
                &UpsertOptions {
                    conflict_columns: vec!["email".into()],
                    update_columns: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(upserted, 0);
    }

    #[tokio::test]
    async fn qualified_select_list_uses_declared_columns() {
        let query = repo().query();
        let (sql, _) = query.base_select().render().unwrap();
        assert!(sql.starts_with(
            "SELECT \"users\".\"id\", \"users\".\"name\", \"users\".\"email\", \
             \"users\".\"is_active\" FROM \"users\""
        ));
    }
}
