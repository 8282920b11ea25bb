//! Post-fetch relationship materialization.
//!
//! For each include, the loader builds one child query per parent row and
//! hands the fetched rows to the relationship's `scan_to_model` closure,
//! which owns decoding and assignment. Child statements flow through the
//! middleware pipeline as `Query` operations carrying the child table name.
//!
//! Loading is per parent row. A batched `IN (…)` plan would be a compatible
//! optimization as long as each parent still owns exactly its own children.

use stratum_core::{quote_ident, raw, PgValue, RelationKind, RelationMeta, Result, StratumError, TableMeta};

use crate::executor::Executor;
use crate::middleware::{MiddlewareManager, OpContext, Terminal};
use crate::model::Model;
use crate::plan::{Join, JoinKind, OpKind, Plan, SelectPlan};
use crate::query::Include;

/// Load one relationship for every parent record, in parent order.
pub(crate) async fn load_relationship<T: Model>(
    executor: &Executor,
    middleware: &MiddlewareManager,
    meta: &'static TableMeta<T>,
    records: &mut [T],
    include: &Include,
) -> Result<()> {
    let relation = meta.relationship(&include.name).ok_or_else(|| {
        StratumError::InvalidArgument(format!("relationship {} not found", include.name))
    })?;

    for record in records.iter_mut() {
        let Some(plan) = child_plan(meta, relation, record, include)? else {
            continue;
        };

        let cx = OpContext::new(OpKind::Query, Plan::Select(plan));
        let scan = relation.scan.clone();
        let terminal: Terminal<'_> = Box::new(move |cx: OpContext| {
            Box::pin(async move {
                let (sql, args) = cx.rendered()?;
                let rows = executor.fetch_all(&sql, &args).await?;
                scan(record, rows)?;
                Ok(cx)
            })
        });

        middleware.run(cx, terminal).await?;
    }

    Ok(())
}

/// Build the child query for one parent row; `None` means "skip this parent"
/// (missing or zero key value).
fn child_plan<T: Model>(
    meta: &TableMeta<T>,
    relation: &RelationMeta<T>,
    record: &T,
    include: &Include,
) -> Result<Option<SelectPlan>> {
    match &relation.kind {
        RelationKind::BelongsTo {
            target,
            foreign_key,
            target_key,
        } => {
            let value = column_value(meta, foreign_key, record)?;
            if value.is_zero() {
                return Ok(None);
            }
            Ok(Some(keyed_select(target, target_key, value, include)))
        }
        RelationKind::HasOne {
            target,
            foreign_key,
            source_key,
        }
        | RelationKind::HasMany {
            target,
            foreign_key,
            source_key,
        } => {
            let value = column_value(meta, source_key, record)?;
            if value.is_zero() {
                return Ok(None);
            }
            Ok(Some(keyed_select(target, foreign_key, value, include)))
        }
        RelationKind::HasManyThrough {
            target,
            join_table,
            source_fk,
            target_fk,
            source_key,
            target_key,
        } => {
            let value = column_value(meta, source_key, record)?;
            if value.is_zero() {
                return Ok(None);
            }

            let mut plan = SelectPlan {
                columns: vec!["t.*".to_string()],
                table: target.clone(),
                alias: Some("t".to_string()),
                joins: vec![Join {
                    kind: JoinKind::Inner,
                    table: format!("{} jt", quote_ident(join_table)),
                    on: format!("t.{target_key} = jt.{target_fk}"),
                }],
                conjuncts: vec![raw(format!("jt.{source_fk} = ?"), [value])],
                order_by: Vec::new(),
                limit: None,
                offset: None,
            };
            plan.conjuncts.extend(include.conditions.iter().cloned());
            Ok(Some(plan))
        }
    }
}

fn keyed_select(target: &str, key: &str, value: PgValue, include: &Include) -> SelectPlan {
    let mut plan = SelectPlan {
        columns: vec!["*".to_string()],
        table: target.to_string(),
        alias: None,
        joins: Vec::new(),
        conjuncts: vec![raw(format!("{key} = ?"), [value])],
        order_by: Vec::new(),
        limit: None,
        offset: None,
    };
    plan.conjuncts.extend(include.conditions.iter().cloned());
    plan
}

/// Read a column value by database column name, falling back to the field
/// name the way annotations allow either spelling.
fn column_value<T>(meta: &TableMeta<T>, db_name: &str, record: &T) -> Result<PgValue> {
    let column = meta
        .column_by_db_name(db_name)
        .or_else(|| meta.column(db_name))
        .ok_or_else(|| {
            StratumError::InvalidArgument(format!(
                "column {} not found on {}",
                db_name, meta.table_name
            ))
        })?;
    Ok((column.get)(record))
}
