//! The middleware pipeline.
//!
//! Every terminal operation runs through an ordered chain before the driver
//! call. The first-added middleware is outermost: its code before `next`
//! runs first and its code after `next` runs last. A middleware may rewrite
//! the plan, set the rendered statement directly, attach metadata, change
//! the operation kind, or abort by returning an error without calling
//! `next`.
//!
//! The context travels by value: each layer receives it, may mutate it, and
//! hands it to `next`; the terminal returns it back up the chain.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;

use stratum_core::{PgValue, Result};

use crate::plan::{OpKind, Plan};

/// Mutable context a pipeline invocation carries.
#[derive(Debug)]
pub struct OpContext {
    pub operation: OpKind,
    pub table: String,
    pub plan: Plan,
    /// Rendered statement override; set by middleware to short-circuit
    /// rendering.
    pub query: Option<String>,
    pub args: Option<Vec<PgValue>>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OpContext {
    pub fn new(operation: OpKind, plan: Plan) -> Self {
        let table = plan.table().to_string();
        Self {
            operation,
            table,
            plan,
            query: None,
            args: None,
            metadata: HashMap::new(),
        }
    }

    /// Replace the plan, keeping the table name in sync.
    pub fn set_plan(&mut self, plan: Plan) {
        self.table = plan.table().to_string();
        self.plan = plan;
    }

    /// Pin the statement text and arguments, bypassing plan rendering.
    pub fn set_statement(&mut self, sql: impl Into<String>, args: Vec<PgValue>) {
        self.query = Some(sql.into());
        self.args = Some(args);
    }

    /// The statement to execute: the override if set, the rendered plan
    /// otherwise.
    pub fn rendered(&self) -> Result<(String, Vec<PgValue>)> {
        match &self.query {
            Some(sql) => Ok((sql.clone(), self.args.clone().unwrap_or_default())),
            None => self.plan.render(),
        }
    }
}

/// The innermost step: renders and runs the driver call, then returns the
/// context back up the chain.
pub type Terminal<'a> =
    Box<dyn FnOnce(OpContext) -> BoxFuture<'a, Result<OpContext>> + Send + 'a>;

/// One layer of the pipeline.
pub trait Middleware: Send + Sync + 'static {
    fn handle<'a>(
        self: Arc<Self>,
        cx: OpContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<OpContext>>;
}

/// Adapter for plain functions: `add(from_fn(my_middleware))`.
pub fn from_fn<F>(f: F) -> FnMiddleware<F>
where
    F: for<'a> Fn(OpContext, Next<'a>) -> BoxFuture<'a, Result<OpContext>>
        + Send
        + Sync
        + 'static,
{
    FnMiddleware(f)
}

pub struct FnMiddleware<F>(F);

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(OpContext, Next<'a>) -> BoxFuture<'a, Result<OpContext>>
        + Send
        + Sync
        + 'static,
{
    fn handle<'a>(
        self: Arc<Self>,
        cx: OpContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<OpContext>> {
        (self.0)(cx, next)
    }
}

/// The remainder of the chain, ending in the terminal.
pub struct Next<'a> {
    chain: VecDeque<Arc<dyn Middleware>>,
    terminal: Terminal<'a>,
}

impl<'a> Next<'a> {
    /// Run the rest of the pipeline with the given context.
    pub fn run(mut self, cx: OpContext) -> BoxFuture<'a, Result<OpContext>> {
        match self.chain.pop_front() {
            Some(first) => first.handle(cx, self),
            None => (self.terminal)(cx),
        }
    }
}

/// Ordered middleware registry shared by the repositories of one record type.
///
/// The list is mutated only through [`add`](Self::add); an executing pipeline
/// works on the snapshot taken at entry, so adding middleware while queries
/// run is safe but only affects pipelines entered afterwards.
#[derive(Default)]
pub struct MiddlewareManager {
    chain: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware; the first added is outermost.
    pub fn add(&self, middleware: impl Middleware) {
        self.add_arc(Arc::new(middleware));
    }

    pub fn add_arc(&self, middleware: Arc<dyn Middleware>) {
        self.chain
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(middleware);
    }

    pub fn len(&self) -> usize {
        self.chain.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the pipeline to completion, returning the final context.
    pub async fn run<'a>(&self, cx: OpContext, terminal: Terminal<'a>) -> Result<OpContext> {
        let chain: VecDeque<Arc<dyn Middleware>> = self
            .chain
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        Next { chain, terminal }.run(cx).await
    }
}

impl std::fmt::Debug for MiddlewareManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareManager")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{DeletePlan, SelectPlan, UpdatePlan};
    use std::sync::Mutex;
    use stratum_core::{Action, ActionValue, Column, StratumError};

    fn select_context() -> OpContext {
        OpContext::new(
            OpKind::Query,
            Plan::Select(SelectPlan::new("users", vec!["*".into()])),
        )
    }

    fn noop_terminal<'a>() -> Terminal<'a> {
        Box::new(|cx| Box::pin(async move { Ok(cx) }))
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Recorder {
        fn handle<'a>(
            self: Arc<Self>,
            cx: OpContext,
            next: Next<'a>,
        ) -> BoxFuture<'a, Result<OpContext>> {
            Box::pin(async move {
                self.log.lock().unwrap().push(format!("pre-{}", self.name));
                let result = next.run(cx).await;
                self.log.lock().unwrap().push(format!("post-{}", self.name));
                result
            })
        }
    }

    struct Abort;

    impl Middleware for Abort {
        fn handle<'a>(
            self: Arc<Self>,
            _cx: OpContext,
            _next: Next<'a>,
        ) -> BoxFuture<'a, Result<OpContext>> {
            Box::pin(async { Err(StratumError::InvalidArgument("blocked".into())) })
        }
    }

    struct TenantScope;

    impl Middleware for TenantScope {
        fn handle<'a>(
            self: Arc<Self>,
            mut cx: OpContext,
            next: Next<'a>,
        ) -> BoxFuture<'a, Result<OpContext>> {
            if cx.operation == OpKind::Query {
                if let Some(select) = cx.plan.as_select_mut() {
                    select.and_where(Column::<i64>::new("users", "tenant_id").eq(123));
                }
            }
            next.run(cx)
        }
    }

    struct SoftDelete;

    impl Middleware for SoftDelete {
        fn handle<'a>(
            self: Arc<Self>,
            mut cx: OpContext,
            next: Next<'a>,
        ) -> BoxFuture<'a, Result<OpContext>> {
            if cx.operation == OpKind::Delete {
                let conjuncts = match &cx.plan {
                    Plan::Delete(p) => p.conjuncts.clone(),
                    _ => Vec::new(),
                };
                cx.set_plan(Plan::Update(UpdatePlan {
                    table: cx.table.clone(),
                    actions: vec![Action::new(
                        format!("{}.deleted_at", cx.table),
                        "deleted_at = NOW()",
                        ActionValue::None,
                    )],
                    conjuncts,
                }));
                cx.operation = OpKind::Update;
            }
            next.run(cx)
        }
    }

    fn capture_terminal<'a>(
        sink: Arc<Mutex<Option<(OpKind, String, Vec<PgValue>)>>>,
    ) -> Terminal<'a> {
        Box::new(move |cx| {
            Box::pin(async move {
                let (sql, args) = cx.rendered()?;
                *sink.lock().unwrap() = Some((cx.operation, sql, args));
                Ok(cx)
            })
        })
    }

    #[tokio::test]
    async fn first_added_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = MiddlewareManager::new();
        for name in ["m1", "m2", "m3"] {
            manager.add(Recorder {
                name,
                log: log.clone(),
            });
        }

        manager
            .run(select_context(), noop_terminal())
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["pre-m1", "pre-m2", "pre-m3", "post-m3", "post-m2", "post-m1"]
        );
    }

    #[tokio::test]
    async fn erroring_middleware_skips_inner_layers_but_not_outer_post_blocks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = MiddlewareManager::new();

        manager.add(Recorder {
            name: "m1",
            log: log.clone(),
        });
        manager.add(Abort);
        manager.add(Recorder {
            name: "m3",
            log: log.clone(),
        });

        let err = manager
            .run(select_context(), noop_terminal())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("blocked"));

        // m3 never ran; m1's post-block still observed the error.
        assert_eq!(*log.lock().unwrap(), vec!["pre-m1", "post-m1"]);
    }

    #[tokio::test]
    async fn middleware_can_rewrite_a_select_plan() {
        let manager = MiddlewareManager::new();
        manager.add(TenantScope);

        let sink = Arc::new(Mutex::new(None));
        manager
            .run(select_context(), capture_terminal(sink.clone()))
            .await
            .unwrap();

        let (_, sql, args) = sink.lock().unwrap().take().unwrap();
        assert!(sql.contains("tenant_id = $1"), "got {sql}");
        assert_eq!(args, vec![PgValue::Int8(123)]);
    }

    #[tokio::test]
    async fn soft_delete_swaps_delete_for_update() {
        let manager = MiddlewareManager::new();
        manager.add(SoftDelete);

        let cx = OpContext::new(
            OpKind::Delete,
            Plan::Delete(DeletePlan {
                table: "users".into(),
                conjuncts: vec![Column::<i64>::new("users", "id").eq(42)],
            }),
        );

        let sink = Arc::new(Mutex::new(None));
        manager
            .run(cx, capture_terminal(sink.clone()))
            .await
            .unwrap();

        let (op, sql, args) = sink.lock().unwrap().take().unwrap();
        assert_eq!(op, OpKind::Update);
        assert_eq!(sql, "UPDATE \"users\" SET deleted_at = NOW() WHERE id = $1");
        assert_eq!(args, vec![PgValue::Int8(42)]);
    }

    #[tokio::test]
    async fn short_circuited_statement_wins_over_plan_rendering() {
        struct Pin;
        impl Middleware for Pin {
            fn handle<'a>(
                self: Arc<Self>,
                mut cx: OpContext,
                next: Next<'a>,
            ) -> BoxFuture<'a, Result<OpContext>> {
                cx.set_statement("SELECT 1", Vec::new());
                next.run(cx)
            }
        }

        let manager = MiddlewareManager::new();
        manager.add(Pin);

        let sink = Arc::new(Mutex::new(None));
        manager
            .run(select_context(), capture_terminal(sink.clone()))
            .await
            .unwrap();

        let (_, sql, _) = sink.lock().unwrap().take().unwrap();
        assert_eq!(sql, "SELECT 1");
    }

    #[tokio::test]
    async fn metadata_travels_with_the_context() {
        struct Tag;
        impl Middleware for Tag {
            fn handle<'a>(
                self: Arc<Self>,
                mut cx: OpContext,
                next: Next<'a>,
            ) -> BoxFuture<'a, Result<OpContext>> {
                cx.metadata
                    .insert("audit".into(), serde_json::json!("tag-mw"));
                next.run(cx)
            }
        }

        let manager = MiddlewareManager::new();
        manager.add(Tag);

        let cx = manager
            .run(select_context(), noop_terminal())
            .await
            .unwrap();
        assert_eq!(cx.metadata["audit"], serde_json::json!("tag-mw"));
    }
}
