//! Typed column handles.
//!
//! The generated per-record modules expose one handle per column; the handle
//! type decides which predicates and actions are available. A plain
//! [`Column<T>`] gives equality and null tests; the wrappers layer on the
//! operators that make sense for their database type.

use std::marker::PhantomData;
use std::ops::Deref;

use chrono::{DateTime, Utc};

use crate::action::{Action, ActionValue};
use crate::condition::{CmpOp, Condition};
use crate::value::PgValue;

/// Base column handle: equality, membership, and null tests.
#[derive(Debug, Clone, Copy)]
pub struct Column<T> {
    pub table: &'static str,
    pub name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Column<T> {
    pub const fn new(table: &'static str, name: &'static str) -> Self {
        Self {
            table,
            name,
            _marker: PhantomData,
        }
    }

    /// Qualified name used by action metadata (`table.column`).
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.table, self.name)
    }

    pub fn is_null(&self) -> Condition {
        Condition::leaf(self.name, CmpOp::IsNull, Vec::new())
    }

    pub fn is_not_null(&self) -> Condition {
        Condition::leaf(self.name, CmpOp::IsNotNull, Vec::new())
    }

    pub fn set_null(&self) -> Action {
        Action::new(
            self.qualified(),
            format!("{} = NULL", self.name),
            ActionValue::None,
        )
    }

    pub fn set_default(&self) -> Action {
        Action::new(
            self.qualified(),
            format!("{} = DEFAULT", self.name),
            ActionValue::None,
        )
    }
}

impl<T: Into<PgValue>> Column<T> {
    pub fn eq(&self, value: T) -> Condition {
        Condition::leaf(self.name, CmpOp::Eq, vec![value.into()])
    }

    pub fn ne(&self, value: T) -> Condition {
        Condition::leaf(self.name, CmpOp::Ne, vec![value.into()])
    }

    pub fn in_list(&self, values: impl IntoIterator<Item = T>) -> Condition {
        Condition::leaf(
            self.name,
            CmpOp::In,
            values.into_iter().map(Into::into).collect(),
        )
    }

    pub fn not_in_list(&self, values: impl IntoIterator<Item = T>) -> Condition {
        Condition::leaf(
            self.name,
            CmpOp::NotIn,
            values.into_iter().map(Into::into).collect(),
        )
    }

    pub fn set(&self, value: T) -> Action {
        Action::new(
            self.qualified(),
            format!("{} = ?", self.name),
            ActionValue::One(value.into()),
        )
    }
}

// ==================== text ====================

/// Text column: pattern matching plus string mutations.
#[derive(Debug, Clone)]
pub struct TextColumn {
    base: Column<String>,
}

impl TextColumn {
    pub const fn new(table: &'static str, name: &'static str) -> Self {
        Self {
            base: Column::new(table, name),
        }
    }

    pub fn eq(&self, value: impl Into<String>) -> Condition {
        self.base.eq(value.into())
    }

    pub fn ne(&self, value: impl Into<String>) -> Condition {
        self.base.ne(value.into())
    }

    pub fn like(&self, pattern: impl Into<String>) -> Condition {
        Condition::leaf(self.name, CmpOp::Like, vec![PgValue::Text(pattern.into())])
    }

    pub fn ilike(&self, pattern: impl Into<String>) -> Condition {
        Condition::leaf(self.name, CmpOp::ILike, vec![PgValue::Text(pattern.into())])
    }

    pub fn set(&self, value: impl Into<String>) -> Action {
        self.base.set(value.into())
    }

    pub fn concat(&self, suffix: impl Into<String>) -> Action {
        Action::new(
            self.qualified(),
            format!("{0} = {0} || ?", self.name),
            ActionValue::One(PgValue::Text(suffix.into())),
        )
    }

    pub fn prepend(&self, prefix: impl Into<String>) -> Action {
        Action::new(
            self.qualified(),
            format!("{0} = ? || {0}", self.name),
            ActionValue::One(PgValue::Text(prefix.into())),
        )
    }

    pub fn upper(&self) -> Action {
        Action::new(
            self.qualified(),
            format!("{0} = UPPER({0})", self.name),
            ActionValue::None,
        )
    }

    pub fn lower(&self) -> Action {
        Action::new(
            self.qualified(),
            format!("{0} = LOWER({0})", self.name),
            ActionValue::None,
        )
    }
}

impl Deref for TextColumn {
    type Target = Column<String>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

// ==================== numeric ====================

/// Numeric column: ordering comparisons and arithmetic mutations.
#[derive(Debug, Clone, Copy)]
pub struct NumericColumn<T> {
    base: Column<T>,
}

impl<T: Into<PgValue>> NumericColumn<T> {
    pub const fn new(table: &'static str, name: &'static str) -> Self {
        Self {
            base: Column::new(table, name),
        }
    }

    pub fn lt(&self, value: T) -> Condition {
        Condition::leaf(self.name, CmpOp::Lt, vec![value.into()])
    }

    pub fn le(&self, value: T) -> Condition {
        Condition::leaf(self.name, CmpOp::Le, vec![value.into()])
    }

    pub fn gt(&self, value: T) -> Condition {
        Condition::leaf(self.name, CmpOp::Gt, vec![value.into()])
    }

    pub fn ge(&self, value: T) -> Condition {
        Condition::leaf(self.name, CmpOp::Ge, vec![value.into()])
    }

    pub fn between(&self, low: T, high: T) -> Condition {
        Condition::leaf(self.name, CmpOp::Between, vec![low.into(), high.into()])
    }

    pub fn increment(&self, by: T) -> Action {
        Action::new(
            self.qualified(),
            format!("{0} = {0} + ?", self.name),
            ActionValue::One(by.into()),
        )
    }

    pub fn decrement(&self, by: T) -> Action {
        Action::new(
            self.qualified(),
            format!("{0} = {0} - ?", self.name),
            ActionValue::One(by.into()),
        )
    }
}

impl<T> Deref for NumericColumn<T> {
    type Target = Column<T>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

// ==================== boolean ====================

#[derive(Debug, Clone, Copy)]
pub struct BoolColumn {
    base: Column<bool>,
}

impl BoolColumn {
    pub const fn new(table: &'static str, name: &'static str) -> Self {
        Self {
            base: Column::new(table, name),
        }
    }

    pub fn is_true(&self) -> Condition {
        self.base.eq(true)
    }

    pub fn is_false(&self) -> Condition {
        self.base.eq(false)
    }
}

impl Deref for BoolColumn {
    type Target = Column<bool>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

// ==================== time ====================

/// Timestamp column.
#[derive(Debug, Clone, Copy)]
pub struct TimeColumn {
    base: Column<DateTime<Utc>>,
}

impl TimeColumn {
    pub const fn new(table: &'static str, name: &'static str) -> Self {
        Self {
            base: Column::new(table, name),
        }
    }

    pub fn before(&self, instant: DateTime<Utc>) -> Condition {
        Condition::leaf(self.name, CmpOp::Lt, vec![instant.into()])
    }

    pub fn after(&self, instant: DateTime<Utc>) -> Condition {
        Condition::leaf(self.name, CmpOp::Gt, vec![instant.into()])
    }

    pub fn between(&self, low: DateTime<Utc>, high: DateTime<Utc>) -> Condition {
        Condition::leaf(self.name, CmpOp::Between, vec![low.into(), high.into()])
    }

    pub fn set_now(&self) -> Action {
        Action::new(
            self.qualified(),
            format!("{} = NOW()", self.name),
            ActionValue::None,
        )
    }
}

impl Deref for TimeColumn {
    type Target = Column<DateTime<Utc>>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

// ==================== text array ====================

/// `text[]` column: containment predicates and element mutations.
#[derive(Debug, Clone)]
pub struct ArrayColumn {
    base: Column<Vec<String>>,
}

impl ArrayColumn {
    pub const fn new(table: &'static str, name: &'static str) -> Self {
        Self {
            base: Column::new(table, name),
        }
    }

    /// `column @> values`
    pub fn contains(&self, values: impl IntoIterator<Item = String>) -> Condition {
        crate::condition::raw(
            format!("{} @> ?", self.name),
            [PgValue::TextArray(values.into_iter().collect())],
        )
    }

    /// `column && values`
    pub fn overlaps(&self, values: impl IntoIterator<Item = String>) -> Condition {
        crate::condition::raw(
            format!("{} && ?", self.name),
            [PgValue::TextArray(values.into_iter().collect())],
        )
    }

    pub fn append(&self, element: impl Into<String>) -> Action {
        Action::new(
            self.qualified(),
            format!("{0} = array_append({0}, ?)", self.name),
            ActionValue::One(PgValue::Text(element.into())),
        )
    }

    pub fn remove(&self, element: impl Into<String>) -> Action {
        Action::new(
            self.qualified(),
            format!("{0} = array_remove({0}, ?)", self.name),
            ActionValue::One(PgValue::Text(element.into())),
        )
    }
}

impl Deref for ArrayColumn {
    type Target = Column<Vec<String>>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

// ==================== jsonb ====================

/// JSONB column: path mutations and merge.
#[derive(Debug, Clone)]
pub struct JsonColumn {
    base: Column<serde_json::Value>,
}

impl JsonColumn {
    pub const fn new(table: &'static str, name: &'static str) -> Self {
        Self {
            base: Column::new(table, name),
        }
    }

    /// `jsonb_set` at a dotted path (`profile.name` → `{profile,name}`).
    pub fn set_path(&self, path: &str, value: serde_json::Value) -> Action {
        let pg_path = format!("{{{}}}", path.split('.').collect::<Vec<_>>().join(","));
        Action::new(
            self.qualified(),
            format!("{0} = jsonb_set({0}, ?, ?)", self.name),
            ActionValue::Many(vec![PgValue::Text(pg_path), PgValue::Json(value)]),
        )
    }

    /// Remove a top-level key.
    pub fn remove_path(&self, key: impl Into<String>) -> Action {
        Action::new(
            self.qualified(),
            format!("{0} = {0} - ?", self.name),
            ActionValue::One(PgValue::Text(key.into())),
        )
    }

    /// Shallow merge via the `||` operator.
    pub fn merge(&self, value: serde_json::Value) -> Action {
        Action::new(
            self.qualified(),
            format!("{0} = {0} || ?", self.name),
            ActionValue::One(PgValue::Json(value)),
        )
    }
}

impl Deref for JsonColumn {
    type Target = Column<serde_json::Value>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}
