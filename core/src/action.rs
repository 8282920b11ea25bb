//! Column mutation expressions for UPDATE statements.
//!
//! An [`Action`] is one `SET` fragment: the qualified column it targets, an
//! expression template with zero or more `?` placeholders, and the value (or
//! value list) those placeholders bind. Actions render in the order supplied;
//! each `?` takes the next running index.

use crate::value::PgValue;

/// The value side of an action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionValue {
    /// Expression has no parameters (`name = DEFAULT`, `ts = NOW()`, …).
    None,
    /// A scalar bound once per `?` occurrence.
    One(PgValue),
    /// A list consumed one element per `?`, in order.
    Many(Vec<PgValue>),
}

/// A single typed `SET` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    column: String,
    expression: String,
    value: ActionValue,
}

impl Action {
    /// Build an action from raw parts. Column constructors are the normal
    /// entry point; this exists for middleware that synthesizes updates
    /// (soft-delete and the like) and for field-map updates.
    pub fn new(
        column: impl Into<String>,
        expression: impl Into<String>,
        value: ActionValue,
    ) -> Self {
        Self {
            column: column.into(),
            expression: expression.into(),
            value,
        }
    }

    /// Plain `column = ?` assignment from a bare column name and value.
    pub fn assign(column: impl Into<String>, value: impl Into<PgValue>) -> Self {
        let column = column.into();
        let expression = format!("{column} = ?");
        Self {
            column,
            expression,
            value: ActionValue::One(value.into()),
        }
    }

    /// The qualified column this action targets (`table.column`).
    #[inline]
    pub fn column(&self) -> &str {
        &self.column
    }

    /// The `SET` fragment with `?` placeholders.
    #[inline]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    #[inline]
    pub fn value(&self) -> &ActionValue {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ArrayColumn, JsonColumn, NumericColumn, TextColumn, TimeColumn};
    use serde_json::json;

    #[test]
    fn set_and_null_and_default() {
        let name = TextColumn::new("users", "name");

        let set = name.set("John");
        assert_eq!(set.column(), "users.name");
        assert_eq!(set.expression(), "name = ?");
        assert_eq!(set.value(), &ActionValue::One(PgValue::Text("John".into())));

        assert_eq!(name.set_null().expression(), "name = NULL");
        assert_eq!(name.set_null().value(), &ActionValue::None);
        assert_eq!(name.set_default().expression(), "name = DEFAULT");
    }

    #[test]
    fn numeric_increment_and_decrement() {
        let age = NumericColumn::<i32>::new("users", "age");
        let inc = age.increment(1);
        assert_eq!(inc.column(), "users.age");
        assert_eq!(inc.expression(), "age = age + ?");
        assert_eq!(age.decrement(5).expression(), "age = age - ?");
    }

    #[test]
    fn string_mutations() {
        let name = TextColumn::new("users", "name");
        assert_eq!(name.concat(" Jr.").expression(), "name = name || ?");
        assert_eq!(name.prepend("Mr. ").expression(), "name = ? || name");
        assert_eq!(name.upper().expression(), "name = UPPER(name)");
        assert_eq!(name.upper().value(), &ActionValue::None);
        assert_eq!(name.lower().expression(), "name = LOWER(name)");
    }

    #[test]
    fn time_now() {
        let updated_at = TimeColumn::new("users", "updated_at");
        let action = updated_at.set_now();
        assert_eq!(action.expression(), "updated_at = NOW()");
        assert_eq!(action.value(), &ActionValue::None);
    }

    #[test]
    fn array_append_and_remove() {
        let tags = ArrayColumn::new("users", "tags");
        assert_eq!(
            tags.append("new-tag").expression(),
            "tags = array_append(tags, ?)"
        );
        assert_eq!(
            tags.remove("old-tag").expression(),
            "tags = array_remove(tags, ?)"
        );
    }

    #[test]
    fn jsonb_path_operations() {
        let meta = JsonColumn::new("users", "metadata");

        let set = meta.set_path("profile.name", json!("John"));
        assert_eq!(set.expression(), "metadata = jsonb_set(metadata, ?, ?)");
        match set.value() {
            ActionValue::Many(values) => {
                assert_eq!(values[0], PgValue::Text("{profile,name}".into()));
            }
            other => panic!("expected list value, got {other:?}"),
        }

        assert_eq!(
            meta.remove_path("temp_field").expression(),
            "metadata = metadata - ?"
        );
        assert_eq!(
            meta.merge(json!({"new_field": "value"})).expression(),
            "metadata = metadata || ?"
        );
    }
}
