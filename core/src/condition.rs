//! Composable predicate trees.
//!
//! A [`Condition`] is either a leaf comparison against one column, a raw SQL
//! fragment with `?` placeholders, or an `AND`/`OR`/`NOT` node over child
//! conditions. Trees render into a parameterized fragment through a shared
//! [`ParamBinder`], so their placeholder indices never collide with values
//! bound earlier in the same statement.

use crate::placeholder::ParamBinder;
use crate::value::PgValue;

/// Leaf comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    ILike,
    In,
    NotIn,
    Between,
    IsNull,
    IsNotNull,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Like => "LIKE",
            CmpOp::ILike => "ILIKE",
            CmpOp::In => "IN",
            CmpOp::NotIn => "NOT IN",
            CmpOp::Between => "BETWEEN",
            CmpOp::IsNull => "IS NULL",
            CmpOp::IsNotNull => "IS NOT NULL",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Condition {
    Leaf {
        column: String,
        op: CmpOp,
        values: Vec<PgValue>,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    /// Raw SQL with `?` placeholders, one per value.
    Raw { sql: String, values: Vec<PgValue> },
}

/// Conjunction of conditions.
pub fn and(conditions: impl IntoIterator<Item = Condition>) -> Condition {
    Condition::And(conditions.into_iter().collect())
}

/// Disjunction of conditions.
pub fn or(conditions: impl IntoIterator<Item = Condition>) -> Condition {
    Condition::Or(conditions.into_iter().collect())
}

/// Negation of a condition.
pub fn not(condition: Condition) -> Condition {
    Condition::Not(Box::new(condition))
}

/// Raw SQL predicate with `?` placeholders.
pub fn raw(sql: impl Into<String>, values: impl IntoIterator<Item = PgValue>) -> Condition {
    Condition::Raw {
        sql: sql.into(),
        values: values.into_iter().collect(),
    }
}

impl Condition {
    pub(crate) fn leaf(column: impl Into<String>, op: CmpOp, values: Vec<PgValue>) -> Self {
        Condition::Leaf {
            column: column.into(),
            op,
            values,
        }
    }

    /// Render this tree into `binder`, returning the SQL fragment.
    pub fn render(&self, binder: &mut ParamBinder) -> String {
        match self {
            Condition::Leaf { column, op, values } => match op {
                CmpOp::IsNull | CmpOp::IsNotNull => {
                    format!("{column} {}", op.symbol())
                }
                CmpOp::In | CmpOp::NotIn => {
                    if values.is_empty() {
                        // An empty list matches nothing; NULL keeps the shape valid.
                        format!("{column} {} (NULL)", op.symbol())
                    } else {
                        let list = binder.push_list(values.iter().cloned());
                        format!("{column} {} ({list})", op.symbol())
                    }
                }
                CmpOp::Between => {
                    let low = binder.push(values.first().cloned().unwrap_or(PgValue::Null));
                    let high = binder.push(values.get(1).cloned().unwrap_or(PgValue::Null));
                    format!("{column} BETWEEN {low} AND {high}")
                }
                _ => {
                    let placeholder =
                        binder.push(values.first().cloned().unwrap_or(PgValue::Null));
                    format!("{column} {} {placeholder}", op.symbol())
                }
            },
            Condition::And(children) => render_joined(children, " AND ", binder),
            Condition::Or(children) => render_joined(children, " OR ", binder),
            Condition::Not(inner) => format!("NOT ({})", inner.render(binder)),
            Condition::Raw { sql, values } => binder.rewrite_raw(sql, values),
        }
    }
}

fn render_joined(children: &[Condition], separator: &str, binder: &mut ParamBinder) -> String {
    match children.len() {
        0 => "TRUE".to_string(),
        1 => children[0].render(binder),
        _ => {
            let parts: Vec<String> = children
                .iter()
                .map(|c| format!("({})", c.render(binder)))
                .collect();
            parts.join(separator)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{Column, NumericColumn, TextColumn};

    fn render(condition: &Condition) -> (String, Vec<PgValue>) {
        let mut binder = ParamBinder::new();
        let sql = condition.render(&mut binder);
        (sql, binder.finish())
    }

    #[test]
    fn leaf_comparisons_render_with_positional_placeholders() {
        let id = Column::<i64>::new("users", "id");
        let (sql, args) = render(&id.eq(7));
        assert_eq!(sql, "id = $1");
        assert_eq!(args, vec![PgValue::Int8(7)]);
    }

    #[test]
    fn and_or_not_nest_with_parentheses() {
        let name = TextColumn::new("users", "name");
        let age = NumericColumn::<i32>::new("users", "age");

        let condition = and([
            name.like("J%"),
            or([age.lt(18), not(age.between(30, 40))]),
        ]);
        let (sql, args) = render(&condition);
        assert_eq!(
            sql,
            "(name LIKE $1) AND ((age < $2) OR (NOT (age BETWEEN $3 AND $4)))"
        );
        assert_eq!(args.len(), 4);
    }

    #[test]
    fn in_list_binds_every_element() {
        let id = Column::<i64>::new("users", "id");
        let (sql, args) = render(&id.in_list(vec![1, 2, 3]));
        assert_eq!(sql, "id IN ($1, $2, $3)");
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let id = Column::<i64>::new("users", "id");
        let (sql, args) = render(&id.in_list(Vec::<i64>::new()));
        assert_eq!(sql, "id IN (NULL)");
        assert!(args.is_empty());
    }

    #[test]
    fn raw_fragment_rewrites_question_marks() {
        let condition = raw(
            "LENGTH(name) > ? AND name <> ?",
            [PgValue::Int4(3), PgValue::Text("admin".into())],
        );
        let (sql, args) = render(&condition);
        assert_eq!(sql, "LENGTH(name) > $1 AND name <> $2");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn indices_continue_across_sibling_conditions() {
        let name = TextColumn::new("users", "name");
        let age = NumericColumn::<i32>::new("users", "age");
        let mut binder = ParamBinder::new();
        let first = name.eq("x").render(&mut binder);
        let second = age.ge(21).render(&mut binder);
        assert_eq!(first, "name = $1");
        assert_eq!(second, "age >= $2");
    }
}
