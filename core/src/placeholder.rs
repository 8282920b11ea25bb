//! Positional placeholder rewriting.
//!
//! Condition and action templates use `?` for parameters; the binder rewrites
//! each occurrence to the dialect's `$N` form with a single running index per
//! statement, so fragments rendered in sequence never collide.

use crate::action::ActionValue;
use crate::value::PgValue;

/// Accumulates bound arguments while assigning `$N` placeholders.
#[derive(Debug, Default)]
pub struct ParamBinder {
    args: Vec<PgValue>,
}

impl ParamBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The index the next pushed value will receive (1-based).
    #[inline]
    pub fn next_index(&self) -> usize {
        self.args.len() + 1
    }

    /// Bind one value, returning its `$N` placeholder.
    pub fn push(&mut self, value: impl Into<PgValue>) -> String {
        self.args.push(value.into());
        format!("${}", self.args.len())
    }

    /// Bind a list of values, returning `$N, $M, …`.
    pub fn push_list<I>(&mut self, values: I) -> String
    where
        I: IntoIterator,
        I::Item: Into<PgValue>,
    {
        let mut rendered = Vec::new();
        for value in values {
            rendered.push(self.push(value));
        }
        rendered.join(", ")
    }

    /// Rewrite every `?` in an action expression.
    ///
    /// A scalar value binds once per `?` (each occurrence gets its own
    /// index); a list consumes one element per `?` in list order.
    pub fn rewrite_action(&mut self, expression: &str, value: &ActionValue) -> String {
        match value {
            ActionValue::None => expression.to_string(),
            ActionValue::One(v) => {
                let mut out = expression.to_string();
                while let Some(pos) = out.find('?') {
                    let placeholder = self.push(v.clone());
                    out.replace_range(pos..pos + 1, &placeholder);
                }
                out
            }
            ActionValue::Many(values) => {
                let mut out = expression.to_string();
                for v in values {
                    let Some(pos) = out.find('?') else { break };
                    let placeholder = self.push(v.clone());
                    out.replace_range(pos..pos + 1, &placeholder);
                }
                out
            }
        }
    }

    /// Rewrite `?` placeholders in a raw SQL template, consuming one value each.
    pub fn rewrite_raw(&mut self, template: &str, values: &[PgValue]) -> String {
        let mut out = template.to_string();
        for v in values {
            let Some(pos) = out.find('?') else { break };
            let placeholder = self.push(v.clone());
            out.replace_range(pos..pos + 1, &placeholder);
        }
        out
    }

    /// Consume the binder, yielding the argument list in index order.
    pub fn finish(self) -> Vec<PgValue> {
        self.args
    }
}

/// Quote a SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_run_across_fragments() {
        let mut binder = ParamBinder::new();
        assert_eq!(binder.push("a"), "$1");
        assert_eq!(binder.push(2i64), "$2");
        assert_eq!(binder.push_list(vec![3i64, 4i64]), "$3, $4");
        assert_eq!(binder.finish().len(), 4);
    }

    #[test]
    fn scalar_action_value_binds_each_occurrence() {
        let mut binder = ParamBinder::new();
        let out = binder.rewrite_action("len = ? + ?", &ActionValue::One(PgValue::Int4(3)));
        assert_eq!(out, "len = $1 + $2");
        assert_eq!(binder.finish(), vec![PgValue::Int4(3), PgValue::Int4(3)]);
    }

    #[test]
    fn list_action_value_binds_in_list_order() {
        let mut binder = ParamBinder::new();
        let out = binder.rewrite_action(
            "meta = jsonb_set(meta, ?, ?)",
            &ActionValue::Many(vec![
                PgValue::Text("{a}".into()),
                PgValue::Text("1".into()),
            ]),
        );
        assert_eq!(out, "meta = jsonb_set(meta, $1, $2)");
    }

    #[test]
    fn quoting_doubles_embedded_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
