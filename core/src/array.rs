//! PostgreSQL `text[]` carrier.
//!
//! Distinguishes the nil sequence (database NULL) from the empty one (`{}`).
//! The literal form doubles embedded quotes, matching the server's array
//! output syntax, and `parse_literal` reverses it exactly.

use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type, ValueRef};

use crate::error::{Result, StratumError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringArray(pub Option<Vec<String>>);

impl StringArray {
    pub fn new(values: impl IntoIterator<Item = String>) -> Self {
        Self(Some(values.into_iter().collect()))
    }

    pub fn null() -> Self {
        Self(None)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_slice(&self) -> Option<&[String]> {
        self.0.as_deref()
    }

    /// Render the array literal; `None` for the nil sequence, `{}` for empty.
    pub fn to_literal(&self) -> Option<String> {
        let values = self.0.as_ref()?;
        if values.is_empty() {
            return Some("{}".to_string());
        }
        let escaped: Vec<String> = values
            .iter()
            .map(|s| format!("\"{}\"", s.replace('"', "\"\"")))
            .collect();
        Some(format!("{{{}}}", escaped.join(",")))
    }

    /// Parse a database array literal; `None` input yields the nil sequence.
    pub fn parse_literal(input: Option<&str>) -> Result<Self> {
        let Some(s) = input else {
            return Ok(Self::null());
        };
        if s.is_empty() || s == "{}" {
            return Ok(Self(Some(Vec::new())));
        }
        if !s.starts_with('{') || !s.ends_with('}') {
            return Err(StratumError::InvalidArgument(format!(
                "invalid array literal: {s}"
            )));
        }

        let content = &s[1..s.len() - 1];
        if content.is_empty() {
            return Ok(Self(Some(Vec::new())));
        }

        let mut result = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut chars = content.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '"' => {
                    if in_quotes {
                        if chars.peek() == Some(&'"') {
                            current.push('"');
                            chars.next();
                        } else {
                            in_quotes = false;
                        }
                    } else {
                        in_quotes = true;
                    }
                }
                ',' if !in_quotes => {
                    result.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            }
        }
        if !current.is_empty() || !result.is_empty() {
            result.push(current);
        }

        Ok(Self(Some(result)))
    }
}

impl From<Vec<String>> for StringArray {
    fn from(values: Vec<String>) -> Self {
        Self(Some(values))
    }
}

impl From<Option<Vec<String>>> for StringArray {
    fn from(values: Option<Vec<String>>) -> Self {
        Self(values)
    }
}

// ==================== sqlx bindings ====================

impl Type<Postgres> for StringArray {
    fn type_info() -> PgTypeInfo {
        <Vec<String> as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <Vec<String> as Type<Postgres>>::compatible(ty)
    }
}

impl<'q> Encode<'q, Postgres> for StringArray {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> std::result::Result<IsNull, BoxDynError> {
        match &self.0 {
            None => Ok(IsNull::Yes),
            Some(values) => <Vec<String> as Encode<Postgres>>::encode_by_ref(values, buf),
        }
    }
}

impl<'r> Decode<'r, Postgres> for StringArray {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        if value.is_null() {
            return Ok(Self::null());
        }
        let values = <Vec<String> as Decode<Postgres>>::decode(value)?;
        Ok(Self(Some(values)))
    }
}
