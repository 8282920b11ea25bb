//! PostgreSQL parameter values.
//!
//! Every bound parameter travels as a [`PgValue`]. The enum implements the
//! sqlx `Type`/`Encode` pair so a rendered statement can bind its argument
//! list in a single loop; `produces` reports the variant's wire type so the
//! server sees `int8` for integers, `timestamptz` for timestamps, and so on
//! instead of a blanket text OID.

use chrono::{DateTime, Utc};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo};
use sqlx::{Encode, Postgres, Type};
use uuid::Uuid;

/// A single parameter value bound into a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
    TextArray(Vec<String>),
}

impl PgValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, PgValue::Null)
    }

    /// Zero test used by the relationship loader: a missing key value means
    /// "no child lookup", and zero-valued keys behave the same way.
    pub fn is_zero(&self) -> bool {
        match self {
            PgValue::Null => true,
            PgValue::Bool(b) => !b,
            PgValue::Int2(v) => *v == 0,
            PgValue::Int4(v) => *v == 0,
            PgValue::Int8(v) => *v == 0,
            PgValue::Float4(v) => *v == 0.0,
            PgValue::Float8(v) => *v == 0.0,
            PgValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl std::fmt::Display for PgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PgValue::Null => f.write_str("NULL"),
            PgValue::Bool(v) => write!(f, "{v}"),
            PgValue::Int2(v) => write!(f, "{v}"),
            PgValue::Int4(v) => write!(f, "{v}"),
            PgValue::Int8(v) => write!(f, "{v}"),
            PgValue::Float4(v) => write!(f, "{v}"),
            PgValue::Float8(v) => write!(f, "{v}"),
            PgValue::Text(v) => write!(f, "{v:?}"),
            PgValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            PgValue::Timestamp(v) => write!(f, "{v}"),
            PgValue::Uuid(v) => write!(f, "{v}"),
            PgValue::Json(v) => write!(f, "{v}"),
            PgValue::TextArray(v) => write!(f, "{v:?}"),
        }
    }
}

// ==================== conversions ====================

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for PgValue {
                #[inline]
                fn from(value: $ty) -> Self {
                    PgValue::$variant(value)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i16 => Int2,
    i32 => Int4,
    i64 => Int8,
    f32 => Float4,
    f64 => Float8,
    String => Text,
    Vec<u8> => Bytes,
    DateTime<Utc> => Timestamp,
    Uuid => Uuid,
    serde_json::Value => Json,
    Vec<String> => TextArray,
}

impl From<&str> for PgValue {
    #[inline]
    fn from(value: &str) -> Self {
        PgValue::Text(value.to_string())
    }
}

impl<T> From<Option<T>> for PgValue
where
    T: Into<PgValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => PgValue::Null,
        }
    }
}

// ==================== sqlx bindings ====================

impl Type<Postgres> for PgValue {
    fn type_info() -> PgTypeInfo {
        // Per-value wire types come from `Encode::produces`.
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}

impl<'q> Encode<'q, Postgres> for PgValue {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        match self {
            PgValue::Null => Ok(IsNull::Yes),
            PgValue::Bool(v) => <bool as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Int2(v) => <i16 as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Int4(v) => <i32 as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Int8(v) => <i64 as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Float4(v) => <f32 as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Float8(v) => <f64 as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Text(v) => <String as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Bytes(v) => <Vec<u8> as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Timestamp(v) => {
                <DateTime<Utc> as Encode<Postgres>>::encode_by_ref(v, buf)
            }
            PgValue::Uuid(v) => <Uuid as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Json(v) => <serde_json::Value as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::TextArray(v) => <Vec<String> as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        let info = match self {
            // Let the server infer the type of an untyped NULL.
            PgValue::Null => return None,
            PgValue::Bool(_) => <bool as Type<Postgres>>::type_info(),
            PgValue::Int2(_) => <i16 as Type<Postgres>>::type_info(),
            PgValue::Int4(_) => <i32 as Type<Postgres>>::type_info(),
            PgValue::Int8(_) => <i64 as Type<Postgres>>::type_info(),
            PgValue::Float4(_) => <f32 as Type<Postgres>>::type_info(),
            PgValue::Float8(_) => <f64 as Type<Postgres>>::type_info(),
            PgValue::Text(_) => <String as Type<Postgres>>::type_info(),
            PgValue::Bytes(_) => <Vec<u8> as Type<Postgres>>::type_info(),
            PgValue::Timestamp(_) => <DateTime<Utc> as Type<Postgres>>::type_info(),
            PgValue::Uuid(_) => <Uuid as Type<Postgres>>::type_info(),
            PgValue::Json(_) => <serde_json::Value as Type<Postgres>>::type_info(),
            PgValue::TextArray(_) => <Vec<String> as Type<Postgres>>::type_info(),
        };
        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_maps_to_null() {
        let none: Option<i64> = None;
        assert_eq!(PgValue::from(none), PgValue::Null);
        assert_eq!(PgValue::from(Some(7i64)), PgValue::Int8(7));
    }

    #[test]
    fn zero_test_matches_loader_semantics() {
        assert!(PgValue::Null.is_zero());
        assert!(PgValue::Int8(0).is_zero());
        assert!(PgValue::Text(String::new()).is_zero());
        assert!(!PgValue::Int8(42).is_zero());
        assert!(!PgValue::Uuid(Uuid::nil()).is_zero());
    }
}
