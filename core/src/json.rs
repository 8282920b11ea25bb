//! Nullable JSON column carrier.
//!
//! `valid == false` exactly when the underlying value is absent; scanning a
//! database NULL or an empty byte payload yields the invalid state.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type, ValueRef};

use crate::error::{Result, StratumError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonData {
    value: Option<serde_json::Value>,
}

impl JsonData {
    /// Wrap a serializable value.
    pub fn new(data: impl Serialize) -> Result<Self> {
        let value = serde_json::to_value(data)
            .map_err(|e| StratumError::InvalidArgument(format!("unserializable JSON data: {e}")))?;
        Ok(Self { value: Some(value) })
    }

    /// The null carrier.
    pub fn null() -> Self {
        Self { value: None }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.value.is_some()
    }

    /// The raw JSON value, if present.
    pub fn value(&self) -> Option<&serde_json::Value> {
        self.value.as_ref()
    }

    /// Replace the carried value; `None` resets to null.
    pub fn set(&mut self, data: Option<serde_json::Value>) {
        self.value = data;
    }

    /// Deserialize into a target type; errors on null.
    pub fn get<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self
            .value
            .as_ref()
            .ok_or_else(|| StratumError::InvalidArgument("JSON field is null".into()))?;
        serde_json::from_value(value.clone())
            .map_err(|e| StratumError::InvalidArgument(format!("JSON field decode: {e}")))
    }

    /// Like [`get`](Self::get) but panics on a null field.
    ///
    /// This is a documented programmer-error surface: reading a field you
    /// have not checked for null is a bug, not a runtime condition.
    pub fn must_get<T: DeserializeOwned>(&self) -> T {
        if self.value.is_none() {
            panic!("JsonData: must_get called on a null field");
        }
        match self.get() {
            Ok(v) => v,
            Err(e) => panic!("JsonData: must_get decode failed: {e}"),
        }
    }

    /// Scan a raw database payload. `None` and empty payloads yield null.
    pub fn scan(bytes: Option<&[u8]>) -> Result<Self> {
        match bytes {
            None => Ok(Self::null()),
            Some(b) if b.is_empty() => Ok(Self::null()),
            Some(b) => {
                let value: serde_json::Value = serde_json::from_slice(b)
                    .map_err(|e| StratumError::InvalidArgument(format!("invalid JSON: {e}")))?;
                Ok(Self { value: Some(value) })
            }
        }
    }
}

impl std::fmt::Display for JsonData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            None => f.write_str("NULL"),
            Some(v) => write!(f, "{v}"),
        }
    }
}

impl From<serde_json::Value> for JsonData {
    fn from(value: serde_json::Value) -> Self {
        Self { value: Some(value) }
    }
}

// ==================== sqlx bindings ====================

impl Type<Postgres> for JsonData {
    fn type_info() -> PgTypeInfo {
        <serde_json::Value as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <serde_json::Value as Type<Postgres>>::compatible(ty)
    }
}

impl<'q> Encode<'q, Postgres> for JsonData {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> std::result::Result<IsNull, BoxDynError> {
        match &self.value {
            None => Ok(IsNull::Yes),
            Some(v) => <serde_json::Value as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }
}

impl<'r> Decode<'r, Postgres> for JsonData {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        if value.is_null() {
            return Ok(Self::null());
        }
        let decoded = <serde_json::Value as Decode<Postgres>>::decode(value)?;
        Ok(Self {
            value: Some(decoded),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip_preserves_structure() {
        let data = json!({"name": "John", "tags": ["a", "b"], "age": 3});
        let field = JsonData::new(&data).unwrap();

        let bytes = serde_json::to_vec(field.value().unwrap()).unwrap();
        let rescanned = JsonData::scan(Some(&bytes)).unwrap();
        let out: serde_json::Value = rescanned.get().unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn scan_null_and_empty_yield_invalid() {
        assert!(JsonData::scan(None).unwrap().is_null());
        assert!(JsonData::scan(Some(b"")).unwrap().is_null());
        assert!(!JsonData::scan(Some(b"{}")).unwrap().is_null());
    }

    #[test]
    fn get_on_null_errors() {
        let field = JsonData::null();
        assert!(field.get::<serde_json::Value>().is_err());
    }

    #[test]
    #[should_panic(expected = "must_get called on a null field")]
    fn must_get_on_null_panics() {
        let field = JsonData::null();
        let _: serde_json::Value = field.must_get();
    }

    #[test]
    fn set_none_resets_to_null() {
        let mut field = JsonData::new(json!(1)).unwrap();
        assert!(field.is_valid());
        field.set(None);
        assert!(field.is_null());
    }
}
