//! The per-record capability set.
//!
//! The code generator emits one `Model` implementation per record type; the
//! trait is small on purpose. Row decoding comes from the `FromRow` bound,
//! value extraction and primary keys come from the metadata accessors.

use sqlx::postgres::PgRow;

use stratum_core::TableMeta;

pub trait Model:
    Sized + Send + Sync + Unpin + for<'r> sqlx::FromRow<'r, PgRow> + 'static
{
    /// The process-wide metadata for this record type. Built once, read-only
    /// thereafter.
    fn metadata() -> &'static TableMeta<Self>;
}
