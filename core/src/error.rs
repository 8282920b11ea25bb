use thiserror::Error;

/// Constraint classes parsed out of driver errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    Check,
    NotNull,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::Check => "check",
            ConstraintKind::NotNull => "not null",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum StratumError {
    /// No row matched a single-row read or a delete of a specific record.
    #[error("record not found")]
    NotFound,

    /// Caller misuse: empty action list, unknown relationship, bad annotation, ...
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A unique / foreign-key / check / not-null violation reported by the database.
    #[error("{kind} constraint violated: {message}")]
    ConstraintViolation {
        kind: ConstraintKind,
        /// Constraint name when the driver reports one.
        constraint: Option<String>,
        message: String,
    },

    /// Upsert conflict target does not name valid columns.
    #[error("conflict target invalid: {0}")]
    Conflict(String),

    #[error("failed to begin transaction: {0}")]
    TransactionBegin(String),

    #[error("failed to commit transaction: {0}")]
    TransactionCommit(String),

    #[error("failed to roll back transaction: {0}")]
    TransactionRollback(String),

    /// The migration advisory lock could not be acquired within the timeout.
    #[error("timed out waiting for the migration advisory lock")]
    MigrationLockTimeout,

    /// Destructive schema changes were detected and not explicitly allowed.
    #[error("destructive schema changes detected:\n  {}", descriptions.join("\n  "))]
    DestructiveChange { descriptions: Vec<String> },

    #[error("schema introspection failed: {0}")]
    SchemaIntrospection(String),

    #[error("unsupported by the postgres dialect: {0}")]
    DialectUnsupported(String),

    /// Opaque driver error; the original message is preserved verbatim.
    #[error("database error: {0}")]
    Driver(String),

    /// A terminal operation error carrying its operation name and table.
    #[error("{op} on {table}: {source}")]
    Op {
        op: &'static str,
        table: String,
        #[source]
        source: Box<StratumError>,
    },
}

impl StratumError {
    /// Wrap this error with the terminal operation and table it surfaced from.
    pub fn op(self, op: &'static str, table: impl Into<String>) -> Self {
        StratumError::Op {
            op,
            table: table.into(),
            source: Box::new(self),
        }
    }

    /// Equality-style test for the not-found sentinel, looking through `Op` wrappers.
    pub fn is_not_found(&self) -> bool {
        match self {
            StratumError::NotFound => true,
            StratumError::Op { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_constraint_violation(&self) -> bool {
        match self {
            StratumError::ConstraintViolation { .. } => true,
            StratumError::Op { source, .. } => source.is_constraint_violation(),
            _ => false,
        }
    }
}

/// Result type for database operations
pub type Result<T> = std::result::Result<T, StratumError>;
