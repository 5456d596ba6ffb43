//! Error types for the reconciliation engine.

/// Errors that can occur while reconciling a schema.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The foreign-key graph of a schema contains a cycle.
    #[error("Circular foreign key dependency between tables: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    /// The engine was used before `init()` completed.
    #[error("Reconciler is not initialized; call `init()` first")]
    Uninitialized,

    /// A structural operation failed inside the run's transaction.
    #[error("Failed to {operation}: {source}")]
    Mutation {
        /// Description of the failing operation.
        operation: String,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },

    /// Rows left dangling after a table rebuild.
    #[error("Foreign key check failed after rebuild: {}", .0.join(", "))]
    ForeignKeyViolation(Vec<String>),

    /// The snapshot or hint store could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (hints file, schema file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A hint entry failed validation.
    #[error("Invalid hint: {0}")]
    InvalidHint(String),

    /// A stored snapshot or hint row could not be decoded.
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl ReconcileError {
    /// Returns whether the error was raised before any transaction opened
    /// because the schema itself is unusable.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::CircularDependency(_))
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
