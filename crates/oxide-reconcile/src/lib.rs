//! Snapshot-diffing schema reconciliation for Rust.
//!
//! `oxide-reconcile` keeps a database in step with a declarative schema
//! without hand-written migration files:
//! - Every successful run records a snapshot of the schema it applied
//! - The next run diffs the desired schema against that snapshot
//! - Drop + add pairs that are really renames are detected, using stored
//!   hints, primary-key heuristics and an optional confirmation prompt
//! - The resulting operations are ordered by foreign-key dependencies and
//!   applied in a single transaction
//!
//! # Architecture
//!
//! - **Attribute** - Column descriptors and their flattened, comparable form
//! - **Diff** - Classifies differences as added, updated or deleted
//! - **Resolver** - Turns drop + add pairs into renames
//! - **Plan** - Orders structural operations by phase and dependency
//! - **Executor** - Applies a plan and records snapshot and hints atomically
//! - **Dialect** - Database-specific SQL generation (SQLite, PostgreSQL)
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_reconcile::prelude::*;
//!
//! let schema = DesiredSchema::new()
//!     .table(
//!         TableDefinition::new("users")
//!             .column("id", Attribute::new(DataType::Integer).primary_key().auto_increment())
//!             .column("address_id", Attribute::new(DataType::Integer).references("addresses", "id")),
//!     )
//!     .table(
//!         TableDefinition::new("addresses")
//!             .column("id", Attribute::new(DataType::Integer).primary_key().auto_increment())
//!             .column("street", DataType::Text),
//!     );
//!
//! let mut reconciler = Reconciler::new(pool, SqliteDialect::new());
//! reconciler.init().await?;
//! reconciler.reconcile(&schema, Direction::Forward, &mut TerminalPrompt).await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Create the bookkeeping tables
//! oxide-reconcile init
//!
//! # Preview the SQL for a schema file
//! oxide-reconcile plan --schema schema.json --dialect postgres
//!
//! # Apply it
//! oxide-reconcile reconcile --schema schema.json
//! ```

pub mod attribute;
pub mod dialect;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod hints;
pub mod operations;
pub mod plan;
pub mod resolver;
pub mod schema;
pub mod snapshot;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::attribute::{
        flatten, hydrate, Attribute, DataType, DefaultValue, FlatAttribute, Reference,
        ReferentialAction,
    };
    pub use crate::dialect::{PostgresDialect, ReconcileDialect, SqliteDialect};
    pub use crate::diff::{diff, ColumnChange, Diff, Direction};
    pub use crate::engine::{PreparedRun, ReconcileOptions, Reconciler, RunState};
    pub use crate::error::{ReconcileError, Result};
    pub use crate::executor::{render, PlanExecutor, Step};
    pub use crate::hints::{HintFile, HintStore, RenameHint};
    pub use crate::operations::{Operation, Phase, SequenceRename};
    pub use crate::plan::{Plan, PlanBuilder};
    pub use crate::resolver::{
        ColumnRename, Confirm, Decline, RenameResolver, Resolution, TerminalPrompt,
    };
    pub use crate::schema::{Column, DesiredSchema, SchemaSnapshot, TableDefinition};
    pub use crate::snapshot::{SnapshotRecord, SnapshotStore};
}
