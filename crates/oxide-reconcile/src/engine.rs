//! One reconciliation run, end to end.
//!
//! A [`Reconciler`] owns everything a run needs for one target database:
//! the pool, the dialect, both bookkeeping stores and their options. Nothing
//! is process-global, so several reconcilers can live side by side.
//!
//! ```text
//! Idle -> SnapshotLoaded -> Diffed -> RenamesResolved -> PlanBuilt
//!      -> Executing -> Committed | RolledBack
//! ```

use std::fmt;
use std::path::Path;

use chrono::{DateTime, SubsecRound, Utc};
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info};

use crate::dialect::ReconcileDialect;
use crate::diff::{diff, Direction};
use crate::error::{ReconcileError, Result};
use crate::executor::{render, PlanExecutor, Step};
use crate::hints::{HintFile, HintStore, RenameHint, DEFAULT_HINTS_TABLE};
use crate::plan::{Plan, PlanBuilder};
use crate::resolver::{Confirm, RenameResolver, Resolution};
use crate::schema::{DesiredSchema, SchemaSnapshot};
use crate::snapshot::{SnapshotRecord, SnapshotStore, DEFAULT_STATE_TABLE};

/// Names of the bookkeeping tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Snapshot table.
    pub state_table: String,
    /// Hints table.
    pub hints_table: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            state_table: DEFAULT_STATE_TABLE.to_string(),
            hints_table: DEFAULT_HINTS_TABLE.to_string(),
        }
    }
}

impl ReconcileOptions {
    /// Sets the snapshot table name.
    #[must_use]
    pub fn state_table(mut self, name: impl Into<String>) -> Self {
        self.state_table = name.into();
        self
    }

    /// Sets the hints table name.
    #[must_use]
    pub fn hints_table(mut self, name: impl Into<String>) -> Self {
        self.hints_table = name.into();
        self
    }
}

/// Stage of a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Nothing loaded yet.
    Idle,
    /// The latest snapshot has been read.
    SnapshotLoaded,
    /// Snapshot and desired schema have been compared.
    Diffed,
    /// Drop + add pairs have been settled as renames or left alone.
    RenamesResolved,
    /// Operations are ordered and ready to run.
    PlanBuilt,
    /// The plan's transaction is open.
    Executing,
    /// The plan, snapshot and hints are stored.
    Committed,
    /// The transaction was undone after a failure.
    RolledBack,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::SnapshotLoaded => "snapshot-loaded",
            Self::Diffed => "diffed",
            Self::RenamesResolved => "renames-resolved",
            Self::PlanBuilt => "plan-built",
            Self::Executing => "executing",
            Self::Committed => "committed",
            Self::RolledBack => "rolled-back",
        };
        f.write_str(name)
    }
}

fn enter(state: RunState) {
    debug!(state = %state, "Reconcile run");
}

/// A planned run that has not been executed.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    /// Direction of the run.
    pub direction: Direction,
    /// Start of the run; stamps the snapshot and new hints.
    pub started_at: DateTime<Utc>,
    /// Schema recorded once the run commits.
    pub target: SchemaSnapshot,
    /// Renames and the hints they produced.
    pub resolution: Resolution,
    /// Operations to apply.
    pub plan: Plan,
}

impl PreparedRun {
    /// Hints confirmed while preparing.
    #[must_use]
    pub fn new_hints(&self) -> &[RenameHint] {
        &self.resolution.new_hints
    }

    /// Renders the plan as the steps `dialect` would execute.
    ///
    /// # Errors
    ///
    /// Fails if a table to rebuild cannot be read from the target.
    pub fn steps<D: ReconcileDialect>(&self, dialect: &D) -> Result<Vec<Step>> {
        render(dialect, &self.plan, &self.target)
    }

    /// Renders the plan's SQL in `dialect`.
    ///
    /// # Errors
    ///
    /// Fails if a table to rebuild cannot be read from the target.
    pub fn sql<D: ReconcileDialect>(&self, dialect: &D) -> Result<Vec<String>> {
        Ok(self
            .steps(dialect)?
            .into_iter()
            .flat_map(|step| step.sql)
            .collect())
    }
}

/// Reconciles a database with a desired schema.
pub struct Reconciler<D: ReconcileDialect> {
    pool: SqlitePool,
    dialect: D,
    snapshots: SnapshotStore,
    hints: HintStore,
    options: ReconcileOptions,
    initialized: bool,
    dry_run: bool,
}

impl<D: ReconcileDialect> Reconciler<D> {
    /// Creates a reconciler with default options.
    pub fn new(pool: SqlitePool, dialect: D) -> Self {
        Self::with_options(pool, dialect, ReconcileOptions::default())
    }

    /// Creates a reconciler with explicit options.
    pub fn with_options(pool: SqlitePool, dialect: D, options: ReconcileOptions) -> Self {
        let snapshots = SnapshotStore::new(pool.clone(), options.state_table.clone());
        let hints = HintStore::new(pool.clone(), options.hints_table.clone());
        Self {
            pool,
            dialect,
            snapshots,
            hints,
            options,
            initialized: false,
            dry_run: false,
        }
    }

    /// Enables dry-run mode (SQL is printed but not executed).
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Creates the bookkeeping tables. Safe to call repeatedly.
    pub async fn init(&mut self) -> Result<()> {
        self.snapshots.ensure_table().await?;
        self.hints.ensure_table().await?;
        self.initialized = true;
        Ok(())
    }

    /// Returns whether [`init`](Self::init) has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Returns the target pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Returns the dialect.
    #[must_use]
    pub fn dialect(&self) -> &D {
        &self.dialect
    }

    /// Returns the snapshot store.
    #[must_use]
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Returns the hint store.
    #[must_use]
    pub fn hints(&self) -> &HintStore {
        &self.hints
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(ReconcileError::Uninitialized)
        }
    }

    fn bookkeeping_tables(&self) -> [&str; 2] {
        [self.snapshots.table_name(), self.hints.table_name()]
    }

    /// Loads the latest snapshot.
    pub async fn latest_snapshot(&self) -> Result<Option<SnapshotRecord>> {
        self.ensure_initialized()?;
        self.snapshots.load_latest().await
    }

    /// Loads hints that the next run will consult.
    pub async fn active_hints(&self) -> Result<Vec<RenameHint>> {
        self.ensure_initialized()?;
        let cutoff = self.snapshots.load_latest().await?.map(|r| r.created_at);
        self.hints.load_since(cutoff).await
    }

    /// Loads every stored hint.
    pub async fn all_hints(&self) -> Result<Vec<RenameHint>> {
        self.ensure_initialized()?;
        self.hints.load_all().await
    }

    /// Records a rename hint by hand.
    pub async fn record_hint(
        &self,
        table: impl Into<String>,
        from_field: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Result<RenameHint> {
        self.ensure_initialized()?;
        let hint = RenameHint::new(table, from_field, to_field, Utc::now().trunc_subsecs(6));
        self.hints.record(std::slice::from_ref(&hint)).await?;
        info!(table = %hint.table, from = %hint.from_field, to = %hint.to_field, "Hint recorded");
        Ok(hint)
    }

    /// Imports a hints file; returns the number of hints imported.
    pub async fn import_hints(&self, path: impl AsRef<Path>) -> Result<usize> {
        self.ensure_initialized()?;
        let hints = HintFile::load(path, Utc::now().trunc_subsecs(6))?;
        self.hints.record(&hints).await?;
        info!(count = hints.len(), "Hints imported");
        Ok(hints.len())
    }

    /// Plans a run without executing it.
    ///
    /// Returns `None` when the database already matches. Renames that need
    /// confirmation are asked through `confirm`.
    pub async fn prepare<C>(
        &self,
        desired: &DesiredSchema,
        direction: Direction,
        confirm: &mut C,
    ) -> Result<Option<PreparedRun>>
    where
        C: Confirm + ?Sized,
    {
        self.ensure_initialized()?;
        enter(RunState::Idle);
        let started_at = Utc::now().trunc_subsecs(6);

        let desired_order = desired.topological_order()?;
        let excluded = self.bookkeeping_tables();
        let desired_snapshot = desired.to_snapshot(&excluded)?;

        let (recorded, cutoff) = match self.snapshots.load_latest().await? {
            Some(record) => (
                record.schema.without_tables(&excluded),
                Some(record.created_at),
            ),
            None => (SchemaSnapshot::new(), None),
        };
        enter(RunState::SnapshotLoaded);

        let (from, to) = direction.sides(&recorded, &desired_snapshot);
        let mut changes = diff(from, to);
        enter(RunState::Diffed);
        if changes.is_empty() {
            info!("Schema is up to date");
            return Ok(None);
        }
        info!(changes = changes.change_count(), ?direction, "Schema differs");

        let active = self.hints.load_since(cutoff).await?;
        let resolution =
            RenameResolver::new(from, to, &active, started_at).resolve(&mut changes, confirm)?;
        enter(RunState::RenamesResolved);

        let create_order = match direction {
            Direction::Forward => desired_order,
            Direction::Backward => to.topological_order()?,
        };
        let plan = PlanBuilder::new(from, to, &create_order).build(&changes, &resolution)?;
        enter(RunState::PlanBuilt);

        Ok(Some(PreparedRun {
            direction,
            started_at,
            target: to.clone(),
            resolution,
            plan,
        }))
    }

    /// Reconciles the database with `desired`.
    ///
    /// Returns whether anything changed. In dry-run mode the SQL is printed
    /// and nothing is executed or recorded.
    pub async fn reconcile<C>(
        &self,
        desired: &DesiredSchema,
        direction: Direction,
        confirm: &mut C,
    ) -> Result<bool>
    where
        C: Confirm + ?Sized,
    {
        let Some(run) = self.prepare(desired, direction, confirm).await? else {
            return Ok(false);
        };

        if self.dry_run {
            for sql in run.sql(&self.dialect)? {
                println!("{sql};");
            }
            return Ok(false);
        }

        enter(RunState::Executing);
        let record = SnapshotRecord {
            schema: run.target,
            created_at: run.started_at,
        };
        let executor = PlanExecutor::new(&self.pool, &self.dialect, &self.snapshots, &self.hints);
        match executor
            .execute(&run.plan, &record, &run.resolution.new_hints)
            .await
        {
            Ok(changed) => {
                enter(RunState::Committed);
                Ok(changed)
            }
            Err(e) => {
                enter(RunState::RolledBack);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::DataType;
    use crate::dialect::SqliteDialect;
    use crate::resolver::Decline;
    use crate::schema::TableDefinition;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    fn schema() -> DesiredSchema {
        DesiredSchema::new().table(TableDefinition::new("a").column("addr", DataType::Text))
    }

    #[tokio::test]
    async fn test_uninitialized() {
        let reconciler = Reconciler::new(create_test_pool().await, SqliteDialect::new());

        let result = reconciler
            .reconcile(&schema(), Direction::Forward, &mut Decline)
            .await;
        assert!(matches!(result, Err(ReconcileError::Uninitialized)));
        assert!(matches!(
            reconciler.latest_snapshot().await,
            Err(ReconcileError::Uninitialized)
        ));
        assert!(matches!(
            reconciler.record_hint("a", "b", "c").await,
            Err(ReconcileError::Uninitialized)
        ));
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let mut reconciler = Reconciler::new(create_test_pool().await, SqliteDialect::new());
        reconciler.init().await.unwrap();
        reconciler.init().await.unwrap();
        assert!(reconciler.is_initialized());
        assert!(reconciler.latest_snapshot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let mut reconciler =
            Reconciler::new(create_test_pool().await, SqliteDialect::new()).dry_run(true);
        reconciler.init().await.unwrap();

        let changed = reconciler
            .reconcile(&schema(), Direction::Forward, &mut Decline)
            .await
            .unwrap();

        assert!(!changed);
        assert!(reconciler.latest_snapshot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_custom_table_names_are_excluded() {
        let options = ReconcileOptions::default()
            .state_table("my_state")
            .hints_table("my_hints");
        let mut reconciler =
            Reconciler::with_options(create_test_pool().await, SqliteDialect::new(), options);
        reconciler.init().await.unwrap();

        let desired = schema().table(TableDefinition::new("my_state").column("x", DataType::Text));
        let run = reconciler
            .prepare(&desired, Direction::Forward, &mut Decline)
            .await
            .unwrap()
            .unwrap();

        assert!(!run.target.contains_table("my_state"));
        assert_eq!(run.plan.len(), 1);
    }

    #[tokio::test]
    async fn test_backward_run_restores_recorded_schema() {
        let mut reconciler = Reconciler::new(create_test_pool().await, SqliteDialect::new());
        reconciler.init().await.unwrap();
        reconciler
            .reconcile(&schema(), Direction::Forward, &mut Decline)
            .await
            .unwrap();

        let grown = schema().table(TableDefinition::new("b").column("x", DataType::Text));
        let run = reconciler
            .prepare(&grown, Direction::Backward, &mut Decline)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(run.plan.operations(), &[crate::operations::Operation::drop_table("b")]);
        assert!(run.target.contains_table("a"));
        assert!(!run.target.contains_table("b"));
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::RenamesResolved.to_string(), "renames-resolved");
        assert_eq!(RunState::RolledBack.to_string(), "rolled-back");
    }
}
