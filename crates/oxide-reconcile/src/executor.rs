//! Plan executor.
//!
//! Applies a [`Plan`] inside one transaction and records the new snapshot
//! and hints in that same transaction, so a run either lands completely or
//! leaves the database as it found it.
//!
//! Dialects that cannot change a column in place get the column's table
//! rebuilt from the target snapshot instead. Rebuilds drop and recreate
//! tables that others may reference, so foreign keys are switched off for
//! the run and checked in full before it commits.

use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::{Connection, Row};
use tracing::{debug, info, warn};

use crate::dialect::ReconcileDialect;
use crate::error::{ReconcileError, Result};
use crate::hints::{HintStore, RenameHint};
use crate::operations::Operation;
use crate::plan::Plan;
use crate::schema::{Column, SchemaSnapshot};
use crate::snapshot::{SnapshotRecord, SnapshotStore};

/// Statements run for one operation or table rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// What the step does; names the step in logs and errors.
    pub description: String,
    /// Statements in execution order.
    pub sql: Vec<String>,
    /// Whether the step recreates a table.
    pub rebuild: bool,
}

/// Renders `plan` in `dialect` as executable steps.
///
/// When the dialect cannot alter columns in place, every table with a
/// changed column definition is rebuilt from `target` after all other
/// steps. Renames still run as renames first; a rename whose definition is
/// otherwise unchanged needs no rebuild.
///
/// # Errors
///
/// Fails if a rebuilt table is missing from `target` or one of its
/// attributes cannot be hydrated.
pub fn render<D>(dialect: &D, plan: &Plan, target: &SchemaSnapshot) -> Result<Vec<Step>>
where
    D: ReconcileDialect + ?Sized,
{
    let mut steps = Vec::with_capacity(plan.len());
    let mut rebuilds: Vec<&str> = Vec::new();

    for operation in plan {
        if !dialect.supports_alter_column() {
            if let Some((column, attribute, previous)) = operation.altered() {
                let unchanged = previous.is_some_and(|previous| {
                    dialect.column_definition(column, previous)
                        == dialect.column_definition(column, attribute)
                });
                if !unchanged && !rebuilds.contains(&operation.table()) {
                    rebuilds.push(operation.table());
                }
                if matches!(operation, Operation::AlterColumn { .. }) {
                    continue;
                }
            }
        }
        steps.push(Step {
            description: operation.to_string(),
            sql: dialect.generate_sql(operation),
            rebuild: false,
        });
    }

    for table in rebuilds {
        let columns = target
            .table(table)
            .ok_or_else(|| {
                ReconcileError::InvalidSnapshot(format!("table '{table}' missing from target"))
            })?
            .iter()
            .map(|(name, flat)| flat.hydrate().map(|attribute| Column::new(name, attribute)))
            .collect::<Result<Vec<_>>>()?;
        steps.push(Step {
            description: format!("rebuild table '{table}'"),
            sql: dialect.recreate_table_sql(table, &columns),
            rebuild: true,
        });
    }

    Ok(steps)
}

/// Executes plans against a database.
pub struct PlanExecutor<'a, D: ReconcileDialect> {
    pool: &'a SqlitePool,
    dialect: &'a D,
    snapshots: &'a SnapshotStore,
    hints: &'a HintStore,
}

impl<'a, D: ReconcileDialect> PlanExecutor<'a, D> {
    /// Creates a new plan executor.
    pub fn new(
        pool: &'a SqlitePool,
        dialect: &'a D,
        snapshots: &'a SnapshotStore,
        hints: &'a HintStore,
    ) -> Self {
        Self {
            pool,
            dialect,
            snapshots,
            hints,
        }
    }

    /// Applies `plan`, then saves `snapshot` and appends `new_hints`.
    ///
    /// Returns whether any operation ran. On failure the transaction is
    /// rolled back and the error that caused it is returned.
    pub async fn execute(
        &self,
        plan: &Plan,
        snapshot: &SnapshotRecord,
        new_hints: &[RenameHint],
    ) -> Result<bool> {
        let steps = render(self.dialect, plan, &snapshot.schema)?;
        let rebuilds = steps.iter().filter(|step| step.rebuild).count();
        info!(operations = plan.len(), rebuilds, "Executing plan");

        let mut conn = self.pool.acquire().await?;
        let suspended = rebuilds > 0 && suspend_foreign_keys(&mut conn).await?;
        let result = self
            .transaction(&mut conn, &steps, suspended, snapshot, new_hints)
            .await;
        if suspended {
            if let Err(e) = sqlx::query("PRAGMA foreign_keys = ON")
                .execute(&mut *conn)
                .await
            {
                warn!(error = %e, "Failed to re-enable foreign keys");
            }
        }

        result?;
        info!(
            operations = plan.len(),
            hints = new_hints.len(),
            "Plan committed"
        );
        Ok(!plan.is_empty())
    }

    async fn transaction(
        &self,
        conn: &mut SqliteConnection,
        steps: &[Step],
        check_foreign_keys: bool,
        snapshot: &SnapshotRecord,
        new_hints: &[RenameHint],
    ) -> Result<()> {
        let mut tx = conn.begin().await?;
        match self
            .apply(&mut tx, steps, check_foreign_keys, snapshot, new_hints)
            .await
        {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(error = %rollback_error, "Rollback failed");
                }
                warn!(error = %e, "Plan rolled back");
                Err(e)
            }
        }
    }

    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        steps: &[Step],
        check_foreign_keys: bool,
        snapshot: &SnapshotRecord,
        new_hints: &[RenameHint],
    ) -> Result<()> {
        for step in steps {
            info!(step = %step.description, "Applying step");
            for sql in &step.sql {
                if sql.starts_with("--") {
                    warn!(comment = %sql, "Skipping comment (unsupported operation)");
                    continue;
                }
                debug!(sql = %sql, "Executing SQL");
                sqlx::query(sql)
                    .execute(&mut *conn)
                    .await
                    .map_err(|source| ReconcileError::Mutation {
                        operation: step.description.clone(),
                        source,
                    })?;
            }
        }

        if check_foreign_keys {
            foreign_key_check(conn).await?;
        }
        self.snapshots.save(conn, snapshot).await?;
        self.hints.append(conn, new_hints).await?;
        Ok(())
    }
}

/// Turns foreign key enforcement off; returns whether it was on.
///
/// SQLite ignores the pragma inside a transaction, so this runs before one
/// is opened.
async fn suspend_foreign_keys(conn: &mut SqliteConnection) -> Result<bool> {
    let (enabled,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
        .fetch_one(&mut *conn)
        .await?;
    if enabled == 0 {
        return Ok(false);
    }
    sqlx::query("PRAGMA foreign_keys = OFF")
        .execute(&mut *conn)
        .await?;
    debug!("Foreign keys suspended");
    Ok(true)
}

async fn foreign_key_check(conn: &mut SqliteConnection) -> Result<()> {
    let rows = sqlx::query("PRAGMA foreign_key_check")
        .fetch_all(&mut *conn)
        .await?;
    let mut tables: Vec<String> = Vec::new();
    for row in rows {
        let table: String = row.try_get("table")?;
        if !tables.contains(&table) {
            tables.push(table);
        }
    }
    if tables.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::ForeignKeyViolation(tables))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{Attribute, DataType};
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::diff::diff;
    use crate::hints::DEFAULT_HINTS_TABLE;
    use crate::plan::PlanBuilder;
    use crate::resolver::Resolution;
    use crate::schema::{DesiredSchema, SchemaSnapshot, TableDefinition};
    use crate::snapshot::DEFAULT_STATE_TABLE;
    use chrono::{SubsecRound, Utc};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    async fn stores(pool: &SqlitePool) -> (SnapshotStore, HintStore) {
        let snapshots = SnapshotStore::new(pool.clone(), DEFAULT_STATE_TABLE);
        let hints = HintStore::new(pool.clone(), DEFAULT_HINTS_TABLE);
        snapshots.ensure_table().await.unwrap();
        hints.ensure_table().await.unwrap();
        (snapshots, hints)
    }

    fn plan_for(schema: &DesiredSchema) -> (Plan, SnapshotRecord) {
        plan_change(&SchemaSnapshot::new(), schema)
    }

    fn plan_change(old: &SchemaSnapshot, schema: &DesiredSchema) -> (Plan, SnapshotRecord) {
        let order = schema.topological_order().unwrap();
        let new = schema.to_snapshot(&[]).unwrap();
        let plan = PlanBuilder::new(old, &new, &order)
            .build(&diff(old, &new), &Resolution::default())
            .unwrap();
        let record = SnapshotRecord {
            schema: new,
            created_at: Utc::now().trunc_subsecs(6),
        };
        (plan, record)
    }

    async fn table_exists(pool: &SqlitePool, name: &str) -> bool {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name=?")
                .bind(name)
                .fetch_optional(pool)
                .await
                .unwrap();
        row.is_some()
    }

    #[tokio::test]
    async fn test_execute_commits_plan_and_snapshot() {
        let pool = create_test_pool().await;
        let (snapshots, hints) = stores(&pool).await;
        let dialect = SqliteDialect::new();
        let (plan, record) = plan_for(
            &DesiredSchema::new().table(TableDefinition::new("a").column("addr", DataType::Text)),
        );
        let new_hints = vec![RenameHint::new("a", "x", "y", record.created_at)];

        let changed = PlanExecutor::new(&pool, &dialect, &snapshots, &hints)
            .execute(&plan, &record, &new_hints)
            .await
            .unwrap();

        assert!(changed);
        assert!(table_exists(&pool, "a").await);
        assert_eq!(snapshots.load_latest().await.unwrap(), Some(record));
        assert_eq!(hints.load_all().await.unwrap(), new_hints);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_everything() {
        let pool = create_test_pool().await;
        let (snapshots, hints) = stores(&pool).await;
        let dialect = SqliteDialect::new();
        sqlx::query("CREATE TABLE \"b\" (x TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        let (plan, record) = plan_for(
            &DesiredSchema::new()
                .table(TableDefinition::new("a").column("addr", DataType::Text))
                .table(TableDefinition::new("b").column("x", DataType::Text)),
        );

        let result = PlanExecutor::new(&pool, &dialect, &snapshots, &hints)
            .execute(&plan, &record, &[RenameHint::new("a", "x", "y", Utc::now())])
            .await;

        match result {
            Err(ReconcileError::Mutation { operation, .. }) => {
                assert_eq!(operation, "create table 'b'");
            }
            other => panic!("Expected Mutation error, got {other:?}"),
        }
        assert!(!table_exists(&pool, "a").await);
        assert_eq!(snapshots.count().await.unwrap(), 0);
        assert_eq!(hints.count().await.unwrap(), 0);
    }

    fn addresses(street: Attribute) -> DesiredSchema {
        DesiredSchema::new()
            .table(
                TableDefinition::new("a")
                    .column("id", Attribute::new(DataType::Integer).primary_key())
                    .column("street", street),
            )
            .table(
                TableDefinition::new("u")
                    .column("id", Attribute::new(DataType::Integer).primary_key())
                    .column("a_id", Attribute::new(DataType::Integer).references("a", "id")),
            )
    }

    #[test]
    fn test_render_rebuilds_instead_of_altering() {
        let before = addresses(DataType::Text.into()).to_snapshot(&[]).unwrap();
        let after = addresses(Attribute::new(DataType::Text).not_null());
        let (plan, record) = plan_change(&before, &after);
        assert!(matches!(plan.operations(), [Operation::AlterColumn { .. }]));

        let steps = render(&SqliteDialect::new(), &plan, &record.schema).unwrap();
        assert_eq!(steps.len(), 1);
        assert!(steps[0].rebuild);
        assert_eq!(steps[0].description, "rebuild table 'a'");
        assert_eq!(
            steps[0].sql[0],
            "CREATE TABLE \"a__rebuild\" (\n  \"id\" INTEGER PRIMARY KEY,\n  \
             \"street\" TEXT NOT NULL\n)"
        );

        let steps = render(&PostgresDialect::new(), &plan, &record.schema).unwrap();
        assert_eq!(steps.len(), 1);
        assert!(!steps[0].rebuild);
        assert_eq!(
            steps[0].sql[0],
            "ALTER TABLE \"a\" ALTER COLUMN \"street\" SET NOT NULL"
        );
    }

    #[test]
    fn test_render_skips_unrendered_changes() {
        let before = addresses(DataType::string(50).into()).to_snapshot(&[]).unwrap();
        let (plan, record) = plan_change(&before, &addresses(DataType::string(80).into()));
        assert_eq!(plan.len(), 1);

        // both lengths are TEXT in SQLite
        let steps = render(&SqliteDialect::new(), &plan, &record.schema).unwrap();
        assert!(steps.is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_keeps_rows_and_references() {
        let pool = create_test_pool().await;
        let (snapshots, hints) = stores(&pool).await;
        let dialect = SqliteDialect::new();
        let executor = PlanExecutor::new(&pool, &dialect, &snapshots, &hints);

        let v1 = addresses(DataType::Text.into());
        let (plan, record) = plan_for(&v1);
        executor.execute(&plan, &record, &[]).await.unwrap();
        sqlx::query("INSERT INTO \"a\" VALUES (1, 'main')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO \"u\" VALUES (1, 1)")
            .execute(&pool)
            .await
            .unwrap();

        let (plan, record) = plan_change(
            &record.schema,
            &addresses(Attribute::new(DataType::Text).not_null()),
        );
        assert!(executor.execute(&plan, &record, &[]).await.unwrap());

        let street: (String,) = sqlx::query_as("SELECT street FROM \"a\" WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(street.0, "main");
        assert!(sqlx::query("INSERT INTO \"a\" VALUES (2, NULL)")
            .execute(&pool)
            .await
            .is_err());
        assert!(!table_exists(&pool, "a__rebuild").await);

        let (enabled,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(enabled, 1);
        assert!(sqlx::query("INSERT INTO \"u\" VALUES (2, 99)")
            .execute(&pool)
            .await
            .is_err());
        assert_eq!(snapshots.load_latest().await.unwrap(), Some(record));
    }
}
