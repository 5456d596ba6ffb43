//! Snapshot persistence.
//!
//! Every successful run appends the schema it reconciled to a bookkeeping
//! table. The newest row is the baseline for the next run.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::error::{ReconcileError, Result};
use crate::schema::SchemaSnapshot;

/// Default name of the snapshot table.
pub const DEFAULT_STATE_TABLE: &str = "oxide_reconcile_state";

/// A stored snapshot and the start time of the run that recorded it.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    /// The recorded schema.
    pub schema: SchemaSnapshot,
    /// When the recording run started.
    pub created_at: DateTime<Utc>,
}

/// Append-only snapshot log in the target database.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
    table: String,
}

impl SnapshotStore {
    /// Creates a store writing to `table`.
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    /// Returns the bookkeeping table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Ensures the snapshot table exists.
    pub async fn ensure_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    json TEXT NOT NULL,
    created_at TEXT NOT NULL
)",
            quote(&self.table)
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Loads the most recently saved snapshot, if any.
    pub async fn load_latest(&self) -> Result<Option<SnapshotRecord>> {
        let sql = format!(
            "SELECT json, created_at FROM {} ORDER BY id DESC LIMIT 1",
            quote(&self.table)
        );
        let row: Option<(String, String)> =
            sqlx::query_as(&sql).fetch_optional(&self.pool).await?;

        let Some((json, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(SnapshotRecord {
            schema: serde_json::from_str(&json)?,
            created_at: parse_timestamp(&created_at)?,
        }))
    }

    /// Appends a snapshot on `conn`, normally the run's open transaction.
    pub async fn save(&self, conn: &mut SqliteConnection, record: &SnapshotRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (json, created_at) VALUES (?, ?)",
            quote(&self.table)
        );
        sqlx::query(&sql)
            .bind(serde_json::to_string(&record.schema)?)
            .bind(format_timestamp(record.created_at))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Counts stored snapshots.
    pub async fn count(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote(&self.table));
        let row: (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(row.0)
    }
}

/// Quotes a bookkeeping table name.
pub(crate) fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ReconcileError::InvalidSnapshot(format!("bad timestamp '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::DataType;
    use crate::schema::{DesiredSchema, TableDefinition};
    use chrono::SubsecRound;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    fn record(columns: &[&str]) -> SnapshotRecord {
        let mut table = TableDefinition::new("a");
        for name in columns {
            table = table.column(*name, DataType::Text);
        }
        SnapshotRecord {
            schema: DesiredSchema::new().table(table).to_snapshot(&[]).unwrap(),
            created_at: Utc::now().trunc_subsecs(6),
        }
    }

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let store = SnapshotStore::new(create_test_pool().await, DEFAULT_STATE_TABLE);
        store.ensure_table().await.unwrap();
        store.ensure_table().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_load_latest_empty() {
        let store = SnapshotStore::new(create_test_pool().await, DEFAULT_STATE_TABLE);
        store.ensure_table().await.unwrap();
        assert!(store.load_latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_wins() {
        let pool = create_test_pool().await;
        let store = SnapshotStore::new(pool.clone(), DEFAULT_STATE_TABLE);
        store.ensure_table().await.unwrap();

        let first = record(&["addr"]);
        let second = record(&["addr", "zip"]);
        let mut conn = pool.acquire().await.unwrap();
        store.save(&mut conn, &first).await.unwrap();
        store.save(&mut conn, &second).await.unwrap();
        drop(conn);

        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.load_latest().await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_save_rolls_back_with_transaction() {
        let pool = create_test_pool().await;
        let store = SnapshotStore::new(pool.clone(), DEFAULT_STATE_TABLE);
        store.ensure_table().await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        store.save(&mut tx, &record(&["addr"])).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.load_latest().await.unwrap().is_none());
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now().trunc_subsecs(6);
        assert_eq!(parse_timestamp(&format_timestamp(now)).unwrap(), now);
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(ReconcileError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("state"), "\"state\"");
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }
}
