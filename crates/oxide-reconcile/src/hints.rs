//! Rename hints.
//!
//! A hint records that a dropped column and an added column of the same
//! table are really one column under a new name. Hints are appended to a
//! bookkeeping table, either when a rename is confirmed during a run or by
//! hand, and are only consulted by runs that start after the snapshot they
//! were recorded against.
//!
//! Hints can also be exchanged as a JSON file:
//!
//! ```json
//! [
//!   {
//!     "type": "renameColumn",
//!     "createdAt": "2024-03-01T10:00:00Z",
//!     "body": { "fromField": "foo", "toField": "food", "table": "items" }
//!   }
//! ]
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use tracing::warn;

use crate::error::{ReconcileError, Result};
use crate::snapshot::{format_timestamp, parse_timestamp, quote};

/// Default name of the hints table.
pub const DEFAULT_HINTS_TABLE: &str = "oxide_reconcile_hints";

/// Kind tag of a column rename hint.
pub const RENAME_COLUMN: &str = "renameColumn";

/// A confirmed column rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameHint {
    /// Table holding the column.
    pub table: String,
    /// Old column name.
    pub from_field: String,
    /// New column name.
    pub to_field: String,
    /// When the hint was recorded.
    pub created_at: DateTime<Utc>,
}

impl RenameHint {
    /// Creates a new hint.
    pub fn new(
        table: impl Into<String>,
        from_field: impl Into<String>,
        to_field: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            table: table.into(),
            from_field: from_field.into(),
            to_field: to_field.into(),
            created_at,
        }
    }

    /// Returns whether the hint was recorded after `cutoff`.
    ///
    /// With no cutoff (nothing reconciled yet) every hint is active.
    #[must_use]
    pub fn is_active_since(&self, cutoff: Option<DateTime<Utc>>) -> bool {
        match cutoff {
            Some(cutoff) => self.created_at > cutoff,
            None => true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameBody {
    from_field: String,
    to_field: String,
    table: String,
}

impl From<&RenameHint> for RenameBody {
    fn from(hint: &RenameHint) -> Self {
        Self {
            from_field: hint.from_field.clone(),
            to_field: hint.to_field.clone(),
            table: hint.table.clone(),
        }
    }
}

impl RenameBody {
    fn into_hint(self, created_at: DateTime<Utc>) -> Result<RenameHint> {
        for (field, value) in [
            ("fromField", &self.from_field),
            ("toField", &self.to_field),
            ("table", &self.table),
        ] {
            if value.trim().is_empty() {
                return Err(ReconcileError::InvalidHint(format!("'{field}' is empty")));
            }
        }
        if self.from_field == self.to_field {
            return Err(ReconcileError::InvalidHint(format!(
                "'{}.{}' is renamed to itself",
                self.table, self.from_field
            )));
        }
        Ok(RenameHint::new(
            self.table,
            self.from_field,
            self.to_field,
            created_at,
        ))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HintEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    body: Value,
}

/// The JSON hints file format.
pub struct HintFile;

impl HintFile {
    /// Parses and validates a hints document.
    ///
    /// Entries without `createdAt` are stamped with `now`.
    pub fn parse(json: &str, now: DateTime<Utc>) -> Result<Vec<RenameHint>> {
        let entries: Vec<HintEntry> = serde_json::from_str(json)?;
        entries
            .into_iter()
            .enumerate()
            .map(|(idx, entry)| {
                if entry.kind != RENAME_COLUMN {
                    return Err(ReconcileError::InvalidHint(format!(
                        "entry {idx}: unknown hint type '{}'",
                        entry.kind
                    )));
                }
                let body: RenameBody = serde_json::from_value(entry.body).map_err(|e| {
                    ReconcileError::InvalidHint(format!("entry {idx}: {e}"))
                })?;
                body.into_hint(entry.created_at.unwrap_or(now))
            })
            .collect()
    }

    /// Reads and validates a hints file.
    pub fn load(path: impl AsRef<Path>, now: DateTime<Utc>) -> Result<Vec<RenameHint>> {
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data, now)
    }

    /// Renders hints in the file format.
    pub fn to_json(hints: &[RenameHint]) -> Result<String> {
        let entries = hints
            .iter()
            .map(|hint| {
                serde_json::to_value(RenameBody::from(hint)).map(|body| HintEntry {
                    kind: RENAME_COLUMN.to_string(),
                    created_at: Some(hint.created_at),
                    body,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(serde_json::to_string_pretty(&entries)?)
    }
}

/// Append-only hint log in the target database.
#[derive(Debug, Clone)]
pub struct HintStore {
    pool: SqlitePool,
    table: String,
}

impl HintStore {
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

    /// Ensures the hints table exists.
    pub async fn ensure_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL
)",
            quote(&self.table)
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Appends hints on `conn`, normally the run's open transaction.
    pub async fn append(&self, conn: &mut SqliteConnection, hints: &[RenameHint]) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (kind, body, created_at) VALUES (?, ?, ?)",
            quote(&self.table)
        );
        for hint in hints {
            sqlx::query(&sql)
                .bind(RENAME_COLUMN)
                .bind(serde_json::to_string(&RenameBody::from(hint))?)
                .bind(format_timestamp(hint.created_at))
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    /// Appends hints outside of a run.
    pub async fn record(&self, hints: &[RenameHint]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.append(&mut tx, hints).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Loads every hint in insertion order.
    pub async fn load_all(&self) -> Result<Vec<RenameHint>> {
        self.load_since(None).await
    }

    /// Loads hints recorded strictly after `cutoff`, in insertion order.
    pub async fn load_since(&self, cutoff: Option<DateTime<Utc>>) -> Result<Vec<RenameHint>> {
        let sql = format!(
            "SELECT kind, body, created_at FROM {} ORDER BY id",
            quote(&self.table)
        );
        let rows: Vec<(String, String, String)> =
            sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        let mut hints = Vec::new();
        for (kind, body, created_at) in rows {
            if kind != RENAME_COLUMN {
                warn!(kind = %kind, "Skipping hint of unknown kind");
                continue;
            }
            let body: RenameBody = serde_json::from_str(&body)?;
            let hint = body.into_hint(parse_timestamp(&created_at)?)?;
            if hint.is_active_since(cutoff) {
                hints.push(hint);
            }
        }
        Ok(hints)
    }

    /// Counts stored hints.
    pub async fn count(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote(&self.table));
        let row: (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    async fn store() -> HintStore {
        let store = HintStore::new(create_test_pool().await, DEFAULT_HINTS_TABLE);
        store.ensure_table().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_record_and_load() {
        let store = store().await;
        let now = Utc::now().trunc_subsecs(6);
        let hints = vec![
            RenameHint::new("items", "foo", "food", now),
            RenameHint::new("items", "fogMachine", "brokenFogMachine", now),
        ];

        store.record(&hints).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.load_all().await.unwrap(), hints);
    }

    #[tokio::test]
    async fn test_load_since_filters_strictly_after_cutoff() {
        let store = store().await;
        let cutoff = Utc::now().trunc_subsecs(6);
        store
            .record(&[
                RenameHint::new("t", "a", "b", cutoff - Duration::seconds(5)),
                RenameHint::new("t", "c", "d", cutoff),
                RenameHint::new("t", "e", "f", cutoff + Duration::seconds(5)),
            ])
            .await
            .unwrap();

        let active = store.load_since(Some(cutoff)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].from_field, "e");
        assert_eq!(store.load_since(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_append_rolls_back_with_transaction() {
        let pool = create_test_pool().await;
        let store = HintStore::new(pool.clone(), DEFAULT_HINTS_TABLE);
        store.ensure_table().await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        store
            .append(&mut tx, &[RenameHint::new("t", "a", "b", Utc::now())])
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[test]
    fn test_parse_hint_file() {
        let now = Utc::now().trunc_subsecs(6);
        let hints = HintFile::parse(
            r#"[
                {"type":"renameColumn","createdAt":"2024-03-01T10:00:00Z",
                 "body":{"fromField":"foo","toField":"food","table":"items"}},
                {"type":"renameColumn",
                 "body":{"fromField":"a","toField":"b","table":"items"}}
            ]"#,
            now,
        )
        .unwrap();

        assert_eq!(hints.len(), 2);
        assert_eq!(hints[0].to_field, "food");
        assert_eq!(hints[0].created_at.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert_eq!(hints[1].created_at, now);
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let result = HintFile::parse(
            r#"[{"type":"dropTable","body":{"table":"items"}}]"#,
            Utc::now(),
        );
        assert!(matches!(result, Err(ReconcileError::InvalidHint(_))));
    }

    #[test]
    fn test_parse_rejects_empty_fields() {
        let result = HintFile::parse(
            r#"[{"type":"renameColumn","body":{"fromField":"","toField":"b","table":"t"}}]"#,
            Utc::now(),
        );
        assert!(matches!(result, Err(ReconcileError::InvalidHint(_))));

        let result = HintFile::parse(
            r#"[{"type":"renameColumn","body":{"fromField":"a","table":"t"}}]"#,
            Utc::now(),
        );
        assert!(matches!(result, Err(ReconcileError::InvalidHint(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let now = Utc::now().trunc_subsecs(6);
        let hints = vec![RenameHint::new("items", "foo", "food", now)];
        let json = HintFile::to_json(&hints).unwrap();
        assert!(json.contains("\"renameColumn\""));
        assert_eq!(HintFile::parse(&json, Utc::now()).unwrap(), hints);
    }

    #[test]
    fn test_load_hint_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hints.json");
        std::fs::write(
            &path,
            r#"[{"type":"renameColumn","body":{"fromField":"a","toField":"b","table":"t"}}]"#,
        )
        .unwrap();

        let hints = HintFile::load(&path, Utc::now()).unwrap();
        assert_eq!(hints.len(), 1);
        assert!(matches!(
            HintFile::load(dir.path().join("missing.json"), Utc::now()),
            Err(ReconcileError::Io(_))
        ));
    }
}
