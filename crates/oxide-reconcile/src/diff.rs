//! Snapshot comparison.
//!
//! [`diff`] compares two [`SchemaSnapshot`]s and sorts every difference into
//! `added`, `updated` or `deleted`. A table or column appears in at most one
//! of the three.

use std::collections::BTreeMap;

use crate::attribute::FlatAttribute;
use crate::schema::SchemaSnapshot;

/// Which way a run reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// From the recorded snapshot to the desired schema.
    #[default]
    Forward,
    /// From the desired schema back to the recorded snapshot.
    Backward,
}

impl Direction {
    /// Returns `(from, to)` for this direction.
    #[must_use]
    pub fn sides<'a>(
        self,
        recorded: &'a SchemaSnapshot,
        desired: &'a SchemaSnapshot,
    ) -> (&'a SchemaSnapshot, &'a SchemaSnapshot) {
        match self {
            Self::Forward => (recorded, desired),
            Self::Backward => (desired, recorded),
        }
    }
}

/// One column's entry in a [`Diff`] mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnChange {
    /// The whole column definition.
    Column(FlatAttribute),
    /// Only some option keys of a column that exists on both sides.
    ///
    /// Under `added` these are the keys the new definition introduces; under
    /// `deleted` they are the keys it dropped, with their old values.
    Options(FlatAttribute),
}

impl ColumnChange {
    /// Returns the carried attribute (whole or partial).
    #[must_use]
    pub fn attribute(&self) -> &FlatAttribute {
        match self {
            Self::Column(attr) | Self::Options(attr) => attr,
        }
    }

    /// Returns whether this entry is a whole column.
    #[must_use]
    pub fn is_column(&self) -> bool {
        matches!(self, Self::Column(_))
    }
}

/// Changes of one table, keyed by column name.
pub type TableChanges = BTreeMap<String, ColumnChange>;

/// Classified differences between two snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    /// New tables and columns, and option keys introduced on existing columns.
    pub added: BTreeMap<String, TableChanges>,
    /// Columns whose definition changed.
    pub updated: BTreeMap<String, TableChanges>,
    /// Removed tables and columns, and option keys dropped from existing columns.
    pub deleted: BTreeMap<String, TableChanges>,
}

impl Diff {
    /// Returns whether there is nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Returns the number of column entries across all three mappings.
    #[must_use]
    pub fn change_count(&self) -> usize {
        [&self.added, &self.updated, &self.deleted]
            .iter()
            .flat_map(|side| side.values())
            .map(BTreeMap::len)
            .sum()
    }

    /// Removes a column from `added`, dropping the table entry once empty.
    pub fn take_added(&mut self, table: &str, column: &str) -> Option<ColumnChange> {
        take(&mut self.added, table, column)
    }

    /// Removes a column from `deleted`, dropping the table entry once empty.
    pub fn take_deleted(&mut self, table: &str, column: &str) -> Option<ColumnChange> {
        take(&mut self.deleted, table, column)
    }
}

fn take(
    side: &mut BTreeMap<String, TableChanges>,
    table: &str,
    column: &str,
) -> Option<ColumnChange> {
    let changes = side.get_mut(table)?;
    let change = changes.remove(column);
    if changes.is_empty() {
        side.remove(table);
    }
    change
}

enum Bucket {
    Added,
    Updated,
    Deleted,
}

/// Compares `old` to `new`.
///
/// Swap the arguments (see [`Direction::sides`]) to reconcile backwards.
#[must_use]
pub fn diff(old: &SchemaSnapshot, new: &SchemaSnapshot) -> Diff {
    let mut result = Diff::default();

    for (table, new_columns) in new.tables() {
        let Some(old_columns) = old.table(table) else {
            let changes = new_columns
                .iter()
                .map(|(name, attr)| (name.clone(), ColumnChange::Column(attr.clone())))
                .collect();
            result.added.insert(table.clone(), changes);
            continue;
        };

        for (name, new_attr) in new_columns {
            let Some(old_attr) = old_columns.get(name) else {
                result
                    .added
                    .entry(table.clone())
                    .or_default()
                    .insert(name.clone(), ColumnChange::Column(new_attr.clone()));
                continue;
            };

            if let Some((bucket, change)) = diff_column(old_attr, new_attr) {
                let side = match bucket {
                    Bucket::Added => &mut result.added,
                    Bucket::Updated => &mut result.updated,
                    Bucket::Deleted => &mut result.deleted,
                };
                side.entry(table.clone())
                    .or_default()
                    .insert(name.clone(), change);
            }
        }

        for (name, old_attr) in old_columns {
            if !new_columns.contains_key(name) {
                result
                    .deleted
                    .entry(table.clone())
                    .or_default()
                    .insert(name.clone(), ColumnChange::Column(old_attr.clone()));
            }
        }
    }

    for (table, old_columns) in old.tables() {
        if !new.contains_table(table) {
            let changes = old_columns
                .iter()
                .map(|(name, attr)| (name.clone(), ColumnChange::Column(attr.clone())))
                .collect();
            result.deleted.insert(table.clone(), changes);
        }
    }

    result
}

/// Classifies a column present on both sides.
fn diff_column(old: &FlatAttribute, new: &FlatAttribute) -> Option<(Bucket, ColumnChange)> {
    if old == new {
        return None;
    }

    let removed: Vec<&String> = old.keys().filter(|k| !new.contains_key(k)).collect();
    let introduced: Vec<&String> = new.keys().filter(|k| !old.contains_key(k)).collect();
    let changed = old
        .keys()
        .any(|k| new.get(k).is_some_and(|value| old.get(k) != Some(value)));

    if changed || (!removed.is_empty() && !introduced.is_empty()) {
        Some((Bucket::Updated, ColumnChange::Column(new.clone())))
    } else if !introduced.is_empty() {
        Some((Bucket::Added, ColumnChange::Options(new.subset(introduced))))
    } else {
        Some((Bucket::Deleted, ColumnChange::Options(old.subset(removed))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{Attribute, DataType};
    use crate::schema::{DesiredSchema, TableDefinition};

    fn snapshot(schema: DesiredSchema) -> SchemaSnapshot {
        schema.to_snapshot(&[]).unwrap()
    }

    fn users_and_a() -> SchemaSnapshot {
        snapshot(
            DesiredSchema::new()
                .table(
                    TableDefinition::new("u")
                        .column("name", DataType::Text)
                        .column("a_id", Attribute::new(DataType::Integer).references("a", "id")),
                )
                .table(TableDefinition::new("a").column("addr", DataType::Text)),
        )
    }

    #[test]
    fn test_identical_snapshots_are_empty() {
        let s = users_and_a();
        let d = diff(&s, &s);
        assert!(d.is_empty());
        assert_eq!(d.change_count(), 0);
    }

    #[test]
    fn test_new_tables_are_added_whole() {
        let d = diff(&SchemaSnapshot::new(), &users_and_a());

        assert_eq!(d.added.len(), 2);
        assert_eq!(d.added["u"].len(), 2);
        assert!(d.added["a"]["addr"].is_column());
        assert!(d.updated.is_empty());
        assert!(d.deleted.is_empty());
    }

    #[test]
    fn test_dropped_tables_are_deleted_whole() {
        let d = diff(&users_and_a(), &SchemaSnapshot::new());

        assert_eq!(d.deleted.len(), 2);
        assert!(d.deleted["u"]["name"].is_column());
        assert!(d.added.is_empty());
    }

    #[test]
    fn test_column_added() {
        let old = snapshot(
            DesiredSchema::new().table(TableDefinition::new("a").column("addr", DataType::Text)),
        );
        let new = snapshot(
            DesiredSchema::new().table(
                TableDefinition::new("a")
                    .column("addr", DataType::Text)
                    .column("zip", DataType::Text),
            ),
        );

        let d = diff(&old, &new);
        assert_eq!(d.change_count(), 1);
        assert!(d.added["a"]["zip"].is_column());
    }

    #[test]
    fn test_column_dropped() {
        let old = snapshot(
            DesiredSchema::new().table(
                TableDefinition::new("a")
                    .column("addr", DataType::Text)
                    .column("zip", DataType::Text),
            ),
        );
        let new = snapshot(
            DesiredSchema::new().table(TableDefinition::new("a").column("addr", DataType::Text)),
        );

        let d = diff(&old, &new);
        assert_eq!(d.change_count(), 1);
        assert!(d.deleted["a"]["zip"].is_column());
    }

    #[test]
    fn test_changed_type_is_updated() {
        let old = snapshot(
            DesiredSchema::new().table(TableDefinition::new("a").column("n", DataType::Integer)),
        );
        let new = snapshot(
            DesiredSchema::new().table(TableDefinition::new("a").column("n", DataType::BigInt)),
        );

        let d = diff(&old, &new);
        assert_eq!(d.change_count(), 1);
        assert_eq!(d.updated["a"]["n"].attribute().type_key(), Some("BIGINT"));
    }

    #[test]
    fn test_introduced_option_is_partial_add() {
        let old = snapshot(
            DesiredSchema::new().table(TableDefinition::new("a").column("n", DataType::Text)),
        );
        let new = snapshot(DesiredSchema::new().table(
            TableDefinition::new("a").column("n", Attribute::new(DataType::Text).unique()),
        ));

        let d = diff(&old, &new);
        assert_eq!(d.change_count(), 1);
        match &d.added["a"]["n"] {
            ColumnChange::Options(attr) => {
                assert_eq!(attr.len(), 1);
                assert!(attr.contains_key("unique"));
            }
            other => panic!("expected options, got {other:?}"),
        }
    }

    #[test]
    fn test_dropped_option_is_partial_delete() {
        let old = snapshot(DesiredSchema::new().table(
            TableDefinition::new("a").column("n", Attribute::new(DataType::Text).not_null()),
        ));
        let new = snapshot(
            DesiredSchema::new().table(TableDefinition::new("a").column("n", DataType::Text)),
        );

        let d = diff(&old, &new);
        assert_eq!(d.change_count(), 1);
        match &d.deleted["a"]["n"] {
            ColumnChange::Options(attr) => assert!(attr.contains_key("allowNull")),
            other => panic!("expected options, got {other:?}"),
        }
    }

    #[test]
    fn test_backward_swaps_sides() {
        let recorded = SchemaSnapshot::new();
        let desired = users_and_a();

        let (from, to) = Direction::Backward.sides(&recorded, &desired);
        let d = diff(from, to);
        assert_eq!(d.deleted.len(), 2);
        assert!(d.added.is_empty());
    }

    #[test]
    fn test_take_cleans_up_empty_tables() {
        let mut d = diff(&SchemaSnapshot::new(), &users_and_a());
        assert!(d.take_added("a", "addr").is_some());
        assert!(!d.added.contains_key("a"));
        assert!(d.take_added("a", "addr").is_none());
        assert!(d.take_deleted("missing", "x").is_none());
    }
}
