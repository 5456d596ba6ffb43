//! Plan building.
//!
//! [`PlanBuilder`] turns a resolved [`Diff`] into an ordered list of
//! [`Operation`]s: phases follow [`Phase`] order, created tables come after
//! the tables they reference and dropped tables come before them.

use std::collections::{BTreeSet, HashMap};

use crate::attribute::{Attribute, FlatAttribute};
use crate::diff::{ColumnChange, Diff};
use crate::error::{ReconcileError, Result};
use crate::operations::{Operation, Phase};
use crate::resolver::Resolution;
use crate::schema::{Column, SchemaSnapshot};

/// An ordered list of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    operations: Vec<Operation>,
}

impl Plan {
    /// Returns the operations in execution order.
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Returns the number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns whether there is nothing to execute.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Counts operations of one phase.
    #[must_use]
    pub fn count(&self, phase: Phase) -> usize {
        self.operations.iter().filter(|op| op.phase() == phase).count()
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

/// Builds a [`Plan`] for one run.
pub struct PlanBuilder<'a> {
    old: &'a SchemaSnapshot,
    new: &'a SchemaSnapshot,
    create_order: &'a [String],
}

impl<'a> PlanBuilder<'a> {
    /// Creates a builder for the change from `old` to `new`.
    ///
    /// `create_order` is the dependency order of the target side; tables it
    /// does not list are created last, by name.
    #[must_use]
    pub fn new(
        old: &'a SchemaSnapshot,
        new: &'a SchemaSnapshot,
        create_order: &'a [String],
    ) -> Self {
        Self {
            old,
            new,
            create_order,
        }
    }

    /// Builds the plan.
    ///
    /// Fails if an attribute cannot be hydrated or if the recorded foreign
    /// keys of the source side form a cycle.
    pub fn build(&self, diff: &Diff, resolution: &Resolution) -> Result<Plan> {
        let mut operations = Vec::new();
        let mut dropped_tables = BTreeSet::new();
        let mut created_tables = BTreeSet::new();

        for (table, changes) in &diff.deleted {
            if !self.new.contains_table(table) {
                dropped_tables.insert(table.as_str());
                continue;
            }
            for (column, change) in changes {
                match change {
                    ColumnChange::Column(_) => {
                        operations.push(Operation::drop_column(table, column));
                    }
                    ColumnChange::Options(removed) => {
                        let merged = match self.old.column(table, column) {
                            Some(old) => old.without(removed.keys()),
                            None => removed.clone(),
                        };
                        operations.push(
                            Operation::alter_column(table, column, merged.hydrate()?)
                                .with_previous(self.previous(table, column)?),
                        );
                    }
                }
            }
        }

        for table in self.drop_order(&dropped_tables)? {
            operations.push(Operation::drop_table(table));
        }

        for (table, changes) in &diff.added {
            if !self.old.contains_table(table) {
                created_tables.insert(table.as_str());
                continue;
            }
            for (column, change) in changes {
                match change {
                    ColumnChange::Column(attr) if !self.old.contains_column(table, column) => {
                        operations.push(Operation::add_column(table, column, attr.hydrate()?));
                    }
                    ColumnChange::Column(attr) => {
                        operations.push(
                            Operation::alter_column(table, column, attr.hydrate()?)
                                .with_previous(self.previous(table, column)?),
                        );
                    }
                    ColumnChange::Options(_) => {
                        let full = target_column(self.new, table, column)?;
                        operations.push(
                            Operation::alter_column(table, column, full.hydrate()?)
                                .with_previous(self.previous(table, column)?),
                        );
                    }
                }
            }
        }

        for table in self.creation_order(&created_tables) {
            let columns = diff
                .added
                .get(table)
                .into_iter()
                .flatten()
                .map(|(name, change)| {
                    change
                        .attribute()
                        .hydrate()
                        .map(|attribute| Column::new(name, attribute))
                })
                .collect::<Result<Vec<_>>>()?;
            operations.push(Operation::create_table(table, columns));
        }

        for rename in &resolution.renames {
            operations.push(
                Operation::rename_column(
                    &rename.table,
                    &rename.from,
                    &rename.to,
                    rename.attribute.clone(),
                )
                .with_previous(Some(rename.previous.clone())),
            );
        }

        for (table, changes) in &diff.updated {
            for (column, change) in changes {
                operations.push(
                    Operation::alter_column(table, column, change.attribute().hydrate()?)
                        .with_previous(self.previous(table, column)?),
                );
            }
        }

        operations.sort_by_key(Operation::phase);
        Ok(Plan { operations })
    }

    /// Recorded definition of a column on the source side.
    fn previous(&self, table: &str, column: &str) -> Result<Option<Attribute>> {
        self.old.column(table, column).map(FlatAttribute::hydrate).transpose()
    }

    /// Dropped tables, dependents first.
    fn drop_order<'t>(&self, dropped: &BTreeSet<&'t str>) -> Result<Vec<&'t str>> {
        let order = self.old.topological_order()?;
        let rank: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();
        let mut tables: Vec<&str> = dropped.iter().copied().collect();
        tables.sort_by_key(|t| std::cmp::Reverse(rank.get(t).copied().unwrap_or(0)));
        Ok(tables)
    }

    /// Created tables, most depended-upon first.
    fn creation_order<'t>(&self, created: &BTreeSet<&'t str>) -> Vec<&'t str> {
        let rank: HashMap<&str, usize> = self
            .create_order
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();
        let mut tables: Vec<&str> = created.iter().copied().collect();
        tables.sort_by_key(|t| rank.get(t).copied().unwrap_or(usize::MAX));
        tables
    }
}

fn target_column<'s>(
    snapshot: &'s SchemaSnapshot,
    table: &str,
    column: &str,
) -> Result<&'s FlatAttribute> {
    snapshot.column(table, column).ok_or_else(|| {
        ReconcileError::InvalidSnapshot(format!("column '{table}.{column}' missing from target"))
    })
}
