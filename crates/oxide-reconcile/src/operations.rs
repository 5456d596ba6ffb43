//! Structural operations.
//!
//! A [`Plan`](crate::plan::Plan) is a list of [`Operation`]s. Each one maps to
//! a call on the schema-mutation interface and is rendered to SQL by a
//! [`ReconcileDialect`](crate::dialect::ReconcileDialect).

use std::fmt;

use crate::attribute::Attribute;
use crate::schema::Column;

/// Execution phase of an operation.
///
/// Phases run in declaration order; operations keep their relative order
/// within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Column removals.
    DropColumn,
    /// Table removals.
    DropTable,
    /// Table creations.
    CreateTable,
    /// Column renames and their sequences.
    RenameColumn,
    /// Column additions.
    AddColumn,
    /// Column definition changes.
    AlterColumn,
}

/// Rename of the sequence backing an auto-incrementing column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRename {
    /// Current sequence name.
    pub from: String,
    /// Sequence name matching the renamed column.
    pub to: String,
}

impl SequenceRename {
    /// Sequence rename for `table`.`from` becoming `table`.`to`.
    #[must_use]
    pub fn for_column(table: &str, from: &str, to: &str) -> Self {
        Self {
            from: sequence_name(table, from),
            to: sequence_name(table, to),
        }
    }
}

/// Name of the sequence owned by `table`.`column`.
#[must_use]
pub fn sequence_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_seq")
}

/// A single structural change.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Create a table with all its columns.
    CreateTable {
        /// Table name.
        table: String,
        /// Column definitions.
        columns: Vec<Column>,
    },
    /// Drop a table.
    DropTable {
        /// Table name.
        table: String,
    },
    /// Add a column to an existing table.
    AddColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Column definition.
        attribute: Attribute,
    },
    /// Change a column's definition to `attribute`.
    AlterColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Target definition.
        attribute: Attribute,
        /// Definition being replaced, when known.
        previous: Option<Attribute>,
    },
    /// Drop a column.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// Rename a column, then bring it to `attribute`.
    RenameColumn {
        /// Table name.
        table: String,
        /// Old column name.
        from: String,
        /// New column name.
        to: String,
        /// Definition under the new name.
        attribute: Attribute,
        /// Definition under the old name, when known.
        previous: Option<Attribute>,
        /// Backing sequence to rename along, for auto-incrementing columns.
        sequence: Option<SequenceRename>,
    },
}

impl Operation {
    /// Creates a `CreateTable` operation.
    #[must_use]
    pub fn create_table(table: impl Into<String>, columns: Vec<Column>) -> Self {
        Self::CreateTable {
            table: table.into(),
            columns,
        }
    }

    /// Creates a `DropTable` operation.
    #[must_use]
    pub fn drop_table(table: impl Into<String>) -> Self {
        Self::DropTable {
            table: table.into(),
        }
    }

    /// Creates an `AddColumn` operation.
    #[must_use]
    pub fn add_column(
        table: impl Into<String>,
        column: impl Into<String>,
        attribute: Attribute,
    ) -> Self {
        Self::AddColumn {
            table: table.into(),
            column: column.into(),
            attribute,
        }
    }

    /// Creates an `AlterColumn` operation.
    #[must_use]
    pub fn alter_column(
        table: impl Into<String>,
        column: impl Into<String>,
        attribute: Attribute,
    ) -> Self {
        Self::AlterColumn {
            table: table.into(),
            column: column.into(),
            attribute,
            previous: None,
        }
    }

    /// Creates a `DropColumn` operation.
    #[must_use]
    pub fn drop_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::DropColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Creates a `RenameColumn` operation.
    ///
    /// Auto-incrementing columns get a [`SequenceRename`].
    #[must_use]
    pub fn rename_column(
        table: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        attribute: Attribute,
    ) -> Self {
        let (table, from, to) = (table.into(), from.into(), to.into());
        let sequence = attribute
            .is_auto_increment()
            .then(|| SequenceRename::for_column(&table, &from, &to));
        Self::RenameColumn {
            table,
            from,
            to,
            attribute,
            previous: None,
            sequence,
        }
    }

    /// Records the definition an alter or rename starts from.
    ///
    /// Dialects use it to leave unchanged constraints alone. Other
    /// operations are returned as is.
    #[must_use]
    pub fn with_previous(mut self, definition: Option<Attribute>) -> Self {
        match &mut self {
            Self::AlterColumn { previous, .. } | Self::RenameColumn { previous, .. } => {
                *previous = definition;
            }
            _ => {}
        }
        self
    }

    /// Returns the column definition this operation ends with, if it
    /// changes one in place.
    #[must_use]
    pub fn altered(&self) -> Option<(&str, &Attribute, Option<&Attribute>)> {
        match self {
            Self::AlterColumn {
                column,
                attribute,
                previous,
                ..
            } => Some((column.as_str(), attribute, previous.as_ref())),
            Self::RenameColumn {
                to,
                attribute,
                previous,
                ..
            } => Some((to.as_str(), attribute, previous.as_ref())),
            _ => None,
        }
    }

    /// Returns the phase this operation runs in.
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            Self::DropColumn { .. } => Phase::DropColumn,
            Self::DropTable { .. } => Phase::DropTable,
            Self::CreateTable { .. } => Phase::CreateTable,
            Self::RenameColumn { .. } => Phase::RenameColumn,
            Self::AddColumn { .. } => Phase::AddColumn,
            Self::AlterColumn { .. } => Phase::AlterColumn,
        }
    }

    /// Returns the table this operation touches.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { table, .. }
            | Self::DropTable { table }
            | Self::AddColumn { table, .. }
            | Self::AlterColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::RenameColumn { table, .. } => table,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable { table, .. } => write!(f, "create table '{table}'"),
            Self::DropTable { table } => write!(f, "drop table '{table}'"),
            Self::AddColumn { table, column, .. } => {
                write!(f, "add column '{column}' to table '{table}'")
            }
            Self::AlterColumn { table, column, .. } => {
                write!(f, "alter column '{column}' in table '{table}'")
            }
            Self::DropColumn { table, column } => {
                write!(f, "drop column '{column}' from table '{table}'")
            }
            Self::RenameColumn {
                table, from, to, ..
            } => write!(f, "rename column '{from}' to '{to}' in table '{table}'"),
        }
    }
}
