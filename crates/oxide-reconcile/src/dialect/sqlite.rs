//! SQLite dialect.
//!
//! SQLite has no ALTER COLUMN. Rendered on its own, a column change is a
//! note; during execution the table is rebuilt instead (create a staging
//! table, copy the rows, drop the old table, rename the staging table).
//! Columns carry no separate sequence objects, so sequence renames are
//! dropped.

use crate::attribute::{DataType, DefaultValue};
use crate::operations::Operation;

use super::{create_table_sql, ReconcileDialect};

/// SQLite reconcile dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ReconcileDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn generate_sql(&self, operation: &Operation) -> Vec<String> {
        match operation {
            Operation::CreateTable { table, columns } => {
                vec![create_table_sql(self, table, columns)]
            }

            Operation::DropTable { table } => {
                vec![format!("DROP TABLE {}", self.quote_identifier(table))]
            }

            Operation::AddColumn {
                table,
                column,
                attribute,
            } => vec![format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.quote_identifier(table),
                self.column_definition(column, attribute)
            )],

            Operation::DropColumn { table, column } => vec![format!(
                "ALTER TABLE {} DROP COLUMN {}",
                self.quote_identifier(table),
                self.quote_identifier(column)
            )],

            Operation::RenameColumn {
                table, from, to, ..
            } => vec![format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                self.quote_identifier(table),
                self.quote_identifier(from),
                self.quote_identifier(to)
            )],

            Operation::AlterColumn { table, column, .. } => vec![format!(
                "-- ALTER COLUMN not supported in SQLite. \
                 Table recreation required for: {table}.{column}"
            )],
        }
    }

    fn type_name(&self, data_type: &DataType) -> String {
        match data_type {
            DataType::Integer | DataType::BigInt | DataType::SmallInt | DataType::Boolean => {
                "INTEGER".to_string()
            }
            DataType::Float | DataType::Double => "REAL".to_string(),
            DataType::Decimal { .. } => "NUMERIC".to_string(),
            DataType::Blob | DataType::Vector { .. } => "BLOB".to_string(),
            DataType::String { .. }
            | DataType::Char { .. }
            | DataType::Text
            | DataType::Date
            | DataType::DateOnly
            | DataType::Time
            | DataType::Uuid
            | DataType::Json
            | DataType::Jsonb
            | DataType::Enum { .. } => "TEXT".to_string(),
        }
    }

    fn auto_increment_keyword(&self) -> &'static str {
        "AUTOINCREMENT"
    }

    fn supports_alter_column(&self) -> bool {
        false
    }

    fn render_default(&self, value: &DefaultValue) -> String {
        match value {
            DefaultValue::Bool(b) => i32::from(*b).to_string(),
            DefaultValue::Expression(expr) => format!("({expr})"),
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::Integer(n) => n.to_string(),
            DefaultValue::Float(f) => f.to_string(),
            DefaultValue::String(s) => format!("'{}'", s.replace('\'', "''")),
            DefaultValue::Now => "CURRENT_TIMESTAMP".to_string(),
        }
    }
}
