//! Database dialect implementations.
//!
//! A dialect renders each [`Operation`] as SQL statements. Statements that
//! start with `--` are notes about something the dialect cannot express;
//! the executor logs and skips them.
//!
//! Dialects without in-place column changes report it through
//! [`ReconcileDialect::supports_alter_column`]; the executor then rebuilds
//! the affected tables with [`ReconcileDialect::recreate_table_sql`].

mod postgres;
mod sqlite;

pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use crate::attribute::{Attribute, DataType, DefaultValue};
use crate::operations::Operation;
use crate::schema::Column;

/// Trait for database-specific SQL generation.
pub trait ReconcileDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Generates SQL for an operation.
    fn generate_sql(&self, operation: &Operation) -> Vec<String>;

    /// Returns the SQL type name for the given type.
    fn type_name(&self, data_type: &DataType) -> String;

    /// Returns the auto-increment keyword placed after `PRIMARY KEY`.
    fn auto_increment_keyword(&self) -> &'static str;

    /// Returns whether column definitions can be changed in place.
    fn supports_alter_column(&self) -> bool {
        true
    }

    /// Statements rebuilding `table` with `columns` while keeping its rows.
    ///
    /// Rows are copied by column name, so every column in `columns` must
    /// already exist in the live table.
    fn recreate_table_sql(&self, table: &str, columns: &[Column]) -> Vec<String> {
        let staging = format!("{table}__rebuild");
        let names = columns
            .iter()
            .map(|c| self.quote_identifier(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        vec![
            create_table_sql(self, &staging, columns),
            format!(
                "INSERT INTO {} ({names}) SELECT {names} FROM {}",
                self.quote_identifier(&staging),
                self.quote_identifier(table)
            ),
            format!("DROP TABLE {}", self.quote_identifier(table)),
            format!(
                "ALTER TABLE {} RENAME TO {}",
                self.quote_identifier(&staging),
                self.quote_identifier(table)
            ),
        ]
    }

    /// Returns the declared type of a column in a column definition.
    fn column_type(&self, attribute: &Attribute) -> String {
        self.type_name(&attribute.data_type)
    }

    /// Returns the base type and default expression standing in for an
    /// auto-increment pseudo-type when a column is altered.
    fn expand_auto_increment(
        &self,
        _table: &str,
        _column: &str,
        _attribute: &Attribute,
    ) -> Option<(String, String)> {
        None
    }

    /// Renders a default value.
    fn render_default(&self, value: &DefaultValue) -> String {
        match value {
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::Bool(b) => String::from(if *b { "TRUE" } else { "FALSE" }),
            DefaultValue::Integer(n) => n.to_string(),
            DefaultValue::Float(f) => f.to_string(),
            DefaultValue::String(s) => format!("'{}'", s.replace('\'', "''")),
            DefaultValue::Expression(expr) => expr.clone(),
            DefaultValue::Now => "CURRENT_TIMESTAMP".to_string(),
        }
    }

    /// Generates column definition SQL.
    fn column_definition(&self, name: &str, attribute: &Attribute) -> String {
        let mut parts = vec![self.quote_identifier(name), self.column_type(attribute)];

        if attribute.is_primary_key() {
            parts.push("PRIMARY KEY".to_string());
            let keyword = self.auto_increment_keyword();
            if attribute.is_auto_increment() && !keyword.is_empty() {
                parts.push(keyword.to_string());
            }
        } else {
            if !attribute.is_nullable() {
                parts.push("NOT NULL".to_string());
            }
            if attribute.is_unique() {
                parts.push("UNIQUE".to_string());
            }
        }

        if let Some(default) = &attribute.default_value {
            parts.push(format!("DEFAULT {}", self.render_default(default)));
        }

        if let Some(reference) = &attribute.references {
            parts.push(format!(
                "REFERENCES {} ({})",
                self.quote_identifier(&reference.table),
                self.quote_identifier(&reference.key)
            ));
            if let Some(action) = attribute.on_delete {
                parts.push(format!("ON DELETE {}", action.as_sql()));
            }
            if let Some(action) = attribute.on_update {
                parts.push(format!("ON UPDATE {}", action.as_sql()));
            }
        }

        parts.join(" ")
    }

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Renders a `CREATE TABLE` statement.
fn create_table_sql<D>(dialect: &D, table: &str, columns: &[Column]) -> String
where
    D: ReconcileDialect + ?Sized,
{
    let defs: Vec<String> = columns
        .iter()
        .map(|c| dialect.column_definition(&c.name, &c.attribute))
        .collect();
    format!(
        "CREATE TABLE {} (\n  {}\n)",
        dialect.quote_identifier(table),
        defs.join(",\n  ")
    )
}
