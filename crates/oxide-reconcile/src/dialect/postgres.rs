//! PostgreSQL dialect.
//!
//! Auto-incrementing integer keys are declared with the `SERIAL` family of
//! pseudo-types, which PostgreSQL only accepts at creation time. Alters and
//! renames therefore spell them out as the base integer type plus a
//! `nextval` default on the column's sequence.

use crate::attribute::{Attribute, DataType, Reference, ReferentialAction};
use crate::operations::{sequence_name, Operation, SequenceRename};

use super::{create_table_sql, ReconcileDialect};

/// PostgreSQL reconcile dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Statements bringing `table`.`column` to `attribute`.
    ///
    /// UNIQUE and FOREIGN KEY constraints are only added or dropped when they
    /// differ from `previous`; with no previous definition both are added.
    /// Dropped constraints use PostgreSQL's default names, derived from
    /// `owner`, the column name the constraints were created under.
    fn alter_column_sql(
        &self,
        table: &str,
        column: &str,
        owner: &str,
        attribute: &Attribute,
        previous: Option<&Attribute>,
    ) -> Vec<String> {
        let table_ident = self.quote_identifier(table);
        let column_ident = self.quote_identifier(column);
        let prefix = format!("ALTER TABLE {table_ident} ALTER COLUMN {column_ident}");
        let mut sql = Vec::new();

        if attribute.is_nullable() {
            sql.push(format!("{prefix} DROP NOT NULL"));
        } else {
            sql.push(format!("{prefix} SET NOT NULL"));
        }

        let (type_name, default) = match self.expand_auto_increment(table, column, attribute) {
            Some((base, default)) => (base, Some(default)),
            None => (
                self.type_name(&attribute.data_type),
                attribute
                    .default_value
                    .as_ref()
                    .map(|value| self.render_default(value)),
            ),
        };

        match default {
            Some(default) => sql.push(format!("{prefix} SET DEFAULT {default}")),
            None => sql.push(format!("{prefix} DROP DEFAULT")),
        }

        sql.push(format!(
            "{prefix} TYPE {type_name} USING ({column_ident}::{type_name})"
        ));

        let unique = has_unique(attribute);
        let had_unique = previous.is_some_and(has_unique);
        if had_unique && !unique {
            sql.push(format!(
                "ALTER TABLE {table_ident} DROP CONSTRAINT IF EXISTS {}",
                self.quote_identifier(&format!("{table}_{owner}_key"))
            ));
        }
        if unique && !had_unique {
            sql.push(format!("ALTER TABLE {table_ident} ADD UNIQUE ({column_ident})"));
        }

        let current_foreign_key = foreign_key(attribute);
        let previous_foreign_key = previous.and_then(foreign_key);
        if current_foreign_key != previous_foreign_key {
            if previous_foreign_key.is_some() {
                sql.push(format!(
                    "ALTER TABLE {table_ident} DROP CONSTRAINT IF EXISTS {}",
                    self.quote_identifier(&format!("{table}_{owner}_fkey"))
                ));
            }
            if let Some((reference, on_delete, on_update)) = current_foreign_key {
                let mut fk = format!(
                    "ALTER TABLE {table_ident} ADD FOREIGN KEY ({column_ident}) REFERENCES {} ({})",
                    self.quote_identifier(&reference.table),
                    self.quote_identifier(&reference.key)
                );
                if let Some(action) = on_delete {
                    fk.push_str(" ON DELETE ");
                    fk.push_str(action.as_sql());
                }
                if let Some(action) = on_update {
                    fk.push_str(" ON UPDATE ");
                    fk.push_str(action.as_sql());
                }
                sql.push(fk);
            }
        }

        sql
    }

    fn sequence_sql(
        &self,
        table: &str,
        column: &str,
        attribute: &Attribute,
        sequence: &SequenceRename,
    ) -> Vec<String> {
        let to = self.quote_identifier(&sequence.to);
        vec![
            format!(
                "ALTER SEQUENCE IF EXISTS {} RENAME TO {to}",
                self.quote_identifier(&sequence.from)
            ),
            format!(
                "CREATE SEQUENCE IF NOT EXISTS {to} AS {}",
                self.type_name(&attribute.data_type).to_lowercase()
            ),
            format!(
                "ALTER SEQUENCE IF EXISTS {to} OWNED BY {}.{}",
                self.quote_identifier(table),
                self.quote_identifier(column)
            ),
        ]
    }
}

type ForeignKey<'a> = (
    &'a Reference,
    Option<ReferentialAction>,
    Option<ReferentialAction>,
);

fn foreign_key(attribute: &Attribute) -> Option<ForeignKey<'_>> {
    attribute
        .references
        .as_ref()
        .map(|reference| (reference, attribute.on_delete, attribute.on_update))
}

// a primary key's own constraint covers uniqueness
fn has_unique(attribute: &Attribute) -> bool {
    attribute.is_unique() && !attribute.is_primary_key()
}

impl ReconcileDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn generate_sql(&self, operation: &Operation) -> Vec<String> {
        match operation {
            Operation::CreateTable { table, columns } => {
                vec![create_table_sql(self, table, columns)]
            }

            Operation::DropTable { table } => vec![format!(
                "DROP TABLE IF EXISTS {} CASCADE",
                self.quote_identifier(table)
            )],

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
                table,
                from,
                to,
                attribute,
                previous,
                sequence,
            } => {
                let mut sql = vec![format!(
                    "ALTER TABLE {} RENAME COLUMN {} TO {}",
                    self.quote_identifier(table),
                    self.quote_identifier(from),
                    self.quote_identifier(to)
                )];
                if let Some(sequence) = sequence {
                    sql.extend(self.sequence_sql(table, to, attribute, sequence));
                }
                sql.extend(self.alter_column_sql(
                    table,
                    to,
                    from,
                    attribute,
                    previous.as_ref(),
                ));
                sql
            }

            Operation::AlterColumn {
                table,
                column,
                attribute,
                previous,
            } => self.alter_column_sql(table, column, column, attribute, previous.as_ref()),
        }
    }

    fn type_name(&self, data_type: &DataType) -> String {
        match data_type {
            DataType::Integer => "INTEGER".to_string(),
            DataType::BigInt => "BIGINT".to_string(),
            DataType::SmallInt => "SMALLINT".to_string(),
            DataType::Float => "REAL".to_string(),
            DataType::Double => "DOUBLE PRECISION".to_string(),
            DataType::Decimal { precision, scale } => match (precision, scale) {
                (Some(p), Some(s)) => format!("DECIMAL({p}, {s})"),
                (Some(p), None) => format!("DECIMAL({p})"),
                _ => "DECIMAL".to_string(),
            },
            DataType::String { length } => format!("VARCHAR({})", length.unwrap_or(255)),
            DataType::Char { length } => match length {
                Some(n) => format!("CHAR({n})"),
                None => "CHAR".to_string(),
            },
            DataType::Text | DataType::Enum { .. } => "TEXT".to_string(),
            DataType::Boolean => "BOOLEAN".to_string(),
            DataType::Date => "TIMESTAMP WITH TIME ZONE".to_string(),
            DataType::DateOnly => "DATE".to_string(),
            DataType::Time => "TIME".to_string(),
            DataType::Uuid => "UUID".to_string(),
            DataType::Json => "JSON".to_string(),
            DataType::Jsonb => "JSONB".to_string(),
            DataType::Blob => "BYTEA".to_string(),
            DataType::Vector { dimensions } => match dimensions {
                Some(n) => format!("VECTOR({n})"),
                None => "VECTOR".to_string(),
            },
        }
    }

    fn auto_increment_keyword(&self) -> &'static str {
        // the SERIAL pseudo-types carry it
        ""
    }

    fn column_type(&self, attribute: &Attribute) -> String {
        if attribute.is_auto_increment() {
            match attribute.data_type {
                DataType::Integer => return "SERIAL".to_string(),
                DataType::BigInt => return "BIGSERIAL".to_string(),
                DataType::SmallInt => return "SMALLSERIAL".to_string(),
                _ => {}
            }
        }
        self.type_name(&attribute.data_type)
    }

    fn expand_auto_increment(
        &self,
        table: &str,
        column: &str,
        attribute: &Attribute,
    ) -> Option<(String, String)> {
        if !(attribute.is_auto_increment() && attribute.data_type.is_integer()) {
            return None;
        }
        let sequence = self.quote_identifier(&sequence_name(table, column));
        Some((
            self.type_name(&attribute.data_type),
            format!("nextval('{sequence}'::regclass)"),
        ))
    }
}
