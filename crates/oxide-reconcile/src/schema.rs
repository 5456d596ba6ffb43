//! Schema representation types.
//!
//! [`DesiredSchema`] is what the model layer hands to the engine: tables in
//! declaration order, each with ordered, typed columns. [`SchemaSnapshot`] is
//! the flattened form that gets diffed and persisted.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::attribute::{flatten, Attribute, FlatAttribute};
use crate::error::{ReconcileError, Result};

/// A named column of a desired table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column attribute.
    #[serde(flatten)]
    pub attribute: Attribute,
}

impl Column {
    /// Creates a new column.
    #[must_use]
    pub fn new(name: impl Into<String>, attribute: impl Into<Attribute>) -> Self {
        Self {
            name: name.into(),
            attribute: attribute.into(),
        }
    }
}

/// A table of the desired schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl TableDefinition {
    /// Creates an empty table definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, attribute: impl Into<Attribute>) -> Self {
        self.columns.push(Column::new(name, attribute));
        self
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns the tables this table references through foreign keys.
    fn dependencies(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter_map(|c| c.attribute.references.as_ref())
            .map(|r| r.table.clone())
            .collect()
    }
}

/// The schema the database should end up with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredSchema {
    /// Tables in declaration order.
    #[serde(default)]
    pub tables: Vec<TableDefinition>,
}

impl DesiredSchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table.
    #[must_use]
    pub fn table(mut self, table: TableDefinition) -> Self {
        self.tables.push(table);
        self
    }

    /// Gets a table by name.
    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Parses a schema from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a schema from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Returns table names ordered so that every table comes after the
    /// tables it references (most depended-upon first).
    ///
    /// Fails with [`ReconcileError::CircularDependency`] when the foreign-key
    /// graph has a cycle.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let nodes: Vec<(String, Vec<String>)> = self
            .tables
            .iter()
            .map(|t| (t.name.clone(), t.dependencies()))
            .collect();
        sort_by_dependencies(&nodes)
    }

    /// Flattens the schema into a snapshot, leaving out `excluded` tables.
    pub fn to_snapshot(&self, excluded: &[&str]) -> Result<SchemaSnapshot> {
        let mut snapshot = SchemaSnapshot::new();
        for table in &self.tables {
            if excluded.contains(&table.name.as_str()) {
                continue;
            }
            let mut columns = TableColumns::new();
            for column in &table.columns {
                columns.insert(column.name.clone(), flatten(&column.attribute)?);
            }
            snapshot.insert_table(table.name.clone(), columns);
        }
        Ok(snapshot)
    }
}

/// Flattened columns of one table, keyed by column name.
pub type TableColumns = BTreeMap<String, FlatAttribute>;

/// Flattened schema: table name to column name to attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaSnapshot(BTreeMap<String, TableColumns>);

impl SchemaSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a table.
    pub fn insert_table(&mut self, name: impl Into<String>, columns: TableColumns) {
        self.0.insert(name.into(), columns);
    }

    /// Gets the columns of a table.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableColumns> {
        self.0.get(name)
    }

    /// Gets one column.
    #[must_use]
    pub fn column(&self, table: &str, column: &str) -> Option<&FlatAttribute> {
        self.0.get(table)?.get(column)
    }

    /// Returns whether the table exists.
    #[must_use]
    pub fn contains_table(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Returns whether the column exists.
    #[must_use]
    pub fn contains_column(&self, table: &str, column: &str) -> bool {
        self.column(table, column).is_some()
    }

    /// Iterates over tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = (&String, &TableColumns)> {
        self.0.iter()
    }

    /// Returns the number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the snapshot has no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a copy without the given tables.
    #[must_use]
    pub fn without_tables(&self, excluded: &[&str]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(name, _)| !excluded.contains(&name.as_str()))
                .map(|(name, columns)| (name.clone(), columns.clone()))
                .collect(),
        )
    }

    /// Returns table names ordered by recorded foreign keys, most
    /// depended-upon first.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let nodes: Vec<(String, Vec<String>)> = self
            .0
            .iter()
            .map(|(name, columns)| {
                let deps = columns
                    .values()
                    .filter_map(FlatAttribute::referenced_table)
                    .map(str::to_string)
                    .collect();
                (name.clone(), deps)
            })
            .collect();
        sort_by_dependencies(&nodes)
    }
}

/// Orders `(table, referenced tables)` pairs so dependencies come first.
///
/// Self-references and references to unknown tables are ignored. Among tables
/// that are ready at the same time, input order is kept.
pub(crate) fn sort_by_dependencies(nodes: &[(String, Vec<String>)]) -> Result<Vec<String>> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    for (idx, (name, _)) in nodes.iter().enumerate() {
        position.entry(name.as_str()).or_insert(idx);
    }

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (name, deps) in nodes {
        let name = name.as_str();
        in_degree.entry(name).or_insert(0);
        let deps: BTreeSet<&str> = deps
            .iter()
            .map(String::as_str)
            .filter(|dep| *dep != name && position.contains_key(dep))
            .collect();
        for dep in deps {
            *in_degree.entry(name).or_insert(0) += 1;
            dependents.entry(dep).or_default().push(name);
        }
    }

    // Kahn's algorithm, taking ready tables in input order
    let mut ready: BTreeSet<(usize, &str)> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(name, _)| (position[name], *name))
        .collect();
    let mut result = Vec::with_capacity(in_degree.len());

    while let Some((_, name)) = ready.pop_first() {
        result.push(name.to_string());
        if let Some(children) = dependents.get(name) {
            for child in children {
                if let Some(deg) = in_degree.get_mut(child) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert((position[child], *child));
                    }
                }
            }
        }
    }

    if result.len() != in_degree.len() {
        let mut stuck: Vec<(usize, &str)> = in_degree
            .iter()
            .filter(|(_, deg)| **deg > 0)
            .map(|(name, _)| (position[name], *name))
            .collect();
        stuck.sort_unstable();
        return Err(ReconcileError::CircularDependency(
            stuck.into_iter().map(|(_, name)| name.to_string()).collect(),
        ));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::DataType;

    fn fk(table: &str) -> Attribute {
        Attribute::new(DataType::Integer).references(table, "id")
    }

    #[test]
    fn test_topological_order_puts_referenced_first() {
        let schema = DesiredSchema::new()
            .table(TableDefinition::new("u").column("a_id", fk("a")))
            .table(TableDefinition::new("a").column("addr", DataType::Text));

        assert_eq!(schema.topological_order().unwrap(), vec!["a", "u"]);
    }

    #[test]
    fn test_topological_order_keeps_declaration_order() {
        let schema = DesiredSchema::new()
            .table(TableDefinition::new("z").column("x", DataType::Text))
            .table(TableDefinition::new("b").column("y", DataType::Text));

        assert_eq!(schema.topological_order().unwrap(), vec!["z", "b"]);
    }

    #[test]
    fn test_topological_order_ignores_self_and_external_references() {
        let schema = DesiredSchema::new().table(
            TableDefinition::new("node")
                .column("parent_id", fk("node"))
                .column("owner_id", fk("elsewhere")),
        );

        assert_eq!(schema.topological_order().unwrap(), vec!["node"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let schema = DesiredSchema::new()
            .table(TableDefinition::new("a").column("b_id", fk("b")))
            .table(TableDefinition::new("b").column("a_id", fk("a")))
            .table(TableDefinition::new("c").column("x", DataType::Text));

        match schema.topological_order() {
            Err(ReconcileError::CircularDependency(tables)) => {
                assert_eq!(tables, vec!["a", "b"]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_to_snapshot_excludes_tables() {
        let schema = DesiredSchema::new()
            .table(TableDefinition::new("a").column("addr", DataType::Text))
            .table(TableDefinition::new("state").column("json", DataType::Text));

        let snapshot = schema.to_snapshot(&["state"]).unwrap();
        assert!(snapshot.contains_table("a"));
        assert!(!snapshot.contains_table("state"));
        assert_eq!(
            snapshot.column("a", "addr").and_then(FlatAttribute::type_key),
            Some("TEXT")
        );
    }

    #[test]
    fn test_snapshot_topological_order_uses_recorded_references() {
        let schema = DesiredSchema::new()
            .table(TableDefinition::new("d").column("z_id", fk("z")))
            .table(TableDefinition::new("p").column("id", DataType::Integer))
            .table(TableDefinition::new("z").column("p_id", fk("p")));
        let snapshot = schema.to_snapshot(&[]).unwrap();

        assert_eq!(snapshot.topological_order().unwrap(), vec!["p", "z", "d"]);
    }

    #[test]
    fn test_desired_schema_from_json() {
        let schema = DesiredSchema::from_json(
            r#"{"tables":[{"name":"users","columns":[
                {"name":"id","type":{"typekey":"INTEGER"},"primaryKey":true,"autoIncrement":true},
                {"name":"email","type":{"typekey":"STRING","length":255},"unique":true}
            ]}]}"#,
        )
        .unwrap();

        let users = schema.get_table("users").unwrap();
        assert_eq!(users.columns.len(), 2);
        let id = &users.get_column("id").unwrap().attribute;
        assert!(id.is_primary_key());
        assert!(id.is_auto_increment());
        assert_eq!(
            users.get_column("email").unwrap().attribute.data_type,
            DataType::string(255)
        );
    }

    #[test]
    fn test_snapshot_serializes_as_plain_map() {
        let schema =
            DesiredSchema::new().table(TableDefinition::new("a").column("addr", DataType::Text));
        let snapshot = schema.to_snapshot(&[]).unwrap();

        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"a":{"addr":{"type":{"typekey":"TEXT"}}}}"#);
        let back: SchemaSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
