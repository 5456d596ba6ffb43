//! Rename inference.
//!
//! A column that disappears from a table while another of the same type
//! appears is often the same column under a new name. Treating the pair as
//! drop + add would lose its data, so [`RenameResolver`] turns such pairs
//! into renames:
//!
//! 1. an active [`RenameHint`] for the pair wins unconditionally;
//! 2. a primary key replaced by another primary key of the same type is
//!    renamed without asking;
//! 3. any other same-type pair is offered to a [`Confirm`] implementation.
//!
//! The first accepted candidate wins. Confirmed non-key renames produce new
//! hints, persisted only if the run commits.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::attribute::{Attribute, FlatAttribute};
use crate::diff::{ColumnChange, Diff};
use crate::error::Result;
use crate::hints::RenameHint;
use crate::schema::SchemaSnapshot;

/// Answers yes/no rename questions.
pub trait Confirm {
    /// Returns `true` to accept the rename described by `question`.
    fn confirm(&mut self, question: &str) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&str) -> bool,
{
    fn confirm(&mut self, question: &str) -> bool {
        self(question)
    }
}

/// Asks on the terminal, defaulting to "no".
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl Confirm for TerminalPrompt {
    fn confirm(&mut self, question: &str) -> bool {
        let mut stdout = io::stdout();
        if let Err(e) = write!(stdout, "{question} [y/N] ").and_then(|()| stdout.flush()) {
            warn!(error = %e, "Cannot prompt for rename, treating as no");
            return false;
        }

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(e) => {
                warn!(error = %e, "Cannot read answer, treating as no");
                false
            }
        }
    }
}

/// Declines every rename.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decline;

impl Confirm for Decline {
    fn confirm(&mut self, _question: &str) -> bool {
        false
    }
}

/// A column rename committed by the resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRename {
    /// Table holding the column.
    pub table: String,
    /// Old column name.
    pub from: String,
    /// New column name.
    pub to: String,
    /// Definition of the column under its new name.
    pub attribute: Attribute,
    /// Definition of the column under its old name.
    pub previous: Attribute,
}

/// Output of [`RenameResolver::resolve`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Committed renames in discovery order.
    pub renames: Vec<ColumnRename>,
    /// Hints for renames confirmed during this run.
    pub new_hints: Vec<RenameHint>,
}

/// Builds the question shown for a non-key rename candidate.
#[must_use]
pub fn rename_question(table: &str, from: &str, to: &str) -> String {
    format!("Did you rename {table}.{from} to {table}.{to}?")
}

/// Turns drop + add pairs of a [`Diff`] into renames.
pub struct RenameResolver<'a> {
    old: &'a SchemaSnapshot,
    new: &'a SchemaSnapshot,
    // table -> from -> to; later hints override earlier ones
    hints: HashMap<String, HashMap<String, String>>,
    started_at: DateTime<Utc>,
}

impl<'a> RenameResolver<'a> {
    /// Creates a resolver for a diff between `old` and `new`.
    ///
    /// `active_hints` must already be filtered to the ones recorded after
    /// the current snapshot. New hints are stamped with `started_at`.
    pub fn new(
        old: &'a SchemaSnapshot,
        new: &'a SchemaSnapshot,
        active_hints: &[RenameHint],
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut hints: HashMap<String, HashMap<String, String>> = HashMap::new();
        for hint in active_hints {
            hints
                .entry(hint.table.clone())
                .or_default()
                .insert(hint.from_field.clone(), hint.to_field.clone());
        }
        Self {
            old,
            new,
            hints,
            started_at,
        }
    }

    fn hinted_target(&self, table: &str, from: &str) -> Option<&str> {
        self.hints.get(table)?.get(from).map(String::as_str)
    }

    /// Resolves renames, removing both sides of every committed rename from
    /// `diff`.
    pub fn resolve<C>(&self, diff: &mut Diff, confirm: &mut C) -> Result<Resolution>
    where
        C: Confirm + ?Sized,
    {
        let mut resolution = Resolution::default();
        let tables: Vec<String> = diff.deleted.keys().cloned().collect();

        for table in tables {
            if !self.new.contains_table(&table) {
                continue;
            }

            let dropped: Vec<(String, FlatAttribute)> = diff
                .deleted
                .get(&table)
                .into_iter()
                .flatten()
                .filter_map(|(name, change)| match change {
                    ColumnChange::Column(attr) => Some((name.clone(), attr.clone())),
                    ColumnChange::Options(_) => None,
                })
                .collect();

            for (from, old_attr) in dropped {
                if let Some(to) = self.hinted_target(&table, &from) {
                    if let Some(new_attr) = whole_added(diff, &table, to) {
                        let attribute = renamed_attribute(&old_attr, &new_attr)?;
                        info!(table = %table, from = %from, to = %to, "Applying hinted rename");
                        let rename = ColumnRename {
                            table: table.clone(),
                            from: from.clone(),
                            to: to.to_string(),
                            attribute,
                            previous: old_attr.hydrate()?,
                        };
                        commit(diff, &mut resolution, rename);
                        continue;
                    }
                    debug!(table = %table, from = %from, to = %to, "Hint target not added");
                }

                for (to, new_attr) in self.candidates(diff, &table, &old_attr) {
                    if old_attr.is_primary_key() && new_attr.is_primary_key() {
                        let attribute = renamed_attribute(&old_attr, &new_attr)?;
                        info!(table = %table, from = %from, to = %to, "Renaming primary key");
                        let rename = ColumnRename {
                            table: table.clone(),
                            from: from.clone(),
                            to,
                            attribute,
                            previous: old_attr.hydrate()?,
                        };
                        commit(diff, &mut resolution, rename);
                        break;
                    }

                    if confirm.confirm(&rename_question(&table, &from, &to)) {
                        info!(table = %table, from = %from, to = %to, "Rename confirmed");
                        resolution.new_hints.push(RenameHint::new(
                            table.clone(),
                            from.clone(),
                            to.clone(),
                            self.started_at,
                        ));
                        let rename = ColumnRename {
                            table: table.clone(),
                            from: from.clone(),
                            to,
                            attribute: new_attr.hydrate()?,
                            previous: old_attr.hydrate()?,
                        };
                        commit(diff, &mut resolution, rename);
                        break;
                    }
                    debug!(table = %table, from = %from, to = %to, "Rename declined");
                }
            }
        }

        Ok(resolution)
    }

    /// Whole-column additions to `table` that are new to it and share the
    /// dropped column's type.
    fn candidates(
        &self,
        diff: &Diff,
        table: &str,
        dropped: &FlatAttribute,
    ) -> Vec<(String, FlatAttribute)> {
        let Some(type_key) = dropped.type_key() else {
            return Vec::new();
        };
        diff.added
            .get(table)
            .into_iter()
            .flatten()
            .filter_map(|(name, change)| match change {
                ColumnChange::Column(attr) => Some((name, attr)),
                ColumnChange::Options(_) => None,
            })
            .filter(|(name, attr)| {
                !self.old.contains_column(table, name) && attr.type_key() == Some(type_key)
            })
            .map(|(name, attr)| (name.clone(), attr.clone()))
            .collect()
    }
}

fn whole_added(diff: &Diff, table: &str, column: &str) -> Option<FlatAttribute> {
    match diff.added.get(table)?.get(column)? {
        ColumnChange::Column(attr) => Some(attr.clone()),
        ColumnChange::Options(_) => None,
    }
}

/// Definition used for the renamed column; key-to-key renames are normalized.
fn renamed_attribute(old: &FlatAttribute, new: &FlatAttribute) -> Result<Attribute> {
    let attribute = new.hydrate()?;
    if old.is_primary_key() && new.is_primary_key() {
        Ok(attribute.as_primary_key())
    } else {
        Ok(attribute)
    }
}

fn commit(diff: &mut Diff, resolution: &mut Resolution, rename: ColumnRename) {
    diff.take_deleted(&rename.table, &rename.from);
    diff.take_added(&rename.table, &rename.to);
    resolution.renames.push(rename);
}
