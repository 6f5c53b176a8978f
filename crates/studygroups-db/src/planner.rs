//! In-memory schema model used to validate migrations before they touch the
//! database.
//!
//! The runner rebuilds the model by replaying the `up` changes of every
//! applied migration, then applies each planned change to it. A change the
//! model rejects is never sent to SQLite.

use std::collections::BTreeMap;

use crate::error::SchemaError;
use crate::schema::{CreateTable, ForeignKey, SchemaChange};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaModel {
    tables: BTreeMap<String, CreateTable>,
}

impl SchemaModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&CreateTable> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// First other table holding a foreign key into `table`.
    pub fn referenced_by(&self, table: &str) -> Option<&str> {
        self.tables
            .values()
            .find(|def| def.table != table && def.references(table))
            .map(|def| def.table.as_str())
    }

    /// Apply one change, or leave the model untouched and report why it
    /// cannot be applied.
    pub fn apply(&mut self, change: &SchemaChange) -> Result<(), SchemaError> {
        change.validate()?;

        match change {
            SchemaChange::CreateTable(def) => self.create_table(def),
            SchemaChange::DropTable { table } => self.drop_table(table),
            SchemaChange::AddForeignKey { table, foreign_key } => {
                self.add_foreign_key(table, foreign_key)
            }
            SchemaChange::DropForeignKey { table, column } => {
                self.drop_foreign_key(table, column)
            }
        }
    }

    fn create_table(&mut self, def: &CreateTable) -> Result<(), SchemaError> {
        if self.tables.contains_key(&def.table) {
            return Err(SchemaError::TableExists(def.table.clone()));
        }

        for index in &def.indexes {
            if self.index_exists(&index.name) {
                return Err(SchemaError::IndexExists(index.name.clone()));
            }
        }

        for fk in &def.foreign_keys {
            self.check_target(def, fk)?;
        }

        self.tables.insert(def.table.clone(), def.clone());
        Ok(())
    }

    fn drop_table(&mut self, table: &str) -> Result<(), SchemaError> {
        self.require_table(table)?;
        self.ensure_unreferenced(table)?;
        self.tables.remove(table);
        Ok(())
    }

    // SQLite cannot alter constraints in place, so foreign key changes are
    // rendered as a table rebuild, which drops and recreates the table.
    // Dropping the old table would delete rows through a foreign key that
    // points back at it, so self-referencing tables cannot be rebuilt.
    fn add_foreign_key(&mut self, table: &str, fk: &ForeignKey) -> Result<(), SchemaError> {
        let def = self.require_table(table)?;
        def.require_column(&fk.column)?;
        if def.find_foreign_key(&fk.column).is_some() {
            return Err(SchemaError::ForeignKeyExists {
                table: table.to_string(),
                column: fk.column.clone(),
            });
        }
        self.check_target(def, fk)?;
        if def.references(table) || fk.references_table == table {
            return Err(SchemaError::SelfReferenced(table.to_string()));
        }
        self.ensure_unreferenced(table)?;

        if let Some(def) = self.tables.get_mut(table) {
            def.foreign_keys.push(fk.clone());
        }
        Ok(())
    }

    fn drop_foreign_key(&mut self, table: &str, column: &str) -> Result<(), SchemaError> {
        let def = self.require_table(table)?;
        if def.find_foreign_key(column).is_none() {
            return Err(SchemaError::UnknownForeignKey {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        if def.references(table) {
            return Err(SchemaError::SelfReferenced(table.to_string()));
        }
        self.ensure_unreferenced(table)?;

        if let Some(def) = self.tables.get_mut(table) {
            def.foreign_keys.retain(|fk| fk.column != column);
        }
        Ok(())
    }

    fn require_table(&self, table: &str) -> Result<&CreateTable, SchemaError> {
        self.tables
            .get(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))
    }

    fn ensure_unreferenced(&self, table: &str) -> Result<(), SchemaError> {
        match self.referenced_by(table) {
            Some(by) => Err(SchemaError::StillReferenced {
                table: table.to_string(),
                by: by.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// The referenced table may be the owning table itself.
    fn check_target(&self, owner: &CreateTable, fk: &ForeignKey) -> Result<(), SchemaError> {
        let target = if fk.references_table == owner.table {
            owner
        } else {
            self.require_table(&fk.references_table)?
        };
        target.require_column(&fk.references_column)?;
        Ok(())
    }

    fn index_exists(&self, name: &str) -> bool {
        self.tables
            .values()
            .any(|def| def.indexes.iter().any(|index| index.name == name))
    }
}
