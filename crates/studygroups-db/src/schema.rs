//! Declarative schema changes.
//!
//! Migrations are plain data: every change a migration makes is one of the
//! [`SchemaChange`] variants below, deserialized from TOML. Nothing here
//! executes; the planner validates changes and the SQL renderer turns them
//! into statements.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// One step of a migration's `up` or `down` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaChange {
    CreateTable(CreateTable),
    DropTable { table: String },
    AddForeignKey { table: String, foreign_key: ForeignKey },
    DropForeignKey { table: String, column: String },
}

impl SchemaChange {
    /// The table this change touches.
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable(def) => &def.table,
            Self::DropTable { table }
            | Self::AddForeignKey { table, .. }
            | Self::DropForeignKey { table, .. } => table,
        }
    }

    /// Checks that need no knowledge of the surrounding schema: identifiers
    /// are well-formed and a table definition is internally consistent.
    pub fn validate(&self) -> Result<(), SchemaError> {
        match self {
            Self::CreateTable(def) => def.check_shape(),
            Self::DropTable { table } => check_identifier("table", table),
            Self::AddForeignKey { table, foreign_key } => {
                check_identifier("table", table)?;
                foreign_key.check_identifiers()
            }
            Self::DropForeignKey { table, column } => {
                check_identifier("table", table)?;
                check_identifier("column", column)
            }
        }
    }
}

/// Full definition of a table, as created by [`SchemaChange::CreateTable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTable {
    pub table: String,
    pub columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<Index>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKey>,
}

impl CreateTable {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn find_foreign_key(&self, column: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.column == column)
    }

    pub fn references(&self, table: &str) -> bool {
        self.foreign_keys
            .iter()
            .any(|fk| fk.references_table == table)
    }

    pub(crate) fn check_shape(&self) -> Result<(), SchemaError> {
        check_identifier("table", &self.table)?;
        if self.columns.is_empty() {
            return Err(SchemaError::EmptyTable(self.table.clone()));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            check_identifier("column", &column.name)?;
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.table.clone(),
                    column: column.name.clone(),
                });
            }
            if column.default.as_ref().is_some_and(|d| !d.fits(column.ty)) {
                return Err(SchemaError::DefaultMismatch {
                    table: self.table.clone(),
                    column: column.name.clone(),
                });
            }
        }

        if self.columns.iter().filter(|c| c.primary_key).count() > 1 {
            return Err(SchemaError::MultiplePrimaryKeys(self.table.clone()));
        }

        let mut index_names = HashSet::new();
        for index in &self.indexes {
            check_identifier("index", &index.name)?;
            if !index_names.insert(index.name.as_str()) {
                return Err(SchemaError::IndexExists(index.name.clone()));
            }
            if index.columns.is_empty() {
                return Err(SchemaError::EmptyIndex(index.name.clone()));
            }
            for column in &index.columns {
                self.require_column(column)?;
            }
        }

        let mut fk_columns = HashSet::new();
        for fk in &self.foreign_keys {
            fk.check_identifiers()?;
            self.require_column(&fk.column)?;
            if !fk_columns.insert(fk.column.as_str()) {
                return Err(SchemaError::ForeignKeyExists {
                    table: self.table.clone(),
                    column: fk.column.clone(),
                });
            }
        }

        Ok(())
    }

    pub(crate) fn require_column(&self, column: &str) -> Result<&Column, SchemaError> {
        self.find_column(column)
            .ok_or_else(|| SchemaError::UnknownColumn {
                table: self.table.clone(),
                column: column.to_string(),
            })
    }
}

/// A column definition. Deserialized through [`RawColumn`] so that a
/// length can only be attached to string columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawColumn", into = "RawColumn")]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub default: Option<DefaultValue>,
    pub primary_key: bool,
}

impl Column {
    /// A nullable column without default.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
            default: None,
            primary_key: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Marks the column as the table's primary key. Primary keys are never null.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String { max_len: Option<u32> },
    Integer,
    DateTime,
}

impl ColumnType {
    pub fn string(max_len: u32) -> Self {
        Self::String {
            max_len: Some(max_len),
        }
    }

    pub fn text() -> Self {
        Self::String { max_len: None }
    }
}

/// A literal column default. Defaults are configuration, never expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Integer(i64),
    Text(String),
}

impl DefaultValue {
    /// Integers only on integer columns; text on string columns within their
    /// length and on datetime columns.
    pub fn fits(&self, ty: ColumnType) -> bool {
        match (self, ty) {
            (Self::Integer(_), ColumnType::Integer) => true,
            (Self::Text(text), ColumnType::String { max_len }) => {
                max_len.is_none_or(|max| text.chars().count() <= max as usize)
            }
            (Self::Text(_), ColumnType::DateTime) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl Index {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    #[serde(default = "default_referenced_column")]
    pub references_column: String,
    #[serde(default)]
    pub on_delete: OnDelete,
}

fn default_referenced_column() -> String {
    "id".to_string()
}

impl ForeignKey {
    pub fn new(column: impl Into<String>, references_table: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            references_table: references_table.into(),
            references_column: default_referenced_column(),
            on_delete: OnDelete::default(),
        }
    }

    pub fn on_delete(mut self, action: OnDelete) -> Self {
        self.on_delete = action;
        self
    }

    fn check_identifiers(&self) -> Result<(), SchemaError> {
        check_identifier("column", &self.column)?;
        check_identifier("table", &self.references_table)?;
        check_identifier("column", &self.references_column)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
}

/// Serialized shape of a [`Column`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    #[serde(default)]
    pub primary_key: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    String,
    Integer,
    #[serde(rename = "datetime")]
    DateTime,
}

impl TryFrom<RawColumn> for Column {
    type Error = String;

    fn try_from(raw: RawColumn) -> Result<Self, Self::Error> {
        let ty = match (raw.kind, raw.size) {
            (ColumnKind::String, max_len) => ColumnType::String { max_len },
            (ColumnKind::Integer, None) => ColumnType::Integer,
            (ColumnKind::DateTime, None) => ColumnType::DateTime,
            (_, Some(_)) => {
                return Err(format!(
                    "column {}: size is only allowed on string columns",
                    raw.name
                ));
            }
        };

        if raw.size == Some(0) {
            return Err(format!("column {}: size must be positive", raw.name));
        }
        if raw.default.as_ref().is_some_and(|d| !d.fits(ty)) {
            return Err(format!(
                "column {}: default does not fit the column type",
                raw.name
            ));
        }

        let nullable = match (raw.primary_key, raw.nullable) {
            (true, Some(true)) => {
                return Err(format!(
                    "column {}: a primary key cannot be nullable",
                    raw.name
                ));
            }
            (true, _) => false,
            (false, nullable) => nullable.unwrap_or(true),
        };

        Ok(Self {
            name: raw.name,
            ty,
            nullable,
            default: raw.default,
            primary_key: raw.primary_key,
        })
    }
}

impl From<Column> for RawColumn {
    fn from(column: Column) -> Self {
        let (kind, size) = match column.ty {
            ColumnType::String { max_len } => (ColumnKind::String, max_len),
            ColumnType::Integer => (ColumnKind::Integer, None),
            ColumnType::DateTime => (ColumnKind::DateTime, None),
        };
        Self {
            name: column.name,
            kind,
            size,
            nullable: Some(column.nullable),
            default: column.default,
            primary_key: column.primary_key,
        }
    }
}

/// Table, column and index names: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn check_identifier(kind: &'static str, name: &str) -> Result<(), SchemaError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier {
            kind,
            name: name.to_string(),
        })
    }
}
