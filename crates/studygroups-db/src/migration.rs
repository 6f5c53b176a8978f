use std::fmt;
use std::str::FromStr;

use ring::digest::{SHA256, digest};
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};
use crate::schema::{SchemaChange, check_identifier};

/// `{version:03}_{name}`, e.g. `001_create_users_table`. Ordered by version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MigrationId {
    pub version: u32,
    pub name: String,
}

impl MigrationId {
    pub fn new(version: u32, name: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
        }
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}_{}", self.version, self.name)
    }
}

impl FromStr for MigrationId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (version, name) = s
            .split_once('_')
            .ok_or_else(|| format!("expected <version>_<name>, got {s:?}"))?;

        if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("version of {s:?} is not a number"));
        }
        let version: u32 = version
            .parse()
            .map_err(|e| format!("version of {s:?} is out of range: {e}"))?;
        check_identifier("migration", name).map_err(|e| e.to_string())?;

        Ok(Self::new(version, name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// Body of a migration file: the change lists, without the identifier
/// (which comes from the file name).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationDefinition {
    #[serde(default)]
    pub up: Vec<SchemaChange>,
    #[serde(default)]
    pub down: Vec<SchemaChange>,
}

/// A versioned unit of schema change. Immutable once built; the checksum
/// pins its content so edits to an applied migration can be detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    id: MigrationId,
    definition: MigrationDefinition,
    checksum: String,
}

impl Migration {
    pub fn new(
        id: MigrationId,
        up: Vec<SchemaChange>,
        down: Vec<SchemaChange>,
    ) -> Result<Self> {
        Self::from_definition(id, MigrationDefinition { up, down })
    }

    pub fn from_definition(id: MigrationId, definition: MigrationDefinition) -> Result<Self> {
        check_identifier("migration", &id.name)
            .map_err(|e| MigrateError::definition(id.to_string(), e))?;

        for change in definition.up.iter().chain(&definition.down) {
            change
                .validate()
                .map_err(|e| MigrateError::definition(id.to_string(), e))?;
        }

        let canonical = serde_json::to_vec(&definition)
            .map_err(|e| MigrateError::definition(id.to_string(), e))?;
        let checksum = hex(digest(&SHA256, &canonical).as_ref());

        Ok(Self {
            id,
            definition,
            checksum,
        })
    }

    /// Parse the TOML body of a migration file.
    pub fn from_toml(id: MigrationId, contents: &str) -> Result<Self> {
        let definition: MigrationDefinition =
            toml::from_str(contents).map_err(|e| MigrateError::definition(id.to_string(), e))?;
        Self::from_definition(id, definition)
    }

    pub fn id(&self) -> &MigrationId {
        &self.id
    }

    pub fn version(&self) -> u32 {
        self.id.version
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn changes(&self, direction: Direction) -> &[SchemaChange] {
        match direction {
            Direction::Up => &self.definition.up,
            Direction::Down => &self.definition.down,
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType, CreateTable};

    fn create(table: &str) -> SchemaChange {
        SchemaChange::CreateTable(
            CreateTable::new(table).column(Column::new("id", ColumnType::Integer).primary_key()),
        )
    }

    fn drop_table(table: &str) -> SchemaChange {
        SchemaChange::DropTable {
            table: table.into(),
        }
    }

    #[test]
    fn id_formats_with_padded_version() {
        assert_eq!(
            MigrationId::new(1, "create_users_table").to_string(),
            "001_create_users_table"
        );
        assert_eq!(MigrationId::new(1234, "x").to_string(), "1234_x");
    }

    #[test]
    fn id_parses_from_file_stem() {
        let id: MigrationId = "002_create_study_groups_table".parse().unwrap();
        assert_eq!(id, MigrationId::new(2, "create_study_groups_table"));

        assert!("create_users".parse::<MigrationId>().is_err());
        assert!("001".parse::<MigrationId>().is_err());
        assert!("001_".parse::<MigrationId>().is_err());
        assert!("-1_neg".parse::<MigrationId>().is_err());
        assert!("001_bad-name".parse::<MigrationId>().is_err());
    }

    #[test]
    fn ids_order_by_version() {
        let mut ids = vec![
            MigrationId::new(10, "a"),
            MigrationId::new(2, "z"),
            MigrationId::new(3, "b"),
        ];
        ids.sort();
        let versions: Vec<u32> = ids.iter().map(|id| id.version).collect();
        assert_eq!(versions, vec![2, 3, 10]);
    }

    #[test]
    fn checksum_is_stable_and_content_sensitive() {
        let a = Migration::new(MigrationId::new(1, "init"), vec![create("a")], vec![drop_table("a")])
            .unwrap();
        let again = Migration::new(MigrationId::new(1, "init"), vec![create("a")], vec![drop_table("a")])
            .unwrap();
        let edited =
            Migration::new(MigrationId::new(1, "init"), vec![create("b")], vec![drop_table("b")])
                .unwrap();

        assert_eq!(a.checksum().len(), 64);
        assert_eq!(a.checksum(), again.checksum());
        assert_ne!(a.checksum(), edited.checksum());
    }

    #[test]
    fn changes_follow_direction() {
        let m = Migration::new(MigrationId::new(1, "init"), vec![create("a")], vec![drop_table("a")])
            .unwrap();
        assert_eq!(m.changes(Direction::Up), &[create("a")]);
        assert_eq!(m.changes(Direction::Down), &[drop_table("a")]);
    }

    #[test]
    fn invalid_change_is_a_definition_error() {
        let err = Migration::new(MigrationId::new(1, "init"), vec![drop_table("bad name")], vec![])
            .unwrap_err();
        assert!(matches!(err, MigrateError::Definition { origin, .. } if origin == "001_init"));
    }

    #[test]
    fn parses_toml_body() {
        let m = Migration::from_toml(
            MigrationId::new(3, "create_tags"),
            r#"
            [[up]]
            op = "create_table"
            table = "tags"

            [[up.columns]]
            name = "id"
            type = "integer"
            primary_key = true

            [[up.columns]]
            name = "label"
            type = "string"
            size = 30
            nullable = false

            [[down]]
            op = "drop_table"
            table = "tags"
            "#,
        )
        .unwrap();

        assert_eq!(m.changes(Direction::Up).len(), 1);
        assert_eq!(m.changes(Direction::Down), &[drop_table("tags")]);
    }

    #[test]
    fn unknown_op_is_rejected() {
        let err = Migration::from_toml(
            MigrationId::new(3, "weird"),
            "[[up]]\nop = \"truncate_table\"\ntable = \"tags\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, MigrateError::Definition { .. }));
    }
}
