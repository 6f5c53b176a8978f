//! The StudyGroups migrations shipped with the library.

use crate::error::{MigrateError, Result};
use crate::migration::{Migration, MigrationId};

/// Avatar assigned to users who have not uploaded one.
///
/// The column default in `migrations/001_create_users_table.toml` is the
/// source of truth; this constant mirrors it and a test keeps them equal.
pub const DEFAULT_AVATAR_URL: &str =
    "https://s3-us-west-1.amazonaws.com/study-groups/images/user-avatars/stock-avatar.png";

const EMBEDDED: [(&str, &str); 2] = [
    (
        "001_create_users_table",
        include_str!("../migrations/001_create_users_table.toml"),
    ),
    (
        "002_create_study_groups_table",
        include_str!("../migrations/002_create_study_groups_table.toml"),
    ),
];

pub fn migrations() -> Result<Vec<Migration>> {
    EMBEDDED
        .iter()
        .map(|(stem, contents)| {
            let id: MigrationId = stem
                .parse()
                .map_err(|reason: String| MigrateError::definition(*stem, reason))?;
            Migration::from_toml(id, contents)
        })
        .collect()
}
