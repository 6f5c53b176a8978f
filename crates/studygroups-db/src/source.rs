//! Loading migration definitions from a directory of `NNN_name.toml` files.

use std::path::Path;

use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::migration::{Migration, MigrationId};

/// Read every `*.toml` file in `dir` as a migration, sorted by version.
/// Other files are ignored; subdirectories are not searched.
pub fn load_dir(dir: &Path) -> Result<Vec<Migration>> {
    let mut migrations = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("toml") {
            debug!("skipping {}", path.display());
            continue;
        }

        let origin = path.display().to_string();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| MigrateError::definition(&origin, "file name is not valid UTF-8"))?;
        let id: MigrationId = stem
            .parse()
            .map_err(|reason: String| MigrateError::definition(&origin, reason))?;

        let contents = std::fs::read_to_string(&path)?;
        migrations.push(Migration::from_toml(id, &contents)?);
    }

    migrations.sort_by_key(Migration::version);
    if let Some(pair) = migrations
        .windows(2)
        .find(|pair| pair[0].version() == pair[1].version())
    {
        return Err(MigrateError::definition(
            dir.display().to_string(),
            format!("{} and {} share a version", pair[0].id(), pair[1].id()),
        ));
    }

    debug!(count = migrations.len(), "loaded migrations from {}", dir.display());
    Ok(migrations)
}
