use std::path::{Path, PathBuf};

use studygroups_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CONFIG_FILE_NAMES: [&str; 3] = ["config.yml", "config.yaml", "config.toml"];

pub const ENV_DATABASE: &str = "STUDYGROUPS_DATABASE";
pub const ENV_MIGRATIONS_DIR: &str = "STUDYGROUPS_MIGRATIONS_DIR";
pub const ENV_LOG: &str = "STUDYGROUPS_LOG";

/// Locates, parses and post-processes `AppConfig`.
pub struct ConfigLoader;

impl ConfigLoader {
    /// `~/.studygroups`, falling back to the working directory when no home
    /// directory is known.
    pub fn default_config_dir() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".studygroups"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Load the configuration and apply environment overrides.
    ///
    /// An explicit `path` must exist. Without one, the first of
    /// `config.yml`, `config.yaml` or `config.toml` found in
    /// [`default_config_dir`](Self::default_config_dir) is used, and a
    /// missing file simply means defaults.
    pub fn load(path: Option<&Path>) -> Result<AppConfig> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => match Self::find_in(&Self::default_config_dir()) {
                Some(found) => Self::load_from(&found)?,
                None => {
                    debug!("no config file found, using defaults");
                    AppConfig::default()
                }
            },
        };

        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a single config file, picking the format from its extension.
    pub fn load_from(path: &Path) -> Result<AppConfig> {
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "config file {}",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = Self::parse(&contents, ext)?;

        info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str, ext: &str) -> Result<AppConfig> {
        match ext {
            "yml" | "yaml" => Ok(serde_yaml::from_str(contents)?),
            "toml" => Ok(toml::from_str(contents)?),
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    /// First known config file name present in `dir`.
    pub fn find_in(dir: &Path) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    }

    /// Environment variables win over file values. Empty values are ignored.
    pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get(ENV_DATABASE) {
            debug!("{ENV_DATABASE} overrides database path");
            config.database.path = PathBuf::from(path);
        }
        if let Some(dir) = get(ENV_MIGRATIONS_DIR) {
            debug!("{ENV_MIGRATIONS_DIR} overrides migrations directory");
            config.migrations.directory = Some(PathBuf::from(dir));
        }
        if let Some(level) = get(ENV_LOG) {
            config.log.level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::model::LogFormat;

    #[test]
    fn loads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "database:\n  path: groups.db\n  busy_timeout_ms: 250\nlog:\n  format: json\n",
        )
        .unwrap();

        let config = ConfigLoader::load_from(&path).unwrap();
        assert_eq!(config.database.path, PathBuf::from("groups.db"));
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[migrations]\ndirectory = \"db/migrations\"\n").unwrap();

        let config = ConfigLoader::load_from(&path).unwrap();
        assert_eq!(
            config.migrations.directory,
            Some(PathBuf::from("db/migrations"))
        );
    }

    #[test]
    fn missing_explicit_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::load_from(&dir.path().join("nope.yml")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = ConfigLoader::parse("a = 1", "ini").unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: unsupported config extension: ini"
        );
    }

    #[test]
    fn malformed_yaml_is_reported() {
        let err = ConfigLoader::parse("database: [unclosed", "yml").unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
    }

    #[test]
    fn find_in_prefers_yaml_over_toml() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConfigLoader::find_in(dir.path()).is_none());

        std::fs::write(dir.path().join("config.toml"), "").unwrap();
        std::fs::write(dir.path().join("config.yml"), "{}").unwrap();

        let found = ConfigLoader::find_in(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "config.yml");
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            (ENV_DATABASE, "/tmp/override.db"),
            (ENV_MIGRATIONS_DIR, "/srv/migrations"),
            (ENV_LOG, "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        ConfigLoader::apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/tmp/override.db"));
        assert_eq!(
            config.migrations.directory,
            Some(PathBuf::from("/srv/migrations"))
        );
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = AppConfig::default();
        ConfigLoader::apply_env_overrides(&mut config, |_| Some("  ".to_string()));
        assert_eq!(config, AppConfig::default());
    }
}
