use anyhow::{Context, Result};
use studygroups_config::{LogConfig, LogFormat};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match config.format {
        LogFormat::Text => builder.with_target(false).try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

fn filter(config: &LogConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("invalid log level '{}'", config.level)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_level() {
        let config = LogConfig {
            level: "studygroups_db=verbose".to_string(),
            format: LogFormat::Text,
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(filter(&config).is_err());
        }
    }

    #[test]
    fn accepts_directives() {
        let config = LogConfig {
            level: "warn,studygroups_db=debug".to_string(),
            format: LogFormat::Json,
        };
        assert!(filter(&config).is_ok());
    }
}
