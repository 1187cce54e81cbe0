use std::path::Path;

use crate::error::ConfigError;
use crate::raw::Config;

/// Load configuration from a YAML file.
///
/// `path = None` yields the built-in defaults. A named file that does not
/// exist is a configuration error; an unreadable or malformed file likewise.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let Some(path) = path else {
        return Ok(Config::default());
    };

    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let config: Config =
        serde_yaml::from_str(&text).map_err(|source| ConfigError::YamlParse {
            path: path.display().to_string(),
            source,
        })?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.worker.task_pool_size == 0 {
        return Err(ConfigError::Invalid(
            "worker.task_pool_size must be at least 1".to_string(),
        ));
    }
    if config.worker.task_concurrency == 0 {
        return Err(ConfigError::Invalid(
            "worker.task_concurrency must be at least 1".to_string(),
        ));
    }
    if config.worker.process_pending_task_interval == 0 {
        return Err(ConfigError::Invalid(
            "worker.process_pending_task_interval must be at least 1".to_string(),
        ));
    }
    if config.enabled_hardware_types.is_empty() {
        return Err(ConfigError::Invalid(
            "enabled_hardware_types must name at least one hardware type".to_string(),
        ));
    }
    Ok(())
}
