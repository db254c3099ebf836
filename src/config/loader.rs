use anyhow::{anyhow, Result};
use config::{Config, Environment, File};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use super::runtime::ServiceConfig;

pub const ENV_PREFIX: &str = "XRAY";

/// Build the effective configuration: defaults, then the TOML file (if it
/// exists), then `XRAY__SECTION__KEY` environment variables.
pub fn load_config(path: &Path) -> Result<ServiceConfig> {
    load_config_with_env(path, None)
}

/// Same as [`load_config`], reading variables from `env` instead of the
/// process environment when given.
pub fn load_config_with_env(path: &Path, env: Option<HashMap<String, String>>) -> Result<ServiceConfig> {
    let defaults = Config::try_from(&ServiceConfig::default())?;

    if path.exists() {
        info!("Loading configuration from {}", path.display());
    } else {
        debug!("No configuration file at {}, using defaults", path.display());
    }

    let settings = Config::builder()
        .add_source(defaults)
        .add_source(File::from(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(env),
        )
        .build()?;

    let config: ServiceConfig = settings.try_deserialize()?;
    config
        .validate()
        .map_err(|errors| anyhow!("Invalid configuration: {}", errors.join(", ")))?;

    Ok(config)
}

/// Render a configuration the way it would be written to disk.
pub fn render_config(config: &ServiceConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
