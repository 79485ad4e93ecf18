//! Configuration loading for the CLI
//!
//! Engine settings come from an optional TOML file layered under
//! `FOOTPRINT__SECTION__KEY` environment variables.

use anyhow::{Context, Result};
use engine_lib::EngineConfig;
use std::path::{Path, PathBuf};

/// Load engine configuration from `path` (or the default location) and the environment
pub fn load(path: Option<&Path>) -> Result<EngineConfig> {
    let mut builder = config::Config::builder();

    match path {
        Some(path) => {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
        }
        None => {
            if let Some(default_path) = default_config_path() {
                builder = builder.add_source(config::File::from(default_path).required(false));
            }
        }
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix("FOOTPRINT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to read configuration")?;

    let config: EngineConfig = settings
        .try_deserialize()
        .context("Failed to parse configuration")?;
    config.validate().context("Invalid configuration")?;

    Ok(config)
}

/// `~/.config/footprint/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|home| home.join(".config").join("footprint").join("config.toml"))
}
