//! Loading [`SimConfig`] from a settings file.
//!
//! A project directory holds at most one `simulation.{ron,toml,json}`. Keys
//! left out of the file keep their defaults.

use std::path::Path;

use circuitry_core::config::SimConfig;

use crate::loader::{DataLoadError, Format, deserialize_file, deserialize_str, find_data_file};

/// Base name of the settings file looked up by [`find_sim_config`].
pub const SIM_CONFIG_BASE_NAME: &str = "simulation";

fn validated(config: SimConfig, path: &Path) -> Result<SimConfig, DataLoadError> {
    config.validate().map_err(|source| DataLoadError::Invalid {
        file: path.to_path_buf(),
        source,
    })?;
    Ok(config)
}

/// Parse settings already read into memory. `path` only labels errors.
pub fn parse_sim_config(content: &str, format: Format, path: &Path) -> Result<SimConfig, DataLoadError> {
    let config: SimConfig = deserialize_str(content, format, path)?;
    validated(config, path)
}

/// Load and validate settings from `path`, format taken from its extension.
pub fn load_sim_config(path: &Path) -> Result<SimConfig, DataLoadError> {
    let config: SimConfig = deserialize_file(path)?;
    let config = validated(config, path)?;
    tracing::debug!(
        file = %path.display(),
        max_rounds = config.max_rounds,
        tick_period_ms = config.tick_period_ms,
        "simulation settings loaded"
    );
    Ok(config)
}

/// Load `simulation.*` from `dir`, or `None` if there is none.
pub fn find_sim_config(dir: &Path) -> Result<Option<SimConfig>, DataLoadError> {
    match find_data_file(dir, SIM_CONFIG_BASE_NAME)? {
        Some(path) => load_sim_config(&path).map(Some),
        None => Ok(None),
    }
}
