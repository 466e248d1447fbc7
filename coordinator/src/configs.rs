use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::ConfigErr;

pub const CONFIG_VAR: &str = "NODE_CONFIG";
pub const ARTIFACTS_DIR_VAR: &str = "ARTIFACTS_DIR";
pub const ADVANCE_ON_UPDATE_VAR: &str = "ADVANCE_ON_UPDATE";

const DEFAULT_ARTIFACTS_DIR: &str = "temp";

/// Runtime settings of a coordinator node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Root under which every session's artifacts are stored.
    pub artifacts_dir: PathBuf,
    /// Treat each accepted update as the round's aggregate and advance
    /// right away.
    pub advance_on_update: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            advance_on_update: true,
        }
    }
}

impl NodeConfig {
    /// Loads the configuration from the process environment.
    ///
    /// The file named by `NODE_CONFIG` is read first if set, then
    /// `ARTIFACTS_DIR` and `ADVANCE_ON_UPDATE` override its values.
    ///
    /// # Errors
    /// A `ConfigErr` if the file can't be read or parsed, or an override
    /// isn't usable.
    pub fn load() -> Result<Self, ConfigErr> {
        let file = env::var_os(CONFIG_VAR).map(PathBuf::from);
        Self::from_sources(file.as_deref(), |var| env::var(var).ok())
    }

    /// Builds the configuration from an optional file and a variable lookup.
    ///
    /// # Args
    /// * `file` - A JSON file with any subset of the fields.
    /// * `lookup` - Resolves override variables by name.
    ///
    /// # Returns
    /// The merged configuration.
    pub fn from_sources<F>(file: Option<&Path>, lookup: F) -> Result<Self, ConfigErr>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match file {
            Some(path) => Self::read(path)?,
            None => Self::default(),
        };

        if let Some(dir) = lookup(ARTIFACTS_DIR_VAR).filter(|dir| !dir.is_empty()) {
            config.artifacts_dir = PathBuf::from(dir);
        }

        if let Some(value) = lookup(ADVANCE_ON_UPDATE_VAR) {
            config.advance_on_update = parse_flag(&value).ok_or(ConfigErr::Env {
                var: ADVANCE_ON_UPDATE_VAR,
                value,
            })?;
        }

        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigErr> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigErr::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&raw).map_err(|source| ConfigErr::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
