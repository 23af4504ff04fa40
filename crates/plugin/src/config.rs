//! Plugin configuration, read from a YAML file.
//!
//! ```yaml
//! storage:
//!   root: ./arena_data
//! transition:
//!   mode: reconnect
//!   name_prefix: "[Arena] "
//! loadout:
//!   items: [{ item: 500, amount: 1 }]
//!   blood: { blood_type: 9, quality: 100.0 }
//!   unlocks: [70, 71]
//!   achievements: [3]
//! zones:
//!   pit: { spawn: [300.0, 0.0, 300.0], radius: 20.0 }
//! triggers:
//!   auto_enter: true
//! ```
//! Every section is optional.

use arena_transition::{ArenaSettings, Loadout, TransitionMode, Zone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArenaConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transition: TransitionConfig,
    #[serde(default)]
    pub loadout: Loadout,
    #[serde(default)]
    pub zones: BTreeMap<String, Zone>,
    #[serde(default)]
    pub triggers: TriggerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding every durable document.
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("./arena_data")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionConfig {
    #[serde(default)]
    pub mode: TransitionMode,
    /// Only used in reconnect mode.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            mode: TransitionMode::default(),
            name_prefix: default_name_prefix(),
        }
    }
}

fn default_name_prefix() -> String {
    "[Arena] ".into()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Let the proximity trigger enter and leave players on its own.
    #[serde(default)]
    pub auto_enter: bool,
}

impl ArenaConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// The service-facing part of the config.
    pub fn settings(&self) -> ArenaSettings {
        ArenaSettings {
            mode: self.transition.mode,
            name_prefix: self.transition.name_prefix.clone(),
            loadout: self.loadout.clone(),
            zones: self.zones.clone(),
        }
    }
}
