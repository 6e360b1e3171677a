use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::paths::ProjectPaths;

fn default_true() -> bool {
    true
}

fn default_tick_interval_ms() -> u64 {
    16
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModsConfig {
    /// Whether mods are loaded at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory containing `*.lua` mods (default: <data dir>/mods)
    #[serde(default)]
    pub mod_dir: Option<PathBuf>,

    /// API documentation handed to `prompt` (default: <data dir>/Documentation.md)
    #[serde(default)]
    pub docs_path: Option<PathBuf>,

    /// Period of the per-mod Update callback in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Per-mod configuration (mod name -> config values)
    #[serde(default)]
    pub config: HashMap<String, toml::Value>,
}

impl Default for ModsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mod_dir: None,
            docs_path: None,
            tick_interval_ms: default_tick_interval_ms(),
            config: HashMap::new(),
        }
    }
}

impl ModsConfig {
    /// Mod directory path (configured or default)
    pub fn mod_dir(&self) -> PathBuf {
        self.mod_dir.clone().unwrap_or_else(|| {
            ProjectPaths::new()
                .map(|p| p.mods_dir())
                .unwrap_or_else(|| PathBuf::from("mods"))
        })
    }

    /// Documentation path (configured or default)
    pub fn docs_path(&self) -> PathBuf {
        self.docs_path.clone().unwrap_or_else(|| {
            ProjectPaths::new()
                .map(|p| p.docs_file())
                .unwrap_or_else(|| PathBuf::from("Documentation.md"))
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Whether a mod is enabled; mods absent from the config are enabled
    pub fn is_mod_enabled(&self, name: &str) -> bool {
        self.config
            .get(name)
            .and_then(|config| config.get("enabled"))
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }
}
