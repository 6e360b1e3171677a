use std::path::{Path, PathBuf};
use tracing::{info, warn};

use narrator_config::ModsConfig;

/// A mod read from disk, ready to hand to a [`ModHost`](crate::ModHost)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModSource {
    /// File stem, also the key of the mod's `[mods.config.<name>]` table
    pub name: String,
    pub path: PathBuf,
    pub source: String,
}

impl ModSource {
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("mod")
            .to_string();
        let source = std::fs::read_to_string(path)?;
        Ok(Self {
            name,
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Load every enabled `*.lua` mod from `dir`, sorted by name.
///
/// A missing directory or an unreadable file is logged and skipped.
pub fn load_mods(dir: &Path, config: &ModsConfig) -> Vec<ModSource> {
    let mut mods = Vec::new();

    if !dir.exists() {
        info!(
            target: "scripting",
            "Mod directory does not exist: {} (this is fine if no mods are being used)",
            dir.display()
        );
        return mods;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                target: "scripting",
                "Failed to read mod directory {}: {}",
                dir.display(),
                e
            );
            return mods;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();

        if path.extension().and_then(|s| s.to_str()) != Some("lua") {
            continue;
        }

        let loaded = match ModSource::from_file(&path) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(target: "scripting", "Failed to load mod {}: {}", path.display(), e);
                continue;
            }
        };

        if !config.is_mod_enabled(&loaded.name) {
            info!(
                target: "scripting",
                "Skipping disabled mod: {} from {}",
                loaded.name,
                path.display()
            );
            continue;
        }

        info!(target: "scripting", "Loaded mod: {} from {}", loaded.name, path.display());
        mods.push(loaded);
    }

    mods.sort_by(|a, b| a.name.cmp(&b.name));

    if mods.is_empty() {
        info!(target: "scripting", "No mods found in {}", dir.display());
    }
    mods
}
