use std::path::PathBuf;

/// Application directory name used under the platform config and data roots
pub const APP_NAME: &str = "narrator";

/// Where narrator keeps its files.
///
/// Unix-like systems follow the XDG base directories:
/// - Config: $XDG_CONFIG_HOME/narrator (default: ~/.config/narrator)
/// - Data: $XDG_DATA_HOME/narrator (default: ~/.local/share/narrator)
///
/// Windows uses %APPDATA%\narrator for both.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl ProjectPaths {
    /// Resolve paths for narrator, or `None` without a home directory
    pub fn new() -> Option<Self> {
        Self::for_app(APP_NAME)
    }

    /// Resolve paths for an arbitrary application name
    pub fn for_app(name: &str) -> Option<Self> {
        let home = home_dir()?;

        #[cfg(target_os = "windows")]
        let (config_root, data_root) = {
            let appdata = std::env::var("APPDATA")
                .map(PathBuf::from)
                .unwrap_or_else(|_| home.join("AppData").join("Roaming"));
            (appdata.clone(), appdata)
        };

        #[cfg(not(target_os = "windows"))]
        let (config_root, data_root) = (
            xdg_dir("XDG_CONFIG_HOME").unwrap_or_else(|| home.join(".config")),
            xdg_dir("XDG_DATA_HOME").unwrap_or_else(|| home.join(".local").join("share")),
        );

        Some(Self {
            config_dir: config_root.join(name),
            data_dir: data_root.join(name),
        })
    }

    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// Default location of `config.toml`
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Default directory scanned for `*.lua` mods
    pub fn mods_dir(&self) -> PathBuf {
        self.data_dir.join("mods")
    }

    /// Default location of the API documentation handed to `prompt`
    pub fn docs_file(&self) -> PathBuf {
        self.data_dir.join("Documentation.md")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// Home directory from HOME, falling back to USERPROFILE
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// An XDG override, ignored when empty
#[cfg(not(target_os = "windows"))]
fn xdg_dir(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
