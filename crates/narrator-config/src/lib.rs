pub mod llm_config;
pub mod mods_config;
pub mod narrator_config;
pub mod paths;

pub use llm_config::LlmConfig;
pub use mods_config::ModsConfig;
pub use narrator_config::{ConfigLoadError, LoggingConfig, NarratorConfig};
pub use paths::ProjectPaths;
