use std::sync::Arc;

use narrator_llm::{ConversationEngine, SendOptions};

/// Host services a mod's capabilities are built against
#[derive(Clone)]
pub struct ModContext {
    /// Name of the mod, used in logs and faults
    pub script: String,
    /// Shared conversation engine (stateless, cheap to share between mods)
    pub engine: Arc<ConversationEngine>,
    /// Request options a script starts from before its own overrides
    pub defaults: SendOptions,
    /// API documentation embedded in `prompt` requests
    pub documentation: Arc<str>,
}

impl ModContext {
    pub fn new(script: impl Into<String>, engine: Arc<ConversationEngine>) -> Self {
        Self {
            script: script.into(),
            engine,
            defaults: SendOptions::default(),
            documentation: Arc::from(""),
        }
    }

    pub fn with_defaults(mut self, defaults: SendOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_documentation(mut self, documentation: impl Into<Arc<str>>) -> Self {
        self.documentation = documentation.into();
        self
    }

    /// Same services, different mod
    pub fn for_script(&self, script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            ..self.clone()
        }
    }
}
