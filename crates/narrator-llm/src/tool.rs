use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::types::ToolSpec;

/// Result of one tool invocation. Both arms carry text for the model.
pub type ToolOutcome = Result<String, String>;

/// Something that can run a tool with the model's argument string
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, input: String) -> ToolOutcome;
}

/// Adapter for plain synchronous host functions
struct FnInvoker<F>(F);

#[async_trait]
impl<F> ToolInvoker for FnInvoker<F>
where
    F: Fn(String) -> ToolOutcome + Send + Sync,
{
    async fn invoke(&self, input: String) -> ToolOutcome {
        (self.0)(input)
    }
}

/// A named tool the model may call. Immutable once built.
#[derive(Clone)]
pub struct ToolDescriptor {
    name: String,
    description: String,
    invoker: Arc<dyn ToolInvoker>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            invoker,
        }
    }

    /// Wrap a host closure taking and returning one string
    pub fn from_fn<F>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(String) -> ToolOutcome + Send + Sync + 'static,
    {
        Self::new(name, description, Arc::new(FnInvoker(f)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }

    pub async fn invoke(&self, input: String) -> ToolOutcome {
        self.invoker.invoke(input).await
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Error text handed to the model when a tool fails
pub fn format_tool_error(name: &str, message: &str) -> String {
    format!("Error in tool '{}': {}", name, message)
}
