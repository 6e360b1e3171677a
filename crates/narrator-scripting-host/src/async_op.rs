//! Pending host work handed to a guest script

use serde::Serialize;
use std::fmt;
use std::future::Future;
use thiserror::Error;
use tokio::task::JoinHandle;

use narrator_llm::LlmError;

/// Failure captured inside an [`AsyncOperationHandle`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsyncFault {
    /// The remote service could not be reached or refused the request
    #[error("transport failure: {0}")]
    Transport(String),

    /// The operation itself failed
    #[error("{0}")]
    Operation(String),

    /// The task panicked or was aborted before settling
    #[error("operation aborted: {0}")]
    Aborted(String),
}

impl From<LlmError> for AsyncFault {
    fn from(err: LlmError) -> Self {
        if err.is_transport() {
            AsyncFault::Transport(err.to_string())
        } else {
            AsyncFault::Operation(err.to_string())
        }
    }
}

impl From<std::io::Error> for AsyncFault {
    fn from(err: std::io::Error) -> Self {
        AsyncFault::Operation(err.to_string())
    }
}

impl From<String> for AsyncFault {
    fn from(message: String) -> Self {
        AsyncFault::Operation(message)
    }
}

impl From<&str> for AsyncFault {
    fn from(message: &str) -> Self {
        AsyncFault::Operation(message.to_string())
    }
}

/// Settled outcome: a value (when the operation produces one) or a fault
pub type Settled = Result<Option<serde_json::Value>, AsyncFault>;

/// One pending unit of host work.
///
/// The work is spawned on the tokio runtime as soon as the handle is built,
/// so it makes progress whether or not anyone awaits it yet. Faults are
/// captured in the settled result instead of being raised.
pub struct AsyncOperationHandle {
    task: JoinHandle<Settled>,
    has_result: bool,
}

impl AsyncOperationHandle {
    /// Wrap a side-effecting operation that produces no value
    pub fn from_action<F, E>(operation: F) -> Self
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<AsyncFault> + Send + 'static,
    {
        let task = tokio::spawn(async move { operation.await.map(|()| None).map_err(Into::into) });
        Self {
            task,
            has_result: false,
        }
    }

    /// Wrap an operation producing a value for the guest
    pub fn from_value<F, T, E>(operation: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<AsyncFault> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let value = operation.await.map_err(Into::into)?;
            serde_json::to_value(value)
                .map(Some)
                .map_err(|e| AsyncFault::Operation(format!("result is not representable: {e}")))
        });
        Self {
            task,
            has_result: true,
        }
    }

    /// Whether resuming should pass a value back to the guest
    pub fn has_result(&self) -> bool {
        self.has_result
    }

    /// Whether the underlying work has already settled
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the operation to settle. Consumes the handle, so it can only
    /// be awaited once.
    pub async fn settle(self) -> Settled {
        match self.task.await {
            Ok(settled) => settled,
            Err(join_err) => Err(AsyncFault::Aborted(join_err.to_string())),
        }
    }
}

impl fmt::Debug for AsyncOperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOperationHandle")
            .field("has_result", &self.has_result)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

impl mlua::UserData for AsyncOperationHandle {}
