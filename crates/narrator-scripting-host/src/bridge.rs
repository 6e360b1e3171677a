//! Guest/host async bridge
//!
//! Host capabilities are declared in a static table. Sync entries become
//! plain guest globals. Async entries return an [`AsyncOperationHandle`] and
//! are wrapped so that the guest immediately yields the handle; the guest
//! never holds one itself. The trampoline then recognises the yield as a
//! [`SuspensionRequest`].

use mlua::{Function, Lua, MultiValue, Table, Value};
use std::sync::Arc;

use crate::async_op::AsyncOperationHandle;
use crate::context::ModContext;

/// Whether calling a capability suspends the calling coroutine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Sync,
    Async,
}

/// Builds the host function for one capability
pub type CapabilityBuilder = fn(&Lua, &Arc<ModContext>) -> mlua::Result<Function>;

/// One named host function exposed to guests
#[derive(Clone, Copy)]
pub struct Capability {
    pub name: &'static str,
    pub kind: CapabilityKind,
    pub build: CapabilityBuilder,
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

// `yield` is captured here, so rebinding `coroutine.yield` in the guest
// cannot detach a capability from the trampoline.
const ASYNC_WRAPPER: &str = r#"
local host, yield = ...
return function(...)
    return yield(host(...))
end
"#;

/// Signal that a coroutine parked on exactly one pending host operation
#[derive(Debug)]
pub struct SuspensionRequest {
    handle: AsyncOperationHandle,
}

impl SuspensionRequest {
    pub fn into_handle(self) -> AsyncOperationHandle {
        self.handle
    }
}

/// What a coroutine handed back when it yielded
#[derive(Debug)]
pub enum Yielded {
    /// Bare `coroutine.yield()`: resume with nothing
    Checkpoint,
    Suspension(SuspensionRequest),
}

pub struct GuestAsyncBridge;

impl GuestAsyncBridge {
    /// Install every capability of `capabilities` as a guest global
    pub fn install(
        lua: &Lua,
        context: &Arc<ModContext>,
        capabilities: &[Capability],
    ) -> mlua::Result<()> {
        let globals = lua.globals();
        let coroutine: Table = globals.get("coroutine")?;
        let yield_fn: Function = coroutine.get("yield")?;

        for capability in capabilities {
            let host = (capability.build)(lua, context)?;
            let installed = match capability.kind {
                CapabilityKind::Sync => host,
                CapabilityKind::Async => {
                    let wrapped: Function = lua
                        .load(ASYNC_WRAPPER)
                        .set_name(format!("={}", capability.name))
                        .call((host, yield_fn.clone()))?;
                    wrapped
                }
            };
            globals.set(capability.name, installed)?;
        }

        Ok(())
    }

    /// Classify the values a coroutine yielded.
    ///
    /// Takes ownership of the handle out of its userdata, so the same
    /// handle can never be awaited twice.
    pub fn classify(values: MultiValue) -> Result<Yielded, String> {
        let mut values = values.into_iter();
        match (values.next(), values.next()) {
            (None, _) => Ok(Yielded::Checkpoint),
            (Some(Value::UserData(ud)), None) if ud.is::<AsyncOperationHandle>() => {
                let handle = ud
                    .take::<AsyncOperationHandle>()
                    .map_err(|e| format!("async operation already consumed: {e}"))?;
                Ok(Yielded::Suspension(SuspensionRequest { handle }))
            }
            (Some(value), None) => Err(format!(
                "coroutine yielded a {} instead of an async operation",
                value.type_name()
            )),
            (Some(_), Some(_)) => Err("coroutine yielded more than one value".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_op::AsyncFault;

    #[tokio::test]
    async fn test_classify_handle() {
        let lua = Lua::new();
        let ud = lua
            .create_userdata(AsyncOperationHandle::from_value(async {
                Ok::<_, AsyncFault>("done")
            }))
            .unwrap();

        let yielded = GuestAsyncBridge::classify(MultiValue::from_vec(vec![Value::UserData(ud.clone())]))
            .unwrap();
        let Yielded::Suspension(request) = yielded else {
            panic!("expected a suspension");
        };
        assert!(request.into_handle().has_result());

        // The userdata no longer owns the handle
        let again = GuestAsyncBridge::classify(MultiValue::from_vec(vec![Value::UserData(ud)]));
        assert!(again.is_err());
    }

    #[test]
    fn test_empty_yield_is_checkpoint() {
        assert!(matches!(
            GuestAsyncBridge::classify(MultiValue::new()),
            Ok(Yielded::Checkpoint)
        ));
    }

    #[test]
    fn test_other_values_are_rejected() {
        let err = GuestAsyncBridge::classify(MultiValue::from_vec(vec![Value::Integer(3)]))
            .unwrap_err();
        assert!(err.contains("integer"));

        let err = GuestAsyncBridge::classify(MultiValue::from_vec(vec![
            Value::Boolean(true),
            Value::Boolean(false),
        ]))
        .unwrap_err();
        assert!(err.contains("more than one"));
    }
}
