// Ticks and coroutine resumption must never run guest code at the same time

use mlua::{Function, Lua};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use narrator_llm::ConversationEngine;
use narrator_scripting_host::{
    Capability, CapabilityKind, GuestAsyncBridge, ModContext, NARRATOR_API, ScriptInstance,
};

mod common;

static INSIDE: AtomicUsize = AtomicUsize::new(0);
static MAX_INSIDE: AtomicUsize = AtomicUsize::new(0);
static CALLS: AtomicUsize = AtomicUsize::new(0);

fn build_witness(lua: &Lua, _context: &Arc<ModContext>) -> mlua::Result<Function> {
    lua.create_function(|_, ()| {
        let now = INSIDE.fetch_add(1, Ordering::SeqCst) + 1;
        MAX_INSIDE.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_micros(200));
        INSIDE.fetch_sub(1, Ordering::SeqCst);
        CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tick_and_resume_never_overlap() {
    let mut capabilities: Vec<Capability> = NARRATOR_API.to_vec();
    capabilities.push(Capability {
        name: "witness",
        kind: CapabilityKind::Sync,
        build: build_witness,
    });

    let client = common::ScriptedClient::new();
    let context = Arc::new(ModContext::new(
        "witness",
        Arc::new(ConversationEngine::new(client)),
    ));

    let mut instance = ScriptInstance::new("witness", "").unwrap();
    {
        let interp = instance.interpreter().lock().await;
        GuestAsyncBridge::install(interp.lua(), &context, &capabilities).unwrap();
    }

    let update: Function = {
        let interp = instance.interpreter().lock().await;
        interp
            .lua()
            .load("return function() witness() witness() end")
            .eval()
            .unwrap()
    };
    instance.set_update(Some(update)).await;
    instance.start_ticking(Duration::from_millis(1));

    let body = r#"
        for i = 1, 40 do
            witness()
            sleep(0.002)
            witness()
        end
        return "done"
    "#;
    let outcome = instance.trampoline().run_source(body).await.unwrap();
    assert_eq!(outcome.await_cycles, 40);

    assert!(instance.ticks() > 0, "the scheduler never ticked");
    assert!(instance.stop_ticking().await.is_none());

    assert!(CALLS.load(Ordering::SeqCst) >= 80);
    assert_eq!(MAX_INSIDE.load(Ordering::SeqCst), 1);
}
