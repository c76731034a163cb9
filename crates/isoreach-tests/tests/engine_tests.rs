//! Engine lifecycle against a scripted container runtime.

use isoreach_core::{CityId, Error, FactorSet, Period, RetryPolicy};
use isoreach_engine::{EngineManager, EngineSettings, EngineState};
use isoreach_tests::{CITY, ScriptedRuntime, TestContext};
use std::sync::Arc;

async fn manager(ctx: &TestContext, runtime: Arc<ScriptedRuntime>, attempts: u32) -> EngineManager {
    let settings = EngineSettings {
        retry: RetryPolicy::immediate(attempts),
        ..Default::default()
    };
    let mut manager = EngineManager::open(CityId::new(CITY), runtime, settings, ctx.layout())
        .await
        .expect("Failed to open engine");
    manager.set_map_data(ctx.data_root().join("osm").join("2973.osm.pbf"));
    manager
}

#[tokio::test]
async fn test_unchanged_config_reuses_graph() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let runtime = Arc::new(ScriptedRuntime::ready());
    let graph_marker = ctx.layout().graph_cache_dir().join("nodes");

    let mut first = manager(&ctx, runtime.clone(), 5).await;
    first.build(false).await.expect("First build failed");
    tokio::fs::create_dir_all(ctx.layout().graph_cache_dir()).await.unwrap();
    tokio::fs::write(&graph_marker, b"graph").await.unwrap();
    first.stop().await.unwrap();
    assert_eq!(runtime.live(), 0);

    let mut second = manager(&ctx, runtime.clone(), 5).await;
    second.build(false).await.expect("Second build failed");
    assert_eq!(second.state(), EngineState::Ready);
    assert!(graph_marker.exists(), "unchanged config must keep the graph");
    second.stop().await.unwrap();
    assert_eq!(runtime.starts(), 2);
}

#[tokio::test]
async fn test_changed_config_wipes_graph() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let runtime = Arc::new(ScriptedRuntime::ready());
    let graph_marker = ctx.layout().graph_cache_dir().join("nodes");

    let mut first = manager(&ctx, runtime.clone(), 5).await;
    first.build(false).await.unwrap();
    tokio::fs::create_dir_all(ctx.layout().graph_cache_dir()).await.unwrap();
    tokio::fs::write(&graph_marker, b"graph").await.unwrap();
    first.stop().await.unwrap();

    let mut second = manager(&ctx, runtime.clone(), 5).await;
    second
        .set_factors(Period::Peak, FactorSet::uniform(0.6))
        .await
        .unwrap();
    second.build(false).await.unwrap();
    assert!(!graph_marker.exists(), "changed config must rebuild from scratch");
    second.stop().await.unwrap();
}

#[tokio::test]
async fn test_unclean_shutdown_forces_rebuild() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let runtime = Arc::new(ScriptedRuntime::ready());
    let graph_marker = ctx.layout().graph_cache_dir().join("nodes");

    let mut first = manager(&ctx, runtime.clone(), 5).await;
    first.build(false).await.unwrap();
    tokio::fs::create_dir_all(ctx.layout().graph_cache_dir()).await.unwrap();
    tokio::fs::write(&graph_marker, b"graph").await.unwrap();
    // Dropped without stop: the lock stays behind.
    drop(first);
    assert!(ctx.layout().lock_path().exists());

    let mut second = manager(&ctx, runtime.clone(), 5).await;
    second.build(false).await.unwrap();
    assert!(!graph_marker.exists());
    second.stop().await.unwrap();
    assert!(!ctx.layout().lock_path().exists());
}

#[tokio::test]
async fn test_build_gives_up_after_five_attempts() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let runtime = Arc::new(ScriptedRuntime::never_ready());
    let mut manager = manager(&ctx, runtime.clone(), 5).await;

    match manager.build(false).await {
        Err(Error::EngineBuildFailed { attempts }) => assert_eq!(attempts, 5),
        other => panic!("expected EngineBuildFailed, got {:?}", other),
    }
    assert_eq!(runtime.starts(), 5);
    assert_eq!(runtime.live(), 0, "no engine containers may remain");
    assert_eq!(manager.state(), EngineState::Failed);

    manager.stop().await.unwrap();
    assert!(!ctx.layout().lock_path().exists());
}
