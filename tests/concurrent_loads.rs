/// Integration tests for non-blocking loads running concurrently
///
/// Overlapping requests for one location must share a single execution, chains
/// that wait on each other must fail instead of hanging, and both execution modes
/// must leave the cache in the same state.
mod common;

use common::{loader_with_steps, Workspace};
use modload::{ErrorKind, LoadOptions, Stage};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_overlapping_loads_share_one_execution() {
    let ws = Workspace::new();
    let unit = ws.write("slow.step", "sleep 50\nvalue \"done\"");
    let (loader, steps) = loader_with_steps();
    let options = LoadOptions::new();

    let (first, second) = tokio::join!(
        loader.load_by_location_async(&unit, &options),
        loader.load_by_location_async(&unit, &options)
    );

    assert_eq!(first.unwrap(), json!("done"));
    assert_eq!(second.unwrap(), json!("done"));
    assert_eq!(steps.converts(&unit), 1);
    assert_eq!(steps.executes(&unit), 1);
}

#[tokio::test]
async fn test_overlapping_loads_share_failure() {
    let ws = Workspace::new();
    let unit = ws.write("slow.step", "sleep 30\nfail gave up");
    let (loader, steps) = loader_with_steps();
    let options = LoadOptions::new();

    let (first, second) = tokio::join!(
        loader.load_by_location_async(&unit, &options),
        loader.load_by_location_async(&unit, &options)
    );

    let first = first.unwrap_err();
    let second = second.unwrap_err();
    assert_eq!(first, second);
    assert_eq!(first.kind(), ErrorKind::Execution);
    assert_eq!(steps.executes(&unit), 1);
}

#[tokio::test]
async fn test_shared_dependency_executes_once() {
    let ws = Workspace::new();
    let a = ws.write("a.step", "require ./shared.step");
    let b = ws.write("b.step", "require ./shared.step");
    let shared = ws.write("shared.step", "sleep 40\nvalue 3");
    let (loader, steps) = loader_with_steps();
    let options = LoadOptions::new();

    let (left, right) = tokio::join!(
        loader.load_by_location_async(&a, &options),
        loader.load_by_location_async(&b, &options)
    );

    assert_eq!(left.unwrap(), json!([3]));
    assert_eq!(right.unwrap(), json!([3]));
    assert_eq!(steps.executes(&shared), 1);
    assert!(loader.cache().peek(&a).unwrap().dependencies().contains(&shared));
    assert!(loader.cache().peek(&b).unwrap().dependencies().contains(&shared));
}

#[tokio::test]
async fn test_chains_waiting_on_each_other_fail() {
    let ws = Workspace::new();
    let x = ws.write("x.step", "sleep 30\nrequire ./y.step");
    let y = ws.write("y.step", "sleep 30\nrequire ./x.step");
    let (loader, _steps) = loader_with_steps();
    let options = LoadOptions::new();

    let outcome = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(
            loader.load_by_location_async(&x, &options),
            loader.load_by_location_async(&y, &options)
        )
    })
    .await
    .expect("mutually waiting loads must not hang");

    assert_eq!(outcome.0.unwrap_err().kind(), ErrorKind::CircularLoad);
    assert_eq!(outcome.1.unwrap_err().kind(), ErrorKind::CircularLoad);
    assert!(loader.cache().peek(&x).is_none());
    assert!(loader.cache().peek(&y).is_none());
}

#[tokio::test]
async fn test_delayed_dependency_is_recorded() {
    let ws = Workspace::new();
    let a = ws.write("a.step", "require ./b.step\nvalue \"a\"");
    let b = ws.write("b.step", "sleep 25\nvalue \"b\"");
    let (loader, steps) = loader_with_steps();

    let value = loader
        .load_by_location_async(&a, &LoadOptions::new())
        .await
        .unwrap();
    assert_eq!(value, json!("a"));

    let entry = loader.cache().peek(&a).unwrap();
    assert_eq!(entry.stage(), Stage::ExecutedResult);
    assert!(entry.dependencies().contains(&b));
    assert_eq!(steps.executes(&b), 1);
}

#[tokio::test]
async fn test_sequential_loads_after_completion_hit_cache() {
    let ws = Workspace::new();
    let unit = ws.write("slow.step", "sleep 10\nvalue 1");
    let (loader, steps) = loader_with_steps();
    let options = LoadOptions::new();

    loader.load_by_location_async(&unit, &options).await.unwrap();
    loader.load_by_location_async(&unit, &options).await.unwrap();

    assert_eq!(steps.executes(&unit), 1);
}

#[tokio::test]
async fn test_blocking_and_non_blocking_modes_agree() {
    let ws = Workspace::new();
    let a = ws.write("a.step", "require ./b.step\nrequire ./c.step");
    ws.write("b.step", "require ./c.step");
    ws.write("c.step", "value {\"leaf\": true}");
    let options = LoadOptions::new();

    let (blocking, _) = loader_with_steps();
    let (non_blocking, _) = loader_with_steps();

    let left = blocking.load_by_location(&a, &options).unwrap();
    let right = non_blocking.load_by_location_async(&a, &options).await.unwrap();
    assert_eq!(left, right);

    let summarize = |loader: &modload::Loader| {
        loader
            .cache()
            .entries()
            .iter()
            .map(|entry| {
                (
                    entry.location().to_path_buf(),
                    entry.stage(),
                    entry.dependencies().clone(),
                    entry.result().cloned(),
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(summarize(&blocking), summarize(&non_blocking));
    assert_eq!(blocking.cache().len(), 3);
}

#[tokio::test]
async fn test_modified_file_is_reloaded_async() {
    let ws = Workspace::new();
    let unit = ws.write("a.step", "value 1");
    let (loader, steps) = loader_with_steps();
    let options = LoadOptions::new();

    loader.load_by_location_async(&unit, &options).await.unwrap();
    ws.rewrite("a.step", "value 2");
    assert_eq!(
        loader.load_by_location_async(&unit, &options).await.unwrap(),
        json!(2)
    );
    assert_eq!(steps.executes(&unit), 2);
}
