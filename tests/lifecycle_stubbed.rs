//! Lifecycle guarantees through the public API, with an in-memory runtime.
//!
//! Every scenario checks the same ledger: each container that was created is
//! killed and removed exactly once, and no endpoint escapes a failed setup.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ephemeral_pg::lifecycle::reserve_port;
use ephemeral_pg::testing::{RecordingRuntime, RuntimeCall, StubProbe};
use ephemeral_pg::{
    BlockingLifecycleManager, HarnessConfig, LifecycleManager, PostgresVersion, SessionError,
    ServiceInstanceSpec,
};

fn config() -> HarnessConfig {
    HarnessConfig::default()
        .with_ready_timeout(Duration::from_millis(150))
        .with_backoff(Duration::from_micros(500), Duration::from_millis(10))
}

/// Each id that was started is killed and removed exactly once, in that order.
fn assert_balanced(runtime: &RecordingRuntime) {
    let calls = runtime.calls();
    for id in runtime.ids() {
        let position = |call: RuntimeCall| calls.iter().position(|c| *c == call);
        let count = |call: RuntimeCall| calls.iter().filter(|c| **c == call).count();

        assert_eq!(count(RuntimeCall::Kill(id.clone())), 1, "kill {id}");
        assert_eq!(count(RuntimeCall::Remove(id.clone())), 1, "remove {id}");
        assert!(position(RuntimeCall::Kill(id.clone())) < position(RuntimeCall::Remove(id)));
    }
    assert!(runtime.live_containers().is_empty());
}

#[tokio::test]
async fn endpoint_is_only_seen_after_probe_confirms() {
    let runtime = Arc::new(RecordingRuntime::new());
    let probe = Arc::new(StubProbe::ready_after(4));
    let manager = LifecycleManager::new(runtime.clone(), probe.clone(), config());

    let observed = manager
        .postgres(PostgresVersion::V15, |endpoint| async move { endpoint })
        .await
        .unwrap();

    assert_eq!(probe.calls(), 4);
    assert_eq!(probe.seen(), vec![observed.clone()]);
    assert_eq!(observed.database, "postgres");
    assert_balanced(&runtime);
}

#[tokio::test]
async fn every_failure_mode_cleans_up() {
    for step in ["pull", "create", "start", "exit"] {
        let runtime = Arc::new(RecordingRuntime::new());
        match step {
            "pull" => runtime.set_fail_pull(true),
            "create" => runtime.set_fail_create(true),
            "start" => runtime.set_fail_start(true),
            _ => runtime.set_exit_on_start(true),
        }
        let manager =
            LifecycleManager::new(runtime.clone(), Arc::new(StubProbe::never()), config());

        let err = manager
            .postgres(PostgresVersion::Latest, |_| async {})
            .await
            .unwrap_err();

        let expected = match step {
            "pull" => matches!(err, SessionError::ImagePullFailed { .. }),
            "create" => matches!(err, SessionError::ContainerCreationFailed { .. }),
            "start" => matches!(err, SessionError::ContainerStartFailed { .. }),
            _ => matches!(err, SessionError::ContainerExited { .. }),
        };
        assert!(expected, "{step}: unexpected error {err}");
        assert_balanced(&runtime);
    }
}

#[tokio::test]
async fn failed_pull_never_creates() {
    let runtime = Arc::new(RecordingRuntime::new());
    runtime.set_fail_pull(true);
    let manager = LifecycleManager::new(runtime.clone(), Arc::new(StubProbe::always()), config());

    let spec = ServiceInstanceSpec::new("registry.invalid/nothing:1", 80);
    assert!(manager.scoped(&spec, |_| async {}).await.is_err());

    assert_eq!(
        runtime.calls(),
        vec![RuntimeCall::Pull("registry.invalid/nothing:1".to_string())]
    );
}

#[tokio::test]
async fn never_ready_times_out_and_removes() {
    let runtime = Arc::new(RecordingRuntime::new());
    let manager = LifecycleManager::new(runtime.clone(), Arc::new(StubProbe::never()), config());

    let started = std::time::Instant::now();
    let err = manager
        .postgres(PostgresVersion::V11, |_| async { unreachable!() })
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::ReadinessTimeout { .. }));
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(runtime.ids().len(), 1);
    assert_balanced(&runtime);
}

#[tokio::test]
async fn concurrent_variants_get_distinct_endpoints() {
    let runtime = Arc::new(RecordingRuntime::new());
    let manager = LifecycleManager::new(runtime.clone(), Arc::new(StubProbe::always()), config());

    let (a, b) = tokio::join!(
        manager.postgres(PostgresVersion::V14, |endpoint| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            endpoint
        }),
        manager.postgres(PostgresVersion::V16, |endpoint| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            endpoint
        }),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.port, b.port);
    let images: HashSet<String> = runtime.requests().into_iter().map(|r| r.image).collect();
    assert_eq!(
        images,
        HashSet::from(["postgres:14".to_string(), "postgres:16".to_string()])
    );
    let ids = runtime.ids();
    assert_ne!(ids[0], ids[1]);
    assert_balanced(&runtime);
}

#[test]
fn blocking_guard_scopes_the_container() {
    let runtime = Arc::new(RecordingRuntime::new());
    runtime.set_remove_not_found(true);
    let manager = LifecycleManager::new(runtime.clone(), Arc::new(StubProbe::always()), config());
    let blocking = BlockingLifecycleManager::new(manager).unwrap();

    {
        let pg = blocking.postgres(PostgresVersion::V12).unwrap();
        assert!(pg.connection_string().starts_with("postgres://postgres:"));
        assert!(blocking.is_ready(&pg));
        assert_eq!(runtime.live_containers().len(), 1);
    }

    // Removal reported not-found, which is still a clean exit.
    assert_balanced(&runtime);
}

#[test]
fn held_port_reservations_never_collide() {
    let threads: Vec<_> = (0..32)
        .map(|_| std::thread::spawn(|| reserve_port("127.0.0.1").unwrap()))
        .collect();
    let reservations: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

    let ports: HashSet<u16> = reservations.iter().map(|r| r.port()).collect();
    assert_eq!(ports.len(), reservations.len());
}

#[test]
fn abandoned_session_is_removed_even_if_runtime_stops() {
    let runtime = Arc::new(RecordingRuntime::new());
    let config = config().with_ready_timeout(Duration::from_secs(5));
    let manager = LifecycleManager::new(runtime.clone(), Arc::new(StubProbe::never()), config);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let outcome = rt.block_on(async {
        tokio::time::timeout(
            Duration::from_millis(50),
            manager.postgres(PostgresVersion::V16, |_| async {}),
        )
        .await
    });
    drop(rt);

    assert!(outcome.is_err(), "setup should still be waiting");
    assert_eq!(runtime.ids().len(), 1);
    assert_balanced(&runtime);
}
