//! Bucket state machine and reconciler tests with an in-memory store and cluster

mod common;

use asset_store_controller::constants::DELETE_FINALIZER_NAME;
use asset_store_controller::controller::client::NoCacheSync;
use asset_store_controller::controller::reconciler::{
    reconcile, resource_key, PhaseHandler, Reconciler, ReconcilerError,
};
use asset_store_controller::controller::retry::RetryPolicy;
use asset_store_controller::crd::{Bucket, BucketPhase, BucketPolicy, BucketStatus};
use asset_store_controller::events::MemoryEventRecorder;
use asset_store_controller::finalizer::FinalizerManager;
use asset_store_controller::handler::BucketHandler;
use asset_store_controller::runtime::error_policy::handle_reconciliation_error;
use common::{
    bucket, bucket_status, fresh_heartbeat, mark_deleted, now, stale_heartbeat, FakeObjectClient,
    MemoryStore, NAMESPACE,
};
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const RELIST: Duration = Duration::from_secs(30);

fn handler(store: &Arc<MemoryStore>, recorder: &Arc<MemoryEventRecorder>) -> BucketHandler {
    BucketHandler::new(
        Arc::clone(store) as _,
        Arc::clone(recorder) as _,
        "https://minio.test",
        RELIST,
    )
}

async fn run(store: &Arc<MemoryStore>, object: &Bucket) -> (Option<BucketStatus>, Option<anyhow::Error>) {
    let recorder = Arc::new(MemoryEventRecorder::new());
    let transition = handler(store, &recorder)
        .handle(&CancellationToken::new(), now(), object)
        .await;
    (transition.status, transition.error)
}

fn with_status(mut object: Bucket, status: BucketStatus) -> Bucket {
    object.status = Some(status);
    object
}

#[tokio::test]
async fn test_new_bucket_is_created_with_policy() {
    let store = Arc::new(MemoryStore::new().with_next_bucket_name("test"));
    let recorder = Arc::new(MemoryEventRecorder::new());
    let object = bucket("docs", BucketPolicy::ReadOnly, 1);

    let transition = handler(&store, &recorder)
        .handle(&CancellationToken::new(), now(), &object)
        .await;

    assert!(transition.error.is_none());
    let status = transition.status.unwrap();
    assert_eq!(status.phase, Some(BucketPhase::Ready));
    assert_eq!(status.reason, "BucketPolicyUpdated");
    assert_eq!(status.remote_name, "test");
    assert_eq!(status.url, "https://minio.test/test");
    assert_eq!(status.observed_generation, 1);
    assert_eq!(store.calls(), vec!["create_bucket", "set_bucket_policy"]);
    assert_eq!(store.policy("test"), Some(BucketPolicy::ReadOnly));

    let events = recorder.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, "BucketPolicyUpdated");
    assert!(!events[0].warning);
}

#[tokio::test]
async fn test_stale_ready_bucket_gets_policy_reapplied_once() {
    let store = Arc::new(MemoryStore::new().with_bucket("test", BucketPolicy::None));
    let object = with_status(
        bucket("docs", BucketPolicy::ReadOnly, 1),
        bucket_status(BucketPhase::Ready, "BucketPolicyUpdated", 1, "test", stale_heartbeat()),
    );

    let (status, error) = run(&store, &object).await;

    assert!(error.is_none());
    assert_eq!(status.unwrap().reason, "BucketPolicyUpdated");
    assert_eq!(store.count("set_bucket_policy"), 1);
    assert_eq!(store.policy("test"), Some(BucketPolicy::ReadOnly));
}

#[tokio::test]
async fn test_ready_bucket_with_matching_policy_only_refreshes_heartbeat() {
    let store = Arc::new(MemoryStore::new().with_bucket("test", BucketPolicy::ReadOnly));
    let object = with_status(
        bucket("docs", BucketPolicy::ReadOnly, 1),
        bucket_status(BucketPhase::Ready, "BucketPolicyUpdated", 1, "test", stale_heartbeat()),
    );

    let (status, error) = run(&store, &object).await;

    assert!(error.is_none());
    let status = status.unwrap();
    assert_eq!(status.phase, Some(BucketPhase::Ready));
    assert_eq!(status.last_heartbeat_time, Some(asset_store_controller::crd::format_heartbeat(now())));
    assert_eq!(store.calls(), vec!["bucket_exists", "compare_bucket_policy"]);
}

#[tokio::test]
async fn test_ready_bucket_inside_relist_window_is_left_alone() {
    let store = Arc::new(MemoryStore::new().with_bucket("test", BucketPolicy::ReadOnly));
    let object = with_status(
        bucket("docs", BucketPolicy::ReadOnly, 1),
        bucket_status(BucketPhase::Ready, "BucketPolicyUpdated", 1, "test", fresh_heartbeat()),
    );

    let (status, error) = run(&store, &object).await;

    assert!(status.is_none());
    assert!(error.is_none());
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_vanished_bucket_fails_and_drops_remote_name() {
    let store = Arc::new(MemoryStore::new());
    let object = with_status(
        bucket("docs", BucketPolicy::ReadOnly, 1),
        bucket_status(BucketPhase::Ready, "BucketPolicyUpdated", 1, "test", stale_heartbeat()),
    );

    let (status, error) = run(&store, &object).await;

    assert!(error.is_some());
    let status = status.unwrap();
    assert_eq!(status.phase, Some(BucketPhase::Failed));
    assert_eq!(status.reason, "BucketNotFound");
    assert!(status.remote_name.is_empty());
    assert!(status.message.contains("test"));
}

#[tokio::test]
async fn test_creation_error_is_recorded_and_returned() {
    let store = Arc::new(MemoryStore::new());
    store.fail("create_bucket");
    let recorder = Arc::new(MemoryEventRecorder::new());

    let transition = handler(&store, &recorder)
        .handle(
            &CancellationToken::new(),
            now(),
            &bucket("docs", BucketPolicy::ReadOnly, 1),
        )
        .await;

    let status = transition.status.unwrap();
    assert_eq!(status.phase, Some(BucketPhase::Failed));
    assert_eq!(status.reason, "BucketCreationFailure");
    assert!(status.message.contains("create_bucket failed"));
    assert!(transition.error.is_some());
    assert_eq!(recorder.reasons(), vec!["BucketCreationFailure"]);
    assert!(recorder.events()[0].warning);
}

#[tokio::test]
async fn test_policy_failure_after_creation_keeps_remote_name() {
    let store = Arc::new(MemoryStore::new().with_next_bucket_name("test"));
    store.fail("set_bucket_policy");

    let (status, error) = run(&store, &bucket("docs", BucketPolicy::ReadWrite, 1)).await;

    assert!(error.is_some());
    let status = status.unwrap();
    assert_eq!(status.reason, "BucketPolicyUpdateFailed");
    assert_eq!(status.remote_name, "test");
}

#[tokio::test]
async fn test_failed_reasons_reenter_like_fresh_handlers() {
    // NotFound and CreationFailure behave like a fresh add
    for reason in ["BucketNotFound", "BucketCreationFailure"] {
        let fresh_store = Arc::new(MemoryStore::new().with_next_bucket_name("test"));
        let (fresh_status, _) = run(&fresh_store, &bucket("docs", BucketPolicy::ReadOnly, 1)).await;

        let failed_store = Arc::new(MemoryStore::new().with_next_bucket_name("test"));
        let failed = with_status(
            bucket("docs", BucketPolicy::ReadOnly, 1),
            bucket_status(BucketPhase::Failed, reason, 1, "", fresh_heartbeat()),
        );
        let (failed_status, _) = run(&failed_store, &failed).await;

        assert_eq!(fresh_store.calls(), failed_store.calls(), "reason {reason}");
        assert_eq!(fresh_status, failed_status, "reason {reason}");
    }

    // VerificationFailure and PolicyUpdateFailed behave like a due relist
    for reason in ["BucketVerificationFailure", "BucketPolicyUpdateFailed"] {
        let ready_store = Arc::new(MemoryStore::new().with_bucket("test", BucketPolicy::None));
        let ready = with_status(
            bucket("docs", BucketPolicy::ReadOnly, 1),
            bucket_status(BucketPhase::Ready, "BucketPolicyUpdated", 1, "test", stale_heartbeat()),
        );
        let (ready_status, _) = run(&ready_store, &ready).await;

        let failed_store = Arc::new(MemoryStore::new().with_bucket("test", BucketPolicy::None));
        let failed = with_status(
            bucket("docs", BucketPolicy::ReadOnly, 1),
            bucket_status(BucketPhase::Failed, reason, 1, "test", fresh_heartbeat()),
        );
        let (failed_status, _) = run(&failed_store, &failed).await;

        assert_eq!(ready_store.calls(), failed_store.calls(), "reason {reason}");
        assert_eq!(ready_status, failed_status, "reason {reason}");
    }
}

#[tokio::test]
async fn test_policy_verification_failure_is_not_retried() {
    let store = Arc::new(MemoryStore::new().with_bucket("test", BucketPolicy::None));
    let object = with_status(
        bucket("docs", BucketPolicy::ReadOnly, 1),
        bucket_status(BucketPhase::Failed, "BucketPolicyVerificationFailed", 1, "test", stale_heartbeat()),
    );

    let (status, error) = run(&store, &object).await;

    assert!(status.is_none());
    assert!(error.is_none());
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_delete_without_remote_bucket_makes_no_calls() {
    for (reason, remote) in [("BucketCreationFailure", ""), ("BucketNotFound", "gone")] {
        let store = Arc::new(MemoryStore::new());
        let mut object = with_status(
            bucket("docs", BucketPolicy::ReadOnly, 1),
            bucket_status(BucketPhase::Failed, reason, 1, remote, fresh_heartbeat()),
        );
        mark_deleted(&mut object);

        let (status, error) = run(&store, &object).await;

        assert!(status.is_none());
        assert!(error.is_none());
        assert_eq!(store.count("delete_bucket"), 0, "reason {reason}");
    }
}

// ---------------------------------------------------------------------------
// Through the reconciler
// ---------------------------------------------------------------------------

fn retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        cache_sync_timeout: Duration::from_millis(10),
    }
}

fn reconciler(
    client: &Arc<FakeObjectClient<Bucket>>,
    store: &Arc<MemoryStore>,
    relist: Duration,
) -> Arc<Reconciler<Bucket>> {
    let recorder = Arc::new(MemoryEventRecorder::new());
    Arc::new(Reconciler::new(
        Arc::clone(client) as _,
        Arc::new(NoCacheSync),
        Arc::new(BucketHandler::new(
            Arc::clone(store) as _,
            recorder,
            "https://minio.test",
            relist,
        )),
        FinalizerManager::new(DELETE_FINALIZER_NAME),
        retry_policy(),
        RELIST,
        CancellationToken::new(),
    ))
}

fn with_finalizer(mut object: Bucket) -> Bucket {
    object.metadata.finalizers = Some(vec![DELETE_FINALIZER_NAME.to_string()]);
    object
}

#[tokio::test]
async fn test_delete_pass_removes_bucket_then_finalizer() {
    let store = Arc::new(MemoryStore::new().with_bucket("x", BucketPolicy::ReadOnly));
    let mut object = with_finalizer(with_status(
        bucket("docs", BucketPolicy::ReadOnly, 1),
        bucket_status(BucketPhase::Ready, "BucketPolicyUpdated", 1, "x", fresh_heartbeat()),
    ));
    mark_deleted(&mut object);
    let client = Arc::new(FakeObjectClient::new(object.clone()));

    let action = reconcile(Arc::new(object), reconciler(&client, &store, RELIST))
        .await
        .unwrap();

    assert_eq!(action, Action::await_change());
    assert_eq!(store.count("delete_bucket"), 1);
    assert_eq!(client.status_calls(), 0);
    assert!(client.object().is_none(), "object should be released");
}

#[tokio::test]
async fn test_failed_remote_delete_keeps_finalizer() {
    let store = Arc::new(MemoryStore::new().with_bucket("x", BucketPolicy::ReadOnly));
    store.fail("delete_bucket");
    let mut object = with_finalizer(with_status(
        bucket("docs", BucketPolicy::ReadOnly, 1),
        bucket_status(BucketPhase::Ready, "BucketPolicyUpdated", 1, "x", fresh_heartbeat()),
    ));
    mark_deleted(&mut object);
    let client = Arc::new(FakeObjectClient::new(object.clone()));

    let err = reconcile(Arc::new(object), reconciler(&client, &store, RELIST))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcilerError::Handler(_)), "unexpected error: {err}");
    let stored = client.object().unwrap();
    assert_eq!(
        stored.metadata.finalizers,
        Some(vec![DELETE_FINALIZER_NAME.to_string()])
    );
}

#[tokio::test]
async fn test_first_pass_adds_finalizer_and_writes_status() {
    let store = Arc::new(MemoryStore::new().with_next_bucket_name("test"));
    let object = bucket("docs", BucketPolicy::ReadOnly, 1);
    let client = Arc::new(FakeObjectClient::new(object.clone()));

    let action = reconcile(Arc::new(object), reconciler(&client, &store, RELIST))
        .await
        .unwrap();

    assert_eq!(action, Action::requeue(RELIST));
    assert_eq!(client.replace_calls(), 1);
    assert_eq!(client.status_calls(), 1);
    let stored = client.object().unwrap();
    assert_eq!(
        stored.metadata.finalizers,
        Some(vec![DELETE_FINALIZER_NAME.to_string()])
    );
    let status = stored.status.unwrap();
    assert_eq!(status.phase, Some(BucketPhase::Ready));
    assert_eq!(status.remote_name, "test");
}

#[tokio::test]
async fn test_unchanged_status_is_not_written_again() {
    let store = Arc::new(MemoryStore::new().with_next_bucket_name("test"));
    let object = bucket("docs", BucketPolicy::ReadOnly, 1);
    let client = Arc::new(FakeObjectClient::new(object.clone()));
    // a zero relist interval makes every pass re-verify the bucket
    let ctx = reconciler(&client, &store, Duration::ZERO);

    reconcile(Arc::new(object), Arc::clone(&ctx)).await.unwrap();
    let current = client.object().unwrap();
    reconcile(Arc::new(current), ctx).await.unwrap();

    assert_eq!(store.count("compare_bucket_policy"), 1);
    assert_eq!(client.status_calls(), 1);
    assert_eq!(client.replace_calls(), 1);
}

#[tokio::test]
async fn test_conflicting_finalizer_write_is_retried() {
    let store = Arc::new(MemoryStore::new().with_next_bucket_name("test"));
    let object = bucket("docs", BucketPolicy::ReadOnly, 1);
    let client = Arc::new(FakeObjectClient::new(object.clone()));
    client.conflict_next(2);

    reconcile(Arc::new(object), reconciler(&client, &store, RELIST))
        .await
        .unwrap();

    assert_eq!(client.replace_calls(), 3);
    let stored = client.object().unwrap();
    assert_eq!(
        stored.metadata.finalizers,
        Some(vec![DELETE_FINALIZER_NAME.to_string()])
    );
    assert_eq!(stored.status.unwrap().phase, Some(BucketPhase::Ready));
}

#[tokio::test]
async fn test_handler_and_status_failures_are_reported_together() {
    let store = Arc::new(MemoryStore::new());
    store.fail("create_bucket");
    let object = with_finalizer(bucket("docs", BucketPolicy::ReadOnly, 1));
    let client = Arc::new(FakeObjectClient::new(object.clone()));
    client.always_conflict_on_status();

    let err = reconcile(Arc::new(object), reconciler(&client, &store, RELIST))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcilerError::Combined { .. }), "unexpected error: {err}");
    let message = err.to_string();
    assert!(message.contains("create_bucket failed"), "{message}");
    assert!(message.contains("gave up"), "{message}");
    assert_eq!(client.status_calls(), 3);
}

#[tokio::test]
async fn test_missing_object_ends_the_pass() {
    let store = Arc::new(MemoryStore::new());
    let client = Arc::new(FakeObjectClient::<Bucket>::empty());

    let action = reconcile(
        Arc::new(bucket("docs", BucketPolicy::ReadOnly, 1)),
        reconciler(&client, &store, RELIST),
    )
    .await
    .unwrap();

    assert_eq!(action, Action::await_change());
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_released_object_drops_its_backoff_state() {
    let store = Arc::new(MemoryStore::new().with_bucket("x", BucketPolicy::ReadOnly));
    let mut object = with_finalizer(with_status(
        bucket("docs", BucketPolicy::ReadOnly, 1),
        bucket_status(BucketPhase::Ready, "BucketPolicyUpdated", 1, "x", fresh_heartbeat()),
    ));
    mark_deleted(&mut object);
    let client = Arc::new(FakeObjectClient::new(object.clone()));
    let ctx = reconciler(&client, &store, RELIST);

    store.fail("delete_bucket");
    let err = reconcile(Arc::new(object.clone()), Arc::clone(&ctx))
        .await
        .unwrap_err();
    handle_reconciliation_error(Arc::new(object.clone()), &err, Arc::clone(&ctx));
    assert!(ctx
        .backoff_states
        .lock()
        .unwrap()
        .contains_key(&resource_key(NAMESPACE, "docs")));

    store.recover("delete_bucket");
    reconcile(Arc::new(object), Arc::clone(&ctx)).await.unwrap();

    assert!(client.object().is_none());
    assert!(ctx.backoff_states.lock().unwrap().is_empty());
}
