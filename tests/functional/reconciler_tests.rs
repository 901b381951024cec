//! Reconciliation passes: fetch, discovery, handler and status persistence.

use std::sync::Arc;
use std::time::Duration;

use package_operator::config::{ExecutorSettings, Timings};
use package_operator::controller::executor::PodImageDiscoverer;
use package_operator::controller::factory::DefaultHandlerFactory;
use package_operator::controller::handler::ReconcileOutcome;
use package_operator::controller::manifests::ManifestRegistry;
use package_operator::controller::reconciler::Reconciler;
use package_operator::crd::{
    CONDITION_READY, CONDITION_SYNCED, Condition, REASON_AVAILABLE, REASON_CREATING,
    REASON_RECONCILE_SUCCESS,
};

use crate::common::fixtures::{
    EXECUTOR_IMAGE, InstallRequestBuilder, TEST_NAME, TEST_NAMESPACE, install_request,
};
use crate::fake_cluster::{FakeCluster, FakeLogReader, Op};

type TestReconciler =
    Reconciler<FakeCluster, PodImageDiscoverer<FakeCluster>, DefaultHandlerFactory<FakeLogReader>>;

fn reconciler_with(cluster: &FakeCluster, settings: ExecutorSettings) -> TestReconciler {
    Reconciler::new(
        cluster.clone(),
        PodImageDiscoverer::new(cluster.clone(), settings),
        DefaultHandlerFactory::new(
            FakeLogReader::new(),
            Arc::new(ManifestRegistry::with_defaults()),
            Timings::default(),
        ),
    )
}

fn reconciler(cluster: &FakeCluster) -> TestReconciler {
    reconciler_with(
        cluster,
        ExecutorSettings {
            image_override: Some(EXECUTOR_IMAGE.to_string()),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_missing_request_is_done() {
    let cluster = FakeCluster::new();

    let outcome = reconciler(&cluster)
        .reconcile(TEST_NAMESPACE, TEST_NAME)
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    assert_eq!(cluster.calls(), vec![Op::GetInstallRequest]);
}

#[tokio::test]
async fn test_request_fetch_failure() {
    let cluster = FakeCluster::new();
    cluster.put_request(install_request());
    cluster.fail(Op::GetInstallRequest, 500, "InternalError");

    let err = reconciler(&cluster)
        .reconcile(TEST_NAMESPACE, TEST_NAME)
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(cluster.count(Op::CreateJob), 0);
}

#[tokio::test]
async fn test_discovery_failure_leaves_status_alone() {
    let cluster = FakeCluster::new();
    cluster.put_request(install_request());
    // No override and no pod identity: discovery cannot succeed.
    let reconciler = reconciler_with(&cluster, ExecutorSettings::default());

    let reconciliation = reconciler
        .reconcile_detailed(TEST_NAMESPACE, TEST_NAME)
        .await
        .unwrap();

    assert_eq!(reconciliation.outcome, ReconcileOutcome::RequeueNow);
    assert_eq!(reconciliation.current, None);
    assert_eq!(cluster.count(Op::CreateJob), 0);
    assert_eq!(cluster.count(Op::PatchStatus), 0);
    assert_eq!(cluster.request(TEST_NAMESPACE, TEST_NAME).unwrap().status, None);
}

#[tokio::test]
async fn test_discovery_through_operator_pod() {
    let cluster = FakeCluster::new();
    cluster.put_request(install_request());
    cluster.add_pod("package-system", "package-operator-0", &[("manager", EXECUTOR_IMAGE)]);
    let reconciler = reconciler_with(
        &cluster,
        ExecutorSettings {
            pod_namespace: Some("package-system".to_string()),
            pod_name: Some("package-operator-0".to_string()),
            ..Default::default()
        },
    );

    reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap();

    let job = cluster.job(TEST_NAMESPACE, TEST_NAME).unwrap();
    let pod_spec = job.spec.unwrap().template.spec.unwrap();
    assert_eq!(pod_spec.containers[0].image.as_deref(), Some(EXECUTOR_IMAGE));
}

#[tokio::test]
async fn test_new_request_persists_status() {
    let cluster = FakeCluster::new();
    cluster.put_request(install_request());

    let reconciliation = reconciler(&cluster)
        .reconcile_detailed(TEST_NAMESPACE, TEST_NAME)
        .await
        .unwrap();

    assert_eq!(
        reconciliation.outcome,
        ReconcileOutcome::RequeueAfter(Duration::from_secs(10))
    );
    assert_eq!(reconciliation.ready_transition(), Some(REASON_CREATING));
    assert_eq!(cluster.count(Op::CreateJob), 1);
    assert_eq!(cluster.count(Op::PatchStatus), 1);

    let stored = cluster.request(TEST_NAMESPACE, TEST_NAME).unwrap();
    let status = stored.status.unwrap();
    assert_eq!(status.conditions.reason(CONDITION_READY), Some(REASON_CREATING));
    assert_eq!(
        status.conditions.reason(CONDITION_SYNCED),
        Some(REASON_RECONCILE_SUCCESS)
    );
    assert_eq!(status.install_job.unwrap().name, TEST_NAME);
}

#[tokio::test]
async fn test_unchanged_status_is_not_patched() {
    let cluster = FakeCluster::new();
    cluster.put_request(install_request());
    let reconciler = reconciler(&cluster);

    reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap();
    let after_first = cluster.request(TEST_NAMESPACE, TEST_NAME).unwrap();
    cluster.clear_calls();

    // Job still running: same conditions, nothing to write.
    let reconciliation = reconciler
        .reconcile_detailed(TEST_NAMESPACE, TEST_NAME)
        .await
        .unwrap();

    assert_eq!(
        cluster.calls(),
        vec![Op::GetInstallRequest, Op::GetJob]
    );
    assert_eq!(reconciliation.ready_transition(), None);
    assert_eq!(cluster.request(TEST_NAMESPACE, TEST_NAME).unwrap(), after_first);
}

#[tokio::test]
async fn test_patch_conflict_is_reported() {
    let cluster = FakeCluster::new();
    cluster.put_request(install_request());
    cluster.fail(Op::PatchStatus, 409, "Conflict");

    let err = reconciler(&cluster)
        .reconcile(TEST_NAMESPACE, TEST_NAME)
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert!(err.is_retryable());
    // The job exists; the next pass adopts it.
    assert_eq!(cluster.job_count(), 1);
}

#[tokio::test]
async fn test_retry_after_conflict_adopts_job() {
    let cluster = FakeCluster::new();
    cluster.put_request(install_request());
    cluster.fail(Op::PatchStatus, 409, "Conflict");
    let reconciler = reconciler(&cluster);

    reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap_err();
    cluster.clear_failures();
    let outcome = reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::RequeueAfter(Duration::from_secs(10)));
    assert_eq!(cluster.job_count(), 1);
    let stored = cluster.request(TEST_NAMESPACE, TEST_NAME).unwrap();
    assert!(stored.install_job().is_some());
}

#[tokio::test]
async fn test_installed_request_is_done() {
    let cluster = FakeCluster::new();
    cluster.put_request(
        InstallRequestBuilder::new(TEST_NAME)
            .install_job()
            .package_record()
            .condition(Condition::available())
            .condition(Condition::reconcile_success())
            .build(),
    );
    let reconciler = reconciler(&cluster);

    let reconciliation = reconciler
        .reconcile_detailed(TEST_NAMESPACE, TEST_NAME)
        .await
        .unwrap();

    assert_eq!(reconciliation.outcome, ReconcileOutcome::Done);
    assert_eq!(reconciliation.ready_transition(), None);
    assert_eq!(cluster.calls(), vec![Op::GetInstallRequest]);
    assert_eq!(
        cluster
            .request(TEST_NAMESPACE, TEST_NAME)
            .unwrap()
            .status
            .unwrap()
            .conditions
            .reason(CONDITION_READY),
        Some(REASON_AVAILABLE)
    );
}
