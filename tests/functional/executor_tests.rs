//! Executor image discovery against the fake cluster.

use crate::fake_cluster::{FakeCluster, Op};
use package_operator::config::ExecutorSettings;
use package_operator::controller::error::{Error, ErrorKind};
use package_operator::controller::executor::{ExecutorInfoDiscoverer, PodImageDiscoverer};

const OPERATOR_NS: &str = "package-system";
const OPERATOR_POD: &str = "package-operator-0";

fn pod_settings() -> ExecutorSettings {
    ExecutorSettings {
        image_override: None,
        pod_namespace: Some(OPERATOR_NS.to_string()),
        pod_name: Some(OPERATOR_POD.to_string()),
        container: None,
    }
}

#[tokio::test]
async fn test_override_skips_cluster() {
    let cluster = FakeCluster::new();
    let settings = ExecutorSettings {
        image_override: Some("local/executor:dev".to_string()),
        ..Default::default()
    };

    let info = PodImageDiscoverer::new(cluster.clone(), settings)
        .discover()
        .await
        .unwrap();

    assert_eq!(info.image, "local/executor:dev");
    assert!(cluster.calls().is_empty());
}

#[tokio::test]
async fn test_first_container_image() {
    let cluster = FakeCluster::new();
    cluster.add_pod(
        OPERATOR_NS,
        OPERATOR_POD,
        &[("manager", "package-operator:v1"), ("sidecar", "proxy:v2")],
    );

    let info = PodImageDiscoverer::new(cluster.clone(), pod_settings())
        .discover()
        .await
        .unwrap();

    assert_eq!(info.image, "package-operator:v1");
    assert_eq!(cluster.count(Op::GetPod), 1);
}

#[tokio::test]
async fn test_configured_container_image() {
    let cluster = FakeCluster::new();
    cluster.add_pod(
        OPERATOR_NS,
        OPERATOR_POD,
        &[("manager", "package-operator:v1"), ("executor", "executor:v3")],
    );
    let settings = ExecutorSettings {
        container: Some("executor".to_string()),
        ..pod_settings()
    };

    let info = PodImageDiscoverer::new(cluster, settings)
        .discover()
        .await
        .unwrap();

    assert_eq!(info.image, "executor:v3");
}

#[tokio::test]
async fn test_missing_container_names_it() {
    let cluster = FakeCluster::new();
    cluster.add_pod(OPERATOR_NS, OPERATOR_POD, &[("manager", "package-operator:v1")]);
    let settings = ExecutorSettings {
        container: Some("executor".to_string()),
        ..pod_settings()
    };

    let err = PodImageDiscoverer::new(cluster, settings)
        .discover()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ImageNotFound { .. }));
    assert!(err.to_string().contains("failed to find image for container executor"));
    assert_eq!(err.kind(), ErrorKind::Discovery);
}

#[tokio::test]
async fn test_first_container_without_image_names_it() {
    let cluster = FakeCluster::new();
    cluster.add_pod(OPERATOR_NS, OPERATOR_POD, &[("manager", "")]);

    let err = PodImageDiscoverer::new(cluster, pod_settings())
        .discover()
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "failed to find image for container manager in pod package-system/package-operator-0"
    );
}

#[tokio::test]
async fn test_pod_without_containers() {
    let cluster = FakeCluster::new();
    cluster.add_pod(OPERATOR_NS, OPERATOR_POD, &[]);

    let err = PodImageDiscoverer::new(cluster, pod_settings())
        .discover()
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        Error::ImageNotFound { container, .. } if container == "<first>"
    ));
}

#[tokio::test]
async fn test_pod_lookup_failure() {
    let cluster = FakeCluster::new();
    cluster.fail(Op::GetPod, 500, "InternalError");

    let err = PodImageDiscoverer::new(cluster, pod_settings())
        .discover()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PodLookup { .. }));
    assert!(err.to_string().contains("package-system/package-operator-0"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_missing_pod_identity() {
    let cluster = FakeCluster::new();
    let settings = ExecutorSettings {
        pod_name: None,
        ..pod_settings()
    };

    let err = PodImageDiscoverer::new(cluster.clone(), settings)
        .discover()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MissingPodIdentity("POD_NAME")));
    assert!(cluster.calls().is_empty());
}
