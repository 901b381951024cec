//! Cluster API access used by the controller.
//!
//! The reconciliation core talks to the cluster only through the
//! [`ClusterClient`] trait, so it can run against an in-memory fake in tests.
//! [`KubeClusterClient`] is the production binding on top of `kube::Client`.

mod kube_client;

pub use kube_client::KubeClusterClient;

use std::future::Future;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ApiResource, DynamicObject};

use crate::crd::{InstallRequest, PackageRecord};

/// Label the Job controller puts on the pods it creates.
pub const JOB_NAME_LABEL: &str = "job-name";

/// Cluster operations needed to reconcile InstallRequests.
pub trait ClusterClient: Clone + Send + Sync + 'static {
    /// Fetch an InstallRequest; `None` if it does not exist.
    fn get_install_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<InstallRequest>, kube::Error>> + Send;

    /// Write the status of an InstallRequest.
    ///
    /// Implementations must reject the write when the stored object has a
    /// different resourceVersion than `request` (HTTP 409).
    fn patch_install_request_status(
        &self,
        request: &InstallRequest,
    ) -> impl Future<Output = Result<InstallRequest, kube::Error>> + Send;

    /// Fetch a pod.
    fn get_pod(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Pod, kube::Error>> + Send;

    /// List the pods created for a job.
    fn list_job_pods(
        &self,
        namespace: &str,
        job_name: &str,
    ) -> impl Future<Output = Result<Vec<Pod>, kube::Error>> + Send;

    /// Create a job in its own namespace.
    fn create_job(&self, job: &Job) -> impl Future<Output = Result<Job, kube::Error>> + Send;

    /// Fetch a job.
    fn get_job(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Job, kube::Error>> + Send;

    /// Create a cluster-scoped object of the given resource type.
    fn create_cluster_object(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> impl Future<Output = Result<DynamicObject, kube::Error>> + Send;

    /// Create a package record in its own namespace.
    fn create_package_record(
        &self,
        record: &PackageRecord,
    ) -> impl Future<Output = Result<PackageRecord, kube::Error>> + Send;

    /// Fetch a package record.
    fn get_package_record(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<PackageRecord, kube::Error>> + Send;
}

/// Check if an API error reports an object that already exists.
pub fn is_already_exists(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(e) if e.code == 409 && e.reason == "AlreadyExists")
}
