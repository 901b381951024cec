//! `kube::Client` binding of [`ClusterClient`].

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ApiResource, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::instrument;

use super::{ClusterClient, JOB_NAME_LABEL};
use crate::controller::context::FIELD_MANAGER;
use crate::crd::{InstallRequest, PackageRecord};

/// [`ClusterClient`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespace_of<K: ResourceExt>(object: &K) -> String {
        object.namespace().unwrap_or_else(|| "default".to_string())
    }
}

impl ClusterClient for KubeClusterClient {
    #[instrument(skip(self))]
    async fn get_install_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InstallRequest>, kube::Error> {
        let api: Api<InstallRequest> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }

    #[instrument(skip(self, request), fields(name = %request.name_any()))]
    async fn patch_install_request_status(
        &self,
        request: &InstallRequest,
    ) -> Result<InstallRequest, kube::Error> {
        let api: Api<InstallRequest> =
            Api::namespaced(self.client.clone(), &Self::namespace_of(request));

        // resourceVersion in the patch body makes the API server reject
        // writes based on a stale read.
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": request.resource_version(),
            },
            "status": request.status,
        });

        api.patch_status(
            &request.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await
    }

    async fn list_job_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>, kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(&format!("{}={}", JOB_NAME_LABEL, job_name)))
            .await?;
        Ok(pods.items)
    }

    async fn create_job(&self, job: &Job) -> Result<Job, kube::Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), &Self::namespace_of(job));
        api.create(&PostParams::default(), job).await
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, kube::Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await
    }

    async fn create_cluster_object(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, kube::Error> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), resource);
        api.create(&PostParams::default(), object).await
    }

    async fn create_package_record(
        &self,
        record: &PackageRecord,
    ) -> Result<PackageRecord, kube::Error> {
        let api: Api<PackageRecord> =
            Api::namespaced(self.client.clone(), &Self::namespace_of(record));
        api.create(&PostParams::default(), record).await
    }

    async fn get_package_record(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PackageRecord, kube::Error> {
        let api: Api<PackageRecord> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await
    }
}
