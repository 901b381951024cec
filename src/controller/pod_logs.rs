//! Access to installer pod logs.

use std::future::Future;
use std::pin::Pin;

use futures::AsyncRead;
use k8s_openapi::api::core::v1::Pod;
use kube::api::LogParams;
use kube::{Api, Client};

use crate::resources::install_job::UNPACK_CONTAINER;

/// A byte stream of container logs.
pub type LogStream = Pin<Box<dyn AsyncRead + Send>>;

/// Opens log streams of pods.
pub trait PodLogReader: Clone + Send + Sync + 'static {
    /// Open the logs of the installer container of a pod.
    fn open(
        &self,
        namespace: &str,
        pod: &str,
    ) -> impl Future<Output = Result<LogStream, kube::Error>> + Send;
}

/// [`PodLogReader`] streaming logs from the API server.
#[derive(Clone)]
pub struct KubePodLogReader {
    client: Client,
}

impl KubePodLogReader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl PodLogReader for KubePodLogReader {
    async fn open(&self, namespace: &str, pod: &str) -> Result<LogStream, kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(UNPACK_CONTAINER.to_string()),
            ..Default::default()
        };
        let stream = api.log_stream(pod, &params).await?;
        Ok(Box::pin(stream))
    }
}
