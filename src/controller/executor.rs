//! Executor image discovery.
//!
//! Install jobs run the operator's own image unless an explicit image is
//! configured. The image is looked up on the operator pod on every pass;
//! nothing is cached.

use std::future::Future;

use tracing::{debug, instrument};

use crate::client::ClusterClient;
use crate::config::{ExecutorSettings, POD_NAME_ENV, POD_NAMESPACE_ENV};
use crate::controller::error::{Error, Result};

/// Information needed to run install jobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutorInfo {
    /// Image of the `package-unpack` container.
    pub image: String,
}

/// Resolves the image used by install jobs.
pub trait ExecutorInfoDiscoverer: Send + Sync {
    fn discover(&self) -> impl Future<Output = Result<ExecutorInfo>> + Send;
}

/// Discovers the executor image from the operator's own pod.
#[derive(Clone)]
pub struct PodImageDiscoverer<C> {
    client: C,
    settings: ExecutorSettings,
}

impl<C: ClusterClient> PodImageDiscoverer<C> {
    pub fn new(client: C, settings: ExecutorSettings) -> Self {
        Self { client, settings }
    }
}

impl<C: ClusterClient> ExecutorInfoDiscoverer for PodImageDiscoverer<C> {
    #[instrument(skip(self))]
    async fn discover(&self) -> Result<ExecutorInfo> {
        if let Some(image) = self
            .settings
            .image_override
            .as_deref()
            .filter(|image| !image.is_empty())
        {
            debug!(image = %image, "Using configured executor image");
            return Ok(ExecutorInfo {
                image: image.to_string(),
            });
        }

        let namespace = self
            .settings
            .pod_namespace
            .as_deref()
            .ok_or(Error::MissingPodIdentity(POD_NAMESPACE_ENV))?;
        let name = self
            .settings
            .pod_name
            .as_deref()
            .ok_or(Error::MissingPodIdentity(POD_NAME_ENV))?;

        let pod = self
            .client
            .get_pod(namespace, name)
            .await
            .map_err(|source| Error::PodLookup {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source,
            })?;

        let containers = pod.spec.map(|spec| spec.containers).unwrap_or_default();
        let container = match self.settings.container.as_deref() {
            Some(wanted) => containers.into_iter().find(|c| c.name == wanted),
            None => containers.into_iter().next(),
        };

        // Name the container that was looked at; the configured one if it
        // is missing, a placeholder if the pod has none.
        let container_name = container
            .as_ref()
            .map(|c| c.name.clone())
            .or_else(|| self.settings.container.clone())
            .unwrap_or_else(|| "<first>".to_string());

        let image = container
            .and_then(|c| c.image)
            .filter(|image| !image.is_empty())
            .ok_or_else(|| Error::ImageNotFound {
                container: container_name,
                pod: format!("{}/{}", namespace, name),
            })?;

        debug!(image = %image, pod = %name, "Discovered executor image");
        Ok(ExecutorInfo { image })
    }
}
