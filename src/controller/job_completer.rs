//! Processing of completed install jobs.
//!
//! A completed job has exactly one pod. Its installer container printed the
//! package manifests; they are read from the pod log, parsed, and turned into
//! cluster objects: every type definition is created cluster-wide and the
//! package record is created next to the InstallRequest.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::AsyncReadExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube::api::{ApiResource, DynamicObject};
use tracing::{debug, info, instrument, warn};

use crate::client::{ClusterClient, is_already_exists};
use crate::controller::error::{Error, Result};
use crate::controller::manifests::{ManifestRegistry, ParsedManifest};
use crate::controller::pod_logs::PodLogReader;
use crate::crd::{InstallRequest, ObjectRef, PackageRecord};
use crate::resources::owner_reference;

/// Handles install jobs that finished successfully.
pub trait JobCompleter: Send + Sync {
    /// Materialize the output of a completed job and record the created
    /// package record on `request`. The caller persists the status.
    fn handle_job_completion(
        &self,
        request: &mut InstallRequest,
        job: &Job,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// [`JobCompleter`] reading installer output from the job pod's log.
#[derive(Clone)]
pub struct InstallJobCompleter<C, R> {
    client: C,
    log_reader: R,
    registry: Arc<ManifestRegistry>,
    log_read_timeout: Duration,
}

impl<C, R> InstallJobCompleter<C, R>
where
    C: ClusterClient,
    R: PodLogReader,
{
    pub fn new(
        client: C,
        log_reader: R,
        registry: Arc<ManifestRegistry>,
        log_read_timeout: Duration,
    ) -> Self {
        Self {
            client,
            log_reader,
            registry,
            log_read_timeout,
        }
    }

    /// Find the single pod of a job.
    async fn job_pod(&self, namespace: &str, job_name: &str) -> Result<Pod> {
        let pods = self
            .client
            .list_job_pods(namespace, job_name)
            .await
            .map_err(|source| Error::PodList {
                job: job_name.to_string(),
                source,
            })?;

        let [pod] = <[Pod; 1]>::try_from(pods).map_err(|pods| Error::PodCount {
            job: job_name.to_string(),
            expected: 1,
            actual: pods.len(),
        })?;
        Ok(pod)
    }

    /// Read the complete log of a pod, bounded by the log read timeout.
    async fn read_logs(&self, namespace: &str, pod: &str) -> Result<String> {
        let mut stream = self
            .log_reader
            .open(namespace, pod)
            .await
            .map_err(|source| Error::LogOpen {
                pod: pod.to_string(),
                source,
            })?;

        let mut buffer = Vec::new();
        match tokio::time::timeout(self.log_read_timeout, stream.read_to_end(&mut buffer)).await {
            Ok(Ok(_)) => {}
            Ok(Err(source)) => {
                return Err(Error::LogRead {
                    pod: pod.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(Error::LogRead {
                    pod: pod.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("log stream not finished after {:?}", self.log_read_timeout),
                    ),
                });
            }
        }

        debug!(pod = %pod, bytes = buffer.len(), "Read installer output");
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    async fn create_definition(&self, resource: &ApiResource, object: &DynamicObject) -> Result<()> {
        let name = object.name_any();
        match self.client.create_cluster_object(resource, object).await {
            Ok(_) => {
                info!(kind = %resource.kind, name = %name, "Created type definition");
                Ok(())
            }
            Err(e) if is_already_exists(&e) => {
                debug!(kind = %resource.kind, name = %name, "Type definition already exists");
                Ok(())
            }
            Err(source) => Err(Error::DefinitionCreate { name, source }),
        }
    }

    /// Create the package record owned by `request`, or fetch it when it
    /// was created by an earlier pass.
    async fn create_record(
        &self,
        request: &InstallRequest,
        mut record: PackageRecord,
    ) -> Result<ObjectRef> {
        let namespace = request
            .namespace()
            .unwrap_or_else(|| "default".to_string());
        let name = record
            .metadata
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| request.name_any());

        record.metadata.name = Some(name.clone());
        record.metadata.namespace = Some(namespace.clone());
        record.metadata.resource_version = None;
        record.metadata.owner_references = Some(vec![owner_reference(request)]);

        let created = match self.client.create_package_record(&record).await {
            Ok(created) => {
                info!(namespace = %namespace, name = %name, "Created package record");
                created
            }
            Err(e) if is_already_exists(&e) => self
                .client
                .get_package_record(&namespace, &name)
                .await
                .map_err(|source| Error::RecordCreate {
                    name: name.clone(),
                    source,
                })?,
            Err(source) => return Err(Error::RecordCreate { name, source }),
        };

        Ok(ObjectRef::new(
            created.namespace().unwrap_or(namespace),
            created.name_any(),
        ))
    }
}

impl<C, R> JobCompleter for InstallJobCompleter<C, R>
where
    C: ClusterClient,
    R: PodLogReader,
{
    #[instrument(skip(self, request, job), fields(name = %request.name_any(), job = %job.name_any()))]
    async fn handle_job_completion(&self, request: &mut InstallRequest, job: &Job) -> Result<()> {
        let job_name = job.name_any();
        let namespace = job
            .namespace()
            .or_else(|| request.namespace())
            .unwrap_or_else(|| "default".to_string());

        let pod = self.job_pod(&namespace, &job_name).await?;
        let output = self.read_logs(&namespace, &pod.name_any()).await?;

        let manifests = self
            .registry
            .parse(&output)
            .map_err(|source| Error::OutputParse {
                request: request.name_any(),
                source,
            })?;

        let mut definitions = Vec::new();
        let mut records = Vec::new();
        for manifest in manifests {
            match manifest {
                ParsedManifest::TypeDefinition { resource, object } => {
                    definitions.push((resource, object))
                }
                ParsedManifest::Record(record) => records.push(record),
                ParsedManifest::Other { api_version, kind } => {
                    warn!(
                        api_version = %api_version,
                        kind = %kind,
                        "Skipping document of unknown kind in installer output"
                    );
                }
            }
        }

        // Nothing is created unless the output holds exactly one record.
        let [record] = <[Box<PackageRecord>; 1]>::try_from(records).map_err(|records| {
            Error::RecordCount {
                request: request.name_any(),
                actual: records.len(),
            }
        })?;

        for (resource, object) in &definitions {
            self.create_definition(resource, object).await?;
        }

        let record_ref = self.create_record(request, *record).await?;
        info!(record = %record_ref, "Package installed");
        request.status_or_default().package_record = Some(record_ref);
        Ok(())
    }
}
