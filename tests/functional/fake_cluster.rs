//! In-memory stand-ins for the Kubernetes API.
//!
//! `FakeCluster` implements `ClusterClient` on top of plain maps and
//! `FakeLogReader` serves canned installer output, so the real handler,
//! job completer and reconciler run without a cluster. Every call is
//! recorded, any operation can be made to fail with an API error, and calls
//! can be slowed down to stand in for API latency.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::AsyncRead;
use futures::io::Cursor;
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use kube::api::{ApiResource, DynamicObject};

use package_operator::client::{ClusterClient, JOB_NAME_LABEL};
use package_operator::controller::pod_logs::{LogStream, PodLogReader};
use package_operator::crd::{InstallRequest, PackageRecord};

/// Operations of the fake cluster, used for call recording and failure injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    GetInstallRequest,
    PatchStatus,
    GetPod,
    ListJobPods,
    CreateJob,
    GetJob,
    CreateClusterObject,
    CreatePackageRecord,
    GetPackageRecord,
}

/// Build an API error response.
pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("mock {} error", reason),
        reason: reason.to_string(),
        code,
    })
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct State {
    requests: HashMap<(String, String), InstallRequest>,
    pods: HashMap<(String, String), Pod>,
    jobs: HashMap<(String, String), Job>,
    cluster_objects: BTreeMap<String, DynamicObject>,
    records: HashMap<(String, String), PackageRecord>,
    failures: HashMap<Op, (u16, String)>,
    calls: Vec<Op>,
    latency: Duration,
    next_resource_version: u64,
}

impl State {
    fn record(&mut self, op: Op) -> Result<(), kube::Error> {
        self.calls.push(op);
        match self.failures.get(&op) {
            Some((code, reason)) => Err(api_error(*code, reason)),
            None => Ok(()),
        }
    }

    fn bump_version(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }
}

/// In-memory `ClusterClient`.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Store an InstallRequest, assigning it a fresh resourceVersion.
    pub fn put_request(&self, mut request: InstallRequest) -> InstallRequest {
        let mut state = self.state();
        request.metadata.resource_version = Some(state.bump_version());
        let k = key(
            &request.namespace().unwrap_or_default(),
            &request.name_any(),
        );
        state.requests.insert(k, request.clone());
        request
    }

    pub fn request(&self, namespace: &str, name: &str) -> Option<InstallRequest> {
        self.state().requests.get(&key(namespace, name)).cloned()
    }

    /// Add the operator pod with the given containers (name, image).
    pub fn add_pod(&self, namespace: &str, name: &str, containers: &[(&str, &str)]) {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: containers
                    .iter()
                    .map(|(name, image)| Container {
                        name: name.to_string(),
                        image: Some(image.to_string()),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            status: None,
        };
        self.state().pods.insert(key(namespace, name), pod);
    }

    /// Add a pod created by the job controller for `job`.
    pub fn add_job_pod(&self, namespace: &str, job: &str, name: &str) {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    JOB_NAME_LABEL.to_string(),
                    job.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        self.state().pods.insert(key(namespace, name), pod);
    }

    pub fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        self.state().jobs.get(&key(namespace, name)).cloned()
    }

    pub fn job_count(&self) -> usize {
        self.state().jobs.len()
    }

    /// Store a job as-is.
    pub fn put_job(&self, job: Job) {
        let k = key(&job.namespace().unwrap_or_default(), &job.name_any());
        self.state().jobs.insert(k, job);
    }

    /// Mark a stored job as finished successfully.
    pub fn complete_job(&self, namespace: &str, name: &str) {
        self.set_job_condition(namespace, name, "Complete", None);
    }

    /// Mark a stored job as failed with the given message.
    pub fn fail_job(&self, namespace: &str, name: &str, message: &str) {
        self.set_job_condition(namespace, name, "Failed", Some(message));
    }

    fn set_job_condition(&self, namespace: &str, name: &str, type_: &str, message: Option<&str>) {
        let mut state = self.state();
        let job = state.jobs.entry(key(namespace, name)).or_insert_with(|| Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        job.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: type_.to_string(),
                status: "True".to_string(),
                message: message.map(str::to_string),
                ..Default::default()
            }]),
            ..Default::default()
        });
    }

    pub fn cluster_object_names(&self) -> Vec<String> {
        self.state().cluster_objects.keys().cloned().collect()
    }

    pub fn put_cluster_object(&self, object: DynamicObject) {
        let name = object.name_any();
        self.state().cluster_objects.insert(name, object);
    }

    pub fn record(&self, namespace: &str, name: &str) -> Option<PackageRecord> {
        self.state().records.get(&key(namespace, name)).cloned()
    }

    pub fn put_record(&self, record: PackageRecord) {
        let k = key(&record.namespace().unwrap_or_default(), &record.name_any());
        self.state().records.insert(k, record);
    }

    pub fn record_count(&self) -> usize {
        self.state().records.len()
    }

    /// Make every call of `op` fail with the given status code and reason.
    pub fn fail(&self, op: Op, code: u16, reason: &str) {
        self.state().failures.insert(op, (code, reason.to_string()));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Delay every API call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    async fn delay(&self) {
        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Operations called so far, in order.
    pub fn calls(&self) -> Vec<Op> {
        self.state().calls.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.state().calls.iter().filter(|c| **c == op).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

impl ClusterClient for FakeCluster {
    async fn get_install_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InstallRequest>, kube::Error> {
        self.delay().await;
        let mut state = self.state();
        state.record(Op::GetInstallRequest)?;
        Ok(state.requests.get(&key(namespace, name)).cloned())
    }

    async fn patch_install_request_status(
        &self,
        request: &InstallRequest,
    ) -> Result<InstallRequest, kube::Error> {
        self.delay().await;
        let mut state = self.state();
        state.record(Op::PatchStatus)?;
        let k = key(
            &request.namespace().unwrap_or_default(),
            &request.name_any(),
        );
        let stored_version = match state.requests.get(&k) {
            Some(stored) => stored.resource_version(),
            None => return Err(api_error(404, "NotFound")),
        };
        if stored_version != request.resource_version() {
            return Err(api_error(409, "Conflict"));
        }

        let version = state.bump_version();
        let stored = state
            .requests
            .get_mut(&k)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        stored.status = request.status.clone();
        stored.metadata.resource_version = Some(version);
        Ok(stored.clone())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, kube::Error> {
        self.delay().await;
        let mut state = self.state();
        state.record(Op::GetPod)?;
        state
            .pods
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))
    }

    async fn list_job_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>, kube::Error> {
        self.delay().await;
        let mut state = self.state();
        state.record(Op::ListJobPods)?;
        let mut pods: Vec<Pod> = state
            .pods
            .values()
            .filter(|pod| pod.namespace().as_deref() == Some(namespace))
            .filter(|pod| pod.labels().get(JOB_NAME_LABEL).map(String::as_str) == Some(job_name))
            .cloned()
            .collect();
        pods.sort_by_key(|pod| pod.name_any());
        Ok(pods)
    }

    async fn create_job(&self, job: &Job) -> Result<Job, kube::Error> {
        self.delay().await;
        let mut state = self.state();
        state.record(Op::CreateJob)?;
        let k = key(&job.namespace().unwrap_or_default(), &job.name_any());
        if state.jobs.contains_key(&k) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.jobs.insert(k, job.clone());
        Ok(job.clone())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, kube::Error> {
        self.delay().await;
        let mut state = self.state();
        state.record(Op::GetJob)?;
        state
            .jobs
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))
    }

    async fn create_cluster_object(
        &self,
        _resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, kube::Error> {
        self.delay().await;
        let mut state = self.state();
        state.record(Op::CreateClusterObject)?;
        let name = object.name_any();
        if state.cluster_objects.contains_key(&name) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.cluster_objects.insert(name, object.clone());
        Ok(object.clone())
    }

    async fn create_package_record(
        &self,
        record: &PackageRecord,
    ) -> Result<PackageRecord, kube::Error> {
        self.delay().await;
        let mut state = self.state();
        state.record(Op::CreatePackageRecord)?;
        let k = key(&record.namespace().unwrap_or_default(), &record.name_any());
        if state.records.contains_key(&k) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.records.insert(k, record.clone());
        Ok(record.clone())
    }

    async fn get_package_record(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PackageRecord, kube::Error> {
        self.delay().await;
        let mut state = self.state();
        state.record(Op::GetPackageRecord)?;
        state
            .records
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))
    }
}

/// What reading the logs of a pod does.
#[derive(Clone, Debug)]
pub enum LogBehavior {
    /// The stream yields this output, then ends.
    Output(String),
    /// Opening the stream fails with this status code.
    OpenError(u16),
    /// The stream breaks while reading.
    ReadError,
    /// The stream never yields anything.
    Hang,
}

#[derive(Default)]
struct LogState {
    behaviors: HashMap<String, LogBehavior>,
    opened: Vec<(String, String)>,
}

/// In-memory `PodLogReader` keyed by pod name.
#[derive(Clone, Default)]
pub struct FakeLogReader {
    state: Arc<Mutex<LogState>>,
    dropped: Arc<AtomicUsize>,
}

impl FakeLogReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, pod: &str, behavior: LogBehavior) {
        self.state
            .lock()
            .unwrap()
            .behaviors
            .insert(pod.to_string(), behavior);
    }

    pub fn set_output(&self, pod: &str, output: &str) {
        self.set(pod, LogBehavior::Output(output.to_string()));
    }

    /// (namespace, pod) pairs opened so far.
    pub fn opened(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().opened.clone()
    }

    /// Number of streams handed out and dropped again.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

impl PodLogReader for FakeLogReader {
    async fn open(&self, namespace: &str, pod: &str) -> Result<LogStream, kube::Error> {
        let behavior = {
            let mut state = self.state.lock().unwrap();
            state.opened.push((namespace.to_string(), pod.to_string()));
            state.behaviors.get(pod).cloned()
        };

        let source = match behavior {
            Some(LogBehavior::Output(output)) => Source::Output(Cursor::new(output.into_bytes())),
            Some(LogBehavior::OpenError(code)) => return Err(api_error(code, "InternalError")),
            Some(LogBehavior::ReadError) => Source::Broken,
            Some(LogBehavior::Hang) => Source::Pending,
            None => return Err(api_error(404, "NotFound")),
        };

        Ok(Box::pin(TrackedStream {
            source,
            dropped: self.dropped.clone(),
        }))
    }
}

enum Source {
    Output(Cursor<Vec<u8>>),
    Broken,
    Pending,
}

/// Log stream counting its own drop.
struct TrackedStream {
    source: Source,
    dropped: Arc<AtomicUsize>,
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().source {
            Source::Output(cursor) => Pin::new(cursor).poll_read(cx, buf),
            Source::Broken => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "mock connection reset",
            ))),
            Source::Pending => Poll::Pending,
        }
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}
