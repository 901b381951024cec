//! Per-request state transitions.
//!
//! A handler is bound to one InstallRequest for one reconciliation pass. It
//! mutates the in-memory object only; the reconciler persists the status
//! afterwards.
//!
//! ```text
//! create():
//!   no job reference ──create job──> Creating / ReconcileSuccess   (requeue after)
//!   job running ───────────────────> Creating / ReconcileSuccess   (requeue after)
//!   job complete ──process output──> Available / ReconcileSuccess  (requeue after)
//!   job failed ────────────────────> Creating / ReconcileError     (requeue now)
//! ```

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::client::{ClusterClient, is_already_exists};
use crate::config::Timings;
use crate::controller::error::{Error, error_chain};
use crate::controller::executor::ExecutorInfo;
use crate::controller::job_completer::JobCompleter;
use crate::crd::{Condition, InstallRequest, ObjectRef};
use crate::resources::{generate_install_job, job_name};

/// What the controller should do after a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Wait for the next change of the object.
    Done,
    /// Look again after the given interval.
    RequeueAfter(Duration),
    /// Retry as soon as possible.
    RequeueNow,
}

/// State transitions of one InstallRequest.
pub trait Handler: Send {
    /// Dispatch to [`Handler::create`] or [`Handler::update`].
    fn sync(&mut self) -> impl Future<Output = ReconcileOutcome> + Send;

    /// Drive the install job until the package is installed.
    fn create(&mut self) -> impl Future<Output = ReconcileOutcome> + Send;

    /// Handle an installed package.
    fn update(&mut self) -> impl Future<Output = ReconcileOutcome> + Send;

    /// The request as mutated so far.
    fn request(&self) -> &InstallRequest;

    /// Give back the mutated request.
    fn into_request(self) -> InstallRequest;
}

/// Observed state of an install job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Running,
    Complete,
    /// Failed, with the message of the job condition.
    Failed(String),
}

impl JobState {
    /// Classify a job by its `Complete` and `Failed` conditions.
    ///
    /// A job carrying both is treated as complete.
    pub fn of(job: &Job) -> Self {
        let conditions = job
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_deref())
            .unwrap_or_default();
        let is_true =
            |type_: &str| conditions.iter().any(|c| c.type_ == type_ && c.status == "True");

        if is_true("Complete") {
            return JobState::Complete;
        }
        match conditions
            .iter()
            .find(|c| c.type_ == "Failed" && c.status == "True")
        {
            Some(failed) => JobState::Failed(
                failed
                    .message
                    .clone()
                    .or_else(|| failed.reason.clone())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| format!("job {} failed", job.name_any())),
            ),
            None => JobState::Running,
        }
    }
}

/// [`Handler`] driving the install job of a request.
pub struct InstallRequestHandler<C, J> {
    request: InstallRequest,
    client: C,
    completer: J,
    executor: ExecutorInfo,
    timings: Timings,
}

impl<C, J> InstallRequestHandler<C, J>
where
    C: ClusterClient,
    J: JobCompleter,
{
    pub fn new(
        request: InstallRequest,
        client: C,
        completer: J,
        executor: ExecutorInfo,
        timings: Timings,
    ) -> Self {
        Self {
            request,
            client,
            completer,
            executor,
            timings,
        }
    }

    async fn create_job(&mut self) -> ReconcileOutcome {
        let job = generate_install_job(&self.request, &self.executor.image);
        let job_ref = ObjectRef::new(
            job.metadata.namespace.clone().unwrap_or_default(),
            job_name(&self.request),
        );

        match self.client.create_job(&job).await {
            Ok(_) => info!(job = %job_ref, image = %self.executor.image, "Created install job"),
            Err(e) if is_already_exists(&e) => {
                debug!(job = %job_ref, "Install job already exists")
            }
            Err(source) => {
                return self.fail(Error::JobCreate {
                    job: job_ref.to_string(),
                    source,
                });
            }
        }

        self.request.status_or_default().install_job = Some(job_ref);
        self.progress(Condition::creating())
    }

    /// Record progress and look again after the success interval.
    fn progress(&mut self, ready: Condition) -> ReconcileOutcome {
        self.request
            .status_or_default()
            .conditions
            .set_all([ready, Condition::reconcile_success()]);
        ReconcileOutcome::RequeueAfter(self.timings.requeue_after)
    }

    /// Record a failure and retry right away.
    fn fail(&mut self, error: Error) -> ReconcileOutcome {
        let message = error_chain(&error);
        warn!(
            name = %self.request.name_any(),
            kind = ?error.kind(),
            error = %message,
            "Install failed"
        );
        self.request
            .status_or_default()
            .conditions
            .set_all([Condition::creating(), Condition::reconcile_error(message)]);
        ReconcileOutcome::RequeueNow
    }
}

impl<C, J> Handler for InstallRequestHandler<C, J>
where
    C: ClusterClient,
    J: JobCompleter,
{
    async fn sync(&mut self) -> ReconcileOutcome {
        if self.request.package_record().is_none() {
            self.create().await
        } else {
            self.update().await
        }
    }

    #[instrument(skip(self), fields(name = %self.request.name_any()))]
    async fn create(&mut self) -> ReconcileOutcome {
        let Some(job_ref) = self.request.install_job().cloned() else {
            return self.create_job().await;
        };

        let job = match self.client.get_job(&job_ref.namespace, &job_ref.name).await {
            Ok(job) => job,
            Err(source) => {
                return self.fail(Error::JobLookup {
                    job: job_ref.to_string(),
                    source,
                });
            }
        };

        match JobState::of(&job) {
            JobState::Running => {
                debug!(job = %job_ref, "Install job still running");
                self.progress(Condition::creating())
            }
            JobState::Complete => {
                match self
                    .completer
                    .handle_job_completion(&mut self.request, &job)
                    .await
                {
                    Ok(()) => self.progress(Condition::available()),
                    Err(e) => self.fail(e),
                }
            }
            JobState::Failed(message) => self.fail(Error::JobFailed(message)),
        }
    }

    async fn update(&mut self) -> ReconcileOutcome {
        debug!(name = %self.request.name_any(), "Package already installed");
        ReconcileOutcome::Done
    }

    fn request(&self) -> &InstallRequest {
        &self.request
    }

    fn into_request(self) -> InstallRequest {
        self.request
    }
}
