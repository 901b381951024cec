//! Error types for the controller.
//!
//! Every failure carries the context needed to act on it (request, job or pod
//! name) and chains its cause through `source()`. `ErrorKind` classifies
//! errors for retry behavior.

use std::time::Duration;

use thiserror::Error;

use crate::controller::manifests::ManifestError;

/// Classification of controller errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Cluster API, network or timeout failures.
    Transient,
    /// The executor image could not be resolved.
    Discovery,
    /// Installer output or job pods do not have the expected shape.
    Structural,
    /// The installer job reported failure.
    JobFailed,
}

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The operator pod identity is not available for executor discovery
    #[error("cannot discover executor image: {0} is not set")]
    MissingPodIdentity(&'static str),

    /// The operator pod could not be fetched
    #[error("failed to get running pod {namespace}/{name}")]
    PodLookup {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// The operator pod has no usable container image
    #[error("failed to find image for container {container} in pod {pod}")]
    ImageNotFound { container: String, pod: String },

    /// The installer job could not be created
    #[error("failed to create install job {job}")]
    JobCreate {
        job: String,
        #[source]
        source: kube::Error,
    },

    /// The installer job could not be fetched
    #[error("failed to get install job {job}")]
    JobLookup {
        job: String,
        #[source]
        source: kube::Error,
    },

    /// The installer job reported failure
    #[error("{0}")]
    JobFailed(String),

    /// The pods of a completed job could not be listed
    #[error("failed to list pods for job {job}")]
    PodList {
        job: String,
        #[source]
        source: kube::Error,
    },

    /// A completed job does not own exactly one pod
    #[error("pod list for job {job} should only have {expected} item, actual: {actual}")]
    PodCount {
        job: String,
        expected: usize,
        actual: usize,
    },

    /// The log stream of the job pod could not be opened
    #[error("failed to get logs request stream from pod {pod}")]
    LogOpen {
        pod: String,
        #[source]
        source: kube::Error,
    },

    /// The log stream of the job pod could not be read to completion
    #[error("failed to copy logs request stream from pod {pod}")]
    LogRead {
        pod: String,
        #[source]
        source: std::io::Error,
    },

    /// The installer output could not be parsed
    #[error("failed to parse output from job {request}: {source}")]
    OutputParse {
        request: String,
        #[source]
        source: ManifestError,
    },

    /// The installer output does not hold exactly one package record
    #[error("output from job {request} should have exactly 1 package record, actual: {actual}")]
    RecordCount { request: String, actual: usize },

    /// A type definition from the installer output could not be created
    #[error("failed to create type definition {name}")]
    DefinitionCreate {
        name: String,
        #[source]
        source: kube::Error,
    },

    /// The package record could not be created or fetched
    #[error("failed to create package record {name}")]
    RecordCreate {
        name: String,
        #[source]
        source: kube::Error,
    },

    /// A reconciliation pass exceeded its time bound
    #[error("reconciliation timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Kube(_)
            | Error::JobCreate { .. }
            | Error::JobLookup { .. }
            | Error::PodList { .. }
            | Error::LogOpen { .. }
            | Error::LogRead { .. }
            | Error::DefinitionCreate { .. }
            | Error::RecordCreate { .. }
            | Error::Timeout(_) => ErrorKind::Transient,
            Error::MissingPodIdentity(_) | Error::PodLookup { .. } | Error::ImageNotFound { .. } => {
                ErrorKind::Discovery
            }
            Error::PodCount { .. } | Error::OutputParse { .. } | Error::RecordCount { .. } => {
                ErrorKind::Structural
            }
            Error::JobFailed(_) => ErrorKind::JobFailed,
        }
    }

    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self.kube_source(), Some(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error reports an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self.kube_source(), Some(kube::Error::Api(e)) if e.code == 409)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            ErrorKind::Transient => match self.kube_source() {
                // Retry on conflicts, rate limiting, server and network errors
                Some(kube::Error::Api(api_err)) => {
                    api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                }
                Some(kube::Error::Service(_)) => true,
                Some(_) => false,
                None => true,
            },
            ErrorKind::Discovery => true,
            // Retried like transient errors; they will not self-heal without
            // a fixed package, but no terminal state exists for them.
            ErrorKind::Structural | ErrorKind::JobFailed => true,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(300)
        }
    }

    /// The underlying Kubernetes error, if any.
    fn kube_source(&self) -> Option<&kube::Error> {
        match self {
            Error::Kube(e)
            | Error::PodLookup { source: e, .. }
            | Error::JobCreate { source: e, .. }
            | Error::JobLookup { source: e, .. }
            | Error::PodList { source: e, .. }
            | Error::LogOpen { source: e, .. }
            | Error::DefinitionCreate { source: e, .. }
            | Error::RecordCreate { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

/// Render an error with its whole cause chain, for status messages.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.ends_with(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
