//! Operator configuration.
//!
//! Everything is read from environment variables so the operator can be
//! configured from its Deployment manifest. Pod identity comes from the
//! downward API (`POD_NAME`, `POD_NAMESPACE`).

use std::time::Duration;

use thiserror::Error;

/// Name of the current pod, used for executor discovery and leader election.
pub const POD_NAME_ENV: &str = "POD_NAME";
/// Namespace of the current pod.
pub const POD_NAMESPACE_ENV: &str = "POD_NAMESPACE";
/// Overrides executor image discovery when set to a non-empty value.
pub const INSTALLER_IMAGE_ENV: &str = "INSTALLER_IMAGE";
/// Container of the operator pod whose image runs install jobs.
pub const INSTALLER_CONTAINER_ENV: &str = "INSTALLER_CONTAINER";
/// Restricts the controller to a single namespace.
pub const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";
pub const REQUEUE_AFTER_SECS_ENV: &str = "REQUEUE_AFTER_SECS";
pub const REQUEUE_NOW_SECS_ENV: &str = "REQUEUE_NOW_SECS";
pub const LOG_READ_TIMEOUT_SECS_ENV: &str = "LOG_READ_TIMEOUT_SECS";
pub const RECONCILE_TIMEOUT_SECS_ENV: &str = "RECONCILE_TIMEOUT_SECS";
pub const HEALTH_PORT_ENV: &str = "HEALTH_PORT";

const DEFAULT_REQUEUE_AFTER_SECS: u64 = 10;
const DEFAULT_REQUEUE_NOW_SECS: u64 = 1;
const DEFAULT_LOG_READ_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Configuration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}: expected {expected}")]
    InvalidValue {
        name: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error(
        "LOG_READ_TIMEOUT_SECS ({log_read:?}) must be shorter than RECONCILE_TIMEOUT_SECS ({reconcile:?})"
    )]
    TimeoutOrder {
        log_read: Duration,
        reconcile: Duration,
    },
}

/// How the executor image is discovered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Explicit image, bypasses the pod lookup (local/debug runs).
    pub image_override: Option<String>,
    /// Namespace of the operator pod.
    pub pod_namespace: Option<String>,
    /// Name of the operator pod.
    pub pod_name: Option<String>,
    /// Container whose image is used; the first container when unset.
    pub container: Option<String>,
}

/// Requeue intervals and time bounds of a reconciliation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timings {
    /// Requeue interval after a successful pass.
    pub requeue_after: Duration,
    /// Delay used for "requeue now" outcomes.
    pub requeue_now: Duration,
    /// Upper bound on reading an installer log stream.
    pub log_read_timeout: Duration,
    /// Upper bound on a whole reconciliation pass.
    pub reconcile_timeout: Duration,
}

impl Timings {
    /// A hanging log stream must hit its own bound before the pass bound,
    /// so the read failure is recorded on the request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_read_timeout >= self.reconcile_timeout {
            return Err(ConfigError::TimeoutOrder {
                log_read: self.log_read_timeout,
                reconcile: self.reconcile_timeout,
            });
        }
        Ok(())
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            requeue_after: Duration::from_secs(DEFAULT_REQUEUE_AFTER_SECS),
            requeue_now: Duration::from_secs(DEFAULT_REQUEUE_NOW_SECS),
            log_read_timeout: Duration::from_secs(DEFAULT_LOG_READ_TIMEOUT_SECS),
            reconcile_timeout: Duration::from_secs(DEFAULT_RECONCILE_TIMEOUT_SECS),
        }
    }
}

/// Complete operator configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    pub executor: ExecutorSettings,
    pub timings: Timings,
    /// Namespace to watch; cluster-wide when unset.
    pub watch_namespace: Option<String>,
    pub health_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorSettings::default(),
            timings: Timings::default(),
            watch_namespace: None,
            health_port: DEFAULT_HEALTH_PORT,
        }
    }
}

impl OperatorConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let secs = |name: &'static str, default: u64| -> Result<Duration, ConfigError> {
            match non_empty(name) {
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::InvalidValue {
                        name,
                        value,
                        expected: "a whole number of seconds",
                    }),
                None => Ok(Duration::from_secs(default)),
            }
        };

        let health_port = match non_empty(HEALTH_PORT_ENV) {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidValue {
                    name: HEALTH_PORT_ENV,
                    value,
                    expected: "a TCP port",
                })?,
            None => DEFAULT_HEALTH_PORT,
        };

        let timings = Timings {
            requeue_after: secs(REQUEUE_AFTER_SECS_ENV, DEFAULT_REQUEUE_AFTER_SECS)?,
            requeue_now: secs(REQUEUE_NOW_SECS_ENV, DEFAULT_REQUEUE_NOW_SECS)?,
            log_read_timeout: secs(LOG_READ_TIMEOUT_SECS_ENV, DEFAULT_LOG_READ_TIMEOUT_SECS)?,
            reconcile_timeout: secs(RECONCILE_TIMEOUT_SECS_ENV, DEFAULT_RECONCILE_TIMEOUT_SECS)?,
        };
        timings.validate()?;

        Ok(Self {
            executor: ExecutorSettings {
                image_override: non_empty(INSTALLER_IMAGE_ENV),
                pod_namespace: non_empty(POD_NAMESPACE_ENV),
                pod_name: non_empty(POD_NAME_ENV),
                container: non_empty(INSTALLER_CONTAINER_ENV),
            },
            timings,
            watch_namespace: non_empty(WATCH_NAMESPACE_ENV),
            health_port,
        })
    }
}
