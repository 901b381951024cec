//! package-operator binary.
//!
//! Loads [`OperatorConfig`] from the environment, serves probes and metrics
//! right away, and runs the InstallRequest controller while this replica
//! holds the leader lease. Losing the lease ends the process so the
//! Deployment restarts it into a fresh election.

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};

use package_operator::OperatorConfig;
use package_operator::health::{HealthState, run_health_server};
use package_operator::run_controller;

const LEASE_NAME: &str = "package-operator-leader";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Time given to a running pass before the process exits on a signal.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// This replica's place in the leader election.
struct LeaderLease {
    lock: LeaseLock,
    holder: String,
    namespace: String,
}

impl LeaderLease {
    /// The lease lives next to the operator pod and is held under its name.
    fn from_config(client: Client, config: &OperatorConfig) -> Self {
        let holder = config.executor.pod_name.clone().unwrap_or_else(|| {
            let host = hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string());
            warn!(holder = %host, "POD_NAME not set, holding the lease under the hostname");
            host
        });
        let namespace = config.executor.pod_namespace.clone().unwrap_or_else(|| {
            warn!("POD_NAMESPACE not set, keeping the lease in 'default'");
            "default".to_string()
        });

        let lock = LeaseLock::new(
            client,
            &namespace,
            LeaseLockParams {
                holder_id: holder.clone(),
                lease_name: LEASE_NAME.to_string(),
                lease_ttl: LEASE_TTL,
            },
        );
        Self {
            lock,
            holder,
            namespace,
        }
    }

    /// Wait until this replica is the leader.
    async fn acquire(&self) {
        info!(
            holder = %self.holder,
            namespace = %self.namespace,
            lease = LEASE_NAME,
            "Waiting for leadership"
        );
        loop {
            match self.lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {
                    info!(holder = %self.holder, "Acquired leadership");
                    return;
                }
                Ok(_) => info!("Another replica holds the lease"),
                Err(e) => warn!(error = %e, "Failed to acquire lease, retrying"),
            }
            tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
        }
    }

    /// Keep renewing the lease; returns why it could not be kept.
    async fn hold(&self) -> String {
        loop {
            tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
            match self.lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {}
                Ok(_) => return "lease taken over by another replica".to_string(),
                Err(e) => return format!("failed to renew lease: {}", e),
            }
        }
    }
}

fn init_tracing() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("package_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();
    Ok(())
}

fn log_config(config: &OperatorConfig) {
    let executor = &config.executor;
    let timings = &config.timings;
    info!(
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("cluster-wide"),
        image_override = ?executor.image_override,
        executor_pod = ?executor.pod_namespace.as_deref().zip(executor.pod_name.as_deref()),
        executor_container = executor.container.as_deref().unwrap_or("<first>"),
        requeue_after = ?timings.requeue_after,
        requeue_now = ?timings.requeue_now,
        log_read_timeout = ?timings.log_read_timeout,
        reconcile_timeout = ?timings.reconcile_timeout,
        health_port = config.health_port,
        "Loaded configuration"
    );
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    init_tracing()?;

    let config = OperatorConfig::from_env()?;
    log_config(&config);

    let client = Client::try_default().await?;
    let health = Arc::new(HealthState::new());

    // Probes answer before leadership so a standby replica stays alive.
    let mut health_server = {
        let health = health.clone();
        let port = config.health_port;
        tokio::spawn(async move { run_health_server(health, port).await })
    };

    let lease = LeaderLease::from_config(client.clone(), &config);
    tokio::select! {
        _ = lease.acquire() => {}
        _ = shutdown_signal() => {
            info!("Shutdown requested before leadership was acquired");
            return Ok(());
        }
    }

    let outcome: Result<(), BoxError> = tokio::select! {
        _ = run_controller(client, config, Some(health.clone())) => {
            Err("InstallRequest controller stopped".into())
        }
        reason = lease.hold() => {
            Err(format!("leadership lost: {}", reason).into())
        }
        served = &mut health_server => match served {
            Ok(Ok(())) => Err("health server stopped".into()),
            Ok(Err(e)) => Err(format!("health server failed: {}", e).into()),
            Err(e) => Err(format!("health server task failed: {}", e).into()),
        },
        _ = shutdown_signal() => {
            info!(grace = ?SHUTDOWN_GRACE_PERIOD, "Shutdown requested, draining");
            health.set_ready(false).await;
            tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
            Ok(())
        }
    };

    health.set_ready(false).await;
    match &outcome {
        Ok(()) => info!("package-operator stopped"),
        Err(e) => error!(error = %e, "package-operator stopping"),
    }
    outcome
}

/// Resolve on SIGTERM or Ctrl+C.
///
/// Without signal handlers there is no clean shutdown, so failing to
/// install them is fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
