//! Reconciliation of InstallRequests.
//!
//! [`Reconciler`] is the entry point for one pending change: it fetches the
//! request, resolves the executor image, lets a handler drive the request
//! and persists the status when it changed. [`reconcile`] and
//! [`error_policy`] adapt it to `kube::runtime::Controller`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, instrument, warn};

use crate::client::ClusterClient;
use crate::config::Timings;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result, error_chain};
use crate::controller::executor::ExecutorInfoDiscoverer;
use crate::controller::factory::HandlerFactory;
use crate::controller::handler::{Handler, ReconcileOutcome};
use crate::crd::{
    CONDITION_READY, CONDITION_SYNCED, InstallRequest, InstallRequestStatus, REASON_AVAILABLE,
    REASON_RECONCILE_ERROR,
};

/// Result of a reconciliation pass, with the status before and after it.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconciliation {
    pub outcome: ReconcileOutcome,
    /// Status read from the cluster; `None` if the request had none.
    pub previous: Option<InstallRequestStatus>,
    /// Status after the pass; `None` if the request had none or is gone.
    pub current: Option<InstallRequestStatus>,
}

impl Reconciliation {
    fn untouched(outcome: ReconcileOutcome, status: Option<InstallRequestStatus>) -> Self {
        Self {
            outcome,
            previous: status.clone(),
            current: status,
        }
    }

    /// Reason of the `Ready` condition, if it changed in this pass.
    pub fn ready_transition(&self) -> Option<&str> {
        let previous = ready_reason(self.previous.as_ref());
        let current = ready_reason(self.current.as_ref());
        if current != previous { current } else { None }
    }

    /// Message of a `ReconcileError` condition newly set in this pass.
    pub fn new_error(&self) -> Option<&str> {
        let current = sync_error(self.current.as_ref())?;
        if sync_error(self.previous.as_ref()) == Some(current) {
            return None;
        }
        Some(current)
    }
}

fn ready_reason(status: Option<&InstallRequestStatus>) -> Option<&str> {
    status.and_then(|s| s.conditions.reason(CONDITION_READY))
}

fn sync_error(status: Option<&InstallRequestStatus>) -> Option<&str> {
    status
        .and_then(|s| s.conditions.get(CONDITION_SYNCED))
        .filter(|c| c.reason == REASON_RECONCILE_ERROR)
        .map(|c| c.message.as_str())
}

/// Drives InstallRequests towards an installed package.
#[derive(Clone)]
pub struct Reconciler<C, D, F> {
    client: C,
    discoverer: D,
    factory: F,
}

impl<C, D, F> Reconciler<C, D, F>
where
    C: ClusterClient,
    D: ExecutorInfoDiscoverer,
    F: HandlerFactory<C>,
{
    pub fn new(client: C, discoverer: D, factory: F) -> Self {
        Self {
            client,
            discoverer,
            factory,
        }
    }

    /// Reconcile the InstallRequest `namespace/name`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        Ok(self.reconcile_detailed(namespace, name).await?.outcome)
    }

    /// Reconcile the InstallRequest `namespace/name`, reporting the status
    /// before and after the pass.
    #[instrument(skip(self))]
    pub async fn reconcile_detailed(&self, namespace: &str, name: &str) -> Result<Reconciliation> {
        let Some(request) = self.client.get_install_request(namespace, name).await? else {
            debug!("InstallRequest not found (likely deleted)");
            return Ok(Reconciliation::untouched(ReconcileOutcome::Done, None));
        };

        // Without an executor image no job can run; leave the status alone
        // and try again shortly.
        let executor = match self.discoverer.discover().await {
            Ok(executor) => executor,
            Err(e) => {
                warn!(error = %error_chain(&e), "Failed to discover executor image");
                return Ok(Reconciliation::untouched(
                    ReconcileOutcome::RequeueNow,
                    request.status,
                ));
            }
        };

        let previous = request.status.clone();
        let mut handler = self.factory.new_handler(request, self.client.clone(), executor);
        let outcome = handler.sync().await;
        let request = handler.into_request();

        if request.status != previous {
            debug!(outcome = ?outcome, "Persisting status");
            self.client.patch_install_request_status(&request).await?;
        }

        Ok(Reconciliation {
            outcome,
            previous,
            current: request.status,
        })
    }

    /// [`Self::reconcile_detailed`] bounded by `limit`. The bound covers the
    /// API calls around the handler too, so it must exceed the log read
    /// timeout of the handler factory.
    pub async fn reconcile_within(
        &self,
        namespace: &str,
        name: &str,
        limit: Duration,
    ) -> Result<Reconciliation> {
        tokio::time::timeout(limit, self.reconcile_detailed(namespace, name))
            .await
            .map_err(|_| Error::Timeout(limit))?
    }
}

/// Map a reconcile outcome to a controller action.
pub fn outcome_action(outcome: ReconcileOutcome, timings: &Timings) -> Action {
    match outcome {
        ReconcileOutcome::Done => Action::await_change(),
        ReconcileOutcome::RequeueAfter(interval) => Action::requeue(interval),
        ReconcileOutcome::RequeueNow => Action::requeue(timings.requeue_now),
    }
}

fn outcome_label(outcome: ReconcileOutcome) -> &'static str {
    match outcome {
        ReconcileOutcome::Done => "done",
        ReconcileOutcome::RequeueAfter(_) => "requeue_after",
        ReconcileOutcome::RequeueNow => "requeue_now",
    }
}

/// Reconcile an InstallRequest
///
/// This is the function called by the controller for every change of an
/// InstallRequest or of a job it owns.
pub async fn reconcile(obj: Arc<InstallRequest>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling InstallRequest");

    let reconciliation = ctx
        .reconciler
        .reconcile_within(&namespace, &name, ctx.config.timings.reconcile_timeout)
        .await?;

    if let Some(reason) = reconciliation.ready_transition() {
        info!(name = %name, namespace = %namespace, ready = %reason, "Ready condition changed");
        let note = if reason == REASON_AVAILABLE {
            format!("Package {} is installed", obj.spec.package)
        } else {
            format!("Installing package {}", obj.spec.package)
        };
        ctx.publish_normal_event(&obj, reason, "Install", Some(note))
            .await;
    }

    if let Some(message) = reconciliation.new_error() {
        ctx.publish_warning_event(&obj, REASON_RECONCILE_ERROR, "Install", Some(message.to_string()))
            .await;
    }

    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state
            .metrics
            .record_reconcile(&namespace, &name, duration);
        health_state
            .metrics
            .record_outcome(outcome_label(reconciliation.outcome));
        if reconciliation.ready_transition() == Some(REASON_AVAILABLE) {
            health_state.metrics.record_install(&namespace);
        }
        health_state.touch_last_reconcile();
    }

    Ok(outcome_action(reconciliation.outcome, &ctx.config.timings))
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<InstallRequest>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    // Record error metric
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error_chain(error), "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error_chain(error), "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}
