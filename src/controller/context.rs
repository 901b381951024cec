//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler,
//! including the Kubernetes client, the configured reconciler and the event
//! recorder.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::client::KubeClusterClient;
use crate::config::OperatorConfig;
use crate::controller::executor::PodImageDiscoverer;
use crate::controller::factory::DefaultHandlerFactory;
use crate::controller::manifests::ManifestRegistry;
use crate::controller::pod_logs::KubePodLogReader;
use crate::controller::reconciler::Reconciler;
use crate::crd::InstallRequest;
use crate::health::HealthState;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "package-operator";

/// Reconciler bound to the Kubernetes API.
pub type KubeReconciler = Reconciler<
    KubeClusterClient,
    PodImageDiscoverer<KubeClusterClient>,
    DefaultHandlerFactory<KubePodLogReader>,
>;

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Operator configuration
    pub config: OperatorConfig,
    /// Reconciler used for every pass
    pub reconciler: KubeReconciler,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        config: OperatorConfig,
        registry: Arc<ManifestRegistry>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let cluster = KubeClusterClient::new(client.clone());
        let reconciler = Reconciler::new(
            cluster.clone(),
            PodImageDiscoverer::new(cluster, config.executor.clone()),
            DefaultHandlerFactory::new(
                KubePodLogReader::new(client.clone()),
                registry,
                config.timings,
            ),
        );

        Self {
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: config.executor.pod_name.clone(),
            },
            client,
            config,
            reconciler,
            health_state,
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish a normal event for a request
    pub async fn publish_normal_event(
        &self,
        request: &InstallRequest,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(request, EventType::Normal, reason, action, note)
            .await
    }

    /// Publish a warning event for a request
    pub async fn publish_warning_event(
        &self,
        request: &InstallRequest,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(request, EventType::Warning, reason, action, note)
            .await
    }

    async fn publish(
        &self,
        request: &InstallRequest,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let object_ref = request.object_ref(&());
        if let Err(e) = self
            .recorder()
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}
