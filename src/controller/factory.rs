//! Construction of handlers.

use std::sync::Arc;

use crate::client::ClusterClient;
use crate::config::Timings;
use crate::controller::executor::ExecutorInfo;
use crate::controller::handler::{Handler, InstallRequestHandler};
use crate::controller::job_completer::InstallJobCompleter;
use crate::controller::manifests::ManifestRegistry;
use crate::controller::pod_logs::PodLogReader;
use crate::crd::InstallRequest;

/// Builds the handler for one reconciliation pass.
pub trait HandlerFactory<C: ClusterClient>: Send + Sync {
    type Handler: Handler;

    fn new_handler(&self, request: InstallRequest, client: C, executor: ExecutorInfo)
    -> Self::Handler;
}

/// Builds [`InstallRequestHandler`]s backed by an [`InstallJobCompleter`].
#[derive(Clone)]
pub struct DefaultHandlerFactory<R> {
    log_reader: R,
    registry: Arc<ManifestRegistry>,
    timings: Timings,
}

impl<R: PodLogReader> DefaultHandlerFactory<R> {
    pub fn new(log_reader: R, registry: Arc<ManifestRegistry>, timings: Timings) -> Self {
        Self {
            log_reader,
            registry,
            timings,
        }
    }
}

impl<C, R> HandlerFactory<C> for DefaultHandlerFactory<R>
where
    C: ClusterClient,
    R: PodLogReader,
{
    type Handler = InstallRequestHandler<C, InstallJobCompleter<C, R>>;

    fn new_handler(
        &self,
        request: InstallRequest,
        client: C,
        executor: ExecutorInfo,
    ) -> Self::Handler {
        let completer = InstallJobCompleter::new(
            client.clone(),
            self.log_reader.clone(),
            self.registry.clone(),
            self.timings.log_read_timeout,
        );
        InstallRequestHandler::new(request, client, completer, executor, self.timings)
    }
}
