use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::connector::{Connector, NodeHandle, ProvisionRequest};
use crate::error::TeardownError;

/// Ownership of a provisioned node. Releasing consumes the lease, so a node is
/// torn down at most once; a lease dropped unreleased spawns the teardown instead.
///
/// Both paths are bounded by the same teardown timeout.
pub(crate) struct NodeLease {
    connector: Arc<dyn Connector>,
    node: Option<NodeHandle>,
    timeout: Duration,
}

impl NodeLease {
    pub(crate) fn new(connector: Arc<dyn Connector>, node: NodeHandle, timeout: Duration) -> Self {
        Self {
            connector,
            node: Some(node),
            timeout,
        }
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub(crate) async fn release(mut self) -> Result<(), TeardownError> {
        let Some(node) = self.node.take() else {
            return Ok(());
        };
        release_node(self.connector.as_ref(), &node, self.timeout).await
    }
}

impl Drop for NodeLease {
    fn drop(&mut self) {
        let Some(node) = self.node.take() else {
            return;
        };
        warn!(container = %node.container_id, "node lease dropped before release, tearing down in background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let connector = self.connector.clone();
                let timeout = self.timeout;
                handle.spawn(async move {
                    if let Err(err) = release_node(connector.as_ref(), &node, timeout).await {
                        error!(container = %node.container_id, error = %err, "background teardown failed");
                    }
                });
            }
            Err(_) => {
                error!(container = %node.container_id, "no tokio runtime to release container; it must be reclaimed manually");
            }
        }
    }
}

/// Armed while a provision call is in flight. Dropped armed, it reclaims
/// whatever the runtime already created under the run's label.
pub(crate) struct ProvisionGuard {
    connector: Arc<dyn Connector>,
    request: Option<ProvisionRequest>,
    timeout: Duration,
}

impl ProvisionGuard {
    pub(crate) fn arm(
        connector: Arc<dyn Connector>,
        request: ProvisionRequest,
        timeout: Duration,
    ) -> Self {
        Self {
            connector,
            request: Some(request),
            timeout,
        }
    }

    /// Provisioning returned; the caller owns cleanup from here on.
    pub(crate) fn disarm(mut self) {
        self.request = None;
    }
}

impl Drop for ProvisionGuard {
    fn drop(&mut self) {
        let Some(request) = self.request.take() else {
            return;
        };
        warn!(run_id = %request.run_id, "provisioning abandoned, reclaiming by run label in background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let connector = self.connector.clone();
                let timeout = self.timeout;
                handle.spawn(async move {
                    match tokio::time::timeout(timeout, connector.reclaim(&request)).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(err)) => {
                            error!(run_id = %request.run_id, error = %err, "background reclaim failed")
                        }
                        Err(_) => {
                            error!(run_id = %request.run_id, ?timeout, "background reclaim timed out")
                        }
                    }
                });
            }
            Err(_) => {
                error!(run_id = %request.run_id, "no tokio runtime to reclaim containers; run recover for this run");
            }
        }
    }
}

pub(crate) async fn release_node(
    connector: &dyn Connector,
    node: &NodeHandle,
    timeout: Duration,
) -> Result<(), TeardownError> {
    match tokio::time::timeout(timeout, connector.teardown(node)).await {
        Ok(result) => result,
        Err(_) => Err(TeardownError::TimedOut {
            container: node.container_id.clone(),
            timeout,
        }),
    }
}
