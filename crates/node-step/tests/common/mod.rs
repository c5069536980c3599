#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use node_step::{
    BindContext, ConfigurationError, Connector, ConnectorRef, ConnectorRegistry, ConnectorShape,
    ConnectorType, DockerNodeStep, FlowNodeId, LaunchCommand, LaunchOutput, Launcher, NodeHandle,
    OutputSink, ProvisionFailure, ProvisionRequest, ProvisioningError, TeardownError,
};
use serde_json::Value;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const FAKE_KIND: &str = "fake";

#[derive(Debug, Default)]
pub struct Counters {
    pub provisioned: AtomicUsize,
    pub torn_down: AtomicUsize,
    pub reclaimed: AtomicUsize,
    /// Hanging teardowns given up on by their caller.
    pub teardown_abandoned: AtomicUsize,
}

impl Counters {
    pub fn provisioned(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }

    pub fn torn_down(&self) -> usize {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn reclaimed(&self) -> usize {
        self.reclaimed.load(Ordering::SeqCst)
    }

    pub fn teardown_abandoned(&self) -> usize {
        self.teardown_abandoned.load(Ordering::SeqCst)
    }
}

/// Counts a hanging teardown when its future is dropped.
struct Abandoned(Arc<Counters>);

impl Drop for Abandoned {
    fn drop(&mut self) {
        self.0.teardown_abandoned.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provision {
    Succeed,
    Fail,
    FailWithPartial,
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    Succeed,
    Fail,
    Hang,
}

/// Connector type whose instances count calls and fail on demand.
#[derive(Debug, Clone)]
pub struct FakeType {
    pub counters: Arc<Counters>,
    pub provision: Provision,
    pub teardown: Teardown,
}

impl FakeType {
    pub fn new(provision: Provision, teardown: Teardown) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            provision,
            teardown,
        }
    }

    pub fn registry(&self) -> ConnectorRegistry {
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(self.clone()));
        registry
    }
}

impl ConnectorType for FakeType {
    fn kind(&self) -> &str {
        FAKE_KIND
    }

    fn display_name(&self) -> &str {
        "Fake connector"
    }

    fn shape(&self) -> anyhow::Result<ConnectorShape> {
        Ok(ConnectorShape::rehydratable())
    }

    fn instantiate(&self, _settings: &Value) -> Result<Arc<dyn Connector>, ConfigurationError> {
        Ok(Arc::new(FakeConnector {
            counters: self.counters.clone(),
            provision: self.provision,
            teardown: self.teardown,
        }))
    }
}

#[derive(Debug)]
pub struct FakeConnector {
    counters: Arc<Counters>,
    provision: Provision,
    teardown: Teardown,
}

fn handle(request: &ProvisionRequest) -> NodeHandle {
    NodeHandle {
        node_name: format!("fake-{}", request.run_id),
        container_id: format!("fake-{}", request.run_id),
        image: request.image.clone(),
        docker_host: request.docker_host.clone(),
        credentials: None,
        remote_fs: request.remote_fs.clone().unwrap_or_else(|| "/work".into()),
        user: None,
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn kind(&self) -> &str {
        FAKE_KIND
    }

    async fn provision(
        &self,
        request: &ProvisionRequest,
        _cancel: &CancellationToken,
    ) -> Result<NodeHandle, ProvisionFailure> {
        self.counters.provisioned.fetch_add(1, Ordering::SeqCst);
        match self.provision {
            Provision::Succeed => Ok(handle(request)),
            Provision::Fail => Err(ProvisionFailure::clean(
                ProvisioningError::RuntimeUnavailable {
                    endpoint: request.endpoint().to_string(),
                    message: "connection refused".into(),
                },
            )),
            Provision::FailWithPartial => Err(ProvisionFailure::with_partial(
                ProvisioningError::ContainerStart {
                    image: request.image.clone(),
                    message: "exited immediately".into(),
                },
                handle(request),
            )),
            Provision::Hang => {
                std::future::pending::<()>().await;
                Ok(handle(request))
            }
        }
    }

    fn launcher(&self, _node: &NodeHandle) -> Arc<dyn Launcher> {
        Arc::new(EchoLauncher)
    }

    async fn teardown(&self, node: &NodeHandle) -> Result<(), TeardownError> {
        self.counters.torn_down.fetch_add(1, Ordering::SeqCst);
        match self.teardown {
            Teardown::Succeed => Ok(()),
            Teardown::Fail => Err(TeardownError::Release {
                container: node.container_id.clone(),
                message: "daemon went away".into(),
            }),
            Teardown::Hang => {
                let _abandoned = Abandoned(self.counters.clone());
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }

    async fn reclaim(&self, _request: &ProvisionRequest) -> Result<usize, TeardownError> {
        self.counters.reclaimed.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

struct EchoLauncher;

#[async_trait]
impl Launcher for EchoLauncher {
    async fn launch(&self, command: &LaunchCommand) -> anyhow::Result<LaunchOutput> {
        Ok(LaunchOutput {
            exit_code: Some(0),
            stdout: command.args.join(" "),
            stderr: String::new(),
        })
    }
}

/// Sink that keeps every line for assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl OutputSink for RecordingSink {
    fn line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

/// Polls `done` for up to a second.
pub async fn eventually(done: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}

pub fn bind() -> BindContext {
    BindContext::new(Arc::new(RecordingSink::default()), FlowNodeId("4".into()))
}

pub fn fake_step(image: &str) -> DockerNodeStep {
    let mut step = DockerNodeStep::new(image).unwrap();
    step.set_connector(Some(ConnectorRef::of_kind(FAKE_KIND)));
    step
}
