//! Built-in connector that drives the container runtime CLI.
//!
//! The container is started detached with `cat` as its entrypoint so it stays
//! alive without doing anything; every command then runs through `exec`.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::process::{Output, Stdio};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    Connector, ConnectorShape, ConnectorType, FieldSpec, FieldType, LaunchCommand, LaunchOutput,
    Launcher, NodeHandle, ProvisionFailure, ProvisionRequest, RUN_LABEL,
};
use crate::credentials::{CredentialsProvider, DockerServerCredentials};
use crate::error::{ConfigurationError, ProvisioningError, TeardownError};

pub const KIND: &str = "attach";
pub const RUNTIME_ENV: &str = "DOCKERNODE_CONTAINER_RUNTIME";
pub const DEFAULT_REMOTE_FS: &str = "/home/dockernode/agent";

const LOG_LIMIT: usize = 2048;

/// Which container runtime the connector talks to.
#[derive(Debug, Clone)]
pub enum ContainerRuntime {
    /// A docker-compatible CLI binary.
    Binary(String),
    /// In-process simulation, for tests and dry runs.
    Stub(StubRuntime),
}

static SHARED_STUB: Lazy<StubRuntime> = Lazy::new(StubRuntime::default);

impl ContainerRuntime {
    pub fn from_env() -> Self {
        Self::from_setting(&env::var(RUNTIME_ENV).unwrap_or_default())
    }

    /// `stub` selects the shared in-process runtime, blank means `docker`,
    /// anything else names the runtime binary.
    pub fn from_setting(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("stub") {
            ContainerRuntime::Stub(SHARED_STUB.clone())
        } else if value.is_empty() {
            ContainerRuntime::Binary("docker".to_string())
        } else {
            ContainerRuntime::Binary(value.to_string())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AttachSettings {
    /// User to run the container and its commands as.
    #[serde(default)]
    pub user: Option<String>,
}

pub struct AttachConnectorType {
    runtime: ContainerRuntime,
    credentials: Arc<dyn CredentialsProvider>,
}

impl AttachConnectorType {
    pub fn new(runtime: ContainerRuntime, credentials: Arc<dyn CredentialsProvider>) -> Self {
        Self {
            runtime,
            credentials,
        }
    }
}

impl ConnectorType for AttachConnectorType {
    fn kind(&self) -> &str {
        KIND
    }

    fn display_name(&self) -> &str {
        "Attach Docker container"
    }

    fn shape(&self) -> anyhow::Result<ConnectorShape> {
        Ok(ConnectorShape::rehydratable().field(FieldSpec::new("user", FieldType::Text)))
    }

    fn instantiate(&self, settings: &Value) -> Result<Arc<dyn Connector>, ConfigurationError> {
        let settings: AttachSettings = serde_json::from_value(settings.clone()).map_err(|err| {
            ConfigurationError::InvalidSettings {
                kind: KIND.to_string(),
                message: err.to_string(),
            }
        })?;
        Ok(Arc::new(AttachConnector {
            runtime: self.runtime.clone(),
            credentials: self.credentials.clone(),
            settings,
        }))
    }
}

pub struct AttachConnector {
    runtime: ContainerRuntime,
    credentials: Arc<dyn CredentialsProvider>,
    settings: AttachSettings,
}

impl std::fmt::Debug for AttachConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachConnector")
            .field("runtime", &self.runtime)
            .field("settings", &self.settings)
            .finish()
    }
}

#[async_trait]
impl Connector for AttachConnector {
    fn kind(&self) -> &str {
        KIND
    }

    async fn provision(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<NodeHandle, ProvisionFailure> {
        let credentials = match &request.credentials_id {
            Some(id) => Some(self.credentials.lookup(id).map_err(ProvisionFailure::clean)?),
            None => None,
        };
        let handle = NodeHandle {
            node_name: container_name(&request.run_id),
            container_id: container_name(&request.run_id),
            image: request.image.clone(),
            docker_host: request.docker_host.clone(),
            credentials,
            remote_fs: request
                .remote_fs
                .clone()
                .unwrap_or_else(|| DEFAULT_REMOTE_FS.to_string()),
            user: self.settings.user.clone(),
        };

        match &self.runtime {
            ContainerRuntime::Stub(stub) => stub.provision(request, handle, cancel),
            ContainerRuntime::Binary(binary) => {
                DockerCli::for_node(binary, &handle)
                    .provision(request, handle, cancel)
                    .await
            }
        }
    }

    fn launcher(&self, node: &NodeHandle) -> Arc<dyn Launcher> {
        match &self.runtime {
            ContainerRuntime::Stub(stub) => Arc::new(StubLauncher {
                stub: stub.clone(),
                container: node.container_id.clone(),
            }),
            ContainerRuntime::Binary(binary) => Arc::new(DockerExecLauncher {
                cli: DockerCli::for_node(binary, node),
                node: node.clone(),
            }),
        }
    }

    async fn teardown(&self, node: &NodeHandle) -> Result<(), TeardownError> {
        match &self.runtime {
            ContainerRuntime::Stub(stub) => {
                stub.remove(&node.container_id);
                Ok(())
            }
            ContainerRuntime::Binary(binary) => {
                DockerCli::for_node(binary, node)
                    .remove(&node.container_id)
                    .await
            }
        }
    }

    async fn reclaim(&self, request: &ProvisionRequest) -> Result<usize, TeardownError> {
        match &self.runtime {
            ContainerRuntime::Stub(stub) => Ok(stub.remove_labelled(&request.run_id)),
            ContainerRuntime::Binary(binary) => {
                let credentials = request
                    .credentials_id
                    .as_deref()
                    .and_then(|id| self.credentials.lookup(id).ok());
                let cli = DockerCli {
                    binary: binary.clone(),
                    host: request.docker_host.clone(),
                    credentials,
                };
                cli.remove_labelled(&request.run_id).await
            }
        }
    }
}

pub fn container_name(run_id: &str) -> String {
    let sanitized: String = run_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("dockernode-{sanitized}")
}

/// Arguments placed before every subcommand: endpoint and TLS material.
pub fn global_args(host: Option<&str>, credentials: Option<&DockerServerCredentials>) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(host) = host {
        args.push("-H".to_string());
        args.push(host.to_string());
    }
    if let Some(credentials) = credentials {
        args.push("--tlsverify".to_string());
        args.push("--tlscacert".to_string());
        args.push(credentials.ca_cert.display().to_string());
        args.push("--tlscert".to_string());
        args.push(credentials.client_cert.display().to_string());
        args.push("--tlskey".to_string());
        args.push(credentials.client_key.display().to_string());
    }
    args
}

pub fn run_args(request: &ProvisionRequest, node: &NodeHandle) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "-i".to_string(),
        "--name".to_string(),
        node.container_id.clone(),
    ];
    for (key, value) in &request.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push("-w".to_string());
    args.push(node.remote_fs.clone());
    if let Some(user) = &node.user {
        args.push("-u".to_string());
        args.push(user.clone());
    }
    args.push("--entrypoint".to_string());
    args.push("cat".to_string());
    args.push(request.image.clone());
    args
}

pub fn exec_args(node: &NodeHandle, command: &LaunchCommand) -> Vec<String> {
    let mut args = vec![
        "exec".to_string(),
        "-w".to_string(),
        command
            .working_dir
            .clone()
            .unwrap_or_else(|| node.remote_fs.clone()),
    ];
    if let Some(user) = &node.user {
        args.push("-u".to_string());
        args.push(user.clone());
    }
    for (key, value) in &command.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(node.container_id.clone());
    args.extend(command.args.iter().cloned());
    args
}

/// Maps runtime CLI stderr onto the provisioning taxonomy.
fn classify_failure(request: &ProvisionRequest, stderr: &str) -> ProvisioningError {
    let lower = stderr.to_ascii_lowercase();
    let message = truncate(stderr.trim(), LOG_LIMIT);
    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("error during connect")
        || lower.contains("connection refused")
    {
        ProvisioningError::RuntimeUnavailable {
            endpoint: request.endpoint().to_string(),
            message,
        }
    } else if lower.contains("unauthorized")
        || lower.contains("certificate")
        || lower.contains("x509")
        || lower.contains("tls handshake")
        || lower.contains("authentication required")
    {
        ProvisioningError::Credentials {
            id: request
                .credentials_id
                .clone()
                .unwrap_or_else(|| "<none>".to_string()),
            message,
        }
    } else if lower.contains("pull access denied")
        || lower.contains("manifest unknown")
        || lower.contains("unable to find image")
        || lower.contains("repository does not exist")
        || lower.contains("no such image")
    {
        ProvisioningError::ImageUnavailable {
            image: request.image.clone(),
            message,
        }
    } else {
        ProvisioningError::ContainerStart {
            image: request.image.clone(),
            message,
        }
    }
}

#[derive(Debug)]
enum CliError {
    Spawn(std::io::Error),
    Cancelled,
}

#[derive(Debug, Clone)]
struct CommandLogs {
    stdout: String,
    stderr: String,
    exit_status: Option<i32>,
}

impl CommandLogs {
    fn from_output(output: &Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_status: output.status.code(),
        }
    }

    fn succeeded(&self) -> bool {
        self.exit_status == Some(0)
    }
}

#[derive(Debug, Clone)]
struct DockerCli {
    binary: String,
    host: Option<String>,
    credentials: Option<DockerServerCredentials>,
}

impl DockerCli {
    fn for_node(binary: &str, node: &NodeHandle) -> Self {
        Self {
            binary: binary.to_string(),
            host: node.docker_host.clone(),
            credentials: node.credentials.clone(),
        }
    }

    async fn run(&self, args: &[String], cancel: &CancellationToken) -> Result<CommandLogs, CliError> {
        let mut command = Command::new(&self.binary);
        command
            .args(global_args(self.host.as_deref(), self.credentials.as_ref()))
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(binary = %self.binary, args = ?args, "invoking container runtime");
        tokio::select! {
            output = command.output() => output
                .map(|o| CommandLogs::from_output(&o))
                .map_err(CliError::Spawn),
            _ = cancel.cancelled() => Err(CliError::Cancelled),
        }
    }

    async fn provision(
        &self,
        request: &ProvisionRequest,
        mut node: NodeHandle,
        cancel: &CancellationToken,
    ) -> Result<NodeHandle, ProvisionFailure> {
        let logs = match self.run(&run_args(request, &node), cancel).await {
            Ok(logs) => logs,
            Err(CliError::Cancelled) => {
                return Err(ProvisionFailure::clean(ProvisioningError::Cancelled))
            }
            Err(CliError::Spawn(err)) => {
                return Err(ProvisionFailure::clean(
                    ProvisioningError::RuntimeUnavailable {
                        endpoint: request.endpoint().to_string(),
                        message: format!("failed to spawn {}: {err}", self.binary),
                    },
                ))
            }
        };

        if !logs.succeeded() {
            let error = classify_failure(request, &logs.stderr);
            // `run` may have created the container before failing to start it.
            return Err(match error {
                ProvisioningError::ContainerStart { .. } => {
                    ProvisionFailure::with_partial(error, node)
                }
                other => ProvisionFailure::clean(other),
            });
        }

        let container_id = logs.stdout.trim().to_string();
        if container_id.is_empty() {
            return Err(ProvisionFailure::with_partial(
                ProvisioningError::ContainerStart {
                    image: request.image.clone(),
                    message: "runtime did not report a container id".to_string(),
                },
                node,
            ));
        }
        node.container_id = container_id;

        let inspect = vec![
            "inspect".to_string(),
            "-f".to_string(),
            "{{.State.Running}}".to_string(),
            node.container_id.clone(),
        ];
        let running = match self.run(&inspect, cancel).await {
            Ok(logs) => logs.succeeded() && logs.stdout.trim() == "true",
            Err(CliError::Cancelled) => {
                return Err(ProvisionFailure::with_partial(
                    ProvisioningError::Cancelled,
                    node,
                ))
            }
            Err(CliError::Spawn(_)) => false,
        };
        if !running {
            return Err(ProvisionFailure::with_partial(
                ProvisioningError::ContainerStart {
                    image: request.image.clone(),
                    message: format!("container {} is not running", node.container_id),
                },
                node,
            ));
        }

        info!(
            run_id = %request.run_id,
            image = %request.image,
            container = %node.container_id,
            "container started"
        );
        Ok(node)
    }

    async fn remove(&self, container: &str) -> Result<(), TeardownError> {
        let args = vec!["rm".to_string(), "-f".to_string(), container.to_string()];
        let logs = self
            .run(&args, &CancellationToken::new())
            .await
            .map_err(|err| TeardownError::Release {
                container: container.to_string(),
                message: format!("{err:?}"),
            })?;

        if logs.succeeded() || logs.stderr.contains("No such container") {
            info!(%container, "container removed");
            Ok(())
        } else {
            Err(TeardownError::Release {
                container: container.to_string(),
                message: truncate(logs.stderr.trim(), LOG_LIMIT),
            })
        }
    }

    async fn remove_labelled(&self, run_id: &str) -> Result<usize, TeardownError> {
        let args = vec![
            "ps".to_string(),
            "-aq".to_string(),
            "--filter".to_string(),
            format!("label={RUN_LABEL}={run_id}"),
        ];
        let logs = self
            .run(&args, &CancellationToken::new())
            .await
            .map_err(|err| TeardownError::Release {
                container: format!("label {RUN_LABEL}={run_id}"),
                message: format!("{err:?}"),
            })?;
        if !logs.succeeded() {
            return Err(TeardownError::Release {
                container: format!("label {RUN_LABEL}={run_id}"),
                message: truncate(logs.stderr.trim(), LOG_LIMIT),
            });
        }

        let mut removed = 0;
        for container in logs.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match self.remove(container).await {
                Ok(()) => removed += 1,
                Err(err) => warn!(%container, error = %err, "failed to reclaim container"),
            }
        }
        Ok(removed)
    }
}

struct DockerExecLauncher {
    cli: DockerCli,
    node: NodeHandle,
}

#[async_trait]
impl Launcher for DockerExecLauncher {
    async fn launch(&self, command: &LaunchCommand) -> anyhow::Result<LaunchOutput> {
        if command.args.is_empty() {
            anyhow::bail!("command cannot be empty");
        }
        let logs = match self
            .cli
            .run(&exec_args(&self.node, command), &CancellationToken::new())
            .await
        {
            Ok(logs) => logs,
            Err(CliError::Spawn(err)) => {
                anyhow::bail!("failed to spawn {}: {err}", self.cli.binary)
            }
            Err(CliError::Cancelled) => anyhow::bail!("command was cancelled"),
        };
        Ok(LaunchOutput {
            exit_code: logs.exit_status,
            stdout: logs.stdout,
            stderr: logs.stderr,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubContainer {
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub executed: Vec<Vec<String>>,
}

/// Simulated runtime; containers live in memory and commands echo their arguments.
#[derive(Debug, Clone, Default)]
pub struct StubRuntime {
    containers: Arc<Mutex<BTreeMap<String, StubContainer>>>,
    rejected_images: Arc<Mutex<BTreeSet<String>>>,
}

impl StubRuntime {
    /// Makes provisioning of `image` fail as if the registry did not have it.
    pub fn reject_image(&self, image: &str) {
        lock(&self.rejected_images).insert(image.to_string());
    }

    pub fn containers(&self) -> BTreeMap<String, StubContainer> {
        lock(&self.containers).clone()
    }

    pub fn is_running(&self, container: &str) -> bool {
        lock(&self.containers).contains_key(container)
    }

    fn provision(
        &self,
        request: &ProvisionRequest,
        mut node: NodeHandle,
        cancel: &CancellationToken,
    ) -> Result<NodeHandle, ProvisionFailure> {
        if cancel.is_cancelled() {
            return Err(ProvisionFailure::clean(ProvisioningError::Cancelled));
        }
        if lock(&self.rejected_images).contains(&request.image) {
            return Err(ProvisionFailure::clean(ProvisioningError::ImageUnavailable {
                image: request.image.clone(),
                message: "stub runtime rejects this image".to_string(),
            }));
        }

        let simple = Uuid::new_v4().simple().to_string();
        node.container_id = format!("stub-{}", &simple[..12]);
        lock(&self.containers).insert(
            node.container_id.clone(),
            StubContainer {
                image: request.image.clone(),
                labels: request.labels.clone(),
                executed: Vec::new(),
            },
        );
        debug!(container = %node.container_id, "stub container started");
        Ok(node)
    }

    fn remove(&self, container: &str) {
        lock(&self.containers).remove(container);
    }

    fn remove_labelled(&self, run_id: &str) -> usize {
        let mut containers = lock(&self.containers);
        let before = containers.len();
        containers.retain(|_, c| c.labels.get(RUN_LABEL).map(String::as_str) != Some(run_id));
        before - containers.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct StubLauncher {
    stub: StubRuntime,
    container: String,
}

#[async_trait]
impl Launcher for StubLauncher {
    async fn launch(&self, command: &LaunchCommand) -> anyhow::Result<LaunchOutput> {
        let mut containers = lock(&self.stub.containers);
        let container = containers
            .get_mut(&self.container)
            .ok_or_else(|| anyhow::anyhow!("container {} is not running", self.container))?;
        container.executed.push(command.args.clone());
        Ok(LaunchOutput {
            exit_code: Some(0),
            stdout: format!("{}\n", command.args.join(" ")),
            stderr: String::new(),
        })
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let mut truncated = text[..end].to_string();
        truncated.push_str("… (truncated)");
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::NoCredentials;
    use crate::spec::DockerNodeStep;
    use serial_test::serial;
    use std::path::Path;

    fn request() -> ProvisionRequest {
        let mut step = DockerNodeStep::new("ubuntu:20.04").unwrap();
        step.set_docker_host(Some("tcp://docker.example:2376"));
        ProvisionRequest::for_step("run-42", &step)
    }

    fn node(user: Option<&str>) -> NodeHandle {
        NodeHandle {
            node_name: container_name("run-42"),
            container_id: container_name("run-42"),
            image: "ubuntu:20.04".into(),
            docker_host: Some("tcp://docker.example:2376".into()),
            credentials: None,
            remote_fs: DEFAULT_REMOTE_FS.into(),
            user: user.map(str::to_string),
        }
    }

    #[test]
    fn run_args_label_and_keep_container_alive() {
        let args = run_args(&request(), &node(Some("1000:1000")));
        assert_eq!(&args[..3], &["run", "-d", "-i"]);
        assert!(args.contains(&"dockernode.run=run-42".to_string()));
        assert!(args.contains(&"1000:1000".to_string()));

        let entry = args.iter().position(|a| a == "--entrypoint").unwrap();
        assert_eq!(args[entry + 1], "cat");
        assert_eq!(args.last().map(String::as_str), Some("ubuntu:20.04"));
    }

    #[test]
    fn exec_args_prefer_command_workdir() {
        let mut command = LaunchCommand::new(["make", "test"]);
        command.env.insert("CI".into(), "true".into());
        let args = exec_args(&node(None), &command);
        assert_eq!(args[2], DEFAULT_REMOTE_FS);
        assert!(args.contains(&"CI=true".to_string()));
        assert_eq!(&args[args.len() - 2..], &["make", "test"]);

        command.working_dir = Some("/src".into());
        assert_eq!(exec_args(&node(None), &command)[2], "/src");
    }

    #[test]
    fn global_args_include_endpoint_and_tls() {
        let credentials = DockerServerCredentials::in_dir(Path::new("/creds/prod"));
        let args = global_args(Some("tcp://h:2376"), Some(&credentials));
        assert_eq!(&args[..2], &["-H", "tcp://h:2376"]);
        assert!(args.contains(&"--tlsverify".to_string()));
        assert!(args.contains(&"/creds/prod/key.pem".to_string()));
        assert!(global_args(None, None).is_empty());
    }

    #[test]
    fn container_names_are_sanitized() {
        assert_eq!(container_name("a/b c"), "dockernode-a-b-c");
    }

    #[test]
    fn stderr_is_classified() {
        let req = request();
        assert!(matches!(
            classify_failure(&req, "Cannot connect to the Docker daemon at tcp://x"),
            ProvisioningError::RuntimeUnavailable { .. }
        ));
        assert!(matches!(
            classify_failure(&req, "pull access denied for nope, repository does not exist"),
            ProvisioningError::ImageUnavailable { .. }
        ));
        assert!(matches!(
            classify_failure(&req, "x509: certificate signed by unknown authority"),
            ProvisioningError::Credentials { .. }
        ));
        assert!(matches!(
            classify_failure(&req, "OCI runtime create failed"),
            ProvisioningError::ContainerStart { .. }
        ));
    }

    #[test]
    fn truncate_limits_output() {
        let long = "a".repeat(3000);
        let truncated = truncate(&long, 1000);
        assert!(truncated.len() > 1000);
        assert!(truncated.ends_with("… (truncated)"));
    }

    #[test]
    fn settings_reject_unknown_fields() {
        let ty = AttachConnectorType::new(
            ContainerRuntime::Stub(StubRuntime::default()),
            Arc::new(NoCredentials),
        );
        assert!(ty.instantiate(&serde_json::json!({ "user": "root" })).is_ok());
        assert!(matches!(
            ty.instantiate(&serde_json::json!({ "javaExe": "/bin/java" })),
            Err(ConfigurationError::InvalidSettings { .. })
        ));
    }

    #[tokio::test]
    async fn stub_runtime_round_trip() {
        let stub = StubRuntime::default();
        let ty = AttachConnectorType::new(ContainerRuntime::Stub(stub.clone()), Arc::new(NoCredentials));
        let connector = ty.instantiate(&Value::Null).unwrap();

        let node = connector
            .provision(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(stub.is_running(&node.container_id));

        let output = connector
            .launcher(&node)
            .launch(&LaunchCommand::new(["echo", "hi"]))
            .await
            .unwrap();
        assert_eq!(output.stdout, "echo hi\n");

        connector.teardown(&node).await.unwrap();
        assert!(!stub.is_running(&node.container_id));
        // Releasing twice is harmless.
        connector.teardown(&node).await.unwrap();
    }

    #[tokio::test]
    async fn stub_reclaims_by_run_label() {
        let stub = StubRuntime::default();
        let ty = AttachConnectorType::new(ContainerRuntime::Stub(stub.clone()), Arc::new(NoCredentials));
        let connector = ty.instantiate(&Value::Null).unwrap();
        connector
            .provision(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(connector.reclaim(&request()).await.unwrap(), 1);
        assert!(stub.containers().is_empty());
    }

    #[test]
    #[serial]
    fn runtime_detection_reads_env() {
        env::set_var(RUNTIME_ENV, "stub");
        assert!(matches!(ContainerRuntime::from_env(), ContainerRuntime::Stub(_)));

        env::set_var(RUNTIME_ENV, "podman");
        assert!(matches!(
            ContainerRuntime::from_env(),
            ContainerRuntime::Binary(ref b) if b == "podman"
        ));

        env::remove_var(RUNTIME_ENV);
        assert!(matches!(
            ContainerRuntime::from_env(),
            ContainerRuntime::Binary(ref b) if b == "docker"
        ));
    }
}
