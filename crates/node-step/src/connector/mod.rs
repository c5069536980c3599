//! Connector contract: how a node step turns a specification into a live container.

pub mod admissibility;
pub mod attach;
mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::credentials::DockerServerCredentials;
use crate::error::{ConfigurationError, ProvisioningError, TeardownError};
use crate::spec::DockerNodeStep;

pub use registry::{default_connector, ConnectorDescriptor, ConnectorRegistry, DEFAULT_CONNECTOR};

/// Label put on every container a run creates, so leftovers can be found by run id.
pub const RUN_LABEL: &str = "dockernode.run";

/// Serializable reference to a connector: its registered kind plus its settings.
///
/// Two references are equal when kind and canonical settings are equal, so the
/// stored form of "use the default" never depends on how it was spelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawConnectorRef")]
pub struct ConnectorRef {
    kind: String,
    #[serde(skip_serializing_if = "settings_are_empty")]
    settings: Value,
}

#[derive(Deserialize)]
struct RawConnectorRef {
    kind: String,
    #[serde(default)]
    settings: Value,
}

impl From<RawConnectorRef> for ConnectorRef {
    fn from(raw: RawConnectorRef) -> Self {
        ConnectorRef::new(raw.kind, raw.settings)
    }
}

impl ConnectorRef {
    pub fn new(kind: impl Into<String>, settings: Value) -> Self {
        Self {
            kind: kind.into().trim().to_string(),
            settings: canonical_settings(settings),
        }
    }

    pub fn of_kind(kind: impl Into<String>) -> Self {
        Self::new(kind, Value::Null)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn settings(&self) -> &Value {
        &self.settings
    }
}

fn settings_are_empty(settings: &Value) -> bool {
    matches!(settings, Value::Object(map) if map.is_empty())
}

/// Drops null-valued object keys recursively; a missing or null document becomes `{}`.
fn canonical_settings(settings: Value) -> Value {
    fn strip(value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k, strip(v)))
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.into_iter().map(strip).collect()),
            other => other,
        }
    }

    match settings {
        Value::Null => Value::Object(Map::new()),
        other => strip(other),
    }
}

/// Everything a connector needs to create one node for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub run_id: String,
    pub image: String,
    pub docker_host: Option<String>,
    pub credentials_id: Option<String>,
    pub remote_fs: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl ProvisionRequest {
    pub fn for_step(run_id: &str, step: &DockerNodeStep) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(RUN_LABEL.to_string(), run_id.to_string());
        Self {
            run_id: run_id.to_string(),
            image: step.image().to_string(),
            docker_host: step.docker_host().map(str::to_string),
            credentials_id: step.credentials_id().map(str::to_string),
            remote_fs: step.remote_fs().map(str::to_string),
            labels,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.docker_host.as_deref().unwrap_or("default")
    }
}

/// Persistable description of a provisioned node.
///
/// Holds only references (ids, paths), never live resources, so it can be
/// written into a checkpoint and used to release the container after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHandle {
    pub node_name: String,
    pub container_id: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<DockerServerCredentials>,
    pub remote_fs: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Provisioning failed; `partial` names anything already created that must be released.
#[derive(Debug)]
pub struct ProvisionFailure {
    pub error: ProvisioningError,
    pub partial: Option<NodeHandle>,
}

impl ProvisionFailure {
    pub fn clean(error: ProvisioningError) -> Self {
        Self {
            error,
            partial: None,
        }
    }

    pub fn with_partial(error: ProvisioningError, partial: NodeHandle) -> Self {
        Self {
            error,
            partial: Some(partial),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchCommand {
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

impl LaunchCommand {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl LaunchOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs commands on a provisioned node.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, command: &LaunchCommand) -> anyhow::Result<LaunchOutput>;
}

/// A live provisioning strategy.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    fn kind(&self) -> &str;

    /// Creates the container. Implementations should stop early when `cancel` fires.
    async fn provision(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<NodeHandle, ProvisionFailure>;

    /// A launcher for the node; derived from the handle alone so it survives a restart.
    fn launcher(&self, node: &NodeHandle) -> Arc<dyn Launcher>;

    /// Releases the container. Releasing a container that no longer exists succeeds.
    async fn teardown(&self, node: &NodeHandle) -> Result<(), TeardownError>;

    /// Best-effort release of every container labelled with `request.run_id`.
    async fn reclaim(&self, _request: &ProvisionRequest) -> Result<usize, TeardownError> {
        Ok(0)
    }
}

/// Declared type of a connector field, used by the admissibility walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Boolean,
    Duration,
    List(Box<FieldType>),
    Map(Box<FieldType>),
    /// A nested connector of the given kind.
    Connector(String),
    LiveConnection,
    ProcessHandle,
    /// Anything else; the name is only used in diagnostics.
    Opaque(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    /// Rebuilt after resumption instead of being persisted.
    pub transient: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            transient: false,
        }
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}

/// Structural description of a connector type's instance state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorShape {
    /// Kind whose fields this type inherits.
    pub extends: Option<String>,
    /// Whether instances can be rebuilt from a [`ConnectorRef`].
    pub rehydratable: bool,
    pub fields: Vec<FieldSpec>,
}

impl ConnectorShape {
    pub fn rehydratable() -> Self {
        Self {
            extends: None,
            rehydratable: true,
            fields: Vec::new(),
        }
    }

    pub fn extending(mut self, parent: impl Into<String>) -> Self {
        self.extends = Some(parent.into());
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }
}

/// A registered connector implementation (the "class" of a connector).
pub trait ConnectorType: Send + Sync {
    fn kind(&self) -> &str;

    fn display_name(&self) -> &str;

    fn shape(&self) -> anyhow::Result<ConnectorShape>;

    fn instantiate(&self, settings: &Value) -> Result<Arc<dyn Connector>, ConfigurationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_and_empty_settings_compare_equal() {
        let a = ConnectorRef::new("attach", Value::Null);
        let b = ConnectorRef::new("attach", json!({}));
        let c = ConnectorRef::new(" attach ", json!({ "user": null }));
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn empty_settings_are_not_serialized() {
        let reference = ConnectorRef::of_kind("attach");
        assert_eq!(
            serde_json::to_value(&reference).unwrap(),
            json!({ "kind": "attach" })
        );

        let parsed: ConnectorRef =
            serde_json::from_value(json!({ "kind": "attach", "settings": { "user": null } }))
                .unwrap();
        assert_eq!(parsed, reference);
    }

    #[test]
    fn request_carries_run_label() {
        let mut step = DockerNodeStep::new("ubuntu:20.04").unwrap();
        step.set_docker_host(Some("tcp://docker:2376"));
        let request = ProvisionRequest::for_step("run-1", &step);
        assert_eq!(request.labels.get(RUN_LABEL).map(String::as_str), Some("run-1"));
        assert_eq!(request.endpoint(), "tcp://docker:2376");
    }
}
