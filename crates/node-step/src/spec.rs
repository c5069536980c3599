use serde::{Deserialize, Serialize};

use crate::connector::{default_connector, ConnectorRef, ConnectorRegistry};
use crate::context::BindContext;
use crate::error::ConfigurationError;
use crate::execution::NodeStepExecution;

/// Declarative description of the node a step provisions.
///
/// Blank optional fields are stored as unset, and a connector equal to the
/// default is stored as unset, so equal intent always serializes identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawDockerNodeStep")]
pub struct DockerNodeStep {
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    docker_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credentials_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_fs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connector: Option<ConnectorRef>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawDockerNodeStep {
    image: String,
    #[serde(default)]
    docker_host: Option<String>,
    #[serde(default)]
    credentials_id: Option<String>,
    #[serde(default)]
    remote_fs: Option<String>,
    #[serde(default)]
    connector: Option<ConnectorRef>,
}

impl TryFrom<RawDockerNodeStep> for DockerNodeStep {
    type Error = ConfigurationError;

    fn try_from(raw: RawDockerNodeStep) -> Result<Self, Self::Error> {
        let mut step = DockerNodeStep::new(raw.image)?;
        step.set_docker_host(raw.docker_host.as_deref());
        step.set_credentials_id(raw.credentials_id.as_deref());
        step.set_remote_fs(raw.remote_fs.as_deref());
        step.set_connector(raw.connector);
        Ok(step)
    }
}

impl DockerNodeStep {
    pub fn new(image: impl Into<String>) -> Result<Self, ConfigurationError> {
        let image = image.into();
        let image = image.trim();
        if image.is_empty() {
            return Err(ConfigurationError::BlankImage);
        }
        Ok(Self {
            image: image.to_string(),
            docker_host: None,
            credentials_id: None,
            remote_fs: None,
            connector: None,
        })
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn docker_host(&self) -> Option<&str> {
        self.docker_host.as_deref()
    }

    pub fn set_docker_host(&mut self, docker_host: Option<&str>) {
        self.docker_host = fix_empty(docker_host);
    }

    pub fn credentials_id(&self) -> Option<&str> {
        self.credentials_id.as_deref()
    }

    pub fn set_credentials_id(&mut self, credentials_id: Option<&str>) {
        self.credentials_id = fix_empty(credentials_id);
    }

    pub fn remote_fs(&self) -> Option<&str> {
        self.remote_fs.as_deref()
    }

    pub fn set_remote_fs(&mut self, remote_fs: Option<&str>) {
        self.remote_fs = fix_empty(remote_fs);
    }

    /// The explicitly configured connector, if any.
    ///
    /// Admissibility is checked here rather than in the setter because only the
    /// complete registry can answer it.
    pub fn connector(
        &self,
        registry: &ConnectorRegistry,
    ) -> Result<Option<&ConnectorRef>, ConfigurationError> {
        match &self.connector {
            None => Ok(None),
            Some(connector) => {
                registry.assert_admissible(connector.kind())?;
                Ok(Some(connector))
            }
        }
    }

    /// The stored connector without any admissibility check.
    pub fn raw_connector(&self) -> Option<&ConnectorRef> {
        self.connector.as_ref()
    }

    pub fn set_connector(&mut self, connector: Option<ConnectorRef>) {
        self.connector = normalize_connector(connector);
    }

    /// Binds the step to its calling context, producing a controller ready to run.
    pub fn start(
        &self,
        context: BindContext,
        registry: &ConnectorRegistry,
    ) -> Result<NodeStepExecution, ConfigurationError> {
        NodeStepExecution::new(self.clone(), context, registry)
    }
}

/// Canonical stored form of a connector choice: the default and "none" both become `None`.
pub fn normalize_connector(connector: Option<ConnectorRef>) -> Option<ConnectorRef> {
    connector.filter(|c| c != default_connector())
}

fn fix_empty(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_image_is_rejected() {
        for image in ["", "   ", "\t\n"] {
            assert_eq!(
                DockerNodeStep::new(image).unwrap_err(),
                ConfigurationError::BlankImage
            );
        }
    }

    #[test]
    fn blank_optionals_are_unset() {
        let mut step = DockerNodeStep::new("ubuntu:20.04").unwrap();
        step.set_docker_host(Some(""));
        step.set_credentials_id(Some("  "));
        step.set_remote_fs(None);
        assert_eq!(step.docker_host(), None);
        assert_eq!(step.credentials_id(), None);
        assert_eq!(step.remote_fs(), None);

        step.set_remote_fs(Some("/work"));
        assert_eq!(step.remote_fs(), Some("/work"));
    }

    #[test]
    fn default_connector_normalizes_to_none() {
        assert_eq!(normalize_connector(Some(default_connector().clone())), None);
        assert_eq!(
            normalize_connector(Some(ConnectorRef::new("attach", json!({ "user": null })))),
            normalize_connector(None)
        );

        let custom = ConnectorRef::new("attach", json!({ "user": "jenkins" }));
        assert_eq!(normalize_connector(Some(custom.clone())), Some(custom));
    }

    #[test]
    fn explicit_default_serializes_like_unset() {
        let mut explicit = DockerNodeStep::new("ubuntu:20.04").unwrap();
        explicit.set_connector(Some(ConnectorRef::of_kind("attach")));
        let implicit = DockerNodeStep::new("ubuntu:20.04").unwrap();

        assert_eq!(explicit, implicit);
        assert_eq!(
            serde_json::to_string(&explicit).unwrap(),
            serde_json::to_string(&implicit).unwrap()
        );
    }

    #[test]
    fn deserialization_applies_normalization() {
        let step: DockerNodeStep = serde_json::from_value(json!({
            "image": "maven:3-jdk-11",
            "dockerHost": "",
            "remoteFs": "/home/builder",
            "connector": { "kind": "attach" }
        }))
        .unwrap();

        assert_eq!(step.docker_host(), None);
        assert_eq!(step.remote_fs(), Some("/home/builder"));
        assert_eq!(step.raw_connector(), None);

        let blank = serde_json::from_value::<DockerNodeStep>(json!({ "image": " " }));
        assert!(blank.is_err());
    }
}
