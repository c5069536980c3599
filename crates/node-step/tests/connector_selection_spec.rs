mod common;

use std::sync::Arc;

use anyhow::Result;
use common::bind;
use node_step::connector::attach::{ContainerRuntime, StubRuntime};
use node_step::credentials::NoCredentials;
use node_step::descriptor::StepDescriptor;
use node_step::{
    ConfigurationError, Connector, ConnectorRef, ConnectorRegistry, ConnectorShape, ConnectorType,
    DockerNodeStep, FieldSpec, FieldType,
};
use serde_json::{json, Value};

/// A connector that keeps an open socket in its state.
struct SocketConnectorType {
    transient_socket: bool,
}

impl ConnectorType for SocketConnectorType {
    fn kind(&self) -> &str {
        if self.transient_socket {
            "socket-transient"
        } else {
            "socket"
        }
    }

    fn display_name(&self) -> &str {
        "Socket-holding connector"
    }

    fn shape(&self) -> anyhow::Result<ConnectorShape> {
        let socket = FieldSpec::new("channel", FieldType::LiveConnection);
        let socket = if self.transient_socket {
            socket.transient()
        } else {
            socket
        };
        Ok(ConnectorShape::rehydratable()
            .extending("attach")
            .field(FieldSpec::new("endpoint", FieldType::Text))
            .field(socket))
    }

    fn instantiate(&self, _settings: &Value) -> Result<Arc<dyn Connector>, ConfigurationError> {
        Err(ConfigurationError::InvalidSettings {
            kind: self.kind().to_string(),
            message: "not instantiable in tests".into(),
        })
    }
}

fn registry() -> ConnectorRegistry {
    let mut registry = ConnectorRegistry::with_attach(
        ContainerRuntime::Stub(StubRuntime::default()),
        Arc::new(NoCredentials),
    );
    registry.register(Arc::new(SocketConnectorType {
        transient_socket: false,
    }));
    registry.register(Arc::new(SocketConnectorType {
        transient_socket: true,
    }));
    registry
}

#[test]
fn live_connection_connector_is_silently_left_out() {
    let registry = registry();
    let kinds: Vec<String> = StepDescriptor
        .acceptable_connector_descriptors(&registry)
        .into_iter()
        .map(|descriptor| descriptor.kind)
        .collect();

    assert_eq!(kinds, vec!["attach", "socket-transient"]);
    assert!(!registry.check("socket").is_admissible());
    assert!(registry
        .check("socket")
        .reason()
        .unwrap()
        .contains("live network connection"));
}

#[test]
fn selecting_an_inadmissible_connector_fails_at_bind() {
    let registry = registry();
    let mut step = DockerNodeStep::new("ubuntu:20.04").unwrap();
    step.set_connector(Some(ConnectorRef::of_kind("socket")));

    assert!(matches!(
        step.connector(&registry),
        Err(ConfigurationError::InadmissibleConnector { .. })
    ));
    assert!(matches!(
        step.start(bind(), &registry).unwrap_err(),
        ConfigurationError::InadmissibleConnector { .. }
    ));
}

#[test]
fn unknown_connector_in_a_stored_definition_fails_at_bind() {
    let step: DockerNodeStep = serde_json::from_value(json!({
        "image": "ubuntu:20.04",
        "connector": { "kind": "ssh", "settings": { "port": 22 } }
    }))
    .unwrap();

    assert_eq!(
        step.start(bind(), &registry()).unwrap_err(),
        ConfigurationError::UnknownConnector { kind: "ssh".into() }
    );
}

#[test]
fn blank_image_never_reaches_a_connector() -> Result<()> {
    assert_eq!(
        DockerNodeStep::new("  ").unwrap_err(),
        ConfigurationError::BlankImage
    );
    let parsed = serde_json::from_value::<DockerNodeStep>(json!({ "image": "" }));
    assert!(parsed.is_err());
    Ok(())
}

#[test]
fn attach_settings_are_validated_on_bind() {
    let mut step = DockerNodeStep::new("ubuntu:20.04").unwrap();
    step.set_connector(Some(ConnectorRef::new(
        "attach",
        json!({ "user": "jenkins", "privileged": true }),
    )));

    assert!(matches!(
        step.start(bind(), &registry()).unwrap_err(),
        ConfigurationError::InvalidSettings { .. }
    ));
}
