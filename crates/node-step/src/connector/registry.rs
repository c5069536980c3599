use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::admissibility::{self, Admissibility};
use super::attach::{AttachConnectorType, ContainerRuntime, KIND as ATTACH_KIND};
use super::{Connector, ConnectorRef, ConnectorType};
use crate::credentials::{CredentialsProvider, DirectoryCredentials};
use crate::error::ConfigurationError;
use crate::spec::DockerNodeStep;

/// The connector used when a specification names none.
pub static DEFAULT_CONNECTOR: Lazy<ConnectorRef> = Lazy::new(|| ConnectorRef::of_kind(ATTACH_KIND));

pub fn default_connector() -> &'static ConnectorRef {
    &DEFAULT_CONNECTOR
}

/// Menu entry for a connector a caller may choose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorDescriptor {
    pub kind: String,
    pub display_name: String,
    pub default: bool,
}

/// Runtime catalogue of connector types, keyed by kind.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    types: BTreeMap<String, Arc<dyn ConnectorType>>,
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("kinds", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `attach` connector, configured from the environment.
    pub fn with_builtins() -> Self {
        Self::with_attach(
            ContainerRuntime::from_env(),
            Arc::new(DirectoryCredentials::from_env()),
        )
    }

    pub fn with_attach(
        runtime: ContainerRuntime,
        credentials: Arc<dyn CredentialsProvider>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AttachConnectorType::new(runtime, credentials)));
        registry
    }

    /// Adds or replaces a connector type; returns the one it replaced.
    pub fn register(&mut self, ty: Arc<dyn ConnectorType>) -> Option<Arc<dyn ConnectorType>> {
        let kind = ty.kind().to_string();
        debug!(%kind, "registering connector type");
        self.types.insert(kind, ty)
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn ConnectorType>> {
        self.types.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn check(&self, kind: &str) -> Admissibility {
        admissibility::check(self, kind)
    }

    pub fn assert_admissible(&self, kind: &str) -> Result<(), ConfigurationError> {
        if self.get(kind).is_none() {
            return Err(ConfigurationError::UnknownConnector {
                kind: kind.to_string(),
            });
        }
        match self.check(kind).reason() {
            None => Ok(()),
            Some(reason) => Err(ConfigurationError::InadmissibleConnector {
                kind: kind.to_string(),
                reason: reason.to_string(),
            }),
        }
    }

    /// Connectors a configuring caller may pick; inadmissible ones are left out silently.
    pub fn admissible_descriptors(&self) -> Vec<ConnectorDescriptor> {
        self.types
            .values()
            .filter(|ty| self.check(ty.kind()).is_admissible())
            .map(|ty| ConnectorDescriptor {
                kind: ty.kind().to_string(),
                display_name: ty.display_name().to_string(),
                default: ty.kind() == default_connector().kind(),
            })
            .collect()
    }

    /// The connector reference a step will use: its own, or the default.
    pub fn resolve_ref(&self, step: &DockerNodeStep) -> Result<ConnectorRef, ConfigurationError> {
        Ok(step
            .connector(self)?
            .cloned()
            .unwrap_or_else(|| default_connector().clone()))
    }

    pub fn resolve(&self, step: &DockerNodeStep) -> Result<Arc<dyn Connector>, ConfigurationError> {
        let reference = self.resolve_ref(step)?;
        self.instantiate(&reference)
    }

    /// Builds a live connector from a reference, re-checking admissibility first.
    pub fn instantiate(
        &self,
        reference: &ConnectorRef,
    ) -> Result<Arc<dyn Connector>, ConfigurationError> {
        self.assert_admissible(reference.kind())?;
        let ty = self
            .get(reference.kind())
            .ok_or_else(|| ConfigurationError::UnknownConnector {
                kind: reference.kind().to_string(),
            })?;
        ty.instantiate(reference.settings())
    }
}
