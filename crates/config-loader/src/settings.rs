//! Controller settings read from `DOCKERNODE_*` environment variables.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use node_step::connector::attach::{ContainerRuntime, RUNTIME_ENV};
use node_step::credentials::{DirectoryCredentials, CREDENTIALS_DIR_ENV};
use node_step::{ConnectorRegistry, FileCheckpointStore};
use tracing::debug;

use crate::ConfigError;

pub const STATE_DIR_ENV: &str = "DOCKERNODE_STATE_DIR";
pub const TEARDOWN_TIMEOUT_ENV: &str = "DOCKERNODE_TEARDOWN_TIMEOUT_SECS";

pub const DEFAULT_STATE_DIR: &str = ".dockernode/state";
pub const DEFAULT_CREDENTIALS_DIR: &str = ".dockernode/credentials";
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub state_dir: PathBuf,
    pub container_runtime: String,
    pub credentials_dir: PathBuf,
    pub teardown_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            container_runtime: "docker".to_string(),
            credentials_dir: PathBuf::from(DEFAULT_CREDENTIALS_DIR),
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
        }
    }
}

impl ControllerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds settings from any variable source; blank values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut settings = Self::default();

        if let Some(dir) = get(STATE_DIR_ENV) {
            settings.state_dir = PathBuf::from(dir);
        }
        if let Some(runtime) = get(RUNTIME_ENV) {
            settings.container_runtime = runtime.trim().to_string();
        }
        if let Some(dir) = get(CREDENTIALS_DIR_ENV) {
            settings.credentials_dir = PathBuf::from(dir);
        }
        if let Some(raw) = get(TEARDOWN_TIMEOUT_ENV) {
            settings.teardown_timeout = parse_timeout(TEARDOWN_TIMEOUT_ENV, &raw)?;
        }

        debug!(?settings, "loaded controller settings");
        Ok(settings)
    }

    pub fn runtime(&self) -> ContainerRuntime {
        ContainerRuntime::from_setting(&self.container_runtime)
    }

    pub fn registry(&self) -> ConnectorRegistry {
        ConnectorRegistry::with_attach(
            self.runtime(),
            Arc::new(DirectoryCredentials::new(self.credentials_dir.clone())),
        )
    }

    pub fn checkpoint_store(&self) -> FileCheckpointStore {
        FileCheckpointStore::new(self.state_dir.clone())
    }
}

/// Plain integers are seconds; anything else goes through `humantime` (`90s`, `2m`).
pub fn parse_timeout(name: &str, raw: &str) -> Result<Duration, ConfigError> {
    let raw = raw.trim();
    let timeout = match raw.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(raw).map_err(|e| ConfigError::InvalidSetting {
            name: name.to_string(),
            message: e.to_string(),
        })?,
    };
    if timeout.is_zero() {
        return Err(ConfigError::InvalidSetting {
            name: name.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(timeout)
}
