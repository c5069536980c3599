use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProvisioningError;

pub const CREDENTIALS_DIR_ENV: &str = "DOCKERNODE_CREDENTIALS_DIR";
const DEFAULT_CREDENTIALS_DIR: &str = ".dockernode/credentials";

/// TLS material for talking to a remote container runtime.
///
/// Only paths are kept, so the value can sit in a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerServerCredentials {
    pub ca_cert: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl DockerServerCredentials {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            ca_cert: dir.join("ca.pem"),
            client_cert: dir.join("cert.pem"),
            client_key: dir.join("key.pem"),
        }
    }
}

/// Lookup of stored runtime credentials by id.
pub trait CredentialsProvider: Send + Sync {
    fn lookup(&self, credentials_id: &str) -> Result<DockerServerCredentials, ProvisioningError>;
}

/// Rejects every lookup; for runtimes that need no authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialsProvider for NoCredentials {
    fn lookup(&self, credentials_id: &str) -> Result<DockerServerCredentials, ProvisioningError> {
        Err(ProvisioningError::Credentials {
            id: credentials_id.to_string(),
            message: "no credentials provider is configured".to_string(),
        })
    }
}

/// Credentials stored as `<root>/<id>/{ca,cert,key}.pem`.
#[derive(Debug, Clone)]
pub struct DirectoryCredentials {
    root: PathBuf,
}

impl DirectoryCredentials {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_env() -> Self {
        match env::var(CREDENTIALS_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => Self::new(dir),
            _ => Self::new(DEFAULT_CREDENTIALS_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CredentialsProvider for DirectoryCredentials {
    fn lookup(&self, credentials_id: &str) -> Result<DockerServerCredentials, ProvisioningError> {
        validate_id(credentials_id).map_err(|message| ProvisioningError::Credentials {
            id: credentials_id.to_string(),
            message,
        })?;

        let dir = self.root.join(credentials_id);
        debug!(dir = %dir.display(), "resolving runtime credentials");
        let credentials = DockerServerCredentials::in_dir(&dir);
        for path in [
            &credentials.ca_cert,
            &credentials.client_cert,
            &credentials.client_key,
        ] {
            if !path.is_file() {
                return Err(ProvisioningError::Credentials {
                    id: credentials_id.to_string(),
                    message: format!("{} does not exist", path.display()),
                });
            }
        }
        Ok(credentials)
    }
}

/// Ids name a directory, so only `[A-Za-z0-9_-]` is accepted.
fn validate_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("credentials id cannot be empty".to_string());
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(format!(
            "invalid credentials id '{id}': only alphanumeric characters, hyphens, and underscores are allowed"
        ));
    }
    Ok(())
}
