use std::fs;
use std::path::Path;

use jsonschema::{Draft, JSONSchema};
use node_step::DockerNodeStep;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

pub mod settings;
pub use settings::ControllerSettings;

const STEP_SCHEMA: &str = include_str!("../schemas/docker-node-step.v1.json");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    ConfigFileNotFound { path: String },

    #[error("Schema compilation failed: {message}")]
    SchemaCompilationFailed { message: String },

    #[error("Config validation failed")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Parsing {format} failed: {message}")]
    ParsingFailed {
        format: DocumentFormat,
        message: String,
    },

    #[error("Invalid step definition: {message}")]
    InvalidStep { message: String },

    #[error("Invalid value for {name}: {message}")]
    InvalidSetting { name: String, message: String },

    #[error("IO error: {message}")]
    IoError { message: String },
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub json_pointer: String,
    pub message: String,
    pub schema_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// `.json` files are JSON; everything else is read as YAML, which also accepts JSON.
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DocumentFormat::Json,
            _ => DocumentFormat::Yaml,
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentFormat::Json => f.write_str("JSON"),
            DocumentFormat::Yaml => f.write_str("YAML"),
        }
    }
}

/// Reads, validates and deserializes a step definition file.
#[instrument]
pub fn load_step(path: &Path) -> Result<DockerNodeStep, ConfigError> {
    debug!("Loading step definition from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::ConfigFileNotFound {
            path: path.to_string_lossy().to_string(),
        });
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        message: format!("Failed to read config file: {}", e),
    })?;

    parse_step(&content, DocumentFormat::for_path(path))
}

#[instrument(skip(content))]
pub fn parse_step(content: &str, format: DocumentFormat) -> Result<DockerNodeStep, ConfigError> {
    let value = parse_document(content, format)?;
    validate_value(&value)?;
    step_from_value(value)
}

pub fn parse_document(content: &str, format: DocumentFormat) -> Result<Value, ConfigError> {
    let parsed = match format {
        DocumentFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        DocumentFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| ConfigError::ParsingFailed { format, message })
}

/// Checks a document against the bundled step schema, collecting every violation.
pub fn validate_value(value: &Value) -> Result<(), ConfigError> {
    let schema = compiled_schema()?;

    if let Err(errors) = schema.validate(value) {
        let validation_errors: Vec<ValidationError> = errors
            .map(|error| ValidationError {
                json_pointer: error.instance_path.to_string(),
                message: error.to_string(),
                schema_path: error.schema_path.to_string(),
            })
            .collect();

        return Err(ConfigError::ValidationFailed {
            errors: validation_errors,
        });
    }

    Ok(())
}

fn step_from_value(value: Value) -> Result<DockerNodeStep, ConfigError> {
    serde_json::from_value(value).map_err(|e| ConfigError::InvalidStep {
        message: e.to_string(),
    })
}

fn compiled_schema() -> Result<JSONSchema, ConfigError> {
    let schema_value: Value =
        serde_json::from_str(STEP_SCHEMA).map_err(|e| ConfigError::SchemaCompilationFailed {
            message: e.to_string(),
        })?;

    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema_value)
        .map_err(|e| ConfigError::SchemaCompilationFailed {
            message: e.to_string(),
        })
}
