// ABOUTME: Application-wide error types for deckhand.
// ABOUTME: Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("unknown project: {0}")]
    UnknownProject(String),

    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("deployment {id} ended {status}: {message}")]
    DeploymentFailed {
        id: String,
        status: String,
        message: String,
    },

    #[error(transparent)]
    Ssh(#[from] crate::ssh::Error),

    #[error(transparent)]
    Deploy(#[from] crate::deploy::DeployError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
