// ABOUTME: Remote host records as seen by the session manager.
// ABOUTME: Credentials lookup, connectivity status, and the directory trait.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::error::Result;
use crate::types::HostId;

/// Connectivity status of a remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

/// How to authenticate against a host.
#[derive(Debug)]
pub enum HostAuth {
    Password(SecretString),
    Key {
        path: PathBuf,
        passphrase: Option<SecretString>,
    },
    /// SSH agent, then the default key files in `~/.ssh`.
    Agent,
}

/// Everything needed to open a session to one host.
///
/// Fetched explicitly per connection so secrets never sit in listings.
#[derive(Debug)]
pub struct HostCredentials {
    pub id: HostId,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: HostAuth,
    pub trust_first_connection: bool,
}

/// Non-sensitive view of a host.
#[derive(Debug, Clone, Serialize)]
pub struct HostSummary {
    pub id: HostId,
    pub address: String,
    pub status: HostStatus,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Lookup of host records owned outside the session manager.
#[async_trait]
pub trait HostDirectory: Send + Sync {
    /// Fetch credentials for a host, or [`Error::UnknownHost`](super::Error::UnknownHost).
    async fn credentials(&self, id: &HostId) -> Result<HostCredentials>;

    /// List all hosts without credentials.
    async fn hosts(&self) -> Vec<HostSummary>;

    /// Record the result of a connectivity check.
    async fn record_status(&self, id: &HostId, status: HostStatus, checked_at: DateTime<Utc>);
}
