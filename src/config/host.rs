// ABOUTME: Remote host configuration and SSH address parsing.
// ABOUTME: Parses "host", "user@host", "host:port", "user@host:port" and resolves credentials.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use super::env_value::EnvValue;
use crate::error::{Error, Result};
use crate::ssh::{HostAuth, HostStatus};
use crate::store::HostRecord;
use crate::types::HostId;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_SSH_USER: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
}

impl HostAddress {
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("host address cannot be empty".to_string());
        }

        // [user@]host[:port]
        let (user_part, rest) = match s.find('@') {
            Some(at_pos) => (Some(&s[..at_pos]), &s[at_pos + 1..]),
            None => (None, s),
        };

        let (host, port) = match rest.rfind(':') {
            Some(colon_pos) => {
                let port_str = &rest[colon_pos + 1..];
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port: {}", port_str))?;
                (&rest[..colon_pos], port)
            }
            None => (rest, DEFAULT_SSH_PORT),
        };

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }
        if user_part.is_some_and(str::is_empty) {
            return Err("user cannot be empty".to_string());
        }

        Ok(HostAddress {
            host: host.to_string(),
            port,
            user: user_part.map(str::to_string),
        })
    }
}

impl<'de> Deserialize<'de> for HostAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        HostAddress::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    pub address: HostAddress,
    #[serde(default)]
    pub password: Option<EnvValue>,
    #[serde(default)]
    pub key: Option<PathBuf>,
    #[serde(default)]
    pub passphrase: Option<EnvValue>,
    #[serde(default = "default_trust_first_connection")]
    pub trust_first_connection: bool,
}

fn default_trust_first_connection() -> bool {
    true
}

impl HostConfig {
    /// Password wins over a key; with neither, the agent and default keys are tried.
    pub fn auth(&self) -> Result<HostAuth> {
        if let Some(password) = &self.password {
            return Ok(HostAuth::Password(password.resolve_secret()?));
        }
        if let Some(key) = &self.key {
            let passphrase = self
                .passphrase
                .as_ref()
                .map(EnvValue::resolve_secret)
                .transpose()?;
            return Ok(HostAuth::Key {
                path: expand_home(key),
                passphrase,
            });
        }
        if self.passphrase.is_some() {
            return Err(Error::InvalidConfig(
                "passphrase given without a key".to_string(),
            ));
        }
        Ok(HostAuth::Agent)
    }

    pub fn resolve(&self, id: &str) -> Result<HostRecord> {
        Ok(HostRecord {
            id: HostId::new(id),
            host: self.address.host.clone(),
            port: self.address.port,
            user: self
                .address
                .user
                .clone()
                .unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
            auth: self.auth()?,
            trust_first_connection: self.trust_first_connection,
            status: HostStatus::Unknown,
            last_checked: None,
        })
    }
}

/// Replace a leading `~` with `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var("HOME") {
            Ok(home) => PathBuf::from(home).join(rest),
            Err(_) => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
