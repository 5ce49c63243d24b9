// ABOUTME: Configuration types and parsing for deckhand.yml.
// ABOUTME: Handles YAML parsing, discovery, validation, and env var interpolation.

mod env_value;
mod host;
mod init;
mod project;
mod settings;

pub use env_value::{EnvValue, resolve_env_map};
pub use host::{DEFAULT_SSH_PORT, DEFAULT_SSH_USER, HostAddress, HostConfig, expand_home};
pub use init::init_config;
pub use project::ProjectConfig;
pub use settings::Settings;

use crate::deploy::Project;
use crate::error::{Error, Result};
use crate::store::HostRecord;
use crate::types::{UnitName, UserId};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const CONFIG_FILENAME: &str = "deckhand.yml";
pub const CONFIG_FILENAME_ALT: &str = "deckhand.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".deckhand/config.yml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,

    pub hosts: BTreeMap<String, HostConfig>,

    #[serde(default)]
    pub projects: BTreeMap<UnitName, ProjectConfig>,

    /// Recipients of in-app notifications.
    #[serde(default)]
    pub users: Vec<String>,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Every project must point at a configured host.
    fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one host is required".to_string(),
            ));
        }
        for (name, project) in &self.projects {
            if !self.hosts.contains_key(&project.host) {
                return Err(Error::InvalidConfig(format!(
                    "project {} references unknown host {}",
                    name, project.host
                )));
            }
            if project.deploy_path.trim().is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "project {} has an empty deploy_path",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Resolve hosts, including their secrets.
    pub fn host_records(&self) -> Result<Vec<HostRecord>> {
        self.hosts
            .iter()
            .map(|(id, host)| host.resolve(id))
            .collect()
    }

    /// Resolve projects, including env references.
    pub fn resolve_projects(&self) -> Result<Vec<Project>> {
        self.projects
            .iter()
            .map(|(name, project)| project.resolve(name))
            .collect()
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.users.iter().map(UserId::new).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
hosts:
  web1:
    address: deploy@web1.example.com
projects:
  api:
    host: web1
    repository: https://github.com/org/api.git
    deploy_path: /srv/api
"#;

    #[test]
    fn minimal_config_parses() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.hosts.len(), 1);
        let projects = config.resolve_projects().unwrap();
        assert_eq!(projects[0].name.as_str(), "api");
        assert_eq!(projects[0].branch, "main");
    }

    #[test]
    fn unknown_host_reference_is_rejected() {
        let yaml = MINIMAL.replace("host: web1", "host: web2");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("unknown host web2"));
    }

    #[test]
    fn project_names_must_be_valid_units() {
        let yaml = MINIMAL.replace("  api:", "  My_Api:");
        assert!(Config::from_yaml(&yaml).is_err());
    }
}
