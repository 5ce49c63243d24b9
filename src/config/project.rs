// ABOUTME: Deployable project configuration.
// ABOUTME: Resolves env references and turns a project entry into a pipeline Project.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::env_value::{EnvValue, resolve_env_map};
use crate::deploy::{OutputSync, ProcessManager, Project};
use crate::error::{Error, Result};
use crate::types::{HostId, ProjectId, UnitName};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub host: String,
    pub repository: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub deploy_path: String,
    #[serde(default)]
    pub subfolder: Option<String>,
    #[serde(default)]
    pub install: Option<String>,
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub stop: Option<String>,
    #[serde(default)]
    pub pre_deploy: Option<String>,
    #[serde(default)]
    pub post_deploy: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,
    #[serde(default)]
    pub output: Option<OutputSync>,
    #[serde(default)]
    pub process: ProcessManager,
    /// One-off future deploy time picked up by an external scheduler.
    #[serde(default)]
    pub scheduled_deploy_at: Option<DateTime<Utc>>,
}

fn default_branch() -> String {
    "main".to_string()
}

/// `.env` keys must be shell identifiers and values single-line.
fn check_env(name: &UnitName, env: &BTreeMap<String, String>) -> Result<()> {
    for (key, value) in env {
        let mut chars = key.chars();
        let valid_key = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_key {
            return Err(Error::InvalidConfig(format!(
                "project {name} has invalid env key {key:?}"
            )));
        }
        if value.contains(['\n', '\r']) {
            return Err(Error::InvalidConfig(format!(
                "project {name} env {key} contains a line break"
            )));
        }
    }
    Ok(())
}

impl ProjectConfig {
    pub fn resolve(&self, name: &UnitName) -> Result<Project> {
        let env = resolve_env_map(&self.env)?;
        check_env(name, &env)?;
        Ok(Project {
            id: ProjectId::new(name.as_str()),
            name: name.clone(),
            host: HostId::new(self.host.as_str()),
            repository: self.repository.clone(),
            branch: self.branch.clone(),
            deploy_path: self.deploy_path.clone(),
            subfolder: self.subfolder.clone(),
            install_command: self.install.clone(),
            build_command: self.build.clone(),
            start_command: self.start.clone(),
            stop_command: self.stop.clone(),
            pre_deploy_command: self.pre_deploy.clone(),
            post_deploy_command: self.post_deploy.clone(),
            env,
            output: self.output.clone(),
            process_manager: self.process,
            status: None,
            scheduled_deploy_at: self.scheduled_deploy_at,
            last_deployed_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
host: web1
repository: https://github.com/org/api.git
deploy_path: /srv/api
build: npm run build
env:
  NODE_ENV: production
  TOKEN: { env: DECKHAND_PROJECT_TOKEN, default: dev }
output: { path: /var/www/api, source: dist }
process: pm2
scheduled_deploy_at: 2026-11-02T03:00:00Z
"#;

    #[test]
    fn resolves_into_project() {
        let config: ProjectConfig = serde_yaml::from_str(YAML).unwrap();
        let name = UnitName::new("api").unwrap();
        temp_env::with_var_unset("DECKHAND_PROJECT_TOKEN", || {
            let project = config.resolve(&name).unwrap();
            assert_eq!(project.branch, "main");
            assert_eq!(project.host, HostId::new("web1"));
            assert_eq!(project.build(), Some("npm run build"));
            assert_eq!(project.install(), None);
            assert_eq!(project.env["TOKEN"], "dev");
            assert_eq!(project.process_manager, ProcessManager::Pm2);
            assert_eq!(
                project.scheduled_deploy_at.map(|at| at.to_rfc3339()),
                Some("2026-11-02T03:00:00+00:00".to_string())
            );
            assert_eq!(
                project.output.unwrap().source.as_deref(),
                Some("dist")
            );
        });
    }

    #[test]
    fn env_keys_must_be_identifiers() {
        let config: ProjectConfig = serde_yaml::from_str(
            "host: a\nrepository: r\ndeploy_path: /p\nenv:\n  \"BAD KEY\": x\n",
        )
        .unwrap();
        let err = config.resolve(&UnitName::new("api").unwrap()).unwrap_err();
        assert!(err.to_string().contains("invalid env key"));
    }

    #[test]
    fn env_values_must_be_single_line() {
        let config: ProjectConfig = serde_yaml::from_str(
            "host: a\nrepository: r\ndeploy_path: /p\nenv:\n  TOKEN: \"x\\nDECKHAND_ENV_EOF\\nid\"\n",
        )
        .unwrap();
        let err = config.resolve(&UnitName::new("api").unwrap()).unwrap_err();
        assert!(err.to_string().contains("line break"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_yaml::from_str::<ProjectConfig>(
            "host: a\nrepository: r\ndeploy_path: /p\nimage: nginx\n",
        );
        assert!(err.is_err());
    }
}
