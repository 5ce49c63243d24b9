// ABOUTME: Config scaffolding for new setups.
// ABOUTME: Creates a deckhand.yml template with one host and one project.

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::UnitName;

use super::CONFIG_FILENAME;
use super::host::HostAddress;

pub fn init_config(
    dir: &Path,
    project: Option<&str>,
    host: Option<&str>,
    force: bool,
) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let project = UnitName::new(project.unwrap_or("my-app"))
        .map_err(|e| Error::InvalidConfig(e.to_string()))?;
    let address = host.unwrap_or("deploy@server.example.com");
    HostAddress::parse(address).map_err(Error::InvalidConfig)?;

    std::fs::write(&config_path, template_yaml(&project, address))?;
    Ok(())
}

fn template_yaml(project: &UnitName, address: &str) -> String {
    format!(
        r#"hosts:
  server:
    address: {address}
    # key: ~/.ssh/id_ed25519
    # password: {{ env: SERVER_PASSWORD }}
    # SSH host key verification; set to false and pre-populate ~/.ssh/known_hosts
    # to refuse unknown hosts
    trust_first_connection: true
projects:
  {project}:
    host: server
    repository: https://github.com/your-org/{project}.git
    branch: main
    deploy_path: /srv/{project}
    install: npm ci
    build: npm run build
    start: npm start
    process: nohup
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn template_is_a_valid_config() {
        let yaml = template_yaml(&UnitName::new("shop").unwrap(), "root@10.0.0.1:2222");
        let config = Config::from_yaml(&yaml).unwrap();
        assert!(config.projects.contains_key(&UnitName::new("shop").unwrap()));
        assert_eq!(config.hosts["server"].address.port, 2222);
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), None, None, false).unwrap();
        let err = init_config(dir.path(), None, None, false).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        init_config(dir.path(), Some("other"), None, true).unwrap();
    }

    #[test]
    fn rejects_invalid_project_name() {
        let dir = tempfile::tempdir().unwrap();
        assert!(init_config(dir.path(), Some("Bad Name"), None, false).is_err());
    }
}
