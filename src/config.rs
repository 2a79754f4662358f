/// Configuration serialization and deserialization.
use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use log::warn;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::ssh::Client;

pub const APP_NAME: &str = "cycl";
pub const USER_CONFIG_FILE: &str = "config.yaml";
pub const PROJECT_CONFIG_FILE: &str = "cycl.yaml";

pub const DEFAULT_USERNAME: &str = "cycl";
pub const DEFAULT_SERVER: &str = "server";
pub const DEFAULT_DIRECTORY: &str = "example";
pub const DEFAULT_COMPOSE_FILE: &str = "docker-compose-deploy.yml";
pub const DEFAULT_APP_HOST: &str = "example.com";
pub const DEFAULT_APP_PORT: u16 = 12345;
pub const DEFAULT_BRANCH: &str = "master";

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

// config like:
// servers:
//   prod:
//     host: 203.0.113.10
//     username: deploy
//     keypath: ~/.ssh/id_ed25519
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Server {
    pub host: String,
    #[serde(default = "default_username")]
    pub username: String,
    pub port: Option<u16>,
    pub keypath: Option<String>,
    pub password: Option<String>,
    pub use_password: Option<bool>,
}

impl Server {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: default_username(),
            port: None,
            keypath: None,
            password: None,
            use_password: None,
        }
    }

    /// Build an SSH client for this server, logging in as `root` when asked
    /// and as the configured deploy user otherwise.
    pub fn build_client(&self, as_root: bool) -> Result<Client> {
        let username = if as_root { "root" } else { self.username.as_str() };
        let mut client = Client::new(self.host.clone(), username.to_string());

        client.with_port(self.port.unwrap_or(22));

        if let Some(ref password) = self.password {
            client.with_password(password.clone());
        } else if let Some(ref keypath) = self.keypath {
            client.with_private_key(expand_home(keypath));
        } else if self.use_password.unwrap_or(false) {
            eprint!("Password for {}@{}: ", username, self.host);
            let password = rpassword::read_password().context("Failed to read password")?;
            client.with_password(password);
        } else if let Some(keypath) = default_private_key() {
            client.with_private_key(keypath);
        }

        Ok(client)
    }
}

/// Mapping of logical server names to connection details, in declared order.
pub type ServerInventory = IndexMap<String, Server>;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub servers: ServerInventory,
}

/// Deployment settings of the application in the current project.
#[derive(Debug, Clone, PartialEq)]
pub struct AppDeploymentSettings {
    pub server: String,
    pub directory: String,
    pub restart_services: Vec<String>,
    pub compose_file: String,
    pub app_host: String,
    pub app_port: u16,
    pub branch: String,
    pub repository: Option<String>,
}

impl Default for AppDeploymentSettings {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            directory: DEFAULT_DIRECTORY.to_string(),
            restart_services: Vec::new(),
            compose_file: DEFAULT_COMPOSE_FILE.to_string(),
            app_host: DEFAULT_APP_HOST.to_string(),
            app_port: DEFAULT_APP_PORT,
            branch: DEFAULT_BRANCH.to_string(),
            repository: None,
        }
    }
}

impl AppDeploymentSettings {
    /// Apply `overrides` on top of `self`: every field present in the
    /// overrides replaces the current value, absent fields keep it.
    pub fn merge(mut self, overrides: DeployOverrides) -> Self {
        if let Some(server) = overrides.server {
            self.server = server;
        }
        if let Some(directory) = overrides.directory {
            self.directory = directory;
        }
        if let Some(restart_services) = overrides.restart_services {
            self.restart_services = restart_services;
        }
        if let Some(compose_file) = overrides.compose_file {
            self.compose_file = compose_file;
        }
        if let Some(app_host) = overrides.app_host {
            self.app_host = app_host;
        }
        if let Some(app_port) = overrides.app_port {
            self.app_port = app_port;
        }
        if let Some(branch) = overrides.branch {
            self.branch = branch;
        }
        if overrides.repository.is_some() {
            self.repository = overrides.repository;
        }
        self
    }
}

/// Partial deployment settings as they appear in `cycl.yaml` or on the
/// command line.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DeployOverrides {
    pub server: Option<String>,
    pub directory: Option<String>,
    pub restart_services: Option<Vec<String>>,
    pub compose_file: Option<String>,
    pub app_host: Option<String>,
    pub app_port: Option<u16>,
    pub branch: Option<String>,
    pub repository: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub port: Option<u16>,
    #[serde(rename = "type")]
    pub kind: String,
    pub entrypoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilitySettings {
    #[serde(rename = "type")]
    pub kind: String,
}

// config like:
// deploy:
//   server: prod
//   directory: myapp
//   restart_services: [web]
//   branch: main
// utilities:
//   cache:
//     type: redis
//   db:
//     type: mongo
// workers:
//   web:
//     type: python-web-fastapi
//     port: 8000
//     entrypoint: app.main:app
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProjectFile {
    #[serde(default)]
    pub deploy: DeployOverrides,
    #[serde(default)]
    pub workers: IndexMap<String, WorkerSettings>,
    #[serde(default)]
    pub utilities: IndexMap<String, UtilitySettings>,
}

/// Project topology: application workers and the backing utilities they use.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProjectSettings {
    pub workers: IndexMap<String, WorkerSettings>,
    pub utilities: IndexMap<String, UtilitySettings>,
}

/// Locations given on the command line; `None` means the default location.
#[derive(Debug, Default, Clone)]
pub struct ConfigPaths {
    pub config_dir: Option<PathBuf>,
    pub project_dir: Option<PathBuf>,
    pub project_config: Option<PathBuf>,
}

/// Everything a command needs, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_dir: PathBuf,
    pub project_dir: PathBuf,
    pub project_config: PathBuf,
    pub servers: ServerInventory,
    pub app: AppDeploymentSettings,
    pub project: ProjectSettings,
}

impl Settings {
    pub fn load(paths: ConfigPaths) -> Result<Self> {
        let config_dir = match paths.config_dir {
            Some(dir) => dir,
            None => default_config_dir()?,
        };
        let project_dir = match paths.project_dir {
            Some(dir) => dir,
            None => std::env::current_dir().context("Failed to get current directory")?,
        };
        let project_config = paths
            .project_config
            .unwrap_or_else(|| project_dir.join(PROJECT_CONFIG_FILE));

        let servers = load_user_config(&config_dir)?.servers;

        let mut app = AppDeploymentSettings::default();
        let mut project = ProjectSettings::default();
        if project_config.exists() {
            let file: ProjectFile = read_yaml(&project_config)?;
            app = app.merge(file.deploy);
            project.workers = file.workers;
            project.utilities = file.utilities;
        } else {
            warn!(
                "Project settings {} not found, using defaults",
                project_config.display()
            );
        }

        Ok(Self {
            config_dir,
            project_dir,
            project_config,
            servers,
            app,
            project,
        })
    }

    /// Look up a server by name in the inventory.
    pub fn server(&self, name: &str) -> Result<&Server> {
        self.servers
            .get(name)
            .ok_or_else(|| anyhow!("Server '{}' not found in {}", name, USER_CONFIG_FILE))
    }

    /// Directory holding the generated artifacts of the project.
    pub fn state_dir(&self) -> PathBuf {
        self.project_config
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.project_dir.clone())
            .join(".cycl")
    }
}

pub fn default_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_NAME))
        .ok_or_else(|| anyhow!("Unable to determine the user configuration directory"))
}

fn load_user_config(config_dir: &Path) -> Result<UserConfig> {
    if !config_dir.exists() {
        warn!(
            "Configuration directory {} doesn't exist, creating it",
            config_dir.display()
        );
        fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create {}", config_dir.display()))?;
        return Ok(UserConfig::default());
    }

    let config_file = config_dir.join(USER_CONFIG_FILE);
    if !config_file.exists() {
        warn!(
            "Configuration file {} doesn't exist, no servers configured",
            config_file.display()
        );
        return Ok(UserConfig::default());
    }

    read_yaml(&config_file)
}

/// Parse a YAML file; an empty file yields the type's default.
pub fn read_yaml<T: DeserializeOwned + Default, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).to_string_lossy().into_owned(),
        _ => path.to_string(),
    }
}

fn default_private_key() -> Option<String> {
    let ssh_dir = dirs::home_dir()?.join(".ssh");
    ["id_ed25519", "id_ecdsa", "id_rsa"]
        .iter()
        .map(|name| ssh_dir.join(name))
        .find(|path| path.exists())
        .map(|path| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn paths(config_dir: &Path, project_dir: &Path) -> ConfigPaths {
        ConfigPaths {
            config_dir: Some(config_dir.to_path_buf()),
            project_dir: Some(project_dir.to_path_buf()),
            project_config: None,
        }
    }

    #[test]
    fn test_server_username_defaults() {
        let server: Server = serde_yaml::from_str("host: 10.0.0.1").unwrap();
        assert_eq!(server.host, "10.0.0.1");
        assert_eq!(server.username, "cycl");
        assert_eq!(server.port, None);
    }

    #[test]
    fn test_server_requires_host() {
        let result: Result<Server, _> = serde_yaml::from_str("username: deploy");
        assert!(result.is_err());
    }

    #[test]
    fn test_inventory_keeps_declared_order() {
        let yaml = r#"
servers:
  zeta:
    host: z.example.com
  alpha:
    host: a.example.com
    username: deploy
  mid:
    host: m.example.com
"#;
        let config: UserConfig = serde_yaml::from_str(yaml).unwrap();
        let names: Vec<&str> = config.servers.keys().map(String::as_str).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        assert_eq!(config.servers["alpha"].username, "deploy");
    }

    #[test]
    fn test_merge_overrides_field_by_field() {
        let overrides = DeployOverrides {
            server: Some("prod".into()),
            branch: Some("main".into()),
            ..Default::default()
        };
        let app = AppDeploymentSettings::default().merge(overrides);

        assert_eq!(app.server, "prod");
        assert_eq!(app.branch, "main");
        assert_eq!(app.directory, DEFAULT_DIRECTORY);
        assert_eq!(app.compose_file, DEFAULT_COMPOSE_FILE);
        assert_eq!(app.app_port, DEFAULT_APP_PORT);
    }

    #[test]
    fn test_missing_restart_services_is_empty() {
        let tmp = tempdir().unwrap();
        fs::write(
            tmp.path().join(PROJECT_CONFIG_FILE),
            "deploy:\n  server: prod\n  directory: /srv/app\n",
        )
        .unwrap();

        let settings = Settings::load(paths(&tmp.path().join("conf"), tmp.path())).unwrap();
        assert!(settings.app.restart_services.is_empty());
        assert_eq!(settings.app.directory, "/srv/app");
        assert_eq!(settings.app.branch, DEFAULT_BRANCH);
    }

    #[test]
    fn test_missing_config_dir_is_created() {
        let tmp = tempdir().unwrap();
        let config_dir = tmp.path().join("conf");

        let settings = Settings::load(paths(&config_dir, tmp.path())).unwrap();
        assert!(config_dir.is_dir());
        assert!(settings.servers.is_empty());
        assert_eq!(settings.app, AppDeploymentSettings::default());
        assert!(settings.project.workers.is_empty());
    }

    #[test]
    fn test_load_user_and_project_config() {
        let tmp = tempdir().unwrap();
        let config_dir = tmp.path().join("conf");
        fs::create_dir(&config_dir).unwrap();
        fs::write(
            config_dir.join(USER_CONFIG_FILE),
            "servers:\n  prod:\n    host: 203.0.113.5\n",
        )
        .unwrap();
        fs::write(
            tmp.path().join(PROJECT_CONFIG_FILE),
            r#"
deploy:
  server: prod
  restart_services: [web, worker]
utilities:
  db:
    type: mongo
workers:
  web:
    type: python-web-fastapi
    port: 8000
    entrypoint: app.main:app
"#,
        )
        .unwrap();

        let settings = Settings::load(paths(&config_dir, tmp.path())).unwrap();
        assert_eq!(settings.server(&settings.app.server).unwrap().host, "203.0.113.5");
        assert_eq!(settings.app.restart_services, ["web", "worker"]);
        assert_eq!(settings.project.utilities["db"].kind, "mongo");
        assert_eq!(settings.project.workers["web"].port, Some(8000));
        assert_eq!(settings.state_dir(), tmp.path().join(".cycl"));
    }

    #[test]
    fn test_malformed_yaml_is_fatal() {
        let tmp = tempdir().unwrap();
        let config_dir = tmp.path().join("conf");
        fs::create_dir(&config_dir).unwrap();
        fs::write(config_dir.join(USER_CONFIG_FILE), "servers: [unclosed").unwrap();

        assert!(Settings::load(paths(&config_dir, tmp.path())).is_err());
    }

    #[test]
    fn test_unknown_server_is_lookup_failure() {
        let tmp = tempdir().unwrap();
        let settings = Settings::load(paths(&tmp.path().join("conf"), tmp.path())).unwrap();

        let err = settings.server(&settings.app.server).unwrap_err();
        assert!(err.to_string().contains("'server' not found"));
    }

    #[test]
    fn test_worker_requires_entrypoint() {
        let tmp = tempdir().unwrap();
        fs::write(
            tmp.path().join(PROJECT_CONFIG_FILE),
            "workers:\n  web:\n    type: python-web-fastapi\n    port: 8000\n",
        )
        .unwrap();

        let err = Settings::load(paths(&tmp.path().join("conf"), tmp.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("entrypoint"));
    }

    #[test]
    fn test_empty_file_yields_default() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("empty.yaml");
        fs::write(&path, "\n").unwrap();

        let config: UserConfig = read_yaml(&path).unwrap();
        assert!(config.servers.is_empty());
    }
}
