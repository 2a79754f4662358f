/// Generation of the project's docker-compose file, environment file and
/// persisted utility secrets.
use std::{fs, path::Path};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{read_yaml, ProjectSettings, UtilitySettings, WorkerSettings};
use crate::utils::gen_password;

pub const COMPOSE_FILE: &str = "docker-compose.yml";
pub const UTILS_FILE: &str = "utils.yml";
pub const ENV_FILE: &str = "cycl.env";
pub const COMPOSE_VERSION: &str = "3.5";

pub const REDIS_PORT: u16 = 6379;
pub const MONGO_PORT: u16 = 27017;
pub const MONGO_USER: &str = "root";
pub const FASTAPI_WORKER: &str = "python-web-fastapi";
pub const DEFAULT_WORKER_PORT: u16 = 8000;

/// Persisted state of one utility.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilityData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

/// Contents of `utils.yml`, keyed by utility name.
pub type UtilityStore = IndexMap<String, UtilityData>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeFile {
    pub version: String,
    pub services: IndexMap<String, ServiceDefinition>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_file: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub environment: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildDefinition {
    pub context: String,
    pub dockerfile: String,
}

/// Everything `generate` produces.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifacts {
    pub compose: ComposeFile,
    pub env: IndexMap<String, String>,
    pub utilities: UtilityStore,
}

/// Build the artifacts for `project`. Passwords already in `utilities` are
/// kept; missing ones are generated and added to the returned store.
pub fn generate(project: &ProjectSettings, mut utilities: UtilityStore) -> Artifacts {
    let mut services = IndexMap::new();
    let mut env = IndexMap::new();
    let mut dependencies = Vec::new();

    for (name, utility) in project.utilities.iter() {
        dependencies.push(name.clone());
        let service = match utility_service(name, utility, &mut utilities, &mut env) {
            Some(service) => service,
            None => {
                debug!("Skipping utility '{}' of unknown type '{}'", name, utility.kind);
                continue;
            }
        };
        services.insert(name.clone(), service);
    }

    for (name, worker) in project.workers.iter() {
        services.insert(name.clone(), worker_service(worker, &dependencies));
    }

    Artifacts {
        compose: ComposeFile {
            version: COMPOSE_VERSION.to_string(),
            services,
        },
        env,
        utilities,
    }
}

fn utility_service(
    name: &str,
    utility: &UtilitySettings,
    store: &mut UtilityStore,
    env: &mut IndexMap<String, String>,
) -> Option<ServiceDefinition> {
    match utility.kind.as_str() {
        "redis" => {
            env.insert(format!("{}_url", name), format!("redis://{}/1", name));
            env.insert(format!("{}_host", name), name.to_string());
            env.insert(format!("{}_port", name), REDIS_PORT.to_string());
            env.insert(format!("{}_db", name), "1".to_string());

            Some(ServiceDefinition {
                image: Some("redis".to_string()),
                ports: vec![format!("{}:{}", REDIS_PORT, REDIS_PORT)],
                ..Default::default()
            })
        }
        "mongo" => {
            let data = store.entry(name.to_string()).or_default();
            let password = match data.password {
                Some(ref password) if !password.is_empty() => password.clone(),
                _ => data.password.insert(gen_password()).clone(),
            };

            env.insert(format!("{}_url", name), format!("mongodb://{}/", name));
            env.insert(format!("{}_host", name), name.to_string());
            env.insert(format!("{}_port", name), MONGO_PORT.to_string());
            env.insert(format!("{}_db", name), name.to_string());
            env.insert(format!("{}_user", name), MONGO_USER.to_string());
            env.insert(format!("{}_password", name), password.clone());

            let mut environment = IndexMap::new();
            environment.insert(
                "MONGO_INITDB_ROOT_USERNAME".to_string(),
                MONGO_USER.to_string(),
            );
            environment.insert("MONGO_INITDB_ROOT_PASSWORD".to_string(), password);

            Some(ServiceDefinition {
                image: Some("mongo".to_string()),
                environment,
                ..Default::default()
            })
        }
        _ => None,
    }
}

fn worker_service(worker: &WorkerSettings, dependencies: &[String]) -> ServiceDefinition {
    let mut service = ServiceDefinition {
        build: Some(BuildDefinition {
            context: "./".to_string(),
            dockerfile: format!("Dockerfile-{}", worker.kind),
        }),
        env_file: vec![format!(".cycl/{}", ENV_FILE)],
        volumes: vec![".:/opt/worker".to_string()],
        depends_on: dependencies.to_vec(),
        ..Default::default()
    };

    if let Some(port) = worker.port {
        service.ports.push(format!("{}:{}", port, port));
    }

    if worker.kind == FASTAPI_WORKER {
        service.command = Some(format!(
            "uvicorn --host 0.0.0.0 --port {} {} --reload",
            worker.port.unwrap_or(DEFAULT_WORKER_PORT),
            worker.entrypoint
        ));
    }

    service
}

/// Render environment variables as `KEY=value` lines.
pub fn render_env(env: &IndexMap<String, String>) -> String {
    env.iter()
        .map(|(key, value)| format!("{}={}\n", key, value))
        .collect()
}

/// Regenerate every artifact under `state_dir`, reusing the secrets already
/// stored in its `utils.yml`.
pub fn write_artifacts<P: AsRef<Path>>(
    state_dir: P,
    project: &ProjectSettings,
) -> Result<Artifacts> {
    let state_dir = state_dir.as_ref();
    fs::create_dir_all(state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;

    let utils_path = state_dir.join(UTILS_FILE);
    let stored: UtilityStore = if utils_path.exists() {
        read_yaml(&utils_path)?
    } else {
        UtilityStore::new()
    };

    let artifacts = generate(project, stored);

    let compose_path = state_dir.join(COMPOSE_FILE);
    let compose = serde_yaml::to_string(&artifacts.compose)?;
    fs::write(&compose_path, compose)
        .with_context(|| format!("Failed to write {}", compose_path.display()))?;
    info!("Wrote {}", compose_path.display());

    if !artifacts.utilities.is_empty() {
        let utils = serde_yaml::to_string(&artifacts.utilities)?;
        fs::write(&utils_path, utils)
            .with_context(|| format!("Failed to write {}", utils_path.display()))?;
        info!("Wrote {}", utils_path.display());
    }

    if !artifacts.env.is_empty() {
        let env_path = state_dir.join(ENV_FILE);
        fs::write(&env_path, render_env(&artifacts.env))
            .with_context(|| format!("Failed to write {}", env_path.display()))?;
        info!("Wrote {}", env_path.display());
    }

    Ok(artifacts)
}
