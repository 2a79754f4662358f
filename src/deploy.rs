/// Deploy cycle scripts run inside the application directory on the server.
use anyhow::Result;
use log::info;

use crate::config::AppDeploymentSettings;
use crate::remote::{RemoteSession, Transport, DOCKER_COMPOSE, GIT};

/// How much of the deployment a deploy cycle rebuilds and restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Cached build, restart only the configured services.
    Partial,
    /// Build without layer cache, take every container down.
    Full,
}

fn compose_args<'a>(app: &'a AppDeploymentSettings, rest: &[&'a str]) -> Vec<&'a str> {
    let mut args = vec!["-f", app.compose_file.as_str()];
    args.extend_from_slice(rest);
    args
}

/// Discard local changes and bring the checkout to the tip of the
/// configured branch.
pub async fn refresh_checkout<T: Transport>(
    ssh: &RemoteSession<T>,
    app: &AppDeploymentSettings,
) -> Result<()> {
    ssh.run(GIT, &["checkout", "."]).await?;
    ssh.run(GIT, &["pull"]).await?;
    ssh.run(GIT, &["checkout", app.branch.as_str()]).await?;
    ssh.run(GIT, &["pull"]).await
}

pub async fn update<T: Transport>(
    ssh: &RemoteSession<T>,
    app: &AppDeploymentSettings,
    mode: UpdateMode,
) -> Result<()> {
    refresh_checkout(ssh, app).await?;

    match mode {
        UpdateMode::Partial => {
            ssh.run(DOCKER_COMPOSE, &compose_args(app, &["build"])).await?;
            if app.restart_services.is_empty() {
                info!("No restart_services configured, skipping stop");
            } else {
                let mut args = compose_args(app, &["stop"]);
                args.extend(app.restart_services.iter().map(String::as_str));
                ssh.run(DOCKER_COMPOSE, &args).await?;
            }
        }
        UpdateMode::Full => {
            ssh.run(DOCKER_COMPOSE, &compose_args(app, &["build", "--no-cache"]))
                .await?;
            ssh.run(DOCKER_COMPOSE, &compose_args(app, &["down"])).await?;
        }
    }

    ssh.run(DOCKER_COMPOSE, &compose_args(app, &["up", "-d"])).await
}

pub async fn remote_logs<T: Transport>(
    ssh: &RemoteSession<T>,
    app: &AppDeploymentSettings,
    tail: u32,
) -> Result<()> {
    let tail = format!("--tail={}", tail);
    ssh.run(
        DOCKER_COMPOSE,
        &compose_args(app, &["logs", "-f", tail.as_str()]),
    )
    .await
}
