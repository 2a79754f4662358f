use anyhow::Result;
use clap::Args;
use log::info;

use crate::config::{AppDeploymentSettings, DeployOverrides, Settings};
use crate::deploy::{self, UpdateMode};
use crate::remote::RemoteSession;
use crate::ssh::Session;

#[derive(Args, Clone, Debug)]
pub struct RemoteLogsCommand {
    /// Number of lines to show from the end of the logs
    #[arg(long, default_value = "100")]
    pub tail: u32,
}

impl RemoteLogsCommand {
    pub async fn execute(&self, settings: &Settings) -> Result<()> {
        let ssh = open_app_session(settings, &settings.app).await?;
        let result = deploy::remote_logs(&ssh, &settings.app, self.tail).await;
        ssh.finish(result).await
    }
}

#[derive(Args, Clone, Debug)]
pub struct UpdateCommand {
    /// Deploy this branch instead of the configured one
    #[arg(long)]
    pub branch: Option<String>,
}

impl UpdateCommand {
    pub fn app_settings(&self, settings: &Settings) -> AppDeploymentSettings {
        settings.app.clone().merge(DeployOverrides {
            branch: self.branch.clone(),
            ..Default::default()
        })
    }

    pub async fn execute(&self, settings: &Settings, mode: UpdateMode) -> Result<()> {
        let app = self.app_settings(settings);
        let ssh = open_app_session(settings, &app).await?;
        let result = deploy::update(&ssh, &app, mode).await;
        ssh.finish(result).await?;

        println!("✅ Deployed {} to {}", app.branch, app.server);
        Ok(())
    }
}

/// Connect as the deploy user and enter the application directory.
async fn open_app_session(
    settings: &Settings,
    app: &AppDeploymentSettings,
) -> Result<RemoteSession<Session>> {
    let server = settings.server(&app.server)?;
    let mut ssh = RemoteSession::connect(server, false).await?;
    if let Err(e) = ssh.chdir(&app.directory).await {
        let _ = ssh.close().await;
        return Err(e);
    }
    info!("Working in {}:{}", server.host, ssh.cwd());
    Ok(ssh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProjectSettings, ServerInventory};
    use std::path::PathBuf;

    fn settings() -> Settings {
        Settings {
            config_dir: PathBuf::from("/tmp/conf"),
            project_dir: PathBuf::from("/tmp/project"),
            project_config: PathBuf::from("/tmp/project/cycl.yaml"),
            servers: ServerInventory::new(),
            app: AppDeploymentSettings {
                branch: "main".into(),
                ..Default::default()
            },
            project: ProjectSettings::default(),
        }
    }

    #[test]
    fn test_branch_flag_overrides_configured_branch() {
        let cmd = UpdateCommand {
            branch: Some("hotfix".into()),
        };
        assert_eq!(cmd.app_settings(&settings()).branch, "hotfix");
    }

    #[test]
    fn test_configured_branch_without_flag() {
        let cmd = UpdateCommand { branch: None };
        let app = cmd.app_settings(&settings());
        assert_eq!(app.branch, "main");
        assert_eq!(app, settings().app);
    }

    #[tokio::test]
    async fn test_unknown_server_fails_before_connecting() {
        let cmd = RemoteLogsCommand { tail: 100 };
        let err = cmd.execute(&settings()).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
