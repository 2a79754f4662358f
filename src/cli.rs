/// CLI interface and commands.

/// Common functions for CLI.
pub mod common;

/// Regenerate local project artifacts.
pub mod config;

/// Deploy cycle and logs of a deployed application.
pub mod deploy;

/// Provision a server for deployments.
pub mod setup;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::{ConfigPaths, Settings};
use crate::deploy::UpdateMode;

#[derive(Parser)]
#[command(name = "cycl")]
#[command(about = "Provision servers and roll out docker-compose deployments over SSH")]
pub struct Cli {
    /// Directory holding config.yaml (default: the user configuration directory)
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Project directory (default: current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Project settings file (default: <project-dir>/cycl.yaml)
    #[arg(long, global = true)]
    pub project_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn config_paths(&self) -> ConfigPaths {
        ConfigPaths {
            config_dir: self.config_dir.clone(),
            project_dir: self.project_dir.clone(),
            project_config: self.project_config.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured servers
    ListServers,
    /// Show the git remote URL of the current project
    #[command(name = "showremote", alias = "show-remote-url")]
    ShowRemoteUrl,
    /// Setup remote server for future deployments
    SetupServer(setup::SetupServerCommand),
    /// Show logs for remote docker-compose
    RemoteLogs(deploy::RemoteLogsCommand),
    /// Update remote deployment, restarts only services in deploy.restart_services
    DeployUpdate(deploy::UpdateCommand),
    /// Update remote deployment, rebuilds with --no-cache, restarts ALL services
    FullUpdate(deploy::UpdateCommand),
    /// Enact config changes: generate containers, initialize databases
    Config(config::ConfigCommand),
}

impl Commands {
    pub async fn execute(&self, settings: &Settings) -> Result<()> {
        match self {
            Commands::ListServers => {
                common::list_servers(&settings.servers);
                Ok(())
            }
            Commands::ShowRemoteUrl => {
                println!("{}", common::local_remote_url(&settings.project_dir).await?);
                Ok(())
            }
            Commands::SetupServer(cmd) => cmd.execute(settings).await,
            Commands::RemoteLogs(cmd) => cmd.execute(settings).await,
            Commands::DeployUpdate(cmd) => cmd.execute(settings, UpdateMode::Partial).await,
            Commands::FullUpdate(cmd) => cmd.execute(settings, UpdateMode::Full).await,
            Commands::Config(cmd) => cmd.execute(settings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_showremote_and_alias() {
        let cli = Cli::try_parse_from(["cycl", "showremote"]).unwrap();
        assert!(matches!(cli.command, Commands::ShowRemoteUrl));

        let cli = Cli::try_parse_from(["cycl", "show-remote-url"]).unwrap();
        assert!(matches!(cli.command, Commands::ShowRemoteUrl));
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cycl",
            "deploy-update",
            "--branch",
            "hotfix",
            "--project-dir",
            "/srv/project",
        ])
        .unwrap();

        assert_eq!(
            cli.config_paths().project_dir,
            Some(PathBuf::from("/srv/project"))
        );
        match cli.command {
            Commands::DeployUpdate(cmd) => assert_eq!(cmd.branch.as_deref(), Some("hotfix")),
            _ => panic!("expected deploy-update"),
        }
    }

    #[test]
    fn test_setup_server_requires_name() {
        assert!(Cli::try_parse_from(["cycl", "setup-server"]).is_err());
        let cli = Cli::try_parse_from(["cycl", "setup-server", "prod"]).unwrap();
        match cli.command {
            Commands::SetupServer(cmd) => assert_eq!(cmd.name, "prod"),
            _ => panic!("expected setup-server"),
        }
    }

    #[test]
    fn test_remote_logs_tail_default() {
        let cli = Cli::try_parse_from(["cycl", "remote-logs"]).unwrap();
        match cli.command {
            Commands::RemoteLogs(cmd) => assert_eq!(cmd.tail, 100),
            _ => panic!("expected remote-logs"),
        }
    }
}
