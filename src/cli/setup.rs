use anyhow::Result;
use clap::Args;

use crate::cli::common;
use crate::config::Settings;
use crate::provision::ProvisionServer;
use crate::remote::RemoteSession;

#[derive(Args, Clone, Debug)]
pub struct SetupServerCommand {
    /// Server name from config.yaml
    pub name: String,
}

impl SetupServerCommand {
    pub async fn execute(&self, settings: &Settings) -> Result<()> {
        let server = settings.server(&self.name)?;
        let repository = match settings.app.repository {
            Some(ref repository) => repository.clone(),
            None => common::local_remote_url(&settings.project_dir).await?,
        };
        let provision = ProvisionServer::new(server, &settings.app, repository);

        println!("🔧 Provisioning: {} ({})", self.name, server.host);

        let ssh = RemoteSession::connect(server, true).await?;
        let result = provision.prepare_host(&ssh).await;
        ssh.finish(result).await?;

        let ssh = RemoteSession::connect(server, false).await?;
        let result = provision.install_tooling(&ssh).await;
        ssh.finish(result).await?;

        let mut ssh = RemoteSession::connect(server, false).await?;
        let result = provision.checkout(&mut ssh).await;
        ssh.finish(result).await?;

        println!("✅ {} ({}) - Ready for deployments", self.name, server.host);
        Ok(())
    }
}
