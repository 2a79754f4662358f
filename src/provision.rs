/// Server provisioning for future deployments.
use anyhow::Result;
use log::info;

use crate::config::{AppDeploymentSettings, Server};
use crate::remote::{RemoteSession, Transport, APT, GIT, ID, PIP, POETRY, RSYNC, USERADD};

pub const PACKAGES: &[&str] = &["docker-ce", "docker-compose", "nginx", "python3-pip"];
pub const USER_GROUPS: &str = "sudo,docker";

#[derive(Debug)]
pub struct ProvisionServer {
    username: String,
    repository: String,
    directory: String,
}

impl ProvisionServer {
    pub fn new(server: &Server, app: &AppDeploymentSettings, repository: String) -> Self {
        Self {
            username: server.username.clone(),
            repository,
            directory: app.directory.clone(),
        }
    }

    fn user_home(&self) -> String {
        format!("/home/{}", self.username)
    }

    /// Steps run as root: system packages, the deploy user and its SSH keys.
    pub async fn prepare_host<T: Transport>(&self, ssh: &RemoteSession<T>) -> Result<()> {
        let mut args = vec!["install", "-y"];
        args.extend_from_slice(PACKAGES);
        ssh.run(APT, &args).await?;

        self.create_user(ssh).await?;
        self.copy_authorized_keys(ssh).await
    }

    async fn create_user<T: Transport>(&self, ssh: &RemoteSession<T>) -> Result<()> {
        if ssh.check(ID, &["-u", self.username.as_str()]).await? {
            info!("User '{}' already exists", self.username);
            return Ok(());
        }

        ssh.run(
            USERADD,
            &[
                "-m",
                "-s",
                "/bin/bash",
                "-G",
                USER_GROUPS,
                self.username.as_str(),
            ],
        )
        .await
    }

    async fn copy_authorized_keys<T: Transport>(&self, ssh: &RemoteSession<T>) -> Result<()> {
        let ssh_dir = format!("{}/.ssh", self.user_home());
        let auth_file = format!("{}/authorized_keys", ssh_dir);
        if ssh.path_exists(&auth_file).await? {
            info!("{} already present", auth_file);
            return Ok(());
        }

        let chown = format!("--chown={}:{}", self.username, self.username);
        let target = format!("{}/", ssh_dir);
        ssh.run(
            RSYNC,
            &[
                "--archive",
                chown.as_str(),
                "/root/.ssh/authorized_keys",
                target.as_str(),
            ],
        )
        .await
    }

    /// Steps run as the deploy user: the Python packaging tool.
    pub async fn install_tooling<T: Transport>(&self, ssh: &RemoteSession<T>) -> Result<()> {
        ssh.run(PIP, &["install", "--user", "poetry"]).await
    }

    /// Clone the deployment (or pull it when already cloned) and install its
    /// dependencies.
    pub async fn checkout<T: Transport>(&self, ssh: &mut RemoteSession<T>) -> Result<()> {
        let target = ssh.resolve(&self.directory);

        if ssh.path_exists(&format!("{}/.git", target)).await? {
            info!("{} already cloned", target);
        } else {
            ssh.run(GIT, &["clone", self.repository.as_str(), target.as_str()])
                .await?;
        }

        ssh.chdir(&target).await?;
        ssh.run(GIT, &["pull"]).await?;

        if ssh
            .path_exists(&format!("{}/pyproject.toml", target))
            .await?
        {
            ssh.run(POETRY, &["install", "--no-dev"]).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::FakeTransport;

    fn provisioner() -> ProvisionServer {
        let server = Server::new("203.0.113.7");
        let app = AppDeploymentSettings {
            directory: "shop".into(),
            ..Default::default()
        };
        ProvisionServer::new(&server, &app, "https://example.com/shop.git".into())
    }

    fn ran(fake: &FakeTransport, fragment: &str) -> bool {
        fake.commands().iter().any(|c| c.contains(fragment))
    }

    #[tokio::test]
    async fn test_fresh_host_creates_user_and_copies_keys() {
        let fake = FakeTransport::new("/root")
            .fail_on("id -u cycl", 1)
            .fail_on("test -e /home/cycl/.ssh/authorized_keys", 1);
        let ssh = RemoteSession::open(fake.clone()).await.unwrap();

        provisioner().prepare_host(&ssh).await.unwrap();

        let commands = fake.commands();
        assert!(commands[1].ends_with(
            "env DEBIAN_FRONTEND=noninteractive apt install -y docker-ce docker-compose nginx python3-pip"
        ));
        assert!(ran(&fake, "useradd -m -s /bin/bash -G"));
        assert!(ran(&fake, "rsync --archive"));
        assert!(ran(&fake, "/root/.ssh/authorized_keys /home/cycl/.ssh/"));
    }

    #[tokio::test]
    async fn test_provisioned_host_skips_guarded_steps() {
        let fake = FakeTransport::new("/root");
        let ssh = RemoteSession::open(fake.clone()).await.unwrap();

        provisioner().prepare_host(&ssh).await.unwrap();

        assert!(ran(&fake, "apt install"));
        assert!(!ran(&fake, "useradd"));
        assert!(!ran(&fake, "rsync"));
    }

    #[tokio::test]
    async fn test_checkout_clones_when_missing() {
        let fake = FakeTransport::new("/home/cycl")
            .fail_on("test -e /home/cycl/shop/.git", 1)
            .fail_on("test -e /home/cycl/shop/pyproject.toml", 1);
        let mut ssh = RemoteSession::open(fake.clone()).await.unwrap();

        provisioner().checkout(&mut ssh).await.unwrap();

        let clone = fake
            .commands()
            .into_iter()
            .find(|c| c.contains("git clone"))
            .unwrap();
        assert!(clone.starts_with("cd /home/cycl && "));
        assert!(clone.contains("example.com/shop.git"));
        assert!(clone.ends_with(" /home/cycl/shop"));
        assert!(ran(&fake, "cd /home/cycl/shop && git pull"));
        assert!(!ran(&fake, "poetry"));
        assert_eq!(ssh.cwd(), "/home/cycl/shop");
    }

    #[tokio::test]
    async fn test_checkout_pulls_existing_clone_and_installs() {
        let fake = FakeTransport::new("/home/cycl");
        let mut ssh = RemoteSession::open(fake.clone()).await.unwrap();

        provisioner().checkout(&mut ssh).await.unwrap();

        assert!(!ran(&fake, "git clone"));
        assert!(ran(&fake, "cd /home/cycl/shop && git pull"));
        assert!(ran(&fake, "cd /home/cycl/shop && poetry install --no-dev"));
    }

    #[tokio::test]
    async fn test_tooling_installs_poetry() {
        let fake = FakeTransport::new("/home/cycl");
        let ssh = RemoteSession::open(fake.clone()).await.unwrap();

        provisioner().install_tooling(&ssh).await.unwrap();
        assert!(ran(&fake, "pip3 install --user poetry"));
    }
}
