/// Remote session: a working directory on one connected host plus handles
/// for the programs the deploy scripts invoke there.
use std::future::Future;

use anyhow::{anyhow, Context, Result};
use log::info;

use crate::config::Server;
use crate::ssh::{CommandResult, Session};
use crate::utils::{join_remote_path, truncate_error_message};

/// A connection able to run shell command lines on a remote host.
pub trait Transport {
    /// Run `command` and capture its combined output.
    fn exec(&self, command: &str) -> impl Future<Output = Result<CommandResult>>;

    /// Run `command` with its output streamed to the local terminal.
    fn exec_streamed(&self, command: &str) -> impl Future<Output = Result<u32>>;

    /// Close the underlying connection.
    fn close(&self) -> impl Future<Output = Result<()>>;
}

/// A program on the remote host, invoked with an argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteCommand {
    program: &'static str,
    env: &'static [(&'static str, &'static str)],
}

impl RemoteCommand {
    pub const fn new(program: &'static str) -> Self {
        Self { program, env: &[] }
    }

    pub const fn with_env(
        program: &'static str,
        env: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self { program, env }
    }

    /// Render the command line for `args`, quoting every argument.
    pub fn render<S: AsRef<str>>(&self, args: &[S]) -> String {
        let mut line = String::new();
        if !self.env.is_empty() {
            line.push_str("env ");
            for (key, value) in self.env {
                line.push_str(&format!("{}={} ", key, value));
            }
        }
        line.push_str(self.program);
        for arg in args {
            line.push(' ');
            line.push_str(&shell_words::quote(arg.as_ref()));
        }
        line
    }
}

pub const GIT: RemoteCommand = RemoteCommand::new("git");
pub const DOCKER_COMPOSE: RemoteCommand = RemoteCommand::new("docker-compose");
pub const PIP: RemoteCommand = RemoteCommand::new("pip3");
pub const APT: RemoteCommand =
    RemoteCommand::with_env("apt", &[("DEBIAN_FRONTEND", "noninteractive")]);
pub const USERADD: RemoteCommand = RemoteCommand::new("useradd");
pub const ID: RemoteCommand = RemoteCommand::new("id");
pub const RSYNC: RemoteCommand = RemoteCommand::new("rsync");
pub const POETRY: RemoteCommand = RemoteCommand::new("poetry");

/// One open connection plus the remote working directory commands run in.
pub struct RemoteSession<T: Transport> {
    transport: T,
    home: String,
    cwd: String,
}

impl RemoteSession<Session> {
    /// Connect to `server` as its deploy user, or as root.
    pub async fn connect(server: &Server, as_root: bool) -> Result<Self> {
        let client = server.build_client(as_root)?;
        info!("Connecting to {}", client);
        let session = client.connect().await?;
        Self::open(session).await
    }
}

impl<T: Transport> RemoteSession<T> {
    /// Start a session on `transport`, recording the remote login directory.
    pub async fn open(transport: T) -> Result<Self> {
        let result = transport.exec("pwd").await?;
        if !result.success() {
            let _ = transport.close().await;
            return Err(anyhow!(
                "Failed to determine remote working directory - {}",
                truncate_error_message(result.output.trim(), 3)
            ));
        }
        let home = result.output.trim().to_string();

        Ok(Self {
            transport,
            cwd: home.clone(),
            home,
        })
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Resolve `target` against the login directory unless it is absolute.
    pub fn resolve(&self, target: &str) -> String {
        if target.starts_with('/') {
            target.to_string()
        } else {
            join_remote_path(&self.home, target)
        }
    }

    /// Change the working directory; fails if it does not exist remotely.
    pub async fn chdir(&mut self, target: &str) -> Result<()> {
        let path = self.resolve(target);
        let check = shell_words::join(["test", "-d", path.as_str()]);
        let result = self.transport.exec(&check).await?;
        if !result.success() {
            return Err(anyhow!("Remote directory '{}' does not exist", path));
        }
        self.cwd = path;
        Ok(())
    }

    fn in_cwd(&self, command: &str) -> String {
        format!("cd {} && {}", shell_words::quote(&self.cwd), command)
    }

    /// Run `command` with `args`, streaming its output; a non-zero exit
    /// status is an error.
    pub async fn run<S: AsRef<str>>(&self, command: RemoteCommand, args: &[S]) -> Result<()> {
        let line = command.render(args);
        info!("$ {}", line);
        let status = self
            .transport
            .exec_streamed(&self.in_cwd(&line))
            .await
            .with_context(|| format!("Failed to run `{}`", line))?;
        if status != 0 {
            return Err(anyhow!("`{}` exited with status {}", line, status));
        }
        Ok(())
    }

    /// Run `command` with `args` capturing output; the exit status is
    /// returned to the caller instead of failing.
    pub async fn output<S: AsRef<str>>(
        &self,
        command: RemoteCommand,
        args: &[S],
    ) -> Result<CommandResult> {
        let line = command.render(args);
        log::debug!("$ {}", line);
        self.transport.exec(&self.in_cwd(&line)).await
    }

    /// Whether `command` with `args` exits successfully.
    pub async fn check<S: AsRef<str>>(&self, command: RemoteCommand, args: &[S]) -> Result<bool> {
        Ok(self.output(command, args).await?.success())
    }

    /// Whether `path` exists on the remote host.
    pub async fn path_exists(&self, path: &str) -> Result<bool> {
        let check = shell_words::join(["test", "-e", self.resolve(path).as_str()]);
        Ok(self.transport.exec(&check).await?.success())
    }

    pub async fn close(self) -> Result<()> {
        self.transport.close().await
    }

    /// Close the session and hand back `result`, so the connection is
    /// released on both the success and the failure path. A script error
    /// takes precedence over a close error.
    pub async fn finish<R>(self, result: Result<R>) -> Result<R> {
        let closed = self.close().await;
        let value = result?;
        closed?;
        Ok(value)
    }
}
