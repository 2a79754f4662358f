/// SSH related functionality.
use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use crossterm::{terminal, tty::IsTty};
use russh::{
    client::{self, Config, Handle, Msg},
    keys::{load_secret_key, ssh_key, PrivateKeyWithHashAlg},
    Channel, ChannelMsg, Disconnect,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::remote::Transport;

#[derive(Debug)]
pub struct Client {
    host: String,
    port: u16,
    username: String,
    password: Option<String>,
    keypath: Option<String>,
}

impl Client {
    pub fn new(host: String, username: String) -> Self {
        Self {
            host,
            port: 22,
            username,
            password: None,
            keypath: None,
        }
    }

    pub fn with_password(&mut self, password: String) {
        self.password = Some(password);
    }

    pub fn with_private_key(&mut self, keypath: String) {
        self.keypath = Some(keypath);
    }

    pub fn with_port(&mut self, port: u16) {
        self.port = port;
    }

    pub async fn connect(&self) -> Result<Session> {
        let config = Arc::new(Config::default());

        let handler = Handler {};
        let mut session = client::connect(config, (&self.host[..], self.port), handler)
            .await
            .with_context(|| format!("Failed to connect to {}", self))?;

        let auth_result = if let Some(password) = &self.password {
            session
                .authenticate_password(&self.username, password)
                .await?
        } else if let Some(ref keypath) = self.keypath {
            let key_pair = load_secret_key(keypath, None)
                .with_context(|| format!("Failed to load private key from: {}", keypath))?;
            session
                .authenticate_publickey(
                    &self.username,
                    PrivateKeyWithHashAlg::new(
                        Arc::new(key_pair),
                        session.best_supported_rsa_hash().await?.flatten(),
                    ),
                )
                .await?
        } else {
            return Err(anyhow!(
                "No authentication method available for {} (need password or private key)",
                self
            ));
        };

        if !auth_result.success() {
            return Err(anyhow!(
                "SSH authentication failed for user: {}",
                self.username
            ));
        }

        Ok(Session { handler: session })
    }
}

impl std::fmt::Display for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub output: String,
    pub exit_status: u32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

pub struct Session {
    handler: Handle<Handler>,
}

impl Session {
    pub async fn execute_command<S: AsRef<str>>(&self, command: S) -> Result<CommandResult> {
        let mut channel = self.handler.channel_open_session().await?;
        channel.exec(true, command.as_ref()).await?;

        wait_result_from_channel(&mut channel).await
    }

    /// Run `command` with its combined output forwarded to the local
    /// terminal; returns the remote exit status.
    pub async fn execute_streamed(&self, command: &str) -> Result<u32> {
        let mut channel = self.handler.channel_open_session().await?;

        let mut stdout = tokio::io::stdout();
        if std::io::stdout().is_tty() {
            let (cols, rows) = terminal::size()?;
            channel
                .request_pty(
                    true,
                    &std::env::var("TERM").unwrap_or("xterm".into()),
                    cols as u32,
                    rows as u32,
                    0,
                    0,
                    &[],
                )
                .await?;
        }
        channel.exec(true, command).await?;

        stream_channel(&mut channel, &mut stdout).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.handler
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

impl Transport for Session {
    async fn exec(&self, command: &str) -> Result<CommandResult> {
        self.execute_command(command).await
    }

    async fn exec_streamed(&self, command: &str) -> Result<u32> {
        self.execute_streamed(command).await
    }

    async fn close(&self) -> Result<()> {
        self.disconnect().await
    }
}

pub async fn stream_channel<W: AsyncWrite + Unpin>(
    channel: &mut Channel<Msg>,
    output: &mut W,
) -> Result<u32> {
    let mut code = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                output.write_all(&data).await?;
                output.flush().await?;
            }
            ChannelMsg::ExtendedData { data, ext } => {
                if ext == 1 {
                    output.write_all(&data).await?;
                    output.flush().await?;
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                code = Some(exit_status);
            }
            ChannelMsg::Eof | ChannelMsg::Close if code.is_some() => break,
            _ => {}
        }
    }

    code.ok_or_else(|| anyhow!("Remote command ended without an exit status"))
}

pub async fn wait_result_from_channel(channel: &mut Channel<Msg>) -> Result<CommandResult> {
    let mut result = CommandResult {
        output: String::new(),
        exit_status: 0,
    };

    while let Some(data) = channel.wait().await {
        match data {
            ChannelMsg::Data { data } => {
                result.output.push_str(&String::from_utf8_lossy(&data));
            }
            ChannelMsg::ExtendedData { data, ext } => {
                if ext == 1 {
                    result.output.push_str(&String::from_utf8_lossy(&data));
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                result.exit_status = exit_status;
                break;
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    // Remove trailing newlines before returning
    if result.output.ends_with('\n') {
        result.output.pop();
    }

    Ok(result)
}

#[derive(Debug)]
struct Handler {}

impl client::Handler for Handler {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        async { Ok(true) }
    }
}
