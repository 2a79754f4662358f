/// Common functions for CLI.
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tokio::process::Command;

use crate::config::ServerInventory;
use crate::utils::truncate_error_message;

/// One `name: host` line per configured server, in declared order.
pub fn server_lines(servers: &ServerInventory) -> Vec<String> {
    servers
        .iter()
        .map(|(name, server)| format!("{}: {}", name, server.host))
        .collect()
}

/// List all servers.
pub fn list_servers(servers: &ServerInventory) {
    for line in server_lines(servers) {
        println!("{}", line);
    }
}

/// URL of the `origin` remote of the git checkout in `project_dir`.
pub async fn local_remote_url(project_dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["config", "--get", "remote.origin.url"])
        .current_dir(project_dir)
        .output()
        .await
        .context("Failed to run git")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "git config --get remote.origin.url failed ({}) - {}",
            output.status,
            truncate_error_message(stderr.trim(), 3)
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
