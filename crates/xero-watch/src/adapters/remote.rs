use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::http::XeroHttp;
use super::{CommandOutput, RemoteActions};
use crate::config::XeroConfig;
use crate::errors::AdapterError;

/// ssh exits with 255 when the connection or authentication fails; any
/// other status belongs to the remote command.
const SSH_TRANSPORT_EXIT: i32 = 255;
const MAX_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Runs commands on a node through the system `ssh` client.
///
/// Key-based, non-interactive: `BatchMode` makes a missing or rejected key
/// fail fast instead of prompting. New host keys are accepted and pinned.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    bin: String,
    user: String,
    key: PathBuf,
    timeout: Duration,
}

impl SshExecutor {
    pub fn new(user: impl Into<String>, key: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            bin: "ssh".to_string(),
            user: user.into(),
            key: key.into(),
            timeout,
        }
    }

    /// Use a different client binary.
    pub fn with_binary(mut self, bin: impl Into<String>) -> Self {
        self.bin = bin.into();
        self
    }

    pub fn args(&self, node: &str, command: &str) -> Vec<String> {
        let connect_timeout = self.timeout.as_secs().clamp(1, MAX_CONNECT_TIMEOUT_SECS);
        vec![
            "-i".to_string(),
            self.key.display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={connect_timeout}"),
            format!("{}@{node}", self.user),
            command.to_string(),
        ]
    }

    /// Run `command` on `node`, bounded by the executor's timeout. The child
    /// is killed if the deadline passes.
    pub async fn run(
        &self,
        operation: &'static str,
        node: &str,
        command: &str,
    ) -> Result<CommandOutput, AdapterError> {
        let mut child = Command::new(&self.bin);
        child
            .args(self.args(node, command))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(node, operation, command, "running remote command");
        let output = match tokio::time::timeout(self.timeout, child.output()).await {
            Err(_) => {
                return Err(AdapterError::Timeout {
                    operation,
                    target: node.to_string(),
                    timeout: self.timeout,
                })
            }
            Ok(Err(e)) => {
                return Err(AdapterError::transport(
                    operation,
                    node,
                    format!("failed to run `{}`: {e}", self.bin),
                ))
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        match output.status.code() {
            Some(0) => Ok(CommandOutput { stdout, stderr }),
            Some(SSH_TRANSPORT_EXIT) if stderr.contains("Permission denied") => {
                Err(AdapterError::AuthFailure {
                    operation,
                    target: node.to_string(),
                    message: stderr.trim().to_string(),
                })
            }
            Some(SSH_TRANSPORT_EXIT) => Err(AdapterError::transport(
                operation,
                node,
                format!("ssh connection failed: {}", stderr.trim()),
            )),
            Some(code) => Err(AdapterError::remote_command(operation, node, code, &stderr)),
            None => Err(AdapterError::transport(
                operation,
                node,
                "ssh terminated by signal",
            )),
        }
    }
}

/// Production [`RemoteActions`]: HTTP for tickets and the WADO purge, ssh for
/// the configured service commands.
pub struct XeroRemote {
    http: XeroHttp,
    ssh: SshExecutor,
    restart_command: String,
    disable_command: String,
    local_purge_command: String,
}

impl XeroRemote {
    pub fn new(xero: &XeroConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            http: XeroHttp::new(xero.clone())?,
            ssh: SshExecutor::new(
                xero.server_user.clone(),
                xero.server_private_key.clone(),
                xero.ssh_timeout(),
            ),
            restart_command: xero.restart_command.clone(),
            disable_command: xero.disable_command.clone(),
            local_purge_command: xero.local_purge_command.clone(),
        })
    }
}

#[async_trait]
impl RemoteActions for XeroRemote {
    async fn issue_ticket(&self, node: &str) -> Result<String, AdapterError> {
        self.http.issue_ticket(node).await
    }

    async fn verify_ticket(&self, node: &str, ticket: &str) -> Result<bool, AdapterError> {
        self.http.verify_ticket(node, ticket).await
    }

    async fn restart_service(&self, node: &str) -> Result<CommandOutput, AdapterError> {
        info!(node, "restarting service");
        self.ssh
            .run("restart_service", node, &self.restart_command)
            .await
    }

    async fn purge_local_cache(&self, node: &str) -> Result<CommandOutput, AdapterError> {
        info!(node, "purging local cache");
        self.ssh
            .run("purge_local_cache", node, &self.local_purge_command)
            .await
    }

    async fn disable_service(&self, node: &str) -> Result<CommandOutput, AdapterError> {
        info!(node, "disabling service");
        self.ssh
            .run("disable_service", node, &self.disable_command)
            .await
    }

    async fn purge_cluster_cache(&self, node: &str) -> Result<(), AdapterError> {
        info!(node, "purging cluster WADO cache");
        self.http.purge_cluster_cache(node).await
    }
}
