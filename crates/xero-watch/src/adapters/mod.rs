//! External collaborators.
//!
//! The engine only sees the four traits below. Production implementations
//! live in the submodules; tests substitute mocks or recording fakes.
//!
//! ```text
//! RemoteActions  ── http (ticket issue/verify, WADO purge) + remote (ssh)
//! IncidentSink   ── incident (ServiceNow table API)
//! Notifier       ── email (SMTP) + meme (inline image)
//! UpgradeStatus  ── upgrade (cluster database)
//! ```

pub mod email;
pub mod http;
pub mod incident;
pub mod meme;
pub mod remote;
pub mod upgrade;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use xero_escalation::Severity;

use crate::errors::AdapterError;

/// Captured output of a remote command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Everything needed to open one incident. Routing fields (configuration
/// item, assignment group) come from the sink's own configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentRequest {
    pub summary: String,
    pub description: String,
    pub severity: Severity,
    /// Fresh correlation id for the incident system.
    pub external_id: String,
}

/// Which captioned image, if any, rides along with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemeKind {
    Success,
    Failure,
}

/// One outbound email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Node the email is about; also the sender's local part.
    pub node: String,
    pub subject: String,
    pub body: String,
    pub meme: Option<MemeKind>,
}

/// Calls made against a node. Each call is independent, fallible and
/// bounded by its own timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteActions: Send + Sync {
    /// Request a session ticket. `Ok` carries the raw ticket text.
    async fn issue_ticket(&self, node: &str) -> Result<String, AdapterError>;

    /// Present a ticket to the viewer. `Ok(true)` only on HTTP 200.
    async fn verify_ticket(&self, node: &str, ticket: &str) -> Result<bool, AdapterError>;

    async fn restart_service(&self, node: &str) -> Result<CommandOutput, AdapterError>;

    /// Host-scoped cache purge over the remote shell.
    async fn purge_local_cache(&self, node: &str) -> Result<CommandOutput, AdapterError>;

    async fn disable_service(&self, node: &str) -> Result<CommandOutput, AdapterError>;

    /// Cluster-wide WADO cache purge over HTTP.
    async fn purge_cluster_cache(&self, node: &str) -> Result<(), AdapterError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IncidentSink: Send + Sync {
    /// Open an incident and return its identifier.
    async fn create_incident(&self, request: &IncidentRequest) -> Result<String, AdapterError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), AdapterError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpgradeStatus: Send + Sync {
    /// Whether the cluster reports the node as mid-upgrade (`PREPARE`).
    async fn is_mid_upgrade(&self, node: &str) -> Result<bool, AdapterError>;
}
