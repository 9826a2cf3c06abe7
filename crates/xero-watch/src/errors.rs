//! Adapter error taxonomy.
//!
//! Every external call (ticket HTTP, remote shell, incident API, SMTP,
//! cluster database) reports failure as an [`AdapterError`]. The engine never
//! lets one escape a node's evaluation: each is logged and turned into the
//! next rung, a failure notification, or a degraded sentinel.
//!
//! ## Kinds
//!
//! | Kind                 | Raised by                         | Engine reaction                 |
//! |----------------------|-----------------------------------|---------------------------------|
//! | Timeout              | any call past its deadline        | rung fails / incident + email   |
//! | AuthFailure          | 401/403, ssh publickey rejection  | rung fails / incident + email   |
//! | Protocol             | non-2xx, unexpected body          | rung fails / incident + email   |
//! | Transport            | connect/DNS/spawn failures        | rung fails / incident + email   |
//! | RemoteCommand        | remote command exited non-zero    | incident + email                |
//! | IncidentCreation     | incident API                      | `Ticket Creation Failed`        |
//! | Notification         | SMTP                              | logged only                     |

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Coarse classification used in logs and by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    AuthFailure,
    Protocol,
    Transport,
    RemoteCommand,
    IncidentCreation,
    Notification,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::AuthFailure => write!(f, "auth_failure"),
            Self::Protocol => write!(f, "protocol"),
            Self::Transport => write!(f, "transport"),
            Self::RemoteCommand => write!(f, "remote_command"),
            Self::IncidentCreation => write!(f, "incident_creation"),
            Self::Notification => write!(f, "notification"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    /// The call did not complete within its deadline.
    #[error("{operation} on {target} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        target: String,
        timeout: Duration,
    },

    /// Credentials or key were rejected.
    #[error("{operation} on {target}: authentication failed: {message}")]
    AuthFailure {
        operation: &'static str,
        target: String,
        message: String,
    },

    /// The remote answered, but not with success.
    #[error("{operation} on {target}: unexpected response {status}: {message}")]
    Protocol {
        operation: &'static str,
        target: String,
        status: String,
        message: String,
    },

    /// The remote could not be reached or the call could not be made.
    #[error("{operation} on {target}: {message}")]
    Transport {
        operation: &'static str,
        target: String,
        message: String,
    },

    /// The remote command ran but exited unsuccessfully.
    #[error("{operation} on {target}: command exited with {status}: {stderr}")]
    RemoteCommand {
        operation: &'static str,
        target: String,
        status: i32,
        stderr: String,
    },

    /// The incident API did not hand back an incident id.
    #[error("incident creation failed: {0}")]
    IncidentCreation(String),

    /// The notification could not be delivered.
    #[error("notification delivery failed: {0}")]
    Notification(String),
}

impl AdapterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::AuthFailure { .. } => ErrorKind::AuthFailure,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::RemoteCommand { .. } => ErrorKind::RemoteCommand,
            Self::IncidentCreation(_) => ErrorKind::IncidentCreation,
            Self::Notification(_) => ErrorKind::Notification,
        }
    }

    pub fn transport(
        operation: &'static str,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            operation,
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn protocol(
        operation: &'static str,
        target: impl Into<String>,
        status: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Self::Protocol {
            operation,
            target: target.into(),
            status: status.to_string(),
            message: message.into(),
        }
    }

    pub fn remote_command(
        operation: &'static str,
        target: impl Into<String>,
        status: i32,
        stderr: &str,
    ) -> Self {
        Self::RemoteCommand {
            operation,
            target: target.into(),
            status,
            stderr: truncate(stderr, 200),
        }
    }

    /// Map a reqwest failure onto the taxonomy.
    pub fn from_reqwest(
        operation: &'static str,
        target: impl Into<String>,
        timeout: Duration,
        err: &reqwest::Error,
    ) -> Self {
        let target = target.into();
        if err.is_timeout() {
            Self::Timeout {
                operation,
                target,
                timeout,
            }
        } else {
            Self::Transport {
                operation,
                target,
                message: err.to_string(),
            }
        }
    }

    /// Map a non-success HTTP status onto the taxonomy.
    pub fn from_status(
        operation: &'static str,
        target: impl Into<String>,
        status: reqwest::StatusCode,
        body: &str,
    ) -> Self {
        let target = target.into();
        let message = truncate(body, 200);
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Self::AuthFailure {
                    operation,
                    target,
                    message: format!("{status}: {message}"),
                }
            }
            _ => Self::protocol(operation, target, status, message),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    let trimmed = s.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
