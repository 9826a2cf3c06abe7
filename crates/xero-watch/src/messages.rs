//! Notification and incident wording.
//!
//! Pure string composition. Subjects keep the historical
//! `Xero Ticketing/Image Display ...` prefix so existing mail filters match.

use std::borrow::Cow;
use std::path::PathBuf;

use xero_escalation::{DisabledReason, Rung};

use crate::adapters::http::redacted_wado_purge_url;
use crate::config::XeroConfig;

const PRODUCT: &str = "Xero Ticketing/Image Display";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentText {
    pub summary: String,
    pub description: String,
}

pub fn restored(node: &str, at: &str, via: Rung) -> Email {
    let line = match via {
        Rung::AfterPurge => format!("{PRODUCT} has been restored on {node} at {at} (Cache Cleared)"),
        _ => format!("{PRODUCT} has been restored on {node} at {at}"),
    };
    Email {
        subject: line.clone(),
        body: line,
    }
}

/// A node back in service after sitting in the registry under `reason`.
pub fn released(node: &str, at: &str, reason: &DisabledReason) -> Email {
    match reason {
        DisabledReason::Prepare => Email {
            subject: format!("{PRODUCT} upgrade complete on {node} at {at}"),
            body: format!(
                "{node} passed its health check at {at} and is no longer parked for a cluster upgrade.\n\
                 It is back under normal monitoring."
            ),
        },
        DisabledReason::TicketCreationFailed => Email {
            subject: format!("{PRODUCT} has been restored on {node} at {at}"),
            body: format!(
                "{node} passed its health check at {at} and has been removed from the disabled list.\n\
                 No incident was recorded when it was disabled."
            ),
        },
        DisabledReason::Incident(id) => Email {
            subject: format!("{PRODUCT} has been restored on {node} at {at} {id}"),
            body: format!(
                "{node} passed its health check at {at} and has been removed from the disabled list.\n\
                 Please close incident {id}."
            ),
        },
    }
}

pub fn parked(node: &str, at: &str) -> Email {
    Email {
        subject: format!("{PRODUCT} is failing on {node} at {at} (Cluster Upgrade In Progress)"),
        body: format!(
            "{node} failed its health check at {at} while the cluster reports it in PREPARE.\n\
             No remediation was attempted. The node will be re-checked on every run and \
             released automatically once it passes."
        ),
    }
}

pub fn connection_failure_incident(node: &str, at: &str) -> IncidentText {
    let summary = format!("{PRODUCT} is failing on {node} at {at} (Unable to connect to server)");
    IncidentText {
        description: format!("{summary}\nPlease investigate"),
        summary,
    }
}

/// `detail` is the adapter error that triggered the report.
pub fn connection_failure(node: &str, at: &str, incident: Option<&str>, detail: &str) -> Email {
    let head = format!("{PRODUCT} is failing on {node} at {at} (Unable to connect to server)");
    Email {
        subject: format!("{head} {}", incident_tag(incident)),
        body: format!("{head}\nPlease investigate\n\n{detail}"),
    }
}

pub fn disabled_incident(node: &str, at: &str) -> IncidentText {
    IncidentText {
        summary: format!("{PRODUCT} is failing on {node} at {at} (Server Disabled)"),
        description: format!("{PRODUCT} has been Disabled on {node} at {at}"),
    }
}

pub fn disabled(node: &str, at: &str, incident: Option<&str>, hints: &str) -> Email {
    let head = format!("{PRODUCT} has been Disabled on {node} at {at}");
    Email {
        subject: format!("{head} {}", incident_tag(incident)),
        body: format!("{head}\n\n{hints}"),
    }
}

fn incident_tag(incident: Option<&str>) -> &str {
    incident.unwrap_or("(Ticket Creation Failure)")
}

/// Manual steps quoted in the disablement email.
#[derive(Debug, Clone)]
pub struct OperatorHints {
    ssh_user: String,
    ssh_key: PathBuf,
    purge_command: String,
    enable_command: String,
    registry_file: PathBuf,
    xero: Option<XeroConfig>,
}

impl OperatorHints {
    pub fn from_config(xero: &XeroConfig) -> Self {
        Self {
            ssh_user: xero.server_user.clone(),
            ssh_key: xero.server_private_key.clone(),
            purge_command: xero.local_purge_command.clone(),
            enable_command: xero.enable_command().to_string(),
            registry_file: xero.disabled_servers_file.clone(),
            xero: xero.clear_wado_cache.then(|| xero.clone()),
        }
    }

    pub fn render(&self, node: &str) -> String {
        let mut steps = vec![
            format!("Purge the local cache:\n    {}", self.ssh(node, &self.purge_command)),
            format!("Re-enable the service:\n    {}", self.ssh(node, &self.enable_command)),
        ];
        if let Some(xero) = &self.xero {
            steps.push(format!(
                "Clear the cluster WADO cache (fill in the password):\n    curl -k -X POST {}",
                quote(&redacted_wado_purge_url(xero, node))
            ));
        }
        steps.push(format!(
            "Remove {node} from {} so monitoring resumes.",
            self.registry_file.display()
        ));

        let numbered: Vec<String> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {s}", i + 1))
            .collect();
        format!("To bring {node} back into service:\n{}", numbered.join("\n"))
    }

    fn ssh(&self, node: &str, command: &str) -> String {
        format!(
            "ssh -i {} {}@{node} {}",
            quote(&self.ssh_key.display().to_string()),
            self.ssh_user,
            quote(command)
        )
    }
}

fn quote(s: &str) -> Cow<'_, str> {
    shlex::try_quote(s).unwrap_or(Cow::Borrowed(s))
}
