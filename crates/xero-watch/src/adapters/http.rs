//! Ticket issuance, ticket verification and the cluster-wide WADO purge.
//!
//! Nodes present self-signed certificates, so certificate validation is
//! disabled on this client only.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::XeroConfig;
use crate::errors::AdapterError;

const TICKET_USER: &str = "TICKET_TESTING_USER";
const TICKET_DURATION_SECS: &str = "600";
const TICKET_ROLES: &str = "EprUser";
const WADO_PURGE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn ticket_url(node: &str) -> String {
    format!("https://{node}/encodedTicket")
}

/// The ticket is already URI-encoded by the node and is passed through as is.
pub fn verify_url(xero: &XeroConfig, node: &str, ticket: &str) -> String {
    format!(
        "https://{node}/?PatientID={}&AccessionNumber={}&theme={}&ticket={ticket}",
        xero.patient_id, xero.accession_number, xero.theme
    )
}

pub fn wado_purge_url(xero: &XeroConfig, node: &str) -> String {
    format!(
        "https://{node}/wado/?clearfilecache=true&requesttype=clearcache&user={}&password={}",
        xero.user, xero.password
    )
}

/// [`wado_purge_url`] with the password masked, for emails and logs.
pub fn redacted_wado_purge_url(xero: &XeroConfig, node: &str) -> String {
    format!(
        "https://{node}/wado/?clearfilecache=true&requesttype=clearcache&user={}&password=********",
        xero.user
    )
}

/// HTTP side of [`RemoteActions`](super::RemoteActions).
#[derive(Clone)]
pub struct XeroHttp {
    client: reqwest::Client,
    xero: XeroConfig,
}

impl XeroHttp {
    pub fn new(xero: XeroConfig) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| {
                AdapterError::transport("http_client", "xero", format!("failed to build client: {e}"))
            })?;
        Ok(Self { client, xero })
    }

    pub async fn issue_ticket(&self, node: &str) -> Result<String, AdapterError> {
        const OP: &str = "issue_ticket";
        let timeout = self.xero.ticket_timeout();
        let form = [
            ("user", self.xero.user.as_str()),
            ("password", self.xero.password.as_str()),
            ("ticketUser", TICKET_USER),
            ("ticketDuration", TICKET_DURATION_SECS),
            ("ticketRoles", TICKET_ROLES),
            ("queryConstraints", self.xero.query_constraints_for(node)),
            ("uriEncodedTicket", "true"),
            ("domain", self.xero.domain.as_str()),
        ];

        let response = self
            .client
            .post(ticket_url(node))
            .form(&form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(OP, node, timeout, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AdapterError::from_reqwest(OP, node, timeout, &e))?;

        if status != StatusCode::OK {
            return Err(AdapterError::from_status(OP, node, status, &body));
        }

        let ticket = body.trim();
        if ticket.is_empty() {
            return Err(AdapterError::protocol(OP, node, status, "empty ticket body"));
        }
        debug!(node, "ticket issued");
        Ok(ticket.to_string())
    }

    pub async fn verify_ticket(&self, node: &str, ticket: &str) -> Result<bool, AdapterError> {
        const OP: &str = "verify_ticket";
        let timeout = self.xero.validation_timeout();

        let response = self
            .client
            .get(verify_url(&self.xero, node, ticket))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(OP, node, timeout, &e))?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(node, %status, "ticket verification rejected");
        }
        Ok(status == StatusCode::OK)
    }

    pub async fn purge_cluster_cache(&self, node: &str) -> Result<(), AdapterError> {
        const OP: &str = "purge_cluster_cache";

        let response = self
            .client
            .post(wado_purge_url(&self.xero, node))
            .timeout(WADO_PURGE_TIMEOUT)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(OP, node, WADO_PURGE_TIMEOUT, &e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(OP, node, status, &body));
        }
        debug!(node, "cluster WADO cache cleared");
        Ok(())
    }
}
