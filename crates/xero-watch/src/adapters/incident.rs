//! ServiceNow import-table incident client.
//!
//! `POST https://{instance}/api/now/table/{table}` with basic auth. A `201`
//! whose body carries `result.u_task_string` is the only success.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{IncidentRequest, IncidentSink};
use crate::config::IncidentConfig;
use crate::errors::AdapterError;

const OP: &str = "create_incident";

#[derive(Debug, Serialize)]
struct IncidentPayload<'a> {
    u_short_description: &'a str,
    u_description: &'a str,
    u_affected_user_id: &'a str,
    u_configuration_item: &'a str,
    u_external_unique_id: &'a str,
    u_urgency: &'a str,
    u_impact: &'a str,
    u_type: &'a str,
    u_assignment_group: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    u_assigned_to: &'a str,
}

#[derive(Debug, Deserialize)]
struct IncidentResponse {
    #[serde(default)]
    result: IncidentResult,
}

#[derive(Debug, Default, Deserialize)]
struct IncidentResult {
    #[serde(default)]
    u_task_string: Option<String>,
}

pub struct ServiceNowClient {
    client: reqwest::Client,
    config: IncidentConfig,
}

impl ServiceNowClient {
    pub fn new(config: IncidentConfig) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AdapterError::IncidentCreation(format!("failed to build client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "https://{}/api/now/table/{}",
            self.config.instance, self.config.table
        )
    }

    fn payload<'a>(&'a self, request: &'a IncidentRequest) -> IncidentPayload<'a> {
        IncidentPayload {
            u_short_description: &request.summary,
            u_description: &request.description,
            u_affected_user_id: "",
            u_configuration_item: &self.config.configuration_item,
            u_external_unique_id: &request.external_id,
            u_urgency: &request.severity.urgency,
            u_impact: &request.severity.impact,
            u_type: &self.config.ticket_type,
            u_assignment_group: &self.config.assignment_group,
            u_assigned_to: &self.config.assignee,
        }
    }
}

/// Pull the incident id out of a `201` body.
fn incident_id_from_body(body: &str) -> Result<String, AdapterError> {
    let parsed: IncidentResponse = serde_json::from_str(body)
        .map_err(|e| AdapterError::IncidentCreation(format!("unparseable response: {e}")))?;
    match parsed.result.u_task_string.map(|s| s.trim().to_string()) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(AdapterError::IncidentCreation(
            "response did not include u_task_string".into(),
        )),
    }
}

#[async_trait]
impl IncidentSink for ServiceNowClient {
    async fn create_incident(&self, request: &IncidentRequest) -> Result<String, AdapterError> {
        let response = self
            .client
            .post(self.endpoint())
            .basic_auth(&self.config.api_user, Some(&self.config.api_password))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&self.payload(request))
            .send()
            .await
            .map_err(|e| {
                AdapterError::IncidentCreation(
                    AdapterError::from_reqwest(OP, &self.config.instance, self.config.timeout(), &e)
                        .to_string(),
                )
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status != StatusCode::CREATED {
            return Err(AdapterError::IncidentCreation(
                AdapterError::from_status(OP, &self.config.instance, status, &body).to_string(),
            ));
        }

        let id = incident_id_from_body(&body)?;
        info!(incident = %id, external_id = %request.external_id, "incident created");
        Ok(id)
    }
}
