//! Cluster upgrade-status lookup.
//!
//! A node is mid-upgrade when the cluster database reports its status as
//! `PREPARE`. Looked up live, once per node per run.

use async_trait::async_trait;
use std::time::Duration;
use tokio_postgres::NoTls;
use tracing::{debug, warn};

use xero_escalation::PREPARE;

use super::UpgradeStatus;
use crate::config::ClusterDbConfig;
use crate::errors::AdapterError;

const OP: &str = "upgrade_status";

pub fn is_prepare(status: &str) -> bool {
    status.trim().eq_ignore_ascii_case(PREPARE)
}

/// Used when no `[cluster_db]` section is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUpgradeStatus;

#[async_trait]
impl UpgradeStatus for NoUpgradeStatus {
    async fn is_mid_upgrade(&self, _node: &str) -> Result<bool, AdapterError> {
        Ok(false)
    }
}

pub struct ClusterDb {
    config: ClusterDbConfig,
}

impl ClusterDb {
    pub fn new(config: ClusterDbConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    async fn status(&self, node: &str) -> Result<Option<String>, AdapterError> {
        let target = self.config.host.as_str();
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.config.host)
            .port(self.config.port)
            .dbname(&self.config.service)
            .user(&self.config.user)
            .password(&self.config.password)
            .connect_timeout(self.timeout());

        let (client, connection) = pg
            .connect(NoTls)
            .await
            .map_err(|e| AdapterError::transport(OP, target, e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "cluster database connection closed with error");
            }
        });

        let row = client
            .query_opt(self.config.upgrade_query.as_str(), &[&node])
            .await
            .map_err(|e| AdapterError::protocol(OP, target, "query", e.to_string()))?;

        row.map(|r| r.try_get::<_, Option<String>>(0))
            .transpose()
            .map(Option::flatten)
            .map_err(|e| AdapterError::protocol(OP, target, "row", e.to_string()))
    }
}

#[async_trait]
impl UpgradeStatus for ClusterDb {
    async fn is_mid_upgrade(&self, node: &str) -> Result<bool, AdapterError> {
        let timeout = self.timeout();
        let status = tokio::time::timeout(timeout, self.status(node))
            .await
            .map_err(|_| AdapterError::Timeout {
                operation: OP,
                target: self.config.host.clone(),
                timeout,
            })??;

        debug!(node, status = status.as_deref().unwrap_or("<none>"), "cluster status");
        Ok(status.as_deref().is_some_and(is_prepare))
    }
}
