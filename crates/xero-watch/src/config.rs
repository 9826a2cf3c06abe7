use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use xero_escalation::{BusinessHours, Severity, SeverityError};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "xeroticket.toml";

/// Top-level monitor configuration. Loaded once at startup, then shared
/// read-only.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    pub xero: XeroConfig,
    pub email: EmailConfig,
    #[serde(default)]
    pub meme: MemeConfig,
    pub incident: IncidentConfig,
    /// Cluster database used for upgrade-status lookups (optional).
    #[serde(default)]
    pub cluster_db: Option<ClusterDbConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ticketing endpoints and the remote commands used to remediate them.
#[derive(Debug, Clone, Deserialize)]
pub struct XeroConfig {
    pub user: String,
    pub password: String,
    pub domain: String,
    #[serde(default)]
    pub query_constraints: String,
    /// Per-node override of `query_constraints`.
    #[serde(default)]
    pub node_query_constraints: BTreeMap<String, String>,
    /// Nodes in evaluation order; a TOML array or a comma-separated string.
    #[serde(deserialize_with = "string_or_list")]
    pub nodes: Vec<String>,
    pub restart_command: String,
    pub disable_command: String,
    pub local_purge_command: String,
    /// Command quoted in the disablement email to bring a node back.
    #[serde(default)]
    pub enable_command: Option<String>,
    pub server_user: String,
    pub server_private_key: PathBuf,
    #[serde(default = "default_ticket_timeout")]
    pub get_ticket_timeout: u64,
    #[serde(default = "default_ticket_timeout")]
    pub ticket_validation_timeout: u64,
    #[serde(default = "default_ssh_timeout")]
    pub ssh_timeout_secs: u64,
    /// Enables the cluster-wide WADO cache purge.
    #[serde(default)]
    pub clear_wado_cache: bool,
    #[serde(default = "default_patient_id")]
    pub patient_id: String,
    #[serde(default = "default_accession_number")]
    pub accession_number: String,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_registry_file")]
    pub disabled_servers_file: PathBuf,
    /// Upper bound on concurrently evaluated nodes (default: node count).
    #[serde(default)]
    pub max_parallel_nodes: Option<usize>,
}

impl XeroConfig {
    pub fn query_constraints_for(&self, node: &str) -> &str {
        self.node_query_constraints
            .get(node)
            .map(String::as_str)
            .unwrap_or(&self.query_constraints)
    }

    pub fn enable_command(&self) -> &str {
        self.enable_command
            .as_deref()
            .unwrap_or(&self.restart_command)
    }

    pub fn ticket_timeout(&self) -> Duration {
        Duration::from_secs(self.get_ticket_timeout)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.ticket_validation_timeout)
    }

    pub fn ssh_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_timeout_secs)
    }

    pub fn parallelism(&self) -> usize {
        self.max_parallel_nodes
            .unwrap_or(self.nodes.len())
            .clamp(1, self.nodes.len().max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Upgrade the connection with STARTTLS before authenticating.
    #[serde(default)]
    pub starttls: bool,
    #[serde(default)]
    pub smtp_username: String,
    #[serde(default)]
    pub smtp_password: String,
    pub smtp_from_domain: String,
    #[serde(deserialize_with = "string_or_list")]
    pub smtp_recipients: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemeConfig {
    #[serde(default)]
    pub use_memes: bool,
    #[serde(default)]
    pub successful_restart_meme: PathBuf,
    #[serde(default)]
    pub unsuccessful_restart_meme: PathBuf,
    /// CSS font family for the captions, e.g. `Impact`.
    #[serde(default = "default_font_family")]
    pub font_family: String,
}

/// Incident system (ServiceNow table API) settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IncidentConfig {
    pub instance: String,
    pub table: String,
    pub api_user: String,
    pub api_password: String,
    pub ticket_type: String,
    pub configuration_item: String,
    pub assignment_group: String,
    #[serde(default)]
    pub assignee: String,
    pub business_hours_start_time: String,
    pub business_hours_end_time: String,
    pub business_hours_urgency: String,
    pub business_hours_impact: String,
    pub after_hours_urgency: String,
    pub after_hours_impact: String,
    #[serde(default = "default_incident_timeout")]
    pub timeout_secs: u64,
}

impl IncidentConfig {
    pub fn business_hours(&self) -> Result<BusinessHours, SeverityError> {
        BusinessHours::parse(
            &self.business_hours_start_time,
            &self.business_hours_end_time,
            Severity::new(&self.business_hours_urgency, &self.business_hours_impact),
            Severity::new(&self.after_hours_urgency, &self.after_hours_impact),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterDbConfig {
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    /// Database (service) name.
    pub service: String,
    pub user: String,
    pub password: String,
    /// Must return one text column for `$1 = node`.
    #[serde(default = "default_upgrade_query")]
    pub upgrade_query: String,
    #[serde(default = "default_db_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Plain-text log file; stdout when unset.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl WatchConfig {
    /// Read, parse, resolve relative paths against the config file's
    /// directory, and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if !p.as_os_str().is_empty() && p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.xero.disabled_servers_file);
        resolve(&mut self.xero.server_private_key);
        resolve(&mut self.meme.successful_restart_meme);
        resolve(&mut self.meme.unsuccessful_restart_meme);
        if let Some(file) = self.logging.file.as_mut() {
            resolve(file);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.xero.nodes.is_empty() {
            bail!("[xero] nodes must list at least one node");
        }
        if self.email.smtp_recipients.is_empty() {
            bail!("[email] smtp_recipients must list at least one address");
        }
        if self.xero.get_ticket_timeout == 0 || self.xero.ticket_validation_timeout == 0 {
            bail!("[xero] ticket timeouts must be greater than zero");
        }
        self.incident
            .business_hours()
            .context("[incident] business hours are invalid")?;
        Ok(())
    }
}

/// Accepts `["a", "b"]` or `"a,b"`; trims and drops empty items. Repeats
/// (compared case-insensitively) keep their first position only, so a node
/// listed twice is still evaluated once.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        Joined(String),
        List(Vec<String>),
    }

    let items = match StringOrList::deserialize(deserializer)? {
        StringOrList::Joined(s) => s.split(',').map(str::to_string).collect(),
        StringOrList::List(v) => v,
    };
    let mut seen = HashSet::new();
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.to_ascii_lowercase()))
        .collect())
}

fn default_font_family() -> String {
    "Impact".to_string()
}

fn default_ticket_timeout() -> u64 {
    30
}

fn default_ssh_timeout() -> u64 {
    120
}

fn default_incident_timeout() -> u64 {
    30
}

fn default_db_timeout() -> u64 {
    10
}

fn default_smtp_port() -> u16 {
    25
}

fn default_db_port() -> u16 {
    5432
}

fn default_patient_id() -> String {
    "123456789".into()
}

fn default_accession_number() -> String {
    "TRAIN195".into()
}

fn default_theme() -> String {
    "patientportal".into()
}

fn default_registry_file() -> PathBuf {
    PathBuf::from("disabled_servers.json")
}

fn default_upgrade_query() -> String {
    "SELECT status FROM cluster_nodes WHERE hostname = $1".into()
}

fn default_log_level() -> String {
    "info".into()
}
