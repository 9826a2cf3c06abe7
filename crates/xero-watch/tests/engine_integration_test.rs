//! Integration tests for the Escalation Engine and Node Runner
//!
//! Drives full runs against recording fakes and a real registry file. Time
//! is paused, so the settle delays resolve instantly.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use xero_escalation::{DisabledReason, DisabledRegistry, EscalationOutcome, Rung, Severity};
use xero_watch::adapters::{
    CommandOutput, IncidentRequest, IncidentSink, Notification, Notifier, RemoteActions,
    UpgradeStatus,
};
use xero_watch::messages::OperatorHints;
use xero_watch::{
    AdapterError, Adapters, EngineSettings, EscalationEngine, NodeReport, NodeRunner, WatchConfig,
};

const CONFIG: &str = r#"
[xero]
user = "svc"
password = "pw"
domain = "EXAMPLE"
nodes = "a.example,b.example"
restart_command = "systemctl restart xero"
disable_command = "systemctl stop xero"
local_purge_command = "/opt/xero/purge"
server_user = "admin"
server_private_key = "id_ed25519"
clear_wado_cache = true

[email]
smtp_server = "smtp.example.org"
smtp_from_domain = "example.org"
smtp_recipients = "ops@example.org"

[incident]
instance = "snow.example.org"
table = "u_incident"
api_user = "api"
api_password = "pw"
ticket_type = "incident"
configuration_item = "Xero"
assignment_group = "PACS"
business_hours_start_time = "08:00:00"
business_hours_end_time = "17:00:00"
business_hours_urgency = "2"
business_hours_impact = "2"
after_hours_urgency = "3"
after_hours_impact = "3"
"#;

/// Shared, ordered log of every adapter call: `"<node> <call>"`.
type CallLog = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct FakeFleet {
    log: CallLog,
    /// Scripted verification results per node; exhausted or absent = healthy.
    verifications: Mutex<HashMap<String, VecDeque<bool>>>,
    /// Nodes whose remote shell commands fail.
    unreachable: HashSet<String>,
    /// When set, remote commands against a registered node are flagged in
    /// the log.
    registry: Option<Arc<DisabledRegistry>>,
}

impl FakeFleet {
    fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    fn failing(self, node: &str, results: &[bool]) -> Self {
        self.verifications
            .lock()
            .unwrap()
            .insert(node.to_string(), results.iter().copied().collect());
        self
    }

    fn unreachable(mut self, node: &str) -> Self {
        self.unreachable.insert(node.to_string());
        self
    }

    fn watching(mut self, registry: Arc<DisabledRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn record(&self, node: &str, call: &str) {
        self.log.lock().unwrap().push(format!("{node} {call}"));
    }

    fn command(&self, node: &str, call: &'static str) -> Result<CommandOutput, AdapterError> {
        match &self.registry {
            Some(registry) if registry.is_disabled(node) => {
                self.record(node, &format!("{call} while registered"))
            }
            _ => self.record(node, call),
        }
        if self.unreachable.contains(node) {
            return Err(AdapterError::transport(call, node, "ssh connection failed: No route to host"));
        }
        Ok(CommandOutput::default())
    }
}

#[async_trait]
impl RemoteActions for FakeFleet {
    async fn issue_ticket(&self, node: &str) -> Result<String, AdapterError> {
        self.record(node, "issue");
        Ok(format!("ticket-{node}"))
    }

    async fn verify_ticket(&self, node: &str, _ticket: &str) -> Result<bool, AdapterError> {
        self.record(node, "verify");
        let next = self
            .verifications
            .lock()
            .unwrap()
            .get_mut(node)
            .and_then(VecDeque::pop_front);
        Ok(next.unwrap_or(true))
    }

    async fn restart_service(&self, node: &str) -> Result<CommandOutput, AdapterError> {
        self.command(node, "restart")
    }

    async fn purge_local_cache(&self, node: &str) -> Result<CommandOutput, AdapterError> {
        self.command(node, "purge_local")
    }

    async fn disable_service(&self, node: &str) -> Result<CommandOutput, AdapterError> {
        self.command(node, "disable")
    }

    async fn purge_cluster_cache(&self, node: &str) -> Result<(), AdapterError> {
        self.record(node, "purge_cluster");
        Ok(())
    }
}

struct FakeIncidents {
    log: CallLog,
    requests: Mutex<Vec<IncidentRequest>>,
    next_id: Option<&'static str>,
}

#[async_trait]
impl IncidentSink for FakeIncidents {
    async fn create_incident(&self, request: &IncidentRequest) -> Result<String, AdapterError> {
        self.log.lock().unwrap().push("- incident".to_string());
        self.requests.lock().unwrap().push(request.clone());
        self.next_id
            .map(str::to_string)
            .ok_or_else(|| AdapterError::IncidentCreation("HTTP 500".into()))
    }
}

#[derive(Default)]
struct FakeNotifier {
    sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), AdapterError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakeUpgrades {
    upgrading: HashSet<String>,
    /// Registry entry written during the lookup, as another writer would.
    writes: Option<(Arc<DisabledRegistry>, String, DisabledReason)>,
}

#[async_trait]
impl UpgradeStatus for FakeUpgrades {
    async fn is_mid_upgrade(&self, node: &str) -> Result<bool, AdapterError> {
        if let Some((registry, target, reason)) = &self.writes {
            if target == node {
                registry.add(node, reason).unwrap();
            }
        }
        Ok(self.upgrading.contains(node))
    }
}

struct World {
    _dir: tempfile::TempDir,
    log: CallLog,
    registry: Arc<DisabledRegistry>,
    incidents: Arc<FakeIncidents>,
    notifier: Arc<FakeNotifier>,
    config: WatchConfig,
}

impl World {
    fn new(incident_id: Option<&'static str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(DisabledRegistry::new(dir.path().join("disabled_servers.json")));
        let log: CallLog = Arc::default();
        Self {
            incidents: Arc::new(FakeIncidents {
                log: log.clone(),
                requests: Mutex::default(),
                next_id: incident_id,
            }),
            notifier: Arc::default(),
            config: WatchConfig::from_toml(CONFIG).unwrap(),
            _dir: dir,
            log,
            registry,
        }
    }

    fn fleet(&self) -> FakeFleet {
        FakeFleet::new(self.log.clone())
    }

    fn engine(&self, fleet: FakeFleet, upgrades: FakeUpgrades) -> EscalationEngine {
        EscalationEngine::new(
            Adapters {
                remote: Arc::new(fleet),
                incidents: self.incidents.clone(),
                notifier: self.notifier.clone(),
                upgrades: Arc::new(upgrades),
            },
            self.registry.clone(),
            Severity::new("3", "3"),
            OperatorHints::from_config(&self.config.xero),
        )
        .with_settings(EngineSettings {
            clear_wado_cache: self.config.xero.clear_wado_cache,
            ..Default::default()
        })
    }

    async fn run(&self, fleet: FakeFleet, upgrades: FakeUpgrades) -> Vec<NodeReport> {
        let runner = NodeRunner::new(Arc::new(self.engine(fleet, upgrades)), 2);
        runner.run(&self.config.xero.nodes).await
    }

    /// Calls made for `node`, without the node prefix.
    fn calls(&self, node: &str) -> Vec<String> {
        let prefix = format!("{node} ");
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    fn sent(&self) -> Vec<Notification> {
        self.notifier.sent.lock().unwrap().clone()
    }
}

fn outcome_of<'a>(reports: &'a [NodeReport], node: &str) -> &'a EscalationOutcome {
    &reports
        .iter()
        .find(|r| r.node == node)
        .unwrap_or_else(|| panic!("no report for {node}"))
        .outcome
}

/// Test: a quarantined node is skipped with zero adapter calls while its
/// healthy sibling is evaluated normally.
#[tokio::test(start_paused = true)]
async fn test_disabled_node_skipped_healthy_sibling_passes() {
    let world = World::new(Some("INC0001"));
    world
        .registry
        .add("a.example", &DisabledReason::Incident("INC001".into()))
        .unwrap();

    let reports = world.run(world.fleet(), FakeUpgrades::default()).await;

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].node, "a.example");
    assert_eq!(
        outcome_of(&reports, "a.example"),
        &EscalationOutcome::SkippedAlreadyDisabled
    );
    assert_eq!(outcome_of(&reports, "b.example"), &EscalationOutcome::Healthy);
    assert!(world.calls("a.example").is_empty());
    assert_eq!(world.calls("b.example"), vec!["issue", "verify"]);
    assert!(world.sent().iter().all(|n| n.node != "a.example"));
    assert!(world.sent().is_empty());
    assert_eq!(
        world.registry.reason("a.example"),
        Some(DisabledReason::Incident("INC001".into()))
    );
}

/// Test: a node failing every probe walks the whole ladder in order.
#[tokio::test(start_paused = true)]
async fn test_full_ladder_order_and_quarantine() {
    let world = World::new(Some("INC0042"));
    let fleet = world.fleet().failing("a.example", &[false, false, false]);

    let started = tokio::time::Instant::now();
    let reports = world.run(fleet, FakeUpgrades::default()).await;

    assert_eq!(
        outcome_of(&reports, "a.example"),
        &EscalationOutcome::QuarantinedFailure {
            reason: "INC0042".into()
        }
    );
    assert_eq!(
        world.calls("a.example"),
        vec![
            "issue",
            "verify",
            "restart",
            "issue",
            "verify",
            "purge_local",
            "issue",
            "verify",
            "disable",
        ]
    );
    let log = world.log.lock().unwrap().clone();
    let disable_at = log.iter().position(|c| c == "a.example disable").unwrap();
    assert_eq!(log[disable_at + 1..].iter().filter(|c| *c == "- incident").count(), 1);

    let requests = world.incidents.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].summary.ends_with("(Server Disabled)"));
    assert_eq!(requests[0].severity, Severity::new("3", "3"));

    assert_eq!(
        world.registry.reason("a.example"),
        Some(DisabledReason::Incident("INC0042".into()))
    );
    let sent = world.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.ends_with("INC0042"));
    assert!(sent[0].body.contains("password=********"));

    // Two settle delays: after restart and after purge.
    assert!(started.elapsed() >= Duration::from_secs(20));
}

/// Test: a purge that fixes the node ends the ladder with a qualified email.
#[tokio::test(start_paused = true)]
async fn test_restored_after_local_purge() {
    let world = World::new(Some("INC0042"));
    let fleet = world.fleet().failing("b.example", &[false, false, true]);

    let reports = world.run(fleet, FakeUpgrades::default()).await;

    assert_eq!(
        outcome_of(&reports, "b.example"),
        &EscalationOutcome::Restored {
            via: Rung::AfterPurge
        }
    );
    assert!(!world.calls("b.example").contains(&"disable".to_string()));
    let sent = world.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.ends_with("(Cache Cleared)"));
    assert!(world.incidents.requests.lock().unwrap().is_empty());
}

/// Test: mid-upgrade failure parks the node with no remediation at all.
#[tokio::test(start_paused = true)]
async fn test_prepare_short_circuit() {
    let world = World::new(Some("INC0042"));
    let fleet = world.fleet().failing("a.example", &[false]);
    let upgrades = FakeUpgrades {
        upgrading: ["a.example".to_string()].into(),
        ..Default::default()
    };

    let reports = world.run(fleet, upgrades).await;

    assert_eq!(
        outcome_of(&reports, "a.example"),
        &EscalationOutcome::QuarantinedPrepare
    );
    assert_eq!(world.calls("a.example"), vec!["issue", "verify"]);
    assert_eq!(
        world.registry.load().get("a.example").map(String::as_str),
        Some("PREPARE")
    );
    assert!(world.incidents.requests.lock().unwrap().is_empty());
}

/// Test: a PREPARE node that passes on a later run is released with exactly
/// one notification and a cluster cache purge.
#[tokio::test(start_paused = true)]
async fn test_self_healing_removal() {
    let world = World::new(None);
    world
        .registry
        .add("a.example", &DisabledReason::Prepare)
        .unwrap();

    let reports = world.run(world.fleet(), FakeUpgrades::default()).await;

    assert_eq!(outcome_of(&reports, "a.example"), &EscalationOutcome::Healthy);
    assert!(!world.registry.is_disabled("a.example"));
    assert_eq!(
        world.calls("a.example"),
        vec!["issue", "verify", "purge_cluster"]
    );
    let sent = world.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].node, "a.example");
    assert!(sent[0].subject.contains("upgrade complete"));
}

/// Test: a PREPARE node that keeps failing after the upgrade is taken out of
/// the registry before the first restart, then quarantined normally.
#[tokio::test(start_paused = true)]
async fn test_prepare_entry_cleared_before_ladder() {
    let world = World::new(Some("INC0009"));
    world
        .registry
        .add("a.example", &DisabledReason::Prepare)
        .unwrap();
    let fleet = world
        .fleet()
        .failing("a.example", &[false, false, false])
        .watching(world.registry.clone());

    let reports = world.run(fleet, FakeUpgrades::default()).await;

    assert_eq!(
        world.calls("a.example"),
        vec![
            "issue",
            "verify",
            "restart",
            "issue",
            "verify",
            "purge_local",
            "issue",
            "verify",
            "disable",
        ]
    );
    assert_eq!(
        outcome_of(&reports, "a.example"),
        &EscalationOutcome::QuarantinedFailure {
            reason: "INC0009".into()
        }
    );
    assert_eq!(
        world.registry.reason("a.example"),
        Some(DisabledReason::Incident("INC0009".into()))
    );
    let sent: Vec<_> = world
        .sent()
        .into_iter()
        .filter(|n| n.node == "a.example")
        .collect();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("has been Disabled"));
}

/// Test: an incident entry that appears while the node is being evaluated,
/// on a node that then verifies, is cleared with a close-incident email.
#[tokio::test(start_paused = true)]
async fn test_stale_incident_entry_cleared() {
    let world = World::new(None);
    let upgrades = FakeUpgrades {
        writes: Some((
            world.registry.clone(),
            "a.example".to_string(),
            DisabledReason::Incident("INC001".into()),
        )),
        ..Default::default()
    };

    let reports = world.run(world.fleet(), upgrades).await;

    assert_eq!(outcome_of(&reports, "a.example"), &EscalationOutcome::Healthy);
    assert!(!world.registry.is_disabled("a.example"));
    assert_eq!(
        world.calls("a.example"),
        vec!["issue", "verify", "purge_cluster"]
    );
    let sent = world.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body.contains("Please close incident INC001"));
}

/// Test: incident creation failure during quarantine degrades to the sentinel.
#[tokio::test(start_paused = true)]
async fn test_ticket_creation_failed_fallback() {
    let world = World::new(None);
    let fleet = world.fleet().failing("a.example", &[false, false, false]);

    let reports = world.run(fleet, FakeUpgrades::default()).await;

    assert_eq!(
        outcome_of(&reports, "a.example"),
        &EscalationOutcome::QuarantinedFailure {
            reason: "Ticket Creation Failed".into()
        }
    );
    assert_eq!(
        world.registry.load().get("a.example").map(String::as_str),
        Some("Ticket Creation Failed")
    );
    let raw = std::fs::read_to_string(world.registry.path()).unwrap();
    assert!(raw.contains("\"a.example\": \"Ticket Creation Failed\"") || raw.contains("\"a.example\":\"Ticket Creation Failed\""));
}

/// Test: node A's remote commands all error; node B is unaffected.
#[tokio::test(start_paused = true)]
async fn test_remote_errors_do_not_leak_across_nodes() {
    let world = World::new(Some("INC0500"));
    let fleet = world
        .fleet()
        .failing("a.example", &[false, false, false])
        .failing("b.example", &[false, true])
        .unreachable("a.example");

    let reports = world.run(fleet, FakeUpgrades::default()).await;

    assert_eq!(
        outcome_of(&reports, "b.example"),
        &EscalationOutcome::Restored {
            via: Rung::AfterRestart
        }
    );
    assert_eq!(
        outcome_of(&reports, "a.example"),
        &EscalationOutcome::QuarantinedFailure {
            reason: "INC0500".into()
        }
    );

    // restart, purge and disable each produced a connection-failure report
    let requests = world.incidents.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 3);
    assert!(requests
        .iter()
        .all(|r| r.summary.contains("a.example") && r.summary.ends_with("(Unable to connect to server)")));

    let sent = world.sent();
    assert_eq!(sent.iter().filter(|n| n.node == "a.example").count(), 3);
    assert_eq!(sent.iter().filter(|n| n.node == "b.example").count(), 1);
    assert!(!world.registry.is_disabled("b.example"));
}

/// Test: a node listed twice gets one evaluation and one report.
#[tokio::test(start_paused = true)]
async fn test_repeated_node_evaluated_once() {
    let world = World::new(Some("INC0042"));
    let fleet = world.fleet().failing("a.example", &[false, true]);
    let runner = NodeRunner::new(Arc::new(world.engine(fleet, FakeUpgrades::default())), 4);

    let nodes: Vec<String> = ["a.example", "b.example", "a.example"]
        .iter()
        .map(|n| n.to_string())
        .collect();
    let reports = runner.run(&nodes).await;

    assert_eq!(
        reports.iter().map(|r| r.node.as_str()).collect::<Vec<_>>(),
        vec!["a.example", "b.example"]
    );
    assert_eq!(
        world.calls("a.example"),
        vec!["issue", "verify", "restart", "issue", "verify"]
    );
}

/// Test: a second run after quarantine does nothing for that node.
#[tokio::test(start_paused = true)]
async fn test_quarantine_is_idempotent_across_runs() {
    let world = World::new(Some("INC0042"));
    let fleet = world.fleet().failing("a.example", &[false, false, false]);
    world.run(fleet, FakeUpgrades::default()).await;
    let calls_after_first = world.calls("a.example").len();
    let emails_after_first = world.sent().len();

    let reports = world.run(world.fleet(), FakeUpgrades::default()).await;

    assert_eq!(
        outcome_of(&reports, "a.example"),
        &EscalationOutcome::SkippedAlreadyDisabled
    );
    assert_eq!(world.calls("a.example").len(), calls_after_first);
    assert_eq!(world.sent().len(), emails_after_first);
}
