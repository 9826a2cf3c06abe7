//! Escalation Engine: runs the remediation ladder for one node.
//!
//! ```text
//!   registry ──▶ decide(rung, observation) ──▶ Action
//!      ▲                                         │
//!      │      ┌──────────────────────────────────┘
//!      │      ▼
//!      │  CheckUpgrade / Probe ──────── fill in the observation
//!      │  Restart / PurgeLocalCache ─── run it, settle, climb a rung
//!      └─ re-read every iteration
//!         Healthy / Restored / Park / Quarantine / Skip ── terminal
//! ```
//!
//! The decision logic lives in `xero_escalation::ladder`; this module only
//! carries out actions and records the node's state transitions. Adapter
//! errors never leave `evaluate`.

use chrono::Local;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use xero_escalation::{
    decide, next_rung, Action, DisabledReason, DisabledRegistry, EscalationOutcome, NodeState,
    NodeStateMachine, Observation, ProbeResult, Registration, RegistryError, RegistryResult, Rung,
    Severity, TransitionRecord,
};

use crate::adapters::{
    IncidentRequest, IncidentSink, MemeKind, Notification, Notifier, RemoteActions, UpgradeStatus,
};
use crate::errors::AdapterError;
use crate::messages::{self, Email, IncidentText, OperatorHints};

/// Wait after a restart or purge before re-probing.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub settle_delay: Duration,
    /// Issue the cluster-wide WADO purge when a node leaves the registry.
    pub clear_wado_cache: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            clear_wado_cache: false,
        }
    }
}

/// The external collaborators the engine drives.
#[derive(Clone)]
pub struct Adapters {
    pub remote: Arc<dyn RemoteActions>,
    pub incidents: Arc<dyn IncidentSink>,
    pub notifier: Arc<dyn Notifier>,
    pub upgrades: Arc<dyn UpgradeStatus>,
}

/// Result of one node's evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub node: String,
    pub outcome: EscalationOutcome,
    pub summary: String,
    pub transitions: Vec<TransitionRecord>,
}

pub struct EscalationEngine {
    adapters: Adapters,
    registry: Arc<DisabledRegistry>,
    severity: Severity,
    hints: OperatorHints,
    settings: EngineSettings,
}

impl EscalationEngine {
    /// `severity` is fixed for the whole run.
    pub fn new(
        adapters: Adapters,
        registry: Arc<DisabledRegistry>,
        severity: Severity,
        hints: OperatorHints,
    ) -> Self {
        Self {
            adapters,
            registry,
            severity,
            hints,
            settings: EngineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Evaluate one node to a terminal outcome.
    pub async fn evaluate(&self, node: &str) -> NodeReport {
        let at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let mut sm = NodeStateMachine::new(node);
        let mut rung = Rung::Initial;
        let mut mid_upgrade: Option<bool> = None;
        let mut probe: Option<ProbeResult> = None;

        step(&mut sm, NodeState::CheckDisabled, None);

        let outcome = loop {
            let entry = self.entry(node).await;
            let observation = Observation {
                registration: Registration::from_reason(entry.as_ref()),
                mid_upgrade,
                probe,
            };
            let action = decide(rung, &observation);
            debug!(node, %rung, %action, "ladder decision");

            match action {
                Action::Skip => {
                    let reason = entry.as_ref().map(DisabledReason::as_str);
                    step(&mut sm, NodeState::Skipped, reason);
                    if mid_upgrade.is_some() {
                        warn!(node, reason = reason.unwrap_or(""), "node disabled during evaluation, leaving it alone");
                    } else {
                        info!(node, reason = reason.unwrap_or(""), "node already disabled, skipping");
                    }
                    break EscalationOutcome::SkippedAlreadyDisabled;
                }
                Action::CheckUpgrade => {
                    step(&mut sm, NodeState::CheckUpgrade, None);
                    mid_upgrade = Some(self.check_upgrade(node).await);
                }
                Action::Probe => {
                    step(&mut sm, NodeState::Probe, Some(&rung.to_string()));
                    probe = Some(self.probe(node).await);
                }
                Action::Healthy => {
                    step(&mut sm, NodeState::Healthy, Some("ticket verified"));
                    if entry.is_some() {
                        self.release(node, &at).await;
                    }
                    break EscalationOutcome::Healthy;
                }
                Action::Restored(via) => {
                    step(&mut sm, NodeState::Restored, Some(&via.to_string()));
                    if entry.is_some() {
                        self.release(node, &at).await;
                    }
                    info!(node, %via, "node restored");
                    self.notify(node, messages::restored(node, &at, via), Some(MemeKind::Success))
                        .await;
                    break EscalationOutcome::Restored { via };
                }
                Action::Park => {
                    step(&mut sm, NodeState::Remediate, Some("park"));
                    self.park(node, &at, entry.as_ref()).await;
                    step(&mut sm, NodeState::Parked, None);
                    break EscalationOutcome::QuarantinedPrepare;
                }
                Action::Restart | Action::PurgeLocalCache => {
                    step(&mut sm, NodeState::Remediate, Some(&action.to_string()));
                    if entry.as_ref().is_some_and(DisabledReason::is_provisional) {
                        self.unpark(node).await;
                    }
                    self.remediate(node, &at, action).await;
                    debug!(node, delay = ?self.settings.settle_delay, "settling before re-probe");
                    tokio::time::sleep(self.settings.settle_delay).await;
                    if let Some(climbed) = next_rung(action) {
                        rung = climbed;
                    }
                    probe = None;
                }
                Action::Quarantine => {
                    step(&mut sm, NodeState::Remediate, Some("quarantine"));
                    let reason = self.quarantine(node, &at).await;
                    step(&mut sm, NodeState::Quarantined, Some(reason.as_str()));
                    break EscalationOutcome::QuarantinedFailure {
                        reason: reason.as_str().to_string(),
                    };
                }
            }
        };

        info!(node, outcome = %outcome, "node evaluated");
        let summary = sm.summary();
        NodeReport {
            node: node.to_string(),
            outcome,
            summary,
            transitions: sm.into_transitions(),
        }
    }

    /// Registry calls do blocking file I/O under a std mutex, so they run on
    /// the blocking pool.
    async fn registry_op<T, F>(&self, op: F) -> RegistryResult<T>
    where
        F: FnOnce(&DisabledRegistry) -> RegistryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || op(&registry))
            .await
            .map_err(|e| RegistryError::Io {
                path: self.registry.path().to_path_buf(),
                source: std::io::Error::other(format!("registry task join error: {e}")),
            })?
    }

    async fn entry(&self, node: &str) -> Option<DisabledReason> {
        let owned = node.to_string();
        match self.registry_op(move |r| Ok(r.reason(&owned))).await {
            Ok(entry) => entry,
            Err(e) => {
                error!(node, error = %e, "registry lookup failed, treating node as unregistered");
                None
            }
        }
    }

    async fn write_entry(&self, node: &str, reason: DisabledReason) -> RegistryResult<()> {
        let owned = node.to_string();
        self.registry_op(move |r| r.add(&owned, &reason)).await
    }

    async fn remove_entry(&self, node: &str) -> RegistryResult<Option<DisabledReason>> {
        let owned = node.to_string();
        self.registry_op(move |r| r.remove(&owned)).await
    }

    async fn check_upgrade(&self, node: &str) -> bool {
        match self.adapters.upgrades.is_mid_upgrade(node).await {
            Ok(upgrading) => upgrading,
            Err(e) => {
                warn!(node, error = %e, kind = %e.kind(), "upgrade status lookup failed, assuming not upgrading");
                false
            }
        }
    }

    async fn probe(&self, node: &str) -> ProbeResult {
        let ticket = match self.adapters.remote.issue_ticket(node).await {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(node, error = %e, kind = %e.kind(), "ticket issuance failed");
                return ProbeResult::NoTicket;
            }
        };
        match self.adapters.remote.verify_ticket(node, &ticket).await {
            Ok(true) => ProbeResult::Verified,
            Ok(false) => {
                warn!(node, "ticket not verified");
                ProbeResult::Unverified
            }
            Err(e) => {
                warn!(node, error = %e, kind = %e.kind(), "ticket verification failed");
                ProbeResult::Unverified
            }
        }
    }

    /// Restart or purge. A failed command is reported, then the ladder moves on.
    async fn remediate(&self, node: &str, at: &str, action: Action) {
        let (operation, result) = match action {
            Action::Restart => ("restart_service", self.adapters.remote.restart_service(node).await),
            _ => (
                "purge_local_cache",
                self.adapters.remote.purge_local_cache(node).await,
            ),
        };
        match result {
            Ok(output) => debug!(node, operation, stdout = %output.stdout.trim(), "remote command completed"),
            Err(e) => {
                self.report_connection_failure(node, at, operation, &e, None)
                    .await;
            }
        }
    }

    async fn park(&self, node: &str, at: &str, entry: Option<&DisabledReason>) {
        if entry.is_some_and(DisabledReason::is_provisional) {
            info!(node, "node still mid-upgrade, keeping PREPARE entry");
            return;
        }
        info!(node, "node failing during cluster upgrade, parking without remediation");
        if let Err(e) = self.write_entry(node, DisabledReason::Prepare).await {
            error!(node, error = %e, "failed to persist PREPARE entry");
        }
        self.notify(node, messages::parked(node, at), None).await;
    }

    /// Disable the node, open an incident and persist the quarantine.
    async fn quarantine(&self, node: &str, at: &str) -> DisabledReason {
        let incident = match self.adapters.remote.disable_service(node).await {
            Ok(_) => {
                let incident = self
                    .open_incident(messages::disabled_incident(node, at))
                    .await;
                let email = messages::disabled(
                    node,
                    at,
                    incident.as_deref(),
                    &self.hints.render(node),
                );
                self.notify(node, email, Some(MemeKind::Failure)).await;
                incident
            }
            Err(e) => {
                self.report_connection_failure(
                    node,
                    at,
                    "disable_service",
                    &e,
                    Some(MemeKind::Failure),
                )
                .await
            }
        };

        let reason = DisabledReason::from_incident(incident.as_deref());
        error!(node, reason = %reason, "node quarantined");
        if let Err(e) = self.write_entry(node, reason.clone()).await {
            error!(node, error = %e, "failed to persist quarantine entry");
        }
        reason
    }

    /// Drop a `PREPARE` entry without notice so the node is out of the
    /// registry before it is remediated.
    async fn unpark(&self, node: &str) {
        match self.remove_entry(node).await {
            Ok(Some(reason)) => info!(node, reason = %reason, "upgrade over, clearing entry before remediation"),
            Ok(None) => {}
            Err(e) => error!(node, error = %e, "failed to clear PREPARE entry"),
        }
    }

    /// Remove the registry entry and send the release email.
    async fn release(&self, node: &str, at: &str) {
        let removed = match self.remove_entry(node).await {
            Ok(Some(reason)) => reason,
            Ok(None) => return,
            Err(e) => {
                error!(node, error = %e, "failed to remove registry entry");
                return;
            }
        };
        info!(node, reason = %removed, "node released from registry");

        if self.settings.clear_wado_cache {
            if let Err(e) = self.adapters.remote.purge_cluster_cache(node).await {
                warn!(node, error = %e, kind = %e.kind(), "cluster WADO cache purge failed");
            }
        }
        self.notify(node, messages::released(node, at, &removed), None)
            .await;
    }

    /// Open an "unable to connect" incident and email it. Returns the
    /// incident id, if one was created.
    async fn report_connection_failure(
        &self,
        node: &str,
        at: &str,
        operation: &'static str,
        err: &AdapterError,
        meme: Option<MemeKind>,
    ) -> Option<String> {
        warn!(node, operation, error = %err, kind = %err.kind(), "remote command failed");
        let incident = self
            .open_incident(messages::connection_failure_incident(node, at))
            .await;
        let email = messages::connection_failure(node, at, incident.as_deref(), &err.to_string());
        self.notify(node, email, meme).await;
        incident
    }

    async fn open_incident(&self, text: IncidentText) -> Option<String> {
        let request = IncidentRequest {
            summary: text.summary,
            description: text.description,
            severity: self.severity.clone(),
            external_id: Uuid::new_v4().to_string(),
        };
        match self.adapters.incidents.create_incident(&request).await {
            Ok(id) if !id.trim().is_empty() => Some(id),
            Ok(_) => {
                warn!(summary = %request.summary, "incident system returned an empty id");
                None
            }
            Err(e) => {
                warn!(summary = %request.summary, error = %e, "incident creation failed");
                None
            }
        }
    }

    async fn notify(&self, node: &str, email: Email, meme: Option<MemeKind>) {
        let notification = Notification {
            node: node.to_string(),
            subject: email.subject,
            body: email.body,
            meme,
        };
        if let Err(e) = self.adapters.notifier.send(&notification).await {
            warn!(node, subject = %notification.subject, error = %e, "notification not delivered");
        }
    }
}

fn step(sm: &mut NodeStateMachine, to: NodeState, reason: Option<&str>) {
    if let Err(e) = sm.advance(to, reason) {
        error!(node = sm.node(), error = %e, "state machine rejected transition");
    }
}
