//! Remediation Ladder: deterministic per-node decision function
//!
//! Decides the next action for one node from what is currently known about
//! it. No I/O happens here: the caller gathers observations (registry entry,
//! upgrade status, probe result), asks [`decide`] for an [`Action`], performs
//! it, and asks again until a terminal action comes back.
//!
//! # Ladder
//!
//! ```text
//! registry entry (not PREPARE) at start ─────────────────▶ Skip
//! upgrade status unknown ────────────────────────────────▶ CheckUpgrade
//! no probe for this rung ────────────────────────────────▶ Probe
//! registry entry (not PREPARE) and probe failed ─────────▶ Skip
//!
//! Initial probe verified ────────────────────────────────▶ Healthy
//! Initial probe failed, mid-upgrade ─────────────────────▶ Park
//! Initial probe failed ──────────────────────────────────▶ Restart
//!     AfterRestart probe verified ───────────────────────▶ Restored
//!     AfterRestart probe failed ─────────────────────────▶ PurgeLocalCache
//!         AfterPurge probe verified ─────────────────────▶ Restored
//!         AfterPurge probe failed ───────────────────────▶ Quarantine
//! ```
//!
//! A missing ticket and an unverified ticket climb the ladder identically.
//! Each rung gets exactly one re-probe.
//!
//! An entry written by another writer after the node was first checked does
//! not stop the probe. It stops the next remediation step; a verified probe
//! clears it instead.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::registry::DisabledReason;

/// Result of one issue-then-verify probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeResult {
    /// A ticket was issued and the verification endpoint accepted it.
    Verified,
    /// A ticket was issued but verification did not succeed.
    Unverified,
    /// No ticket could be obtained.
    NoTicket,
}

impl ProbeResult {
    pub fn is_verified(self) -> bool {
        self == Self::Verified
    }
}

/// How far up the ladder a node has climbed during this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rung {
    /// No remediation attempted yet.
    Initial,
    /// The service was restarted.
    AfterRestart,
    /// The host-local cache was purged.
    AfterPurge,
}

impl fmt::Display for Rung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::AfterRestart => write!(f, "after_restart"),
            Self::AfterPurge => write!(f, "after_purge"),
        }
    }
}

/// Registry standing of a node as seen right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Registration {
    /// No entry.
    Active,
    /// Provisional `PREPARE` entry.
    Parked,
    /// Quarantined under an incident or the ticket-failure sentinel.
    Quarantined,
}

impl Registration {
    pub fn from_reason(reason: Option<&DisabledReason>) -> Self {
        match reason {
            None => Self::Active,
            Some(DisabledReason::Prepare) => Self::Parked,
            Some(_) => Self::Quarantined,
        }
    }
}

/// Everything the ladder needs to know about a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub registration: Registration,
    /// `None` until the upgrade-status lookup has been made.
    pub mid_upgrade: Option<bool>,
    /// `None` until the current rung has been probed.
    pub probe: Option<ProbeResult>,
}

impl Observation {
    pub fn new(registration: Registration) -> Self {
        Self {
            registration,
            mid_upgrade: None,
            probe: None,
        }
    }
}

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Terminal: node is quarantined, leave it alone.
    Skip,
    /// Look up whether the node is mid cluster upgrade.
    CheckUpgrade,
    /// Issue a ticket and verify it.
    Probe,
    /// Terminal: first probe passed.
    Healthy,
    /// Terminal: a re-probe passed after the given rung.
    Restored(Rung),
    /// Terminal: record the provisional `PREPARE` entry.
    Park,
    /// Restart the remote service, settle, then re-probe.
    Restart,
    /// Purge the host-local cache, settle, then re-probe.
    PurgeLocalCache,
    /// Terminal: disable the service, open an incident, persist the entry.
    Quarantine,
}

impl Action {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Skip | Self::Healthy | Self::Restored(_) | Self::Park | Self::Quarantine
        )
    }

    /// Whether the action changes the remote node.
    pub fn is_remediation(self) -> bool {
        matches!(self, Self::Restart | Self::PurgeLocalCache | Self::Quarantine)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::CheckUpgrade => write!(f, "check_upgrade"),
            Self::Probe => write!(f, "probe"),
            Self::Healthy => write!(f, "healthy"),
            Self::Restored(rung) => write!(f, "restored({rung})"),
            Self::Park => write!(f, "park"),
            Self::Restart => write!(f, "restart"),
            Self::PurgeLocalCache => write!(f, "purge_local_cache"),
            Self::Quarantine => write!(f, "quarantine"),
        }
    }
}

/// The ladder. Pure and total over its inputs.
pub fn decide(rung: Rung, observation: &Observation) -> Action {
    let quarantined = observation.registration == Registration::Quarantined;

    let Some(mid_upgrade) = observation.mid_upgrade else {
        if quarantined {
            return Action::Skip;
        }
        return Action::CheckUpgrade;
    };

    let Some(probe) = observation.probe else {
        return Action::Probe;
    };

    if probe.is_verified() {
        return match rung {
            Rung::Initial => Action::Healthy,
            climbed => Action::Restored(climbed),
        };
    }

    if quarantined {
        return Action::Skip;
    }

    match rung {
        Rung::Initial if mid_upgrade => Action::Park,
        Rung::Initial => Action::Restart,
        Rung::AfterRestart => Action::PurgeLocalCache,
        Rung::AfterPurge => Action::Quarantine,
    }
}

/// The rung a node is on after performing `action`, if it climbs.
pub fn next_rung(action: Action) -> Option<Rung> {
    match action {
        Action::Restart => Some(Rung::AfterRestart),
        Action::PurgeLocalCache => Some(Rung::AfterPurge),
        _ => None,
    }
}
