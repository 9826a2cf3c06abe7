//! Node State Machine: explicit states and legal transition guards.
//!
//! Provides a typed state model for one node's evaluation so that:
//! 1. Every state transition is auditable and logged.
//! 2. Illegal transitions are rejected by `advance()`.
//! 3. The run summary can show exactly how a node reached its outcome.
//!
//! The engine calls `advance()` as it executes ladder actions. Each call
//! validates the transition is legal and records it in the transition log.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The set of per-node states.
///
/// Every evaluation starts at `Start` and ends in one of the five terminal
/// states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Start,
    /// Reading the disabled-node registry.
    CheckDisabled,
    /// Asking the cluster database whether the node is mid-upgrade.
    CheckUpgrade,
    /// Issuing and verifying a ticket.
    Probe,
    /// Running a remediation step (restart, purge, park, disable).
    Remediate,
    /// First probe passed (terminal).
    Healthy,
    /// A re-probe passed after remediation (terminal).
    Restored,
    /// Parked under `PREPARE` (terminal).
    Parked,
    /// Disabled with an incident (terminal).
    Quarantined,
    /// Already quarantined, nothing done (terminal).
    Skipped,
}

impl NodeState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Healthy | Self::Restored | Self::Parked | Self::Quarantined | Self::Skipped
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::CheckDisabled => write!(f, "CheckDisabled"),
            Self::CheckUpgrade => write!(f, "CheckUpgrade"),
            Self::Probe => write!(f, "Probe"),
            Self::Remediate => write!(f, "Remediate"),
            Self::Healthy => write!(f, "Healthy"),
            Self::Restored => write!(f, "Restored"),
            Self::Parked => write!(f, "Parked"),
            Self::Quarantined => write!(f, "Quarantined"),
            Self::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Legal transitions between node states.
///
/// ```text
/// Start → CheckDisabled
/// CheckDisabled → CheckUpgrade | Skipped
/// CheckUpgrade → Probe | Skipped
/// Probe → Healthy | Restored | Remediate | Skipped
/// Remediate → Probe | Parked | Quarantined | Skipped
/// ```
fn is_legal_transition(from: NodeState, to: NodeState) -> bool {
    use NodeState::*;

    matches!(
        (from, to),
        (Start, CheckDisabled)
            | (CheckDisabled, CheckUpgrade)
            | (CheckDisabled, Skipped)
            | (CheckUpgrade, Probe)
            | (CheckUpgrade, Skipped)
            | (Probe, Healthy)
            | (Probe, Restored)
            | (Probe, Remediate)
            // Registry re-checked after the probe, before touching the node
            | (Probe, Skipped)
            // Re-probe after restart or purge
            | (Remediate, Probe)
            | (Remediate, Parked)
            | (Remediate, Quarantined)
            | (Remediate, Skipped)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: NodeState,
    pub to: NodeState,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: NodeState,
    pub to: NodeState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// The per-node state machine.
///
/// Tracks the current state, enforces legal transitions, and keeps the
/// transition log for the run summary.
#[derive(Debug)]
pub struct NodeStateMachine {
    node: String,
    current: NodeState,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl NodeStateMachine {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            current: NodeState::Start,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn current(&self) -> NodeState {
        self.current
    }

    /// Attempt to advance to the next state.
    ///
    /// Returns `Err(IllegalTransition)` if the transition would violate the
    /// state graph; the current state is left unchanged.
    pub fn advance(&mut self, to: NodeState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(
            node = %self.node,
            from = %self.current,
            to = %to,
            reason = reason.unwrap_or(""),
            "node state transition"
        );

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Consume the machine, keeping only its log.
    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    /// One-line history, e.g. `Start → Healthy (12ms) [CheckDisabled → ...]`.
    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let head = format!(
            "{} → {} ({}ms)",
            NodeState::Start,
            self.current,
            self.created_at.elapsed().as_millis(),
        );
        if states.is_empty() {
            head
        } else {
            format!("{head} [{}]", states.join(" → "))
        }
    }
}
