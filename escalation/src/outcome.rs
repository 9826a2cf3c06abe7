//! Per-node, per-run terminal classification.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ladder::Rung;

/// Exactly one of these is produced for every node evaluated in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum EscalationOutcome {
    /// First probe passed.
    Healthy,
    /// Failed, then recovered after the given rung.
    Restored { via: Rung },
    /// Failed while mid-upgrade; parked under `PREPARE`.
    QuarantinedPrepare,
    /// Every rung failed; quarantined under `reason`.
    QuarantinedFailure { reason: String },
    /// Already quarantined before this run looked at it.
    SkippedAlreadyDisabled,
}

impl EscalationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Restored { .. } => "restored",
            Self::QuarantinedPrepare => "quarantined-prepare",
            Self::QuarantinedFailure { .. } => "quarantined-failure",
            Self::SkippedAlreadyDisabled => "skipped-already-disabled",
        }
    }

    /// Whether the node is in service at the end of the run.
    pub fn in_service(&self) -> bool {
        matches!(self, Self::Healthy | Self::Restored { .. })
    }
}

impl fmt::Display for EscalationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Restored { via } => write!(f, "restored ({via})"),
            Self::QuarantinedFailure { reason } => write!(f, "quarantined-failure ({reason})"),
            other => f.write_str(other.label()),
        }
    }
}
