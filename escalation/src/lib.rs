//! Xero escalation core
//!
//! Deterministic pieces of the Xero ticketing health monitor:
//! - `ladder`: the per-node remediation decision function
//! - `state_machine`: typed node states with an auditable transition log
//! - `registry`: the persistent disabled-node registry
//! - `severity`: business-hours urgency/impact selection
//!
//! Nothing in this crate talks to the network. The runtime crate gathers
//! observations, asks the ladder what to do, and carries it out.

pub mod ladder;
pub mod outcome;
pub mod registry;
pub mod severity;
pub mod state_machine;

pub use ladder::{decide, next_rung, Action, Observation, ProbeResult, Registration, Rung};
pub use outcome::EscalationOutcome;
pub use registry::{
    DisabledMap, DisabledReason, DisabledRegistry, RegistryError, RegistryResult, PREPARE,
    TICKET_CREATION_FAILED,
};
pub use severity::{BusinessHours, Severity, SeverityError};
pub use state_machine::{IllegalTransition, NodeState, NodeStateMachine, TransitionRecord};
