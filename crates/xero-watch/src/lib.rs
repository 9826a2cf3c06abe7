//! Xero ticketing health monitor
//!
//! One pass per invocation: every configured node is probed (ticket issue +
//! verify) and, when failing, walked up the remediation ladder from
//! `xero_escalation`. This crate holds the I/O side:
//! - `config`: the TOML configuration object
//! - `adapters`: ticket HTTP, ssh, incident API, SMTP, cluster database
//! - `engine`: executes ladder actions for one node
//! - `runner`: concurrent fan-out across nodes

pub mod adapters;
pub mod config;
pub mod engine;
pub mod errors;
pub mod messages;
pub mod runner;
pub mod telemetry;

pub use config::WatchConfig;
pub use engine::{Adapters, EngineSettings, EscalationEngine, NodeReport};
pub use errors::{AdapterError, ErrorKind};
pub use runner::NodeRunner;
