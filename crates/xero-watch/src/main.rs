use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use xero_escalation::DisabledRegistry;
use xero_watch::adapters::email::SmtpNotifier;
use xero_watch::adapters::incident::ServiceNowClient;
use xero_watch::adapters::remote::XeroRemote;
use xero_watch::adapters::upgrade::{ClusterDb, NoUpgradeStatus};
use xero_watch::adapters::UpgradeStatus;
use xero_watch::config::DEFAULT_CONFIG_FILE;
use xero_watch::engine::DEFAULT_SETTLE_DELAY;
use xero_watch::messages::OperatorHints;
use xero_watch::{
    telemetry, Adapters, EngineSettings, EscalationEngine, NodeRunner, WatchConfig,
};

/// Probe every Xero node once and remediate the failing ones.
#[derive(Debug, Parser)]
#[command(name = "xero-watch", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "XERO_WATCH_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = WatchConfig::load(&cli.config)?;
    telemetry::init(&config.logging)?;

    let severity = config
        .incident
        .business_hours()
        .context("Invalid business hours")?
        .severity_at(Local::now().naive_local());
    info!(
        config = %cli.config.display(),
        nodes = config.xero.nodes.len(),
        urgency = %severity.urgency,
        impact = %severity.impact,
        "xero-watch starting"
    );

    let upgrades: Arc<dyn UpgradeStatus> = match &config.cluster_db {
        Some(db) => Arc::new(ClusterDb::new(db.clone())),
        None => {
            warn!("no [cluster_db] configured, upgrade status checks disabled");
            Arc::new(NoUpgradeStatus)
        }
    };
    let adapters = Adapters {
        remote: Arc::new(XeroRemote::new(&config.xero)?),
        incidents: Arc::new(ServiceNowClient::new(config.incident.clone())?),
        notifier: Arc::new(SmtpNotifier::new(&config.email, &config.meme)?),
        upgrades,
    };

    let registry = Arc::new(DisabledRegistry::new(&config.xero.disabled_servers_file));
    let engine = EscalationEngine::new(
        adapters,
        registry,
        severity,
        OperatorHints::from_config(&config.xero),
    )
    .with_settings(EngineSettings {
        settle_delay: DEFAULT_SETTLE_DELAY,
        clear_wado_cache: config.xero.clear_wado_cache,
    });

    let runner = NodeRunner::new(Arc::new(engine), config.xero.parallelism());
    let reports = runner.run(&config.xero.nodes).await;

    for report in &reports {
        info!(node = %report.node, outcome = %report.outcome, path = %report.summary, "node report");
    }
    let in_service = reports.iter().filter(|r| r.outcome.in_service()).count();
    info!(
        evaluated = reports.len(),
        in_service,
        "run complete"
    );

    Ok(())
}
