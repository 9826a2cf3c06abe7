//! Node Runner: JoinSet fan-out of the engine across configured nodes.
//!
//! One task per node, at most `max_parallel` in flight. A node that panics
//! loses only its own report; siblings run to completion.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn, Instrument};

use crate::engine::{EscalationEngine, NodeReport};

pub struct NodeRunner {
    engine: Arc<EscalationEngine>,
    max_parallel: usize,
}

impl NodeRunner {
    pub fn new(engine: Arc<EscalationEngine>, max_parallel: usize) -> Self {
        Self {
            engine,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Evaluate every node once. Reports come back in configuration order.
    /// A node listed more than once is evaluated a single time.
    pub async fn run(&self, nodes: &[String]) -> Vec<NodeReport> {
        let sem = Arc::new(Semaphore::new(self.max_parallel));
        let mut join_set: JoinSet<NodeReport> = JoinSet::new();
        let mut seen = HashSet::new();

        info!(nodes = nodes.len(), max_parallel = self.max_parallel, "starting run");
        for node in nodes {
            if !seen.insert(node.to_ascii_lowercase()) {
                warn!(node = %node, "node listed twice, evaluating it once");
                continue;
            }
            let sem = sem.clone();
            let engine = self.engine.clone();
            let node = node.clone();
            let span = tracing::info_span!("node", node = %node);

            join_set.spawn(
                async move {
                    // The semaphore is never closed; a failed acquire just
                    // means running unthrottled.
                    let _permit = sem.acquire_owned().await.ok();
                    engine.evaluate(&node).await
                }
                .instrument(span),
            );
        }

        let mut reports = Vec::with_capacity(seen.len());
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok(report) => reports.push(report),
                Err(e) => warn!(error = %e, "node evaluation task panicked"),
            }
        }

        reports.sort_by_key(|r| nodes.iter().position(|n| n == &r.node));
        reports
    }
}
