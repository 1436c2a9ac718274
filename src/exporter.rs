use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::{
    classify::{self, AnnotationKeys},
    metrics::Metrics,
    quorum::QuorumEngine,
    scan::PodScanner,
};

/// One scan→classify→decide→publish pipeline instance. The engine state it
/// carries is touched by nothing else.
pub struct Exporter {
    scanner: PodScanner,
    keys: AnnotationKeys,
    engine: QuorumEngine,
    metrics: Metrics,
}

impl Exporter {
    pub fn new(
        scanner: PodScanner,
        keys: AnnotationKeys,
        switch_fraction: f64,
        metrics: Metrics,
    ) -> Self {
        Self {
            scanner,
            keys,
            engine: QuorumEngine::new(switch_fraction),
            metrics,
        }
    }

    pub fn engine(&self) -> &QuorumEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Runs one poll cycle to completion. A failed pod list fails the whole
    /// cycle: nothing is classified, no decision runs, no state moves.
    pub async fn run_cycle(&mut self) -> Result<()> {
        let records = match self.scanner.scan().await {
            Ok(records) => records,
            Err(err) => {
                self.metrics.inc_scan_errors();
                return Err(err);
            }
        };

        let classified = classify::classify(&records, &self.keys);
        for member in &classified.members {
            self.metrics.set_pod_power(member);
        }
        for decision in self.engine.decide(&classified.per_node) {
            debug!(
                node = %decision.node,
                total = decision.total,
                outcome = ?decision.outcome,
                "node aggregate"
            );
            self.metrics.set_node_power(&decision.node, decision.total);
        }
        self.metrics
            .set_last_scan_timestamp(Utc::now().timestamp_millis() as f64 / 1000.0);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ExporterHandle {
    shutdown: Arc<tokio::sync::Mutex<Option<tokio::sync::oneshot::Sender<()>>>>,
}

impl ExporterHandle {
    pub async fn shutdown(&self) {
        let tx = self.shutdown.lock().await.take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }
}

pub fn spawn_exporter(mut exporter: Exporter, interval: Duration) -> ExporterHandle {
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = ExporterHandle {
        shutdown: Arc::new(tokio::sync::Mutex::new(Some(shutdown_tx))),
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = exporter.run_cycle().await {
                        warn!(%err, "scan cycle failed, keeping previous totals");
                    }
                }
                _ = &mut shutdown_rx => break,
            }
        }
    });

    handle
}
