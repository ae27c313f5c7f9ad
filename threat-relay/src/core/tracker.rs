/*!
Poll loop that relays new threats downstream
*/

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::core::{
    config::RelayConfig,
    output_plugins::{DeliverySink, HttpDeliverySink},
    state_manager::{self, IdStore, StoreError},
    threat_source::{self, ThreatSource},
};

/// Timing of the loop
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    /// Sleep between cycles
    pub poll_interval: Duration,
    /// Pause after each successful delivery
    pub delivery_delay: Duration,
}

impl Pacing {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            delivery_delay: config.destination.delivery_delay,
        }
    }
}

/// What happened during one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Threats returned by the listing
    pub listed: usize,
    /// Already delivered in an earlier cycle or run
    pub skipped_known: usize,
    /// Details could not be fetched; retried next cycle
    pub detail_missing: usize,
    /// The sink refused or failed; retried next cycle
    pub delivery_failed: usize,
    /// Delivered and recorded
    pub delivered: usize,
}

/// Lists today's threats, delivers the ones not seen before and records
/// each delivery before moving on.
pub struct ThreatRelay {
    source: Box<dyn ThreatSource>,
    sink: Box<dyn DeliverySink>,
    store: Box<dyn IdStore>,
    processed: HashSet<String>,
    pacing: Pacing,
}

impl ThreatRelay {
    /// Create a relay, loading previously processed ids from `store`
    pub fn new(
        source: Box<dyn ThreatSource>,
        sink: Box<dyn DeliverySink>,
        mut store: Box<dyn IdStore>,
        pacing: Pacing,
    ) -> Result<Self, StoreError> {
        let processed = store.load()?;
        info!(
            "Loaded {} processed threat ids from {} store",
            processed.len(),
            store.name()
        );

        Ok(Self {
            source,
            sink,
            store,
            processed,
            pacing,
        })
    }

    /// Wire up the HTTP client, HTTP sink and configured store
    pub fn from_config(config: &RelayConfig) -> anyhow::Result<Self> {
        let client = threat_source::build_client(&config.upstream)
            .context("Failed to build threats API client")?;
        let sink =
            HttpDeliverySink::from_config(&config.destination, config.upstream.request_timeout)
                .context("Failed to build delivery client")?;
        let store = state_manager::open_store(&config.state)
            .with_context(|| format!("Failed to open state store {:?}", config.state.path))?;

        Self::new(Box::new(client), Box::new(sink), store, Pacing::from_config(config))
            .with_context(|| format!("Failed to load processed ids from {:?}", config.state.path))
    }

    pub fn is_processed(&self, threat_id: &str) -> bool {
        self.processed.contains(threat_id)
    }

    pub fn processed(&self) -> &HashSet<String> {
        &self.processed
    }

    /// Run one poll cycle.
    ///
    /// Only a failure to persist a successful delivery is an error; every
    /// upstream or downstream failure just leaves that threat for the next
    /// cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, StoreError> {
        info!("Polling for new threats...");
        let threats = self.source.fetch_threats().await;

        let mut report = CycleReport {
            listed: threats.len(),
            ..CycleReport::default()
        };

        for threat in threats {
            let threat_id = threat.threat_id;
            if self.processed.contains(&threat_id) {
                report.skipped_known += 1;
                continue;
            }

            let Some(detail) = self.source.fetch_details(&threat_id).await else {
                report.detail_missing += 1;
                continue;
            };

            if !self.sink.send(&detail).await {
                report.delivery_failed += 1;
                continue;
            }

            self.processed.insert(threat_id.clone());
            self.store.save(&self.processed)?;
            report.delivered += 1;
            debug!(threat_id = %threat_id, total = self.processed.len(), "Marked threat processed");

            if !self.pacing.delivery_delay.is_zero() {
                sleep(self.pacing.delivery_delay).await;
            }
        }

        info!(
            listed = report.listed,
            delivered = report.delivered,
            skipped = report.skipped_known,
            detail_missing = report.detail_missing,
            delivery_failed = report.delivery_failed,
            "Poll cycle finished"
        );
        Ok(report)
    }

    /// Poll forever. Returns only if the store cannot be written.
    pub async fn run(&mut self) -> Result<(), StoreError> {
        info!(
            "Relaying threats to {} every {} seconds",
            self.sink.name(),
            self.pacing.poll_interval.as_secs()
        );

        loop {
            self.run_cycle().await?;
            info!(
                "Waiting {} seconds before the next poll...",
                self.pacing.poll_interval.as_secs()
            );
            sleep(self.pacing.poll_interval).await;
        }
    }
}
