/*!
Relay today's Abnormal Security threats to a downstream ingestion endpoint,
remembering which ones were already delivered.
*/

pub mod core;

pub use crate::core::{
    config::{RawConfig, RelayConfig},
    output_plugins::{DeliverySink, HttpDeliverySink},
    state_manager::{IdStore, JsonIdStore, SqliteIdStore, StoreError},
    threat_source::ThreatSource,
    tracker::{CycleReport, Pacing, ThreatRelay},
};
