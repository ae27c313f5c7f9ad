/*!
Upstream side of the relay: listing today's threats and resolving details
*/

use std::time::Duration;

use abnormal_client::{AbnormalClient, ApiError, ThreatDetail, ThreatSummary};
use async_trait::async_trait;

use crate::core::config::UpstreamConfig;

/// Where threats come from
#[async_trait]
pub trait ThreatSource: Send + Sync {
    /// Every threat received today, in listing order. Listing failures
    /// shorten the result rather than raising.
    async fn fetch_threats(&self) -> Vec<ThreatSummary>;

    /// Full record for one threat, `None` if it is unavailable right now
    async fn fetch_details(&self, threat_id: &str) -> Option<ThreatDetail>;
}

#[async_trait]
impl ThreatSource for AbnormalClient {
    async fn fetch_threats(&self) -> Vec<ThreatSummary> {
        AbnormalClient::fetch_threats(self).await
    }

    async fn fetch_details(&self, threat_id: &str) -> Option<ThreatDetail> {
        AbnormalClient::fetch_details(self, threat_id).await
    }
}

pub(crate) fn user_agent() -> String {
    format!("threat-relay/{}", env!("CARGO_PKG_VERSION"))
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent())
        .build()
}

/// Build the threats API client from configuration
pub fn build_client(config: &UpstreamConfig) -> Result<AbnormalClient, ApiError> {
    let http = http_client(config.request_timeout)?;
    AbnormalClient::with_http_client(&config.base_url, config.access_token.expose(), http)
}
