/*!
HTTP client for the threats listing and detail endpoints
*/

use reqwest::{StatusCode, Url};
use tracing::{debug, error, info};

use crate::{
    error::ApiError,
    models::{ThreatDetail, ThreatPage, ThreatSummary},
    window::TimeWindow,
};

pub const DEFAULT_BASE_URL: &str = "https://api.abnormalplatform.com/v1";

/// Talks to the threats API with a bearer token
#[derive(Debug, Clone)]
pub struct AbnormalClient {
    base_url: Url,
    access_token: String,
    http: reqwest::Client,
}

impl AbnormalClient {
    pub fn new(base_url: &str, access_token: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_http_client(base_url, access_token, reqwest::Client::new())
    }

    /// Build a client on top of a preconfigured `reqwest::Client`
    /// (timeouts, user agent, proxies).
    pub fn with_http_client(
        base_url: &str,
        access_token: impl Into<String>,
        http: reqwest::Client,
    ) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a base url".to_string(),
            });
        }

        Ok(Self {
            base_url,
            access_token: access_token.into(),
            http,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "not a base url".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Fetch a single page of the threat listing
    pub async fn list_page(&self, page: u64, window: &TimeWindow) -> Result<ThreatPage, ApiError> {
        let mut url = self.endpoint(&["threats"])?;
        url.query_pairs_mut()
            .append_pair("pageNumber", &page.to_string())
            .append_pair("filter", &window.filter_expression());

        self.get_json(url).await
    }

    /// All threats received today (UTC), in listing order
    pub async fn fetch_threats(&self) -> Vec<ThreatSummary> {
        self.fetch_threats_in(&TimeWindow::today()).await
    }

    /// Walk every page for `window`. A failed page ends the walk and whatever
    /// was collected so far is returned; the next poll re-lists the same day.
    pub async fn fetch_threats_in(&self, window: &TimeWindow) -> Vec<ThreatSummary> {
        let mut threats = Vec::new();
        let mut page = 1;

        loop {
            let result = match self.list_page(page, window).await {
                Ok(result) => result,
                Err(e) => {
                    error!(page, status = ?e.status(), "Failed to fetch threats: {}", e);
                    break;
                }
            };

            debug!(page, count = result.threats.len(), "Fetched threat page");
            let next = result.next_page();
            threats.extend(result.threats);

            match next {
                Some(next) if next > page => page = next,
                Some(next) => {
                    error!(page, next, "Listing pointed back to an earlier page, stopping");
                    break;
                }
                None => break,
            }
        }

        info!("Listed {} threats for {}", threats.len(), window.filter_expression());
        threats
    }

    /// `GET /threats/{id}`
    pub async fn get_threat(&self, threat_id: &str) -> Result<ThreatDetail, ApiError> {
        let url = self.endpoint(&["threats", threat_id])?;
        self.get_json(url).await
    }

    /// Details for one threat, or `None` if they could not be fetched this time
    pub async fn fetch_details(&self, threat_id: &str) -> Option<ThreatDetail> {
        match self.get_threat(threat_id).await {
            Ok(detail) => Some(detail),
            Err(e) => {
                error!(
                    threat_id,
                    status = ?e.status(),
                    "Failed to fetch threat details: {}",
                    e
                );
                None
            }
        }
    }
}
