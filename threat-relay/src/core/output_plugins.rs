/*!
Downstream side of the relay: delivering threat messages to the ingestion endpoint
*/

use std::time::Duration;

use abnormal_client::ThreatDetail;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::core::config::{DestinationConfig, Secret};
use crate::core::threat_source::http_client;

/// Receives threat details that have not been delivered yet
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Name of the sink, for logs
    fn name(&self) -> &'static str;

    /// Deliver one threat. `true` only when the receiver accepted it;
    /// failures are logged here and reported as `false`.
    async fn send(&self, detail: &ThreatDetail) -> bool;
}

/// POSTs the threat's messages to an HTTP endpoint with a static
/// `Authorization` header
pub struct HttpDeliverySink {
    url: String,
    api_key_class: Secret,
    class: Option<String>,
    client: reqwest::Client,
}

impl HttpDeliverySink {
    pub fn new(url: impl Into<String>, api_key_class: Secret, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            api_key_class,
            class: None,
            client,
        }
    }

    pub fn from_config(config: &DestinationConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let sink = Self::new(
            config.url.clone(),
            config.api_key_class.clone(),
            http_client(timeout)?,
        );
        Ok(match &config.class {
            Some(class) => sink.with_class(class.clone()),
            None => sink,
        })
    }

    /// Wrap payloads as `{"class": <class>, "rawmsg": <messages>}`
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    /// Request body for `detail`
    pub fn payload(&self, detail: &ThreatDetail) -> Value {
        match &self.class {
            Some(class) => json!({ "class": class, "rawmsg": detail.messages }),
            None => detail.messages.clone(),
        }
    }
}

#[async_trait]
impl DeliverySink for HttpDeliverySink {
    fn name(&self) -> &'static str {
        "HTTP"
    }

    async fn send(&self, detail: &ThreatDetail) -> bool {
        let threat_id = detail.threat_id.as_str();

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::AUTHORIZATION, self.api_key_class.expose())
            .json(&self.payload(detail))
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                error!(threat_id, "Failed to deliver threat: {}", e);
                return false;
            }
        };

        let status = response.status();
        if status.is_success() {
            info!(threat_id, "Threat delivered");
            return true;
        }

        let body = response.text().await.unwrap_or_default();
        error!(
            threat_id,
            status = status.as_u16(),
            body = %body,
            "Destination rejected threat"
        );
        false
    }
}
