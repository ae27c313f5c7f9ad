/*!
Wire models for the threats API
*/

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of the threat listing. Only the id is used, the remaining
/// fields are kept as they came.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatSummary {
    #[serde(rename = "threatId")]
    pub threat_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ThreatSummary {
    pub fn new(threat_id: impl Into<String>) -> Self {
        Self {
            threat_id: threat_id.into(),
            extra: Map::new(),
        }
    }
}

/// Full record for a single threat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatDetail {
    #[serde(rename = "threatId")]
    pub threat_id: String,
    /// Messages attached to the threat. This is what gets forwarded downstream.
    pub messages: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One page of `GET /threats`
#[derive(Debug, Clone, Deserialize)]
pub struct ThreatPage {
    #[serde(default)]
    pub threats: Vec<ThreatSummary>,
    #[serde(rename = "nextPageNumber", default)]
    pub next_page_number: Option<Value>,
}

impl ThreatPage {
    /// Page to request next. A missing, null, zero or otherwise falsy
    /// `nextPageNumber` means this was the last page.
    pub fn next_page(&self) -> Option<u64> {
        match self.next_page_number.as_ref()? {
            Value::Number(n) => n.as_u64().filter(|&page| page > 0),
            Value::String(s) => s.trim().parse::<u64>().ok().filter(|&page| page > 0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(next: Value) -> ThreatPage {
        serde_json::from_value(json!({ "threats": [], "nextPageNumber": next })).unwrap()
    }

    #[test]
    fn next_page_treats_falsy_values_as_last_page() {
        assert_eq!(page(json!(null)).next_page(), None);
        assert_eq!(page(json!(0)).next_page(), None);
        assert_eq!(page(json!(false)).next_page(), None);
        assert_eq!(page(json!("")).next_page(), None);
        assert_eq!(page(json!(3)).next_page(), Some(3));

        let missing: ThreatPage = serde_json::from_value(json!({ "threats": [] })).unwrap();
        assert_eq!(missing.next_page(), None);
    }

    #[test]
    fn summary_keeps_unknown_fields() {
        let summary: ThreatSummary = serde_json::from_value(json!({
            "threatId": "abc",
            "attackType": "Phishing"
        }))
        .unwrap();

        assert_eq!(summary.threat_id, "abc");
        assert_eq!(summary.extra.get("attackType"), Some(&json!("Phishing")));
    }

    #[test]
    fn detail_requires_messages() {
        let missing = serde_json::from_value::<ThreatDetail>(json!({ "threatId": "abc" }));
        assert!(missing.is_err());

        let detail: ThreatDetail = serde_json::from_value(json!({
            "threatId": "abc",
            "messages": [{ "subject": "hi" }]
        }))
        .unwrap();
        assert_eq!(detail.messages, json!([{ "subject": "hi" }]));
    }
}
