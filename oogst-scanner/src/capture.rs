use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of one intercepted response. Serialized as either a `data` or a
/// `raw_text` key next to the response metadata, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CapturedBody {
    #[serde(rename = "data")]
    Parsed(Value),
    #[serde(rename = "raw_text")]
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub response_url: String,
    pub status: u16,
    #[serde(flatten)]
    pub body: CapturedBody,
}

impl CapturedResponse {
    /// Decode `text` as JSON, falling back to keeping the raw text.
    pub fn decode(response_url: String, status: u16, text: String) -> Self {
        let body = match serde_json::from_str::<Value>(&text) {
            Ok(value) => CapturedBody::Parsed(value),
            Err(_) => CapturedBody::Raw(text),
        };
        Self {
            response_url,
            status,
            body,
        }
    }

    pub fn parsed_json(&self) -> Option<&Value> {
        match &self.body {
            CapturedBody::Parsed(value) => Some(value),
            CapturedBody::Raw(_) => None,
        }
    }

    pub fn raw_text(&self) -> Option<&str> {
        match &self.body {
            CapturedBody::Parsed(_) => None,
            CapturedBody::Raw(text) => Some(text),
        }
    }
}

/// Everything observed during one detail-page visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureBundle {
    pub detail_url: String,
    pub timestamp: DateTime<Utc>,
    pub captured: Vec<CapturedResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CaptureBundle {
    pub fn new(detail_url: String, captured: Vec<CapturedResponse>) -> Self {
        Self {
            detail_url,
            timestamp: Utc::now(),
            captured,
            error: None,
        }
    }

    pub fn with_error(detail_url: String, error: String) -> Self {
        Self {
            detail_url,
            timestamp: Utc::now(),
            captured: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_keeps_raw_text_on_invalid_json() {
        let captured = CapturedResponse::decode(
            "https://x/api/1".to_string(),
            200,
            "{not json at all".to_string(),
        );
        assert_eq!(captured.raw_text(), Some("{not json at all"));
        assert!(captured.parsed_json().is_none());
    }

    #[test]
    fn test_serialized_shape_uses_data_or_raw_text() {
        let parsed = CapturedResponse::decode("u".to_string(), 200, r#"{"a":1}"#.to_string());
        let raw = CapturedResponse::decode("u".to_string(), 500, "oops".to_string());

        let parsed_json = serde_json::to_value(&parsed).unwrap();
        let raw_json = serde_json::to_value(&raw).unwrap();

        assert_eq!(parsed_json, json!({"response_url": "u", "status": 200, "data": {"a": 1}}));
        assert_eq!(raw_json, json!({"response_url": "u", "status": 500, "raw_text": "oops"}));
    }

    #[test]
    fn test_bundle_survives_storage_format() {
        let bundle = CaptureBundle::new(
            "https://x/details/1".to_string(),
            vec![
                CapturedResponse::decode("a".to_string(), 200, r#"{"document":{}}"#.to_string()),
                CapturedResponse::decode("b".to_string(), 200, "plain".to_string()),
            ],
        );
        let text = serde_json::to_string(&bundle).unwrap();
        let back: CaptureBundle = serde_json::from_str(&text).unwrap();
        assert_eq!(back, bundle);
    }

    #[test]
    fn test_error_bundle_has_no_captures() {
        let bundle = CaptureBundle::with_error("https://x/details/1".to_string(), "timeout".to_string());
        assert!(bundle.is_error());
        assert!(bundle.captured.is_empty());
    }
}
