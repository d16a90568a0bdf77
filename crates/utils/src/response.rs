use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pagination block attached to list responses when page counting is on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pagination {
    pub page_index: i64,
    pub per_page: i64,
    pub page_count: i64,
    pub record_count: i64,
}

/// The envelope every API endpoint returns.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub error: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl ApiResponse {
    /// Creates a successful response carrying `data`.
    pub fn success(status: u16, data: Value) -> Self {
        ApiResponse {
            status,
            error: String::new(),
            data,
            pagination: None,
        }
    }

    /// Creates an error response with an empty data object.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        ApiResponse {
            status,
            error: message.into(),
            data: Value::Object(Default::default()),
            pagination: None,
        }
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_serializes_without_pagination_key() {
        let body = ApiResponse::success(200, serde_json::json!({"ok": true}));
        let text = serde_json::to_string(&body).unwrap();
        assert!(text.contains("\"status\":200"));
        assert!(!text.contains("pagination"));
    }

    #[test]
    fn pagination_round_trips() {
        let body = ApiResponse::success(200, Value::Array(vec![])).with_pagination(Pagination {
            page_index: 2,
            per_page: 25,
            page_count: 4,
            record_count: 100,
        });
        let text = serde_json::to_string(&body).unwrap();
        let back: ApiResponse = serde_json::from_str(&text).unwrap();
        assert_eq!(back.pagination.unwrap().page_count, 4);
    }
}
