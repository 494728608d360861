//! Transport seam
//!
//! A transport issues one HTTP request against the repository API and hands
//! back the status plus the decoded body. Non-JSON bodies never fail a call:
//! they come back as `ResponseBody::Text` after the decode failure is logged.
//!
//! Two traits exist because the binding has two calling conventions: a
//! blocking surface used for lookups and startup checks, and an async
//! surface used by the workflow orchestrator.

pub mod http;

use crate::classify::{error_message, ErrorCategory, ErrorClassifier};
use crate::config::ApiHeaders;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::error;

pub use http::{BlockingHttpTransport, HttpTransport};

/// HTTP methods the repository API uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Patch => write!(f, "PATCH"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Ordered query parameters. Setting an existing key replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Set `key` only if it is not present yet
    pub fn set_default(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        if !self.contains(&key) {
            self.0.push((key, value.to_string()));
        }
    }

    /// Overlay every entry of `other`, replacing values for shared keys
    pub fn merge(&mut self, other: &QueryParams) {
        for (k, v) in &other.0 {
            self.set(k.clone(), v);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

/// The `filters` query parameter: `{field: {"v": [values], "op": "eq"}}`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet(BTreeMap<String, (Vec<String>, Option<String>)>);

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field must equal one of `values`
    pub fn eq(mut self, field: impl Into<String>, values: &[&str]) -> Self {
        self.0.insert(
            field.into(),
            (
                values.iter().map(|v| v.to_string()).collect(),
                Some("eq".to_string()),
            ),
        );
        self
    }

    /// Field filter without an explicit operator; the server applies its default
    pub fn values(mut self, field: impl Into<String>, values: &[&str]) -> Self {
        self.0.insert(
            field.into(),
            (values.iter().map(|v| v.to_string()).collect(), None),
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (field, (values, op)) in &self.0 {
            let mut filter = serde_json::Map::new();
            filter.insert("v".to_string(), Value::from(values.clone()));
            if let Some(op) = op {
                filter.insert("op".to_string(), Value::from(op.clone()));
            }
            map.insert(field.clone(), Value::Object(filter));
        }
        Value::Object(map)
    }
}

impl std::fmt::Display for FilterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// Endpoint descriptor for one call. `path` is relative to the base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub params: QueryParams,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: QueryParams::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }
}

/// Response payload: decoded JSON, or the raw text when decoding failed
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

/// Status and body of one completed request
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl ApiResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: ResponseBody::Json(body),
        }
    }

    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            body: ResponseBody::Text(text.into()),
        }
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(v) => Some(v),
            ResponseBody::Text(_) => None,
        }
    }

    /// JSON body, or an empty object for text fallbacks
    pub fn into_json_or_empty(self) -> Value {
        match self.body {
            ResponseBody::Json(v) => v,
            ResponseBody::Text(_) => Value::Object(Default::default()),
        }
    }

    /// Body rendered as text, for log lines
    pub fn body_text(&self) -> String {
        match &self.body {
            ResponseBody::Json(v) => v.to_string(),
            ResponseBody::Text(t) => t.clone(),
        }
    }

    /// Failure message: `message`/`detail` from JSON, or the raw text
    pub fn error_message(&self) -> String {
        match &self.body {
            ResponseBody::Json(v) => error_message(v),
            ResponseBody::Text(t) => t.clone(),
        }
    }

    /// Category of a failed response; `None` on success
    pub fn category(&self, classifier: &ErrorClassifier) -> Option<ErrorCategory> {
        if self.is_success() {
            return None;
        }
        Some(match &self.body {
            ResponseBody::Json(v) => classifier.classify(v),
            ResponseBody::Text(_) => ErrorCategory::Generic,
        })
    }

    /// `uid` field of a JSON object body
    pub fn uid(&self) -> Option<String> {
        self.as_json()
            .and_then(|v| v.get("uid"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Asynchronous transport. Suspends at the I/O boundary only.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse>;

    /// Replace the header map sent with every request
    fn update_headers(&mut self, headers: &ApiHeaders) -> Result<()>;
}

/// Blocking transport. Holds the calling thread for the full round trip.
pub trait BlockingTransport: Send + Sync {
    fn execute(&self, request: ApiRequest) -> Result<ApiResponse>;

    fn update_headers(&mut self, headers: &ApiHeaders) -> Result<()>;
}

/// Join URL segments with single slashes
pub fn path_join(parts: &[&str]) -> String {
    let mut joined = String::new();
    for (i, part) in parts.iter().enumerate() {
        let trimmed = if i == 0 {
            part.trim_end_matches('/')
        } else {
            part.trim_matches('/')
        };
        if trimmed.is_empty() {
            continue;
        }
        if !joined.is_empty() {
            joined.push('/');
        }
        joined.push_str(trimmed);
    }
    joined
}

/// Turn a raw response body into a `ResponseBody`.
///
/// Decoding failures are logged and kept as text; callers treat them as an
/// empty result.
pub(crate) fn decode_body(method: Method, path: &str, status: u16, text: String) -> ResponseBody {
    if text.trim().is_empty() {
        return ResponseBody::Text(text);
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => ResponseBody::Json(value),
        Err(e) => {
            error!(
                "Failed to decode json for {} {}, status: {}, error: {}, data: {}",
                method,
                path,
                status,
                e,
                text.chars().take(200).collect::<String>()
            );
            ResponseBody::Text(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_join() {
        assert_eq!(
            path_join(&["http://host/api/", "/ct/terms"]),
            "http://host/api/ct/terms"
        );
        assert_eq!(
            path_join(&["/ct/terms", "CT1", "approvals"]),
            "/ct/terms/CT1/approvals"
        );
        assert_eq!(path_join(&["/x/", "", "names/approvals"]), "/x/names/approvals");
    }

    #[test]
    fn test_query_params_replace_and_default() {
        let mut params = QueryParams::new().with("page_number", 1).with("page_size", 0);
        params.set("page_size", 50);
        params.set_default("page_number", 9);
        params.set_default("total_count", true);
        assert_eq!(params.get("page_size"), Some("50"));
        assert_eq!(params.get("page_number"), Some("1"));
        assert_eq!(params.get("total_count"), Some("true"));
        assert_eq!(params.pairs().len(), 3);
    }

    #[test]
    fn test_filter_set_encoding() {
        let filters = FilterSet::new()
            .eq("concept_id", &["C49488"])
            .values("name", &["Yes"]);
        assert_eq!(
            filters.to_string(),
            r#"{"concept_id":{"op":"eq","v":["C49488"]},"name":{"v":["Yes"]}}"#
        );
    }

    #[test]
    fn test_decode_body_falls_back_to_text() {
        let body = decode_body(Method::Get, "/x", 500, "<html>oops</html>".into());
        assert_eq!(body, ResponseBody::Text("<html>oops</html>".into()));
        let body = decode_body(Method::Get, "/x", 200, r#"{"a":1}"#.into());
        assert_eq!(body, ResponseBody::Json(json!({"a": 1})));
    }

    #[test]
    fn test_response_category_and_uid() {
        let classifier = ErrorClassifier::default();
        let ok = ApiResponse::json(201, json!({"uid": "U1"}));
        assert!(ok.category(&classifier).is_none());
        assert_eq!(ok.uid(), Some("U1".to_string()));

        let failed = ApiResponse::json(400, json!({"message": "Study not found"}));
        assert_eq!(failed.category(&classifier), Some(ErrorCategory::NotFound));

        let text = ApiResponse::text(502, "Bad Gateway");
        assert_eq!(text.category(&classifier), Some(ErrorCategory::Generic));
        assert_eq!(text.clone().into_json_or_empty(), json!({}));
        assert_eq!(text.error_message(), "Bad Gateway");
    }
}
