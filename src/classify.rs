//! Response-driven error classification
//!
//! The repository API reports failures as free text in a `message` or
//! `detail` field. Classification is a best-effort substring match over that
//! text against an ordered rule table; it is fragile against wording changes
//! on the server side and only routes logging and metrics. Nothing is retried.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category assigned to a failed response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    AlreadyExists,
    NotFound,
    NoObjective,
    Generic,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyExists => write!(f, "AlreadyExists"),
            Self::NotFound => write!(f, "NotFound"),
            Self::NoObjective => write!(f, "NoObjective"),
            Self::Generic => write!(f, "Generic"),
        }
    }
}

/// One entry in the rule table: a substring and the category it maps to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierRule {
    pub pattern: String,
    pub category: ErrorCategory,
}

impl ClassifierRule {
    pub fn new(pattern: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            pattern: pattern.into(),
            category,
        }
    }
}

/// Rules in match order. First hit wins.
pub fn default_rules() -> Vec<ClassifierRule> {
    use ErrorCategory::{AlreadyExists, NoObjective, NotFound};
    vec![
        ClassifierRule::new("already exist", AlreadyExists),
        ClassifierRule::new("all ready", AlreadyExists),
        ClassifierRule::new("Duplicate template", AlreadyExists),
        ClassifierRule::new("There is already", AlreadyExists),
        ClassifierRule::new("already has", AlreadyExists),
        ClassifierRule::new("no approved objective", NoObjective),
        ClassifierRule::new("not found", NotFound),
        ClassifierRule::new("does not exist", NotFound),
    ]
}

/// Ordered substring classifier over server error messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassifier {
    rules: Vec<ClassifierRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl ErrorClassifier {
    pub fn new(rules: Vec<ClassifierRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    /// Classify a failed response body.
    ///
    /// Only the `message` and `detail` fields are inspected. Bodies without
    /// either (including raw-text fallbacks) are `Generic`.
    pub fn classify(&self, body: &Value) -> ErrorCategory {
        let Some(text) = server_message(body) else {
            return ErrorCategory::Generic;
        };
        self.classify_message(&text)
    }

    /// Classify a bare message string
    pub fn classify_message(&self, message: &str) -> ErrorCategory {
        self.rules
            .iter()
            .find(|rule| message.contains(rule.pattern.as_str()))
            .map(|rule| rule.category)
            .unwrap_or(ErrorCategory::Generic)
    }
}

/// The server-supplied message, if the body carries one
fn server_message(body: &Value) -> Option<String> {
    ["message", "detail"].iter().find_map(|field| match body.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    })
}

/// Human-readable failure text: `message`, else `detail`, else the whole body
pub fn error_message(body: &Value) -> String {
    if let Some(message) = body.get("message") {
        return match message {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    }
    if let Some(detail) = body.get("detail") {
        return match detail {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    }
    body.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duplicate_template_is_already_exists() {
        let classifier = ErrorClassifier::default();
        let body = json!({"message": "Duplicate template already exists"});
        assert_eq!(classifier.classify(&body), ErrorCategory::AlreadyExists);
    }

    #[test]
    fn test_not_found_message() {
        let classifier = ErrorClassifier::default();
        assert_eq!(
            classifier.classify(&json!({"message": "Study not found"})),
            ErrorCategory::NotFound
        );
        assert_eq!(
            classifier.classify(&json!({"detail": "Codelist does not exist"})),
            ErrorCategory::NotFound
        );
    }

    #[test]
    fn test_unmatched_detail_is_generic() {
        let classifier = ErrorClassifier::default();
        assert_eq!(
            classifier.classify(&json!({"detail": "x"})),
            ErrorCategory::Generic
        );
        assert_eq!(classifier.classify(&json!({})), ErrorCategory::Generic);
        assert_eq!(
            classifier.classify(&Value::String("not found".into())),
            ErrorCategory::Generic
        );
    }

    #[test]
    fn test_no_approved_objective() {
        let classifier = ErrorClassifier::default();
        let body = json!({"message": "Study has no approved objective"});
        assert_eq!(classifier.classify(&body), ErrorCategory::NoObjective);
    }

    #[test]
    fn test_first_rule_wins_on_overlap() {
        let classifier = ErrorClassifier::default();
        // matches both "already exist" and "not found"
        let body = json!({"message": "Term already exists, parent not found"});
        assert_eq!(classifier.classify(&body), ErrorCategory::AlreadyExists);

        let reversed = ErrorClassifier::new(vec![
            ClassifierRule::new("not found", ErrorCategory::NotFound),
            ClassifierRule::new("already exist", ErrorCategory::AlreadyExists),
        ]);
        assert_eq!(reversed.classify(&body), ErrorCategory::NotFound);
    }

    #[test]
    fn test_detail_list_is_stringified() {
        let classifier = ErrorClassifier::default();
        let body = json!({"detail": [{"msg": "field not found"}]});
        assert_eq!(classifier.classify(&body), ErrorCategory::NotFound);
    }

    #[test]
    fn test_error_message_fallbacks() {
        assert_eq!(error_message(&json!({"message": "boom"})), "boom");
        assert_eq!(error_message(&json!({"detail": "bad"})), "bad");
        assert_eq!(error_message(&json!({"other": 1})), r#"{"other":1}"#);
    }
}
