//! Binding configuration
//!
//! One immutable value built at startup and handed to the binding and the
//! orchestrator. Nothing in the crate mutates it after construction.

use crate::classify::{default_rules, ClassifierRule, ErrorClassifier};
use crate::error::{ApiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 8;
pub const DEFAULT_APPROVE_DELAY_MS: u64 = 50;
pub const DEFAULT_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_ACTIVITY_PAGE_SIZE: u32 = 100;
pub const DEFAULT_DISCOVERY_PATH: &str = "openapi.json";

pub const ENV_BASE_URL: &str = "MDR_API_BASE_URL";
pub const ENV_TOKEN: &str = "MDR_API_TOKEN";
pub const ENV_MAX_CONCURRENT: &str = "MDR_MAX_CONCURRENT_REQUESTS";
pub const ENV_APPROVE_DELAY_MS: &str = "MDR_APPROVE_DELAY_MS";

/// Header map applied to every request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiHeaders(BTreeMap<String, String>);

impl ApiHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn with_bearer_token(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {}", token))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Codelist name to concept id, for codelists whose display name is ambiguous
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodelistMap(BTreeMap<String, String>);

impl Default for CodelistMap {
    fn default() -> Self {
        Self::cdisc_defaults()
    }
}

impl CodelistMap {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// CDISC codelists looked up by uid rather than by name
    pub fn cdisc_defaults() -> Self {
        let entries = [
            ("Study Type", "C99077"),
            ("Trial Indication Type", "C66736"),
            ("Trial Type", "C66739"),
            ("Trial Phase", "C66737"),
            ("Intervention Type", "C99078"),
            ("Control Type", "C66785"),
            ("Intervention Model", "C99076"),
            ("Trial Blinding Schema", "C66735"),
            ("Age Unit", "C66781"),
            ("Route of Administration", "C66729"),
            ("Pharmaceutical Dosage Form", "C66726"),
            ("Frequency", "C71113"),
            ("SDTM Domain Abbreviation", "C66734"),
            ("Unit", "C71620"),
            ("Sex of Participants", "C66732"),
        ];
        Self(
            entries
                .iter()
                .map(|(name, uid)| (name.to_string(), uid.to_string()))
                .collect(),
        )
    }

    pub fn with_entry(mut self, name: impl Into<String>, uid: impl Into<String>) -> Self {
        self.0.insert(name.into(), uid.into());
        self
    }

    pub fn uid_for(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_REQUESTS
}

fn default_approve_delay_ms() -> u64 {
    DEFAULT_APPROVE_DELAY_MS
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_activity_page_size() -> u32 {
    DEFAULT_ACTIVITY_PAGE_SIZE
}

fn default_discovery_path() -> String {
    DEFAULT_DISCOVERY_PATH.to_string()
}

fn default_mandatory_packages() -> BTreeSet<String> {
    ["ADAM CT", "CDASH CT", "DEFINE-XML CT", "SDTM CT"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_optional_packages() -> BTreeSet<String> {
    [
        "COA CT",
        "GLOSSARY CT",
        "PROTOCOL CT",
        "QRS CT",
        "QS-FT CT",
        "SEND CT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Configuration for `ApiBinding` and `Orchestrator`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Base URL every request path is joined onto
    pub base_url: String,
    #[serde(default)]
    pub headers: ApiHeaders,
    /// Ceiling of the concurrency gate
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    /// Pause before each approval request. Works around write contention on
    /// the server's uid counter; a heuristic, not a guarantee.
    #[serde(default = "default_approve_delay_ms")]
    pub approve_delay_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_activity_page_size")]
    pub activity_page_size: u32,
    /// Endpoint probed by the startup verifier
    #[serde(default = "default_discovery_path")]
    pub discovery_path: String,
    #[serde(default = "default_mandatory_packages")]
    pub mandatory_packages: BTreeSet<String>,
    #[serde(default = "default_optional_packages")]
    pub optional_packages: BTreeSet<String>,
    #[serde(default = "default_rules")]
    pub classifier_rules: Vec<ClassifierRule>,
    #[serde(default)]
    pub codelists: CodelistMap,
}

impl BindingConfig {
    /// Defaults for everything except the base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            headers: ApiHeaders::default(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            approve_delay_ms: DEFAULT_APPROVE_DELAY_MS,
            page_size: DEFAULT_PAGE_SIZE,
            activity_page_size: DEFAULT_ACTIVITY_PAGE_SIZE,
            discovery_path: default_discovery_path(),
            mandatory_packages: default_mandatory_packages(),
            optional_packages: default_optional_packages(),
            classifier_rules: default_rules(),
            codelists: CodelistMap::cdisc_defaults(),
        }
    }

    /// Create from environment variables (a `.env` file is honoured)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let base_url = std::env::var(ENV_BASE_URL).map_err(|_| {
            ApiError::InvalidConfig(format!("{} environment variable not set", ENV_BASE_URL))
        })?;
        let mut config = Self::new(base_url);

        if let Ok(token) = std::env::var(ENV_TOKEN) {
            config.headers = config.headers.with_bearer_token(&token);
        }
        if let Ok(value) = std::env::var(ENV_MAX_CONCURRENT) {
            config.max_concurrent_requests = value.parse().map_err(|_| {
                ApiError::InvalidConfig(format!(
                    "{} must be a positive integer",
                    ENV_MAX_CONCURRENT
                ))
            })?;
        }
        if let Ok(value) = std::env::var(ENV_APPROVE_DELAY_MS) {
            config.approve_delay_ms = value.parse().map_err(|_| {
                ApiError::InvalidConfig(format!("{} must be an integer", ENV_APPROVE_DELAY_MS))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn with_headers(mut self, headers: ApiHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_approve_delay(mut self, delay: Duration) -> Self {
        self.approve_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    pub fn with_codelists(mut self, codelists: CodelistMap) -> Self {
        self.codelists = codelists;
        self
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.base_url).map_err(|e| {
            ApiError::InvalidConfig(format!(
                "base_url '{}' is not a valid URL: {}",
                self.base_url, e
            ))
        })?;
        if self.max_concurrent_requests == 0 {
            return Err(ApiError::InvalidConfig(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.page_size == 0 || self.activity_page_size == 0 {
            return Err(ApiError::InvalidConfig(
                "page sizes for paged fetches must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn approve_delay(&self) -> Duration {
        Duration::from_millis(self.approve_delay_ms)
    }

    pub fn classifier(&self) -> ErrorClassifier {
        ErrorClassifier::new(self.classifier_rules.clone())
    }
}
