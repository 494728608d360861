//! Workflow orchestrator
//!
//! Asynchronous multi-step workflows over the transport, all passing through
//! the concurrency gate:
//!
//! - create then approve:
//!   `Pending -> Posted -> {Approved | PostFailed | ApprovalSkipped | ApproveFailed}`
//! - new version, patch, then approve:
//!   `Pending -> VersionStepDone -> Patched -> {Approved | ApproveFailed | ApprovalSkipped}`
//!
//! Every failure is terminal for its item: it is logged, counted under a
//! classified metrics key, and reported in the outcome. Nothing is retried.

use crate::classify::{error_message, ErrorCategory, ErrorClassifier};
use crate::config::{ApiHeaders, BindingConfig};
use crate::error::Result;
use crate::gate::ConcurrencyGate;
use crate::metrics::{record, Metrics, MetricsSink, Outcome};
use crate::transport::{path_join, ApiRequest, HttpTransport, Method, Transport};
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Server message when a new version is requested for an item already in draft
pub const DRAFT_EXISTS_MESSAGE: &str = "New draft version can be created only for FINAL versions";

// =============================================================================
// Work items and outcomes
// =============================================================================

/// Unit of work for create-then-approve
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub path: String,
    pub body: Value,
    /// Collection path the approval is posted under, `{approve_path}/{uid}/approvals`
    pub approve_path: Option<String>,
}

impl WorkItem {
    pub fn new(path: impl Into<String>, body: Value) -> Self {
        Self {
            path: path.into(),
            body,
            approve_path: None,
        }
    }

    pub fn with_approve_path(mut self, approve_path: impl Into<String>) -> Self {
        self.approve_path = Some(approve_path.into());
        self
    }

    /// Name used in log lines: `name`, else `term_uid`, else the whole body
    pub fn label(&self) -> String {
        ["name", "term_uid"]
            .iter()
            .find_map(|field| self.body.get(field).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| self.body.to_string())
    }
}

/// Unit of work for new-version-then-patch-then-approve
#[derive(Debug, Clone, PartialEq)]
pub struct VersionWorkItem {
    /// Endpoint that creates the new draft version
    pub new_path: String,
    pub patch_path: String,
    pub body: Value,
    pub approve_path: Option<String>,
}

impl VersionWorkItem {
    pub fn new(new_path: impl Into<String>, patch_path: impl Into<String>, body: Value) -> Self {
        Self {
            new_path: new_path.into(),
            patch_path: patch_path.into(),
            body,
            approve_path: None,
        }
    }

    pub fn with_approve_path(mut self, approve_path: impl Into<String>) -> Self {
        self.approve_path = Some(approve_path.into());
        self
    }
}

/// Status and decoded body of one async step.
///
/// `status` is `None` when the request never completed. Non-JSON bodies are
/// replaced by an empty object.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: Option<u16>,
    pub body: Value,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(s) if (200..300).contains(&s))
    }

    /// 4xx/5xx, or no response at all
    pub fn is_failure(&self) -> bool {
        self.status.map_or(true, |s| s >= 400)
    }

    pub fn uid(&self) -> Option<String> {
        self.body.get("uid").and_then(Value::as_str).map(str::to_string)
    }
}

/// Why a step ended the workflow
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub status: Option<u16>,
    pub category: ErrorCategory,
    pub message: String,
}

/// Terminal state of create-then-approve
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// Created; approval was not requested
    Posted(Value),
    /// Created and approved; carries the approval response
    Approved { uid: String, approval: Value },
    PostFailed(StepFailure),
    /// Created, but approval could not be attempted (no uid or no approve path)
    ApprovalSkipped(Value),
    ApproveFailed { uid: String, failure: StepFailure },
}

impl CreateOutcome {
    /// Result handed to callers: the post or approval response on success,
    /// `None` for every failed or skipped path
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Posted(value) => Some(value),
            Self::Approved { approval, .. } => Some(approval),
            Self::PostFailed(_) | Self::ApprovalSkipped(_) | Self::ApproveFailed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Posted(_) | Self::Approved { .. })
    }
}

/// Terminal state of new-version-then-patch-then-approve
#[derive(Debug, Clone, PartialEq)]
pub enum VersionOutcome {
    /// Patched; approval was not requested
    Patched(Value),
    /// Patched and approved; carries both responses
    Approved { patched: Value, approval: Value },
    VersionFailed(StepFailure),
    PatchFailed(StepFailure),
    ApprovalSkipped(Value),
    ApproveFailed { patched: Value, failure: StepFailure },
}

impl VersionOutcome {
    /// The patch response on success, `None` otherwise
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Patched(value) | Self::Approved { patched: value, .. } => Some(value),
            Self::VersionFailed(_)
            | Self::PatchFailed(_)
            | Self::ApprovalSkipped(_)
            | Self::ApproveFailed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Patched(_) | Self::Approved { .. })
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Async request orchestrator for the repository API
pub struct Orchestrator<T: Transport = HttpTransport> {
    transport: T,
    gate: ConcurrencyGate,
    classifier: ErrorClassifier,
    metrics: Arc<dyn MetricsSink>,
    approve_delay: Duration,
}

impl Orchestrator<HttpTransport> {
    /// Orchestrator over reqwest, configured from `config`
    pub fn from_config(
        config: &BindingConfig,
        metrics: Option<Arc<dyn MetricsSink>>,
    ) -> Result<Self> {
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::new(config, transport, metrics))
    }
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(
        config: &BindingConfig,
        transport: T,
        metrics: Option<Arc<dyn MetricsSink>>,
    ) -> Self {
        Self {
            transport,
            gate: ConcurrencyGate::new(config.max_concurrent_requests),
            classifier: config.classifier(),
            metrics: metrics.unwrap_or_else(|| Arc::new(Metrics::new())),
            approve_delay: config.approve_delay(),
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Replace request headers. Requires exclusive access, so no request can
    /// be in flight while headers change.
    pub fn update_headers(&mut self, headers: &ApiHeaders) -> Result<()> {
        self.transport.update_headers(headers)
    }

    // =========================================================================
    // Building blocks
    // =========================================================================

    /// Run one request through the gate
    async fn exchange(&self, request: ApiRequest) -> Reply {
        let method = request.method;
        let path = request.path.clone();
        match self.gate.run(self.transport.execute(request)).await {
            Ok(response) => Reply {
                status: Some(response.status),
                body: response.into_json_or_empty(),
            },
            Err(e) => {
                error!("Failed to {} '{}': {}", method, path, e);
                Reply {
                    status: None,
                    body: json!({}),
                }
            }
        }
    }

    fn failure(&self, reply: &Reply) -> StepFailure {
        StepFailure {
            status: reply.status,
            category: self.classifier.classify(&reply.body),
            message: error_message(&reply.body),
        }
    }

    pub async fn post_async(&self, path: &str, body: Value) -> Reply {
        self.exchange(ApiRequest::post(path, body)).await
    }

    pub async fn patch_async(&self, path: &str, body: Value) -> Reply {
        self.exchange(ApiRequest::patch(path, body)).await
    }

    /// POST an empty body to a new-version endpoint
    pub async fn new_version_async(&self, path: &str) -> Reply {
        self.exchange(ApiRequest::post(path, json!({}))).await
    }

    /// POST an empty body to an arbitrary approval path
    pub async fn approve_async(&self, path: &str) -> Reply {
        let reply = self.send_approval(path).await;
        if reply.is_success() {
            return reply;
        }
        Reply {
            status: reply.status,
            body: json!({}),
        }
    }

    /// POST `{url}/{uid}/approvals`, counting `--Approve` or `--ApproveError`
    pub async fn approve_item_async(&self, uid: &str, url: &str) -> Reply {
        let reply = self.approve_uid(uid, url).await;
        if reply.is_success() {
            return reply;
        }
        Reply {
            status: reply.status,
            body: json!({}),
        }
    }

    /// Approval request with the server's reply left intact
    async fn send_approval(&self, path: &str) -> Reply {
        let reply = self.exchange(ApiRequest::post(path, json!({}))).await;
        if !reply.is_success() {
            warn!(
                "Failed to approve {}, status: {:?}, message: {}",
                path,
                reply.status,
                error_message(&reply.body)
            );
        }
        reply
    }

    /// Counted approval of `uid`; failed replies keep their body for classification
    async fn approve_uid(&self, uid: &str, url: &str) -> Reply {
        let path = path_join(&[url, uid, "approvals"]);
        let reply = self.send_approval(&path).await;
        let outcome = if reply.is_success() {
            Outcome::Approve
        } else {
            Outcome::ApproveError
        };
        record(self.metrics.as_ref(), &path, outcome, 1);
        reply
    }

    async fn delay_before_approve(&self) {
        if !self.approve_delay.is_zero() {
            tokio::time::sleep(self.approve_delay).await;
        }
    }

    // =========================================================================
    // create -> approve
    // =========================================================================

    /// Post `item`, then approve the created object when `approve` is set
    pub async fn post_then_approve(&self, item: WorkItem, approve: bool) -> CreateOutcome {
        let label = item.label();
        let WorkItem {
            path,
            body,
            approve_path,
        } = item;

        debug!("Post to {}", path);
        let reply = self.post_async(&path, body).await;
        if reply.is_failure() {
            let failure = self.failure(&reply);
            error!(
                "Failed to post '{}' to '{}', error: {}",
                label, path, failure.message
            );
            record(
                self.metrics.as_ref(),
                &path,
                Outcome::from_failure(failure.category, Outcome::Error),
                1,
            );
            return CreateOutcome::PostFailed(failure);
        }
        record(self.metrics.as_ref(), &path, Outcome::Post, 1);

        if !approve {
            return CreateOutcome::Posted(reply.body);
        }
        let Some(uid) = reply.uid() else {
            error!("No uid returned, unable to approve");
            return CreateOutcome::ApprovalSkipped(reply.body);
        };
        let Some(approve_path) = approve_path else {
            error!("No approve path for '{}', unable to approve", uid);
            return CreateOutcome::ApprovalSkipped(reply.body);
        };

        self.delay_before_approve().await;
        info!("Approve object with uid '{}'", uid);
        let approval = self.approve_uid(&uid, &approve_path).await;
        if approval.is_success() {
            CreateOutcome::Approved {
                uid,
                approval: approval.body,
            }
        } else {
            let failure = self.failure(&approval);
            CreateOutcome::ApproveFailed { uid, failure }
        }
    }

    /// Run create-then-approve for every item concurrently, bounded by the gate.
    /// Outcomes are returned in input order.
    pub async fn post_then_approve_all(
        &self,
        items: impl IntoIterator<Item = WorkItem>,
        approve: bool,
    ) -> Vec<CreateOutcome> {
        join_all(
            items
                .into_iter()
                .map(|item| self.post_then_approve(item, approve)),
        )
        .await
    }

    // =========================================================================
    // new version -> patch -> approve
    // =========================================================================

    /// Create a new draft version, patch it, and approve it when `approve` is set.
    ///
    /// An item that is already in draft does not stop the workflow.
    pub async fn new_version_patch_then_approve(
        &self,
        item: VersionWorkItem,
        approve: bool,
    ) -> VersionOutcome {
        let VersionWorkItem {
            new_path,
            patch_path,
            body,
            approve_path,
        } = item;

        let version = self.new_version_async(&new_path).await;
        if !version.is_success() {
            let failure = self.failure(&version);
            if failure.message.contains(DRAFT_EXISTS_MESSAGE) {
                warn!("Failed to create new version, item is already in DRAFT");
            } else {
                error!("Failed to create new version: {}", failure.message);
                record(
                    self.metrics.as_ref(),
                    &new_path,
                    Outcome::from_failure(failure.category, Outcome::Error),
                    1,
                );
                return VersionOutcome::VersionFailed(failure);
            }
        }

        let patched = self.patch_async(&patch_path, body).await;
        if !patched.is_success() {
            let failure = self.failure(&patched);
            error!("Failed to patch: {}", failure.message);
            record(
                self.metrics.as_ref(),
                &patch_path,
                Outcome::from_failure(failure.category, Outcome::PatchError),
                1,
            );
            return VersionOutcome::PatchFailed(failure);
        }
        record(self.metrics.as_ref(), &patch_path, Outcome::Patch, 1);

        if !approve {
            return VersionOutcome::Patched(patched.body);
        }
        let (Some(uid), Some(approve_path)) = (patched.uid(), approve_path) else {
            error!("No uid returned, unable to approve the new version");
            return VersionOutcome::ApprovalSkipped(patched.body);
        };

        self.delay_before_approve().await;
        let approval = self.approve_uid(&uid, &approve_path).await;
        if approval.is_success() {
            VersionOutcome::Approved {
                patched: patched.body,
                approval: approval.body,
            }
        } else {
            error!("Failed to approve the new version of: {}", uid);
            VersionOutcome::ApproveFailed {
                patched: patched.body,
                failure: self.failure(&approval),
            }
        }
    }

    /// Run the versioning workflow for every item concurrently, in input order
    pub async fn new_version_patch_then_approve_all(
        &self,
        items: impl IntoIterator<Item = VersionWorkItem>,
        approve: bool,
    ) -> Vec<VersionOutcome> {
        join_all(
            items
                .into_iter()
                .map(|item| self.new_version_patch_then_approve(item, approve)),
        )
        .await
    }

    /// Issue an arbitrary request through the gate
    pub async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Reply {
        let mut request = ApiRequest::new(method, path);
        if let Some(body) = body {
            request = request.with_body(body);
        }
        self.exchange(request).await
    }
}
