//! Synchronous API binding
//!
//! Blocking operations against the repository API: single create/patch/
//! approve/delete calls that log and count instead of failing, plus the
//! terminology and study lookups the importers need up front.
//!
//! Two error conventions live side by side here. The `simple_*`, post,
//! patch and approve calls return `None`/`false` on failure after logging and
//! incrementing a classified metrics key. Lookups whose callers cannot
//! proceed without the data return `Result<_, ApiError>`.

use crate::classify::{ErrorCategory, ErrorClassifier};
use crate::config::{ApiHeaders, BindingConfig};
use crate::error::{ApiError, Result, StartupFailure};
use crate::metrics::{record, Metrics, MetricsSink, Outcome};
use crate::pagination::{fetch_all, Page};
use crate::startup::{PackageReport, StartupContext, StartupVerifier};
use crate::transport::{
    path_join, ApiRequest, ApiResponse, BlockingHttpTransport, BlockingTransport, FilterSet,
    Method, QueryParams, ResponseBody,
};
use crate::workflow::WorkItem;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// `page_number=1&page_size=0`, i.e. everything in one page
fn unpaged() -> QueryParams {
    QueryParams::new()
        .with("page_number", 1)
        .with("page_size", 0)
}

/// Blocking binding to the repository API
pub struct ApiBinding<T: BlockingTransport = BlockingHttpTransport> {
    transport: T,
    config: BindingConfig,
    classifier: ErrorClassifier,
    metrics: Arc<dyn MetricsSink>,
}

impl ApiBinding<BlockingHttpTransport> {
    /// Build an HTTP binding and run the startup checks.
    ///
    /// Configuration problems are reported as `Unreachable`, since no request
    /// could be made.
    pub fn connect_http(
        config: BindingConfig,
        metrics: Option<Arc<dyn MetricsSink>>,
        context: StartupContext,
    ) -> std::result::Result<(Self, PackageReport), StartupFailure> {
        let transport =
            BlockingHttpTransport::from_config(&config).map_err(|e| StartupFailure::Unreachable {
                url: config.base_url.clone(),
                reason: e.to_string(),
            })?;
        Self::connect(config, transport, metrics, context)
    }
}

impl<T: BlockingTransport> ApiBinding<T> {
    /// Build a binding without any startup checks
    pub fn new(config: BindingConfig, transport: T, metrics: Option<Arc<dyn MetricsSink>>) -> Self {
        let classifier = config.classifier();
        Self {
            transport,
            config,
            classifier,
            metrics: metrics.unwrap_or_else(|| Arc::new(Metrics::new())),
        }
    }

    /// Build a binding and run the startup verifier against it
    pub fn connect(
        config: BindingConfig,
        transport: T,
        metrics: Option<Arc<dyn MetricsSink>>,
        context: StartupContext,
    ) -> std::result::Result<(Self, PackageReport), StartupFailure> {
        let binding = Self::new(config, transport, metrics);
        let report = StartupVerifier::new(&binding.config).verify(&binding.transport, context)?;
        Ok((binding, report))
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Replace the headers sent with every subsequent request
    pub fn update_headers(&mut self, headers: ApiHeaders) -> Result<()> {
        self.transport.update_headers(&headers)?;
        self.config.headers = headers;
        Ok(())
    }

    // =========================================================================
    // Request plumbing
    // =========================================================================

    /// Execute, logging transport errors and returning `None` for them
    fn send(&self, request: ApiRequest) -> Option<ApiResponse> {
        let method = request.method;
        let path = request.path.clone();
        match self.transport.execute(request) {
            Ok(response) => Some(response),
            Err(e) => {
                warn!("{} {} failed: {}", method, path, e);
                None
            }
        }
    }

    /// Execute and require a 2xx JSON reply
    fn send_checked(&self, request: ApiRequest) -> Result<Value> {
        let method = request.method;
        let path = request.path.clone();
        let response = self.transport.execute(request)?;
        if !response.is_success() {
            return Err(ApiError::Status {
                method: method.to_string(),
                path,
                status: response.status,
                message: response.error_message(),
            });
        }
        match response.body {
            ResponseBody::Json(value) => Ok(value),
            ResponseBody::Text(text) => Err(ApiError::Decode {
                path,
                message: text.chars().take(200).collect(),
            }),
        }
    }

    /// GET returning the `items` array of a listing
    fn get_items_checked(&self, path: &str, params: QueryParams) -> Result<Vec<Value>> {
        let value = self.send_checked(ApiRequest::get(path).with_params(params))?;
        Ok(Page::from_value(path, value)?.items)
    }

    /// Classify a failure, log it and count it under `key_path`
    fn record_failure(&self, key_path: &str, response: &ApiResponse, generic: Outcome) {
        let category = response
            .category(&self.classifier)
            .unwrap_or(ErrorCategory::Generic);
        warn!(
            "Request to {} failed with status {} ({}): {}",
            key_path,
            response.status,
            category,
            response.error_message()
        );
        record(
            self.metrics.as_ref(),
            key_path,
            Outcome::from_failure(category, generic),
            1,
        );
    }

    // =========================================================================
    // Create / patch / delete
    // =========================================================================

    pub fn simple_delete(&self, path: &str, simple_path: Option<&str>) -> bool {
        let key_path = simple_path.unwrap_or(path);
        match self.send(ApiRequest::delete(path)) {
            Some(response) if response.is_success() => {
                record(self.metrics.as_ref(), key_path, Outcome::Delete, 1);
                debug!("DELETE {} success", path);
                true
            }
            Some(response) => {
                debug!("DELETE {}", path);
                warn!("{}", response.body_text());
                record(self.metrics.as_ref(), key_path, Outcome::Error, 1);
                false
            }
            None => {
                record(self.metrics.as_ref(), key_path, Outcome::Error, 1);
                false
            }
        }
    }

    pub fn simple_post_to_api(
        &self,
        path: &str,
        body: &Value,
        simple_path: Option<&str>,
        params: Option<&QueryParams>,
    ) -> Option<Value> {
        let key_path = simple_path.unwrap_or(path);
        let mut request = ApiRequest::post(path, body.clone());
        if let Some(params) = params {
            request = request.with_params(params.clone());
        }
        let Some(response) = self.send(request) else {
            record(self.metrics.as_ref(), key_path, Outcome::Error, 1);
            return None;
        };
        if response.is_success() {
            record(self.metrics.as_ref(), key_path, Outcome::Post, 1);
            debug!("POST {} success", path);
            return Some(response.into_json_or_empty());
        }
        debug!("POST {}", path);
        self.record_failure(key_path, &response, Outcome::Error);
        None
    }

    /// POST a work item's body to its path. The metrics key is digit-stripped.
    pub fn post_to_api(&self, item: &WorkItem) -> Option<Value> {
        let label = item.label();
        let Some(response) = self.send(ApiRequest::post(&item.path, item.body.clone())) else {
            record(self.metrics.as_ref(), &item.path, Outcome::Error, 1);
            return None;
        };
        debug!("POST {} {}", item.path, label);
        if response.is_success() {
            record(self.metrics.as_ref(), &item.path, Outcome::Post, 1);
            return Some(response.into_json_or_empty());
        }
        self.record_failure(&item.path, &response, Outcome::Error);
        None
    }

    /// PATCH `{path}/{body.uid}`
    pub fn patch_to_api(&self, body: &Value, path: &str) -> Option<Value> {
        let Some(uid) = body.get("uid").and_then(Value::as_str) else {
            error!("Patch {}: body has no uid", path);
            return None;
        };
        let url = path_join(&[path, uid]);
        self.patch_with_key(body, &url, path)
    }

    /// PATCH `url` as given, counting under `path`
    pub fn simple_patch(&self, body: &Value, url: &str, path: &str) -> Option<Value> {
        self.patch_with_key(body, url, path)
    }

    fn patch_with_key(&self, body: &Value, url: &str, key_path: &str) -> Option<Value> {
        let Some(response) = self.send(ApiRequest::patch(url, body.clone())) else {
            record(self.metrics.as_ref(), key_path, Outcome::PatchError, 1);
            return None;
        };
        if response.is_success() {
            record(self.metrics.as_ref(), key_path, Outcome::Patch, 1);
            info!("Patch {} success", key_path);
            return Some(response.into_json_or_empty());
        }
        self.record_failure(key_path, &response, Outcome::PatchError);
        None
    }

    // =========================================================================
    // Approvals
    // =========================================================================

    /// POST `{url}/{uid}/approvals`
    pub fn approve_item(&self, uid: &str, url: &str) -> Option<Value> {
        let path = path_join(&[url, uid, "approvals"]);
        let response = self.send(ApiRequest::new(Method::Post, &path))?;
        if !response.is_success() {
            warn!("Failed to approve {} {}", uid, response.body_text());
            return None;
        }
        Some(response.into_json_or_empty())
    }

    /// Approve the names aspect, then the attributes aspect
    pub fn approve_item_names_and_attributes(&self, uid: &str, url: &str) -> bool {
        for (aspect, suffix) in [
            ("names", "names/approvals"),
            ("attributes", "attributes/approvals"),
        ] {
            let path = path_join(&[url, uid, suffix]);
            match self.send(ApiRequest::new(Method::Post, &path)) {
                Some(response) if response.is_success() => {}
                Some(response) => {
                    warn!("Failed to approve {} {} {}", aspect, uid, response.body_text());
                    return false;
                }
                None => return false,
            }
        }
        true
    }

    pub fn simple_approve(&self, path: &str) -> bool {
        match self.send(ApiRequest::new(Method::Post, path)) {
            Some(response) if response.is_success() => true,
            _ => {
                warn!("Failed to approve {}", path);
                false
            }
        }
    }

    /// POST `{url}/{path}`, counting under `--{label}Approve`
    pub fn simple_approve2(&self, url: &str, path: &str, label: &str) -> bool {
        let full = path_join(&[url, path]);
        match self.send(ApiRequest::new(Method::Post, &full)) {
            Some(response) if response.is_success() => {
                record(
                    self.metrics.as_ref(),
                    &full,
                    Outcome::LabeledApprove(label.to_string()),
                    1,
                );
                true
            }
            _ => {
                warn!("Failed to approve {}", full);
                record(
                    self.metrics.as_ref(),
                    &full,
                    Outcome::LabeledApproveError(label.to_string()),
                    1,
                );
                false
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// GET with `page_number=1`/`page_size=0` unless the caller set them.
    ///
    /// Returns `None` after logging on failure or undecodable bodies.
    pub fn get_all_from_api(&self, path: &str, params: Option<&QueryParams>) -> Option<Value> {
        let mut query = params.cloned().unwrap_or_default();
        query.set_default("page_number", 1);
        query.set_default("page_size", 0);

        let response = self.send(ApiRequest::get(path).with_params(query))?;
        if response.is_success() {
            return match response.body {
                ResponseBody::Json(value) => Some(value),
                // already logged by the transport
                ResponseBody::Text(_) => None,
            };
        }
        match response.as_json().and_then(|v| v.get("message")) {
            Some(message) => error!(
                "get {}, message: {}, status: {}",
                path, message, response.status
            ),
            None => error!(
                "get {} reply: {} status: {}",
                path,
                response.body_text(),
                response.status
            ),
        }
        None
    }

    /// Like `get_all_from_api` but returns the `items` array, counting them
    pub fn get_all_items(&self, path: &str, params: Option<&QueryParams>) -> Option<Vec<Value>> {
        let value = self.get_all_from_api(path, params)?;
        let items = match value {
            Value::Object(mut map) => match map.remove("items") {
                Some(Value::Array(items)) => items,
                _ => {
                    error!("get {}: response has no items", path);
                    return None;
                }
            },
            Value::Array(items) => items,
            _ => return None,
        };
        record(self.metrics.as_ref(), path, Outcome::Get, items.len() as u64);
        Some(items)
    }

    /// Every item of a paged listing. A failed page fails the whole fetch.
    pub fn get_all_from_api_paged(
        &self,
        path: &str,
        params: Option<&QueryParams>,
        page_size: Option<u32>,
    ) -> Result<Vec<Value>> {
        let base = params.cloned().unwrap_or_default();
        let page_size = page_size.unwrap_or(self.config.page_size);
        let items = fetch_all(path, &base, page_size, |query| {
            let value = self.send_checked(ApiRequest::get(path).with_params(query.clone()))?;
            Page::from_value(path, value)
        })?;
        record(self.metrics.as_ref(), path, Outcome::Get, items.len() as u64);
        Ok(items)
    }

    /// All objects under `/concepts/activities/{object_type}`
    pub fn get_all_activity_objects(
        &self,
        object_type: &str,
        filters: Option<&FilterSet>,
    ) -> Result<Vec<Value>> {
        let mut params = QueryParams::new();
        if let Some(filters) = filters.filter(|f| !f.is_empty()) {
            params.set("filters", filters);
        }
        let path = format!("/concepts/activities/{}", object_type);
        info!("Getting {}", object_type);
        self.get_all_from_api_paged(&path, Some(&params), Some(self.config.activity_page_size))
    }

    /// Names of the libraries present in the repository
    pub fn get_libraries(&self) -> Result<Vec<String>> {
        let value = self.send_checked(ApiRequest::get("libraries"))?;
        let names: Vec<String> = value
            .as_array()
            .map(|libs| {
                libs.iter()
                    .filter_map(|lib| lib.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        info!("Existing libraries: {:?}", names);
        Ok(names)
    }

    pub fn create_library(&self, body: &Value) -> Result<()> {
        self.send_checked(ApiRequest::post("libraries", body.clone()))?;
        record(self.metrics.as_ref(), "/libraries", Outcome::Post, 1);
        Ok(())
    }

    // =========================================================================
    // Terminology lookups
    // =========================================================================

    /// Terms of a codelist. Names present in the configured codelist map are
    /// looked up by uid, others by name.
    pub fn get_terms_for_codelist_name(&self, codelist_name: &str) -> Result<Vec<Value>> {
        let params = match self.config.codelists.uid_for(codelist_name) {
            Some(uid) => unpaged().with("codelist_uid", uid),
            None => unpaged().with("codelist_name", codelist_name),
        };
        self.get_items_checked("ct/terms", params)
    }

    pub fn get_terms_for_codelist_uid(&self, codelist_uid: &str) -> Result<Vec<Value>> {
        self.get_items_checked("ct/terms", unpaged().with("codelist_uid", codelist_uid))
    }

    pub fn get_filtered_terms(&self, filters: &FilterSet) -> Result<Vec<Value>> {
        self.get_items_checked("ct/terms/attributes", unpaged().with("filters", filters))
    }

    /// CDISC terms carrying `concept_id`, optionally narrowed by catalogue and
    /// submission value
    pub fn lookup_terms_from_concept_id(
        &self,
        concept_id: &str,
        catalogue_name: Option<&str>,
        code_submission_value: Option<&str>,
    ) -> Result<Vec<Value>> {
        let mut filters = FilterSet::new().eq("concept_id", &[concept_id]);
        if let Some(catalogue) = catalogue_name {
            filters = filters.eq("catalogue_name", &[catalogue]);
        }
        if let Some(value) = code_submission_value {
            filters = filters.eq("code_submission_value", &[value]);
        }
        let params = QueryParams::new()
            .with("library_name", "CDISC")
            .with("page_number", 1)
            .with("page_size", 0)
            .with("filters", filters);
        self.get_items_checked("ct/terms/attributes", params)
    }

    /// Codelist name → codelist uid
    pub fn get_code_lists_uids(&self) -> Result<HashMap<String, String>> {
        let items = self.get_items_checked("ct/codelists/names", unpaged())?;
        Ok(items
            .iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?;
                let uid = item.get("codelist_uid")?.as_str()?;
                Some((name.to_string(), uid.to_string()))
            })
            .collect())
    }

    // =========================================================================
    // Study and template lookups
    // =========================================================================

    /// Objective name → study objective uid
    pub fn get_study_objectives_for_study(
        &self,
        study_uid: &str,
    ) -> Result<HashMap<String, String>> {
        let path = path_join(&["studies", study_uid, "study-objectives"]);
        let items = self.get_items_checked(&path, unpaged())?;
        Ok(items
            .iter()
            .filter_map(|item| {
                let name = item.pointer("/objective/name")?.as_str()?;
                let uid = item.get("study_objective_uid")?.as_str()?;
                Some((name.to_string(), uid.to_string()))
            })
            .collect())
    }

    /// Template name → template. Accepts listing or bare-array replies.
    pub fn get_templates_as_dict(&self, path: &str) -> Result<HashMap<String, Value>> {
        let value = self.send_checked(ApiRequest::get(path).with_params(unpaged()))?;
        let items = match value {
            Value::Array(items) => items,
            other => Page::from_value(path, other)?.items,
        };
        Ok(items
            .into_iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?.to_string();
                Some((name, item))
            })
            .collect())
    }

    /// Study id → study
    pub fn get_studies_as_dict(&self, path: Option<&str>) -> Result<HashMap<String, Value>> {
        let path = path.unwrap_or("/studies");
        let items = self.get_items_checked(path, unpaged())?;
        Ok(items
            .into_iter()
            .filter_map(|item| {
                let study_id = item
                    .pointer("/current_metadata/identification_metadata/study_id")?
                    .as_str()?
                    .to_string();
                Some((study_id, item))
            })
            .collect())
    }

    /// First object under `path` whose `key` equals `name`
    pub fn find_object_by_key(&self, name: &str, path: &str, key: &str) -> Option<Value> {
        let filters = FilterSet::new().eq(key, &[name]);
        let params = QueryParams::new().with("filters", filters);
        let request = ApiRequest::get(path).with_params(params);
        first_item(self.send(request)?)
    }

    /// Uid of the dictionary codelist belonging to library `name`
    pub fn find_dictionary_uid(&self, name: &str) -> Option<String> {
        let request = ApiRequest::get("dictionaries/codelists")
            .with_params(QueryParams::new().with("library_name", name));
        let item = first_item(self.send(request)?)?;
        item.get("codelist_uid")?.as_str().map(str::to_string)
    }

    /// Uid of the dictionary term called `name`
    pub fn find_dictionary_item_uid_from_name(&self, dict_uid: &str, name: &str) -> Option<String> {
        let params = unpaged()
            .with("codelist_uid", dict_uid)
            .with("filters", FilterSet::new().values("name", &[name]));
        let request = ApiRequest::get("dictionaries/terms").with_params(params);
        let item = first_item(self.send(request)?)?;
        item.get("term_uid")?.as_str().map(str::to_string)
    }
}

/// First element of a successful listing's `items`
fn first_item(response: ApiResponse) -> Option<Value> {
    if !response.is_success() {
        return None;
    }
    match response.into_json_or_empty() {
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items.into_iter().next(),
            _ => None,
        },
        _ => None,
    }
}
