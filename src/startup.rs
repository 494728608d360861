//! Startup verification
//!
//! One-shot preflight run when a binding is built: the API must answer on
//! its discovery endpoint, and the mandatory controlled-terminology packages
//! must be installed. Failures come back as `StartupFailure`; exiting is the
//! host's decision.

use crate::config::BindingConfig;
use crate::error::StartupFailure;
use crate::transport::{path_join, ApiRequest, BlockingTransport, QueryParams, ResponseBody};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{error, info, warn};

pub const PACKAGES_PATH: &str = "/ct/packages";

/// Who is building the binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartupContext {
    /// Regular import run; packages are checked
    #[default]
    Import,
    /// Schema migration; the package check is skipped
    SchemaMigration,
}

/// What the package check found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageReport {
    /// Catalogue names of installed packages
    pub installed: BTreeSet<String>,
    /// Optional catalogues that are not installed
    pub missing_optional: Vec<String>,
    /// False when the check was skipped
    pub checked: bool,
}

pub struct StartupVerifier<'a> {
    config: &'a BindingConfig,
}

impl<'a> StartupVerifier<'a> {
    pub fn new(config: &'a BindingConfig) -> Self {
        Self { config }
    }

    pub fn verify<B>(
        &self,
        transport: &B,
        context: StartupContext,
    ) -> Result<PackageReport, StartupFailure>
    where
        B: BlockingTransport + ?Sized,
    {
        self.verify_connection(transport)?;
        if context == StartupContext::SchemaMigration {
            info!("Schema migration context, skipping CT package check");
            return Ok(PackageReport::default());
        }
        self.check_for_ct_packages(transport)
    }

    /// GET the discovery endpoint; anything but 2xx is fatal
    pub fn verify_connection<B>(&self, transport: &B) -> Result<(), StartupFailure>
    where
        B: BlockingTransport + ?Sized,
    {
        let url = path_join(&[&self.config.base_url, &self.config.discovery_path]);
        let reason = match transport.execute(ApiRequest::get(&self.config.discovery_path)) {
            Ok(response) if response.is_success() => return Ok(()),
            Ok(response) => format!("status {}", response.status),
            Err(e) => e.to_string(),
        };
        error!(
            critical = true,
            "Failed to connect to backend, is it running?\nError was:\n{}", reason
        );
        Err(StartupFailure::Unreachable { url, reason })
    }

    /// Compare installed catalogue names against the mandatory and optional sets
    pub fn check_for_ct_packages<B>(&self, transport: &B) -> Result<PackageReport, StartupFailure>
    where
        B: BlockingTransport + ?Sized,
    {
        let installed = self.installed_catalogues(transport)?;

        let missing: Vec<String> = self
            .config
            .mandatory_packages
            .difference(&installed)
            .cloned()
            .collect();
        if !missing.is_empty() {
            error!(
                critical = true,
                "Missing CT packages: {}.\n\
                 Please run the clinical standards import before this tool.",
                missing.join(",")
            );
            return Err(StartupFailure::MissingMandatoryPackages { missing });
        }

        let missing_optional: Vec<String> = self
            .config
            .optional_packages
            .difference(&installed)
            .cloned()
            .collect();
        if !missing_optional.is_empty() {
            warn!("Missing optional CT packages: {}.", missing_optional.join(","));
        }

        Ok(PackageReport {
            installed,
            missing_optional,
            checked: true,
        })
    }

    fn installed_catalogues<B>(&self, transport: &B) -> Result<BTreeSet<String>, StartupFailure>
    where
        B: BlockingTransport + ?Sized,
    {
        let fail = |reason: String| {
            error!(critical = true, "Failed to list CT packages: {}", reason);
            StartupFailure::Unreachable {
                url: path_join(&[&self.config.base_url, PACKAGES_PATH]),
                reason,
            }
        };

        let params = QueryParams::new()
            .with("page_number", 1)
            .with("page_size", 0);
        let response = transport
            .execute(ApiRequest::get(PACKAGES_PATH).with_params(params))
            .map_err(|e| fail(e.to_string()))?;
        if !response.is_success() {
            return Err(fail(format!(
                "status {}: {}",
                response.status,
                response.error_message()
            )));
        }

        let packages = match response.body {
            ResponseBody::Json(Value::Array(items)) => items,
            ResponseBody::Json(Value::Object(mut map)) => match map.remove("items") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => return Err(fail("package list is not JSON".to_string())),
        };

        Ok(packages
            .iter()
            .filter_map(|p| p.get("catalogue_name").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }
}
