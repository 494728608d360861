//! MDR API bindings
//!
//! Binding layer that drives a metadata-repository REST service to bulk-load
//! and transition clinical reference data (terminology, libraries, templates,
//! study objects).
//!
//! ## Architecture
//! caller -> Orchestrator -> ConcurrencyGate -> Transport -> ErrorClassifier -> metrics/log
//!
//! Bulk reads go through the pagination aggregator beside the transport.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mdr_api_bindings::{ApiBinding, BindingConfig, StartupContext};
//!
//! let config = BindingConfig::new("http://localhost:5003/api");
//! let (api, report) = ApiBinding::connect_http(config, None, StartupContext::Import)?;
//! println!("{} CT packages installed", report.installed.len());
//! for library in api.get_libraries()? {
//!     println!("{}", library);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Core error handling
pub mod error;

// Configuration and injected lookup tables
pub mod config;

// Failure classification and metrics contract
pub mod classify;
pub mod metrics;

// Request plumbing
pub mod gate;
pub mod pagination;
pub mod transport;

// Result reshaping
pub mod lookup;

// Synchronous binding, async workflows, preflight
pub mod binding;
pub mod startup;
pub mod workflow;

pub use binding::ApiBinding;
pub use classify::{ClassifierRule, ErrorCategory, ErrorClassifier};
pub use config::{ApiHeaders, BindingConfig, CodelistMap};
pub use error::{ApiError, Result, StartupFailure};
pub use gate::ConcurrencyGate;
pub use metrics::{CountedKey, Metrics, MetricsSink, Outcome};
pub use pagination::{fetch_all, Page, PageCursor};
pub use startup::{PackageReport, StartupContext, StartupVerifier};
pub use transport::{
    ApiRequest, ApiResponse, BlockingHttpTransport, BlockingTransport, FilterSet, HttpTransport,
    Method, QueryParams, ResponseBody, Transport,
};
pub use workflow::{
    CreateOutcome, Orchestrator, Reply, StepFailure, VersionOutcome, VersionWorkItem, WorkItem,
};
