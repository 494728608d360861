//! Synchronous binding tests: write calls and their metrics keys, paged and
//! terminology reads, and startup verification.
//!
//! Run: cargo test --test binding_test

mod helpers;

use std::sync::Arc;

use helpers::{error_response, ScriptedTransport};
use mdr_api_bindings::{
    ApiBinding, ApiError, ApiHeaders, ApiRequest, ApiResponse, BindingConfig, BlockingTransport,
    CodelistMap, FilterSet, Method, Metrics, MetricsSink, QueryParams, StartupContext,
    StartupFailure, WorkItem,
};
use serde_json::{json, Value};

fn config() -> BindingConfig {
    BindingConfig::new("http://mdr.test/api")
}

fn binding(transport: &ScriptedTransport) -> (ApiBinding<ScriptedTransport>, Arc<Metrics>) {
    binding_with(config(), transport)
}

fn binding_with(
    config: BindingConfig,
    transport: &ScriptedTransport,
) -> (ApiBinding<ScriptedTransport>, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    let sink: Arc<dyn MetricsSink> = metrics.clone();
    (ApiBinding::new(config, transport.clone(), Some(sink)), metrics)
}

fn param<'a>(request: &'a ApiRequest, key: &str) -> Option<&'a str> {
    request.params.get(key)
}

fn filters_of(request: &ApiRequest) -> Value {
    serde_json::from_str(param(request, "filters").expect("filters param")).unwrap()
}

// =============================================================================
// Writes and metrics keys
// =============================================================================

#[test]
fn test_simple_post_success_counts_post() {
    let transport = ScriptedTransport::always(201, json!({ "uid": "L1" }));
    let (api, metrics) = binding(&transport);

    let result = api.simple_post_to_api("/libraries", &json!({ "name": "Sponsor" }), None, None);

    assert_eq!(result, Some(json!({ "uid": "L1" })));
    assert_eq!(metrics.get("/libraries--POST"), 1);
}

#[test]
fn test_simple_post_failures_are_classified() {
    let cases = [
        ("There is already a library named Sponsor", "--AlreadyExists"),
        ("Study has no approved objective", "--NoObjective"),
        ("Library does not exist", "--NotFound"),
        ("Internal error", "--ERROR"),
    ];
    for (message, suffix) in cases {
        let transport = ScriptedTransport::new(move |_| Ok(error_response(400, message)));
        let (api, metrics) = binding(&transport);

        let result =
            api.simple_post_to_api("/objectives", &json!({}), Some("/objective-post"), None);

        assert_eq!(result, None);
        assert_eq!(
            metrics.get(&format!("/objective-post{}", suffix)),
            1,
            "message: {}",
            message
        );
    }
}

#[test]
fn test_simple_post_passes_query_params() {
    let transport = ScriptedTransport::always(201, json!({}));
    let (api, _) = binding(&transport);

    let params = QueryParams::new().with("library_name", "Sponsor");
    api.simple_post_to_api("/ct/terms", &json!({}), None, Some(&params));

    let sent = &transport.requests().remove(0);
    assert_eq!(param(sent, "library_name"), Some("Sponsor"));
}

#[test]
fn test_post_to_api_strips_digits_from_key() {
    let transport = ScriptedTransport::always(201, json!({ "uid": "SA1" }));
    let (api, metrics) = binding(&transport);

    let item = WorkItem::new("/studies/Study_000001/study-activities", json!({ "name": "Visit" }));
    assert!(api.post_to_api(&item).is_some());

    assert_eq!(metrics.get("/studies/Study_/study-activities--POST"), 1);
    assert_eq!(transport.paths(), vec!["/studies/Study_000001/study-activities"]);
}

#[test]
fn test_patch_to_api_uses_body_uid() {
    let transport = ScriptedTransport::always(200, json!({ "uid": "CT1" }));
    let (api, metrics) = binding(&transport);

    let body = json!({ "uid": "CT1", "name": "Renamed" });
    assert!(api.patch_to_api(&body, "/ct/codelists").is_some());

    let sent = &transport.requests().remove(0);
    assert_eq!(sent.method, Method::Patch);
    assert_eq!(sent.path, "/ct/codelists/CT1");
    assert_eq!(metrics.get("/ct/codelists--Patch"), 1);
}

#[test]
fn test_patch_to_api_without_uid_sends_nothing() {
    let transport = ScriptedTransport::always(200, json!({}));
    let (api, _) = binding(&transport);

    assert_eq!(api.patch_to_api(&json!({ "name": "x" }), "/ct/codelists"), None);
    assert!(transport.requests().is_empty());
}

#[test]
fn test_simple_patch_failure_counts_patch_error() {
    let transport = ScriptedTransport::new(|_| Ok(error_response(422, "Invalid payload")));
    let (api, metrics) = binding(&transport);

    assert_eq!(api.simple_patch(&json!({}), "/ct/terms/T1/names", "/ct/terms"), None);
    assert_eq!(metrics.get("/ct/terms--Patch-ERROR"), 1);
}

#[test]
fn test_simple_delete() {
    let transport = ScriptedTransport::new(|req| {
        Ok(if req.path.ends_with("missing") {
            error_response(404, "Template not found")
        } else {
            ApiResponse::json(204, json!({}))
        })
    });
    let (api, metrics) = binding(&transport);

    assert!(api.simple_delete("/templates/T1", Some("/templates")));
    assert!(!api.simple_delete("/templates/missing", Some("/templates")));

    assert_eq!(metrics.get("/templates--DELETE"), 1);
    assert_eq!(metrics.get("/templates--ERROR"), 1);
}

// =============================================================================
// Approvals
// =============================================================================

#[test]
fn test_approve_item_posts_to_approvals() {
    let transport = ScriptedTransport::always(201, json!({ "status": "Final" }));
    let (api, _) = binding(&transport);

    let result = api.approve_item("CTTerm_000001", "/ct/terms");

    assert_eq!(result, Some(json!({ "status": "Final" })));
    assert_eq!(transport.paths(), vec!["/ct/terms/CTTerm_000001/approvals"]);
}

#[test]
fn test_names_and_attributes_stop_at_first_failure() {
    let transport = ScriptedTransport::new(|req| {
        Ok(if req.path.ends_with("names/approvals") {
            error_response(400, "Term is not in draft")
        } else {
            ApiResponse::json(201, json!({}))
        })
    });
    let (api, _) = binding(&transport);

    assert!(!api.approve_item_names_and_attributes("T1", "/ct/terms"));
    assert_eq!(transport.paths(), vec!["/ct/terms/T1/names/approvals"]);
}

#[test]
fn test_simple_approve2_uses_label_in_key() {
    let transport = ScriptedTransport::always(201, json!({}));
    let (api, metrics) = binding(&transport);

    assert!(api.simple_approve2("/ct/codelists", "C1/attributes/approvals", "Attributes"));

    assert_eq!(metrics.get("/ct/codelists/C/attributes/approvals--AttributesApprove"), 1);
}

// =============================================================================
// Reads
// =============================================================================

#[test]
fn test_get_all_from_api_defaults_to_unpaged() {
    let transport = ScriptedTransport::always(200, json!({ "items": [] }));
    let (api, _) = binding(&transport);

    api.get_all_from_api("/studies", None);
    let params = QueryParams::new().with("page_size", 50).with("sort_by", "name");
    api.get_all_from_api("/studies", Some(&params));

    let sent = transport.requests();
    assert_eq!(param(&sent[0], "page_number"), Some("1"));
    assert_eq!(param(&sent[0], "page_size"), Some("0"));
    assert_eq!(param(&sent[1], "page_size"), Some("50"));
    assert_eq!(param(&sent[1], "sort_by"), Some("name"));
}

#[test]
fn test_get_all_from_api_returns_none_on_failure() {
    let transport = ScriptedTransport::new(|_| Ok(ApiResponse::text(500, "<html>oops</html>")));
    let (api, _) = binding(&transport);

    assert_eq!(api.get_all_from_api("/studies", None), None);
}

#[test]
fn test_get_all_items_counts_gets() {
    let transport =
        ScriptedTransport::always(200, json!({ "items": [{ "uid": "a" }, { "uid": "b" }] }));
    let (api, metrics) = binding(&transport);

    let items = api.get_all_items("/ct/packages", None).unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(metrics.get("/ct/packages--GET"), 2);
}

fn paged_listing(total: usize) -> ScriptedTransport {
    ScriptedTransport::new(move |req| {
        let page: usize = req.params.get("page_number").unwrap().parse().unwrap();
        let size: usize = req.params.get("page_size").unwrap().parse().unwrap();
        let start = (page - 1) * size;
        let items: Vec<Value> = (start..total.min(start + size))
            .map(|i| json!({ "uid": format!("item-{}", i) }))
            .collect();
        let mut body = json!({ "items": items });
        if req.params.get("total_count") == Some("true") {
            body["total"] = json!(total);
        }
        Ok(ApiResponse::json(200, body))
    })
}

#[test]
fn test_paged_fetch_collects_every_page() {
    let transport = paged_listing(25);
    let (api, metrics) = binding(&transport);

    let items = api
        .get_all_from_api_paged("/concepts/activities/activities", None, Some(10))
        .unwrap();

    assert_eq!(items.len(), 25);
    assert_eq!(items[24]["uid"], "item-24");
    let pages: Vec<String> = transport
        .requests()
        .iter()
        .map(|r| r.params.get("page_number").unwrap().to_string())
        .collect();
    assert_eq!(pages, vec!["1", "2", "3"]);
    assert_eq!(metrics.get("/concepts/activities/activities--GET"), 25);
}

#[test]
fn test_paged_fetch_fails_on_failed_page() {
    let listing = paged_listing(25);
    let transport = ScriptedTransport::new(move |req| {
        if req.params.get("page_number") == Some("2") {
            return Ok(error_response(503, "Service unavailable"));
        }
        BlockingTransport::execute(&listing, req.clone())
    });
    let (api, _) = binding(&transport);

    let err = api
        .get_all_from_api_paged("/concepts/activities/activities", None, Some(10))
        .unwrap_err();

    assert_eq!(err.status(), Some(503));
}

#[test]
fn test_activity_objects_use_activity_page_size_and_filters() {
    let transport = paged_listing(3);
    let (api, _) = binding(&transport);

    let filters = FilterSet::new().eq("library_name", &["Sponsor"]);
    let items = api
        .get_all_activity_objects("activity-instances", Some(&filters))
        .unwrap();

    assert_eq!(items.len(), 3);
    let sent = &transport.requests().remove(0);
    assert_eq!(sent.path, "/concepts/activities/activity-instances");
    assert_eq!(param(sent, "page_size"), Some("100"));
    assert_eq!(
        filters_of(sent),
        json!({ "library_name": { "v": ["Sponsor"], "op": "eq" } })
    );
}

#[test]
fn test_get_libraries_and_errors() {
    let transport =
        ScriptedTransport::always(200, json!([{ "name": "CDISC" }, { "name": "Sponsor" }]));
    let (api, _) = binding(&transport);
    assert_eq!(api.get_libraries().unwrap(), vec!["CDISC", "Sponsor"]);

    let failing = ScriptedTransport::new(|_| Ok(error_response(500, "down")));
    let (api, _) = binding(&failing);
    match api.get_libraries() {
        Err(ApiError::Status { status, message, .. }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "down");
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

// =============================================================================
// Terminology and study lookups
// =============================================================================

#[test]
fn test_codelist_terms_by_uid_when_name_is_mapped() {
    let transport = ScriptedTransport::always(200, json!({ "items": [{ "term_uid": "T1" }] }));
    let codelists = CodelistMap::empty().with_entry("Unit", "C71620");
    let (api, _) = binding_with(config().with_codelists(codelists), &transport);

    api.get_terms_for_codelist_name("Unit").unwrap();
    api.get_terms_for_codelist_name("Epoch Type").unwrap();

    let sent = transport.requests();
    assert_eq!(sent[0].path, "ct/terms");
    assert_eq!(param(&sent[0], "codelist_uid"), Some("C71620"));
    assert_eq!(param(&sent[0], "codelist_name"), None);
    assert_eq!(param(&sent[1], "codelist_name"), Some("Epoch Type"));
}

#[test]
fn test_lookup_terms_from_concept_id_filters() {
    let transport = ScriptedTransport::always(200, json!({ "items": [] }));
    let (api, _) = binding(&transport);

    api.lookup_terms_from_concept_id("C49488", Some("SDTM CT"), None)
        .unwrap();

    let sent = &transport.requests().remove(0);
    assert_eq!(param(sent, "library_name"), Some("CDISC"));
    assert_eq!(
        filters_of(sent),
        json!({
            "concept_id": { "v": ["C49488"], "op": "eq" },
            "catalogue_name": { "v": ["SDTM CT"], "op": "eq" },
        })
    );
}

#[test]
fn test_lookup_without_items_is_an_error() {
    let transport = ScriptedTransport::always(200, json!({ "unexpected": true }));
    let (api, _) = binding(&transport);

    assert!(matches!(
        api.get_terms_for_codelist_uid("C66781"),
        Err(ApiError::MissingField { .. })
    ));
}

#[test]
fn test_code_lists_and_objectives_as_maps() {
    let transport = ScriptedTransport::new(|req| {
        Ok(match req.path.as_str() {
            "ct/codelists/names" => ApiResponse::json(
                200,
                json!({ "items": [
                    { "name": "Unit", "codelist_uid": "CL1" },
                    { "name": "NoUid" },
                ] }),
            ),
            _ => ApiResponse::json(
                200,
                json!({ "items": [
                    { "objective": { "name": "Primary" }, "study_objective_uid": "SO1" },
                ] }),
            ),
        })
    });
    let (api, _) = binding(&transport);

    let codelists = api.get_code_lists_uids().unwrap();
    assert_eq!(codelists.len(), 1);
    assert_eq!(codelists["Unit"], "CL1");

    let objectives = api.get_study_objectives_for_study("Study_000001").unwrap();
    assert_eq!(objectives["Primary"], "SO1");
    assert_eq!(transport.paths()[1], "studies/Study_000001/study-objectives");
}

#[test]
fn test_studies_keyed_by_study_id() {
    let transport = ScriptedTransport::always(
        200,
        json!({ "items": [
            {
                "uid": "S1",
                "current_metadata": {
                    "identification_metadata": { "study_id": "CDISC DEV-0" }
                },
            },
            { "uid": "S2" },
        ] }),
    );
    let (api, _) = binding(&transport);

    let studies = api.get_studies_as_dict(None).unwrap();

    assert_eq!(studies.len(), 1);
    assert_eq!(studies["CDISC DEV-0"]["uid"], "S1");
}

#[test]
fn test_dictionary_lookups() {
    let transport = ScriptedTransport::new(|req| {
        Ok(match req.path.as_str() {
            "dictionaries/codelists" => {
                ApiResponse::json(200, json!({ "items": [{ "codelist_uid": "DictCL_1" }] }))
            }
            _ => ApiResponse::json(200, json!({ "items": [{ "term_uid": "DictTerm_9" }] })),
        })
    });
    let (api, _) = binding(&transport);

    assert_eq!(api.find_dictionary_uid("SNOMED"), Some("DictCL_1".into()));
    assert_eq!(
        api.find_dictionary_item_uid_from_name("DictCL_1", "Headache"),
        Some("DictTerm_9".into())
    );
    let sent = transport.requests();
    assert_eq!(param(&sent[0], "library_name"), Some("SNOMED"));
    assert_eq!(filters_of(&sent[1]), json!({ "name": { "v": ["Headache"] } }));
}

#[test]
fn test_update_headers_replaces_config_headers() {
    let transport = ScriptedTransport::always(200, json!({}));
    let (mut api, _) = binding(&transport);

    let headers = ApiHeaders::new().with_header("X-Request-Source", "import");
    api.update_headers(headers.clone()).unwrap();

    assert_eq!(api.config().headers, headers);
    assert_eq!(transport.headers(), headers);
}

// =============================================================================
// Startup verification
// =============================================================================

fn packages(names: &[&str]) -> Value {
    let items: Vec<Value> = names.iter().map(|n| json!({ "catalogue_name": n })).collect();
    json!(items)
}

fn repository(installed: Value) -> ScriptedTransport {
    ScriptedTransport::new(move |req| {
        Ok(match req.path.as_str() {
            "openapi.json" => ApiResponse::json(200, json!({ "openapi": "3.0.2" })),
            "/ct/packages" => ApiResponse::json(200, installed.clone()),
            _ => error_response(404, "not found"),
        })
    })
}

const MANDATORY: [&str; 4] = ["ADAM CT", "CDASH CT", "DEFINE-XML CT", "SDTM CT"];

#[test]
fn test_startup_passes_with_mandatory_packages() {
    let mut installed = MANDATORY.to_vec();
    installed.push("SEND CT");
    let transport = repository(packages(&installed));

    let (_, report) =
        ApiBinding::connect(config(), transport.clone(), None, StartupContext::Import).unwrap();

    assert!(report.checked);
    assert_eq!(report.installed.len(), 5);
    assert!(report.missing_optional.contains(&"COA CT".to_string()));
    assert!(!report.missing_optional.contains(&"SEND CT".to_string()));
}

#[test]
fn test_startup_fails_on_missing_mandatory() {
    let transport = repository(json!({ "items": [{ "catalogue_name": "SDTM CT" }] }));

    let err = ApiBinding::connect(config(), transport, None, StartupContext::Import)
        .err()
        .expect("startup should fail");

    match err {
        StartupFailure::MissingMandatoryPackages { missing } => {
            assert_eq!(missing, vec!["ADAM CT", "CDASH CT", "DEFINE-XML CT"]);
        }
        other => panic!("unexpected failure: {:?}", other),
    }
}

#[test]
fn test_startup_fails_when_unreachable() {
    let transport = ScriptedTransport::new(|_| Ok(error_response(503, "starting up")));

    let err = ApiBinding::connect(config(), transport.clone(), None, StartupContext::Import)
        .err()
        .expect("startup should fail");

    assert!(matches!(err, StartupFailure::Unreachable { .. }));
    assert_eq!(transport.requests().len(), 1);
}

#[test]
fn test_schema_migration_skips_package_check() {
    let transport = repository(packages(&[]));

    let (_, report) = ApiBinding::connect(
        config(),
        transport.clone(),
        None,
        StartupContext::SchemaMigration,
    )
    .unwrap();

    assert!(!report.checked);
    assert_eq!(transport.paths(), vec!["openapi.json"]);
}
