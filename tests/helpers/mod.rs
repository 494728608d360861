//! Scripted transport shared by the integration tests
//!
//! Answers every request from a responder closure, records what was sent,
//! and tracks how many requests were in flight at once.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mdr_api_bindings::{
    ApiHeaders, ApiRequest, ApiResponse, BlockingTransport, Method, Result, Transport,
};
use serde_json::Value;

type Responder = dyn Fn(&ApiRequest) -> Result<ApiResponse> + Send + Sync;

/// Transport whose responses come from a closure. Clones share all state.
#[derive(Clone)]
pub struct ScriptedTransport {
    responder: Arc<Responder>,
    requests: Arc<Mutex<Vec<ApiRequest>>>,
    headers: Arc<Mutex<ApiHeaders>>,
    stall: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            requests: Arc::new(Mutex::new(Vec::new())),
            headers: Arc::new(Mutex::new(ApiHeaders::new())),
            stall: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every request gets the same JSON response
    pub fn always(status: u16, body: Value) -> Self {
        Self::new(move |_| Ok(ApiResponse::json(status, body.clone())))
    }

    /// Hold each request for `stall` before answering
    pub fn with_stall(mut self, stall: Duration) -> Self {
        self.stall = Some(stall);
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: Method, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    /// Paths of every request, in send order
    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }

    pub fn headers(&self) -> ApiHeaders {
        self.headers.lock().unwrap().clone()
    }

    /// Highest number of requests observed in flight at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self, request: &ApiRequest) {
        self.requests.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.responder)(request)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.enter(&request);
        match self.stall {
            Some(stall) => tokio::time::sleep(stall).await,
            None => tokio::task::yield_now().await,
        }
        self.leave(&request)
    }

    fn update_headers(&mut self, headers: &ApiHeaders) -> Result<()> {
        *self.headers.lock().unwrap() = headers.clone();
        Ok(())
    }
}

impl BlockingTransport for ScriptedTransport {
    fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.enter(&request);
        if let Some(stall) = self.stall {
            std::thread::sleep(stall);
        }
        self.leave(&request)
    }

    fn update_headers(&mut self, headers: &ApiHeaders) -> Result<()> {
        *self.headers.lock().unwrap() = headers.clone();
        Ok(())
    }
}

/// `status` with a `{"message": ...}` body
pub fn error_response(status: u16, message: &str) -> ApiResponse {
    ApiResponse::json(status, serde_json::json!({ "message": message }))
}
