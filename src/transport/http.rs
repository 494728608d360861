//! reqwest-backed transports
//!
//! No timeout is set here; whatever the reqwest defaults are apply.

use super::{decode_body, path_join, ApiRequest, ApiResponse, BlockingTransport, Transport};
use crate::config::{ApiHeaders, BindingConfig};
use crate::error::{ApiError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

/// Build a reqwest header map, rejecting names or values it cannot send
fn build_header_map(headers: &ApiHeaders) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers.iter() {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| ApiError::InvalidHeader {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| ApiError::InvalidHeader {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Async transport over `reqwest::Client`
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, headers: &ApiHeaders) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            headers: build_header_map(headers)?,
        })
    }

    pub fn from_config(config: &BindingConfig) -> Result<Self> {
        Self::new(config.base_url.clone(), &config.headers)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = path_join(&[&self.base_url, &request.path]);
        debug!("{} {}", request.method, url);

        let mut builder = self
            .client
            .request(request.method.into(), &url)
            .headers(self.headers.clone());
        if !request.params.is_empty() {
            builder = builder.query(request.params.pairs());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        Ok(ApiResponse {
            status,
            body: decode_body(request.method, &request.path, status, text),
        })
    }

    fn update_headers(&mut self, headers: &ApiHeaders) -> Result<()> {
        self.headers = build_header_map(headers)?;
        Ok(())
    }
}

/// Blocking transport over `reqwest::blocking::Client`.
///
/// Must not be created or used from inside an async runtime.
pub struct BlockingHttpTransport {
    client: reqwest::blocking::Client,
    base_url: String,
    headers: HeaderMap,
}

impl BlockingHttpTransport {
    pub fn new(base_url: impl Into<String>, headers: &ApiHeaders) -> Result<Self> {
        let client = reqwest::blocking::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            headers: build_header_map(headers)?,
        })
    }

    pub fn from_config(config: &BindingConfig) -> Result<Self> {
        Self::new(config.base_url.clone(), &config.headers)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl BlockingTransport for BlockingHttpTransport {
    fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = path_join(&[&self.base_url, &request.path]);
        debug!("{} {}", request.method, url);

        let mut builder = self
            .client
            .request(request.method.into(), &url)
            .headers(self.headers.clone());
        if !request.params.is_empty() {
            builder = builder.query(request.params.pairs());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let text = response.text()?;

        Ok(ApiResponse {
            status,
            body: decode_body(request.method, &request.path, status, text),
        })
    }

    fn update_headers(&mut self, headers: &ApiHeaders) -> Result<()> {
        self.headers = build_header_map(headers)?;
        Ok(())
    }
}
