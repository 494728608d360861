//! Pagination aggregator
//!
//! Listing endpoints take `page_number` (1-based), `page_size` and an
//! optional `total_count` flag. The first request asks for the total; later
//! requests do not. Fetching continues while `page_size * page_number < total`.
//! A short final page is returned as-is, and any failed page fails the fetch.

use crate::error::{ApiError, Result};
use crate::transport::QueryParams;
use serde_json::Value;
use tracing::info;

/// One page of a listing response
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub total: Option<u64>,
}

impl Page {
    /// Extract `items` (and `total`, when present) from a listing body
    pub fn from_value(path: &str, mut value: Value) -> Result<Self> {
        let total = value.get("total").and_then(Value::as_u64);
        let items = match value.get_mut("items").map(Value::take) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ApiError::MissingField {
                    path: path.to_string(),
                    field: "items".to_string(),
                })
            }
        };
        Ok(Self { items, total })
    }
}

/// Position within a paged fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    page_number: u32,
    page_size: u32,
    total: u64,
}

impl PageCursor {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_number: 1,
            page_size,
            total: 0,
        }
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    /// Number of pages needed to cover the total
    pub fn page_count(&self) -> u64 {
        self.total.div_ceil(u64::from(self.page_size.max(1)))
    }

    pub fn has_more(&self) -> bool {
        u64::from(self.page_size) * u64::from(self.page_number) < self.total
    }

    pub fn advance(&mut self) {
        self.page_number += 1;
    }

    /// Query for the current page, on top of the caller's own parameters
    pub fn params(&self, base: &QueryParams) -> QueryParams {
        let mut params = base.clone();
        params.set("page_number", self.page_number);
        params.set("page_size", self.page_size);
        params.set("total_count", self.page_number == 1);
        params
    }
}

/// Fetch every page of `path` and concatenate the items in page order.
///
/// `fetch_page` performs one request with the given query and returns the
/// decoded page.
pub fn fetch_all<F>(
    path: &str,
    base: &QueryParams,
    page_size: u32,
    mut fetch_page: F,
) -> Result<Vec<Value>>
where
    F: FnMut(&QueryParams) -> Result<Page>,
{
    if page_size == 0 {
        return Err(ApiError::Pagination {
            path: path.to_string(),
            message: "page size must be at least 1".to_string(),
        });
    }

    let mut cursor = PageCursor::new(page_size);
    info!("Fetching {}, page size: {}", path, page_size);

    let first = fetch_page(&cursor.params(base))?;
    let total = first.total.ok_or_else(|| ApiError::MissingField {
        path: path.to_string(),
        field: "total".to_string(),
    })?;
    cursor.set_total(total);
    let mut all_items = first.items;

    while cursor.has_more() {
        cursor.advance();
        info!(
            "Fetching {}, page {} of {}",
            path,
            cursor.page_number(),
            cursor.page_count()
        );
        let page = fetch_page(&cursor.params(base))?;
        all_items.extend(page.items);
    }

    Ok(all_items)
}
