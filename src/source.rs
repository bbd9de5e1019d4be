//! Paginated record sources
//!
//! The archive stream only needs one thing from the remote side: "give me up to `limit`
//! records created after `cursor`, oldest first". [`PageSource`] is that seam;
//! [`HttpPageSource`] is the production implementation talking to a JSON endpoint.

use crate::config::ArchiveConfig;
use crate::error::{Error, Result};
use crate::record::Record;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::marker::PhantomData;
use tracing::debug;
use url::Url;

/// Abstraction over fetching one page of records, enabling testability.
#[async_trait]
pub trait PageSource<T: Record>: Send + Sync {
    /// Fetch up to `limit` records created strictly after `after` (milliseconds), ascending
    ///
    /// An empty page means the source is exhausted.
    async fn fetch_page(&self, after: i64, limit: usize) -> Result<Vec<T>>;

    /// Human readable location for diagnostics
    fn describe(&self) -> String {
        "page source".to_string()
    }
}

/// Response envelope of the paginated endpoint
#[derive(Debug, Deserialize)]
struct PageResponse<T> {
    data: Option<Vec<T>>,
    error: Option<Value>,
}

impl<T> PageResponse<T> {
    fn into_records(self) -> Result<Vec<T>> {
        if let Some(message) = self.error.as_ref().and_then(error_message) {
            return Err(Error::Api(message));
        }
        self.data
            .ok_or_else(|| Error::Api("No data returned".to_string()))
    }
}

/// Extract a message from a truthy `error` field
fn error_message(error: &Value) -> Option<String> {
    match error {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => Some(
            map.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        ),
        other => Some(other.to_string()),
    }
}

/// Decode a page body; `status` is only used to explain unreadable bodies
pub fn parse_page<T: Record>(status: u16, body: &[u8]) -> Result<Vec<T>> {
    match serde_json::from_slice::<PageResponse<T>>(body) {
        Ok(response) => response.into_records(),
        Err(_) if !(200..300).contains(&status) => Err(Error::Http { status }),
        Err(e) => Err(Error::Serialization(e)),
    }
}

/// [`PageSource`] backed by an HTTP JSON endpoint
///
/// The endpoint may already carry query parameters (for example a community or author
/// filter); the pagination parameters `limit`, `sort`, `after` and `meta-app` are
/// appended to them on every request.
pub struct HttpPageSource<T> {
    client: reqwest::Client,
    endpoint: Url,
    app_tag: String,
    _record: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for HttpPageSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPageSource")
            .field("endpoint", &self.endpoint.as_str())
            .field("app_tag", &self.app_tag)
            .finish()
    }
}

impl<T> HttpPageSource<T> {
    /// Create a source for `endpoint` using the HTTP settings of `config`
    ///
    /// # Errors
    /// Returns error if the endpoint is not a valid absolute URL or the HTTP client
    /// cannot be created
    pub fn new(endpoint: &str, config: &ArchiveConfig) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::config("endpoint", format!("invalid endpoint URL: {e}")))?;

        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(client, endpoint, config.app_tag.clone()))
    }

    /// Create a source sharing an existing HTTP client
    pub fn with_client(client: reqwest::Client, endpoint: Url, app_tag: String) -> Self {
        Self {
            client,
            endpoint,
            app_tag,
            _record: PhantomData,
        }
    }

    /// URL requested for the page after `after`
    pub fn page_url(&self, after: i64, limit: usize) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("sort", "asc")
            .append_pair("after", &after.to_string())
            .append_pair("meta-app", &self.app_tag);
        url
    }
}

#[async_trait]
impl<T: Record> PageSource<T> for HttpPageSource<T> {
    async fn fetch_page(&self, after: i64, limit: usize) -> Result<Vec<T>> {
        let url = self.page_url(after, limit);
        debug!(url = %url, "Requesting page");

        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        parse_page(status, &body)
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}
