//! Page bodies and configuration for the mocked endpoint

use serde_json::{Value, json};
use shift_archiver::{ArchiveConfig, RetryConfig};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path of the mocked submission search endpoint
pub const POSTS_PATH: &str = "/reddit/submission/search";
/// Path of the mocked comment search endpoint
pub const COMMENTS_PATH: &str = "/reddit/comment/search";

/// A submission as the endpoint returns it
pub fn post(id: &str, created_utc: i64) -> Value {
    json!({
        "id": id,
        "created_utc": created_utc,
        "subreddit": "rust",
        "title": format!("Post {id}"),
        "score": 1
    })
}

/// A comment as the endpoint returns it
pub fn comment(id: &str, link_id: &str, created_utc: i64) -> Value {
    json!({
        "id": id,
        "created_utc": created_utc,
        "link_id": link_id,
        "body": format!("Comment {id}")
    })
}

/// A successful page body
pub fn page_body(records: Vec<Value>) -> Value {
    json!({ "data": records })
}

/// Endpoint URL with the community filter already in the query
pub fn endpoint(server: &MockServer, endpoint_path: &str) -> String {
    format!("{}{}?subreddit=rust", server.uri(), endpoint_path)
}

/// Serve `records` for requests after `after`
pub async fn mount_page(server: &MockServer, endpoint_path: &str, after: i64, records: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(endpoint_path))
        .and(query_param("after", after.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(records)))
        .mount(server)
        .await;
}

/// Millisecond delays so retries and pagination run quickly
pub fn fast_config() -> ArchiveConfig {
    ArchiveConfig {
        inter_page_delay: Duration::from_millis(1),
        retry: RetryConfig {
            backoff_step: Duration::from_millis(1),
            ..RetryConfig::default()
        },
        ..ArchiveConfig::default()
    }
}
