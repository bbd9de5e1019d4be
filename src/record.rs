//! Archived record types and cursor arithmetic
//!
//! A record is anything the endpoint returns inside its `data` array that carries a
//! `created_utc` timestamp in epoch seconds. Records are persisted exactly as they
//! serialize, one JSON document per line.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A record that can be fetched from a paginated endpoint and persisted
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Creation time in epoch seconds, if the record carries one
    fn created_utc(&self) -> Option<i64>;
}

impl Record for Value {
    fn created_utc(&self) -> Option<i64> {
        let created = self.get("created_utc")?;
        created
            .as_i64()
            .or_else(|| created.as_f64().map(|secs| secs.floor() as i64))
            .or_else(|| created.as_str().and_then(|s| s.parse().ok()))
    }
}

/// A submission record
///
/// Only the fields the archiver relies on are typed; everything else the endpoint sends
/// is kept in `extra` and written back out unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Base-36 submission id
    pub id: String,
    /// Creation time in epoch seconds
    #[serde(deserialize_with = "epoch_seconds")]
    pub created_utc: i64,
    /// Community the post was submitted to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subreddit: Option<String>,
    /// Post title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// All remaining fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record for Post {
    fn created_utc(&self) -> Option<i64> {
        Some(self.created_utc)
    }
}

/// A comment record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Base-36 comment id
    pub id: String,
    /// Creation time in epoch seconds
    #[serde(deserialize_with = "epoch_seconds")]
    pub created_utc: i64,
    /// Full name of the submission the comment belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
    /// Comment text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// All remaining fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record for Comment {
    fn created_utc(&self) -> Option<i64> {
        Some(self.created_utc)
    }
}

/// Accept `created_utc` as an integer, a float or a numeric string
fn epoch_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(secs) => Ok(secs),
        Raw::Float(secs) => Ok(secs.floor() as i64),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Convert an epoch-seconds timestamp into a cursor in milliseconds
pub fn cursor_from_created(created_utc: i64) -> i64 {
    created_utc.saturating_mul(1000)
}

/// Cursor for the page following one whose last record was created at `last_created_utc`
///
/// Several records can share a timestamp, and the cursor is an exclusive lower bound, so
/// a page ending exactly on the current cursor would be requested again forever. In that
/// case (and if the endpoint ever hands back older records) the cursor moves one
/// millisecond forward instead.
pub fn next_cursor(current: i64, last_created_utc: i64) -> i64 {
    let candidate = cursor_from_created(last_created_utc);
    if candidate <= current {
        current.saturating_add(1)
    } else {
        candidate
    }
}

/// Serialize a page as newline-delimited JSON, one record per line, in page order
pub fn encode_page<T: Serialize>(records: &[T]) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}
