//! Configuration types for shift-archiver

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff and give-up policy for consecutive fetch/persist failures
///
/// After the `n`-th consecutive failure the stream waits `n * backoff_step` before the
/// next attempt. A failure episode accumulates a cost of `0.5 * n²`; once that cost
/// exceeds `give_up_cost` the stream stops and reports itself done. With the defaults
/// the 12th consecutive failure gives up, after roughly 66 seconds of backoff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay unit multiplied by the consecutive failure count (default: 1 second)
    #[serde(default = "default_backoff_step", with = "duration_ms_serde")]
    pub backoff_step: Duration,

    /// Episode cost above which the stream gives up (default: 60.0)
    #[serde(default = "default_give_up_cost")]
    pub give_up_cost: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_step: default_backoff_step(),
            give_up_cost: default_give_up_cost(),
        }
    }
}

/// Per-stream archiving configuration
///
/// Every field has a serde default, so an empty JSON object yields the same
/// configuration as [`ArchiveConfig::default`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Records requested per page (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Pause between two successful pages, bounding the request rate (default: 75ms)
    #[serde(default = "default_inter_page_delay", with = "duration_ms_serde")]
    pub inter_page_delay: Duration,

    /// Minimum time between two checkpoint flushes of the sink (default: 60 seconds)
    #[serde(default = "default_flush_interval", with = "duration_ms_serde")]
    pub flush_interval: Duration,

    /// Identifying tag sent as the `meta-app` query parameter (default: "download-tool")
    #[serde(default = "default_app_tag")]
    pub app_tag: String,

    /// User agent for HTTP requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (None = only manual abort via pause/cancel)
    #[serde(default, with = "optional_duration_ms_serde")]
    pub request_timeout: Option<Duration>,

    /// Failure backoff and give-up policy
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            inter_page_delay: default_inter_page_delay(),
            flush_interval: default_flush_interval(),
            app_tag: default_app_tag(),
            user_agent: default_user_agent(),
            request_timeout: None,
            retry: RetryConfig::default(),
        }
    }
}

impl ArchiveConfig {
    /// Check the configuration for values the fetch loop cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::config("page_size", "must be greater than zero"));
        }
        if self.retry.give_up_cost.is_nan() || self.retry.give_up_cost <= 0.0 {
            return Err(Error::config(
                "retry.give_up_cost",
                "must be a positive number",
            ));
        }
        if self.app_tag.trim().is_empty() {
            return Err(Error::config("app_tag", "must not be empty"));
        }
        Ok(())
    }
}

fn default_page_size() -> usize {
    100
}

fn default_inter_page_delay() -> Duration {
    Duration::from_millis(75)
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_app_tag() -> String {
    "download-tool".to_string()
}

fn default_user_agent() -> String {
    concat!("shift-archiver/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_backoff_step() -> Duration {
    Duration::from_secs(1)
}

fn default_give_up_cost() -> f64 {
    60.0
}

// Duration serialization helper (milliseconds, the inter-page delay is sub-second)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Optional Duration serialization helper
mod optional_duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_archiving_contract() {
        let config = ArchiveConfig::default();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.inter_page_delay, Duration::from_millis(75));
        assert_eq!(config.flush_interval, Duration::from_secs(60));
        assert_eq!(config.app_tag, "download-tool");
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.retry.backoff_step, Duration::from_secs(1));
        assert_eq!(config.retry.give_up_cost, 60.0);
    }

    #[test]
    fn empty_json_uses_defaults() {
        let config: ArchiveConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ArchiveConfig::default());
    }

    #[test]
    fn durations_round_trip_as_milliseconds() {
        let json = r#"{"inter_page_delay": 5, "request_timeout": 1500, "retry": {"backoff_step": 20}}"#;
        let config: ArchiveConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.inter_page_delay, Duration::from_millis(5));
        assert_eq!(config.request_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.retry.backoff_step, Duration::from_millis(20));
        assert_eq!(config.retry.give_up_cost, 60.0);

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["inter_page_delay"], 5);
        assert_eq!(value["flush_interval"], 60_000);
    }

    #[test]
    fn validate_rejects_zero_page_size() {
        let config = ArchiveConfig {
            page_size: 0,
            ..Default::default()
        };
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("page_size")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_non_positive_give_up_cost() {
        let mut config = ArchiveConfig::default();
        config.retry.give_up_cost = 0.0;
        assert!(config.validate().is_err());
        config.retry.give_up_cost = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(ArchiveConfig::default().validate().is_ok());
    }
}
