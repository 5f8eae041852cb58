//! Feed fetcher
//!
//! Reads one batch of entries from the remote time-series endpoint. The
//! fetcher never panics or bails on a bad response: every failure becomes a
//! [`FetchError`] so the poll loop can skip the cycle and try again.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::FeedConfig;

/// One entry as delivered by the feed.
///
/// Every key other than `entry_id` and `created_at` lands in `fields`, so a
/// channel that grows a `field6` or a `status` column still decodes. A
/// `created_at` that is missing, null or not a string decodes as `None` and
/// is rejected later by the record parser, for this entry only.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawEntry {
    pub entry_id: u64,
    #[serde(default, deserialize_with = "string_or_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl RawEntry {
    /// Convenience constructor, mostly for tests and fixtures
    pub fn new(entry_id: u64, created_at: impl Into<String>) -> Self {
        Self {
            entry_id,
            created_at: Some(created_at.into()),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn without_timestamp(mut self) -> Self {
        self.created_at = None;
        self
    }
}

fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// Channel metadata sent alongside the entries
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelInfo {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub last_entry_id: Option<u64>,
}

/// A decoded feed response
///
/// Entries without a usable `entry_id` cannot be ordered against the
/// watermark; they are logged, counted in `skipped` and left out.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "WireBatch")]
pub struct Batch {
    pub channel: Option<ChannelInfo>,
    pub entries: Vec<RawEntry>,
    pub skipped: usize,
}

#[derive(Deserialize)]
struct WireBatch {
    #[serde(default)]
    channel: Option<ChannelInfo>,
    #[serde(default)]
    feeds: Option<Vec<Value>>,
}

impl From<WireBatch> for Batch {
    fn from(wire: WireBatch) -> Self {
        let mut batch = Batch {
            channel: wire.channel,
            ..Batch::default()
        };

        for (position, raw) in wire.feeds.unwrap_or_default().into_iter().enumerate() {
            match serde_json::from_value::<RawEntry>(raw) {
                Ok(entry) => batch.entries.push(entry),
                Err(e) => {
                    warn!(position, error = %e, "Skipping feed entry without a usable entry_id");
                    batch.skipped += 1;
                },
            }
        }

        batch
    }
}

impl Batch {
    pub fn new(entries: Vec<RawEntry>) -> Self {
        Self {
            channel: None,
            entries,
            skipped: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Why a fetch produced no batch
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("feed returned HTTP {0}")]
    NonSuccessStatus(u16),

    #[error("malformed feed body: {0}")]
    MalformedBody(String),
}

/// Source of feed batches
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<Batch, FetchError>;
}

/// Feed source backed by an HTTP JSON endpoint
pub struct HttpFeed {
    client: Client,
    config: FeedConfig,
}

impl HttpFeed {
    pub fn new(config: FeedConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::NetworkFailure(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(ref key) = self.config.api_key {
            query.push(("api_key", key.clone()));
        }
        if let Some(results) = self.config.results {
            query.push(("results", results.to_string()));
        }
        query
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    async fn fetch(&self) -> Result<Batch, FetchError> {
        let response = self
            .client
            .get(&self.config.url)
            .query(&self.query())
            .send()
            .await
            .map_err(|e| FetchError::NetworkFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::NonSuccessStatus(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::NetworkFailure(e.to_string()))?;

        let batch: Batch = serde_json::from_slice(&body)
            .map_err(|e| FetchError::MalformedBody(e.to_string()))?;

        debug!(entries = batch.len(), skipped = batch.skipped, "Fetched feed batch");

        Ok(batch)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn feed_config(server: &MockServer) -> FeedConfig {
        FeedConfig {
            url: format!("{}/channels/42/feeds.json", server.uri()),
            api_key: None,
            results: None,
            timeout: Duration::from_secs(2),
        }
    }

    fn thingspeak_body() -> serde_json::Value {
        json!({
            "channel": {
                "id": 42,
                "name": "Plant",
                "field1": "Humidity",
                "last_entry_id": 8
            },
            "feeds": [
                {"created_at": "2024-10-30T12:00:00Z", "entry_id": 7, "field1": "45.00", "field2": "24.00"},
                {"created_at": "2024-10-30T12:00:15Z", "entry_id": 8, "field1": "46.00", "field2": null}
            ]
        })
    }

    #[tokio::test]
    async fn test_fetch_decodes_entries_and_channel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/42/feeds.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(thingspeak_body()))
            .mount(&server)
            .await;

        let feed = HttpFeed::new(feed_config(&server)).unwrap();
        let batch = feed.fetch().await.unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.channel.as_ref().unwrap().last_entry_id, Some(8));
        assert_eq!(batch.entries[0].entry_id, 7);
        assert_eq!(batch.entries[0].fields["field1"], json!("45.00"));
        assert_eq!(batch.entries[1].fields["field2"], serde_json::Value::Null);
        assert_eq!(batch.skipped, 0);
    }

    #[tokio::test]
    async fn test_one_bad_entry_does_not_sink_the_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "feeds": [
                    {"created_at": "2024-10-30T12:00:00Z", "entry_id": 1, "field1": "45.00"},
                    {"created_at": null, "entry_id": 2, "field1": "46.00"},
                    {"entry_id": 3, "field1": "47.00"},
                    {"created_at": 1730289600, "entry_id": 4},
                    {"created_at": "2024-10-30T12:01:00Z", "entry_id": null},
                    {"created_at": "2024-10-30T12:01:15Z", "entry_id": "six"},
                    "garbage",
                    {"created_at": "2024-10-30T12:01:30Z", "entry_id": 7, "field1": "48.00"}
                ]
            })))
            .mount(&server)
            .await;

        let batch = HttpFeed::new(feed_config(&server))
            .unwrap()
            .fetch()
            .await
            .unwrap();

        let ids: Vec<u64> = batch.entries.iter().map(|e| e.entry_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 7]);
        assert_eq!(batch.skipped, 3);
        assert_eq!(batch.entries[1].created_at, None);
        assert_eq!(batch.entries[2].created_at, None);
        assert_eq!(batch.entries[3].created_at, None);
        assert_eq!(batch.entries[4].fields["field1"], json!("48.00"));
    }

    #[tokio::test]
    async fn test_null_feeds_is_empty_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"feeds": null})))
            .mount(&server)
            .await;

        let batch = HttpFeed::new(feed_config(&server))
            .unwrap()
            .fetch()
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_sends_results_hint_and_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("results", "2"))
            .and(query_param("api_key", "READKEY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"feeds": []})))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = feed_config(&server);
        config.results = Some(2);
        config.api_key = Some("READKEY".to_string());

        let batch = HttpFeed::new(config).unwrap().fetch().await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_non_success_status_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = HttpFeed::new(feed_config(&server))
            .unwrap()
            .fetch()
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NonSuccessStatus(503)));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;
        // ThingSpeak answers "-1" for channels it will not serve
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("-1"))
            .mount(&server)
            .await;

        let err = HttpFeed::new(feed_config(&server))
            .unwrap()
            .fetch()
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::MalformedBody(_)));
    }

    #[tokio::test]
    async fn test_missing_feeds_key_is_empty_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"channel": {"id": 42}})))
            .mount(&server)
            .await;

        let batch = HttpFeed::new(feed_config(&server))
            .unwrap()
            .fetch()
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_network_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"feeds": []}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let mut config = feed_config(&server);
        config.timeout = Duration::from_millis(200);

        let err = HttpFeed::new(config).unwrap().fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::NetworkFailure(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_failure() {
        let config = FeedConfig {
            url: "http://127.0.0.1:9/feeds.json".to_string(),
            api_key: None,
            results: None,
            timeout: Duration::from_secs(1),
        };

        let err = HttpFeed::new(config).unwrap().fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::NetworkFailure(_)));
    }
}
