//! Ingestion configuration
//!
//! Everything the poll loop needs is read from environment variables (with
//! `.env` support). A missing endpoint or credential is a startup error; the
//! loop itself never sees an invalid configuration.

use bloom_common::{BloomError, Result};
use std::collections::HashSet;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default poll interval in seconds. ThingSpeak accepts one update per 15s,
/// so polling faster never yields more entries.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Default network timeout for a single feed read.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

/// Default field -> measurement table for the plant sensor channel.
///
/// Matches the order in which the serial relay uploads readings.
pub const DEFAULT_FIELD_MAP: &str =
    "field1=humidity,field2=temperature,field3=temperature_f,field4=light_intensity,field5=soil_moisture";

/// Default strftime format of `created_at` in feed entries.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Default collection that receives one document per reading.
pub const DEFAULT_RECORDS_COLLECTION: &str = "iot_data";

/// Default collection holding ingestion state.
pub const DEFAULT_STATE_COLLECTION: &str = "ingest_state";

/// Default id of the watermark document.
pub const DEFAULT_WATERMARK_ID: &str = "thingspeak";

/// Default Firestore REST root.
pub const DEFAULT_FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";

/// Default ThingSpeak update endpoint used by the relay.
pub const DEFAULT_UPDATE_URL: &str = "https://api.thingspeak.com/update";

/// Default minimum delay between two relay uploads.
pub const DEFAULT_RELAY_INTERVAL_SECS: u64 = 15;

// ============================================================================
// Field mapping
// ============================================================================

/// Explicit mapping from feed field names to measurement names.
///
/// Declaration order is preserved so documents and logs list measurements
/// the way the operator wrote them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    pairs: Vec<(String, String)>,
}

impl FieldMap {
    /// Build a map from `(field, measurement)` pairs.
    pub fn new<I, F, M>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (F, M)>,
        F: Into<String>,
        M: Into<String>,
    {
        let pairs: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(f, m)| (f.into(), m.into()))
            .collect();

        if pairs.is_empty() {
            return Err(BloomError::config("field map must name at least one field"));
        }

        let mut fields = HashSet::new();
        let mut measurements = HashSet::new();
        for (field, measurement) in &pairs {
            if field.is_empty() || measurement.is_empty() {
                return Err(BloomError::config(format!(
                    "field map entry '{}={}' has an empty side",
                    field, measurement
                )));
            }
            if !fields.insert(field.as_str()) {
                return Err(BloomError::config(format!(
                    "field '{}' is mapped more than once",
                    field
                )));
            }
            if !measurements.insert(measurement.as_str()) {
                return Err(BloomError::config(format!(
                    "measurement '{}' is mapped from more than one field",
                    measurement
                )));
            }
        }

        Ok(Self { pairs })
    }

    /// Parse `field1=humidity,field2=temperature` style tables.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut pairs = Vec::new();
        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (field, measurement) = item.split_once('=').ok_or_else(|| {
                BloomError::config(format!(
                    "field map entry '{}' is not of the form field=measurement",
                    item
                ))
            })?;
            pairs.push((field.trim().to_string(), measurement.trim().to_string()));
        }
        Self::new(pairs)
    }

    /// `(field, measurement)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(f, m)| (f.as_str(), m.as_str()))
    }

    pub fn measurements(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(_, m)| m.as_str())
    }

    pub fn measurement_for(&self, field: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, m)| m.as_str())
    }

    pub fn field_for(&self, measurement: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(_, m)| m == measurement)
            .map(|(f, _)| f.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl Default for FieldMap {
    fn default() -> Self {
        let pairs = DEFAULT_FIELD_MAP
            .split(',')
            .filter_map(|item| item.split_once('='))
            .map(|(f, m)| (f.to_string(), m.to_string()))
            .collect();
        Self { pairs }
    }
}

// ============================================================================
// Configuration structs
// ============================================================================

/// Remote feed settings
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Endpoint returning the JSON feed, e.g. `https://api.thingspeak.com/channels/42/feeds.json`
    pub url: String,
    /// Read key for private channels, sent as `api_key`
    pub api_key: Option<String>,
    /// Result-count hint, sent as `results`
    pub results: Option<u32>,
    /// Upper bound on one fetch, connect through body
    pub timeout: Duration,
}

/// Firestore REST settings
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub base_url: String,
    pub project_id: String,
    pub database: String,
    /// Bearer token minted outside this process
    pub access_token: String,
}

/// Which document store backs the sink and the watermark
#[derive(Debug, Clone)]
pub enum StoreConfig {
    Memory,
    Firestore(FirestoreConfig),
    Postgres { url: String },
}

impl StoreConfig {
    /// Resolve the backend named by `BLOOM_STORE`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = lookup("BLOOM_STORE").unwrap_or_else(|| "memory".to_string());
        match backend.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreConfig::Memory),
            "firestore" => Ok(StoreConfig::Firestore(FirestoreConfig {
                base_url: lookup("FIRESTORE_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_FIRESTORE_BASE_URL.to_string()),
                project_id: required(lookup, "FIRESTORE_PROJECT_ID")?,
                database: lookup("FIRESTORE_DATABASE").unwrap_or_else(|| "(default)".to_string()),
                access_token: required(lookup, "FIRESTORE_ACCESS_TOKEN")?,
            })),
            "postgres" | "postgresql" => Ok(StoreConfig::Postgres {
                url: required(lookup, "DATABASE_URL")?,
            }),
            other => Err(BloomError::config(format!(
                "unknown BLOOM_STORE '{}', expected memory, firestore or postgres",
                other
            ))),
        }
    }

    /// Short backend name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::Firestore(_) => "firestore",
            StoreConfig::Postgres { .. } => "postgres",
        }
    }
}

/// Ingestion configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub feed: FeedConfig,
    pub poll_interval: Duration,
    pub field_map: FieldMap,
    pub timestamp_format: String,
    pub records_collection: String,
    pub state_collection: String,
    pub watermark_id: String,
    pub store: StoreConfig,
}

impl IngestConfig {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(&env_lookup)
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Self {
            feed: FeedConfig {
                url: required(lookup, "BLOOM_FEED_URL")?,
                api_key: optional(lookup, "BLOOM_FEED_API_KEY"),
                results: parse_optional(lookup, "BLOOM_FEED_RESULTS")?,
                timeout: Duration::from_secs(parse_or(
                    lookup,
                    "BLOOM_FETCH_TIMEOUT_SECS",
                    DEFAULT_FETCH_TIMEOUT_SECS,
                )?),
            },
            poll_interval: Duration::from_secs(parse_or(
                lookup,
                "BLOOM_POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL_SECS,
            )?),
            field_map: match optional(lookup, "BLOOM_FIELD_MAP") {
                Some(raw) => FieldMap::parse(&raw)?,
                None => FieldMap::default(),
            },
            timestamp_format: lookup("BLOOM_TIMESTAMP_FORMAT")
                .unwrap_or_else(|| DEFAULT_TIMESTAMP_FORMAT.to_string()),
            records_collection: lookup("BLOOM_RECORDS_COLLECTION")
                .unwrap_or_else(|| DEFAULT_RECORDS_COLLECTION.to_string()),
            state_collection: lookup("BLOOM_STATE_COLLECTION")
                .unwrap_or_else(|| DEFAULT_STATE_COLLECTION.to_string()),
            watermark_id: lookup("BLOOM_WATERMARK_ID")
                .unwrap_or_else(|| DEFAULT_WATERMARK_ID.to_string()),
            store: StoreConfig::from_lookup(lookup)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_http_url("BLOOM_FEED_URL", &self.feed.url)?;

        if self.feed.timeout.is_zero() {
            return Err(BloomError::config("BLOOM_FETCH_TIMEOUT_SECS must be greater than 0"));
        }

        if self.poll_interval.is_zero() {
            return Err(BloomError::config("BLOOM_POLL_INTERVAL_SECS must be greater than 0"));
        }

        if self.timestamp_format.trim().is_empty() {
            return Err(BloomError::config("BLOOM_TIMESTAMP_FORMAT cannot be empty"));
        }

        for (name, value) in [
            ("BLOOM_RECORDS_COLLECTION", &self.records_collection),
            ("BLOOM_STATE_COLLECTION", &self.state_collection),
            ("BLOOM_WATERMARK_ID", &self.watermark_id),
        ] {
            if value.trim().is_empty() || value.contains('/') {
                return Err(BloomError::config(format!(
                    "{} must be a non-empty id without '/'",
                    name
                )));
            }
        }

        if let StoreConfig::Firestore(ref fs) = self.store {
            validate_http_url("FIRESTORE_BASE_URL", &fs.base_url)?;
        }

        Ok(())
    }
}

/// Settings for the serial-to-feed relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub update_url: String,
    pub write_api_key: String,
    /// Minimum delay between two uploads
    pub interval: Duration,
    pub timeout: Duration,
    pub field_map: FieldMap,
}

impl RelayConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Self {
            update_url: lookup("BLOOM_UPDATE_URL").unwrap_or_else(|| DEFAULT_UPDATE_URL.to_string()),
            write_api_key: required(lookup, "BLOOM_WRITE_API_KEY")?,
            interval: Duration::from_secs(parse_or(
                lookup,
                "BLOOM_RELAY_INTERVAL_SECS",
                DEFAULT_RELAY_INTERVAL_SECS,
            )?),
            timeout: Duration::from_secs(parse_or(
                lookup,
                "BLOOM_FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )?),
            field_map: match optional(lookup, "BLOOM_FIELD_MAP") {
                Some(raw) => FieldMap::parse(&raw)?,
                None => FieldMap::default(),
            },
        };

        validate_http_url("BLOOM_UPDATE_URL", &config.update_url)?;
        if config.timeout.is_zero() {
            return Err(BloomError::config("BLOOM_FETCH_TIMEOUT_SECS must be greater than 0"));
        }

        Ok(config)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn optional(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.trim().is_empty())
}

fn required(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    optional(lookup, name)
        .ok_or_else(|| BloomError::config(format!("{} is required but not set", name)))
}

fn parse_optional<T: std::str::FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    match optional(lookup, name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| BloomError::config(format!("{} has an invalid value '{}'", name, raw))),
        None => Ok(None),
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    Ok(parse_optional(lookup, name)?.unwrap_or(default))
}

fn validate_http_url(name: &str, value: &str) -> Result<()> {
    let url = reqwest::Url::parse(value)
        .map_err(|e| BloomError::config(format!("{} is not a valid URL: {}", name, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(BloomError::config(format!(
            "{} must use http or https, got '{}'",
            name, scheme
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_with_only_feed_url() {
        let lookup = lookup_from(&[(
            "BLOOM_FEED_URL",
            "https://api.thingspeak.com/channels/2703381/feeds.json",
        )]);
        let config = IngestConfig::from_lookup(&lookup).unwrap();

        assert_eq!(config.poll_interval, Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS));
        assert_eq!(config.feed.timeout, Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS));
        assert_eq!(config.feed.results, None);
        assert_eq!(config.records_collection, "iot_data");
        assert_eq!(config.field_map, FieldMap::default());
        assert_eq!(config.store.kind(), "memory");
    }

    #[test]
    fn test_missing_feed_url_is_fatal() {
        let err = IngestConfig::from_lookup(&lookup_from(&[])).unwrap_err();
        assert!(matches!(err, BloomError::Config(_)));
        assert!(err.to_string().contains("BLOOM_FEED_URL"));
    }

    #[test]
    fn test_rejects_non_http_feed_url() {
        let lookup = lookup_from(&[("BLOOM_FEED_URL", "ftp://example.com/feeds.json")]);
        assert!(IngestConfig::from_lookup(&lookup).is_err());
    }

    #[test]
    fn test_rejects_zero_interval_and_garbage_numbers() {
        let zero = lookup_from(&[
            ("BLOOM_FEED_URL", "http://localhost/feeds.json"),
            ("BLOOM_POLL_INTERVAL_SECS", "0"),
        ]);
        assert!(IngestConfig::from_lookup(&zero).is_err());

        let garbage = lookup_from(&[
            ("BLOOM_FEED_URL", "http://localhost/feeds.json"),
            ("BLOOM_FEED_RESULTS", "lots"),
        ]);
        let err = IngestConfig::from_lookup(&garbage).unwrap_err();
        assert!(err.to_string().contains("BLOOM_FEED_RESULTS"));
    }

    #[test]
    fn test_firestore_requires_credentials() {
        let lookup = lookup_from(&[
            ("BLOOM_FEED_URL", "http://localhost/feeds.json"),
            ("BLOOM_STORE", "firestore"),
            ("FIRESTORE_PROJECT_ID", "bloom-dev"),
        ]);
        let err = IngestConfig::from_lookup(&lookup).unwrap_err();
        assert!(err.to_string().contains("FIRESTORE_ACCESS_TOKEN"));
    }

    #[test]
    fn test_unknown_store_backend() {
        let lookup = lookup_from(&[
            ("BLOOM_FEED_URL", "http://localhost/feeds.json"),
            ("BLOOM_STORE", "redis"),
        ]);
        assert!(IngestConfig::from_lookup(&lookup).is_err());
    }

    #[test]
    fn test_field_map_parse_and_lookup() {
        let map = FieldMap::parse(" field1 = temperature , field2=humidity,").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.measurement_for("field1"), Some("temperature"));
        assert_eq!(map.field_for("humidity"), Some("field2"));
        assert_eq!(map.measurement_for("field9"), None);
        assert_eq!(
            map.measurements().collect::<Vec<_>>(),
            vec!["temperature", "humidity"]
        );
    }

    #[test]
    fn test_field_map_rejects_ambiguity() {
        assert!(FieldMap::parse("").is_err());
        assert!(FieldMap::parse("field1").is_err());
        assert!(FieldMap::parse("field1=temperature,field1=humidity").is_err());
        assert!(FieldMap::parse("field1=temperature,field2=temperature").is_err());
        assert!(FieldMap::parse("=temperature").is_err());
    }

    #[test]
    fn test_default_field_map_is_valid() {
        let parsed = FieldMap::parse(DEFAULT_FIELD_MAP).unwrap();
        assert_eq!(parsed, FieldMap::default());
        assert_eq!(parsed.len(), 5);
    }

    #[test]
    fn test_relay_config_requires_write_key() {
        assert!(RelayConfig::from_lookup(&lookup_from(&[])).is_err());

        let config =
            RelayConfig::from_lookup(&lookup_from(&[("BLOOM_WRITE_API_KEY", "W1")])).unwrap();
        assert_eq!(config.update_url, DEFAULT_UPDATE_URL);
        assert_eq!(config.interval, Duration::from_secs(DEFAULT_RELAY_INTERVAL_SECS));
    }
}
