//! Sink writer
//!
//! Idempotent insert of records keyed by `entry_id`. The presence check and
//! the write are two separate store calls; with a single poller that is
//! enough to guarantee a record is never overwritten.

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::record::Record;
use crate::store::{DocumentStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    AlreadyExists,
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("presence check for entry {entry_id} failed: {source}")]
    PresenceCheck {
        entry_id: u64,
        #[source]
        source: StoreError,
    },

    #[error("write of entry {entry_id} failed: {source}")]
    Write {
        entry_id: u64,
        #[source]
        source: StoreError,
    },
}

impl WriteError {
    pub fn entry_id(&self) -> u64 {
        match self {
            WriteError::PresenceCheck { entry_id, .. } | WriteError::Write { entry_id, .. } => {
                *entry_id
            },
        }
    }
}

pub struct SinkWriter {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl SinkWriter {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn write_if_absent(&self, record: &Record) -> Result<WriteOutcome, WriteError> {
        let id = record.document_id();
        let document = record.to_document().map_err(|source| WriteError::Write {
            entry_id: record.entry_id,
            source,
        })?;

        let existing = self
            .store
            .get_document(&self.collection, &id)
            .await
            .map_err(|source| WriteError::PresenceCheck {
                entry_id: record.entry_id,
                source,
            })?;

        if existing.is_some() {
            debug!(entry_id = record.entry_id, "Record already stored, skipping");
            return Ok(WriteOutcome::AlreadyExists);
        }

        self.store
            .set_document(&self.collection, &id, document)
            .await
            .map_err(|source| WriteError::Write {
                entry_id: record.entry_id,
                source,
            })?;

        Ok(WriteOutcome::Written)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{Document, FieldValue, MemoryStore};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn record(entry_id: u64, humidity: f64) -> Record {
        Record {
            entry_id,
            timestamp: Utc.with_ymd_and_hms(2024, 10, 30, 12, 0, 0).unwrap(),
            measurements: BTreeMap::from([("humidity".to_string(), Some(humidity))]),
        }
    }

    #[tokio::test]
    async fn test_writes_new_record() {
        let store = Arc::new(MemoryStore::new());
        let sink = SinkWriter::new(store.clone(), "iot_data");

        let outcome = sink.write_if_absent(&record(42, 45.0)).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Written);
        let doc = store.get_document("iot_data", "42").await.unwrap().unwrap();
        assert_eq!(doc["humidity"], FieldValue::Double(45.0));
    }

    #[tokio::test]
    async fn test_never_overwrites() {
        let store = Arc::new(MemoryStore::new());
        let sink = SinkWriter::new(store.clone(), "iot_data");

        sink.write_if_absent(&record(42, 45.0)).await.unwrap();
        let outcome = sink.write_if_absent(&record(42, 99.0)).await.unwrap();

        assert_eq!(outcome, WriteOutcome::AlreadyExists);
        let doc = store.get_document("iot_data", "42").await.unwrap().unwrap();
        assert_eq!(doc["humidity"], FieldValue::Double(45.0));
    }

    struct DownStore;

    #[async_trait]
    impl DocumentStore for DownStore {
        async fn get_document(&self, _: &str, _: &str) -> Result<Option<Document>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn set_document(&self, _: &str, _: &str, _: Document) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_write_error() {
        let sink = SinkWriter::new(Arc::new(DownStore), "iot_data");

        let err = sink.write_if_absent(&record(7, 1.0)).await.unwrap_err();

        assert!(matches!(err, WriteError::PresenceCheck { entry_id: 7, .. }));
        assert_eq!(err.entry_id(), 7);
    }

    #[tokio::test]
    async fn test_unencodable_record_is_not_stored() {
        let store = Arc::new(MemoryStore::new());
        let sink = SinkWriter::new(store.clone(), "iot_data");

        let err = sink.write_if_absent(&record(u64::MAX, 1.0)).await.unwrap_err();

        assert!(matches!(
            err,
            WriteError::Write {
                source: StoreError::Encode(_),
                ..
            }
        ));
        assert_eq!(store.count("iot_data").await, 0);
    }
}
