//! Watermark store
//!
//! A single document remembering the highest `entry_id` the poll loop has
//! fully processed. It is read at the start of every cycle and written at
//! most once per cycle, after the batch.

use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::store::{Document, DocumentStore, FieldValue, StoreError};

const LAST_ENTRY_ID: &str = "last_entry_id";
const UPDATED_AT: &str = "updated_at";

pub struct WatermarkStore {
    store: Arc<dyn DocumentStore>,
    collection: String,
    id: String,
}

impl WatermarkStore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Current watermark, 0 when none has been recorded yet
    pub async fn get(&self) -> Result<u64, StoreError> {
        let Some(doc) = self.store.get_document(&self.collection, &self.id).await? else {
            debug!(collection = %self.collection, id = %self.id, "No watermark recorded, starting at 0");
            return Ok(0);
        };

        match doc.get(LAST_ENTRY_ID) {
            None | Some(FieldValue::Null) => Ok(0),
            Some(FieldValue::Integer(v)) => u64::try_from(*v).map_err(|_| {
                StoreError::Decode(format!("{} is negative: {}", LAST_ENTRY_ID, v))
            }),
            Some(other) => Err(StoreError::Decode(format!(
                "{} has unexpected value {:?}",
                LAST_ENTRY_ID, other
            ))),
        }
    }

    /// Record a new watermark
    pub async fn set(&self, id: u64) -> Result<(), StoreError> {
        let value = i64::try_from(id)
            .map_err(|_| StoreError::Encode(format!("watermark {} exceeds i64", id)))?;

        let mut doc = Document::new();
        doc.insert(LAST_ENTRY_ID.to_string(), FieldValue::Integer(value));
        doc.insert(UPDATED_AT.to_string(), FieldValue::Timestamp(Utc::now()));

        self.store.set_document(&self.collection, &self.id, doc).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn watermark(store: Arc<MemoryStore>) -> WatermarkStore {
        WatermarkStore::new(store, "ingest_state", "thingspeak")
    }

    #[tokio::test]
    async fn test_defaults_to_zero() {
        let wm = watermark(Arc::new(MemoryStore::new()));
        assert_eq!(wm.get().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = Arc::new(MemoryStore::new());
        let wm = watermark(store.clone());

        wm.set(17).await.unwrap();

        assert_eq!(wm.get().await.unwrap(), 17);
        let doc = store
            .get_document("ingest_state", "thingspeak")
            .await
            .unwrap()
            .unwrap();
        assert!(doc[UPDATED_AT].as_timestamp().is_some());
    }

    #[tokio::test]
    async fn test_document_without_field_is_zero() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_document("ingest_state", "thingspeak", Document::new())
            .await
            .unwrap();

        assert_eq!(watermark(store).get().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_watermark_is_decode_error() {
        let store = Arc::new(MemoryStore::new());
        let mut doc = Document::new();
        doc.insert(LAST_ENTRY_ID.to_string(), FieldValue::String("seven".to_string()));
        store.set_document("ingest_state", "thingspeak", doc).await.unwrap();

        let err = watermark(store).get().await.unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }
}
