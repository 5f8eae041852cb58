use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{Document, DocumentStore, StoreError};

/// In-process document store.
///
/// Backs tests and `BLOOM_STORE=memory` dry runs. Contents are lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<(String, String), Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub async fn count(&self, collection: &str) -> usize {
        self.documents
            .read()
            .await
            .keys()
            .filter(|(c, _)| c == collection)
            .count()
    }

    /// Sorted ids of a collection
    pub async fn ids(&self, collection: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .documents
            .read()
            .await
            .keys()
            .filter(|(c, _)| c == collection)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let key = (collection.to_string(), id.to_string());
        Ok(self.documents.read().await.get(&key).cloned())
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), StoreError> {
        self.documents
            .write()
            .await
            .insert((collection.to_string(), id.to_string()), fields);
        Ok(())
    }

    async fn merge_document(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), StoreError> {
        self.documents
            .write()
            .await
            .entry((collection.to_string(), id.to_string()))
            .or_default()
            .extend(fields);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::FieldValue;

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::new();
        let mut doc = Document::new();
        doc.insert("chat_id".to_string(), FieldValue::String("abc".to_string()));

        store.set_document("chats", "abc", doc.clone()).await.unwrap();

        assert_eq!(store.get_document("chats", "abc").await.unwrap(), Some(doc));
        assert_eq!(store.get_document("chats", "zzz").await.unwrap(), None);
        assert_eq!(store.get_document("other", "abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_collections_are_separate() {
        let store = MemoryStore::new();
        store.set_document("iot_data", "2", Document::new()).await.unwrap();
        store.set_document("iot_data", "10", Document::new()).await.unwrap();
        store.set_document("ingest_state", "thingspeak", Document::new()).await.unwrap();

        assert_eq!(store.count("iot_data").await, 2);
        assert_eq!(store.ids("iot_data").await, vec!["10", "2"]);
    }

    #[tokio::test]
    async fn test_merge_keeps_other_fields() {
        let store = MemoryStore::new();
        let mut doc = Document::new();
        doc.insert("title".to_string(), FieldValue::String("Basil".to_string()));
        doc.insert("chat_id".to_string(), FieldValue::Null);
        store.set_document("chats", "abc", doc).await.unwrap();

        let mut update = Document::new();
        update.insert("chat_id".to_string(), FieldValue::String("abc".to_string()));
        store.merge_document("chats", "abc", update.clone()).await.unwrap();
        store.merge_document("chats", "new", update).await.unwrap();

        let merged = store.get_document("chats", "abc").await.unwrap().unwrap();
        assert_eq!(merged["title"], FieldValue::String("Basil".to_string()));
        assert_eq!(merged["chat_id"], FieldValue::String("abc".to_string()));
        assert_eq!(store.get_document("chats", "new").await.unwrap().unwrap().len(), 1);
    }
}
