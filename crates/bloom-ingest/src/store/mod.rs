//! Document store collaborator
//!
//! The ingestion core needs two things from its store: read one document by
//! `(collection, id)` and write one document by `(collection, id)`. No
//! queries, no transactions, no indexes. Backends:
//!
//! - [`MemoryStore`]: process-local, for tests and dry runs
//! - [`FirestoreStore`]: Firestore REST v1
//! - [`PostgresStore`]: a single JSONB `documents` table

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::StoreConfig;

mod firestore;
mod memory;
mod postgres;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// A single typed field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Double(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<Option<f64>> for FieldValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(FieldValue::Null, FieldValue::Double)
    }
}

/// Field name -> value
pub type Document = BTreeMap<String, FieldValue>;

/// Store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport failure or the backend is down
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend answered but refused the request
    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The stored document could not be decoded
    #[error("undecodable document: {0}")]
    Decode(String),

    /// The value cannot be represented in the store
    #[error("unencodable value: {0}")]
    Encode(String),
}

/// Minimal key-value-ish document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document, `None` when it does not exist
    async fn get_document(&self, collection: &str, id: &str)
        -> Result<Option<Document>, StoreError>;

    /// Create or replace a document
    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), StoreError>;

    /// Set only `fields`, leaving every other field of the document as it is.
    /// Creates the document when it does not exist.
    ///
    /// The default reads and rewrites the whole document, so it fails on
    /// documents this crate cannot decode. Backends with a native field
    /// update override it.
    async fn merge_document(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), StoreError> {
        let mut doc = self.get_document(collection, id).await?.unwrap_or_default();
        doc.extend(fields);
        self.set_document(collection, id, doc).await
    }
}

/// Open the backend selected by configuration
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>, StoreError> {
    let store: Arc<dyn DocumentStore> = match config {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::Firestore(fs) => Arc::new(FirestoreStore::new(fs.clone())?),
        StoreConfig::Postgres { url } => Arc::new(PostgresStore::connect(url).await?),
    };

    tracing::info!(backend = config.kind(), "Document store ready");

    Ok(store)
}
