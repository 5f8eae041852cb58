//! Firestore REST v1 backend
//!
//! Documents live at
//! `{base}/projects/{project}/databases/{database}/documents/{collection}/{id}`.
//! A GET answering 404 means "absent"; a PATCH without an update mask
//! creates or replaces the whole document, one with `updateMask.fieldPaths`
//! touches only the listed fields.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

use super::{Document, DocumentStore, FieldValue, StoreError};
use crate::config::FirestoreConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct FirestoreStore {
    client: Client,
    config: FirestoreConfig,
}

impl FirestoreStore {
    pub fn new(config: FirestoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn document_url(&self, collection: &str, id: &str) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| StoreError::Unavailable(format!("invalid Firestore URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Unavailable("Firestore URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend([
                "projects",
                self.config.project_id.as_str(),
                "databases",
                self.config.database.as_str(),
                "documents",
                collection,
                id,
            ]);
        Ok(url)
    }

    async fn rejected(response: reqwest::Response) -> StoreError {
        let status = response.status().as_u16();
        let message = match response.json::<Value>().await {
            Ok(body) => body["error"]["message"]
                .as_str()
                .unwrap_or("no error message")
                .to_string(),
            Err(_) => "unreadable error body".to_string(),
        };
        StoreError::Rejected { status, message }
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let url = self.document_url(collection, id)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(collection, id, "Firestore document absent");
                Ok(None)
            },
            status if status.is_success() => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                decode_document(&body).map(Some)
            },
            _ => Err(Self::rejected(response).await),
        }
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), StoreError> {
        let url = self.document_url(collection, id)?;
        let response = self
            .client
            .patch(url)
            .bearer_auth(&self.config.access_token)
            .json(&encode_document(&fields))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }

        debug!(collection, id, "Firestore document written");
        Ok(())
    }

    async fn merge_document(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), StoreError> {
        // an empty mask would replace the whole document
        if fields.is_empty() {
            return Ok(());
        }

        let mut url = self.document_url(collection, id)?;
        url.query_pairs_mut()
            .extend_pairs(fields.keys().map(|name| ("updateMask.fieldPaths", field_path(name))));

        let response = self
            .client
            .patch(url)
            .bearer_auth(&self.config.access_token)
            .json(&encode_document(&fields))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }

        debug!(collection, id, fields = fields.len(), "Firestore document merged");
        Ok(())
    }
}

/// Field names outside `[A-Za-z_][A-Za-z0-9_]*` must be backquoted in a field path
fn field_path(name: &str) -> String {
    let simple = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        name.to_string()
    } else {
        format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

/// Encode into the Firestore `{"fields": {...}}` body shape
pub(crate) fn encode_document(doc: &Document) -> Value {
    let fields: Map<String, Value> = doc
        .iter()
        .map(|(name, value)| (name.clone(), encode_value(value)))
        .collect();
    json!({ "fields": fields })
}

fn encode_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => json!({ "nullValue": null }),
        FieldValue::Boolean(v) => json!({ "booleanValue": v }),
        // int64 travels as a decimal string
        FieldValue::Integer(v) => json!({ "integerValue": v.to_string() }),
        FieldValue::Double(v) => json!({ "doubleValue": v }),
        FieldValue::String(v) => json!({ "stringValue": v }),
        FieldValue::Timestamp(v) => {
            json!({ "timestampValue": v.to_rfc3339_opts(SecondsFormat::AutoSi, true) })
        },
    }
}

pub(crate) fn decode_document(body: &Value) -> Result<Document, StoreError> {
    let Some(fields) = body.get("fields") else {
        // Firestore omits "fields" for empty documents
        return Ok(Document::new());
    };
    let fields = fields
        .as_object()
        .ok_or_else(|| StoreError::Decode("\"fields\" is not an object".to_string()))?;

    fields
        .iter()
        .map(|(name, value)| decode_value(name, value).map(|v| (name.clone(), v)))
        .collect()
}

fn decode_value(name: &str, value: &Value) -> Result<FieldValue, StoreError> {
    let bad = |kind: &str| StoreError::Decode(format!("field '{}' has invalid {}", name, kind));

    let object = value.as_object().ok_or_else(|| bad("value wrapper"))?;
    let (kind, inner) = object.iter().next().ok_or_else(|| bad("empty value"))?;
    let kind = kind.as_str();

    match kind {
        "nullValue" => Ok(FieldValue::Null),
        "booleanValue" => inner.as_bool().map(FieldValue::Boolean).ok_or_else(|| bad(kind)),
        "integerValue" => match inner {
            Value::String(s) => s.parse().map(FieldValue::Integer).map_err(|_| bad(kind)),
            Value::Number(n) => n.as_i64().map(FieldValue::Integer).ok_or_else(|| bad(kind)),
            _ => Err(bad(kind)),
        },
        "doubleValue" => match inner {
            Value::Number(n) => n.as_f64().map(FieldValue::Double).ok_or_else(|| bad(kind)),
            // NaN and the infinities arrive as strings
            Value::String(s) => s.parse().map(FieldValue::Double).map_err(|_| bad(kind)),
            _ => Err(bad(kind)),
        },
        "stringValue" => inner
            .as_str()
            .map(|s| FieldValue::String(s.to_string()))
            .ok_or_else(|| bad(kind)),
        "timestampValue" => inner
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| FieldValue::Timestamp(t.with_timezone(&Utc)))
            .ok_or_else(|| bad(kind)),
        other => Err(StoreError::Decode(format!(
            "field '{}' uses unsupported Firestore type {}",
            name, other
        ))),
    }
}
