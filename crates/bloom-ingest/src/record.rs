//! Record parser
//!
//! Turns one [`RawEntry`] into a typed [`Record`]. Every measurement is
//! parsed on its own: a bad value degrades only that measurement to `None`
//! and is reported as a [`FieldError`]. The timestamp is the exception, a
//! record without a usable point in time is rejected outright.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::FieldMap;
use crate::feed::RawEntry;
use crate::store::{Document, FieldValue, StoreError};

/// Validated reading, identified by its feed `entry_id`
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub entry_id: u64,
    pub timestamp: DateTime<Utc>,
    /// One slot per mapped measurement, `None` when the value was absent or unusable
    pub measurements: BTreeMap<String, Option<f64>>,
}

impl Record {
    /// Document id in the records collection
    pub fn document_id(&self) -> String {
        self.entry_id.to_string()
    }

    pub fn measurement(&self, name: &str) -> Option<f64> {
        self.measurements.get(name).copied().flatten()
    }

    /// Fails for entry ids the store's integer type cannot hold
    pub fn to_document(&self) -> Result<Document, StoreError> {
        let entry_id = i64::try_from(self.entry_id)
            .map_err(|_| StoreError::Encode(format!("entry_id {} exceeds i64", self.entry_id)))?;

        let mut doc = Document::new();
        doc.insert("entry_id".to_string(), FieldValue::Integer(entry_id));
        doc.insert("timestamp".to_string(), FieldValue::Timestamp(self.timestamp));
        for (name, value) in &self.measurements {
            doc.insert(name.clone(), FieldValue::from(*value));
        }
        Ok(doc)
    }
}

/// A measurement that was present but could not be used
#[derive(Debug, Clone, PartialEq, Error)]
#[error("entry {entry_id}: {field} ({measurement}) has unusable value {value}")]
pub struct FieldError {
    pub entry_id: u64,
    pub field: String,
    pub measurement: String,
    pub value: String,
}

/// Whole-record failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// `value` is `None` when the entry carried no timestamp string
    #[error("entry {entry_id}: unparsable timestamp {}", describe(.value))]
    BadTimestamp {
        entry_id: u64,
        value: Option<String>,
    },
}

fn describe(value: &Option<String>) -> String {
    match value {
        Some(v) => format!("'{}'", v),
        None => "(missing)".to_string(),
    }
}

impl ParseError {
    pub fn entry_id(&self) -> u64 {
        match self {
            ParseError::BadTimestamp { entry_id, .. } => *entry_id,
        }
    }
}

/// A record plus the measurements that had to be dropped
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub record: Record,
    pub field_errors: Vec<FieldError>,
}

impl ParsedRecord {
    pub fn is_degraded(&self) -> bool {
        !self.field_errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RecordParser {
    field_map: FieldMap,
    timestamp_format: String,
}

impl RecordParser {
    pub fn new(field_map: FieldMap, timestamp_format: impl Into<String>) -> Self {
        Self {
            field_map,
            timestamp_format: timestamp_format.into(),
        }
    }

    pub fn field_map(&self) -> &FieldMap {
        &self.field_map
    }

    pub fn parse(&self, entry: &RawEntry) -> Result<ParsedRecord, ParseError> {
        let timestamp = entry
            .created_at
            .as_deref()
            .and_then(|raw| NaiveDateTime::parse_from_str(raw.trim(), &self.timestamp_format).ok())
            .map(|naive| naive.and_utc())
            .ok_or_else(|| ParseError::BadTimestamp {
                entry_id: entry.entry_id,
                value: entry.created_at.clone(),
            })?;

        let mut measurements = BTreeMap::new();
        let mut field_errors = Vec::new();

        for (field, measurement) in self.field_map.iter() {
            let value = match entry.fields.get(field) {
                None => None,
                Some(raw) => match parse_number(raw) {
                    Ok(value) => value,
                    Err(()) => {
                        field_errors.push(FieldError {
                            entry_id: entry.entry_id,
                            field: field.to_string(),
                            measurement: measurement.to_string(),
                            value: raw.to_string(),
                        });
                        None
                    },
                },
            };
            measurements.insert(measurement.to_string(), value);
        }

        Ok(ParsedRecord {
            record: Record {
                entry_id: entry.entry_id,
                timestamp,
                measurements,
            },
            field_errors,
        })
    }
}

/// `Ok(None)` for an empty slot, `Err(())` for a value that is present but unusable
fn parse_number(raw: &Value) -> Result<Option<f64>, ()> {
    let value = match raw {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64().ok_or(())?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<f64>().map_err(|_| ())?
        },
        _ => return Err(()),
    };

    if value.is_finite() {
        Ok(Some(value))
    } else {
        Err(())
    }
}
