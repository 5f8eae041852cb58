//! Serial-to-feed relay
//!
//! Reads sensor lines from any buffered reader (a tty, a pipe, stdin) and
//! publishes them to the ThingSpeak update endpoint. ThingSpeak rejects
//! updates closer together than its rate limit, so lines arriving before
//! `interval` has elapsed since the last upload are dropped.
//!
//! Lines are read as bytes and decoded lossily: a serial port emits noise
//! while it settles, and invalid UTF-8 must cost one line, not the relay.

use reqwest::Client;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::reading::parse_line;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("update endpoint returned HTTP {0}")]
    Status(u16),

    /// ThingSpeak answers `0` when it refuses an update
    #[error("update rejected by feed")]
    Rejected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub lines: usize,
    pub published: usize,
    pub skipped_rate_limited: usize,
    pub parse_failures: usize,
    pub publish_failures: usize,
}

pub struct Relay {
    client: Client,
    config: RelayConfig,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PublishError::Network(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Relay lines until the reader is exhausted or `cancel` fires
    pub async fn run<R>(&self, mut reader: R, cancel: CancellationToken) -> std::io::Result<RelayReport>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::new();
        let mut report = RelayReport::default();
        let mut last_publish: Option<Instant> = None;

        info!(url = %self.config.update_url, "Relay started");

        loop {
            buf.clear();
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                read = reader.read_until(b'\n', &mut buf) => read?,
            };
            if read == 0 {
                break;
            }

            let decoded = String::from_utf8_lossy(&buf);
            let line = decoded.trim_matches(|c: char| {
                c.is_whitespace() || c.is_control() || c == char::REPLACEMENT_CHARACTER
            });
            if line.is_empty() {
                continue;
            }
            report.lines += 1;

            let reading = match parse_line(line) {
                Ok(parsed) => {
                    for e in parsed.quantity_errors() {
                        warn!(error = %e, "Unreadable quantity");
                    }
                    parsed.reading()
                },
                Err(e) => {
                    warn!(error = %e, line = %line, "Unparsable sensor line");
                    report.parse_failures += 1;
                    continue;
                },
            };

            let fields: Vec<(String, String)> = reading
                .measurements()
                .into_iter()
                .filter_map(|(measurement, value)| {
                    self.config
                        .field_map
                        .field_for(measurement)
                        .map(|field| (field.to_string(), value.to_string()))
                })
                .collect();
            if fields.is_empty() {
                warn!(line = %line, "Sensor line carries no mapped measurement");
                report.parse_failures += 1;
                continue;
            }
            for missing in reading.missing() {
                debug!(measurement = missing.0, "Measurement missing from line");
            }

            if let Some(last) = last_publish {
                if last.elapsed() < self.config.interval {
                    report.skipped_rate_limited += 1;
                    continue;
                }
            }
            last_publish = Some(Instant::now());

            match self.publish(&fields).await {
                Ok(entry_id) => {
                    info!(entry_id, fields = fields.len(), "Reading published");
                    report.published += 1;
                },
                Err(e) => {
                    warn!(error = %e, "Publish failed");
                    report.publish_failures += 1;
                },
            }
        }

        info!(
            lines = report.lines,
            published = report.published,
            skipped_rate_limited = report.skipped_rate_limited,
            parse_failures = report.parse_failures,
            publish_failures = report.publish_failures,
            "Relay stopped"
        );

        Ok(report)
    }

    /// Send one update, returning the entry id the feed assigned
    async fn publish(&self, fields: &[(String, String)]) -> Result<u64, PublishError> {
        let response = self
            .client
            .get(&self.config.update_url)
            .query(&[("api_key", self.config.write_api_key.as_str())])
            .query(fields)
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        match body.trim().parse::<u64>() {
            Ok(0) | Err(_) => Err(PublishError::Rejected),
            Ok(entry_id) => Ok(entry_id),
        }
    }
}
