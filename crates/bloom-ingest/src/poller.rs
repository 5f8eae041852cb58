//! Poll loop
//!
//! One cycle walks `Idle -> Fetching -> Filtering -> ParsingEntry* ->
//! AdvancingWatermark -> Sleeping`, reading the watermark before the fetch so
//! every report knows where the cycle started. Nothing that happens inside a cycle is
//! fatal: fetch, parse and write failures are logged, counted in the
//! [`CycleReport`] and the loop carries on with the next entry or tick.
//!
//! [`Poller::run_cycle`] performs a single pass without sleeping so tests can
//! drive the state machine directly; [`Poller::run`] schedules passes on a
//! tokio interval until its [`CancellationToken`] fires.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::feed::{FeedSource, FetchError, HttpFeed};
use crate::filter::select_new;
use crate::record::RecordParser;
use crate::sink::{SinkWriter, WriteOutcome};
use crate::store::DocumentStore;
use crate::watermark::WatermarkStore;

/// Poll loop states, used as a log field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Filtering,
    ParsingEntry,
    AdvancingWatermark,
    Sleeping,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Fetching => "fetching",
            CyclePhase::Filtering => "filtering",
            CyclePhase::ParsingEntry => "parsing_entry",
            CyclePhase::AdvancingWatermark => "advancing_watermark",
            CyclePhase::Sleeping => "sleeping",
        };
        f.write_str(name)
    }
}

/// How a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The feed could not be read; nothing else ran
    FetchFailed,
    /// The watermark could not be read; the feed was not fetched
    WatermarkUnavailable,
    /// The feed had nothing above the watermark
    NoNewEntries,
    /// At least one entry was attempted
    Processed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub fetched: usize,
    /// Feed entries dropped for lacking a usable `entry_id`
    pub malformed_entries: usize,
    pub selected: usize,
    pub written: usize,
    pub already_present: usize,
    pub parse_failures: usize,
    pub degraded_fields: usize,
    pub write_failures: usize,
    /// `None` only when the watermark could not be read
    pub watermark_before: Option<u64>,
    pub watermark_after: Option<u64>,
}

impl CycleReport {
    fn new(outcome: CycleOutcome, watermark: Option<u64>) -> Self {
        Self {
            outcome,
            fetched: 0,
            malformed_entries: 0,
            selected: 0,
            written: 0,
            already_present: 0,
            parse_failures: 0,
            degraded_fields: 0,
            write_failures: 0,
            watermark_before: watermark,
            watermark_after: watermark,
        }
    }

    pub fn watermark_advanced(&self) -> bool {
        matches!(
            (self.watermark_before, self.watermark_after),
            (Some(before), Some(after)) if after > before
        )
    }

    /// Emit the one-line cycle summary
    pub fn log(&self) {
        match self.outcome {
            CycleOutcome::FetchFailed | CycleOutcome::WatermarkUnavailable => {
                warn!(outcome = ?self.outcome, watermark = ?self.watermark_before, "Poll cycle skipped");
            },
            CycleOutcome::NoNewEntries => {
                debug!(
                    fetched = self.fetched,
                    malformed_entries = self.malformed_entries,
                    watermark = ?self.watermark_before,
                    "No new entries"
                );
            },
            CycleOutcome::Processed => {
                info!(
                    fetched = self.fetched,
                    malformed_entries = self.malformed_entries,
                    selected = self.selected,
                    written = self.written,
                    already_present = self.already_present,
                    parse_failures = self.parse_failures,
                    degraded_fields = self.degraded_fields,
                    write_failures = self.write_failures,
                    watermark_before = ?self.watermark_before,
                    watermark_after = ?self.watermark_after,
                    "Poll cycle completed"
                );
            },
        }
    }
}

pub struct Poller {
    feed: Arc<dyn FeedSource>,
    watermark: WatermarkStore,
    parser: RecordParser,
    sink: SinkWriter,
    interval: Duration,
}

impl Poller {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        watermark: WatermarkStore,
        parser: RecordParser,
        sink: SinkWriter,
        interval: Duration,
    ) -> Self {
        Self {
            feed,
            watermark,
            parser,
            sink,
            interval,
        }
    }

    /// Wire an HTTP feed and the given store together as configured
    pub fn from_config(
        config: &IngestConfig,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, FetchError> {
        let feed = Arc::new(HttpFeed::new(config.feed.clone())?);
        let watermark = WatermarkStore::new(
            store.clone(),
            config.state_collection.clone(),
            config.watermark_id.clone(),
        );
        let parser = RecordParser::new(config.field_map.clone(), config.timestamp_format.clone());
        let sink = SinkWriter::new(store, config.records_collection.clone());

        Ok(Self::new(feed, watermark, parser, sink, config.poll_interval))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one full pass of the state machine
    pub async fn run_cycle(&self) -> CycleReport {
        let watermark_before = match self.watermark.get().await {
            Ok(w) => w,
            Err(e) => {
                error!(error = %e, "Watermark read failed");
                return CycleReport::new(CycleOutcome::WatermarkUnavailable, None);
            },
        };

        debug!(phase = %CyclePhase::Fetching, watermark = watermark_before, "Poll cycle started");
        let batch = match self.feed.fetch().await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "Feed fetch failed");
                return CycleReport::new(CycleOutcome::FetchFailed, Some(watermark_before));
            },
        };
        let fetched = batch.len();
        let malformed_entries = batch.skipped;

        debug!(phase = %CyclePhase::Filtering, fetched, watermark = watermark_before);
        let selected = select_new(batch, watermark_before);
        if selected.is_empty() {
            let mut report = CycleReport::new(CycleOutcome::NoNewEntries, Some(watermark_before));
            report.fetched = fetched;
            report.malformed_entries = malformed_entries;
            return report;
        }

        let mut report = CycleReport::new(CycleOutcome::Processed, Some(watermark_before));
        report.fetched = fetched;
        report.malformed_entries = malformed_entries;
        report.selected = selected.len();
        let mut highest_stored: Option<u64> = None;

        for entry in &selected {
            debug!(phase = %CyclePhase::ParsingEntry, entry_id = entry.entry_id);

            let parsed = match self.parser.parse(entry) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(entry_id = e.entry_id(), error = %e, "Skipping unparsable entry");
                    report.parse_failures += 1;
                    continue;
                },
            };

            for field_error in &parsed.field_errors {
                warn!(
                    entry_id = field_error.entry_id,
                    field = %field_error.field,
                    measurement = %field_error.measurement,
                    value = %field_error.value,
                    "Measurement dropped"
                );
            }
            report.degraded_fields += parsed.field_errors.len();

            match self.sink.write_if_absent(&parsed.record).await {
                Ok(outcome) => {
                    match outcome {
                        WriteOutcome::Written => report.written += 1,
                        WriteOutcome::AlreadyExists => report.already_present += 1,
                    }
                    highest_stored = highest_stored.max(Some(entry.entry_id));
                },
                Err(e) => {
                    error!(entry_id = e.entry_id(), error = %e, "Record write failed");
                    report.write_failures += 1;
                },
            }
        }

        if let Some(next) = highest_stored.filter(|n| *n > watermark_before) {
            debug!(phase = %CyclePhase::AdvancingWatermark, watermark = next);
            match self.watermark.set(next).await {
                Ok(()) => report.watermark_after = Some(next),
                Err(e) => error!(watermark = next, error = %e, "Watermark update failed"),
            }
        }

        report
    }

    /// Drive cycles until `cancel` fires. Returns the number of cycles run.
    pub async fn run(&self, cancel: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = self.interval.as_secs(), "Poll loop started");

        let mut cycles = 0;
        loop {
            debug!(phase = %CyclePhase::Idle);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }

            self.run_cycle().await.log();
            cycles += 1;
            debug!(phase = %CyclePhase::Sleeping);
        }

        info!(cycles, "Poll loop stopped");
        cycles
    }
}
