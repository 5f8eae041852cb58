//! Bloom Ingest Library
//!
//! Incremental ingestion of plant sensor readings from a ThingSpeak channel
//! into a document store.
//!
//! # Pipeline
//!
//! - **feed**: fetch a batch of raw entries
//! - **watermark**: remember the highest entry already processed
//! - **filter**: keep entries above the watermark
//! - **record**: parse entries into typed records, field by field
//! - **sink**: insert records that are not stored yet
//! - **poller**: drive the above on a fixed interval
//!
//! The **relay** runs the other direction: it reads the microcontroller's
//! serial lines (see **reading**) and uploads them to the channel.
//!
//! # Example
//!
//! ```no_run
//! use bloom_ingest::{config::IngestConfig, poller::Poller, store};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load()?;
//!     let store = store::open_store(&config.store).await?;
//!     let report = Poller::from_config(&config, store)?.run_cycle().await;
//!     println!("wrote {} records", report.written);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod feed;
pub mod filter;
pub mod poller;
pub mod reading;
pub mod record;
pub mod relay;
pub mod sink;
pub mod store;
pub mod watermark;
