//! Entry filter

use crate::feed::{Batch, RawEntry};

/// Entries with `entry_id > watermark`, in delivery order.
///
/// An empty result is the normal "nothing new" outcome.
pub fn select_new(batch: Batch, watermark: u64) -> Vec<RawEntry> {
    batch
        .entries
        .into_iter()
        .filter(|entry| entry.entry_id > watermark)
        .collect()
}
