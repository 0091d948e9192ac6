use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{types::Offset, Result};

/// One entry of a resource log. `value == None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Assigned by the log on append
    pub offset: Offset,
    pub key: String,
    pub value: Option<Vec<u8>>,
    pub timestamp: i64,
}

impl LogRecord {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Ordered append-only log holding every record of one resource type.
///
/// Offsets are dense and monotonic. Records sharing a key keep their append order.
#[async_trait]
pub trait ResourceLog: Send + Sync {
    fn name(&self) -> &str;

    /// Appends a keyed record and returns the offset the log assigned to it.
    async fn append(&self, key: &str, value: Option<Vec<u8>>) -> Result<Offset>;

    /// Reads up to `max_records` starting at `offset`. When nothing is
    /// available the call waits up to `max_wait` for new appends and may
    /// return an empty batch.
    async fn read(&self, offset: Offset, max_records: usize, max_wait: Duration) -> Result<Vec<LogRecord>>;

    /// Offset the next append will receive.
    async fn high_watermark(&self) -> Result<Offset>;

    /// Earliest offset still readable.
    async fn low_watermark(&self) -> Result<Offset>;
}
