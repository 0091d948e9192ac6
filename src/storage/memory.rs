use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;

use crate::error::NsPlaneError;
use crate::storage::traits::{LogRecord, ResourceLog};
use crate::{types::Offset, Result};

/// Record sequence shared by the in-memory and file-backed logs.
pub(crate) struct LogState {
    records: RwLock<Vec<LogRecord>>,
    high_watermark: watch::Sender<Offset>,
}

impl LogState {
    pub(crate) fn new(records: Vec<LogRecord>) -> Self {
        let (high_watermark, _) = watch::channel(records.len() as Offset);
        Self {
            records: RwLock::new(records),
            high_watermark,
        }
    }

    pub(crate) fn push(&self, key: &str, value: Option<Vec<u8>>) -> LogRecord {
        let mut records = self.records.write();
        let record = LogRecord {
            offset: records.len() as Offset,
            key: key.to_string(),
            value,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        records.push(record.clone());
        let next = records.len() as Offset;
        drop(records);

        self.high_watermark.send_replace(next);
        record
    }

    /// Publishes a record whose offset was reserved with `next_offset` by the single writer.
    pub(crate) fn push_record(&self, record: LogRecord) -> Offset {
        let mut records = self.records.write();
        debug_assert_eq!(record.offset, records.len() as Offset);
        let offset = record.offset;
        records.push(record);
        let next = records.len() as Offset;
        drop(records);

        self.high_watermark.send_replace(next);
        offset
    }

    /// Offset the next pushed record will receive.
    pub(crate) fn next_offset(&self) -> Offset {
        self.records.read().len() as Offset
    }

    pub(crate) fn high_watermark(&self) -> Offset {
        *self.high_watermark.borrow()
    }

    fn collect(&self, offset: Offset, max_records: usize) -> Vec<LogRecord> {
        let records = self.records.read();
        records
            .iter()
            .skip(offset as usize)
            .take(max_records)
            .cloned()
            .collect()
    }

    pub(crate) async fn read(
        &self,
        offset: Offset,
        max_records: usize,
        max_wait: Duration,
    ) -> Vec<LogRecord> {
        let batch = self.collect(offset, max_records);
        if !batch.is_empty() {
            return batch;
        }

        let mut rx = self.high_watermark.subscribe();
        let _ = tokio::time::timeout(max_wait, async move {
            rx.wait_for(|hwm| *hwm > offset).await.map(|_| ())
        })
        .await;

        self.collect(offset, max_records)
    }
}

/// Process-local resource log. Used by tests and single-node deployments.
pub struct InMemoryResourceLog {
    name: String,
    state: LogState,
    reject_appends: AtomicBool,
    reads_paused: AtomicBool,
}

impl InMemoryResourceLog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: LogState::new(Vec::new()),
            reject_appends: AtomicBool::new(false),
            reads_paused: AtomicBool::new(false),
        }
    }

    /// Makes every append fail as if the log were unreachable.
    pub fn set_reject_appends(&self, reject: bool) {
        self.reject_appends.store(reject, Ordering::SeqCst);
    }

    /// Stops delivering records to readers while still accepting appends.
    pub fn set_reads_paused(&self, paused: bool) {
        self.reads_paused.store(paused, Ordering::SeqCst);
    }

    /// Appends raw bytes without any encoding check.
    pub fn append_raw(&self, key: &str, value: Option<Vec<u8>>) -> Offset {
        self.state.push(key, value).offset
    }

    pub fn len(&self) -> usize {
        self.state.next_offset() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResourceLog for InMemoryResourceLog {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append(&self, key: &str, value: Option<Vec<u8>>) -> Result<Offset> {
        if self.reject_appends.load(Ordering::SeqCst) {
            return Err(NsPlaneError::StoreWrite {
                store: self.name.clone(),
                message: "log unavailable".to_string(),
            });
        }
        Ok(self.state.push(key, value).offset)
    }

    async fn read(&self, offset: Offset, max_records: usize, max_wait: Duration) -> Result<Vec<LogRecord>> {
        if self.reads_paused.load(Ordering::SeqCst) {
            tokio::time::sleep(max_wait).await;
            return Ok(Vec::new());
        }
        let batch = self.state.read(offset, max_records, max_wait).await;
        if self.reads_paused.load(Ordering::SeqCst) {
            tokio::time::sleep(max_wait).await;
            return Ok(Vec::new());
        }
        Ok(batch)
    }

    async fn high_watermark(&self) -> Result<Offset> {
        Ok(self.state.high_watermark())
    }

    async fn low_watermark(&self) -> Result<Offset> {
        Ok(0)
    }
}
