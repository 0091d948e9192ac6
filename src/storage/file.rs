use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::NsPlaneError;
use crate::storage::memory::LogState;
use crate::storage::traits::{LogRecord, ResourceLog};
use crate::{types::Offset, Result};

// len(u32) + crc32(u32)
const FRAME_HEADER_SIZE: usize = 8;
const APPEND_CHANNEL_CAPACITY: usize = 1024;

enum LogCommand {
    Append {
        key: String,
        value: Option<Vec<u8>>,
        response: oneshot::Sender<Result<Offset>>,
    },
}

/// Durable resource log backed by one append-only file.
///
/// Frames are `len | crc32 | bincode(LogRecord)`, little-endian. A single
/// writer task owns the file so offsets follow file order.
pub struct FileResourceLog {
    name: String,
    path: PathBuf,
    state: Arc<LogState>,
    append_tx: mpsc::Sender<LogCommand>,
}

impl FileResourceLog {
    pub async fn open(dir: impl AsRef<Path>, name: impl Into<String>, fsync_on_write: bool) -> Result<Self> {
        let name = name.into();
        tokio::fs::create_dir_all(dir.as_ref()).await?;
        let path = dir.as_ref().join(format!("{}.log", name));

        let (records, valid_len) = Self::recover(&path).await?;
        info!("Recovered {} records from resource log {}", records.len(), path.display());

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .await?;

        let file_len = file.metadata().await?.len();
        if file_len > valid_len {
            warn!(
                "Truncating torn tail of {}: {} bytes after offset {}",
                path.display(),
                file_len - valid_len,
                records.len()
            );
            file.set_len(valid_len).await?;
        }

        file.seek(SeekFrom::Start(valid_len)).await?;

        let writer = LogWriter::new(name.clone(), file, valid_len, fsync_on_write);
        Ok(Self::start(name, path, records, writer))
    }

    fn start<F: SegmentFile + 'static>(
        name: String,
        path: PathBuf,
        records: Vec<LogRecord>,
        writer: LogWriter<F>,
    ) -> Self {
        let state = Arc::new(LogState::new(records));
        let (append_tx, append_rx) = mpsc::channel(APPEND_CHANNEL_CAPACITY);
        tokio::spawn(Self::file_task(writer, append_rx, state.clone()));

        Self {
            name,
            path,
            state,
            append_tx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every intact frame. Returns the records and the byte length they cover.
    async fn recover(path: &Path) -> Result<(Vec<LogRecord>, u64)> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        let mut pos = 0usize;

        while pos + FRAME_HEADER_SIZE <= data.len() {
            let len = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
            let crc = u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);
            let start = pos + FRAME_HEADER_SIZE;
            if start + len > data.len() {
                // incomplete trailing frame
                break;
            }

            let payload = &data[start..start + len];
            if crc32fast::hash(payload) != crc {
                if start + len == data.len() {
                    break;
                }
                return Err(NsPlaneError::Serialization(format!(
                    "checksum mismatch in {} at byte {}",
                    path.display(),
                    pos
                )));
            }

            let record: LogRecord = bincode::deserialize(payload)?;
            if record.offset != records.len() as Offset {
                return Err(NsPlaneError::Serialization(format!(
                    "non-contiguous offset {} in {} (expected {})",
                    record.offset,
                    path.display(),
                    records.len()
                )));
            }
            records.push(record);
            pos = start + len;
        }

        Ok((records, pos as u64))
    }

    async fn file_task<F: SegmentFile>(
        mut writer: LogWriter<F>,
        mut append_rx: mpsc::Receiver<LogCommand>,
        state: Arc<LogState>,
    ) {
        while let Some(command) = append_rx.recv().await {
            match command {
                LogCommand::Append { key, value, response } => {
                    let result = writer.write_record(&state, &key, value).await;
                    let _ = response.send(result);
                }
            }
        }
        debug!("Resource log writer stopped");
    }
}

fn encode_frame(record: &LogRecord) -> Result<Vec<u8>> {
    let payload = bincode::serialize(record)?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Byte sink behind the writer task.
#[async_trait]
trait SegmentFile: Send {
    /// Writes the whole frame and flushes it to the OS.
    async fn append_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    async fn sync(&mut self) -> io::Result<()>;

    /// Cuts the file back to `len` bytes and positions the cursor there.
    async fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

#[async_trait]
impl SegmentFile for File {
    async fn append_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.write_all(frame).await?;
        self.flush().await
    }

    async fn sync(&mut self) -> io::Result<()> {
        self.sync_data().await
    }

    async fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len).await?;
        self.seek(SeekFrom::Start(len)).await?;
        Ok(())
    }
}

/// Owns the file for the writer task. `valid_len` always ends on a frame
/// boundary; a failed append is cut back to it before the next one.
struct LogWriter<F> {
    name: String,
    file: F,
    valid_len: u64,
    fsync_on_write: bool,
    failed: Option<String>,
}

impl<F: SegmentFile> LogWriter<F> {
    fn new(name: String, file: F, valid_len: u64, fsync_on_write: bool) -> Self {
        Self {
            name,
            file,
            valid_len,
            fsync_on_write,
            failed: None,
        }
    }

    async fn write_record(&mut self, state: &LogState, key: &str, value: Option<Vec<u8>>) -> Result<Offset> {
        if let Some(reason) = &self.failed {
            return Err(self.write_error(format!("log is read-only after a failed rollback: {}", reason)));
        }

        let record = LogRecord {
            offset: state.next_offset(),
            key: key.to_string(),
            value,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let frame = encode_frame(&record)?;

        if let Err(e) = self.persist(&frame).await {
            self.roll_back(&e).await;
            return Err(self.write_error(format!("append at offset {} failed: {}", record.offset, e)));
        }
        self.valid_len += frame.len() as u64;

        // Published only once durable.
        Ok(state.push_record(record))
    }

    async fn persist(&mut self, frame: &[u8]) -> io::Result<()> {
        self.file.append_frame(frame).await?;
        if self.fsync_on_write {
            self.file.sync().await?;
        }
        Ok(())
    }

    async fn roll_back(&mut self, cause: &io::Error) {
        match self.file.truncate_to(self.valid_len).await {
            Ok(()) => warn!(
                "Append to {} failed, rolled back to byte {}: {}",
                self.name, self.valid_len, cause
            ),
            Err(e) => {
                error!(
                    "Cannot roll back {} to byte {} after failed append: {}",
                    self.name, self.valid_len, e
                );
                self.failed = Some(format!("{} (after: {})", e, cause));
            }
        }
    }

    fn write_error(&self, message: String) -> NsPlaneError {
        NsPlaneError::StoreWrite {
            store: self.name.clone(),
            message,
        }
    }
}

#[async_trait]
impl ResourceLog for FileResourceLog {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append(&self, key: &str, value: Option<Vec<u8>>) -> Result<Offset> {
        let (tx, rx) = oneshot::channel();
        self.append_tx
            .send(LogCommand::Append {
                key: key.to_string(),
                value,
                response: tx,
            })
            .await
            .map_err(|_| NsPlaneError::StoreWrite {
                store: self.name.clone(),
                message: "log writer unavailable".to_string(),
            })?;

        rx.await.map_err(|_| NsPlaneError::StoreWrite {
            store: self.name.clone(),
            message: "log writer dropped the append".to_string(),
        })?
    }

    async fn read(&self, offset: Offset, max_records: usize, max_wait: Duration) -> Result<Vec<LogRecord>> {
        Ok(self.state.read(offset, max_records, max_wait).await)
    }

    async fn high_watermark(&self) -> Result<Offset> {
        Ok(self.state.high_watermark())
    }

    async fn low_watermark(&self) -> Result<Offset> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Writes half of the next frame and then fails, like a full disk.
    struct ShortWriteFile {
        inner: File,
        fail_next_append: Arc<AtomicBool>,
        fail_truncate: bool,
    }

    #[async_trait]
    impl SegmentFile for ShortWriteFile {
        async fn append_frame(&mut self, frame: &[u8]) -> io::Result<()> {
            if self.fail_next_append.swap(false, Ordering::SeqCst) {
                self.inner.write_all(&frame[..frame.len() / 2]).await?;
                self.inner.flush().await?;
                return Err(io::Error::new(io::ErrorKind::Other, "File too large"));
            }
            self.inner.append_frame(frame).await
        }

        async fn sync(&mut self) -> io::Result<()> {
            self.inner.sync().await
        }

        async fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            if self.fail_truncate {
                return Err(io::Error::new(io::ErrorKind::Other, "read-only file system"));
            }
            self.inner.truncate_to(len).await
        }
    }

    /// Reopens an existing log with a writer that fails its next append.
    async fn open_failing(dir: &Path, name: &str, fail_truncate: bool) -> FileResourceLog {
        let path = dir.join(format!("{}.log", name));
        let (records, valid_len) = FileResourceLog::recover(&path).await.unwrap();
        let mut inner = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .await
            .unwrap();
        inner.seek(SeekFrom::Start(valid_len)).await.unwrap();

        let file = ShortWriteFile {
            inner,
            fail_next_append: Arc::new(AtomicBool::new(true)),
            fail_truncate,
        };
        let writer = LogWriter::new(name.to_string(), file, valid_len, false);
        FileResourceLog::start(name.to_string(), path, records, writer)
    }

    #[tokio::test]
    async fn test_short_write_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = FileResourceLog::open(dir.path(), "namespaces", false).await.unwrap();
            assert_eq!(log.append("a", Some(b"a".to_vec())).await.unwrap(), 0);
        }

        let committed_len = {
            let log = open_failing(dir.path(), "namespaces", false).await;
            let err = log.append("b", Some(b"b".to_vec())).await.unwrap_err();
            assert!(matches!(err, NsPlaneError::StoreWrite { .. }));
            assert_eq!(log.high_watermark().await.unwrap(), 1);

            assert_eq!(log.append("c", Some(b"c".to_vec())).await.unwrap(), 1);
            std::fs::metadata(log.path()).unwrap().len()
        };

        let log = FileResourceLog::open(dir.path(), "namespaces", false).await.unwrap();
        assert_eq!(log.high_watermark().await.unwrap(), 2);
        assert_eq!(std::fs::metadata(log.path()).unwrap().len(), committed_len);

        let records = log.read(0, 10, Duration::from_millis(10)).await.unwrap();
        let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_failed_rollback_refuses_further_appends() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = FileResourceLog::open(dir.path(), "streams", false).await.unwrap();
            log.append("a", Some(b"a".to_vec())).await.unwrap();
        }

        let log = open_failing(dir.path(), "streams", true).await;
        assert!(log.append("b", Some(b"b".to_vec())).await.is_err());

        let err = log.append("c", Some(b"c".to_vec())).await.unwrap_err();
        assert!(matches!(err, NsPlaneError::StoreWrite { .. }));
        assert!(err.to_string().contains("read-only after a failed rollback"));
        assert_eq!(log.high_watermark().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reopen_recovers_records() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = FileResourceLog::open(dir.path(), "ns4kafka.namespaces", false).await.unwrap();
            assert_eq!(log.append("ns1", Some(b"one".to_vec())).await.unwrap(), 0);
            assert_eq!(log.append("ns2", Some(b"two".to_vec())).await.unwrap(), 1);
            assert_eq!(log.append("ns1", None).await.unwrap(), 2);
        }

        let log = FileResourceLog::open(dir.path(), "ns4kafka.namespaces", false).await.unwrap();
        assert_eq!(log.high_watermark().await.unwrap(), 3);

        let records = log.read(0, 10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].value.as_deref(), Some(&b"two"[..]));
        assert!(records[2].is_tombstone());

        assert_eq!(log.append("ns3", Some(b"three".to_vec())).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let log = FileResourceLog::open(dir.path(), "streams", false).await.unwrap();
            log.append("ns1/s1", Some(b"s".to_vec())).await.unwrap();
            log.path().to_path_buf()
        };

        let mut data = std::fs::read(&path).unwrap();
        let intact = data.len();
        data.extend_from_slice(&[42, 0, 0, 0, 1, 2]);
        std::fs::write(&path, &data).unwrap();

        let log = FileResourceLog::open(dir.path(), "streams", false).await.unwrap();
        assert_eq!(log.high_watermark().await.unwrap(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact as u64);
    }
}
