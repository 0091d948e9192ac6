//! Log-backed keyed store
//!
//! A `LogBackedStore` keeps an in-memory snapshot of one resource log. The
//! snapshot has exactly one writer: the apply loop, which replays the log from
//! the earliest offset on start and then tails it in strict offset order.
//! `put` and `delete` only append, then wait until the apply loop has moved
//! past the offset the log assigned to their record.

use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace};

use crate::config::StoreConfig;
use crate::error::NsPlaneError;
use crate::storage::traits::{LogRecord, ResourceLog};
use crate::{types::Offset, Result};

/// Progress published by the apply loop.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreStatus {
    /// Every record below this offset is reflected in the snapshot
    pub applied_offset: Offset,
    /// Startup replay reached the high watermark observed at start
    pub ready: bool,
    /// Records applied by the startup replay
    pub replayed: Offset,
    /// Set once the apply loop gave up; the store no longer serves
    pub fatal: Option<String>,
}

type Snapshot<V> = Arc<RwLock<BTreeMap<String, V>>>;

pub struct LogBackedStore<V> {
    name: String,
    log: Arc<dyn ResourceLog>,
    snapshot: Snapshot<V>,
    status: Arc<watch::Sender<StoreStatus>>,
    write_timeout: Duration,
    init_timeout: Duration,
    poll_interval: Duration,
    max_poll_records: usize,
    apply_task: Mutex<Option<JoinHandle<()>>>,
    _value: PhantomData<fn() -> V>,
}

impl<V> LogBackedStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(log: Arc<dyn ResourceLog>, config: &StoreConfig) -> Arc<Self> {
        let (status, _) = watch::channel(StoreStatus::default());
        Arc::new(Self {
            name: log.name().to_string(),
            log,
            snapshot: Arc::new(RwLock::new(BTreeMap::new())),
            status: Arc::new(status),
            write_timeout: config.write_timeout(),
            init_timeout: config.init_timeout(),
            poll_interval: config.poll_interval(),
            max_poll_records: config.max_poll_records,
            apply_task: Mutex::new(None),
            _value: PhantomData,
        })
    }

    /// Creates the store, starts its apply loop and waits for the startup replay.
    pub async fn open(log: Arc<dyn ResourceLog>, config: &StoreConfig) -> Result<Arc<Self>> {
        let store = Self::new(log, config);
        store.start();
        store.wait_until_ready().await?;
        Ok(store)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawns the apply loop. Calling it again is a no-op.
    pub fn start(&self) {
        let mut task = self.apply_task.lock();
        if task.is_some() {
            return;
        }

        let loop_state = ApplyLoop {
            name: self.name.clone(),
            log: self.log.clone(),
            snapshot: self.snapshot.clone(),
            status: self.status.clone(),
            poll_interval: self.poll_interval,
            max_poll_records: self.max_poll_records,
        };
        *task = Some(tokio::spawn(loop_state.run()));
    }

    pub fn status(&self) -> StoreStatus {
        self.status.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        let status = self.status.borrow();
        status.ready && status.fatal.is_none()
    }

    /// Blocks until startup replay completes, bounded by the init timeout.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let mut rx = self.status.subscribe();
        let waited = timeout(self.init_timeout, async move {
            rx.wait_for(|s| s.ready || s.fatal.is_some())
                .await
                .map(|s| s.fatal.clone())
        })
        .await;

        match waited {
            Ok(Ok(None)) => Ok(()),
            Ok(Ok(Some(message))) => Err(self.fatal_error(message)),
            Ok(Err(_)) => Err(self.fatal_error("status channel closed".to_string())),
            Err(_) => Err(NsPlaneError::StoreNotReady(self.name.clone())),
        }
    }

    /// Resolves with the reason once the apply loop has stopped.
    pub async fn wait_fatal(&self) -> String {
        let mut rx = self.status.subscribe();
        let reason = match rx.wait_for(|s| s.fatal.is_some()).await {
            Ok(status) => status.fatal.clone().unwrap_or_default(),
            Err(_) => "status channel closed".to_string(),
        };
        reason
    }

    /// Appends `value` under `key` and returns once the local snapshot reflects it.
    pub async fn put(&self, key: &str, value: V) -> Result<V> {
        self.ensure_serving()?;
        let payload = serde_json::to_vec(&value)?;
        self.append_and_wait(key, Some(payload)).await?;
        Ok(value)
    }

    /// Appends a tombstone for `key` with the same blocking contract as `put`.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_serving()?;
        self.append_and_wait(key, None).await
    }

    pub fn get(&self, key: &str) -> Result<Option<V>> {
        self.ensure_serving()?;
        Ok(self.snapshot.read().get(key).cloned())
    }

    pub fn list(&self) -> Result<Vec<V>> {
        self.ensure_serving()?;
        Ok(self.snapshot.read().values().cloned().collect())
    }

    pub fn list_filtered<F>(&self, predicate: F) -> Result<Vec<V>>
    where
        F: Fn(&V) -> bool,
    {
        self.ensure_serving()?;
        Ok(self
            .snapshot
            .read()
            .values()
            .filter(|v| predicate(v))
            .cloned()
            .collect())
    }

    /// Key/value pairs in key order.
    pub fn entries(&self) -> Result<Vec<(String, V)>> {
        self.ensure_serving()?;
        Ok(self
            .snapshot
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    pub fn shutdown(&self) {
        if let Some(task) = self.apply_task.lock().take() {
            task.abort();
        }
        self.status.send_modify(|s| {
            if s.fatal.is_none() {
                s.fatal = Some("store shut down".to_string());
            }
        });
    }

    fn ensure_serving(&self) -> Result<()> {
        let status = self.status.borrow();
        if let Some(message) = &status.fatal {
            return Err(self.fatal_error(message.clone()));
        }
        if !status.ready {
            return Err(NsPlaneError::StoreNotReady(self.name.clone()));
        }
        Ok(())
    }

    fn fatal_error(&self, message: String) -> NsPlaneError {
        NsPlaneError::StoreFatal {
            store: self.name.clone(),
            message,
        }
    }

    fn write_error(&self, message: impl Into<String>) -> NsPlaneError {
        NsPlaneError::StoreWrite {
            store: self.name.clone(),
            message: message.into(),
        }
    }

    async fn append_and_wait(&self, key: &str, value: Option<Vec<u8>>) -> Result<()> {
        let started = Instant::now();

        let offset = match timeout(self.write_timeout, self.log.append(key, value)).await {
            Ok(Ok(offset)) => offset,
            Ok(Err(e @ NsPlaneError::StoreWrite { .. })) => return Err(e),
            Ok(Err(e)) => return Err(self.write_error(e.to_string())),
            Err(_) => return Err(self.write_error("append timed out")),
        };
        trace!("Appended {} to {} at offset {}", key, self.name, offset);

        let remaining = self.write_timeout.saturating_sub(started.elapsed());
        let mut rx = self.status.subscribe();
        let waited = timeout(remaining, async move {
            rx.wait_for(|s| s.applied_offset > offset || s.fatal.is_some())
                .await
                .map(|s| s.fatal.clone())
        })
        .await;

        match waited {
            Ok(Ok(None)) => Ok(()),
            Ok(Ok(Some(message))) => Err(self.fatal_error(message)),
            Ok(Err(_)) => Err(self.fatal_error("status channel closed".to_string())),
            Err(_) => Err(self.write_error(format!(
                "offset {} not applied within {}ms",
                offset,
                self.write_timeout.as_millis()
            ))),
        }
    }
}

impl<V> Drop for LogBackedStore<V> {
    fn drop(&mut self) {
        if let Some(task) = self.apply_task.get_mut().take() {
            task.abort();
        }
    }
}

struct ApplyLoop<V> {
    name: String,
    log: Arc<dyn ResourceLog>,
    snapshot: Snapshot<V>,
    status: Arc<watch::Sender<StoreStatus>>,
    poll_interval: Duration,
    max_poll_records: usize,
}

impl<V> ApplyLoop<V>
where
    V: DeserializeOwned + Send + Sync + 'static,
{
    async fn run(self) {
        if let Err(e) = self.replay_and_tail().await {
            error!("Apply loop of store {} stopped: {}", self.name, e);
            let message = e.to_string();
            self.status.send_modify(|s| s.fatal = Some(message));
        }
    }

    async fn replay_and_tail(&self) -> Result<()> {
        let start = self.log.low_watermark().await?;
        let mut position = start;
        let target = self.log.high_watermark().await?;
        let started = Instant::now();

        self.status.send_modify(|s| s.applied_offset = position);

        while position < target {
            let batch = self
                .log
                .read(position, self.max_poll_records, self.poll_interval)
                .await?;
            position = self.apply_batch(position, batch)?;
        }

        let replayed = position.saturating_sub(start);
        info!(
            "Store {} replayed {} records in {:?}",
            self.name,
            replayed,
            started.elapsed()
        );
        self.status.send_modify(|s| {
            s.ready = true;
            s.replayed = replayed;
        });

        loop {
            let batch = self
                .log
                .read(position, self.max_poll_records, self.poll_interval)
                .await?;
            position = self.apply_batch(position, batch)?;
        }
    }

    /// Applies a batch that must start exactly at `position`. Returns the next position.
    fn apply_batch(&self, mut position: Offset, batch: Vec<LogRecord>) -> Result<Offset> {
        if batch.is_empty() {
            return Ok(position);
        }

        {
            let mut snapshot = self.snapshot.write();
            for record in batch {
                if record.offset != position {
                    return Err(NsPlaneError::StoreFatal {
                        store: self.name.clone(),
                        message: format!(
                            "expected offset {} but log delivered {}",
                            position, record.offset
                        ),
                    });
                }

                match record.value {
                    Some(bytes) => {
                        let value: V = serde_json::from_slice(&bytes).map_err(|e| {
                            NsPlaneError::StoreFatal {
                                store: self.name.clone(),
                                message: format!(
                                    "cannot decode record {} at offset {}: {}",
                                    record.key, record.offset, e
                                ),
                            }
                        })?;
                        snapshot.insert(record.key, value);
                    }
                    None => {
                        snapshot.remove(&record.key);
                    }
                }
                position += 1;
            }
        }

        debug!("Store {} applied up to offset {}", self.name, position);
        self.status.send_modify(|s| s.applied_offset = position);
        Ok(position)
    }
}
