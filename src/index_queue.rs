//! Durable work queue feeding a full-text index.
//!
//! Producers call [`IndexUpdater::schedule_update`], which only appends to
//! the on-disk queue and wakes the worker. A single background thread
//! applies operations in order; a failing operation stays at the head of
//! the queue and is retried after a delay.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::Builder;
use tracing::{debug, info, warn};

use crate::error::BdsError;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Order-preserving queue persisted as one JSON document per line.
#[derive(Debug)]
pub struct PersistentQueue<T> {
    path: Utf8PathBuf,
    items: VecDeque<T>,
}

impl<T> PersistentQueue<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Loads the queue stored at `path`; a missing file is an empty queue.
    pub fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, BdsError> {
        let path = path.into();
        let items = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| {
                    serde_json::from_str(line).map_err(|err| {
                        BdsError::DataStructure(format!("corrupt queue entry in {path}: {err}"))
                    })
                })
                .collect::<Result<VecDeque<T>, _>>()?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(err) => return Err(BdsError::Storage(format!("read {path}: {err}"))),
        };
        Ok(Self { path, items })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn add(&mut self, item: T) -> Result<(), BdsError> {
        let line = serde_json::to_string(&item)
            .map_err(|err| BdsError::Storage(format!("encode queue entry: {err}")))?;
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| BdsError::Storage(format!("create directory {parent}: {err}")))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_std_path())
            .map_err(|err| BdsError::Storage(format!("open {}: {err}", self.path)))?;
        writeln!(file, "{line}")
            .and_then(|_| file.sync_data())
            .map_err(|err| BdsError::Storage(format!("append {}: {err}", self.path)))?;
        self.items.push_back(item);
        Ok(())
    }

    pub fn remove_first(&mut self) -> Result<Option<T>, BdsError> {
        let Some(first) = self.items.pop_front() else {
            return Ok(None);
        };
        if let Err(err) = self.rewrite() {
            self.items.push_front(first);
            return Err(err);
        }
        Ok(Some(first))
    }

    fn rewrite(&self) -> Result<(), BdsError> {
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));
        let mut temp = Builder::new()
            .prefix(".queue-")
            .tempfile_in(dir.as_std_path())
            .map_err(|err| BdsError::Storage(err.to_string()))?;
        for item in &self.items {
            let line = serde_json::to_string(item)
                .map_err(|err| BdsError::Storage(format!("encode queue entry: {err}")))?;
            writeln!(temp, "{line}").map_err(|err| BdsError::Storage(err.to_string()))?;
        }
        temp.persist(self.path.as_std_path())
            .map_err(|err| BdsError::Storage(format!("write {}: {err}", self.path)))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOperationKind {
    Reindex,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct IndexOperation {
    pub kind: IndexOperationKind,
    pub entity_class: String,
    pub ids: Vec<u64>,
}

impl IndexOperation {
    pub fn reindex(entity_class: impl Into<String>, ids: Vec<u64>) -> Self {
        Self {
            kind: IndexOperationKind::Reindex,
            entity_class: entity_class.into(),
            ids,
        }
    }

    pub fn delete(entity_class: impl Into<String>, ids: Vec<u64>) -> Self {
        Self {
            kind: IndexOperationKind::Delete,
            entity_class: entity_class.into(),
            ids,
        }
    }
}

/// The index the updater writes to.
pub trait Indexer: Send + 'static {
    fn apply(&mut self, operation: &IndexOperation) -> Result<(), BdsError>;
}

struct Shared {
    queue: Mutex<PersistentQueue<IndexOperation>>,
    wake: Condvar,
    stop: AtomicBool,
}

impl Shared {
    /// A panic while holding the lock leaves the queue itself consistent,
    /// so poisoning is ignored.
    fn queue(&self) -> MutexGuard<'_, PersistentQueue<IndexOperation>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sleeps for `delay` unless stopped first. Returns whether the worker
    /// should go on.
    fn pause(&self, delay: Duration) -> bool {
        let queue = self.queue();
        if self.is_stopped() {
            return false;
        }
        let (_queue, _) = self
            .wake
            .wait_timeout(queue, delay)
            .unwrap_or_else(PoisonError::into_inner);
        !self.is_stopped()
    }
}

/// Owns the worker thread draining a [`PersistentQueue`] of
/// [`IndexOperation`]s.
pub struct IndexUpdater {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl IndexUpdater {
    pub fn start(
        queue_path: impl Into<Utf8PathBuf>,
        indexer: impl Indexer,
    ) -> Result<Self, BdsError> {
        Self::start_with_retry_delay(queue_path, indexer, DEFAULT_RETRY_DELAY)
    }

    pub fn start_with_retry_delay(
        queue_path: impl Into<Utf8PathBuf>,
        mut indexer: impl Indexer,
        retry_delay: Duration,
    ) -> Result<Self, BdsError> {
        let queue = PersistentQueue::open(queue_path)?;
        info!(queue = %queue.path(), pending = queue.len(), "index updater started");
        let shared = Arc::new(Shared {
            queue: Mutex::new(queue),
            wake: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("index-updater".to_string())
            .spawn(move || run_worker(&worker_shared, &mut indexer, retry_delay))
            .map_err(|err| BdsError::Storage(format!("spawn index updater: {err}")))?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Durably enqueues `operation` and returns without waiting for it.
    pub fn schedule_update(&self, operation: IndexOperation) -> Result<(), BdsError> {
        debug!(
            kind = ?operation.kind,
            class = %operation.entity_class,
            ids = operation.ids.len(),
            "index update scheduled"
        );
        self.shared.queue().add(operation)?;
        self.shared.wake.notify_one();
        Ok(())
    }

    pub fn pending(&self) -> Result<usize, BdsError> {
        Ok(self.shared.queue().len())
    }

    /// Stops the worker after its current operation. Whatever is still
    /// queued stays on disk for the next start.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        {
            // Set under the queue lock so a worker about to wait sees it.
            let _queue = self.shared.queue();
            self.shared.stop.store(true, Ordering::SeqCst);
        }
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("index updater thread panicked");
            }
        }
    }
}

impl Drop for IndexUpdater {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// Runs until stopped. The head of the queue is removed only after it was
/// applied; an applied head whose removal failed is not applied again.
fn run_worker(shared: &Shared, indexer: &mut dyn Indexer, retry_delay: Duration) {
    let mut applied_head = false;
    loop {
        let operation = {
            let mut queue = shared.queue();
            loop {
                if shared.is_stopped() {
                    return;
                }
                if let Some(operation) = queue.peek() {
                    break operation.clone();
                }
                queue = shared
                    .wake
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        if !applied_head {
            if let Err(err) = indexer.apply(&operation) {
                warn!(
                    kind = ?operation.kind,
                    class = %operation.entity_class,
                    error = %err,
                    "index operation failed, retrying in {retry_delay:?}"
                );
                if !shared.pause(retry_delay) {
                    return;
                }
                continue;
            }
            applied_head = true;
            debug!(kind = ?operation.kind, class = %operation.entity_class, "index operation applied");
        }

        match shared.queue().remove_first() {
            Ok(_) => applied_head = false,
            Err(err) => {
                warn!(
                    error = %err,
                    "could not remove applied index operation, retrying in {retry_delay:?}"
                );
                if !shared.pause(retry_delay) {
                    return;
                }
            }
        }
    }
}
