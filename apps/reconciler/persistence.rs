use crate::models::{PendingExecution, PendingVote, ProposalKey, ProposalRecord};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, instrument, warn};

pub const DEFAULT_STORAGE_KEY: &str = "pendingProposals";
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode pending cache: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
}

/// String key-value surface the pending cache mirrors itself into.
pub trait DurableStore: Send + Sync {
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;
}

/// Answers whether the user accepted functional storage.
pub trait ConsentProvider: Send + Sync {
    fn functional_accepted(&self) -> bool;
}

/// Consent flag that can be flipped while the service runs.
#[derive(Debug, Clone, Default)]
pub struct ConsentFlag(Arc<AtomicBool>);

impl ConsentFlag {
    pub fn new(accepted: bool) -> Self {
        Self(Arc::new(AtomicBool::new(accepted)))
    }

    pub fn set(&self, accepted: bool) {
        self.0.store(accepted, Ordering::SeqCst);
    }
}

impl ConsentProvider for ConsentFlag {
    fn functional_accepted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }
}

/// One JSON file per key inside `dir`. Writes land in a temp file first and are
/// renamed into place so a crash never leaves half a snapshot behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

impl DurableStore for FileStore {
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry<T> {
    pub key: ProposalKey,
    pub record: T,
}

/// Everything the pending cache holds, in insertion order per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    #[serde(default)]
    pub proposals: Vec<SnapshotEntry<ProposalRecord>>,
    #[serde(default)]
    pub votes: Vec<SnapshotEntry<PendingVote>>,
    #[serde(default)]
    pub executions: Vec<SnapshotEntry<PendingExecution>>,
}

impl Default for CacheSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            proposals: Vec::new(),
            votes: Vec::new(),
            executions: Vec::new(),
        }
    }
}

impl CacheSnapshot {
    pub fn encode(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, StoreError> {
        let snapshot: CacheSnapshot = serde_json::from_str(raw)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedVersion(snapshot.version));
        }
        Ok(snapshot)
    }
}

/// Consent-gated mirror of the pending cache into a durable store.
#[derive(Clone)]
pub struct CacheMirror {
    store: Arc<dyn DurableStore>,
    consent: Arc<dyn ConsentProvider>,
    key: String,
}

impl CacheMirror {
    pub fn new(store: Arc<dyn DurableStore>, consent: Arc<dyn ConsentProvider>) -> Self {
        Self::with_key(store, consent, DEFAULT_STORAGE_KEY)
    }

    pub fn with_key(
        store: Arc<dyn DurableStore>,
        consent: Arc<dyn ConsentProvider>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            consent,
            key: key.into(),
        }
    }

    /// Best effort: failures are logged and never reach the caller.
    #[instrument(skip(self, snapshot), fields(key = %self.key))]
    pub fn mirror(&self, snapshot: &CacheSnapshot) {
        if !self.consent.functional_accepted() {
            debug!("Functional storage not accepted, skipping pending cache mirror");
            return;
        }

        let result = snapshot
            .encode()
            .and_then(|encoded| self.store.set_item(&self.key, &encoded));

        if let Err(e) = result {
            error!(error = %e, "Failed to mirror pending cache");
        }
    }

    /// Reads the last mirrored snapshot. Without consent nothing is read.
    pub fn load(&self) -> Result<Option<CacheSnapshot>, StoreError> {
        if !self.consent.functional_accepted() {
            return Ok(None);
        }
        self.store
            .get_item(&self.key)?
            .map(|raw| CacheSnapshot::decode(&raw))
            .transpose()
    }
}

type Queued = Option<(u64, CacheSnapshot)>;

/// Latest-wins writer in front of a [`CacheMirror`].
///
/// Inside a tokio runtime snapshots go to one writer task that encodes and stores them
/// on the blocking pool; snapshots superseded while a write is running are skipped.
/// Outside a runtime the write happens inline on the submitting thread.
pub struct MirrorWriter {
    mirror: CacheMirror,
    queue: Option<watch::Sender<Queued>>,
    written: Arc<watch::Sender<u64>>,
    inline: Mutex<u64>,
    next: AtomicU64,
}

impl MirrorWriter {
    pub fn new(mirror: CacheMirror) -> Self {
        let (written, _) = watch::channel(0);
        let written = Arc::new(written);

        let queue = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let (queue, pending) = watch::channel(None);
                handle.spawn(run_writer(mirror.clone(), pending, written.clone()));
                Some(queue)
            }
            Err(_) => {
                debug!("No runtime, pending cache mirror writes inline");
                None
            }
        };

        Self {
            mirror,
            queue,
            written,
            inline: Mutex::new(0),
            next: AtomicU64::new(0),
        }
    }

    /// Reserves the next sequence number. Call it under the same lock the snapshot is
    /// taken under so sequence order matches state order.
    pub fn next_seq(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Hands `snapshot` over for writing. An older `seq` than one already queued or
    /// written is dropped.
    pub fn submit(&self, seq: u64, snapshot: CacheSnapshot) {
        let Some(queue) = &self.queue else {
            let mut last = self.inline.lock().unwrap_or_else(|e| e.into_inner());
            if seq > *last {
                self.mirror.mirror(&snapshot);
                *last = seq;
                self.written.send_replace(seq);
            }
            return;
        };

        queue.send_if_modified(|queued| {
            if queued.as_ref().is_some_and(|(latest, _)| *latest >= seq) {
                return false;
            }
            *queued = Some((seq, snapshot));
            true
        });
    }

    /// Resolves once every snapshot submitted so far has been written or superseded.
    pub async fn flush(&self) {
        let target = self.next.load(Ordering::SeqCst);
        let mut written = self.written.subscribe();
        let _ = written.wait_for(|seq| *seq >= target).await;
    }
}

async fn run_writer(
    mirror: CacheMirror,
    mut pending: watch::Receiver<Queued>,
    written: Arc<watch::Sender<u64>>,
) {
    loop {
        // a closed queue still gets its last snapshot written
        let closed = pending.changed().await.is_err();
        let queued = pending.borrow_and_update().clone();

        let last = *written.borrow();
        if let Some((seq, snapshot)) = queued {
            if seq > last {
                let mirror = mirror.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || mirror.mirror(&snapshot)).await {
                    warn!(error = %e, "Pending cache mirror write did not complete");
                }
                written.send_replace(seq);
            }
        }

        if closed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStore;

    impl DurableStore for FailingStore {
        fn set_item(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("quota exceeded")))
        }

        fn get_item(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
    }

    #[test]
    fn mirror_respects_consent() {
        let store = Arc::new(MemoryStore::new());
        let consent = ConsentFlag::new(false);
        let mirror = CacheMirror::new(store.clone(), Arc::new(consent.clone()));

        mirror.mirror(&CacheSnapshot::default());
        assert_eq!(store.get_item(DEFAULT_STORAGE_KEY).unwrap(), None);

        consent.set(true);
        mirror.mirror(&CacheSnapshot::default());
        assert!(store.get_item(DEFAULT_STORAGE_KEY).unwrap().is_some());
        assert_eq!(mirror.load().unwrap(), Some(CacheSnapshot::default()));
    }

    #[test]
    fn inline_writer_skips_superseded_snapshots() {
        let store = Arc::new(MemoryStore::new());
        let writer = MirrorWriter::new(CacheMirror::new(
            store.clone(),
            Arc::new(ConsentFlag::new(true)),
        ));

        let older = writer.next_seq();
        let newer = writer.next_seq();
        let latest = CacheSnapshot {
            version: 9,
            ..CacheSnapshot::default()
        };
        writer.submit(newer, latest);
        writer.submit(older, CacheSnapshot::default());

        let raw = store.get_item(DEFAULT_STORAGE_KEY).unwrap().unwrap();
        assert!(matches!(
            CacheSnapshot::decode(&raw),
            Err(StoreError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn mirror_swallows_store_failures() {
        let mirror = CacheMirror::new(Arc::new(FailingStore), Arc::new(ConsentFlag::new(true)));
        mirror.mirror(&CacheSnapshot::default());
    }

    #[test]
    fn decode_rejects_other_versions() {
        let raw = r#"{"version":7,"proposals":[],"votes":[],"executions":[]}"#;
        assert!(matches!(
            CacheSnapshot::decode(raw),
            Err(StoreError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn file_store_round_trips_and_reports_missing_keys() {
        let dir = std::env::temp_dir().join(format!("pending-cache-{}", uuid::Uuid::new_v4()));
        let store = FileStore::new(&dir).unwrap();

        assert_eq!(store.get_item("pendingProposals").unwrap(), None);
        store.set_item("pendingProposals", "{\"a\":1}").unwrap();
        store.set_item("pendingProposals", "{\"a\":2}").unwrap();
        assert_eq!(
            store.get_item("pendingProposals").unwrap().as_deref(),
            Some("{\"a\":2}")
        );
        assert!(store.dir().join("pendingProposals.json").exists());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn file_store_sanitizes_keys() {
        let dir = std::env::temp_dir().join(format!("pending-cache-{}", uuid::Uuid::new_v4()));
        let store = FileStore::new(&dir).unwrap();
        store.set_item("../escape/attempt", "x").unwrap();
        assert!(dir.join("___escape_attempt.json").exists());
        fs::remove_dir_all(dir).unwrap();
    }
}
