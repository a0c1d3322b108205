//! Optimistic writes waiting for the indexer to catch up.
//!
//! The cache holds three independent tables keyed by `(daoAddress, proposalId)`:
//! proposals created locally, votes cast locally and executions submitted locally.
//! All access goes through short synchronous transactions. A transaction that changed
//! anything snapshots the cache and notifies subscribers; the snapshot is written to
//! the durable store in the background (when consent allows).

use crate::augment::VoteOptionTable;
use crate::models::{
    PendingExecution, PendingVote, PluginType, ProposalKey, ProposalRecord, normalize_dao,
};
use crate::persistence::{CacheMirror, CacheSnapshot, MirrorWriter, SnapshotEntry, StoreError};
use crate::pipeline::{Reconciliation, reconcile_list};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingKind {
    Proposal,
    Vote,
    Execution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheChange {
    Put,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEvent {
    pub kind: PendingKind,
    pub key: ProposalKey,
    pub change: CacheChange,
}

struct Slot<T> {
    seq: u64,
    record: T,
}

struct PendingTable<T> {
    entries: HashMap<ProposalKey, Slot<T>>,
}

impl<T> Default for PendingTable<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T: Clone> PendingTable<T> {
    /// Overwrites keep their original position.
    fn put(&mut self, key: ProposalKey, record: T, seq: u64) {
        match self.entries.get_mut(&key) {
            Some(slot) => slot.record = record,
            None => {
                self.entries.insert(key, Slot { seq, record });
            }
        }
    }

    fn get(&self, key: &ProposalKey) -> Option<&T> {
        self.entries.get(key).map(|slot| &slot.record)
    }

    fn remove(&mut self, key: &ProposalKey) -> Option<T> {
        self.entries.remove(key).map(|slot| slot.record)
    }

    fn ordered(&self) -> Vec<(&ProposalKey, &Slot<T>)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by_key(|(_, slot)| slot.seq);
        entries
    }

    fn scoped(&self, dao: &str) -> Vec<(String, T)> {
        self.ordered()
            .into_iter()
            .filter(|(key, _)| key.dao_address() == dao)
            .map(|(key, slot)| (key.proposal_id().to_string(), slot.record.clone()))
            .collect()
    }

    fn snapshot(&self) -> Vec<SnapshotEntry<T>> {
        self.ordered()
            .into_iter()
            .map(|(key, slot)| SnapshotEntry {
                key: key.clone(),
                record: slot.record.clone(),
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Default)]
struct CacheState {
    proposals: PendingTable<ProposalRecord>,
    votes: PendingTable<PendingVote>,
    executions: PendingTable<PendingExecution>,
    next_seq: u64,
}

impl CacheState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            proposals: self.proposals.snapshot(),
            votes: self.votes.snapshot(),
            executions: self.executions.snapshot(),
            ..CacheSnapshot::default()
        }
    }

    fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        let mut state = Self::default();
        for entry in snapshot.proposals {
            let seq = state.next_seq();
            state.proposals.put(entry.key, entry.record, seq);
        }
        for entry in snapshot.votes {
            let seq = state.next_seq();
            state.votes.put(entry.key, entry.record, seq);
        }
        for entry in snapshot.executions {
            let seq = state.next_seq();
            state.executions.put(entry.key, entry.record, seq);
        }
        state
    }
}

/// Mutable view over the cache for the duration of one transaction.
pub struct PendingTxn<'a> {
    state: &'a mut CacheState,
    events: Vec<CacheEvent>,
}

impl PendingTxn<'_> {
    fn record(&mut self, kind: PendingKind, key: ProposalKey, change: CacheChange) {
        self.events.push(CacheEvent { kind, key, change });
    }

    pub fn put(&mut self, dao_address: &str, proposal_id: &str, record: ProposalRecord) {
        let key = ProposalKey::new(dao_address, proposal_id);
        let seq = self.state.next_seq();
        self.state.proposals.put(key.clone(), record, seq);
        self.record(PendingKind::Proposal, key, CacheChange::Put);
    }

    pub fn get(&self, dao_address: &str, proposal_id: &str) -> Option<ProposalRecord> {
        self.state
            .proposals
            .get(&ProposalKey::new(dao_address, proposal_id))
            .cloned()
    }

    pub fn remove(&mut self, dao_address: &str, proposal_id: &str) -> Option<ProposalRecord> {
        let key = ProposalKey::new(dao_address, proposal_id);
        let removed = self.state.proposals.remove(&key);
        if removed.is_some() {
            self.record(PendingKind::Proposal, key, CacheChange::Removed);
        }
        removed
    }

    pub fn entries_for(&self, dao_address: &str) -> Vec<(String, ProposalRecord)> {
        self.state.proposals.scoped(&normalize_dao(dao_address))
    }

    pub fn put_vote(&mut self, dao_address: &str, proposal_id: &str, vote: PendingVote) {
        let key = ProposalKey::new(dao_address, proposal_id);
        let seq = self.state.next_seq();
        self.state.votes.put(key.clone(), vote, seq);
        self.record(PendingKind::Vote, key, CacheChange::Put);
    }

    pub fn get_vote(&self, dao_address: &str, proposal_id: &str) -> Option<PendingVote> {
        self.state
            .votes
            .get(&ProposalKey::new(dao_address, proposal_id))
            .cloned()
    }

    pub fn remove_vote(&mut self, dao_address: &str, proposal_id: &str) -> Option<PendingVote> {
        let key = ProposalKey::new(dao_address, proposal_id);
        let removed = self.state.votes.remove(&key);
        if removed.is_some() {
            self.record(PendingKind::Vote, key, CacheChange::Removed);
        }
        removed
    }

    pub fn put_execution(
        &mut self,
        dao_address: &str,
        proposal_id: &str,
        execution: PendingExecution,
    ) {
        let key = ProposalKey::new(dao_address, proposal_id);
        let seq = self.state.next_seq();
        self.state.executions.put(key.clone(), execution, seq);
        self.record(PendingKind::Execution, key, CacheChange::Put);
    }

    pub fn get_execution(&self, dao_address: &str, proposal_id: &str) -> Option<PendingExecution> {
        self.state
            .executions
            .get(&ProposalKey::new(dao_address, proposal_id))
            .cloned()
    }

    pub fn remove_execution(
        &mut self,
        dao_address: &str,
        proposal_id: &str,
    ) -> Option<PendingExecution> {
        let key = ProposalKey::new(dao_address, proposal_id);
        let removed = self.state.executions.remove(&key);
        if removed.is_some() {
            self.record(PendingKind::Execution, key, CacheChange::Removed);
        }
        removed
    }
}

struct Inner {
    state: Mutex<CacheState>,
    events: broadcast::Sender<CacheEvent>,
    mirror: Option<MirrorWriter>,
}

/// Shared handle to the pending-write cache. Clones share the same state.
#[derive(Clone)]
pub struct PendingCache {
    inner: Arc<Inner>,
}

impl Default for PendingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCache {
    /// In-memory only.
    pub fn new() -> Self {
        Self::build(CacheState::default(), None)
    }

    /// Mirrors every change through `mirror`, starting empty.
    pub fn with_mirror(mirror: CacheMirror) -> Self {
        Self::build(CacheState::default(), Some(MirrorWriter::new(mirror)))
    }

    /// Rehydrates from the last mirrored snapshot, then keeps mirroring.
    #[instrument(skip(mirror))]
    pub fn restore(mirror: CacheMirror) -> Result<Self, StoreError> {
        let state = match mirror.load()? {
            Some(snapshot) => {
                let state = CacheState::from_snapshot(snapshot);
                info!(
                    proposals = state.proposals.len(),
                    votes = state.votes.len(),
                    executions = state.executions.len(),
                    "Restored pending cache"
                );
                state
            }
            None => {
                debug!("No pending cache snapshot to restore");
                CacheState::default()
            }
        };
        Ok(Self::build(state, Some(MirrorWriter::new(mirror))))
    }

    fn build(state: CacheState, mirror: Option<MirrorWriter>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                events,
                mirror,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `f` with exclusive access. Changes are announced and handed to the mirror
    /// once the lock is released.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut PendingTxn<'_>) -> R) -> R {
        let (result, events, snapshot) = {
            let mut state = self.lock();
            let mut txn = PendingTxn {
                state: &mut *state,
                events: Vec::new(),
            };
            let result = f(&mut txn);
            let events = txn.events;

            let snapshot = match &self.inner.mirror {
                Some(writer) if !events.is_empty() => Some((writer.next_seq(), state.snapshot())),
                _ => None,
            };
            (result, events, snapshot)
        };

        if let (Some(writer), Some((seq, snapshot))) = (&self.inner.mirror, snapshot) {
            writer.submit(seq, snapshot);
        }
        for event in events {
            // No subscribers is fine.
            let _ = self.inner.events.send(event);
        }
        result
    }

    /// Waits until every change made so far has reached the durable store.
    pub async fn flush(&self) {
        if let Some(writer) = &self.inner.mirror {
            writer.flush().await;
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    pub fn put(&self, dao_address: &str, proposal_id: &str, record: ProposalRecord) {
        self.transaction(|txn| txn.put(dao_address, proposal_id, record));
    }

    pub fn get(&self, dao_address: &str, proposal_id: &str) -> Option<ProposalRecord> {
        self.transaction(|txn| txn.get(dao_address, proposal_id))
    }

    pub fn remove(&self, dao_address: &str, proposal_id: &str) {
        self.transaction(|txn| {
            txn.remove(dao_address, proposal_id);
        });
    }

    pub fn entries_for(&self, dao_address: &str) -> Vec<(String, ProposalRecord)> {
        self.transaction(|txn| txn.entries_for(dao_address))
    }

    pub fn put_vote(&self, dao_address: &str, proposal_id: &str, vote: PendingVote) {
        self.transaction(|txn| txn.put_vote(dao_address, proposal_id, vote));
    }

    pub fn get_vote(&self, dao_address: &str, proposal_id: &str) -> Option<PendingVote> {
        self.transaction(|txn| txn.get_vote(dao_address, proposal_id))
    }

    pub fn remove_vote(&self, dao_address: &str, proposal_id: &str) {
        self.transaction(|txn| {
            txn.remove_vote(dao_address, proposal_id);
        });
    }

    pub fn put_execution(&self, dao_address: &str, proposal_id: &str, execution: PendingExecution) {
        self.transaction(|txn| txn.put_execution(dao_address, proposal_id, execution));
    }

    pub fn get_execution(&self, dao_address: &str, proposal_id: &str) -> Option<PendingExecution> {
        self.transaction(|txn| txn.get_execution(dao_address, proposal_id))
    }

    pub fn remove_execution(&self, dao_address: &str, proposal_id: &str) {
        self.transaction(|txn| {
            txn.remove_execution(dao_address, proposal_id);
        });
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        self.lock().snapshot()
    }

    /// Confirms, augments and merges a fetched list in one transaction.
    pub fn apply_reconciliation(
        &self,
        dao_address: &str,
        plugin: PluginType,
        fetched: Vec<ProposalRecord>,
        table: &VoteOptionTable,
    ) -> Reconciliation {
        self.transaction(|txn| reconcile_list(txn, dao_address, plugin, fetched, table))
    }
}
