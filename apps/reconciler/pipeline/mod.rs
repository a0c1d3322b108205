//! Fetch-and-reconcile entry point for the view layer.
//!
//! A call to [`ProposalsPipeline::reconcile`] moves the `(dao, plugin)` slot through
//! Fetching → Reconciling → Settled, or Fetching → Failed. Reconciliation runs against
//! the cache as it is when the fetch *returns*, inside one cache transaction, so writes
//! made while the request was in flight are never lost.
//!
//! The fetch itself runs on its own task. Callers only wait for its outcome, so a
//! caller that goes away (a dropped handler, an aborted task) leaves the fetch and
//! everyone coalesced onto it untouched.

use crate::augment::VoteOptionTable;
use crate::models::{PluginType, ProposalKey, ProposalRecord, normalize_dao};
use crate::pending_cache::PendingCache;
use crate::source::{DEFAULT_PAGE_SIZE, FetchError, ProposalQuery, ProposalSource};
use serde::Serialize;
use slots::{Begin, LeadGuard, RequestSlots};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{Instrument, error, info, instrument};

pub mod reconcile;
mod slots;

pub use reconcile::{Reconciliation, reconcile_detail, reconcile_list};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("reconciliation was cancelled or superseded")]
    Cancelled,
}

/// `{data, error, isLoading}` as handed to the view layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct View<T> {
    pub data: T,
    pub error: Option<FetchError>,
    pub is_loading: bool,
}

pub type ProposalsView = View<Vec<ProposalRecord>>;
pub type ProposalView = View<Option<ProposalRecord>>;

type ListKey = (String, PluginType);
type DetailKey = (ProposalKey, PluginType);

struct PipelineInner {
    source: Arc<dyn ProposalSource>,
    cache: PendingCache,
    table: VoteOptionTable,
    page_size: usize,
    lists: Arc<RequestSlots<ListKey, Vec<ProposalRecord>>>,
    details: Arc<RequestSlots<DetailKey, Option<ProposalRecord>>>,
}

/// Cloneable handle; clones share slots, cache and source.
#[derive(Clone)]
pub struct ProposalsPipeline {
    inner: Arc<PipelineInner>,
}

impl ProposalsPipeline {
    pub fn new(source: Arc<dyn ProposalSource>, cache: PendingCache) -> Self {
        Self::with_options(source, cache, VoteOptionTable::sdk_default(), DEFAULT_PAGE_SIZE)
    }

    pub fn with_options(
        source: Arc<dyn ProposalSource>,
        cache: PendingCache,
        table: VoteOptionTable,
        page_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                source,
                cache,
                table,
                page_size,
                lists: Arc::new(RequestSlots::new()),
                details: Arc::new(RequestSlots::new()),
            }),
        }
    }

    pub fn cache(&self) -> &PendingCache {
        &self.inner.cache
    }

    fn list_key(dao_address: &str, plugin: PluginType) -> ListKey {
        (normalize_dao(dao_address), plugin)
    }

    /// Fetches the authoritative list for `dao_address` and merges pending entries into
    /// it. Concurrent calls for the same DAO and plugin share one fetch.
    #[instrument(skip(self), fields(dao = %dao_address, plugin = %plugin))]
    pub async fn reconcile(
        &self,
        dao_address: &str,
        plugin: PluginType,
    ) -> Result<ProposalsView, ReconcileError> {
        let key = Self::list_key(dao_address, plugin);
        if key.0.is_empty() {
            return Ok(self.inner.lists.view(&key));
        }

        let receiver = match self.inner.lists.begin(&key) {
            Begin::Lead {
                generation,
                receiver,
            } => {
                let guard = LeadGuard::new(self.inner.lists.clone(), key, generation);
                let query = ProposalQuery::newest(dao_address, plugin, self.inner.page_size);
                let inner = self.inner.clone();
                let dao_address = dao_address.to_string();

                tokio::spawn(
                    async move {
                        let fetched = inner.source.get_proposals(&query).await;
                        let result = guard.finish(|| match fetched {
                            Ok(records) => {
                                let reconciliation = inner.cache.apply_reconciliation(
                                    &dao_address,
                                    plugin,
                                    records,
                                    &inner.table,
                                );
                                info!(
                                    confirmed = reconciliation.confirmed.len(),
                                    unconfirmed = reconciliation.unconfirmed.len(),
                                    total = reconciliation.merged.len(),
                                    "Proposal list settled"
                                );
                                Ok(reconciliation.merged)
                            }
                            Err(e) => {
                                error!(error = %e, "Failed to fetch proposals");
                                Err(e)
                            }
                        });

                        if matches!(result, Err(ReconcileError::Cancelled)) {
                            info!("Discarded superseded proposal fetch");
                        }
                    }
                    .in_current_span(),
                );
                receiver
            }
            Begin::Follow(receiver) => receiver,
        };

        receiver.await.unwrap_or(Err(ReconcileError::Cancelled))
    }

    pub fn view(&self, dao_address: &str, plugin: PluginType) -> ProposalsView {
        self.inner.lists.view(&Self::list_key(dao_address, plugin))
    }

    pub fn subscribe(&self, dao_address: &str, plugin: PluginType) -> watch::Receiver<ProposalsView> {
        self.inner
            .lists
            .subscribe(&Self::list_key(dao_address, plugin))
    }

    /// Drops whatever fetch is in flight for this list; its result will be discarded.
    pub fn cancel(&self, dao_address: &str, plugin: PluginType) {
        self.inner.lists.cancel(&Self::list_key(dao_address, plugin));
    }

    /// Registers a view's interest in a list. The in-flight fetch is discarded once the
    /// last scope on the list is dropped and nobody is still waiting on it.
    pub fn scope(&self, dao_address: &str, plugin: PluginType) -> ReconcileScope {
        let key = Self::list_key(dao_address, plugin);
        self.inner.lists.retain(&key);
        ReconcileScope {
            pipeline: self.clone(),
            key,
            dao_address: dao_address.to_string(),
        }
    }

    /// Detail view of one proposal with any pending vote and execution folded in.
    #[instrument(skip(self), fields(dao = %dao_address, plugin = %plugin, proposal_id = %proposal_id))]
    pub async fn reconcile_proposal(
        &self,
        dao_address: &str,
        plugin: PluginType,
        proposal_id: &str,
    ) -> Result<ProposalView, ReconcileError> {
        let key = (ProposalKey::new(dao_address, proposal_id), plugin);
        if key.0.dao_address().is_empty() || proposal_id.is_empty() {
            return Ok(self.inner.details.view(&key));
        }

        let receiver = match self.inner.details.begin(&key) {
            Begin::Lead {
                generation,
                receiver,
            } => {
                let guard = LeadGuard::new(self.inner.details.clone(), key, generation);
                let inner = self.inner.clone();
                let dao_address = dao_address.to_string();
                let proposal_id = proposal_id.to_string();

                tokio::spawn(
                    async move {
                        let fetched = inner.source.get_proposal(plugin, &proposal_id).await;
                        guard.finish(|| match fetched {
                            Ok(record) => Ok(inner.cache.transaction(|txn| {
                                reconcile_detail(txn, &dao_address, &proposal_id, record, &inner.table)
                            })),
                            Err(e) => {
                                error!(error = %e, "Failed to fetch proposal");
                                Err(e)
                            }
                        })
                    }
                    .in_current_span(),
                );
                receiver
            }
            Begin::Follow(receiver) => receiver,
        };

        receiver.await.unwrap_or(Err(ReconcileError::Cancelled))
    }

    pub fn proposal_view(
        &self,
        dao_address: &str,
        plugin: PluginType,
        proposal_id: &str,
    ) -> ProposalView {
        self.inner
            .details
            .view(&(ProposalKey::new(dao_address, proposal_id), plugin))
    }

    pub fn cancel_proposal(&self, dao_address: &str, plugin: PluginType, proposal_id: &str) {
        self.inner
            .details
            .cancel(&(ProposalKey::new(dao_address, proposal_id), plugin));
    }
}

/// Handle owned by a view; releases its interest in the list when dropped.
pub struct ReconcileScope {
    pipeline: ProposalsPipeline,
    key: ListKey,
    dao_address: String,
}

impl ReconcileScope {
    pub async fn reconcile(&self) -> Result<ProposalsView, ReconcileError> {
        self.pipeline.reconcile(&self.dao_address, self.key.1).await
    }

    pub fn view(&self) -> ProposalsView {
        self.pipeline.inner.lists.view(&self.key)
    }
}

impl Drop for ReconcileScope {
    fn drop(&mut self) {
        self.pipeline.inner.lists.release(&self.key);
    }
}
