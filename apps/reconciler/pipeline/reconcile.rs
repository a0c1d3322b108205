//! Merging authoritative records with the pending cache.
//!
//! Both functions run inside a single cache transaction so confirmation, augmentation
//! and the resulting mirror write see one consistent snapshot.

use crate::augment::{VoteOptionTable, augment_with_execution, augment_with_vote};
use crate::models::{PendingVote, PluginType, ProposalRecord, ProposalStatus};
use crate::pending_cache::PendingTxn;
use std::collections::HashSet;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub merged: Vec<ProposalRecord>,
    /// Pending ids the authoritative list now contains; removed from the cache.
    pub confirmed: Vec<String>,
    /// Pending ids still missing upstream; surfaced at the top of `merged`.
    pub unconfirmed: Vec<String>,
}

/// Applies a fresh authoritative list for `dao` to the pending cache.
///
/// Every fetched record is taken to belong to `dao` (the source was asked for that
/// DAO, possibly by ENS name). Pending entries for a different plugin are left alone.
pub fn reconcile_list(
    txn: &mut PendingTxn<'_>,
    dao_address: &str,
    plugin: PluginType,
    fetched: Vec<ProposalRecord>,
    table: &VoteOptionTable,
) -> Reconciliation {
    let fetched_ids: HashSet<String> = fetched.iter().map(|record| record.id.clone()).collect();

    let mut confirmed = Vec::new();
    let mut surfaced = Vec::new();
    for (proposal_id, record) in txn.entries_for(dao_address) {
        if record.plugin != plugin {
            continue;
        }
        if fetched_ids.contains(&proposal_id) {
            txn.remove(dao_address, &proposal_id);
            confirmed.push(proposal_id);
        } else {
            surfaced.push((proposal_id, record));
        }
    }

    let mut merged = Vec::with_capacity(surfaced.len() + fetched.len());
    let mut unconfirmed = Vec::with_capacity(surfaced.len());
    // most recent submission first
    for (proposal_id, record) in surfaced.into_iter().rev() {
        let vote = txn.get_vote(dao_address, &proposal_id);
        merged.push(apply_vote(&record, vote.as_ref(), table));
        unconfirmed.push(proposal_id);
    }
    merged.extend(fetched);

    debug!(
        dao = %dao_address,
        %plugin,
        confirmed = confirmed.len(),
        unconfirmed = unconfirmed.len(),
        total = merged.len(),
        "Reconciled proposal list"
    );

    Reconciliation {
        merged,
        confirmed,
        unconfirmed,
    }
}

/// Single-proposal variant: resolves the pending proposal, vote and execution for one
/// key against the authoritative record (if the indexer has it yet).
pub fn reconcile_detail(
    txn: &mut PendingTxn<'_>,
    dao_address: &str,
    proposal_id: &str,
    fetched: Option<ProposalRecord>,
    table: &VoteOptionTable,
) -> Option<ProposalRecord> {
    let mut vote = txn.get_vote(dao_address, proposal_id);
    let mut execution = txn.get_execution(dao_address, proposal_id);

    let fetched = fetched.filter(|record| {
        let matches = record.belongs_to(dao_address);
        if !matches {
            warn!(
                proposal_id,
                requested = dao_address,
                fetched = %record.dao_address,
                "Fetched proposal belongs to another DAO, keeping pending state"
            );
        }
        matches
    });

    let base = match fetched {
        Some(record) => {
            txn.remove(dao_address, proposal_id);

            if vote.as_ref().is_some_and(|v| record.has_voter(&v.voter)) {
                txn.remove_vote(dao_address, proposal_id);
                vote = None;
            }
            if execution.is_some() && record.status == ProposalStatus::Executed {
                txn.remove_execution(dao_address, proposal_id);
                execution = None;
            }
            record
        }
        None => txn.get(dao_address, proposal_id)?,
    };

    let with_vote = apply_vote(&base, vote.as_ref(), table);
    Some(augment_with_execution(&with_vote, execution.as_ref()))
}

/// A vote that cannot be applied is logged and dropped for this record only.
fn apply_vote(
    record: &ProposalRecord,
    vote: Option<&PendingVote>,
    table: &VoteOptionTable,
) -> ProposalRecord {
    match augment_with_vote(record, vote, table) {
        Ok(augmented) => augmented,
        Err(e) => {
            error!(
                proposal_id = %record.id,
                dao = %record.dao_address,
                error = %e,
                "Pending vote could not be applied"
            );
            record.clone()
        }
    }
}
