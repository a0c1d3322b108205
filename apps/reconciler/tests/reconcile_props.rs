mod common;

use common::{token_proposal, yes_vote};
use proptest::prelude::*;
use reconciler::PendingCache;
use reconciler::augment::VoteOptionTable;
use reconciler::models::{PluginType, ProposalRecord};
use reconciler::pipeline::reconcile_list;
use std::collections::BTreeSet;

const DAO: &str = "0xdao";

fn seeded_cache(pending: &BTreeSet<u8>, voted: &BTreeSet<u8>) -> PendingCache {
    let cache = PendingCache::new();
    for id in pending {
        let id = format!("p{id}");
        cache.put(DAO, &id, token_proposal(DAO, &id, 0, 0));
    }
    for id in voted {
        cache.put_vote(DAO, &format!("p{id}"), yes_vote("0xme", u64::from(*id) + 1));
    }
    cache
}

fn fetched(ids: &BTreeSet<u8>) -> Vec<ProposalRecord> {
    ids.iter()
        .rev()
        .map(|id| token_proposal(DAO, &format!("p{id}"), u64::from(*id), i64::from(*id)))
        .collect()
}

fn run(cache: &PendingCache, records: Vec<ProposalRecord>) -> Vec<ProposalRecord> {
    let table = VoteOptionTable::sdk_default();
    cache
        .transaction(|txn| reconcile_list(txn, DAO, PluginType::TokenVoting, records, &table))
        .merged
}

proptest! {
    /// Reconciling twice against the same source and cache gives the same output.
    #[test]
    fn reconcile_is_idempotent(
        pending in prop::collection::btree_set(0u8..32, 0..8),
        voted in prop::collection::btree_set(0u8..32, 0..8),
        upstream in prop::collection::btree_set(0u8..32, 0..8),
    ) {
        let cache = seeded_cache(&pending, &voted);
        let first = run(&cache, fetched(&upstream));
        let second = run(&cache, fetched(&upstream));
        prop_assert_eq!(first, second);
    }

    /// Confirmed ids leave the cache; the rest surface ahead of the fetched list.
    #[test]
    fn confirmation_and_surfacing(
        pending in prop::collection::btree_set(0u8..32, 0..8),
        upstream in prop::collection::btree_set(0u8..32, 0..8),
    ) {
        let cache = seeded_cache(&pending, &BTreeSet::new());
        let merged = run(&cache, fetched(&upstream));

        for id in &pending {
            let key = format!("p{id}");
            prop_assert_eq!(cache.get(DAO, &key).is_some(), !upstream.contains(id));
        }

        let unconfirmed = pending.difference(&upstream).count();
        prop_assert_eq!(merged.len(), unconfirmed + upstream.len());

        let merged_ids: BTreeSet<_> = merged.iter().map(|r| r.id.clone()).collect();
        prop_assert_eq!(merged_ids.len(), merged.len());

        let tail: Vec<_> = merged[unconfirmed..].iter().map(|r| r.id.clone()).collect();
        let expected: Vec<_> = fetched(&upstream).into_iter().map(|r| r.id).collect();
        prop_assert_eq!(tail, expected);
    }
}
