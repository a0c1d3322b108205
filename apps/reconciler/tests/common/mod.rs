#![allow(dead_code)]

use alloy::primitives::U256;
use async_trait::async_trait;
use reconciler::models::{
    PendingVote, PluginType, ProposalRecord, ProposalStatus, Tally, VoteOption, VoteValue,
};
use reconciler::source::{FetchError, ProposalQuery, ProposalSource};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::Notify;

/// In-memory indexer whose answers are set by the test.
///
/// `hold()` parks every fetch until the returned gate is notified, so a test can act
/// while a request is in flight. `started` fires each time a fetch parks.
#[derive(Default)]
pub struct ScriptedSource {
    list: Mutex<Option<Result<Vec<ProposalRecord>, FetchError>>>,
    details: Mutex<HashMap<String, ProposalRecord>>,
    detail_error: Mutex<Option<FetchError>>,
    gate: Mutex<Option<Arc<Notify>>>,
    pub started: Notify,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_list(&self, records: Vec<ProposalRecord>) {
        *self.list.lock().unwrap() = Some(Ok(records));
    }

    pub fn fail_list(&self, err: FetchError) {
        *self.list.lock().unwrap() = Some(Err(err));
    }

    pub fn set_detail(&self, record: ProposalRecord) {
        self.details.lock().unwrap().insert(record.id.clone(), record);
    }

    pub fn fail_detail(&self, err: FetchError) {
        *self.detail_error.lock().unwrap() = Some(err);
    }

    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn release(&self) {
        *self.gate.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn wait_for_gate(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.started.notify_one();
            gate.notified().await;
        }
    }
}

#[async_trait]
impl ProposalSource for ScriptedSource {
    async fn get_proposals(
        &self,
        _query: &ProposalQuery,
    ) -> Result<Vec<ProposalRecord>, FetchError> {
        self.wait_for_gate().await;
        self.list.lock().unwrap().clone().unwrap_or_else(|| Ok(vec![]))
    }

    async fn get_proposal(
        &self,
        _plugin: PluginType,
        proposal_id: &str,
    ) -> Result<Option<ProposalRecord>, FetchError> {
        self.wait_for_gate().await;
        if let Some(err) = self.detail_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.details.lock().unwrap().get(proposal_id).cloned())
    }
}

pub fn token_proposal(dao: &str, id: &str, yes: u64, created: i64) -> ProposalRecord {
    ProposalRecord {
        id: id.to_string(),
        dao_address: dao.to_string(),
        result: [(VoteOption::Yes, U256::from(yes))]
            .into_iter()
            .collect::<Tally>(),
        status: ProposalStatus::Active,
        is_token_based: true,
        plugin: PluginType::TokenVoting,
        creation_date: created,
        voters: vec![],
        title: None,
    }
}

pub fn multisig_proposal(dao: &str, id: &str, approvals: u64) -> ProposalRecord {
    ProposalRecord {
        id: id.to_string(),
        dao_address: dao.to_string(),
        result: [(VoteOption::Approved, U256::from(approvals))]
            .into_iter()
            .collect::<Tally>(),
        status: ProposalStatus::Active,
        is_token_based: false,
        plugin: PluginType::Multisig,
        creation_date: 0,
        voters: vec![],
        title: None,
    }
}

pub fn yes_vote(voter: &str, weight: u64) -> PendingVote {
    PendingVote {
        voter: voter.to_string(),
        vote: VoteValue::YES,
        weight: Some(U256::from(weight)),
    }
}

pub fn ids(records: &[ProposalRecord]) -> Vec<&str> {
    records.iter().map(|record| record.id.as_str()).collect()
}
