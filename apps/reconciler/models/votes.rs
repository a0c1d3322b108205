use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw vote value as submitted by a wallet (`abstain = 1, yes = 2, no = 3, approve = 4`
/// in the SDK numbering). Translated to a tally bucket by a `VoteOptionTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteValue(pub u8);

impl VoteValue {
    pub const ABSTAIN: VoteValue = VoteValue(1);
    pub const YES: VoteValue = VoteValue(2);
    pub const NO: VoteValue = VoteValue(3);
    pub const APPROVE: VoteValue = VoteValue(4);
}

impl fmt::Display for VoteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A vote the current session submitted but the indexer has not counted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingVote {
    pub voter: String,
    pub vote: VoteValue,
    /// Only meaningful for token-weighted tallies.
    #[serde(with = "super::big_number::optional", default)]
    pub weight: Option<U256>,
}

/// An execution transaction submitted locally and not yet indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingExecution {
    pub executed_at: i64,
}

/// `(daoAddress, proposalId)`. DAO addresses are normalized to lowercase so lookups
/// are case-insensitive; proposal ids are opaque and compared as given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "KeyParts")]
pub struct ProposalKey {
    dao_address: String,
    proposal_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyParts {
    dao_address: String,
    proposal_id: String,
}

impl From<KeyParts> for ProposalKey {
    fn from(parts: KeyParts) -> Self {
        Self::new(&parts.dao_address, &parts.proposal_id)
    }
}

impl ProposalKey {
    pub fn new(dao_address: &str, proposal_id: &str) -> Self {
        Self {
            dao_address: normalize_dao(dao_address),
            proposal_id: proposal_id.to_string(),
        }
    }

    pub fn dao_address(&self) -> &str {
        &self.dao_address
    }

    pub fn proposal_id(&self) -> &str {
        &self.proposal_id
    }
}

impl fmt::Display for ProposalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dao_address, self.proposal_id)
    }
}

pub fn normalize_dao(dao_address: &str) -> String {
    dao_address.trim().to_ascii_lowercase()
}
