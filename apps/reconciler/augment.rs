//! Folding locally submitted actions into proposal records.
//!
//! Each function returns a new record and leaves its input alone. Vote augmentation
//! only ever touches `result`; execution augmentation only touches `status`, so the two
//! compose in either order.

use crate::models::{
    PendingExecution, PendingVote, ProposalRecord, ProposalStatus, VoteOption, VoteValue,
};
use alloy::primitives::U256;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AugmentError {
    #[error("vote value {0} has no tally bucket")]
    UnmappedVoteOption(VoteValue),
    #[error("tally bucket '{option}' would overflow")]
    TallyOverflow { option: VoteOption },
}

/// Translation from raw vote values to tally buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOptionTable {
    options: HashMap<VoteValue, VoteOption>,
}

impl VoteOptionTable {
    pub fn new(options: impl IntoIterator<Item = (VoteValue, VoteOption)>) -> Self {
        Self {
            options: options.into_iter().collect(),
        }
    }

    /// The numbering wallets submit through the SDK.
    pub fn sdk_default() -> Self {
        Self::new([
            (VoteValue::ABSTAIN, VoteOption::Abstain),
            (VoteValue::YES, VoteOption::Yes),
            (VoteValue::NO, VoteOption::No),
            (VoteValue::APPROVE, VoteOption::Approved),
        ])
    }

    pub fn option_for(&self, vote: VoteValue) -> Result<VoteOption, AugmentError> {
        self.options
            .get(&vote)
            .copied()
            .ok_or(AugmentError::UnmappedVoteOption(vote))
    }
}

impl Default for VoteOptionTable {
    fn default() -> Self {
        Self::sdk_default()
    }
}

/// Returns `record` with `vote` counted in its tally.
///
/// Token-based proposals add the vote weight (a missing weight adds nothing).
/// Approval-based proposals add exactly one, whatever the weight says.
pub fn augment_with_vote(
    record: &ProposalRecord,
    vote: Option<&PendingVote>,
    table: &VoteOptionTable,
) -> Result<ProposalRecord, AugmentError> {
    let Some(vote) = vote else {
        return Ok(record.clone());
    };

    let option = table.option_for(vote.vote)?;
    let amount = if record.is_token_based {
        vote.weight.unwrap_or(U256::ZERO)
    } else {
        U256::from(1u64)
    };

    let mut result = record.result.clone();
    result
        .checked_add(option, amount)
        .ok_or(AugmentError::TallyOverflow { option })?;

    Ok(ProposalRecord {
        result,
        ..record.clone()
    })
}

/// Returns `record` marked executed when an execution is pending for it.
pub fn augment_with_execution(
    record: &ProposalRecord,
    execution: Option<&PendingExecution>,
) -> ProposalRecord {
    match execution {
        Some(_) => ProposalRecord {
            status: ProposalStatus::Executed,
            ..record.clone()
        },
        None => record.clone(),
    }
}
