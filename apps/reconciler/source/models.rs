use super::FetchError;
use crate::models::{PluginType, ProposalRecord, ProposalStatus, Tally, VoteOption};
use alloy::primitives::U256;
use serde::Deserialize;

/// Envelope of every GraphQL response.
#[derive(Deserialize, Debug)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Deserialize, Debug)]
pub struct GraphQlError {
    pub message: String,
}

#[derive(Deserialize, Debug)]
pub struct TokenVotingProposalsData {
    #[serde(rename = "tokenVotingProposals")]
    pub proposals: Vec<TokenVotingProposalRow>,
}

#[derive(Deserialize, Debug)]
pub struct TokenVotingProposalData {
    #[serde(rename = "tokenVotingProposal")]
    pub proposal: Option<TokenVotingProposalRow>,
}

#[derive(Deserialize, Debug)]
pub struct MultisigProposalsData {
    #[serde(rename = "multisigProposals")]
    pub proposals: Vec<MultisigProposalRow>,
}

#[derive(Deserialize, Debug)]
pub struct MultisigProposalData {
    #[serde(rename = "multisigProposal")]
    pub proposal: Option<MultisigProposalRow>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DaoRef {
    pub id: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MemberRef {
    pub address: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct VoterEntry {
    pub voter: MemberRef,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ApproverEntry {
    pub approver: MemberRef,
}

/// Token-voting proposal as indexed. Big integers arrive as decimal strings.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TokenVotingProposalRow {
    pub id: String,
    pub dao: DaoRef,
    pub title: Option<String>,
    pub yes: Option<String>,
    pub no: Option<String>,
    pub abstain: Option<String>,
    pub executed: bool,
    pub created_at: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub voters: Vec<VoterEntry>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MultisigProposalRow {
    pub id: String,
    pub dao: DaoRef,
    pub title: Option<String>,
    pub approvals: u64,
    pub min_approvals: u64,
    pub executed: bool,
    pub created_at: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub approvers: Vec<ApproverEntry>,
}

fn parse_amount(field: &str, raw: Option<&str>) -> Result<U256, FetchError> {
    match raw {
        None => Ok(U256::ZERO),
        Some(raw) => U256::from_str_radix(raw.trim(), 10)
            .map_err(|e| FetchError::Decode(format!("{field} '{raw}' is not an integer: {e}"))),
    }
}

fn parse_timestamp(field: &str, raw: &str) -> Result<i64, FetchError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|e| FetchError::Decode(format!("{field} '{raw}' is not a timestamp: {e}")))
}

/// Status the indexer does not store but the dates and counts imply.
fn derive_status(executed: bool, start: i64, end: i64, passed: bool, now: i64) -> ProposalStatus {
    if executed {
        ProposalStatus::Executed
    } else if now < start {
        ProposalStatus::Pending
    } else if now < end {
        ProposalStatus::Active
    } else if passed {
        ProposalStatus::Succeeded
    } else {
        ProposalStatus::Defeated
    }
}

impl TokenVotingProposalRow {
    pub fn into_record(self, now: i64) -> Result<ProposalRecord, FetchError> {
        let yes = parse_amount("yes", self.yes.as_deref())?;
        let no = parse_amount("no", self.no.as_deref())?;
        let abstain = parse_amount("abstain", self.abstain.as_deref())?;
        let start = parse_timestamp("startDate", &self.start_date)?;
        let end = parse_timestamp("endDate", &self.end_date)?;

        Ok(ProposalRecord {
            status: derive_status(self.executed, start, end, yes > no, now),
            result: [
                (VoteOption::Yes, yes),
                (VoteOption::No, no),
                (VoteOption::Abstain, abstain),
            ]
            .into_iter()
            .collect::<Tally>(),
            creation_date: parse_timestamp("createdAt", &self.created_at)?,
            id: self.id,
            dao_address: self.dao.id,
            is_token_based: true,
            plugin: PluginType::TokenVoting,
            voters: self.voters.into_iter().map(|v| v.voter.address).collect(),
            title: self.title,
        })
    }
}

impl MultisigProposalRow {
    pub fn into_record(self, now: i64) -> Result<ProposalRecord, FetchError> {
        let start = parse_timestamp("startDate", &self.start_date)?;
        let end = parse_timestamp("endDate", &self.end_date)?;
        let passed = self.approvals >= self.min_approvals;

        Ok(ProposalRecord {
            status: derive_status(self.executed, start, end, passed, now),
            result: [(VoteOption::Approved, U256::from(self.approvals))]
                .into_iter()
                .collect::<Tally>(),
            creation_date: parse_timestamp("createdAt", &self.created_at)?,
            id: self.id,
            dao_address: self.dao.id,
            is_token_based: false,
            plugin: PluginType::Multisig,
            voters: self
                .approvers
                .into_iter()
                .map(|a| a.approver.address)
                .collect(),
            title: self.title,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_row(yes: &str, no: &str, executed: bool) -> TokenVotingProposalRow {
        TokenVotingProposalRow {
            id: "0xplugin_0x1".to_string(),
            dao: DaoRef {
                id: "0xdao".to_string(),
            },
            title: Some("Treasury diversification".to_string()),
            yes: Some(yes.to_string()),
            no: Some(no.to_string()),
            abstain: None,
            executed,
            created_at: "100".to_string(),
            start_date: "200".to_string(),
            end_date: "300".to_string(),
            voters: vec![VoterEntry {
                voter: MemberRef {
                    address: "0xvoter".to_string(),
                },
            }],
        }
    }

    #[test]
    fn token_row_keeps_full_precision() {
        let huge = "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        let record = token_row(huge, "1", false).into_record(250).unwrap();
        assert_eq!(record.result.get(VoteOption::Yes), U256::MAX);
        assert_eq!(record.result.get(VoteOption::Abstain), U256::ZERO);
        assert_eq!(record.status, ProposalStatus::Active);
        assert_eq!(record.voters, vec!["0xvoter".to_string()]);
        assert!(record.is_token_based);
    }

    #[test]
    fn status_follows_dates_and_outcome() {
        assert_eq!(
            token_row("1", "0", false).into_record(150).unwrap().status,
            ProposalStatus::Pending
        );
        assert_eq!(
            token_row("5", "1", false).into_record(400).unwrap().status,
            ProposalStatus::Succeeded
        );
        assert_eq!(
            token_row("1", "5", false).into_record(400).unwrap().status,
            ProposalStatus::Defeated
        );
        assert_eq!(
            token_row("1", "5", true).into_record(150).unwrap().status,
            ProposalStatus::Executed
        );
    }

    #[test]
    fn malformed_numbers_are_decode_errors() {
        let err = token_row("12abc", "0", false).into_record(0).unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));

        let mut row = token_row("1", "0", false);
        row.end_date = "soon".to_string();
        assert!(matches!(row.into_record(0), Err(FetchError::Decode(_))));
    }

    #[test]
    fn multisig_row_counts_approvals() {
        let row = MultisigProposalRow {
            id: "0xmultisig_0x2".to_string(),
            dao: DaoRef {
                id: "0xdao".to_string(),
            },
            title: None,
            approvals: 3,
            min_approvals: 2,
            executed: false,
            created_at: "10".to_string(),
            start_date: "10".to_string(),
            end_date: "20".to_string(),
            approvers: vec![],
        };
        let record = row.into_record(30).unwrap();
        assert_eq!(record.result.get(VoteOption::Approved), U256::from(3u64));
        assert_eq!(record.status, ProposalStatus::Succeeded);
        assert!(!record.is_token_based);
        assert_eq!(record.plugin, PluginType::Multisig);
    }
}
