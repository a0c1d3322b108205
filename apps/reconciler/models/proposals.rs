use super::big_number::TaggedBigNumber;
use alloy::primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Lifecycle state of a proposal as reported by the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Draft,
    Pending,
    Active,
    Succeeded,
    Defeated,
    Executed,
}

impl FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "succeeded" => Ok(Self::Succeeded),
            "defeated" => Ok(Self::Defeated),
            "executed" => Ok(Self::Executed),
            other => Err(format!("unknown proposal status '{other}'")),
        }
    }
}

/// Tally bucket a vote lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteOption {
    Yes,
    No,
    Abstain,
    Approved,
}

impl fmt::Display for VoteOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Abstain => "abstain",
            Self::Approved => "approved",
        };
        f.write_str(name)
    }
}

/// Governance plugin a DAO runs its proposals through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginType {
    #[serde(rename = "token-voting")]
    TokenVoting,
    #[serde(rename = "multisig")]
    Multisig,
}

impl PluginType {
    /// Token-voting tallies are weighted by balance; multisig tallies count approvals.
    pub fn is_token_based(self) -> bool {
        matches!(self, Self::TokenVoting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TokenVoting => "token-voting",
            Self::Multisig => "multisig",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "token-voting" | "tokenVoting" => Ok(Self::TokenVoting),
            "multisig" => Ok(Self::Multisig),
            other => Err(format!("unknown plugin type '{other}'")),
        }
    }
}

/// Per-option totals. Missing buckets read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally(BTreeMap<VoteOption, U256>);

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, option: VoteOption) -> U256 {
        self.0.get(&option).copied().unwrap_or(U256::ZERO)
    }

    pub fn set(&mut self, option: VoteOption, value: U256) {
        self.0.insert(option, value);
    }

    /// Adds `amount` to a bucket, refusing to wrap.
    pub fn checked_add(&mut self, option: VoteOption, amount: U256) -> Option<U256> {
        let updated = self.get(option).checked_add(amount)?;
        self.0.insert(option, updated);
        Some(updated)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VoteOption, U256)> + '_ {
        self.0.iter().map(|(option, value)| (*option, *value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(VoteOption, U256)> for Tally {
    fn from_iter<I: IntoIterator<Item = (VoteOption, U256)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for Tally {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(
            self.0
                .iter()
                .map(|(option, value)| (option, TaggedBigNumber::from(*value))),
        )
    }
}

impl<'de> Deserialize<'de> for Tally {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        BTreeMap::<VoteOption, TaggedBigNumber>::deserialize(deserializer)?
            .into_iter()
            .map(|(option, tagged)| {
                U256::try_from(tagged)
                    .map(|value| (option, value))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

/// A proposal as the view layer sees it, whether indexed or still pending locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRecord {
    pub id: String,
    pub dao_address: String,
    #[serde(default)]
    pub result: Tally,
    pub status: ProposalStatus,
    pub is_token_based: bool,
    pub plugin: PluginType,
    #[serde(default)]
    pub creation_date: i64,
    /// Addresses the indexer has already counted.
    #[serde(default)]
    pub voters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ProposalRecord {
    /// Whether this record lives in the DAO named by `dao_address` (any casing).
    pub fn belongs_to(&self, dao_address: &str) -> bool {
        self.dao_address.eq_ignore_ascii_case(dao_address)
    }

    pub fn has_voter(&self, address: &str) -> bool {
        self.voters
            .iter()
            .any(|voter| voter.eq_ignore_ascii_case(address))
    }
}
