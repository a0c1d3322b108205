pub mod big_number;
pub mod proposals;
pub mod votes;

pub use proposals::{PluginType, ProposalRecord, ProposalStatus, Tally, VoteOption};
pub use votes::{PendingExecution, PendingVote, ProposalKey, VoteValue, normalize_dao};
