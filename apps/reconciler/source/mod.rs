//! Authoritative proposal data.
//!
//! The pipeline only knows this trait; `SubgraphApi` is the production implementation.

use crate::models::{PluginType, ProposalRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod models;
pub mod subgraph;

pub use subgraph::SubgraphApi;

pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum FetchError {
    #[error("indexer request failed: {0}")]
    Transport(String),
    #[error("indexer returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode indexer response: {0}")]
    Decode(String),
    #[error("indexer rejected query: {0}")]
    GraphQl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortBy {
    #[default]
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalQuery {
    pub dao_address_or_ens: String,
    pub plugin: PluginType,
    pub sort_by: SortBy,
    pub direction: SortDirection,
    pub limit: usize,
    pub skip: usize,
}

impl ProposalQuery {
    /// Newest first, first page.
    pub fn newest(dao_address_or_ens: &str, plugin: PluginType, limit: usize) -> Self {
        Self {
            dao_address_or_ens: dao_address_or_ens.to_string(),
            plugin,
            sort_by: SortBy::CreatedAt,
            direction: SortDirection::Desc,
            limit,
            skip: 0,
        }
    }
}

#[async_trait]
pub trait ProposalSource: Send + Sync {
    async fn get_proposals(&self, query: &ProposalQuery)
    -> Result<Vec<ProposalRecord>, FetchError>;

    async fn get_proposal(
        &self,
        plugin: PluginType,
        proposal_id: &str,
    ) -> Result<Option<ProposalRecord>, FetchError>;
}
