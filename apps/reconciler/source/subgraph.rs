use super::{
    FetchError, ProposalQuery, ProposalSource, SortDirection,
    models::{
        GraphQlResponse, MultisigProposalData, MultisigProposalsData, TokenVotingProposalData,
        TokenVotingProposalsData,
    },
};
use crate::models::{PluginType, ProposalRecord, normalize_dao};
use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

const MAX_RETRIES: u32 = 3;

const TOKEN_VOTING_FIELDS: &str = r#"
    id
    dao { id }
    title
    yes
    no
    abstain
    executed
    createdAt
    startDate
    endDate
    voters { voter { address } }
"#;

const MULTISIG_FIELDS: &str = r#"
    id
    dao { id }
    title
    approvals
    minApprovals
    executed
    createdAt
    startDate
    endDate
    approvers { approver { address } }
"#;

/// GraphQL client for the governance subgraph.
pub struct SubgraphApi {
    client: ClientWithMiddleware,
    endpoint: String,
}

impl SubgraphApi {
    pub fn new_with_endpoint(endpoint: String) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
        let client = ClientBuilder::new(Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn list_query(plugin: PluginType, direction: SortDirection) -> String {
        let (collection, fields) = match plugin {
            PluginType::TokenVoting => ("tokenVotingProposals", TOKEN_VOTING_FIELDS),
            PluginType::Multisig => ("multisigProposals", MULTISIG_FIELDS),
        };
        let direction = match direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        };
        format!(
            r#"query Proposals($dao: String!, $first: Int!, $skip: Int!) {{
                {collection}(
                    where: {{ dao: $dao }},
                    first: $first,
                    skip: $skip,
                    orderBy: createdAt,
                    orderDirection: {direction}
                ) {{ {fields} }}
            }}"#
        )
    }

    fn single_query(plugin: PluginType) -> String {
        let (entity, fields) = match plugin {
            PluginType::TokenVoting => ("tokenVotingProposal", TOKEN_VOTING_FIELDS),
            PluginType::Multisig => ("multisigProposal", MULTISIG_FIELDS),
        };
        format!(
            r#"query Proposal($id: ID!) {{
                {entity}(id: $id) {{ {fields} }}
            }}"#
        )
    }

    /// Execute a GraphQL query
    async fn fetch_graphql<T>(&self, query: &str, variables: Value) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        let body = serde_json::to_string(&json!({"query": query, "variables": variables}))
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("User-Agent", "proposals-reconciler/0.1")
            .body(body)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: GraphQlResponse<T> =
            serde_json::from_str(&text).map_err(|e| FetchError::Decode(e.to_string()))?;

        if !parsed.errors.is_empty() {
            let messages: Vec<_> = parsed.errors.into_iter().map(|e| e.message).collect();
            return Err(FetchError::GraphQl(messages.join("; ")));
        }

        parsed
            .data
            .ok_or_else(|| FetchError::Decode("response carried no data".to_string()))
    }
}

#[async_trait]
impl ProposalSource for SubgraphApi {
    #[instrument(skip(self), fields(dao = %query.dao_address_or_ens, plugin = %query.plugin))]
    async fn get_proposals(
        &self,
        query: &ProposalQuery,
    ) -> Result<Vec<ProposalRecord>, FetchError> {
        let graphql = Self::list_query(query.plugin, query.direction);
        let variables = json!({
            "dao": normalize_dao(&query.dao_address_or_ens),
            "first": query.limit,
            "skip": query.skip,
        });
        let now = chrono::Utc::now().timestamp();

        debug!(limit = query.limit, skip = query.skip, "Fetching proposals");

        let records = match query.plugin {
            PluginType::TokenVoting => self
                .fetch_graphql::<TokenVotingProposalsData>(&graphql, variables)
                .await?
                .proposals
                .into_iter()
                .map(|row| row.into_record(now))
                .collect::<Result<Vec<_>, _>>()?,
            PluginType::Multisig => self
                .fetch_graphql::<MultisigProposalsData>(&graphql, variables)
                .await?
                .proposals
                .into_iter()
                .map(|row| row.into_record(now))
                .collect::<Result<Vec<_>, _>>()?,
        };

        info!(count = records.len(), "Fetched proposals");
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn get_proposal(
        &self,
        plugin: PluginType,
        proposal_id: &str,
    ) -> Result<Option<ProposalRecord>, FetchError> {
        let graphql = Self::single_query(plugin);
        let variables = json!({ "id": proposal_id });
        let now = chrono::Utc::now().timestamp();

        match plugin {
            PluginType::TokenVoting => self
                .fetch_graphql::<TokenVotingProposalData>(&graphql, variables)
                .await?
                .proposal
                .map(|row| row.into_record(now))
                .transpose(),
            PluginType::Multisig => self
                .fetch_graphql::<MultisigProposalData>(&graphql, variables)
                .await?
                .proposal
                .map(|row| row.into_record(now))
                .transpose(),
        }
    }
}
