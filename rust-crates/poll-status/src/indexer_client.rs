use crate::{
    sources::IndexedQuerySource,
    types::{
        Address,
        PollId,
    },
};
use anyhow::{
    Context,
    Result,
    anyhow,
    bail,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Value,
    json,
};
use std::collections::{
    BTreeSet,
    HashMap,
};
use tracing::debug;

/// GraphQL client for the secondary index. The endpoint comes from the active network
/// profile on every call, so one client serves every network.
#[derive(Clone)]
pub struct IndexerClient {
    http: reqwest::Client,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Entity {
    Voted,
    RewardClaimed,
}

impl Entity {
    fn name(self) -> &'static str {
        match self {
            Entity::Voted => "Voted",
            Entity::RewardClaimed => "RewardClaimed",
        }
    }

    fn address_field(self) -> &'static str {
        match self {
            Entity::Voted => "voter",
            Entity::RewardClaimed => "claimer",
        }
    }

    fn membership_query(self) -> String {
        format!(
            "query PollMembership($contract: String!, $account: String!) {{ \
             {entity}(where: {{contract: {{_eq: $contract}}, {field}: {{_eq: $account}}}}) \
             {{ pollId }} }}",
            entity = self.name(),
            field = self.address_field(),
        )
    }

    fn single_poll_query(self) -> String {
        format!(
            "query PollParticipation($contract: String!, $account: String!, $pollId: numeric!) {{ \
             {entity}(where: {{contract: {{_eq: $contract}}, {field}: {{_eq: $account}}, \
             pollId: {{_eq: $pollId}}}}, limit: 1) {{ pollId }} }}",
            entity = self.name(),
            field = self.address_field(),
        )
    }
}

#[derive(Serialize)]
struct GraphQlRequest {
    query: String,
    variables: Value,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<HashMap<String, Vec<PollRowDto>>>,
    #[serde(default)]
    errors: Vec<GraphQlErrorDto>,
}

#[derive(Deserialize)]
struct GraphQlErrorDto {
    message: String,
}

#[derive(Deserialize)]
struct PollRowDto {
    #[serde(rename = "pollId")]
    poll_id: PollIdDto,
}

/// Indexers disagree on whether big integers travel as numbers or strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum PollIdDto {
    Number(u64),
    Text(String),
}

impl TryFrom<PollIdDto> for PollId {
    type Error = anyhow::Error;

    fn try_from(dto: PollIdDto) -> Result<Self> {
        match dto {
            PollIdDto::Number(id) => Ok(PollId(id)),
            PollIdDto::Text(raw) => raw
                .parse()
                .with_context(|| format!("invalid poll id {raw:?} in index payload")),
        }
    }
}

impl IndexerClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client for indexer")?;
        Ok(Self { http })
    }

    async fn fetch_rows(
        &self,
        index_endpoint: &str,
        entity: Entity,
        query: String,
        variables: Value,
    ) -> Result<Vec<PollId>> {
        let request = GraphQlRequest { query, variables };
        let res = self
            .http
            .post(index_endpoint)
            .json(&request)
            .send()
            .await
            .context("indexer request failed")?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .context("failed to read indexer response body")?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            bail!(
                "indexer responded with {status} when querying {}: {body}",
                entity.name()
            );
        }
        let response: GraphQlResponse = serde_json::from_slice(&bytes)
            .context("invalid indexer payload")?;
        if !response.errors.is_empty() {
            let messages: Vec<_> = response
                .errors
                .into_iter()
                .map(|err| err.message)
                .collect();
            bail!("indexer rejected {} query: {}", entity.name(), messages.join("; "));
        }
        let rows = response
            .data
            .and_then(|mut data| data.remove(entity.name()))
            .ok_or_else(|| anyhow!("indexer payload is missing {}", entity.name()))?;
        rows.into_iter()
            .map(|row| PollId::try_from(row.poll_id))
            .collect()
    }

    async fn membership(
        &self,
        index_endpoint: &str,
        entity: Entity,
        contract: &str,
        address: &Address,
    ) -> Result<BTreeSet<PollId>> {
        let variables = json!({
            "contract": contract.to_lowercase(),
            "account": address.as_str(),
        });
        let polls: BTreeSet<PollId> = self
            .fetch_rows(index_endpoint, entity, entity.membership_query(), variables)
            .await?
            .into_iter()
            .collect();
        debug!(entity = entity.name(), %address, count = polls.len(), "index membership fetched");
        Ok(polls)
    }

    async fn participated(
        &self,
        index_endpoint: &str,
        entity: Entity,
        contract: &str,
        poll: PollId,
        address: &Address,
    ) -> Result<bool> {
        let variables = json!({
            "contract": contract.to_lowercase(),
            "account": address.as_str(),
            "pollId": poll.to_string(),
        });
        let rows = self
            .fetch_rows(index_endpoint, entity, entity.single_poll_query(), variables)
            .await?;
        Ok(!rows.is_empty())
    }
}

impl IndexedQuerySource for IndexerClient {
    async fn query_voted_polls(
        &self,
        index_endpoint: &str,
        contract: &str,
        address: &Address,
    ) -> Result<BTreeSet<PollId>> {
        self.membership(index_endpoint, Entity::Voted, contract, address)
            .await
    }

    async fn query_claimed_polls(
        &self,
        index_endpoint: &str,
        contract: &str,
        address: &Address,
    ) -> Result<BTreeSet<PollId>> {
        self.membership(index_endpoint, Entity::RewardClaimed, contract, address)
            .await
    }

    async fn query_has_voted(
        &self,
        index_endpoint: &str,
        contract: &str,
        poll: PollId,
        address: &Address,
    ) -> Result<bool> {
        self.participated(index_endpoint, Entity::Voted, contract, poll, address)
            .await
    }

    async fn query_has_claimed(
        &self,
        index_endpoint: &str,
        contract: &str,
        poll: PollId,
        address: &Address,
    ) -> Result<bool> {
        self.participated(index_endpoint, Entity::RewardClaimed, contract, poll, address)
            .await
    }
}
