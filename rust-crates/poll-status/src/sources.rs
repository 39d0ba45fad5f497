use crate::{
    feature_gate::FeatureGate,
    types::{
        Address,
        PollId,
        QueryKind,
    },
};
use anyhow::Result;
use std::{
    collections::BTreeSet,
    fmt,
};

/// Batched, eventually consistent reads against the secondary index.
pub trait IndexedQuerySource {
    /// every poll `address` has voted in
    fn query_voted_polls(
        &self,
        index_endpoint: &str,
        contract: &str,
        address: &Address,
    ) -> impl Future<Output = Result<BTreeSet<PollId>>> + Send;

    /// every poll `address` has claimed a reward from
    fn query_claimed_polls(
        &self,
        index_endpoint: &str,
        contract: &str,
        address: &Address,
    ) -> impl Future<Output = Result<BTreeSet<PollId>>> + Send;

    fn query_has_voted(
        &self,
        index_endpoint: &str,
        contract: &str,
        poll: PollId,
        address: &Address,
    ) -> impl Future<Output = Result<bool>> + Send;

    fn query_has_claimed(
        &self,
        index_endpoint: &str,
        contract: &str,
        poll: PollId,
        address: &Address,
    ) -> impl Future<Output = Result<bool>> + Send;
}

/// Authoritative reads of current chain state.
pub trait LedgerReadSource {
    fn read_has_voted(
        &self,
        rpc_endpoint: &str,
        contract: &str,
        poll: PollId,
        address: &Address,
    ) -> impl Future<Output = Result<bool>> + Send;

    fn read_has_claimed(
        &self,
        rpc_endpoint: &str,
        contract: &str,
        poll: PollId,
        address: &Address,
    ) -> impl Future<Output = Result<bool>> + Send;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    Indexed,
    Ledger,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::Indexed => "indexed",
            Backend::Ledger => "ledger",
        };
        write!(f, "{name}")
    }
}

/// The ledger has no batch read, so batch status is only available through the index.
/// `None` means the query is answered with its default value and no source is asked.
pub fn select_backend(gate: FeatureGate, kind: QueryKind) -> Option<Backend> {
    match (gate.is_enabled(), kind) {
        (true, _) => Some(Backend::Indexed),
        (false, QueryKind::HasVoted | QueryKind::HasClaimed) => Some(Backend::Ledger),
        (false, QueryKind::UserPollStatus) => None,
    }
}
