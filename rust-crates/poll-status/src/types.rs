use serde::Serialize;
use std::{
    collections::BTreeSet,
    fmt,
    str::FromStr,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(transparent)]
pub struct PollId(pub u64);

impl From<u64> for PollId {
    fn from(value: u64) -> Self {
        PollId(value)
    }
}

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PollId {
    type Err = std::num::ParseIntError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        raw.trim().parse().map(PollId)
    }
}

/// An on-chain account. Always held lowercased so that comparisons and cache keys do
/// not depend on how a wallet or node chose to case the hex.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// `None` for blank input.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Address(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum QueryKind {
    UserPollStatus,
    HasVoted,
    HasClaimed,
}

/// Complete vote/claim membership for one address under one network and contract.
/// Claims are not required to be a subset of votes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct UserPollStatus {
    pub voted_polls: BTreeSet<PollId>,
    pub claimed_polls: BTreeSet<PollId>,
}

impl UserPollStatus {
    pub fn new(
        voted_polls: impl IntoIterator<Item = PollId>,
        claimed_polls: impl IntoIterator<Item = PollId>,
    ) -> Self {
        Self {
            voted_polls: voted_polls.into_iter().collect(),
            claimed_polls: claimed_polls.into_iter().collect(),
        }
    }

    pub fn has_voted(&self, poll: PollId) -> bool {
        self.voted_polls.contains(&poll)
    }

    pub fn has_claimed(&self, poll: PollId) -> bool {
        self.claimed_polls.contains(&poll)
    }

    pub fn claims_without_vote(&self) -> impl Iterator<Item = &PollId> {
        self.claimed_polls.difference(&self.voted_polls)
    }
}
