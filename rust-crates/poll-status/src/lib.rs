pub mod error;
pub mod feature_gate;
pub mod identity;
pub mod indexer_client;
pub mod ledger_client;
pub mod sources;
pub mod status_cache;
pub mod types;

#[cfg(test)]
mod test_helpers;

pub use error::QueryError;
pub use feature_gate::FeatureGate;
pub use identity::{
    EmbeddedConnection,
    IdentityResolver,
    NativeConnection,
    ResolvedIdentity,
    SourceKind,
    WalletConnections,
};
pub use indexer_client::IndexerClient;
pub use ledger_client::LedgerClient;
pub use sources::{
    Backend,
    IndexedQuerySource,
    LedgerReadSource,
    select_backend,
};
pub use status_cache::{
    CachePolicy,
    StatusCache,
};
pub use types::{
    Address,
    PollId,
    QueryKind,
    UserPollStatus,
};
