use crate::deployment::{
    DeploymentRecord,
    DeploymentStore,
};
use anyhow::Result;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::BTreeMap,
    fmt,
    path::Path,
    str::FromStr,
};

pub const DEFAULT_MAINNET_RPC_URL: &str = "https://ethereum-rpc.publicnode.com";
pub const DEFAULT_TESTNET_RPC_URL: &str = "https://ethereum-sepolia-rpc.publicnode.com";
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:8545/";
pub const DEFAULT_INDEX_URL: &str = "http://localhost:8080/v1/graphql";

#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    Mainnet,
    #[default]
    Testnet,
    Local,
}

impl NetworkId {
    pub const ALL: [NetworkId; 3] =
        [NetworkId::Mainnet, NetworkId::Testnet, NetworkId::Local];

    /// Stable identifier used for persistence and on-disk layout.
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkId::Mainnet => "mainnet",
            NetworkId::Testnet => "testnet",
            NetworkId::Local => "local",
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown network id '{0}'")]
pub struct UnknownNetworkId(pub String);

impl FromStr for NetworkId {
    type Err = UnknownNetworkId;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        NetworkId::ALL
            .into_iter()
            .find(|id| id.as_str() == raw.trim())
            .ok_or_else(|| UnknownNetworkId(raw.to_string()))
    }
}

/// Endpoint and deployment configuration for one network. Never mutated once built;
/// a new deployment record produces a new profile.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct NetworkProfile {
    pub id: NetworkId,
    pub display_name: String,
    pub contract_address: Option<String>,
    pub rpc_endpoint: String,
    pub index_endpoint: String,
    pub chain_id: u64,
    pub explorer_url: Option<String>,
}

impl NetworkProfile {
    pub fn builtin(id: NetworkId) -> Self {
        let (display_name, rpc_endpoint, chain_id, explorer_url) = match id {
            NetworkId::Mainnet => (
                "Ethereum Mainnet",
                DEFAULT_MAINNET_RPC_URL,
                1,
                Some("https://etherscan.io"),
            ),
            NetworkId::Testnet => (
                "Sepolia Testnet",
                DEFAULT_TESTNET_RPC_URL,
                11_155_111,
                Some("https://sepolia.etherscan.io"),
            ),
            NetworkId::Local => ("Local Node", DEFAULT_LOCAL_RPC_URL, 31_337, None),
        };
        Self {
            id,
            display_name: display_name.to_string(),
            contract_address: None,
            rpc_endpoint: rpc_endpoint.to_string(),
            index_endpoint: DEFAULT_INDEX_URL.to_string(),
            chain_id,
            explorer_url: explorer_url.map(str::to_string),
        }
    }

    /// Layer a deployment record over this profile. Blank fields in the record leave
    /// the profile untouched.
    pub fn with_deployment(self, record: &DeploymentRecord) -> Self {
        let non_blank = |raw: &str| {
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };
        Self {
            contract_address: non_blank(&record.contract_address)
                .map(|address| address.to_lowercase())
                .or(self.contract_address),
            rpc_endpoint: record
                .rpc_endpoint
                .as_deref()
                .and_then(non_blank)
                .unwrap_or(self.rpc_endpoint),
            index_endpoint: record
                .index_endpoint
                .as_deref()
                .and_then(non_blank)
                .unwrap_or(self.index_endpoint),
            ..self
        }
    }

    pub fn has_contract(&self) -> bool {
        self.contract_address.is_some()
    }

    pub fn explorer_address_url(&self, address: &str) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|base| format!("{}/address/{address}", base.trim_end_matches('/')))
    }

    pub fn explorer_tx_url(&self, hash: &str) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|base| format!("{}/tx/{hash}", base.trim_end_matches('/')))
    }
}

/// Build the profile table from the built-in defaults plus whatever deployments have
/// been recorded under `deployments_root`.
pub fn load_profiles(deployments_root: &Path) -> Result<BTreeMap<NetworkId, NetworkProfile>> {
    let mut profiles = BTreeMap::new();
    for id in NetworkId::ALL {
        let store = DeploymentStore::new(deployments_root, id)?;
        let profile = match store.load()? {
            Some(record) => NetworkProfile::builtin(id).with_deployment(&record),
            None => NetworkProfile::builtin(id),
        };
        profiles.insert(id, profile);
    }
    Ok(profiles)
}
