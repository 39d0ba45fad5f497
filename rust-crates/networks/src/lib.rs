pub mod deployment;
pub mod profile;
pub mod selection_store;
pub mod selector;

pub use deployment::{
    DEPLOYMENTS_ROOT,
    DeploymentRecord,
    DeploymentStore,
    ensure_structure,
    record_deployment,
};
pub use profile::{
    NetworkId,
    NetworkProfile,
    UnknownNetworkId,
    load_profiles,
};
pub use selection_store::{
    InMemorySelectionStore,
    SELECTED_NETWORK_KEY,
    SelectionStore,
    SledSelectionStore,
};
pub use selector::NetworkSelector;
