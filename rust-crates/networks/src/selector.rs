use crate::{
    profile::{
        NetworkId,
        NetworkProfile,
    },
    selection_store::SelectionStore,
};
use anyhow::{
    Context,
    Result,
};
use std::collections::BTreeMap;
use tracing::{
    info,
    warn,
};

/// Tracks which network is active. Holds no cached selection of its own: every read
/// goes back to the store, so another handle writing the store is observed immediately.
pub struct NetworkSelector<S> {
    profiles: BTreeMap<NetworkId, NetworkProfile>,
    store: S,
}

impl<S: SelectionStore> NetworkSelector<S> {
    pub fn new(store: S) -> Self {
        Self::with_profiles(BTreeMap::new(), store)
    }

    /// Any network missing from `profiles` falls back to its built-in profile, so the
    /// table always covers every known id.
    pub fn with_profiles(mut profiles: BTreeMap<NetworkId, NetworkProfile>, store: S) -> Self {
        for id in NetworkId::ALL {
            profiles
                .entry(id)
                .or_insert_with(|| NetworkProfile::builtin(id));
        }
        Self { profiles, store }
    }

    pub fn active_id(&self) -> NetworkId {
        self.try_active_id().unwrap_or_else(|err| {
            warn!(?err, "failed to read network selection, using default");
            NetworkId::default()
        })
    }

    /// Like [`NetworkSelector::active_id`], but a store that cannot be read is an error
    /// instead of the default network. An unrecognised stored value still means default.
    pub fn try_active_id(&self) -> Result<NetworkId> {
        let persisted = self
            .store
            .load()
            .context("read persisted network selection")?;
        let id = match persisted {
            None => NetworkId::default(),
            Some(raw) => match raw.parse::<NetworkId>() {
                Ok(id) if self.profiles.contains_key(&id) => id,
                _ => {
                    warn!(%raw, "persisted network selection is not recognised, using default");
                    NetworkId::default()
                }
            },
        };
        Ok(id)
    }

    pub fn get_active(&self) -> NetworkProfile {
        self.profile(self.active_id())
    }

    pub fn try_get_active(&self) -> Result<NetworkProfile> {
        Ok(self.profile(self.try_active_id()?))
    }

    fn profile(&self, id: NetworkId) -> NetworkProfile {
        self.profiles
            .get(&id)
            .cloned()
            .unwrap_or_else(|| NetworkProfile::builtin(id))
    }

    pub fn get_all(&self) -> &BTreeMap<NetworkId, NetworkProfile> {
        &self.profiles
    }

    /// Persist `network_id` as the active network. Unknown ids are ignored and leave the
    /// stored selection as it was.
    pub fn set_active(&self, network_id: &str) -> Result<()> {
        match network_id.parse::<NetworkId>() {
            Ok(id) if self.profiles.contains_key(&id) => self.select(id),
            _ => {
                warn!(%network_id, "ignoring request to activate unknown network");
                Ok(())
            }
        }
    }

    pub fn select(&self, id: NetworkId) -> Result<()> {
        self.store.save(id.as_str())?;
        info!(network = %id, "active network changed");
        Ok(())
    }
}
