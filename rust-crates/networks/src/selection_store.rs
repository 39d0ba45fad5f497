// Key-value persistence for the active network choice.
use anyhow::{
    Context,
    Result,
    bail,
};
use sled::{
    Config,
    Db,
    Tree,
};
use std::{
    path::Path,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
};

pub const SELECTED_NETWORK_KEY: &str = "selected_network";

pub trait SelectionStore {
    /// retrieve the persisted network id, if one was ever written
    fn load(&self) -> Result<Option<String>>;

    /// write or overwrite the persisted network id
    fn save(&self, network_id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct SledSelectionStore {
    tree: Tree,
}

impl SledSelectionStore {
    pub fn new(db: &Db) -> Result<Self> {
        let tree = db
            .open_tree("network_selection")
            .context("open network_selection tree")?;
        Ok(Self { tree })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Config::default()
            .path(path)
            .open()
            .context("open sled database")?;
        Self::new(&db)
    }
}

impl SelectionStore for SledSelectionStore {
    fn load(&self) -> Result<Option<String>> {
        let raw = self
            .tree
            .get(SELECTED_NETWORK_KEY)
            .context("read selected network")?;
        raw.map(|bytes| {
            String::from_utf8(bytes.to_vec()).context("selected network is not valid utf-8")
        })
        .transpose()
    }

    fn save(&self, network_id: &str) -> Result<()> {
        self.tree
            .insert(SELECTED_NETWORK_KEY, network_id.as_bytes())
            .context("write selected network")?;
        self.tree.flush().context("flush selected network")?;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemorySelectionStore {
    selected: Arc<Mutex<Option<String>>>,
    unreadable: Arc<AtomicBool>,
}

impl InMemorySelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selection(network_id: impl Into<String>) -> Self {
        Self {
            selected: Arc::new(Mutex::new(Some(network_id.into()))),
            unreadable: Arc::default(),
        }
    }

    /// While set, every `load` fails the way a damaged database would.
    pub fn set_unreadable(&self, unreadable: bool) {
        self.unreadable.store(unreadable, Ordering::SeqCst);
    }
}

impl SelectionStore for InMemorySelectionStore {
    fn load(&self) -> Result<Option<String>> {
        if self.unreadable.load(Ordering::SeqCst) {
            bail!("network selection store is unreadable");
        }
        let guard = self.selected.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.clone())
    }

    fn save(&self, network_id: &str) -> Result<()> {
        let mut guard = self.selected.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(network_id.to_string());
        Ok(())
    }
}
