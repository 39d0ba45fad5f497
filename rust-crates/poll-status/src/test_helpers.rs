use crate::{
    sources::{
        IndexedQuerySource,
        LedgerReadSource,
    },
    types::{
        Address,
        PollId,
        UserPollStatus,
    },
};
use anyhow::{
    Context,
    Result,
    bail,
};
use std::{
    collections::{
        BTreeSet,
        HashMap,
    },
    sync::{
        Arc,
        Mutex,
        atomic::{
            AtomicBool,
            AtomicUsize,
            Ordering,
        },
    },
};
use tokio::sync::Semaphore;

const RELEASED_PERMITS: usize = 1024;

/// Status answers keyed by contract and address, plus a gate that can hold every query
/// until the test releases it.
struct FakeBackend {
    statuses: Mutex<HashMap<(String, Address), UserPollStatus>>,
    failing: AtomicBool,
    hold: Semaphore,
}

impl FakeBackend {
    fn new(held: bool) -> Self {
        let permits = if held { 0 } else { RELEASED_PERMITS };
        Self {
            statuses: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            hold: Semaphore::new(permits),
        }
    }

    async fn wait(&self) -> Result<()> {
        let _permit = self.hold.acquire().await.context("hold closed")?;
        if self.failing.load(Ordering::SeqCst) {
            bail!("backend offline");
        }
        Ok(())
    }

    fn status(&self, contract: &str, address: &Address) -> UserPollStatus {
        self.statuses
            .lock()
            .unwrap()
            .get(&(contract.to_string(), address.clone()))
            .cloned()
            .unwrap_or_default()
    }

    fn set_status(&self, contract: &str, address: &Address, status: UserPollStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert((contract.to_string(), address.clone()), status);
    }
}

#[derive(Clone)]
pub struct FakeIndexedSource {
    backend: Arc<FakeBackend>,
    voted_calls: Arc<AtomicUsize>,
    claimed_calls: Arc<AtomicUsize>,
    single_calls: Arc<AtomicUsize>,
}

impl FakeIndexedSource {
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Every query blocks until [`FakeIndexedSource::release`] is called.
    pub fn held() -> Self {
        Self::build(true)
    }

    fn build(held: bool) -> Self {
        Self {
            backend: Arc::new(FakeBackend::new(held)),
            voted_calls: Arc::new(AtomicUsize::new(0)),
            claimed_calls: Arc::new(AtomicUsize::new(0)),
            single_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn release(&self) {
        self.backend.hold.add_permits(RELEASED_PERMITS);
    }

    /// Make every later query block until [`FakeIndexedSource::release`].
    pub fn hold(&self) {
        self.backend.hold.forget_permits(RELEASED_PERMITS);
    }

    pub fn set_status(&self, contract: &str, address: &Address, status: UserPollStatus) {
        self.backend.set_status(contract, address, status);
    }

    pub fn set_failing(&self, failing: bool) {
        self.backend.failing.store(failing, Ordering::SeqCst);
    }

    /// (voted, claimed) batch queries issued so far
    pub fn batch_calls(&self) -> (usize, usize) {
        (
            self.voted_calls.load(Ordering::SeqCst),
            self.claimed_calls.load(Ordering::SeqCst),
        )
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        let (voted, claimed) = self.batch_calls();
        voted + claimed + self.single_calls()
    }
}

impl IndexedQuerySource for FakeIndexedSource {
    async fn query_voted_polls(
        &self,
        _index_endpoint: &str,
        contract: &str,
        address: &Address,
    ) -> Result<BTreeSet<PollId>> {
        self.voted_calls.fetch_add(1, Ordering::SeqCst);
        self.backend.wait().await?;
        Ok(self.backend.status(contract, address).voted_polls)
    }

    async fn query_claimed_polls(
        &self,
        _index_endpoint: &str,
        contract: &str,
        address: &Address,
    ) -> Result<BTreeSet<PollId>> {
        self.claimed_calls.fetch_add(1, Ordering::SeqCst);
        self.backend.wait().await?;
        Ok(self.backend.status(contract, address).claimed_polls)
    }

    async fn query_has_voted(
        &self,
        _index_endpoint: &str,
        contract: &str,
        poll: PollId,
        address: &Address,
    ) -> Result<bool> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.backend.wait().await?;
        Ok(self.backend.status(contract, address).has_voted(poll))
    }

    async fn query_has_claimed(
        &self,
        _index_endpoint: &str,
        contract: &str,
        poll: PollId,
        address: &Address,
    ) -> Result<bool> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.backend.wait().await?;
        Ok(self.backend.status(contract, address).has_claimed(poll))
    }
}

#[derive(Clone)]
pub struct FakeLedgerSource {
    backend: Arc<FakeBackend>,
    reads: Arc<AtomicUsize>,
}

impl FakeLedgerSource {
    pub fn new() -> Self {
        Self::build(false)
    }

    pub fn held() -> Self {
        Self::build(true)
    }

    fn build(held: bool) -> Self {
        Self {
            backend: Arc::new(FakeBackend::new(held)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn release(&self) {
        self.backend.hold.add_permits(RELEASED_PERMITS);
    }

    pub fn set_status(&self, contract: &str, address: &Address, status: UserPollStatus) {
        self.backend.set_status(contract, address, status);
    }

    pub fn set_failing(&self, failing: bool) {
        self.backend.failing.store(failing, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl LedgerReadSource for FakeLedgerSource {
    async fn read_has_voted(
        &self,
        _rpc_endpoint: &str,
        contract: &str,
        poll: PollId,
        address: &Address,
    ) -> Result<bool> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.backend.wait().await?;
        Ok(self.backend.status(contract, address).has_voted(poll))
    }

    async fn read_has_claimed(
        &self,
        _rpc_endpoint: &str,
        contract: &str,
        poll: PollId,
        address: &Address,
    ) -> Result<bool> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.backend.wait().await?;
        Ok(self.backend.status(contract, address).has_claimed(poll))
    }
}
