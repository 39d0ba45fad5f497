use crate::{
    error::QueryError,
    feature_gate::FeatureGate,
    identity::IdentityResolver,
    sources::{
        Backend,
        IndexedQuerySource,
        LedgerReadSource,
        select_backend,
    },
    types::{
        Address,
        PollId,
        QueryKind,
        UserPollStatus,
    },
};
use futures::{
    FutureExt,
    future::{
        BoxFuture,
        Shared,
    },
};
use networks::{
    NetworkId,
    NetworkSelector,
    SelectionStore,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::{
    debug,
    warn,
};


pub const STALE_AFTER: Duration = Duration::from_secs(60);
pub const EVICT_AFTER: Duration = Duration::from_secs(120);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CachePolicy {
    /// entries younger than this are served without a refetch
    pub stale_after: Duration,
    /// entries this old are dropped instead of served
    pub evict_after: Duration,
}

impl CachePolicy {
    pub const INDEXED: CachePolicy = CachePolicy {
        stale_after: STALE_AFTER,
        evict_after: EVICT_AFTER,
    };
    pub const UNCACHED: CachePolicy = CachePolicy {
        stale_after: Duration::ZERO,
        evict_after: Duration::ZERO,
    };

    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::Indexed => CachePolicy::INDEXED,
            Backend::Ledger => CachePolicy::UNCACHED,
        }
    }

    fn retains(&self) -> bool {
        !self.evict_after.is_zero()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CacheKey {
    pub kind: QueryKind,
    pub address: Address,
    pub network: NetworkId,
    pub contract: String,
    pub poll: Option<PollId>,
}

#[derive(Clone, Debug)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: Instant,
}

impl<T> CacheEntry<T> {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }

    pub fn is_fresh(&self, now: Instant, policy: CachePolicy) -> bool {
        self.age(now) < policy.stale_after
    }

    pub fn is_expired(&self, now: Instant, policy: CachePolicy) -> bool {
        self.age(now) >= policy.evict_after
    }
}

#[derive(Clone, Debug)]
struct QueryContext {
    network: NetworkId,
    contract: String,
    rpc_endpoint: String,
    index_endpoint: String,
}

impl QueryContext {
    fn key(&self, kind: QueryKind, address: &Address, poll: Option<PollId>) -> CacheKey {
        CacheKey {
            kind,
            address: address.clone(),
            network: self.network,
            contract: self.contract.clone(),
            poll,
        }
    }
}

/// Whether a fetch was started for the connected user or for an address the caller
/// named explicitly. Only the former is invalidated by an identity change.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Origin {
    CurrentIdentity,
    Explicit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PollFlag {
    Voted,
    Claimed,
}

impl PollFlag {
    fn kind(self) -> QueryKind {
        match self {
            PollFlag::Voted => QueryKind::HasVoted,
            PollFlag::Claimed => QueryKind::HasClaimed,
        }
    }

    fn read(self, status: &UserPollStatus, poll: PollId) -> bool {
        match self {
            PollFlag::Voted => status.has_voted(poll),
            PollFlag::Claimed => status.has_claimed(poll),
        }
    }
}

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, QueryError>>>;

struct Slots<T> {
    entries: HashMap<CacheKey, CacheEntry<T>>,
    in_flight: HashMap<CacheKey, SharedFetch<T>>,
}

impl<T: Clone> Slots<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Cached value plus whether it is still fresh. Expired entries are dropped here.
    fn lookup(
        &mut self,
        key: &CacheKey,
        now: Instant,
        policy: CachePolicy,
    ) -> Option<(T, bool)> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(now, policy) {
            self.entries.remove(key);
            return None;
        }
        Some((entry.value.clone(), entry.is_fresh(now, policy)))
    }

    fn evict_expired(&mut self, now: Instant, policy: CachePolicy) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.is_expired(now, policy));
        before - self.entries.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner<I, L, S> {
    indexed: I,
    ledger: L,
    selector: Arc<NetworkSelector<S>>,
    identity: IdentityResolver,
    gate: FeatureGate,
    statuses: Mutex<Slots<UserPollStatus>>,
    flags: Mutex<Slots<bool>>,
}

/// Vote and claim status for poll participants, served from the secondary index with
/// time-bounded caching or read straight from the ledger, depending on the feature gate.
///
/// Cache keys carry the network and contract, so switching networks never serves data
/// fetched under the previous one. Concurrent requests for the same key share a single
/// fetch, and a fetch whose network, contract or identity changed while it was running
/// is returned to its callers but never written to the cache.
pub struct StatusCache<I, L, S> {
    inner: Arc<Inner<I, L, S>>,
}

impl<I, L, S> Clone for StatusCache<I, L, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, L, S> StatusCache<I, L, S>
where
    I: IndexedQuerySource + Send + Sync + 'static,
    L: LedgerReadSource + Send + Sync + 'static,
    S: SelectionStore + Send + Sync + 'static,
{
    pub fn new(
        indexed: I,
        ledger: L,
        selector: Arc<NetworkSelector<S>>,
        identity: IdentityResolver,
        gate: FeatureGate,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                indexed,
                ledger,
                selector,
                identity,
                gate,
                statuses: Mutex::new(Slots::new()),
                flags: Mutex::new(Slots::new()),
            }),
        }
    }

    pub fn feature_gate(&self) -> FeatureGate {
        self.inner.gate
    }

    pub fn selector(&self) -> &NetworkSelector<S> {
        &self.inner.selector
    }

    pub fn identity(&self) -> &IdentityResolver {
        &self.inner.identity
    }

    /// Both membership sets for `address` in one call.
    pub async fn get_user_poll_status(
        &self,
        address: Option<&Address>,
    ) -> Result<UserPollStatus, QueryError> {
        self.inner.user_poll_status(address, false).await
    }

    /// Status for whoever the identity resolver currently reports.
    pub async fn current_user_status(&self) -> Result<UserPollStatus, QueryError> {
        let identity = self.inner.identity.current();
        self.get_user_poll_status(identity.address.as_ref()).await
    }

    /// Refetch regardless of freshness, e.g. when the user returns to the app.
    pub async fn revalidate_user_poll_status(
        &self,
        address: Option<&Address>,
    ) -> Result<UserPollStatus, QueryError> {
        self.inner.user_poll_status(address, true).await
    }

    pub async fn has_voted(
        &self,
        poll: PollId,
        address: Option<&Address>,
    ) -> Result<bool, QueryError> {
        self.inner.poll_flag(PollFlag::Voted, poll, address).await
    }

    pub async fn has_claimed(
        &self,
        poll: PollId,
        address: Option<&Address>,
    ) -> Result<bool, QueryError> {
        self.inner.poll_flag(PollFlag::Claimed, poll, address).await
    }

    /// Whatever is cached right now, or the empty placeholder. Never fetches.
    pub fn peek_user_poll_status(&self, address: Option<&Address>) -> UserPollStatus {
        self.inner.peek_status(address).unwrap_or_default()
    }

    pub fn peek_has_voted(&self, poll: PollId, address: Option<&Address>) -> bool {
        self.inner.peek_flag(PollFlag::Voted, poll, address)
    }

    pub fn peek_has_claimed(&self, poll: PollId, address: Option<&Address>) -> bool {
        self.inner.peek_flag(PollFlag::Claimed, poll, address)
    }

    /// Drop every entry past its retention window. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let statuses = lock(&self.inner.statuses).evict_expired(now, CachePolicy::INDEXED);
        let flags = lock(&self.inner.flags).evict_expired(now, CachePolicy::INDEXED);
        statuses + flags
    }
}

impl<I, L, S> Inner<I, L, S>
where
    I: IndexedQuerySource + Send + Sync + 'static,
    L: LedgerReadSource + Send + Sync + 'static,
    S: SelectionStore + Send + Sync + 'static,
{
    /// `None` while the active network is unknown or has no contract deployment.
    fn context(&self) -> Option<QueryContext> {
        let profile = match self.selector.try_get_active() {
            Ok(profile) => profile,
            Err(err) => {
                warn!(?err, "active network unknown, serving defaults");
                return None;
            }
        };
        let contract = profile.contract_address?.to_lowercase();
        Some(QueryContext {
            network: profile.id,
            contract,
            rpc_endpoint: profile.rpc_endpoint,
            index_endpoint: profile.index_endpoint,
        })
    }

    fn origin_of(&self, address: &Address) -> Origin {
        if self.identity.current().address.as_ref() == Some(address) {
            Origin::CurrentIdentity
        } else {
            Origin::Explicit
        }
    }

    fn still_current(&self, key: &CacheKey, origin: Origin) -> bool {
        let Some(context) = self.context() else {
            return false;
        };
        if context.network != key.network || context.contract != key.contract {
            return false;
        }
        match origin {
            Origin::CurrentIdentity => {
                self.identity.current().address.as_ref() == Some(&key.address)
            }
            Origin::Explicit => true,
        }
    }

    fn commit<T: Clone>(
        &self,
        slots: &Mutex<Slots<T>>,
        key: &CacheKey,
        origin: Origin,
        policy: CachePolicy,
        result: &Result<T, QueryError>,
    ) {
        let current = self.still_current(key, origin);
        let mut slots = lock(slots);
        slots.in_flight.remove(key);
        let Ok(value) = result else {
            return;
        };
        if !policy.retains() {
            return;
        }
        if !current {
            debug!(?key, "context changed while fetching, discarding result");
            return;
        }
        let now = Instant::now();
        slots.evict_expired(now, policy);
        slots.entries.insert(
            key.clone(),
            CacheEntry {
                value: value.clone(),
                fetched_at: now,
            },
        );
    }

    async fn user_poll_status(
        self: &Arc<Self>,
        address: Option<&Address>,
        force: bool,
    ) -> Result<UserPollStatus, QueryError> {
        let Some(address) = address else {
            return Ok(UserPollStatus::default());
        };
        let Some(context) = self.context() else {
            debug!(
                %address,
                "no resolvable contract on the active network, serving empty status"
            );
            return Ok(UserPollStatus::default());
        };
        match select_backend(self.gate, QueryKind::UserPollStatus) {
            Some(Backend::Indexed) => {}
            Some(Backend::Ledger) | None => {
                return Ok(UserPollStatus::default());
            }
        }

        let key = context.key(QueryKind::UserPollStatus, address, None);
        if !force {
            let cached =
                lock(&self.statuses).lookup(&key, Instant::now(), CachePolicy::INDEXED);
            if let Some((status, fresh)) = cached {
                debug!(?key, fresh, "status served from cache");
                if !fresh {
                    self.revalidate_status_in_background(key, context, address.clone());
                }
                return Ok(status);
            }
        }
        self.fetch_status(key, context, address.clone()).await
    }

    /// Start (or join) the batch fetch for `key`.
    fn fetch_status(
        self: &Arc<Self>,
        key: CacheKey,
        context: QueryContext,
        address: Address,
    ) -> SharedFetch<UserPollStatus> {
        let mut slots = lock(&self.statuses);
        if let Some(in_flight) = slots.in_flight.get(&key) {
            debug!(?key, "joining in-flight status fetch");
            return in_flight.clone();
        }

        let inner = Arc::clone(self);
        let origin = self.origin_of(&address);
        let commit_key = key.clone();
        let fetch = async move {
            let result = inner.load_status(&context, &address).await;
            inner.commit(
                &inner.statuses,
                &commit_key,
                origin,
                CachePolicy::INDEXED,
                &result,
            );
            result
        }
        .boxed()
        .shared();
        slots.in_flight.insert(key, fetch.clone());
        fetch
    }

    fn revalidate_status_in_background(
        self: &Arc<Self>,
        key: CacheKey,
        context: QueryContext,
        address: Address,
    ) {
        let fetch = self.fetch_status(key, context, address);
        tokio::spawn(async move {
            if let Err(err) = fetch.await {
                warn!(%err, "background status revalidation failed");
            }
        });
    }

    async fn load_status(
        &self,
        context: &QueryContext,
        address: &Address,
    ) -> Result<UserPollStatus, QueryError> {
        let (voted_polls, claimed_polls) = futures::try_join!(
            self.indexed
                .query_voted_polls(&context.index_endpoint, &context.contract, address),
            self.indexed.query_claimed_polls(
                &context.index_endpoint,
                &context.contract,
                address
            ),
        )
        .map_err(|err| QueryError::source_unavailable(Backend::Indexed, err))?;

        let status = UserPollStatus {
            voted_polls,
            claimed_polls,
        };
        if status.claims_without_vote().next().is_some() {
            debug!(
                %address,
                network = %context.network,
                "index reports claims for polls without a recorded vote"
            );
        }
        Ok(status)
    }

    async fn poll_flag(
        self: &Arc<Self>,
        flag: PollFlag,
        poll: PollId,
        address: Option<&Address>,
    ) -> Result<bool, QueryError> {
        let Some(address) = address else {
            return Ok(false);
        };
        let Some(context) = self.context() else {
            debug!(
                %address,
                %poll,
                "no resolvable contract on the active network, answering false"
            );
            return Ok(false);
        };

        let Some(backend) = select_backend(self.gate, flag.kind()) else {
            return Ok(false);
        };
        match backend {
            Backend::Ledger => self.fetch_flag(flag, poll, context, address.clone(), backend).await,
            Backend::Indexed => {
                let now = Instant::now();
                let batch_key = context.key(QueryKind::UserPollStatus, address, None);
                let (cached_batch, batch_in_flight) = {
                    let mut statuses = lock(&self.statuses);
                    let cached = statuses.lookup(&batch_key, now, CachePolicy::INDEXED);
                    let in_flight = statuses.in_flight.get(&batch_key).cloned();
                    (cached, in_flight)
                };
                if let Some((status, fresh)) = cached_batch {
                    if !fresh {
                        self.revalidate_status_in_background(
                            batch_key,
                            context,
                            address.clone(),
                        );
                    }
                    return Ok(flag.read(&status, poll));
                }
                if let Some(fetch) = batch_in_flight {
                    debug!(?batch_key, %poll, "waiting on in-flight status fetch");
                    return fetch.await.map(|status| flag.read(&status, poll));
                }

                let key = context.key(flag.kind(), address, Some(poll));
                let cached = lock(&self.flags).lookup(&key, now, CachePolicy::INDEXED);
                if let Some((value, fresh)) = cached {
                    if !fresh {
                        let fetch =
                            self.fetch_flag(flag, poll, context, address.clone(), backend);
                        tokio::spawn(async move {
                            if let Err(err) = fetch.await {
                                warn!(%err, "background poll revalidation failed");
                            }
                        });
                    }
                    return Ok(value);
                }
                self.fetch_flag(flag, poll, context, address.clone(), backend)
                    .await
            }
        }
    }

    /// Start (or join) a single-poll fetch. Ledger results are handed back to the
    /// waiting callers only, never retained.
    fn fetch_flag(
        self: &Arc<Self>,
        flag: PollFlag,
        poll: PollId,
        context: QueryContext,
        address: Address,
        backend: Backend,
    ) -> SharedFetch<bool> {
        let key = context.key(flag.kind(), &address, Some(poll));
        let mut slots = lock(&self.flags);
        if let Some(in_flight) = slots.in_flight.get(&key) {
            return in_flight.clone();
        }

        let inner = Arc::clone(self);
        let origin = self.origin_of(&address);
        let policy = CachePolicy::for_backend(backend);
        let commit_key = key.clone();
        let fetch = async move {
            let result = inner
                .load_flag(flag, poll, &context, &address, backend)
                .await;
            inner.commit(&inner.flags, &commit_key, origin, policy, &result);
            result
        }
        .boxed()
        .shared();
        slots.in_flight.insert(key, fetch.clone());
        fetch
    }

    async fn load_flag(
        &self,
        flag: PollFlag,
        poll: PollId,
        context: &QueryContext,
        address: &Address,
        backend: Backend,
    ) -> Result<bool, QueryError> {
        let QueryContext {
            contract,
            rpc_endpoint,
            index_endpoint,
            ..
        } = context;
        let result = match (backend, flag) {
            (Backend::Ledger, PollFlag::Voted) => {
                self.ledger
                    .read_has_voted(rpc_endpoint, contract, poll, address)
                    .await
            }
            (Backend::Ledger, PollFlag::Claimed) => {
                self.ledger
                    .read_has_claimed(rpc_endpoint, contract, poll, address)
                    .await
            }
            (Backend::Indexed, PollFlag::Voted) => {
                self.indexed
                    .query_has_voted(index_endpoint, contract, poll, address)
                    .await
            }
            (Backend::Indexed, PollFlag::Claimed) => {
                self.indexed
                    .query_has_claimed(index_endpoint, contract, poll, address)
                    .await
            }
        };
        result.map_err(|err| QueryError::source_unavailable(backend, err))
    }

    fn peek_status(&self, address: Option<&Address>) -> Option<UserPollStatus> {
        if !self.gate.is_enabled() {
            return None;
        }
        let address = address?;
        let context = self.context()?;
        let key = context.key(QueryKind::UserPollStatus, address, None);
        lock(&self.statuses)
            .lookup(&key, Instant::now(), CachePolicy::INDEXED)
            .map(|(status, _)| status)
    }

    fn peek_flag(&self, flag: PollFlag, poll: PollId, address: Option<&Address>) -> bool {
        if let Some(status) = self.peek_status(address) {
            return flag.read(&status, poll);
        }
        let (Some(address), Some(context)) = (address, self.context()) else {
            return false;
        };
        let key = context.key(flag.kind(), address, Some(poll));
        lock(&self.flags)
            .lookup(&key, Instant::now(), CachePolicy::INDEXED)
            .is_some_and(|(value, _)| value)
    }
}
