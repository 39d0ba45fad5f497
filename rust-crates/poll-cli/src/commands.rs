use crate::{
    Args,
    Command,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use itertools::Itertools;
use networks::{
    NetworkProfile,
    NetworkSelector,
    SledSelectionStore,
    ensure_structure,
    load_profiles,
    record_deployment,
};
use poll_status::{
    Address,
    IndexerClient,
    LedgerClient,
    PollId,
    StatusCache,
    UserPollStatus,
};
use serde_json::json;
use std::{
    collections::BTreeSet,
    sync::Arc,
    time::Duration,
};
use tokio::time;
use tracing::{
    debug,
    error,
    info,
    warn,
};
use url::Url;

type Cache = StatusCache<IndexerClient, LedgerClient, SledSelectionStore>;

const LEDGER_ONLY_HINT: &str =
    "batch status needs --use-indexer; use `voted` or `claimed` to read the ledger per poll";

struct App {
    cache: Cache,
    json: bool,
}

pub(crate) async fn run(args: Args) -> Result<()> {
    ensure_structure(&args.deployments_dir).map_err(|e| eyre!(e))?;
    let app = App::open(&args)?;

    match args.command {
        Command::Networks => app.networks(),
        Command::Select { target } => app.select(&target),
        Command::Status { address, refresh } => {
            let address = app.address(address.as_deref());
            app.status(address.as_ref(), refresh).await
        }
        Command::Voted { poll, address } => {
            let address = app.address(address.as_deref());
            let voted = app
                .cache
                .has_voted(poll, address.as_ref())
                .await
                .inspect_err(|err| error!(%err, %poll, "vote lookup failed"))
                .wrap_err("looking up vote")?;
            app.print_flag("voted", poll, address.as_ref(), voted)
        }
        Command::Claimed { poll, address } => {
            let address = app.address(address.as_deref());
            let claimed = app
                .cache
                .has_claimed(poll, address.as_ref())
                .await
                .inspect_err(|err| error!(%err, %poll, "claim lookup failed"))
                .wrap_err("looking up reward claim")?;
            app.print_flag("claimed", poll, address.as_ref(), claimed)
        }
        Command::Watch {
            address,
            interval_secs,
        } => {
            let address = app.address(address.as_deref());
            app.watch(address.as_ref(), Duration::from_secs(interval_secs.max(1)))
                .await
        }
        Command::DeployRecord {
            target,
            contract_address,
            deployment_block,
            rpc_endpoint,
            index_endpoint,
        } => {
            let record = record_deployment(
                &args.deployments_dir,
                target,
                &contract_address,
                deployment_block,
                rpc_endpoint.as_ref().map(Url::as_str),
                index_endpoint.as_ref().map(Url::as_str),
            )
            .map_err(|e| eyre!(e))?;
            if app.json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!(
                    "Recorded {} on {target} at {}",
                    record.contract_address, record.deployed_at
                );
            }
            Ok(())
        }
    }
}

async fn handle_interrupt() {
    match tokio::signal::ctrl_c().await {
        Ok(_) => info!("Received interrupt, exiting"),
        Err(err) => warn!(?err, "Received interrupt error, exiting anyway"),
    }
}

fn join_polls(polls: &BTreeSet<PollId>) -> String {
    if polls.is_empty() {
        return "-".to_string();
    }
    polls.iter().join(", ")
}

impl App {
    fn open(args: &Args) -> Result<Self> {
        let profiles = load_profiles(&args.deployments_dir).map_err(|e| eyre!(e))?;
        let store = SledSelectionStore::open(args.state_dir().join("selection"))
            .map_err(|e| eyre!(e))?;
        let selector = Arc::new(NetworkSelector::with_profiles(profiles, store));
        if let Some(network) = args.network {
            selector.select(network).map_err(|e| eyre!(e))?;
        }
        let cache = StatusCache::new(
            IndexerClient::new().map_err(|e| eyre!(e))?,
            LedgerClient::new().map_err(|e| eyre!(e))?,
            selector,
            args.identity(),
            args.use_indexer,
        );
        Ok(Self {
            cache,
            json: args.json,
        })
    }

    /// An explicit address wins over the connected wallet.
    fn address(&self, explicit: Option<&str>) -> Option<Address> {
        explicit
            .and_then(Address::new)
            .or_else(|| self.cache.identity().current().address)
    }

    fn active(&self) -> NetworkProfile {
        self.cache.selector().get_active()
    }

    /// Batch status is always empty when the index is off.
    fn status_hint(&self) -> Option<&'static str> {
        (!self.cache.feature_gate().is_enabled()).then_some(LEDGER_ONLY_HINT)
    }

    fn networks(&self) -> Result<()> {
        let active = self.cache.selector().active_id();
        let profiles = self.cache.selector().get_all();
        if self.json {
            let listing: Vec<_> = profiles
                .values()
                .map(|profile| json!({ "active": profile.id == active, "profile": profile }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&listing)?);
            return Ok(());
        }
        for profile in profiles.values() {
            let marker = if profile.id == active { "*" } else { " " };
            let contract = profile
                .contract_address
                .as_deref()
                .unwrap_or("(no deployment)");
            println!(
                "{marker} {:<8} {:<18} chain {:<9} contract {contract}",
                profile.id, profile.display_name, profile.chain_id
            );
            println!("    rpc   {}", profile.rpc_endpoint);
            println!("    index {}", profile.index_endpoint);
        }
        Ok(())
    }

    fn select(&self, target: &str) -> Result<()> {
        let selector = self.cache.selector();
        selector.set_active(target).map_err(|e| eyre!(e))?;
        let active = self.active();
        if active.id.as_str() != target.trim() {
            println!("Unknown network {target:?}; {} stays active", active.id);
        } else {
            println!("Active network: {} ({})", active.display_name, active.id);
        }
        Ok(())
    }

    async fn status(&self, address: Option<&Address>, refresh: bool) -> Result<()> {
        let result = if refresh {
            self.cache.revalidate_user_poll_status(address).await
        } else {
            self.cache.get_user_poll_status(address).await
        };
        let status = result
            .inspect_err(|err| error!(%err, "status query failed"))
            .wrap_err("fetching poll status")?;
        self.print_status(address, &status)
    }

    async fn watch(&self, address: Option<&Address>, every: Duration) -> Result<()> {
        let mut ticker = time::interval(every);
        let interrupt = handle_interrupt();
        tokio::pin!(interrupt);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.cache.evict_expired();
                    debug!(evicted, "swept expired status entries");
                    match self.cache.revalidate_user_poll_status(address).await {
                        Ok(status) => self.print_status(address, &status)?,
                        Err(err) => warn!(%err, "status refresh failed"),
                    }
                }
                _ = &mut interrupt => break,
            }
        }
        Ok(())
    }

    fn print_status(&self, address: Option<&Address>, status: &UserPollStatus) -> Result<()> {
        let network = self.active();
        if self.json {
            let body = json!({
                "network": network.id,
                "address": address,
                "status": status,
                "hint": self.status_hint(),
            });
            println!("{}", serde_json::to_string(&body)?);
            return Ok(());
        }
        let Some(address) = address else {
            println!("No wallet connected on {}", network.display_name);
            return Ok(());
        };
        println!("{} on {}", address, network.display_name);
        if let Some(link) = network.explorer_address_url(address.as_str()) {
            println!("  explorer {link}");
        }
        println!("  voted    {}", join_polls(&status.voted_polls));
        println!("  claimed  {}", join_polls(&status.claimed_polls));
        if let Some(hint) = self.status_hint() {
            println!("  note     {hint}");
        }
        Ok(())
    }

    fn print_flag(
        &self,
        label: &str,
        poll: PollId,
        address: Option<&Address>,
        value: bool,
    ) -> Result<()> {
        if self.json {
            let mut body = json!({
                "network": self.active().id,
                "address": address,
                "poll": poll,
            });
            body[label] = json!(value);
            println!("{}", serde_json::to_string(&body)?);
            return Ok(());
        }
        match address {
            Some(address) => println!("{address} {label} in poll {poll}: {value}"),
            None => println!("No wallet connected; {label} in poll {poll}: {value}"),
        }
        Ok(())
    }
}
