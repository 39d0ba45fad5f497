mod commands;

use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use networks::{
    DEPLOYMENTS_ROOT,
    NetworkId,
};
use poll_status::{
    EmbeddedConnection,
    FeatureGate,
    IdentityResolver,
    NativeConnection,
    PollId,
};
use std::{
    convert::Infallible,
    fs,
    path::PathBuf,
    sync::OnceLock,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};
use url::Url;

const DEFAULT_STATE_DIR: &str = "~/.poll-status";
const LOG_FILE_PREFIX: &str = "poll-status.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(
    name = "poll-status",
    about = "Inspect poll vote and reward claim status for a wallet",
    version
)]
struct Args {
    /// Switch the active network before running the command
    #[arg(long, global = true)]
    network: Option<NetworkId>,

    /// Serve status from the secondary index instead of reading the ledger
    #[arg(
        long,
        global = true,
        env = "POLL_STATUS_USE_INDEXER",
        value_parser = parse_gate,
        num_args = 0..=1,
        require_equals = true,
        default_value = "off",
        default_missing_value = "on"
    )]
    use_indexer: FeatureGate,

    /// Where the network selection is persisted
    #[arg(long, global = true, default_value = DEFAULT_STATE_DIR)]
    state_dir: String,

    /// Root of the per-network deployment records
    #[arg(long, global = true, default_value = DEPLOYMENTS_ROOT)]
    deployments_dir: PathBuf,

    /// Address reported by a natively connected wallet
    #[arg(long, global = true)]
    native_address: Option<String>,

    /// Address of an active embedded wallet session
    #[arg(long, global = true, conflicts_with = "embedded_pending")]
    embedded_address: Option<String>,

    /// An embedded wallet session is active but has not produced an address yet
    #[arg(long, global = true)]
    embedded_pending: bool,

    /// Write logs to a daily rolling file in this directory instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<String>,

    /// Print machine readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the configured networks
    Networks,
    /// Persist the active network
    Select {
        #[arg(value_name = "NETWORK")]
        target: String,
    },
    /// Voted and claimed polls for an address (defaults to the connected wallet)
    Status {
        address: Option<String>,
        /// Ignore any cached value
        #[arg(long)]
        refresh: bool,
    },
    /// Whether an address voted in a poll
    Voted {
        poll: PollId,
        address: Option<String>,
    },
    /// Whether an address claimed the reward of a poll
    Claimed {
        poll: PollId,
        address: Option<String>,
    },
    /// Re-fetch status on an interval until interrupted
    Watch {
        address: Option<String>,
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,
    },
    /// Record a contract deployment for a network
    DeployRecord {
        #[arg(value_name = "NETWORK")]
        target: NetworkId,
        contract_address: String,
        #[arg(long)]
        deployment_block: Option<u64>,
        #[arg(long)]
        rpc_endpoint: Option<Url>,
        #[arg(long)]
        index_endpoint: Option<Url>,
    },
}

fn parse_gate(raw: &str) -> Result<FeatureGate, Infallible> {
    Ok(FeatureGate::parse(raw))
}

impl Args {
    fn state_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.state_dir).into_owned())
    }

    fn identity(&self) -> IdentityResolver {
        let native = NativeConnection {
            connected: self.native_address.is_some(),
            address: self.native_address.clone(),
        };
        let embedded = EmbeddedConnection {
            active: self.embedded_pending || self.embedded_address.is_some(),
            address: self.embedded_address.clone(),
        };
        IdentityResolver::fixed(native, embedded)
    }
}

fn init_tracing(log_dir: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(raw) => {
            let dir = PathBuf::from(shellexpand::tilde(raw).into_owned());
            fs::create_dir_all(&dir)
                .wrap_err_with(|| format!("creating log directory {}", dir.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(rolling::daily(&dir, LOG_FILE_PREFIX));
            let _ = LOG_GUARD.set(guard);
            let _ = fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .try_init();
        }
        None => {
            let _ = fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    init_tracing(args.log_dir.as_deref())?;
    tracing::info!(gate = args.use_indexer.is_enabled(), "starting poll-status");
    commands::run(args).await
}
