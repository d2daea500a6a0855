//! Burrow worker binary.
//!
//! # Usage
//!
//! ```bash
//! # Local only, state under ./burrow-data
//! BURROW_OWNER_PUBKEY=<hex> burrow-daemon
//!
//! # Publish to and listen on relays
//! burrow-daemon --data-dir ~/.burrow --relay wss://relay.one --relay wss://relay.two
//! ```

use std::{path::PathBuf, process::ExitCode};

use burrow_core::Identity;
use burrow_daemon::{AccessControl, AuditLog, Bridge, BridgeError, ConfigError, FileStore, SystemEnv};
use burrow_proto::PublicKey;
use burrow_relay::RelayPool;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Burrow MLS worker
#[derive(Parser, Debug)]
#[command(name = "burrow-daemon")]
#[command(about = "MLS group messaging worker speaking JSON lines on stdin/stdout")]
#[command(version)]
struct Args {
    /// Directory for groups, key packages and messages
    #[arg(long, default_value = "burrow-data")]
    data_dir: PathBuf,

    /// Identity secret key file (default: <data-dir>/identity.key)
    #[arg(long)]
    identity_file: Option<PathBuf>,

    /// Relay URL; repeat for several relays
    #[arg(long = "relay")]
    relays: Vec<String>,

    /// Access policy file (default: <data-dir>/access.json)
    #[arg(long)]
    access_config: Option<PathBuf>,

    /// Write the daily audit log under <data-dir>/audit
    #[arg(long)]
    audit: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn load_identity(args: &Args, env: &SystemEnv) -> Result<Identity, ConfigError> {
    if let Some(secret) = env_var("BURROW_SECRET_KEY") {
        tracing::info!("using identity from BURROW_SECRET_KEY");
        return Ok(Identity::from_secret_hex(secret.trim())?);
    }
    let path = args.identity_file.clone().unwrap_or_else(|| args.data_dir.join("identity.key"));
    Ok(Identity::load_or_generate(&path, env)?)
}

fn load_access(args: &Args) -> Result<AccessControl, ConfigError> {
    let owner = env_var("BURROW_OWNER_PUBKEY")
        .map(|hex| PublicKey::from_hex(hex.trim()))
        .transpose()?;
    let path = args.access_config.clone().unwrap_or_else(|| args.data_dir.join("access.json"));

    let access = AccessControl::open(path, owner)?;
    if args.audit || access.audit_requested() {
        let audit = AuditLog::open(args.data_dir.join("audit"))?;
        tracing::info!(dir = %audit.dir().display(), "audit log enabled");
        return Ok(access.with_audit(audit));
    }
    Ok(access)
}

async fn start(args: Args) -> Result<(), BridgeError> {
    let env = SystemEnv::new();
    let identity = load_identity(&args, &env)?;
    let access = load_access(&args)?;
    let store = FileStore::open(&args.data_dir)?;
    let pool = (!args.relays.is_empty()).then(|| RelayPool::websocket(args.relays.clone()));

    tracing::info!(
        pubkey = %identity.public_key(),
        data_dir = %args.data_dir.display(),
        relays = args.relays.len(),
        "burrow worker starting"
    );

    let bridge = Bridge::new(env, identity, store, access, pool)?;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    burrow_daemon::run(bridge, stdin, tokio::io::stdout()).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match start(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "worker stopped");
            ExitCode::FAILURE
        },
    }
}
