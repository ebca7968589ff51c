//! Node configuration, parsed from CLI arguments or `NODE_*` environment variables.

use crate::membership::NodeName;

use anyhow::{Context, bail};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0:10031";
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 500;
pub const DEFAULT_RESUME_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_ABSORB_POLL_MS: u64 = 1000;
pub const DEFAULT_ABSORB_DEADLINE_SECS: u64 = 120;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "coordinator-node",
    version,
    about = "Catalog routing and scatter/gather coordination for a document-store cluster"
)]
pub struct CliArgs {
    /// Address the HTTP server listens on.
    #[arg(long, env = "NODE_BIND", default_value_t = String::from(DEFAULT_BIND))]
    pub bind: String,

    /// This node's name, `host:port/tag`.
    ///
    /// Environment variable: `NODE_NAME`
    #[arg(long, env = "NODE_NAME")]
    pub node_name: String,

    /// Catalog description (v1 or v2 JSON).
    #[arg(long, env = "NODE_CATALOG", default_value = "catalog.json")]
    pub catalog: PathBuf,

    /// Directory for the status file, live node list and outbound buffers.
    #[arg(long, env = "NODE_STATE_DIR", default_value = "state")]
    pub state_dir: PathBuf,

    /// Deadline of a scatter/gather session, in seconds.
    #[arg(long, env = "NODE_SESSION_TIMEOUT_SECS", default_value_t = DEFAULT_SESSION_TIMEOUT_SECS)]
    pub session_timeout_secs: u64,

    #[arg(long, env = "NODE_SWEEP_INTERVAL_MS", default_value_t = DEFAULT_SWEEP_INTERVAL_MS)]
    pub sweep_interval_ms: u64,

    /// How often buffered requests to unreachable peers are retried.
    #[arg(long, env = "NODE_RESUME_INTERVAL_SECS", default_value_t = DEFAULT_RESUME_INTERVAL_SECS)]
    pub resume_interval_secs: u64,

    #[arg(long, env = "NODE_ABSORB_POLL_MS", default_value_t = DEFAULT_ABSORB_POLL_MS)]
    pub absorb_poll_ms: u64,

    /// How long a joining node waits to serve its new catalog before giving up.
    #[arg(long, env = "NODE_ABSORB_DEADLINE_SECS", default_value_t = DEFAULT_ABSORB_DEADLINE_SECS)]
    pub absorb_deadline_secs: u64,

    /// External program copying a dataset between hosts.
    #[arg(long, env = "NODE_ABSORB_COMMAND")]
    pub absorb_command: Option<String>,

    /// Seed for random replica selection; random when unset.
    #[arg(long, env = "NODE_RNG_SEED")]
    pub rng_seed: Option<u64>,

    /// Log as JSON lines instead of text.
    #[arg(long, env = "NODE_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind: SocketAddr,
    pub node: NodeName,
    pub catalog_path: PathBuf,
    pub state_dir: PathBuf,
    pub session_timeout: Duration,
    pub sweep_interval: Duration,
    pub resume_interval: Duration,
    pub absorb_poll_interval: Duration,
    pub absorb_deadline: Duration,
    pub absorb_command: Option<String>,
    pub rng_seed: Option<u64>,
    pub log_json: bool,
}

impl NodeConfig {
    pub fn status_path(&self) -> PathBuf {
        self.state_dir.join("status.json")
    }

    pub fn live_nodes_path(&self) -> PathBuf {
        self.state_dir.join("live-nodes.json")
    }
}

impl TryFrom<CliArgs> for NodeConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.session_timeout_secs == 0 {
            bail!("NODE_SESSION_TIMEOUT_SECS must be greater than 0");
        }
        if args.sweep_interval_ms == 0 || args.absorb_poll_ms == 0 || args.resume_interval_secs == 0 {
            bail!("Intervals must be greater than 0");
        }

        let bind: SocketAddr = args
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address {:?}", args.bind))?;
        let node: NodeName = args.node_name.parse()?;

        Ok(Self {
            bind,
            node,
            catalog_path: args.catalog,
            state_dir: args.state_dir,
            session_timeout: Duration::from_secs(args.session_timeout_secs),
            sweep_interval: Duration::from_millis(args.sweep_interval_ms),
            resume_interval: Duration::from_secs(args.resume_interval_secs),
            absorb_poll_interval: Duration::from_millis(args.absorb_poll_ms),
            absorb_deadline: Duration::from_secs(args.absorb_deadline_secs),
            absorb_command: args.absorb_command,
            rng_seed: args.rng_seed,
            log_json: args.log_json,
        })
    }
}
