use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    Agent(AgentArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct AgentArgs {
    /// Path to the bpf fs holding the pinned filter map
    #[arg(long, env = "BPF_FS", default_value = "/sys/fs/bpf")]
    pub bpf_fs: PathBuf,

    /// Name of the pinned filter map
    #[arg(long, env = "FILTER_MAP_NAME", default_value = "nodewatch_filter")]
    pub filter_map: String,

    /// Attempts for each filter map update, must be at least 1
    #[arg(long, env = "FILTER_RETRIES", default_value_t = 3)]
    pub filter_retries: u32,

    /// Wait before the first filter map retry
    #[arg(long, env = "FILTER_BACKOFF_MS", default_value_t = 1000)]
    pub filter_backoff_ms: u64,

    /// Growth factor of the wait between filter map retries
    #[arg(long, env = "FILTER_BACKOFF_MULTIPLIER", default_value_t = 2)]
    pub filter_backoff_multiplier: u32,

    /// API server URL, inferred from the kube config when unset
    #[arg(long, env = "APISERVER_URL")]
    pub apiserver_url: Option<String>,

    /// Seconds between API server address refreshes
    #[arg(long, env = "APISERVER_REFRESH_SECS", default_value_t = 30)]
    pub apiserver_refresh_secs: u64,

    /// Consecutive resolution failures tolerated before the agent fails
    #[arg(long, env = "APISERVER_MAX_RESOLVE_FAILURES", default_value_t = 3)]
    pub apiserver_max_resolve_failures: u32,

    /// Readiness listener for agent
    #[arg(long, env = "READINESS_ADDRESS", default_value = "0.0.0.0:9091")]
    pub readiness_address: SocketAddr,
}

impl AgentArgs {
    pub fn filter_map_path(&self) -> PathBuf {
        self.bpf_fs.join(&self.filter_map)
    }
}
