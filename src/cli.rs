use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;

use crate::engine::DEFAULT_INTERVAL_SECS;

#[derive(Parser, Debug)]
#[command(name = "kube2registry")]
#[command(about = "Mirror the services of a Kubernetes cluster into a Consul registry")]
#[command(version)]
pub struct Args {
    /// Path to a kubeconfig file. Without it the pod's service account is
    /// used, or ~/.kube/config when not running in a pod.
    #[arg(long, env = "KUBECONFIG", value_name = "FILE")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of the current one
    #[arg(long, value_name = "NAME")]
    pub context: Option<String>,

    /// Identifier of this cluster, written as the `kube` tag on every entry.
    /// Must be unique among the clusters sharing the registry.
    #[arg(long, env = "KUBERNETES_SERVICE_HOST", value_name = "ID")]
    pub cluster_id: Option<String>,

    /// Cloud hosting the cluster (aws, openstack, ...)
    #[arg(long, env = "CLOUD_PROVIDER", value_name = "NAME")]
    pub cloud_provider: Option<String>,

    /// Consul agent address
    #[arg(
        long,
        env = "CONSUL_HTTP_ADDR",
        default_value = "http://127.0.0.1:8500",
        value_name = "URL"
    )]
    pub consul_addr: String,

    /// Consul ACL token
    #[arg(long, env = "CONSUL_HTTP_TOKEN", value_name = "TOKEN", hide_env_values = true)]
    pub consul_token: Option<String>,

    /// Seconds between two reconciliation passes
    #[arg(long, env = "K2C_INTERVAL", default_value_t = DEFAULT_INTERVAL_SECS)]
    pub interval: u64,

    /// Timeout in seconds for each call to Kubernetes or Consul
    #[arg(long, default_value = "30")]
    pub request_timeout: u64,

    /// CA bundle for the Kubernetes API server
    #[arg(long, value_name = "FILE")]
    pub ca_cert: Option<PathBuf>,

    /// Client certificate for the Kubernetes API server
    #[arg(long, value_name = "FILE")]
    pub client_cert: Option<PathBuf>,

    /// Private key for --client-cert
    #[arg(long, value_name = "FILE")]
    pub client_key: Option<PathBuf>,

    /// Exit on the first failed call instead of retrying on the next pass
    #[arg(long)]
    pub fail_fast: bool,

    /// Run a single pass and exit
    #[arg(long)]
    pub once: bool,

    /// Log what would be registered/deregistered without changing Consul
    #[arg(long)]
    pub dry_run: bool,

    /// Enable verbose logging output (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Debug logging (same as -v); K2C_DEBUG accepts 1/0, true/false, yes/no
    #[arg(
        long,
        env = "K2C_DEBUG",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub debug: bool,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Path to a .env file to load before reading the environment
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

impl Args {
    /// Default tracing filter for the requested verbosity
    pub fn log_filter(&self) -> &'static str {
        match (self.verbose, self.debug) {
            (0, false) => "info",
            (0, true) | (1, _) => "debug",
            _ => "trace",
        }
    }
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

use crate::config::{KubeTarget, SyncConfig};

/// Startup banner describing what the process is about to do.
/// Pure function - returns a formatted string.
pub fn format_startup(config: &SyncConfig) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "kube2registry v{}{}\n",
        env!("CARGO_PKG_VERSION"),
        if config.dry_run { " - Dry Run Mode" } else { "" }
    ));
    output.push_str(&format!("  Cluster:   {}\n", config.cluster_id));
    output.push_str(&format!("  Provider:  {}\n", config.provider));
    match config.kube {
        KubeTarget::InCluster => output.push_str("  Kubernetes: in-cluster service account\n"),
        KubeTarget::Kubeconfig {
            ref path,
            ref context,
        } => {
            output.push_str(&format!("  Kubernetes: {}", path.display()));
            if let Some(ctx) = context {
                output.push_str(&format!(" (context {})", ctx));
            }
            output.push('\n');
        }
    }
    output.push_str(&format!("  Consul:    {}\n", config.consul.address));
    if config.once {
        output.push_str("  Schedule:  single pass\n");
    } else {
        output.push_str(&format!(
            "  Schedule:  every {}s\n",
            config.interval.as_secs()
        ));
    }

    output
}
