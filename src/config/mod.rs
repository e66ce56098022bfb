pub mod kubeconfig;

pub use kubeconfig::{
    default_kubeconfig_path, in_cluster, load_kubeconfig, pem_certificates, TlsOverrides,
    SERVICE_ACCOUNT_DIR,
};

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::cli::Args;
use crate::engine::{EngineConfig, FailurePolicy};
use crate::resolver::CloudProvider;

/// Startup configuration problems; always fatal
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Kubernetes client configuration: {0}")]
    Kube(String),

    #[error("Failed to read {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How the orchestrator should be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KubeTarget {
    /// Service account of the pod we run in
    InCluster,
    /// A kubeconfig file, optionally with an explicit context
    Kubeconfig {
        path: PathBuf,
        context: Option<String>,
    },
}

/// Registry agent settings
#[derive(Clone, PartialEq, Eq)]
pub struct ConsulSettings {
    pub address: String,
    pub token: Option<String>,
}

impl std::fmt::Debug for ConsulSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulSettings")
            .field("address", &self.address)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub cluster_id: String,
    pub provider: CloudProvider,
    pub interval: Duration,
    pub request_timeout: Duration,
    pub failure_policy: FailurePolicy,
    pub dry_run: bool,
    pub once: bool,
    pub kube: KubeTarget,
    pub tls: TlsOverrides,
    pub consul: ConsulSettings,
}

fn required(value: Option<&str>, name: &'static str) -> Result<String, ConfigError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::Missing(name))
}

/// Expand `~` and environment variables in a user supplied path
fn expand_path(path: &Path) -> Result<PathBuf, ConfigError> {
    let raw = path.to_string_lossy();
    shellexpand::full(&raw)
        .map(|expanded| PathBuf::from(expanded.as_ref()))
        .map_err(|e| ConfigError::Invalid(format!("cannot expand path {}: {}", raw, e)))
}

/// Pick the orchestrator connection: an explicit kubeconfig wins, then the
/// pod's service account, then the user's default kubeconfig.
fn kube_target(
    args: &Args,
    in_pod: bool,
    fallback: Option<PathBuf>,
) -> Result<KubeTarget, ConfigError> {
    let path = match (&args.kubeconfig, in_pod, fallback) {
        (Some(path), _, _) => expand_path(path)?,
        (None, true, _) | (None, false, None) => return Ok(KubeTarget::InCluster),
        (None, false, Some(default)) => default,
    };
    Ok(KubeTarget::Kubeconfig {
        path,
        context: args.context.clone(),
    })
}

impl SyncConfig {
    /// Validate command line and environment input
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let cluster_id = required(args.cluster_id.as_deref(), "KUBERNETES_SERVICE_HOST")?;
        let provider = CloudProvider::parse(&required(
            args.cloud_provider.as_deref(),
            "CLOUD_PROVIDER",
        )?);

        if args.interval == 0 {
            return Err(ConfigError::Invalid(
                "--interval must be at least 1 second".to_string(),
            ));
        }
        if args.request_timeout == 0 {
            return Err(ConfigError::Invalid(
                "--request-timeout must be at least 1 second".to_string(),
            ));
        }

        let consul_address = args.consul_addr.trim().trim_end_matches('/');
        if consul_address.is_empty() {
            return Err(ConfigError::Missing("CONSUL_HTTP_ADDR"));
        }
        let consul_address = if consul_address.contains("://") {
            consul_address.to_string()
        } else {
            format!("http://{}", consul_address)
        };

        let in_pod = Path::new(SERVICE_ACCOUNT_DIR).join("token").exists();
        let fallback = Some(default_kubeconfig_path()).filter(|p| p.exists());
        let kube = kube_target(args, in_pod, fallback)?;

        let tls = TlsOverrides {
            ca_cert: args.ca_cert.as_deref().map(expand_path).transpose()?,
            client_cert: args.client_cert.as_deref().map(expand_path).transpose()?,
            client_key: args.client_key.as_deref().map(expand_path).transpose()?,
        };

        Ok(Self {
            cluster_id,
            provider,
            interval: Duration::from_secs(args.interval),
            request_timeout: Duration::from_secs(args.request_timeout),
            failure_policy: if args.fail_fast {
                FailurePolicy::Abort
            } else {
                FailurePolicy::SkipPass
            },
            dry_run: args.dry_run,
            once: args.once,
            kube,
            tls,
            consul: ConsulSettings {
                address: consul_address,
                token: args.consul_token.clone().filter(|t| !t.is_empty()),
            },
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(self.cluster_id.clone(), self.provider.clone())
            .with_interval(self.interval)
            .with_failure_policy(self.failure_policy)
            .with_dry_run(self.dry_run)
    }

    /// Resolve the orchestrator connection and apply the command line
    /// overrides and timeouts on top of it
    pub async fn kube_config(&self) -> Result<kube::Config, ConfigError> {
        let mut config = match self.kube {
            KubeTarget::InCluster => in_cluster()?,
            KubeTarget::Kubeconfig {
                ref path,
                ref context,
            } => load_kubeconfig(path, context.as_deref()).await?,
        };
        self.tls.apply(&mut config)?;
        config.connect_timeout = Some(self.request_timeout);
        config.read_timeout = Some(self.request_timeout);
        config.write_timeout = Some(self.request_timeout);
        Ok(config)
    }
}
