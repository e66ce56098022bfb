use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kube2registry::cli::{format_startup, Args, LogFormat};
use kube2registry::client::{ConsulClient, KubernetesClient};
use kube2registry::config::SyncConfig;
use kube2registry::engine::{spawn_engine, FailurePolicy, ReconciliationEngine};

fn init_logging(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));

    match args.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

fn env_file_arg() -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == "--env-file" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--env-file=") {
            return Some(path.to_string());
        }
    }
    None
}

async fn build_engine(config: &SyncConfig) -> anyhow::Result<ReconciliationEngine> {
    let kube_config = config
        .kube_config()
        .await
        .context("Failed to resolve Kubernetes connection")?;
    let kubernetes =
        KubernetesClient::new(kube_config).context("Failed to create Kubernetes client")?;
    info!("Using Kubernetes API at {}", kubernetes.cluster_url());

    let consul = ConsulClient::new(&config.consul, config.request_timeout)
        .context("Failed to create Consul client")?;

    Ok(ReconciliationEngine::new(
        config.engine_config(),
        Arc::new(kubernetes),
        Arc::new(consul),
    ))
}

#[tokio::main]
async fn main() {
    // The env file has to be loaded before clap reads the environment
    let env_file = env_file_arg();
    let env_result = env_file.as_ref().map(dotenvy::from_path);

    let args = Args::parse();
    init_logging(&args);

    if let (Some(path), Some(Err(e))) = (&env_file, &env_result) {
        error!("Failed to load env file {}: {}", path, e);
        process::exit(1);
    }

    let config = match SyncConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    for line in format_startup(&config).lines() {
        info!("{}", line);
    }

    let engine = match build_engine(&config).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    };

    if config.once {
        match engine.run_pass(1).await {
            Ok(report) => report.log(),
            Err(e) => {
                error!("Pass failed: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    let (shutdown, mut handle) = spawn_engine(engine);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
            let _ = shutdown.send(true);
        }
        finished = &mut handle => {
            report_exit(finished, config.failure_policy);
            return;
        }
    }

    let finished = handle.await;
    report_exit(finished, config.failure_policy);
}

fn report_exit(
    finished: Result<Result<(), kube2registry::engine::EngineError>, tokio::task::JoinError>,
    policy: FailurePolicy,
) {
    match finished {
        Ok(Ok(())) => info!("Stopped"),
        Ok(Err(e)) => {
            error!("Reconciliation stopped ({:?} policy): {}", policy, e);
            process::exit(1);
        }
        Err(e) => {
            error!("Reconciliation task panicked: {}", e);
            process::exit(1);
        }
    }
}
