use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tablequota::config::TablequotaConfig;
use tablequota::mesh::{Cluster, MembershipSource, NodeState, QuotaChangeHandler};
use tablequota::quota::{
    InMemoryConfigStore, MetricsFacadeSink, QueryQuotaManager, TableConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Cluster-wide per-table query quota node.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// YAML file of table quota configs, used instead of the configuration file's `tables`
    #[arg(long)]
    tables: Option<PathBuf>,

    /// Node identifier (overrides the configuration file)
    #[arg(long)]
    node_id: Option<String>,

    /// Gossip listen address (overrides the configuration file)
    #[arg(long)]
    listen_addr: Option<SocketAddr>,

    /// Seed node address, may be given more than once
    #[arg(long = "seed")]
    seeds: Vec<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    info!("Starting Tablequota");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => TablequotaConfig::from_file(path)?,
        None => TablequotaConfig::default(),
    };
    if let Some(node_id) = cli.node_id {
        config.node.node_id = Some(node_id);
    }
    if let Some(listen_addr) = cli.listen_addr {
        config.cluster.listen_addr = listen_addr;
    }
    if !cli.seeds.is_empty() {
        config.cluster.seed_nodes = cli.seeds;
    }

    let node_id = config.resolve_node_id();
    let resource = config.node.broker_resource.clone();
    let store = Arc::new(match &cli.tables {
        Some(path) => InMemoryConfigStore::from_file(path)?,
        None => InMemoryConfigStore::from_table_configs(&config.table_configs()),
    });
    let table_configs: Vec<TableConfig> = store
        .table_names()
        .iter()
        .filter_map(|table_name| store.table_config(table_name))
        .collect();
    info!(
        node_id = %node_id,
        resource = %resource,
        tables = table_configs.len(),
        "Configuration loaded"
    );

    let cluster = Arc::new(Cluster::start(config.cluster_config(&node_id)).await?);

    let manager = Arc::new(
        QueryQuotaManager::builder()
            .local_node_id(node_id.as_str())
            .config_store(store)
            .metrics_sink(Arc::new(MetricsFacadeSink::new()))
            .settings(config.quota.clone())
            .build()?,
    );

    for table_config in &table_configs {
        cluster
            .publish_table_state(&resource, table_config.table_name(), NodeState::Online)
            .await;
    }

    let view = cluster.current_view(&resource).await;
    for table_config in &table_configs {
        manager.init_table_quota(table_config, view.as_ref());
    }
    info!(rate_limiters = manager.registry_size(), "Query quotas initialized");

    let handler = QuotaChangeHandler::new(manager, cluster.clone(), resource);
    handler
        .run(config.cluster.membership_poll_interval(), shutdown_signal())
        .await;
    drop(handler);

    match Arc::try_unwrap(cluster) {
        Ok(cluster) => cluster.shutdown().await?,
        Err(_) => warn!("Cluster handle still in use, skipping graceful gossip shutdown"),
    }

    info!("Tablequota stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
