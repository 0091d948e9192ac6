use clap::Parser;
use nsplane::acl::{BrokerAdmin, KafkaBrokerAdmin, ReconcilerRegistry, ReconciliationScheduler};
use nsplane::metrics::ReconcilerMetrics;
use nsplane::registry::ResourceRegistries;
use nsplane::{Config, NsPlaneError, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nsplane-controller")]
#[command(about = "Namespace control plane: resource stores and broker ACL synchronization")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config/nsplane.toml")]
    config: String,

    /// Overrides `log_level` from the configuration
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", cli.config, e);
            std::process::exit(1);
        }
    };

    let default_filter = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    config.validate()?;
    info!("Loaded configuration from {}", cli.config);
    info!(
        "Resource logs under {} with prefix {}",
        config.store.data_dir.display(),
        config.store.topic_prefix
    );

    let registries = ResourceRegistries::open(&config.store).await?;
    let metrics = ReconcilerMetrics::new()?;

    let registry = ReconcilerRegistry::from_config(
        &config,
        Arc::new(registries.clone()),
        metrics,
        |cluster| {
            info!("Cluster {} administered through {}", cluster.name, cluster.bootstrap_servers);
            let admin = KafkaBrokerAdmin::new(cluster.name.clone(), &cluster.bootstrap_servers)?;
            Ok(Arc::new(admin) as Arc<dyn BrokerAdmin>)
        },
    )?;
    info!("Managing clusters: {:?}", registry.cluster_names());

    let scheduler = ReconciliationScheduler::spawn(Arc::new(registry), &config.reconciler);
    info!(
        "ACL synchronization running on {} clusters every {}ms",
        scheduler.task_count(),
        config.reconciler.interval_ms
    );

    let outcome = tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
            Ok(())
        }
        reason = registries.wait_fatal() => {
            error!("Resource store failed, stopping: {}", reason);
            Err(NsPlaneError::StoreFatal {
                store: "resource-stores".to_string(),
                message: reason,
            })
        }
    };

    scheduler.shutdown().await;
    registries.shutdown();
    info!("nsplane-controller stopped");
    outcome
}
