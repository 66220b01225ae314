mod args_parse;

use std::{fs::read_to_string, path::Path, sync::Arc};

use crate::args_parse::Args;

use anyhow::{Context, Result};
use brokerctl_client::{BrokerManagement, MemoryBroker};
use brokerctl_controller::{
    init_metrics, BrokerController, ControllerConfig, ControllerDriver, LoadConfiguration,
    LoggingSink,
};
use brokerctl_core::AddressResource;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging, RUST_LOG selects the levels
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Parse command line arguments
    let args = Args::parse()?;

    // Load the configuration from the specified YAML file
    let config_content = read_to_string(Path::new(&args.config_file))
        .context(format!("Failed to read config file: {}", args.config_file))?;
    let load_config: LoadConfiguration = serde_yaml::from_str(&config_content)?;

    // Attempt to transform LoadConfiguration into ControllerConfig
    let mut config: ControllerConfig = load_config.try_into()?;

    // If `poll_interval` is provided via command-line args, override the value from the config file
    if let Some(poll_interval) = args.poll_interval {
        let millis: u64 = poll_interval.parse().context(format!(
            "Failed to parse poll interval in milliseconds: {}",
            poll_interval
        ))?;
        config.poll_interval = Duration::from_millis(millis);
    }

    // If `prom_exporter` is provided via command-line args, override the value from the config file
    if let Some(prom_exporter) = args.prom_exporter {
        let prom_address: SocketAddr = prom_exporter.parse().context(format!(
            "Failed to parse into Socket address: {}",
            prom_exporter
        ))?;
        config.prom_exporter = Some(prom_address);
    }

    // Init metrics with or without prometheus exporter
    init_metrics(config.prom_exporter);

    let desired: Option<Vec<AddressResource>> = match args.desired_file {
        Some(path) => {
            let content = read_to_string(Path::new(&path))
                .context(format!("Failed to read desired addresses: {}", path))?;
            Some(
                serde_json::from_str(&content)
                    .context(format!("Failed to parse desired addresses: {}", path))?,
            )
        }
        None => None,
    };

    // The controller runs against the in-memory broker; embedding deployments provide a Session
    info!("Starting the in-memory broker");
    let broker = MemoryBroker::new();
    let management = BrokerManagement::new(broker.client(config.client.clone()))
        .with_connector_endpoint(config.connector_endpoint.clone());

    let controller = Arc::new(BrokerController::new(
        management,
        config.engine.clone(),
        config.address_space.clone(),
        Arc::new(LoggingSink),
    ));
    if let Some(addresses) = desired {
        info!(count = addresses.len(), "Loaded desired addresses");
        controller.engine().set_desired(addresses).await;
    }

    if let Err(e) = controller.start().await {
        error!(error = %e, "Initial check failed, retrying in the background");
    }
    let driver = ControllerDriver::start(controller, config.poll_interval, config.retry_delay);
    info!(
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Brokerctl controller running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down the controller");
    driver.stop().await;

    Ok(())
}
