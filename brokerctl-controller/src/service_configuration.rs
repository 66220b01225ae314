use anyhow::{Context, Result};
use brokerctl_client::{ClientOptions, ConnectorEndpoint};
use brokerctl_core::{parse_to_bytes, AddressKind, DEFAULT_CONCURRENCY};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::error;

use crate::broker_controller::{DEFAULT_POLL_INTERVAL, DEFAULT_RETRY_DELAY};
use crate::engine::EngineConfig;
use crate::forwarders::ForwarderOptions;
use crate::stats_collector::AddressSpaceInfo;

/// configuration settings loaded from the config file
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LoadConfiguration {
    /// Memory budget shared by the addresses, e.g. `512Mb`; half the broker's global max if unset
    #[serde(default)]
    pub global_max_size: Option<String>,
    /// Interval between two checks of the broker
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// Delay before a failed check is retried
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    /// Maximum number of concurrent per-address operations
    #[serde(default)]
    pub concurrency_limit: Option<usize>,
    /// Time a management call waits for its reply, 0 waits forever
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
    #[serde(default)]
    pub correlate_requests: bool,
    #[serde(default)]
    pub forwarders: ForwarderConfig,
    #[serde(default)]
    pub address_space: AddressSpaceInfo,
    /// Address kinds another controller takes care of
    #[serde(default)]
    pub excluded_kinds: Vec<AddressKind>,
    /// Prometheus exporter http address
    #[serde(default)]
    pub prom_exporter: Option<String>,
}

/// Forwarder connector configuration
#[derive(Debug, Serialize, Deserialize)]
pub struct ForwarderConfig {
    #[serde(default = "enabled")]
    pub treat_reject_as_unmodified_delivery_failed: bool,
    #[serde(default = "enabled")]
    pub use_modified_for_transient_delivery_errors: bool,
    /// Host the connector services connect to
    #[serde(default)]
    pub messaging_host: Option<String>,
    #[serde(default)]
    pub messaging_port: Option<u16>,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        ForwarderConfig {
            treat_reject_as_unmodified_delivery_failed: true,
            use_modified_for_transient_delivery_errors: true,
            messaging_host: None,
            messaging_port: None,
        }
    }
}

fn enabled() -> bool {
    true
}

/// configuration of one controller instance, ready to wire the engine, the client and the driver
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub engine: EngineConfig,
    pub client: ClientOptions,
    pub connector_endpoint: ConnectorEndpoint,
    pub address_space: AddressSpaceInfo,
    pub poll_interval: Duration,
    pub retry_delay: Duration,
    pub prom_exporter: Option<SocketAddr>,
}

/// Implementing the TryFrom trait to transform LoadConfiguration into ControllerConfig
impl TryFrom<LoadConfiguration> for ControllerConfig {
    type Error = anyhow::Error;

    fn try_from(config: LoadConfiguration) -> Result<Self> {
        // an unparsable budget leaves it unset, the broker's global max is used instead
        let global_max_size = match config.global_max_size.as_deref() {
            Some(size) => match parse_to_bytes(size) {
                Ok(bytes) => i64::try_from(bytes).unwrap_or(i64::MAX),
                Err(e) => {
                    error!(error = %e, "ignoring global_max_size");
                    0
                }
            },
            None => 0,
        };

        let prom_exporter: Option<SocketAddr> = match config.prom_exporter {
            Some(addr) => Some(
                addr.parse()
                    .context(format!("Failed to parse prom_exporter address: {}", addr))?,
            ),
            None => None,
        };

        let call_timeout = match config.call_timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => ClientOptions::default().call_timeout,
        };

        let concurrency_limit = config.concurrency_limit.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency_limit == 0 {
            return Err(anyhow::anyhow!("concurrency_limit must be at least 1"));
        }

        Ok(ControllerConfig {
            engine: EngineConfig {
                global_max_size,
                concurrency_limit,
                excluded_kinds: config.excluded_kinds,
                forwarders: ForwarderOptions {
                    treat_reject_as_unmodified_delivery_failed: config
                        .forwarders
                        .treat_reject_as_unmodified_delivery_failed,
                    use_modified_for_transient_delivery_errors: config
                        .forwarders
                        .use_modified_for_transient_delivery_errors,
                },
            },
            client: ClientOptions {
                call_timeout,
                correlate_requests: config.correlate_requests,
            },
            connector_endpoint: ConnectorEndpoint {
                host: config.forwarders.messaging_host,
                port: config.forwarders.messaging_port.map(|p| p.to_string()),
            },
            address_space: config.address_space,
            poll_interval: config
                .poll_interval_ms
                .map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis),
            retry_delay: config
                .retry_delay_ms
                .map_or(DEFAULT_RETRY_DELAY, Duration::from_millis),
            prom_exporter,
        })
    }
}
