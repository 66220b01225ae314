use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

pub(crate) struct Metric {
    pub name: &'static str,
    description: &'static str,
}

pub(crate) const COUNTERS: [Metric; 8] = [
    ADDRESSES_CREATED_TOTAL,
    ADDRESSES_DELETED_TOTAL,
    ADDRESS_FAILURES_TOTAL,
    SYNC_PASSES_TOTAL,
    SYNC_FAILURES_TOTAL,
    SETTINGS_APPLIED_TOTAL,
    CONNECTORS_CHANGED_TOTAL,
    STATS_RETRIEVALS_TOTAL,
];
pub(crate) const GAUGES: [Metric; 5] = [
    ADDRESSES_STALE,
    ADDRESSES_MISSING,
    MANAGEMENT_REQUESTS_MADE,
    MANAGEMENT_REQUESTS_COMPLETED,
    MANAGEMENT_PENDING_REQUESTS,
];

// SYNC Metrics --------------------------

pub(crate) const ADDRESSES_CREATED_TOTAL: Metric = Metric {
    name: "brokerctl_addresses_created_total",
    description: "Total number of addresses created on the broker",
};

pub(crate) const ADDRESSES_DELETED_TOTAL: Metric = Metric {
    name: "brokerctl_addresses_deleted_total",
    description: "Total number of addresses deleted from the broker",
};

pub(crate) const ADDRESS_FAILURES_TOTAL: Metric = Metric {
    name: "brokerctl_address_failures_total",
    description: "Total number of failed address create or delete operations",
};

pub(crate) const SYNC_PASSES_TOTAL: Metric = Metric {
    name: "brokerctl_sync_passes_total",
    description: "Total number of address synchronization passes",
};

pub(crate) const SYNC_FAILURES_TOTAL: Metric = Metric {
    name: "brokerctl_sync_failures_total",
    description: "Total number of synchronization passes aborted by an error",
};

pub(crate) const SETTINGS_APPLIED_TOTAL: Metric = Metric {
    name: "brokerctl_address_settings_applied_total",
    description: "Total number of address settings records added, updated or removed",
};

pub(crate) const CONNECTORS_CHANGED_TOTAL: Metric = Metric {
    name: "brokerctl_connectors_changed_total",
    description: "Total number of forwarder connector services created or destroyed",
};

pub(crate) const ADDRESSES_STALE: Metric = Metric {
    name: "brokerctl_addresses_stale",
    description: "Addresses present on the broker but absent from the desired state",
};

pub(crate) const ADDRESSES_MISSING: Metric = Metric {
    name: "brokerctl_addresses_missing",
    description: "Addresses of the desired state not yet present on the broker",
};

// STATS Metrics --------------------------

pub(crate) const STATS_RETRIEVALS_TOTAL: Metric = Metric {
    name: "brokerctl_stats_retrievals_total",
    description: "Total number of broker stats retrievals",
};

pub(crate) const MANAGEMENT_REQUESTS_MADE: Metric = Metric {
    name: "brokerctl_management_requests_made",
    description: "Management requests submitted on the current connection",
};

pub(crate) const MANAGEMENT_REQUESTS_COMPLETED: Metric = Metric {
    name: "brokerctl_management_requests_completed",
    description: "Management requests answered or aborted on the current connection",
};

pub(crate) const MANAGEMENT_PENDING_REQUESTS: Metric = Metric {
    name: "brokerctl_management_pending_requests",
    description: "Management requests waiting for a reply",
};

/// Registers the controller metrics, installing the Prometheus exporter when an address is given.
pub fn init_metrics(prom_addr: Option<std::net::SocketAddr>) {
    info!("initializing metrics exporter");

    if let Some(addr) = prom_addr {
        if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
            error!(%addr, error = %e, "failed to install Prometheus recorder");
        }
    }

    for name in COUNTERS {
        register_counter(name)
    }

    for name in GAUGES {
        register_gauge(name)
    }
}

fn register_counter(metric: Metric) {
    metrics::describe_counter!(metric.name, metric.description);
    let _counter = metrics::counter!(metric.name);
}

fn register_gauge(metric: Metric) {
    metrics::describe_gauge!(metric.name, metric.description);
    let _gauge = metrics::gauge!(metric.name);
}
