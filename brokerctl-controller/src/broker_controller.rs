use brokerctl_client::BrokerManagement;
use brokerctl_core::{AddressResource, Serializer};
use metrics::gauge;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::controller_metrics::{
    MANAGEMENT_PENDING_REQUESTS, MANAGEMENT_REQUESTS_COMPLETED, MANAGEMENT_REQUESTS_MADE,
};
use crate::engine::{EngineConfig, ReconciliationEngine};
use crate::errors::Result;
use crate::events::{ControllerEvent, EventSink};
use crate::stats_collector::{AddressSpaceInfo, StatsCollector};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5000);

/// Combines the reconciliation engine and the stats collector behind one check that the poll
/// timer and desired-state updates both drive.
pub struct BrokerController {
    engine: ReconciliationEngine,
    stats: StatsCollector,
    sink: Arc<dyn EventSink>,
    check_in_progress: AtomicBool,
    busy_count: AtomicU64,
    initialized: AtomicBool,
    ready: AtomicBool,
}

impl BrokerController {
    pub fn new(
        broker: BrokerManagement,
        config: EngineConfig,
        space: AddressSpaceInfo,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        BrokerController {
            engine: ReconciliationEngine::new(broker.clone(), config, sink.clone()),
            stats: StatsCollector::new(broker, space),
            sink,
            check_in_progress: AtomicBool::new(false),
            busy_count: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            ready: AtomicBool::new(false),
        }
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    pub fn id(&self) -> String {
        self.engine.id()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Runs the first check. `ready` is posted by whichever check succeeds first, so a failed
    /// start is recovered by the next check.
    pub async fn start(&self) -> Result<()> {
        self.check_broker_addresses().await
    }

    /// Replaces the desired state and checks the broker against it.
    pub async fn addresses_defined(&self, addresses: Vec<AddressResource>) -> Result<()> {
        self.engine.set_desired(addresses).await;
        self.check_broker_addresses().await
    }

    /// Synchronizes addresses and forwarders, then retrieves and posts the broker stats.
    ///
    /// The budget and the root settings are loaded first, until that succeeds once. Skipped
    /// while another check is running; only initializes before a desired state was defined. A
    /// failed synchronization is returned; a failed stats retrieval is only logged.
    pub async fn check_broker_addresses(&self) -> Result<()> {
        if self.check_in_progress.swap(true, Ordering::SeqCst) {
            let busy = self.busy_count.fetch_add(1, Ordering::SeqCst) + 1;
            if busy % 10 == 0 {
                info!(id = %self.id(), busy, "unable to check broker, check already in progress");
            }
            return Ok(());
        }
        self.busy_count.store(0, Ordering::SeqCst);

        let result = self.check().await;
        self.check_in_progress.store(false, Ordering::SeqCst);
        if result.is_ok() && !self.ready.swap(true, Ordering::SeqCst) {
            info!(id = %self.id(), "broker controller ready");
            self.sink.post(ControllerEvent::Ready);
        }
        result
    }

    async fn check(&self) -> Result<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            self.engine
                .initialize()
                .await
                .inspect_err(|e| error!(id = %self.id(), error = %e, "error initializing"))?;
            self.initialized.store(true, Ordering::SeqCst);
        }
        if self.engine.desired().await.is_none() {
            info!(id = %self.id(), "unable to check broker, addresses not defined");
            return Ok(());
        }
        self.engine
            .sync_addresses_and_forwarders()
            .await
            .inspect_err(|e| error!(id = %self.id(), error = %e, "error syncing addresses"))?;
        self.retrieve_stats().await;
        Ok(())
    }

    /// Posts the address and connection stats; failures are logged.
    pub async fn retrieve_stats(&self) {
        let client = self.engine.broker().client();
        gauge!(MANAGEMENT_REQUESTS_MADE.name).set(client.made() as f64);
        gauge!(MANAGEMENT_REQUESTS_COMPLETED.name).set(client.completed() as f64);
        gauge!(MANAGEMENT_PENDING_REQUESTS.name).set(client.pending_len() as f64);
        match self.stats.retrieve().await {
            Ok(stats) => {
                self.sink
                    .post(ControllerEvent::AddressStatsRetrieved(stats.addresses));
                self.sink
                    .post(ControllerEvent::ConnectionStatsRetrieved(stats.connections));
            }
            Err(e) => {
                error!(id = %self.id(), error = %e, "error retrieving stats");
                client.log_info();
            }
        }
    }

    pub async fn close_connection(&self, connection_id: &str) -> Result<bool> {
        self.engine.close_connection(connection_id).await
    }

    pub async fn close(&self) {
        self.engine.broker().client().close().await;
    }
}

/// Runs a [`BrokerController`] in the background: a timer and desired-state updates both
/// trigger the same serialized check, retried once after `retry_delay` when it fails.
pub struct ControllerDriver {
    controller: Arc<BrokerController>,
    serializer: Arc<Serializer>,
    poller: JoinHandle<()>,
}

impl ControllerDriver {
    pub fn start(controller: Arc<BrokerController>, poll_interval: Duration, retry_delay: Duration) -> Self {
        let checked = controller.clone();
        let serializer = Arc::new(Serializer::spawn("check_broker_addresses", retry_delay, move || {
            let controller = checked.clone();
            async move { controller.check_broker_addresses().await }
        }));

        let ticks = serializer.clone();
        let poller = tokio::spawn(async move {
            let mut timer = interval(poll_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            timer.tick().await;
            loop {
                timer.tick().await;
                ticks.trigger();
            }
        });

        ControllerDriver {
            controller,
            serializer,
            poller,
        }
    }

    pub fn controller(&self) -> &Arc<BrokerController> {
        &self.controller
    }

    /// Replaces the desired state and requests a check.
    pub async fn define_addresses(&self, addresses: Vec<AddressResource>) {
        self.controller.engine().set_desired(addresses).await;
        self.serializer.trigger();
    }

    pub fn trigger(&self) {
        self.serializer.trigger();
    }

    /// Stops polling and closes the management connection.
    pub async fn stop(self) {
        self.poller.abort();
        drop(self.serializer);
        self.controller.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelSink;
    use brokerctl_client::{ClientOptions, MemoryBroker, MemoryQueue};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::sleep;

    fn controller() -> (
        Arc<MemoryBroker>,
        Arc<BrokerController>,
        UnboundedReceiver<ControllerEvent>,
    ) {
        let broker = MemoryBroker::new();
        let management = BrokerManagement::new(broker.client(ClientOptions::default()));
        let (sink, events) = ChannelSink::channel();
        let controller = BrokerController::new(
            management,
            EngineConfig {
                global_max_size: 1024 * 1024,
                ..Default::default()
            },
            AddressSpaceInfo::default(),
            Arc::new(sink),
        );
        (broker, Arc::new(controller), events)
    }

    fn names(events: &mut UnboundedReceiver<ControllerEvent>) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        names
    }

    async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn start_without_addresses_only_reports_ready() {
        let (broker, controller, mut events) = controller();
        controller.start().await.unwrap();

        assert!(controller.is_ready());
        assert_eq!(names(&mut events), vec!["ready"]);
        assert!(!broker
            .calls()
            .iter()
            .any(|(_, operation)| operation == "listQueues"));
    }

    #[tokio::test]
    async fn check_syncs_then_posts_stats() {
        let (broker, controller, mut events) = controller();
        controller.start().await.unwrap();
        names(&mut events);

        controller
            .addresses_defined(vec![AddressResource::queue("q1")])
            .await
            .unwrap();

        assert!(broker.queue("q1").is_some());
        assert_eq!(
            names(&mut events),
            vec![
                "address_create",
                "synchronized",
                "address_stats_retrieved",
                "connection_stats_retrieved"
            ]
        );
    }

    #[tokio::test]
    async fn failed_sync_skips_stats() {
        let (broker, controller, mut events) = controller();
        controller.start().await.unwrap();
        names(&mut events);
        broker.fail_operation("listAddresses", None, "AMQ229000: unavailable");

        let result = controller
            .addresses_defined(vec![AddressResource::queue("q1")])
            .await;

        assert!(result.is_err());
        assert!(names(&mut events).is_empty());
        broker.clear_failures();
        controller.check_broker_addresses().await.unwrap();
        assert!(broker.queue("q1").is_some());
    }

    #[tokio::test]
    async fn failed_start_is_recovered_by_the_driver() {
        let (broker, controller, mut events) = controller();
        broker.fail_operation("getAddressSettingsAsJSON", None, "AMQ229000: unavailable");

        assert!(controller.start().await.is_err());
        assert!(!controller.is_ready());
        assert!(names(&mut events).is_empty());

        broker.clear_failures();
        let driver = ControllerDriver::start(
            controller.clone(),
            Duration::from_millis(50),
            Duration::from_millis(50),
        );
        assert!(eventually(|| controller.is_ready()).await);
        assert_eq!(names(&mut events), vec!["ready"]);

        controller.check_broker_addresses().await.unwrap();
        assert!(names(&mut events).is_empty());
        driver.stop().await;
    }

    #[tokio::test]
    async fn driver_checks_on_definition_and_on_timer() {
        let (broker, controller, _events) = controller();
        controller.start().await.unwrap();
        let driver = ControllerDriver::start(
            controller,
            Duration::from_millis(50),
            Duration::from_millis(50),
        );

        driver
            .define_addresses(vec![AddressResource::queue("q1")])
            .await;
        assert!(eventually(|| broker.queue("q1").is_some()).await);

        broker.insert_queue(MemoryQueue {
            name: "stray".to_string(),
            address: "stray".to_string(),
            routing_type: "ANYCAST".to_string(),
            durable: true,
            max_consumers: -1,
            ..Default::default()
        });
        assert!(eventually(|| broker.queue("stray").is_none()).await);

        driver.stop().await;
    }
}
