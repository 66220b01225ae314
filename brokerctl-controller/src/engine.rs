use brokerctl_client::{BrokerManagement, Routing};
use brokerctl_core::{
    description, AddressKind, AddressResource, AddressSettings, Changes, ConnectorDefinition,
    Limiter,
};
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::controller_metrics::{
    ADDRESSES_CREATED_TOTAL, ADDRESSES_DELETED_TOTAL, ADDRESSES_MISSING, ADDRESSES_STALE,
    ADDRESS_FAILURES_TOTAL, SETTINGS_APPLIED_TOTAL, SYNC_FAILURES_TOTAL, SYNC_PASSES_TOTAL,
};
use crate::desired_state::DesiredState;
use crate::errors::{ControllerError, Result};
use crate::events::{ControllerEvent, EventSink};
use crate::forwarders::{desired_connectors, sync_forwarders, ForwarderOptions};
use crate::settings_synthesis::generate_address_settings;
use crate::translate::translate;

/// Root address settings match.
pub const ROOT_MATCH: &str = "#";

/// Tuning of the [`ReconciliationEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Memory budget shared out by address policies. Zero or less pulls it from the broker.
    pub global_max_size: i64,
    pub concurrency_limit: usize,
    /// Address kinds this controller leaves alone.
    pub excluded_kinds: Vec<AddressKind>,
    pub forwarders: ForwarderOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            global_max_size: 0,
            concurrency_limit: brokerctl_core::DEFAULT_CONCURRENCY,
            excluded_kinds: Vec::new(),
            forwarders: ForwarderOptions::default(),
        }
    }
}

/// Outcome of one synchronization pass, counted before any change was made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub stale: usize,
    pub missing: usize,
}

impl SyncReport {
    pub fn is_synchronized(&self) -> bool {
        self.stale == 0 && self.missing == 0
    }
}

/// Keeps the broker's addresses, address settings and forwarders in line with the desired state.
///
/// Only one pass is expected to run at a time; the desired state and the root settings are
/// snapshotted at the start of a pass.
pub struct ReconciliationEngine {
    broker: BrokerManagement,
    sink: Arc<dyn EventSink>,
    limiter: Limiter,
    excluded_kinds: Vec<AddressKind>,
    forwarder_options: ForwarderOptions,
    desired: RwLock<Option<Arc<DesiredState>>>,
    root_settings: RwLock<AddressSettings>,
    global_max_size: AtomicI64,
    synchronized: AtomicBool,
}

impl ReconciliationEngine {
    pub fn new(broker: BrokerManagement, config: EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        ReconciliationEngine {
            broker,
            sink,
            limiter: Limiter::new(config.concurrency_limit),
            excluded_kinds: config.excluded_kinds,
            forwarder_options: config.forwarders,
            desired: RwLock::new(None),
            root_settings: RwLock::new(AddressSettings::new()),
            global_max_size: AtomicI64::new(config.global_max_size),
            synchronized: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> String {
        self.broker.id()
    }

    pub fn broker(&self) -> &BrokerManagement {
        &self.broker
    }

    /// Pulls the memory budget from the broker when none is configured, then loads the root
    /// address settings. A failure to pull the budget is only logged.
    pub async fn initialize(&self) -> Result<()> {
        self.initialize_global_max_size().await;
        self.load_root_settings().await?;
        Ok(())
    }

    async fn initialize_global_max_size(&self) {
        if self.global_max_size() > 0 {
            return;
        }
        match self.broker.get_global_max_size().await {
            Ok(size) => {
                info!(id = %self.id(), global_max_size = size, "global_max_size pulled from broker");
                // the broker reports half the JVM heap; addresses share half of that
                self.global_max_size.store(size / 2, Ordering::SeqCst);
            }
            Err(e) => error!(id = %self.id(), error = %e, "failed to get global_max_size from the broker"),
        }
    }

    pub async fn load_root_settings(&self) -> Result<AddressSettings> {
        let root = self
            .broker
            .get_address_settings(ROOT_MATCH)
            .await
            .inspect_err(|e| error!(id = %self.id(), error = %e, "failed to get root settings"))?;
        *self.root_settings.write().await = root.clone();
        Ok(root)
    }

    pub async fn root_settings(&self) -> AddressSettings {
        self.root_settings.read().await.clone()
    }

    pub fn global_max_size(&self) -> i64 {
        self.global_max_size.load(Ordering::SeqCst)
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::SeqCst)
    }

    /// Replaces the desired state; takes effect on the next pass.
    pub async fn set_desired(&self, addresses: Vec<AddressResource>) {
        let desired = DesiredState::from_list(addresses);
        debug!(id = %self.id(), addresses = desired.len(), "desired state defined");
        *self.desired.write().await = Some(Arc::new(desired));
    }

    pub async fn desired(&self) -> Option<Arc<DesiredState>> {
        self.desired.read().await.clone()
    }

    /// Settings override for `address`, `None` when it should inherit the root settings.
    pub fn generate_address_settings(
        &self,
        root: &AddressSettings,
        address: &AddressResource,
    ) -> Option<AddressSettings> {
        let global_max_size = self.global_max_size();
        if global_max_size <= 0 {
            debug!("no global max, therefore not applying address settings");
            return None;
        }
        generate_address_settings(root, address, global_max_size)
    }

    /// Synchronizes addresses, then forwarders.
    pub async fn sync_addresses_and_forwarders(&self) -> Result<SyncReport> {
        let report = self.synchronize().await?;
        self.sync_forwarders().await?;
        Ok(report)
    }

    /// Runs a synchronization pass and re-runs it once to pick up what the first pass could not
    /// settle. Returns the report of the second pass.
    pub async fn synchronize(&self) -> Result<SyncReport> {
        let desired = self.desired().await.ok_or(ControllerError::NoDesiredState)?;
        let root = self.root_settings().await;
        self.sync_pass(&desired, &root).await?;
        self.sync_pass(&desired, &root).await
    }

    async fn sync_pass(&self, desired: &DesiredState, root: &AddressSettings) -> Result<SyncReport> {
        let id = self.id();
        counter!(SYNC_PASSES_TOTAL.name).increment(1);
        let index = self.broker.address_index(false, false).await.map_err(|e| {
            counter!(SYNC_FAILURES_TOTAL.name).increment(1);
            error!(%id, error = %e, "failed to retrieve addresses");
            e
        })?;

        let actual = translate(&index, desired, &self.excluded_kinds);
        let stale: Vec<AddressResource> = actual
            .values()
            .filter(|a| !desired.contains(&a.name, a.kind))
            .map(|a| a.to_resource())
            .collect();
        let missing: Vec<AddressResource> = desired
            .iter()
            .filter(|d| !self.excluded_kinds.contains(&d.kind))
            .filter(|d| actual.get(&d.address).map_or(true, |a| a.kind != d.kind))
            .cloned()
            .collect();
        debug!(
            %id,
            desired = desired.len(),
            actual = actual.len(),
            delete = %description(&stale, |a| a.address.clone()),
            create = %description(&missing, |a| a.address.clone()),
            "checking addresses"
        );
        let report = SyncReport {
            stale: stale.len(),
            missing: missing.len(),
        };
        self.set_sync_status(report);

        self.sync_address_settings(desired, root).await;

        self.limiter
            .run(&stale, |a| self.delete_address_and_settings(a))
            .await;
        let (subscriptions, others): (Vec<_>, Vec<_>) = missing
            .iter()
            .partition(|a| a.kind == AddressKind::Subscription);
        self.limiter.run(others, |a| self.create_address(a)).await;
        self.limiter.run(subscriptions, |a| self.create_address(a)).await;

        Ok(report)
    }

    fn set_sync_status(&self, report: SyncReport) {
        gauge!(ADDRESSES_STALE.name).set(report.stale as f64);
        gauge!(ADDRESSES_MISSING.name).set(report.missing as f64);
        let synchronized = report.is_synchronized();
        if self.synchronized.swap(synchronized, Ordering::SeqCst) == synchronized {
            return;
        }
        if synchronized {
            info!(id = %self.id(), "addresses are synchronized");
            self.sink.post(ControllerEvent::Synchronized);
        } else {
            info!(
                id = %self.id(),
                delete = report.stale,
                create = report.missing,
                "addresses synchronizing"
            );
            self.sink.post(ControllerEvent::Desynchronized {
                stale: report.stale,
                missing: report.missing,
            });
        }
    }

    /// Brings the settings override of every desired address in line. Failures are logged and
    /// do not stop the pass.
    async fn sync_address_settings(&self, desired: &DesiredState, root: &AddressSettings) {
        let addresses: Vec<&AddressResource> = desired
            .iter()
            .filter(|a| !self.excluded_kinds.contains(&a.kind))
            .collect();
        let results = self
            .limiter
            .run(addresses, |a| self.update_address_settings(a, root))
            .await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            error!(id = %self.id(), failed, "address settings not synchronized");
        }
    }

    /// Applies the synthesized override of `address` when it differs from what the broker has.
    ///
    /// An address that no longer needs an override first gets the root settings applied, then its
    /// record removed; the removal is attempted even when applying the root settings failed.
    pub async fn update_address_settings(
        &self,
        address: &AddressResource,
        root: &AddressSettings,
    ) -> Result<()> {
        let id = self.id();
        let name = address.address.as_str();
        let current = self.broker.get_address_settings(name).await.inspect_err(|e| {
            error!(%id, address = %name, error = %e, "failed to retrieve broker address setting")
        })?;

        match self.generate_address_settings(root, address) {
            Some(settings) if settings != current => {
                info!(
                    %id,
                    address = %name,
                    changed = ?settings.differing_keys(&current),
                    "adding/updating address settings"
                );
                self.broker
                    .add_address_settings(name, &settings)
                    .await
                    .inspect_err(|e| error!(%id, address = %name, error = %e, "failed to apply address settings"))?;
                counter!(SETTINGS_APPLIED_TOTAL.name, "operation" => "apply").increment(1);
            }
            Some(_) => debug!(%id, address = %name, "address settings match, not updating"),
            None if current != *root => {
                info!(%id, address = %name, "removing address settings");
                let reset = self.broker.add_address_settings(name, root).await;
                let removed = self.broker.remove_address_settings(name).await;
                reset.and(removed).inspect_err(|e| {
                    error!(%id, address = %name, error = %e, "failed to remove address settings")
                })?;
                counter!(SETTINGS_APPLIED_TOTAL.name, "operation" => "remove").increment(1);
            }
            None => {}
        }
        Ok(())
    }

    /// Removes the settings override of `address` (a failure is only logged), then deletes it.
    pub async fn delete_address_and_settings(&self, address: &AddressResource) {
        let id = self.id();
        debug!(%id, address = %address.address, "deleting address-settings");
        match self.broker.remove_address_settings(&address.address).await {
            Ok(()) => debug!(%id, address = %address.address, "deleted address-settings"),
            Err(e) => error!(
                %id,
                address = %address.address,
                error = %e,
                "failed to delete address setting"
            ),
        }
        self.delete_address(address).await;
    }

    /// Deletes `address` the way its kind requires and reports the outcome to the sink.
    ///
    /// Queue-like addresses fall back to deleting the address when destroying the queue fails.
    /// Topics lose their bound queues before the address; subscriptions are just their queue.
    pub async fn delete_address(&self, address: &AddressResource) {
        let id = self.id();
        let name = address.address.as_str();
        let kind = address.kind;
        info!(%id, %kind, address = %name, "deleting");

        let outcome = match kind {
            AddressKind::Queue | AddressKind::DeadLetter => match self.broker.destroy_queue(name).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    error!(%id, %kind, address = %name, error = %e, "failed to delete queue, deleting address");
                    self.broker.delete_address(name).await
                }
            },
            AddressKind::Topic => self.broker.delete_address_and_bindings(name).await,
            AddressKind::Subscription => self.broker.destroy_queue(name).await,
        };

        match outcome {
            Ok(()) => {
                info!(%id, %kind, address = %name, "deleted");
                counter!(ADDRESSES_DELETED_TOTAL.name, "kind" => kind.as_str()).increment(1);
                self.sink.post(ControllerEvent::AddressDelete(address.clone()));
            }
            Err(e) => {
                error!(%id, %kind, address = %name, error = %e, "failed to delete");
                counter!(ADDRESS_FAILURES_TOTAL.name, "operation" => "delete").increment(1);
                self.sink.post(ControllerEvent::AddressFailedDelete {
                    address: address.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Creates `address` and reports the outcome to the sink.
    pub async fn create_address(&self, address: &AddressResource) {
        let id = self.id();
        let name = address.address.as_str();
        let kind = address.kind;

        let outcome = match kind {
            AddressKind::Queue | AddressKind::DeadLetter => {
                info!(%id, %kind, address = %name, "creating");
                self.broker.create_queue(name).await
            }
            AddressKind::Topic => {
                info!(%id, %kind, address = %name, "creating");
                self.broker.create_address(name, &[Routing::Multicast]).await
            }
            AddressKind::Subscription => {
                let topic = address.topic.as_deref().unwrap_or_default();
                let max_consumers = address.max_consumers();
                info!(%id, %kind, address = %name, %topic, max_consumers, "creating");
                self.broker
                    .create_subscription(name, topic, max_consumers)
                    .await
            }
        };

        match outcome {
            Ok(()) => {
                info!(%id, %kind, address = %name, "created");
                counter!(ADDRESSES_CREATED_TOTAL.name, "kind" => kind.as_str()).increment(1);
                self.sink.post(ControllerEvent::AddressCreate(address.clone()));
            }
            Err(e) => {
                error!(%id, %kind, address = %name, error = %e, "failed to create");
                counter!(ADDRESS_FAILURES_TOTAL.name, "operation" => "create").increment(1);
                self.sink.post(ControllerEvent::AddressFailedCreate {
                    address: address.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Creates and destroys forwarder connectors to match the desired state.
    pub async fn sync_forwarders(&self) -> Result<Changes<ConnectorDefinition>> {
        let desired = self.desired().await.ok_or(ControllerError::NoDesiredState)?;
        let connectors = desired_connectors(&desired, self.forwarder_options);
        sync_forwarders(&self.broker, &connectors).await
    }

    /// Closes a client connection reported in the connection stats.
    pub async fn close_connection(&self, connection_id: &str) -> Result<bool> {
        info!(id = %self.id(), connection = %connection_id, "closing connection");
        Ok(self.broker.close_connection(connection_id).await?)
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;
