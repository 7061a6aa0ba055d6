//! The active snapshot and its publisher.
//!
//! Readers load the current snapshot without locking. Publishers are
//! serialized by a mutex so versions increase strictly and a build always
//! sees the snapshot it replaces.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tokio::sync::watch;

use crate::config::loader::ConfigError;
use crate::config::schema::ProxyConfig;
use crate::observability::metrics;
use crate::snapshot::builder::SnapshotBuilder;
use crate::snapshot::model::ProxySnapshot;

pub struct SnapshotStore {
    current: ArcSwap<ProxySnapshot>,
    publish_lock: Mutex<()>,
    notify: watch::Sender<Arc<ProxySnapshot>>,
}

impl SnapshotStore {
    /// A store holding an empty snapshot (version 0).
    pub fn new() -> Self {
        let empty = Arc::new(ProxySnapshot::default());
        let (notify, _) = watch::channel(empty.clone());
        Self {
            current: ArcSwap::new(empty),
            publish_lock: Mutex::new(()),
            notify,
        }
    }

    /// Build and publish a store from an initial config.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ConfigError> {
        let store = Self::new();
        store.publish(config)?;
        Ok(store)
    }

    /// The snapshot in effect right now.
    pub fn current(&self) -> Arc<ProxySnapshot> {
        self.current.load_full()
    }

    /// Receive every newly published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ProxySnapshot>> {
        self.notify.subscribe()
    }

    /// Validate `config` and swap it in atomically. On error the previous
    /// snapshot stays in effect.
    pub fn publish(&self, config: &ProxyConfig) -> Result<Arc<ProxySnapshot>, ConfigError> {
        let _guard = self.publish_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.current.load_full();
        let version = previous.version() + 1;

        let snapshot = match SnapshotBuilder::new(config, Some(&previous)).build(version) {
            Ok(snapshot) => Arc::new(snapshot),
            Err(errors) => {
                metrics::record_config_publish("rejected");
                tracing::warn!(
                    errors = errors.len(),
                    active_version = previous.version(),
                    "Configuration rejected, keeping previous snapshot"
                );
                return Err(ConfigError::Validation(errors));
            }
        };

        self.current.store(snapshot.clone());
        self.notify.send_replace(snapshot.clone());

        metrics::record_config_publish("accepted");
        metrics::set_snapshot_version(version);
        tracing::info!(
            version,
            routes = snapshot.routes().len(),
            clusters = snapshot.clusters().count(),
            "Configuration snapshot published"
        );
        Ok(snapshot)
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
