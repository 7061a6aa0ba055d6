//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the snapshot store and pipeline from a validated configuration
//! - Start background tasks (active health, config reload, admin API)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Every background task stops on the shared shutdown signal

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::affinity::{AffinityKeyError, KeyProtector};
use crate::config::watcher::ConfigWatcher;
use crate::config::{ConfigError, ProxyConfig};
use crate::health::{ActiveHealthMonitor, HttpProbe};
use crate::http::ProxyPipeline;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::snapshot::SnapshotStore;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("session affinity: {0}")]
    Affinity(#[from] AffinityKeyError),

    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error("admin listener on {address}: {source}")]
    AdminBind {
        address: String,
        source: std::io::Error,
    },
}

/// The running decision core plus its background tasks.
pub struct ProxyRuntime {
    pub store: Arc<SnapshotStore>,
    pub pipeline: Arc<ProxyPipeline>,
    pub admin_address: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
    _watcher: Option<RecommendedWatcher>,
}

impl ProxyRuntime {
    /// Start everything described by `config`. When `config_path` is given
    /// the file is watched and every change is published.
    pub async fn start(
        config: ProxyConfig,
        config_path: Option<&Path>,
        shutdown: &Shutdown,
    ) -> Result<Self, StartupError> {
        if config.observability.metrics_enabled {
            match config.observability.metrics_address.parse() {
                Ok(addr) => metrics::init_metrics(addr),
                Err(_) => tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    "Failed to parse metrics address"
                ),
            }
        }

        let protector = KeyProtector::from_options(&config.session_affinity)?;
        let store = Arc::new(SnapshotStore::from_config(&config)?);
        let pipeline = Arc::new(ProxyPipeline::new(store.clone(), protector));
        let mut tasks = Vec::new();

        let monitor = ActiveHealthMonitor::new(store.clone(), HttpProbe::new(&config.health_check.probe_user_agent));
        tasks.push(tokio::spawn(monitor.run(shutdown.subscribe())));

        let watcher = match config_path {
            Some(path) => {
                let (watcher, updates) = ConfigWatcher::new(path);
                let handle = watcher.run()?;
                tasks.push(tokio::spawn(apply_reloads(
                    store.clone(),
                    updates,
                    path.to_path_buf(),
                    shutdown.subscribe(),
                )));
                Some(handle)
            }
            None => None,
        };

        let mut admin_address = None;
        if config.admin.enabled {
            let listener = TcpListener::bind(&config.admin.bind_address)
                .await
                .map_err(|source| StartupError::AdminBind {
                    address: config.admin.bind_address.clone(),
                    source,
                })?;
            let address = listener.local_addr().ok();
            let router = setup_admin_router(AdminState::new(store.clone(), &config.admin.api_key));
            let mut stop = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                let served = axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = stop.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin server failed");
                }
            }));
            tracing::info!(address = ?address, "Admin API listening");
            admin_address = address;
        }

        Ok(Self {
            store,
            pipeline,
            admin_address,
            tasks,
            _watcher: watcher,
        })
    }

    /// Wait for every background task to finish (after shutdown).
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn apply_reloads(
    store: Arc<SnapshotStore>,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    path: PathBuf,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(config) = update else { break };
                if let Err(e) = store.publish(&config) {
                    tracing::error!(path = ?path, error = %e, "Reloaded configuration rejected");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
