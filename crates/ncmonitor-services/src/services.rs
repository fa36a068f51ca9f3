//! Service container
//!
//! Single entry point for the binary. Owns the settings, the shared HTTP
//! client and the snapshot store; everything else is built from these.

use std::sync::Arc;

use ncmonitor_core::{now_ms, status_line, MonitorSettings, ServerConfig, ServerState};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config_loader::{load_server_configs, ConfigLoaderError, ConfigScan};
use crate::scheduler::{CycleSummary, PollScheduler};
use crate::{MetricsClient, SnapshotStore};

pub struct Services {
    pub settings: MonitorSettings,
    pub client: MetricsClient,
    pub store: SnapshotStore,
}

impl Services {
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            settings,
            client: MetricsClient::new(),
            store: SnapshotStore::new(),
        }
    }

    /// Scan the configured directory for server config files
    pub fn discover_servers(&self) -> Result<ConfigScan, ConfigLoaderError> {
        load_server_configs(&self.settings.config_dir, &self.settings.pattern)
    }

    /// Scheduler polling `servers` into this container's store
    pub fn scheduler(&self, servers: Vec<ServerConfig>) -> PollScheduler {
        PollScheduler::new(self.client.clone(), self.store.clone(), servers)
            .with_interval(self.settings.poll_interval())
            .with_timeout(self.settings.request_timeout())
    }

    /// Poll `servers` once without starting the loop
    pub async fn poll_once(&self, servers: Vec<ServerConfig>) -> CycleSummary {
        let (events, _) = mpsc::unbounded_channel();
        self.scheduler(servers)
            .run_cycle(1, &CancellationToken::new(), &events)
            .await
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::new(MonitorSettings::default())
    }
}

// =============================================================================
// Store facade methods - the binary reads state through these
// =============================================================================

impl Services {
    pub fn server_state(&self, name: &str) -> Option<Arc<ServerState>> {
        self.store.get(name)
    }

    /// States for `servers`, in the given order; `None` until first polled
    pub fn server_states<'a>(
        &self,
        servers: &'a [ServerConfig],
    ) -> Vec<(&'a ServerConfig, Option<Arc<ServerState>>)> {
        servers
            .iter()
            .map(|server| (server, self.store.get(&server.name)))
            .collect()
    }

    pub fn status_line(&self, name: &str) -> Option<String> {
        self.store
            .get(name)
            .map(|state| status_line(&state, self.settings.poll_interval(), now_ms()))
    }

    pub fn connected_count(&self) -> usize {
        self.store
            .all()
            .iter()
            .filter(|(_, state)| state.is_connected())
            .count()
    }
}
