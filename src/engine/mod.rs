//! The reconciliation engine: three cooperating control loops sharing a
//! single mutex-guarded set of in-memory indices plus the state store.

mod cleanup;
mod monitor;
mod problem_scan;
mod slots;
mod state;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::debrid_client::DebridApi;
use crate::library_client::LibraryApi;
use crate::state::StateStore;

pub use state::EngineState;

/// Shared engine handle. All fields are cheaply cloneable so each control
/// loop can own an independent handle to the same underlying state.
#[derive(Clone)]
pub struct Engine {
    config: Arc<Config>,
    library: Arc<dyn LibraryApi>,
    debrid: Arc<dyn DebridApi>,
    state: Arc<Mutex<EngineState>>,
    shutdown: watch::Receiver<bool>,
}

impl Engine {
    pub fn new(config: Arc<Config>, library: Arc<dyn LibraryApi>, debrid: Arc<dyn DebridApi>, store: StateStore, shutdown: watch::Receiver<bool>) -> Self {
        let state = EngineState::new(store);
        info!(
            "restored state: {} trackers, {} downloads, {} processed",
            state.item_trackers.len(),
            state.rd_downloads.len(),
            state.processed_items.len()
        );

        Self {
            config,
            library,
            debrid,
            state: Arc::new(Mutex::new(state)),
            shutdown,
        }
    }

    /// Validate upstream connectivity, then run the three control loops
    /// until shutdown is signalled. Returns once all loops have exited.
    pub async fn run(self) {
        if !self.library.health_check().await {
            error!("cannot connect to the library api");
            return;
        }

        if self.config.skip_rd_validation {
            warn!("skipping debrid validation (SKIP_RD_VALIDATION=true)");
        } else if let Err(e) = self.debrid.get_user().await {
            error!("cannot connect to the debrid api: {}", e);
            return;
        }

        info!("reconciliation engine started, check interval: {}h", self.config.check_interval_hours);

        let problem_scan = tokio::spawn(self.clone().problem_scan_loop());
        let rd_monitor = tokio::spawn(self.clone().rd_monitor_loop());
        let rd_cleanup = tokio::spawn(self.clone().rd_cleanup_loop());

        let _ = tokio::join!(problem_scan, rd_monitor, rd_cleanup);
        info!("reconciliation engine stopped");
    }

    async fn problem_scan_loop(self) {
        loop {
            self.check_problem_items().await;
            self.fill_rd_slots().await;

            info!("next check in {}h", self.config.check_interval_hours);
            if self.interruptible_sleep(self.config.check_interval()).await {
                break;
            }
        }
    }

    async fn rd_monitor_loop(self) {
        loop {
            self.monitor_rd_downloads().await;
            self.fill_rd_slots().await;

            if self.interruptible_sleep(self.config.rd_check_interval()).await {
                break;
            }
        }
    }

    async fn rd_cleanup_loop(self) {
        loop {
            self.cleanup_rd_torrents().await;

            if self.interruptible_sleep(self.config.rd_cleanup_interval()).await {
                break;
            }
        }
    }

    /// Sleep for `duration`, but wake early (returning `true`) if shutdown
    /// has been signalled. Every loop's periodic sleep goes through this
    /// so the scheduler drains promptly on termination.
    async fn interruptible_sleep(&self, duration: Duration) -> bool {
        if *self.shutdown.borrow() {
            return true;
        }
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = shutdown.changed() => true,
        }
    }
}
