// Source policy hot reload
// SIGHUP re-reads the config file and swaps in the new allow-list without
// dropping connections. Other settings require a restart.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::gateway::ImageGateway;
use crate::policy::SourcePolicy;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// ReloadManager handles policy reload via SIGHUP signal
pub struct ReloadManager {
    config_path: PathBuf,
    reload_requested: Arc<AtomicBool>,
}

impl ReloadManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_path,
            reload_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register SIGHUP signal handler that sets the reload flag
    #[cfg(unix)]
    pub fn register_signal_handler(&self) -> Result<(), String> {
        use signal_hook::consts::SIGHUP;
        use signal_hook::flag;

        flag::register(SIGHUP, Arc::clone(&self.reload_requested))
            .map_err(|e| format!("Failed to register SIGHUP handler: {}", e))?;

        Ok(())
    }

    pub fn is_reload_requested(&self) -> bool {
        self.reload_requested.load(Ordering::Relaxed)
    }

    /// Mark a reload as requested, as SIGHUP does
    pub fn request_reload(&self) {
        self.reload_requested.store(true, Ordering::Relaxed);
    }

    /// Atomically read and clear the reload flag
    fn take_reload_request(&self) -> bool {
        self.reload_requested.swap(false, Ordering::Relaxed)
    }

    /// Load and validate the config file, then build its source policy.
    /// Nothing is applied when any step fails.
    pub fn load_policy(&self) -> Result<SourcePolicy, String> {
        let config = Config::from_file(&self.config_path)?;
        config.validate()?;
        SourcePolicy::from_config(&config.policy).map_err(|e| e.to_string())
    }

    /// Apply a pending reload to `gateway`. Returns whether a reload ran.
    pub fn poll(&self, gateway: &ImageGateway) -> bool {
        if !self.take_reload_request() {
            return false;
        }

        match self.load_policy() {
            Ok(policy) => gateway.reload_policy(policy),
            Err(e) => tracing::error!(
                config_file = %self.config_path.display(),
                error = %e,
                "Policy reload failed, keeping current policy"
            ),
        }
        true
    }

    /// Watch for reload requests on a background thread
    pub fn spawn_watcher(self: Arc<Self>, gateway: Arc<ImageGateway>) -> thread::JoinHandle<()> {
        thread::spawn(move || loop {
            self.poll(&gateway);
            thread::sleep(POLL_INTERVAL);
        })
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }
}
