//! Controller session lifecycle.
//!
//! `start_named` builds the shared fabric under the session's
//! `(host_pid, session_id)` names and spawns the drain thread; the agent in
//! the target process then opens the same arenas. `start_in_process` is the
//! single-process variant over anonymous arenas (tests, embedded capture).
//! `shutdown` runs the phased stop and writes `summary.json` next to the
//! per-thread trace directories.

use crate::drain::{DrainConfig, DrainScheduler};
use crate::error::CollectorError;
use crate::metrics::{DrainSummary, SystemMetricsSnapshot};
use crate::shutdown::ShutdownController;
use crate::wake::WakeReceiver;
use ada_trace::{Fabric, FabricConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Colon-separated extra search paths for the agent library, consumed by
/// the spawn/attach front end.
pub const ENV_AGENT_SEARCH_PATHS: &str = "ADA_AGENT_RPATH_SEARCH_PATHS";

/// Search paths from [`ENV_AGENT_SEARCH_PATHS`], in order, empty entries
/// dropped.
pub fn agent_search_paths() -> Vec<PathBuf> {
    std::env::var(ENV_AGENT_SEARCH_PATHS)
        .map(|raw| {
            raw.split(':')
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Everything a session needs up front.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub fabric: FabricConfig,
    pub drain: DrainConfig,
    /// Directory receiving `thread_<tid>/` trace subdirectories.
    pub session_dir: PathBuf,
}

impl SessionConfig {
    /// Default fabric and drain tuning under `session_dir`.
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            fabric: FabricConfig::default(),
            drain: DrainConfig::default(),
            session_dir: session_dir.into(),
        }
    }
}

/// A running capture session on the controller side.
pub struct ControllerSession {
    fabric: Arc<Fabric>,
    shutdown: ShutdownController,
    metrics: Arc<Mutex<SystemMetricsSnapshot>>,
    drain: Option<JoinHandle<DrainSummary>>,
    session_dir: PathBuf,
}

impl ControllerSession {
    /// Creates the named arenas for `(host_pid, session_id)` and starts the
    /// drain. The target's agent opens the same names.
    pub fn start_named(
        config: SessionConfig,
        host_pid: u32,
        session_id: u64,
    ) -> Result<Self, CollectorError> {
        let fabric = Fabric::create_named(config.fabric, host_pid, session_id)?;
        Self::start_with_fabric(fabric, config)
    }

    /// Anonymous-arena session for agent and controller sharing one process.
    pub fn start_in_process(config: SessionConfig) -> Result<Self, CollectorError> {
        let fabric = Fabric::create_anonymous(config.fabric)?;
        Self::start_with_shared_fabric(Arc::new(fabric), config)
    }

    fn start_with_fabric(fabric: Fabric, config: SessionConfig) -> Result<Self, CollectorError> {
        Self::start_with_shared_fabric(Arc::new(fabric), config)
    }

    /// Starts the drain over a fabric constructed elsewhere. The fabric's
    /// geometry wins over `config.fabric`; threads already registered in it
    /// are picked up on the first drain iteration.
    pub fn start_with_shared_fabric(
        fabric: Arc<Fabric>,
        config: SessionConfig,
    ) -> Result<Self, CollectorError> {
        fs::create_dir_all(&config.session_dir)?;
        let (wake_handle, wake_receiver) = WakeReceiver::new()?;
        let requested = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(Mutex::new(SystemMetricsSnapshot::default()));

        let scheduler = DrainScheduler::new(
            Arc::clone(&fabric),
            config.drain,
            config.session_dir.clone(),
            wake_receiver,
            Arc::clone(&requested),
            Arc::clone(&metrics),
        );
        let drain = std::thread::Builder::new()
            .name("ada-drain".into())
            .spawn(move || scheduler.run())?;

        tracing::info!(
            session_dir = %config.session_dir.display(),
            "controller session started"
        );
        Ok(Self {
            fabric,
            shutdown: ShutdownController::new(requested, wake_handle),
            metrics,
            drain: Some(drain),
            session_dir: config.session_dir,
        })
    }

    /// The shared fabric (hand to an in-process agent, or keep alive for
    /// the cross-process agent's benefit).
    pub fn fabric(&self) -> Arc<Fabric> {
        Arc::clone(&self.fabric)
    }

    /// Signal-safe shutdown handle for installation in a signal handler.
    pub fn shutdown_controller(&self) -> ShutdownController {
        self.shutdown.clone()
    }

    /// Latest aggregate metrics published by the drain.
    pub fn metrics_snapshot(&self) -> SystemMetricsSnapshot {
        self.metrics.lock().expect("metrics lock").clone()
    }

    /// Directory holding the per-thread trace files.
    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Phased shutdown: request, join the drain, persist `summary.json`.
    pub fn shutdown(mut self) -> Result<DrainSummary, CollectorError> {
        self.shutdown.request();
        let handle = self.drain.take().ok_or(CollectorError::DrainPanicked)?;
        let summary = handle.join().map_err(|_| CollectorError::DrainPanicked)?;

        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(self.session_dir.join("summary.json"), json)?;
        Ok(summary)
    }
}

impl Drop for ControllerSession {
    fn drop(&mut self) {
        // Best-effort stop if the caller never ran the phased shutdown.
        if let Some(handle) = self.drain.take() {
            self.shutdown.request();
            let _ = handle.join();
        }
    }
}
