use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use chrono::Utc;
use tokio::process::{Child, Command};
use tokio::time::{interval, sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{PortsConfig, StartupConfig};
use crate::fleet::types::{ServerHandle, ServerState, StartupError};
use crate::inference::{TierEndpoint, TierEndpoints};
use crate::registry::{ModelEntry, ModelRegistry, Tier};

/// Interval between health probes while a server is starting up.
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(300);
/// Timeout for a single health probe request.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// One managed subprocess: its status record plus the OS process handle.
/// The process is taken out on stop and left in place otherwise so crash
/// detection can poll it.
struct ManagedServer {
    handle: ServerHandle,
    process: Option<Child>,
}

/// Outcome of one fleet startup pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct FleetSummary {
    /// Servers that reached ready
    pub started: usize,
    /// Servers that failed to start
    pub failed: usize,
    /// Enabled models skipped because they already had an active handle
    pub skipped: usize,
}

/// Spawns and supervises one llama-server process per enabled model.
///
/// The handle table is the single owner of lifecycle state; every
/// transition goes through its write lock, and the lock is never held
/// across an await. Startup of multiple servers runs concurrently with
/// independent failures: one model failing to load never blocks or cancels
/// the others.
pub struct FleetManager {
    binary: PathBuf,
    registry: Arc<ModelRegistry>,
    ports: PortsConfig,
    startup: StartupConfig,
    client: reqwest::Client,
    servers: RwLock<HashMap<String, ManagedServer>>,
}

impl FleetManager {
    pub fn new(
        binary: PathBuf,
        registry: Arc<ModelRegistry>,
        ports: PortsConfig,
        startup: StartupConfig,
    ) -> Self {
        Self {
            binary,
            registry,
            ports,
            startup,
            client: reqwest::Client::new(),
            servers: RwLock::new(HashMap::new()),
        }
    }

    /// Starts a server for every enabled model that does not already have
    /// an active handle. Startups run concurrently and are joined before
    /// the summary is returned; each failure is independent. Models whose
    /// handle sits in `error` or `stopped` are started fresh, which is the
    /// explicit-restart path out of the error state.
    pub async fn start_fleet(&self) -> FleetSummary {
        let mut summary = FleetSummary::default();

        let mut entries: Vec<ModelEntry> = Vec::new();
        for tier in Tier::ALL {
            match self.registry.enabled_for_tier(tier) {
                Ok(mut models) => entries.append(&mut models),
                Err(e) => error!("Failed to read registry for tier {}: {}", tier, e),
            }
        }

        let mut to_start = Vec::new();
        let mut reserved = HashSet::new();
        for entry in entries {
            if self.is_active(&entry.model_id) {
                summary.skipped += 1;
                continue;
            }
            match self.allocate_port(&reserved) {
                Ok(port) => {
                    reserved.insert(port);
                    to_start.push((entry, port));
                }
                Err(e) => {
                    error!("Cannot start server for {}: {}", entry.model_id, e);
                    summary.failed += 1;
                }
            }
        }

        if to_start.is_empty() {
            info!("Fleet startup: nothing to start");
            return summary;
        }

        info!("Starting {} server(s) concurrently", to_start.len());
        let starts = to_start.iter().map(|(entry, port)| async move {
            (entry.model_id.clone(), self.start_model(entry, *port).await)
        });
        for (model_id, result) in futures::future::join_all(starts).await {
            match result {
                Ok(()) => summary.started += 1,
                Err(e) => {
                    error!("Server for {} failed to start: {}", model_id, e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Fleet startup complete: {} ready, {} failed, {} already running",
            summary.started, summary.failed, summary.skipped
        );
        summary
    }

    /// Spawns one server and waits for it to report healthy.
    ///
    /// The handle is inserted in `starting` state before the process is
    /// polled so operators see in-flight startups, and transitions to
    /// `ready` or `error` from there.
    pub async fn start_model(&self, entry: &ModelEntry, port: u16) -> Result<(), StartupError> {
        if !self.binary.exists() {
            return Err(StartupError::BinaryMissing(self.binary.clone()));
        }
        let model_path = self.registry.model_path(entry);
        if !model_path.exists() {
            return Err(StartupError::ModelFileMissing(model_path));
        }

        // A stale process from outside the fleet may still own the port;
        // probing up front turns that into a clean error instead of a
        // confusing startup timeout.
        if std::net::TcpListener::bind(("127.0.0.1", port)).is_err() {
            return Err(StartupError::PortInUse(port));
        }

        info!(
            "Starting server for model {} (tier {}) on port {}",
            entry.model_id, entry.tier, port
        );

        let mut command = Command::new(&self.binary);
        command
            .arg("--model")
            .arg(&model_path)
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .arg("--ctx-size")
            .arg(entry.runtime.context_size.to_string())
            .arg("--n-gpu-layers")
            .arg(entry.runtime.gpu_layers.to_string())
            .arg("--batch-size")
            .arg(entry.runtime.batch_size.to_string());
        if let Some(threads) = entry.runtime.threads {
            command.arg("--threads").arg(threads.to_string());
        }
        if entry.runtime.flash_attention {
            command.arg("--flash-attn");
        }
        if !entry.runtime.mmap {
            command.arg("--no-mmap");
        }
        command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let process = command
            .spawn()
            .map_err(|e| StartupError::SpawnFailed(e.to_string()))?;

        self.insert_handle(entry, port, process);

        match self.wait_ready(&entry.model_id, port).await {
            Ok(()) => {
                self.set_state(&entry.model_id, ServerState::Ready, true);
                if let Err(e) = self.registry.set_assigned_port(&entry.model_id, Some(port)) {
                    warn!("Could not record port for {}: {}", entry.model_id, e);
                }
                info!("Server for {} is ready on port {}", entry.model_id, port);
                Ok(())
            }
            Err(e) => {
                self.kill_process(&entry.model_id).await;
                self.set_state(&entry.model_id, ServerState::Error, false);
                Err(e)
            }
        }
    }

    /// Stops a server and marks its handle `stopped`.
    pub async fn stop(&self, model_id: &str) -> Result<(), StartupError> {
        let exists = {
            let servers = self.servers.read().unwrap_or_else(|e| e.into_inner());
            servers.contains_key(model_id)
        };
        if !exists {
            return Err(StartupError::HandleNotFound(model_id.to_string()));
        }

        self.kill_process(model_id).await;
        self.set_state(model_id, ServerState::Stopped, false);
        if let Err(e) = self.registry.set_assigned_port(model_id, None) {
            warn!("Could not clear port for {}: {}", model_id, e);
        }
        info!("Stopped server for model {}", model_id);
        Ok(())
    }

    /// Stops every active server.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = {
            let servers = self.servers.read().unwrap_or_else(|e| e.into_inner());
            servers
                .values()
                .filter(|s| is_active_state(s.handle.state))
                .map(|s| s.handle.model_id.clone())
                .collect()
        };
        for id in ids {
            if let Err(e) = self.stop(&id).await {
                warn!("Failed to stop server for {}: {}", id, e);
            }
        }
    }

    /// Runs one steady-state health pass over the fleet.
    ///
    /// Ready servers that fail their probe, or whose process has exited,
    /// transition to `error` and stay there until explicitly restarted.
    /// With zero active handles the pass is a no-op; the loop must idle
    /// cleanly on an empty fleet.
    pub async fn poll_health(&self) {
        let targets: Vec<(String, u16)> = {
            let servers = self.servers.read().unwrap_or_else(|e| e.into_inner());
            servers
                .values()
                .filter(|s| s.handle.state == ServerState::Ready)
                .map(|s| (s.handle.model_id.clone(), s.handle.port))
                .collect()
        };

        if targets.is_empty() {
            debug!("Health poll: no ready servers");
            return;
        }

        for (model_id, port) in targets {
            let healthy = self.probe(port).await;

            let mut servers = self.servers.write().unwrap_or_else(|e| e.into_inner());
            let Some(server) = servers.get_mut(&model_id) else {
                continue;
            };
            if server.handle.state != ServerState::Ready {
                continue;
            }
            server.handle.last_health_check = Some(Utc::now());

            let exited = server
                .process
                .as_mut()
                .and_then(|p| p.try_wait().ok().flatten())
                .is_some();
            if exited {
                warn!("Server for {} exited; marking handle as errored", model_id);
                server.handle.state = ServerState::Error;
            } else if !healthy {
                warn!("Health check failed for {}; marking handle as errored", model_id);
                server.handle.state = ServerState::Error;
            }
        }
    }

    /// Polls the fleet's health on the configured interval, forever. Run
    /// this on its own task.
    pub async fn run_health_loop(self: Arc<Self>) {
        let period = Duration::from_secs_f64(self.startup.health_poll_seconds);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_health().await;
        }
    }

    /// Current state of every handle, sorted by model id.
    pub fn status(&self) -> Vec<ServerHandle> {
        let servers = self.servers.read().unwrap_or_else(|e| e.into_inner());
        let mut handles: Vec<ServerHandle> = servers.values().map(|s| s.handle.clone()).collect();
        handles.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        handles
    }

    /// Whether the model has a handle in `starting` or `ready` state.
    fn is_active(&self, model_id: &str) -> bool {
        let servers = self.servers.read().unwrap_or_else(|e| e.into_inner());
        servers
            .get(model_id)
            .map_or(false, |s| is_active_state(s.handle.state))
    }

    /// Finds the lowest free port in the configured range, skipping ports
    /// held by active handles and ports already reserved this pass.
    fn allocate_port(&self, reserved: &HashSet<u16>) -> Result<u16, StartupError> {
        let servers = self.servers.read().unwrap_or_else(|e| e.into_inner());
        let in_use: HashSet<u16> = servers
            .values()
            .filter(|s| is_active_state(s.handle.state))
            .map(|s| s.handle.port)
            .collect();

        (self.ports.range_start..=self.ports.range_end)
            .find(|port| !in_use.contains(port) && !reserved.contains(port))
            .ok_or(StartupError::PortExhausted)
    }

    fn insert_handle(&self, entry: &ModelEntry, port: u16, process: Child) {
        let mut servers = self.servers.write().unwrap_or_else(|e| e.into_inner());
        servers.insert(
            entry.model_id.clone(),
            ManagedServer {
                handle: ServerHandle {
                    model_id: entry.model_id.clone(),
                    tier: entry.tier,
                    port,
                    state: ServerState::Starting,
                    started_at: Utc::now(),
                    last_health_check: None,
                },
                process: Some(process),
            },
        );
    }

    fn set_state(&self, model_id: &str, state: ServerState, touch_health: bool) {
        let mut servers = self.servers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(server) = servers.get_mut(model_id) {
            server.handle.state = state;
            if touch_health {
                server.handle.last_health_check = Some(Utc::now());
            }
        }
    }

    /// Kills and reaps a handle's process, if one is still attached.
    async fn kill_process(&self, model_id: &str) {
        let process = {
            let mut servers = self.servers.write().unwrap_or_else(|e| e.into_inner());
            servers.get_mut(model_id).and_then(|s| s.process.take())
        };
        if let Some(mut child) = process {
            if child.start_kill().is_ok() {
                let _ = child.wait().await;
            }
        }
    }

    /// Polls the spawned server until it answers its health endpoint or the
    /// startup deadline passes. An early process exit fails immediately.
    async fn wait_ready(&self, model_id: &str, port: u16) -> Result<(), StartupError> {
        let deadline = Instant::now() + Duration::from_secs_f64(self.startup.max_startup_seconds);

        loop {
            let exited = {
                let mut servers = self.servers.write().unwrap_or_else(|e| e.into_inner());
                servers
                    .get_mut(model_id)
                    .and_then(|s| s.process.as_mut())
                    .and_then(|p| p.try_wait().ok().flatten())
                    .is_some()
            };
            if exited {
                return Err(StartupError::ProcessExited {
                    model_id: model_id.to_string(),
                });
            }

            if self.probe(port).await {
                return Ok(());
            }

            if Instant::now() + STARTUP_POLL_INTERVAL > deadline {
                return Err(StartupError::HealthTimeout {
                    model_id: model_id.to_string(),
                    waited_seconds: self.startup.max_startup_seconds,
                });
            }
            sleep(STARTUP_POLL_INTERVAL).await;
        }
    }

    /// One health probe against a server's /health endpoint.
    async fn probe(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{}/health", port);
        match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

fn is_active_state(state: ServerState) -> bool {
    matches!(state, ServerState::Starting | ServerState::Ready)
}

/// The fleet resolves tiers to endpoints for the orchestrator. Ready
/// handles only; ties break on model id so resolution is stable.
impl TierEndpoints for FleetManager {
    fn endpoint(&self, tier: Tier) -> Option<TierEndpoint> {
        let servers = self.servers.read().ok()?;
        let mut ready: Vec<&ManagedServer> = servers
            .values()
            .filter(|s| s.handle.tier == tier && s.handle.state == ServerState::Ready)
            .collect();
        ready.sort_by(|a, b| a.handle.model_id.cmp(&b.handle.model_id));
        ready.first().map(|s| TierEndpoint {
            model_id: s.handle.model_id.clone(),
            url: format!("http://127.0.0.1:{}", s.handle.port),
        })
    }
}
