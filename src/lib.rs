/*!
 # Fleet Guardian

 A Rust library and service for keeping a fleet of VPN edge servers healthy
 and their operational status consistent.

 ## Overview

 Fleet Guardian provides functionality to:
 - Maintain a registry of servers (address, capacity, enabled protocols, SSH access)
 - Probe every enabled protocol on a fixed cadence and classify server health
 - Reconcile registry records and health observations into one fleet view
 - Drive guarded status transitions that never drop live sessions silently
 - Forecast short-horizon load from connection history
 - Keep an append-only Guardian log of every health change and lifecycle action
 - Optionally expose all of it through an authenticated admin HTTP API

 ## Basic Usage

 ```no_run
 use fleet_guardian::{FleetController, Result, ServerDraft, ServerStatus};

 #[tokio::main]
 async fn main() -> Result<()> {
     // Create a controller from config file
     let controller = FleetController::from_config_file("fleet.json")?;

     // Register a server
     let server = controller.create_server(
         ServerDraft {
             name: "fra-1".to_string(),
             ip_address: "203.0.113.10".to_string(),
             capacity: 500,
             protocols: vec!["shadowsocks".to_string(), "wireguard".to_string()],
             ..Default::default()
         },
         "ops",
     )?;

     // Probe it right away
     let report = controller.trigger_health_check(server.id).await?;
     println!("{} is {}", server.name, report.health_status);

     // Drain it; live users only produce a warning
     let outcome = controller
         .set_server_status(server.id, ServerStatus::Maintenance, "ops")
         .await?;
     if let Some(warning) = outcome.warning {
         println!("warning: {}", warning.message());
     }

     // Start the scheduled Guardian passes
     controller.start_guardian()?;

     Ok(())
 }
 ```

 ## Features

 - **Registry**: Validated server records, credentials stored write-only
 - **Guardian**: Scheduled and on-demand probing with a per-server in-flight guard
 - **Lifecycle**: Per-server serialized transitions, advisory warnings, hard deletion guard
 - **Forecasting**: Deterministic hourly load predictions
 - **Admin API**: actix-web routes with bearer authentication, CORS and an SSE event feed
*/

pub mod api;
pub mod config;
pub mod error;
pub mod fleet;
pub mod server;

pub use api::{AdminApi, AdminApiHandle};
pub use config::Config;
pub use error::{Error, Result};
pub use fleet::{FleetEntry, FleetOverview, LoadPrediction, LoadSample};
pub use server::{
    GuardianLogEntry, HealthCheckReport, HealthObservation, HealthStatus, ServerDraft, ServerId,
    ServerPatch, ServerRecord, ServerStatus, SshTestResult, TransitionOutcome,
};

use chrono::Utc;
use fleet::{LoadForecaster, LoadHistory};
use serde_json::json;
use server::{
    GuardianAction, GuardianLog, HealthStore, LifecycleController, NetworkProber, OpenSshTester,
    ProtocolProber, ServerMonitor, ServerMonitorConfig, ServerRegistry, SshTester,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Fleet health and lifecycle controller
///
/// This struct is the main entry point: it owns the registry, the Guardian,
/// the lifecycle controller, the forecaster and the Guardian log, and
/// implements every administrative operation on top of them.
/// All public methods are instrumented with `tracing` spans.
pub struct FleetController {
    config: Config,
    registry: Arc<ServerRegistry>,
    health: Arc<HealthStore>,
    log: Arc<GuardianLog>,
    lifecycle: Arc<LifecycleController>,
    monitor: ServerMonitor,
    history: LoadHistory,
    forecaster: LoadForecaster,
}

impl FleetController {
    /// Create a new controller from a configuration file path
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(path), fields(config_path = ?path.as_ref()))]
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        tracing::info!("Loading configuration from file");
        let config = Config::from_file(path)?;
        Self::new(config)
    }

    /// Create a new controller from a JSON configuration string
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(config))]
    pub fn from_config_str(config: &str) -> Result<Self> {
        tracing::info!("Loading configuration from string");
        let config = Config::parse_from_str(config)?;
        Self::new(config)
    }

    /// Create a controller probing the network and using the system `ssh`
    pub fn new(config: Config) -> Result<Self> {
        let prober = Arc::new(NetworkProber::new(config.guardian.probe_timeout() / 2));
        let ssh = Arc::new(OpenSshTester::new(
            config.guardian.ssh_binary.clone(),
            config.guardian.sshpass_binary.clone(),
        ));
        Self::with_probes(config, prober, ssh)
    }

    /// Create a controller with custom probe backends
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip_all, fields(num_servers = config.servers.len()))]
    pub fn with_probes(
        config: Config,
        prober: Arc<dyn ProtocolProber>,
        ssh: Arc<dyn SshTester>,
    ) -> Result<Self> {
        config::validate_config(&config)?;
        tracing::info!("Creating new FleetController");

        let registry = Arc::new(match &config.registry.path {
            Some(path) => ServerRegistry::open(path)?,
            None => ServerRegistry::in_memory(),
        });
        let log = Arc::new(match &config.guardian_log.path {
            Some(path) => GuardianLog::with_sink(path)?,
            None => GuardianLog::new(),
        });
        let health = Arc::new(HealthStore::new());
        let lifecycle = Arc::new(LifecycleController::new(
            Arc::clone(&registry),
            Arc::clone(&health),
            Arc::clone(&log),
            config.lifecycle.lock_wait(),
        ));
        let monitor = ServerMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&health),
            Arc::clone(&log),
            Arc::clone(&lifecycle),
            prober,
            ssh,
            ServerMonitorConfig::from(&config.guardian),
        );

        let controller = Self {
            history: LoadHistory::new(config.forecast.retention_hours),
            forecaster: LoadForecaster::new(config.forecast.clone()),
            config,
            registry,
            health,
            log,
            lifecycle,
            monitor,
        };
        controller.seed_servers()?;

        Ok(controller)
    }

    /// Registers the configured servers when the registry is empty
    fn seed_servers(&self) -> Result<()> {
        if self.config.servers.is_empty() || !self.registry.is_empty()? {
            return Ok(());
        }
        for draft in self.config.servers.clone() {
            self.create_server(draft, "config")?;
        }
        tracing::info!(servers = self.config.servers.len(), "Seeded registry from configuration");
        Ok(())
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// List every registered server regardless of status
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self))]
    pub fn list_servers(&self) -> Result<Vec<ServerRecord>> {
        self.registry.list()
    }

    /// Get one server record
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub fn get_server(&self, id: ServerId) -> Result<ServerRecord> {
        self.registry.get(id)
    }

    /// Current Guardian state of every registered server
    ///
    /// Servers never probed are reported `unknown`.
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self))]
    pub fn get_fleet_health(&self) -> Result<BTreeMap<ServerId, HealthObservation>> {
        let view = self.fleet_view()?;
        Ok(view
            .into_iter()
            .map(|entry| {
                let id = entry.id();
                (
                    id,
                    HealthObservation {
                        server_id: id,
                        health_status: entry.health_status,
                        consecutive_failures: entry.consecutive_failures,
                        last_check: entry.last_check,
                        active_connections: entry.active_connections,
                        protocol_results: entry.protocol_results,
                    },
                )
            })
            .collect())
    }

    /// Registry joined with current health, one entry per server
    #[tracing::instrument(skip(self))]
    pub fn fleet_view(&self) -> Result<Vec<FleetEntry>> {
        let records = self.registry.list()?;
        let health = self.health.snapshot()?;
        Ok(fleet::reconcile(&records, &health))
    }

    /// Fleet-wide counters
    #[tracing::instrument(skip(self))]
    pub fn fleet_overview(&self) -> Result<FleetOverview> {
        Ok(fleet::overview(&self.fleet_view()?))
    }

    /// Validate and register a new server
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self, draft), fields(name = %draft.name))]
    pub fn create_server(&self, draft: ServerDraft, actor: &str) -> Result<ServerRecord> {
        let record = self.registry.create(draft)?;
        self.log.record(
            record.id,
            GuardianAction::StatusChange,
            json!({
                "event": "created",
                "from": null,
                "to": record.status,
                "actor": actor,
                "changed": true,
            }),
        );
        Ok(record)
    }

    /// Apply a partial update; omitted credentials are kept
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self, patch), fields(server_id = %id))]
    pub fn update_server(&self, id: ServerId, patch: ServerPatch, actor: &str) -> Result<ServerRecord> {
        let fields = patch.touched_fields();
        let record = self.registry.update(id, patch)?;
        tracing::info!(fields = ?fields, actor = actor, "Server updated");
        self.log.record(
            id,
            GuardianAction::StatusChange,
            json!({
                "event": "updated",
                "from": record.status,
                "to": record.status,
                "actor": actor,
                "changed": false,
                "fields": fields,
            }),
        );
        Ok(record)
    }

    /// Delete a server; refused while it carries live connections
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn delete_server(&self, id: ServerId, actor: &str) -> Result<ServerRecord> {
        let removed = self.lifecycle.delete(id, actor).await?;
        self.history.remove(id)?;
        Ok(removed)
    }

    /// Change operator status; same-status requests are a no-op success
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn set_server_status(
        &self,
        id: ServerId,
        status: ServerStatus,
        actor: &str,
    ) -> Result<TransitionOutcome> {
        self.lifecycle.set_status(id, status, actor).await
    }

    /// Test SSH access with the stored credentials
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn test_server_ssh(&self, id: ServerId) -> Result<SshTestResult> {
        self.monitor.test_ssh(id).await
    }

    /// Probe every enabled protocol of a server now
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn trigger_health_check(&self, id: ServerId) -> Result<HealthCheckReport> {
        self.monitor.trigger_health_check(id).await
    }

    /// Guardian log of a server, newest first
    ///
    /// History of deleted servers stays readable.
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub fn get_guardian_log(&self, id: ServerId, limit: Option<usize>) -> Result<Vec<GuardianLogEntry>> {
        let entries = self.log.entries_for(id, limit)?;
        if entries.is_empty() {
            self.registry.get(id)?;
        }
        Ok(entries)
    }

    /// Guardian log of the whole fleet, newest first
    #[tracing::instrument(skip(self))]
    pub fn get_fleet_log(&self, limit: Option<usize>) -> Result<Vec<GuardianLogEntry>> {
        self.log.all_entries(limit)
    }

    /// Predicted load for the next `horizon_hours` hours
    ///
    /// Empty when there is not enough history yet.
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub fn get_load_prediction(&self, id: ServerId, horizon_hours: Option<u32>) -> Result<Vec<LoadPrediction>> {
        self.registry.get(id)?;
        let horizon = horizon_hours.unwrap_or_else(|| self.forecaster.default_horizon());
        let samples = self.history.samples(id)?;
        self.forecaster.predict(&samples, horizon)
    }

    /// Record the connection count reported by connection tracking
    ///
    /// Feeds both the deletion guard and the load history.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn report_connections(&self, id: ServerId, active_connections: u64) -> Result<HealthObservation> {
        let observation = self.lifecycle.report_connections(id, active_connections).await?;
        self.history.record(
            id,
            LoadSample {
                timestamp: Utc::now(),
                active_connections,
            },
        )?;
        tracing::debug!(active_connections, "Connection count reported");
        Ok(observation)
    }

    /// Add a historical load sample without touching the live count
    pub fn record_load_sample(&self, id: ServerId, sample: LoadSample) -> Result<()> {
        self.registry.get(id)?;
        self.history.record(id, sample)
    }

    /// Log a restart request for the host agent
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub fn request_restart(&self, id: ServerId, actor: &str, reason: Option<String>) -> Result<GuardianLogEntry> {
        let record = self.registry.get(id)?;
        tracing::info!(actor = actor, name = %record.name, "Restart requested");
        self.log.append(
            id,
            GuardianAction::RestartRequested,
            json!({
                "actor": actor,
                "reason": reason,
                "status": record.status,
            }),
        )
    }

    /// Live feed of Guardian log entries
    pub fn subscribe_events(&self) -> broadcast::Receiver<GuardianLogEntry> {
        self.log.subscribe()
    }

    /// Start scheduled Guardian passes
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self))]
    pub fn start_guardian(&self) -> Result<()> {
        self.monitor.start()
    }

    /// Stop scheduled Guardian passes
    #[tracing::instrument(skip(self))]
    pub fn stop_guardian(&self) -> Result<()> {
        self.monitor.stop()
    }

    /// Whether scheduled Guardian passes are running
    pub fn guardian_running(&self) -> bool {
        self.monitor.is_running()
    }

    /// Run one Guardian pass now and wait for it
    #[tracing::instrument(skip(self))]
    pub async fn run_guardian_pass(&self) -> Result<Vec<HealthCheckReport>> {
        self.monitor.tick().await
    }
}
