use crate::config::GuardianConfig;
use crate::error::{Error, Result};
use crate::server::events::{GuardianAction, GuardianLog};
use crate::server::health::{HealthObservation, HealthStatus, HealthStore, ProbeUpdate, classify};
use crate::server::lifecycle::LifecycleController;
use crate::server::probe::{ProbeTarget, ProtocolProber, SshTarget, SshTestResult, SshTester};
use crate::server::registry::ServerRegistry;
use crate::server::{Protocol, ServerId, ServerRecord, ServerStatus};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Actor recorded for transitions the Guardian requests itself
pub const GUARDIAN_ACTOR: &str = "guardian";

/// Guardian configuration
#[derive(Debug, Clone)]
pub struct ServerMonitorConfig {
    /// Time between scheduled passes
    pub check_interval: Duration,
    /// Budget of one protocol check
    pub probe_timeout: Duration,
    /// Budget of `trigger_health_check` and `test_ssh`
    pub on_demand_timeout: Duration,
    /// Failures above which a server is unhealthy
    pub unhealthy_threshold: u32,
    /// Take servers offline after `auto_offline_threshold` failures
    pub auto_offline: bool,
    pub auto_offline_threshold: u32,
}

impl Default for ServerMonitorConfig {
    fn default() -> Self {
        Self::from(&GuardianConfig::default())
    }
}

impl From<&GuardianConfig> for ServerMonitorConfig {
    fn from(config: &GuardianConfig) -> Self {
        Self {
            check_interval: config.check_interval(),
            probe_timeout: config.probe_timeout(),
            on_demand_timeout: config.on_demand_timeout(),
            unhealthy_threshold: config.unhealthy_threshold,
            auto_offline: config.auto_offline,
            auto_offline_threshold: config.auto_offline_threshold,
        }
    }
}

/// Outcome of one probe pass over a server
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckReport {
    pub server_id: ServerId,
    pub health_status: HealthStatus,
    /// Classification before this pass
    pub previous_status: HealthStatus,
    pub consecutive_failures: u32,
    pub protocol_results: BTreeMap<Protocol, bool>,
    pub checked_at: DateTime<Utc>,
    /// Whether this pass took the server offline
    pub auto_offline: bool,
}

struct MonitorShared {
    registry: Arc<ServerRegistry>,
    health: Arc<HealthStore>,
    log: Arc<GuardianLog>,
    lifecycle: Arc<LifecycleController>,
    prober: Arc<dyn ProtocolProber>,
    ssh: Arc<dyn SshTester>,
    config: ServerMonitorConfig,
    in_flight: Mutex<HashSet<ServerId>>,
    running: AtomicBool,
}

/// Scheduled probe slot for one server, released on drop
struct InFlight {
    shared: Arc<MonitorShared>,
    id: ServerId,
}

impl InFlight {
    fn try_acquire(shared: &Arc<MonitorShared>, id: ServerId) -> Option<Self> {
        let mut in_flight = shared.in_flight.lock().ok()?;
        if !in_flight.insert(id) {
            return None;
        }
        Some(Self {
            shared: Arc::clone(shared),
            id,
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.shared.in_flight.lock() {
            in_flight.remove(&self.id);
        }
    }
}

/// The Guardian: probes every non-offline server on a fixed cadence and on
/// demand, keeps the current health observation and logs classification
/// changes.
pub struct ServerMonitor {
    shared: Arc<MonitorShared>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerMonitor {
    pub fn new(
        registry: Arc<ServerRegistry>,
        health: Arc<HealthStore>,
        log: Arc<GuardianLog>,
        lifecycle: Arc<LifecycleController>,
        prober: Arc<dyn ProtocolProber>,
        ssh: Arc<dyn SshTester>,
        config: ServerMonitorConfig,
    ) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                registry,
                health,
                log,
                lifecycle,
                prober,
                ssh,
                config,
                in_flight: Mutex::new(HashSet::new()),
                running: AtomicBool::new(false),
            }),
            monitor_task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Starts the scheduled passes. Calling it twice is a no-op.
    pub fn start(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let mut interval = time::interval(shared.config.check_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                match Self::dispatch(&shared) {
                    Ok(handles) => tracing::debug!(probes = handles.len(), "Guardian tick dispatched"),
                    Err(e) => tracing::error!(error = %e, "Guardian tick failed"),
                }
            }
        });

        let mut monitor_task = self
            .monitor_task
            .lock()
            .map_err(|_| Error::Other("Failed to lock monitor task".to_string()))?;
        *monitor_task = Some(task);

        tracing::info!(
            interval_secs = self.shared.config.check_interval.as_secs(),
            "Guardian started"
        );
        Ok(())
    }

    /// Stops the scheduled passes; probes already dispatched run to completion
    pub fn stop(&self) -> Result<()> {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let mut monitor_task = self
            .monitor_task
            .lock()
            .map_err(|_| Error::Other("Failed to lock monitor task".to_string()))?;
        if let Some(task) = monitor_task.take() {
            task.abort();
        }

        tracing::info!("Guardian stopped");
        Ok(())
    }

    /// Spawns one probe per probed server that has no probe in flight
    fn dispatch(shared: &Arc<MonitorShared>) -> Result<Vec<JoinHandle<Option<HealthCheckReport>>>> {
        let records = shared.registry.list()?;
        let mut handles = Vec::new();

        for record in records.into_iter().filter(|r| r.status.is_probed()) {
            let Some(slot) = InFlight::try_acquire(shared, record.id) else {
                tracing::debug!(server_id = %record.id, "Previous probe still running, skipping");
                continue;
            };

            let shared = Arc::clone(shared);
            handles.push(tokio::spawn(async move {
                let _slot = slot;
                let id = record.id;
                match Self::probe_server(&shared, record).await {
                    Ok(report) => Some(report),
                    Err(Error::ServerNotFound(_)) => None,
                    Err(e) => {
                        tracing::warn!(server_id = %id, error = %e, "Scheduled probe failed");
                        None
                    }
                }
            }));
        }

        Ok(handles)
    }

    /// Runs one scheduled pass and waits for every probe it started
    pub async fn tick(&self) -> Result<Vec<HealthCheckReport>> {
        let handles = Self::dispatch(&self.shared)?;
        let reports = join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| joined.ok().flatten())
            .collect();
        Ok(reports)
    }

    async fn check_protocols(shared: &MonitorShared, record: &ServerRecord) -> BTreeMap<Protocol, bool> {
        let checks = record.protocols.iter().map(|&protocol| {
            let target = ProbeTarget {
                server_id: record.id,
                address: record.ip_address,
                protocol,
                port: record.port_for(protocol),
            };
            async move {
                let outcome = time::timeout(shared.config.probe_timeout, shared.prober.probe(&target))
                    .await
                    .unwrap_or_else(|_| {
                        Err(Error::ProbeTimeout(format!(
                            "{} on port {} did not answer within {:?}",
                            protocol, target.port, shared.config.probe_timeout
                        )))
                    });
                if let Err(e) = &outcome {
                    tracing::debug!(
                        server_id = %target.server_id,
                        protocol = protocol.as_str(),
                        port = target.port,
                        error = %e,
                        "Protocol unreachable"
                    );
                }
                (protocol, outcome.is_ok())
            }
        });

        join_all(checks).await.into_iter().collect()
    }

    /// One full pass over a server: probe, store, log, maybe auto-offline
    async fn probe_server(shared: &Arc<MonitorShared>, record: ServerRecord) -> Result<HealthCheckReport> {
        let id = record.id;
        let results = Self::check_protocols(shared, &record).await;
        let update = shared
            .health
            .apply_probe(id, results, shared.config.unhealthy_threshold)?;

        // Deleted while the probe was running
        if shared.registry.get(id).is_err() {
            shared.health.remove(id)?;
            return Err(Error::ServerNotFound(id.to_string()));
        }

        if update.changed() {
            Self::log_transition(shared, &record, &update);
        }

        let auto_offline = Self::maybe_auto_offline(shared, id, &update).await;

        Ok(HealthCheckReport {
            server_id: id,
            health_status: update.current.health_status,
            previous_status: update.previous,
            consecutive_failures: update.current.consecutive_failures,
            protocol_results: update.current.protocol_results.clone(),
            checked_at: update.current.last_check.unwrap_or_else(Utc::now),
            auto_offline,
        })
    }

    fn log_transition(shared: &MonitorShared, record: &ServerRecord, update: &ProbeUpdate) {
        let current = &update.current;
        let action = match (update.previous, current.health_status) {
            (HealthStatus::Degraded | HealthStatus::Unhealthy, HealthStatus::Healthy) => {
                GuardianAction::Recovery
            }
            (_, HealthStatus::Healthy) => GuardianAction::Healthy,
            (_, HealthStatus::Degraded) => GuardianAction::Degraded,
            (_, HealthStatus::Unhealthy) => GuardianAction::Unhealthy,
            (_, HealthStatus::Unknown) => return,
        };

        let unreachable: Vec<Protocol> = current
            .protocol_results
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(p, _)| *p)
            .collect();

        match action {
            GuardianAction::Unhealthy | GuardianAction::Degraded => tracing::warn!(
                server_id = %record.id,
                name = %record.name,
                from = %update.previous,
                to = %current.health_status,
                consecutive_failures = current.consecutive_failures,
                "Server health degraded"
            ),
            _ => tracing::info!(
                server_id = %record.id,
                name = %record.name,
                from = %update.previous,
                to = %current.health_status,
                "Server health changed"
            ),
        }

        shared.log.record(
            record.id,
            action,
            json!({
                "from": update.previous,
                "to": current.health_status,
                "consecutive_failures": current.consecutive_failures,
                "protocol_results": current.protocol_results,
                "unreachable": unreachable,
            }),
        );
    }

    /// Requests `offline` through the lifecycle controller once the failure
    /// count is at or past the threshold. Only an `active` server moves, so a
    /// server re-activated mid-streak goes offline again on its next failure.
    async fn maybe_auto_offline(shared: &MonitorShared, id: ServerId, update: &ProbeUpdate) -> bool {
        let config = &shared.config;
        if !config.auto_offline || update.current.consecutive_failures < config.auto_offline_threshold {
            return false;
        }

        match shared
            .lifecycle
            .set_status_if(id, ServerStatus::Active, ServerStatus::Offline, GUARDIAN_ACTOR)
            .await
        {
            Ok(Some(outcome)) => {
                tracing::warn!(
                    server_id = %id,
                    consecutive_failures = update.current.consecutive_failures,
                    "Guardian took server offline"
                );
                shared.log.record(
                    id,
                    GuardianAction::AutoOffline,
                    json!({
                        "consecutive_failures": update.current.consecutive_failures,
                        "threshold": config.auto_offline_threshold,
                        "active_connections": update.current.active_connections,
                        "warning": outcome.warning.as_ref().map(|w| w.message()),
                    }),
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(server_id = %id, error = %e, "Auto-offline request failed");
                false
            }
        }
    }

    /// Probes a server immediately.
    ///
    /// The pass runs on its own task: it completes and updates stored state
    /// even when the caller goes away. The caller waits at most
    /// `on_demand_timeout`.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn trigger_health_check(&self, id: ServerId) -> Result<HealthCheckReport> {
        let record = self.shared.registry.get(id)?;
        let protocols: Vec<Protocol> = record.protocols.iter().copied().collect();
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move { Self::probe_server(&shared, record).await });

        match time::timeout(self.shared.config.on_demand_timeout, task).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => Err(Error::Other(format!("Health check task failed: {}", e))),
            Err(_) => {
                tracing::warn!(
                    budget_ms = self.shared.config.on_demand_timeout.as_millis() as u64,
                    "Health check still running, reporting failure"
                );
                self.timed_out_report(id, protocols)
            }
        }
    }

    /// Failure report for a pass the caller stopped waiting for.
    ///
    /// Every protocol counts as unreachable and the failure count is the one
    /// the running pass will store when it finishes.
    fn timed_out_report(&self, id: ServerId, protocols: Vec<Protocol>) -> Result<HealthCheckReport> {
        let stored = self
            .shared
            .health
            .get(id)?
            .unwrap_or_else(|| HealthObservation::unknown(id));
        let consecutive_failures = stored.consecutive_failures.saturating_add(1);
        let protocol_results: BTreeMap<Protocol, bool> =
            protocols.into_iter().map(|p| (p, false)).collect();

        Ok(HealthCheckReport {
            server_id: id,
            health_status: classify(
                &protocol_results,
                consecutive_failures,
                self.shared.config.unhealthy_threshold,
            ),
            previous_status: stored.health_status,
            consecutive_failures,
            protocol_results,
            checked_at: Utc::now(),
            auto_offline: false,
        })
    }

    /// Tests an SSH login with the stored credentials.
    ///
    /// Connection failures and timeouts come back as `connected: false`;
    /// only missing credentials are an error.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn test_ssh(&self, id: ServerId) -> Result<SshTestResult> {
        let record = self.shared.registry.get(id)?;
        let credentials = self
            .shared
            .registry
            .ssh_credentials(id)?
            .filter(|c| c.has_secret())
            .ok_or_else(|| Error::CredentialsMissing(id.to_string()))?;

        let target = SshTarget {
            server_id: id,
            address: record.ip_address,
            credentials,
        };
        let budget = self.shared.config.on_demand_timeout;
        let ssh = Arc::clone(&self.shared.ssh);
        let task = tokio::spawn(async move { ssh.test(&target, budget).await });

        let result = match time::timeout(budget, task).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(Error::CredentialsMissing(server)))) => {
                return Err(Error::CredentialsMissing(server));
            }
            Ok(Ok(Err(e))) => SshTestResult {
                connected: false,
                output: e.to_string(),
            },
            Ok(Err(e)) => return Err(Error::Other(format!("SSH test task failed: {}", e))),
            Err(_) => SshTestResult {
                connected: false,
                output: format!("SSH test timed out after {:?}", budget),
            },
        };

        tracing::info!(connected = result.connected, "SSH test finished");
        Ok(result)
    }
}

impl Drop for ServerMonitor {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Ok(mut task) = self.monitor_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}
