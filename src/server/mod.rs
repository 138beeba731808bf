/// Server management module for Fleet Guardian.
///
/// This module holds the server registry, the Guardian health prober, the
/// lifecycle controller and the Guardian event log. Registry reads are
/// snapshot reads; writes to one server's status are serialized by the
/// lifecycle controller. All public components log through `tracing`.
///
/// # Components
///
/// * `record` - Server records, drafts, patches and the protocol vocabulary
/// * `registry` - Authoritative store of server records
/// * `health` - Health classification and the current observation per server
/// * `probe` - Protocol reachability and SSH test backends
/// * `monitor` - The Guardian: scheduled and on-demand probing
/// * `lifecycle` - Guarded status transitions and deletion
/// * `events` - Append-only Guardian log
///
/// # Examples
///
/// Registering a server and taking it through maintenance:
///
/// ```no_run
/// use fleet_guardian::server::{
///     GuardianLog, HealthStore, LifecycleController, ServerDraft, ServerRegistry, ServerStatus,
/// };
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn run() -> fleet_guardian::Result<()> {
/// let registry = Arc::new(ServerRegistry::in_memory());
/// let health = Arc::new(HealthStore::new());
/// let log = Arc::new(GuardianLog::new());
/// let lifecycle = LifecycleController::new(
///     Arc::clone(&registry),
///     Arc::clone(&health),
///     Arc::clone(&log),
///     Duration::from_secs(2),
/// );
///
/// let server = registry.create(ServerDraft {
///     name: "fra-1".to_string(),
///     ip_address: "203.0.113.10".to_string(),
///     capacity: 500,
///     protocols: vec!["trojan".to_string()],
///     ..Default::default()
/// })?;
///
/// let outcome = lifecycle
///     .set_status(server.id, ServerStatus::Maintenance, "ops")
///     .await?;
/// assert!(outcome.changed);
/// # Ok(())
/// # }
/// ```
pub mod events;
pub mod health;
pub mod lifecycle;
pub mod monitor;
pub mod probe;
mod record;
pub mod registry;

pub use events::{GuardianAction, GuardianLog, GuardianLogEntry};
pub use health::{HealthObservation, HealthStatus, HealthStore, ProbeUpdate, classify};
pub use lifecycle::{LifecycleController, StatusWarning, TransitionOutcome, advisory};
pub use monitor::{GUARDIAN_ACTOR, HealthCheckReport, ServerMonitor, ServerMonitorConfig};
pub use probe::{
    NetworkProber, OpenSshTester, ProbeTarget, ProtocolProber, SshTarget, SshTestResult,
    SshTester,
};
pub use record::{
    ProbeTransport, Protocol, ProtocolSettings, ServerDraft, ServerId, ServerPatch, ServerRecord,
    ServerStatus, SshCredentials, SshPatch,
};
pub use registry::ServerRegistry;
