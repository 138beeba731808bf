use async_trait::async_trait;
use fleet_guardian::config::Config;
use fleet_guardian::error::{Error, Result};
use fleet_guardian::server::{
    GuardianAction, ProbeTarget, ProtocolProber, ServerDraft, ServerStatus, SshTarget,
    SshTestResult, SshTester, StatusWarning,
};
use fleet_guardian::{FleetController, HealthStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Answers every probe with a fixed outcome
struct FixedProber {
    reachable: AtomicBool,
    calls: AtomicUsize,
}

impl FixedProber {
    fn new(reachable: bool) -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(reachable),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ProtocolProber for FixedProber {
    async fn probe(&self, target: &ProbeTarget) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ProbeConnection(format!("{} refused", target.socket_addr())))
        }
    }
}

/// Must never be reached
struct NoSsh;

#[async_trait]
impl SshTester for NoSsh {
    async fn test(&self, target: &SshTarget, _timeout: Duration) -> Result<SshTestResult> {
        panic!("unexpected SSH test against {}", target.address);
    }
}

fn controller(prober: Arc<FixedProber>) -> FleetController {
    FleetController::with_probes(Config::default(), prober, Arc::new(NoSsh)).unwrap()
}

fn shadowsocks_server() -> ServerDraft {
    ServerDraft {
        name: "waw-1".to_string(),
        location: "Warsaw".to_string(),
        country_code: "PL".to_string(),
        ip_address: "203.0.113.77".to_string(),
        capacity: 100,
        protocols: vec!["shadowsocks".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_two_failed_probes_make_server_unhealthy() -> Result<()> {
    let prober = FixedProber::new(false);
    let controller = controller(Arc::clone(&prober));
    let server = controller.create_server(shadowsocks_server(), "ops")?;

    controller.trigger_health_check(server.id).await?;
    controller.trigger_health_check(server.id).await?;

    let health = controller.get_fleet_health()?;
    let observation = &health[&server.id];
    assert_eq!(observation.health_status, HealthStatus::Unhealthy);
    assert_eq!(observation.consecutive_failures, 2);
    assert_eq!(prober.calls.load(Ordering::SeqCst), 2);

    let transitions: Vec<_> = controller
        .get_guardian_log(server.id, None)?
        .into_iter()
        .filter(|e| e.action == GuardianAction::Unhealthy)
        .collect();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].details["from"], "unknown");

    Ok(())
}

#[tokio::test]
async fn test_drain_then_delete() -> Result<()> {
    let controller = controller(FixedProber::new(true));
    let server = controller.create_server(shadowsocks_server(), "ops")?;
    controller.report_connections(server.id, 5).await?;

    match controller.delete_server(server.id, "ops").await {
        Err(Error::ActiveConnectionsBlockDeletion { count, .. }) => assert_eq!(count, 5),
        other => panic!("expected deletion to be blocked, got {:?}", other),
    }

    let outcome = controller
        .set_server_status(server.id, ServerStatus::Offline, "ops")
        .await?;
    assert!(outcome.changed);
    assert_eq!(
        outcome.warning,
        Some(StatusWarning::DisconnectConnections { active_connections: 5 })
    );

    controller.report_connections(server.id, 0).await?;
    controller.delete_server(server.id, "ops").await?;
    assert!(controller.list_servers()?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_health_check_needs_no_ssh_credentials() -> Result<()> {
    let controller = controller(FixedProber::new(true));
    let server = controller.create_server(shadowsocks_server(), "ops")?;

    let report = controller.trigger_health_check(server.id).await?;
    assert_eq!(report.health_status, HealthStatus::Healthy);

    let err = controller.test_server_ssh(server.id).await.unwrap_err();
    assert!(matches!(err, Error::CredentialsMissing(_)));
    assert!(!err.is_retryable());

    Ok(())
}
