use fleet_guardian::error::Result;
use fleet_guardian::server::{ServerDraft, ServerStatus};
use fleet_guardian::{FleetController, HealthStatus};

fn draft(name: &str, capacity: i64) -> ServerDraft {
    ServerDraft {
        name: name.to_string(),
        ip_address: "192.0.2.10".to_string(),
        capacity,
        protocols: vec!["shadowsocks".to_string()],
        ..Default::default()
    }
}

#[test]
fn test_view_has_one_entry_per_server() -> Result<()> {
    let controller = FleetController::from_config_str("{}")?;
    let a = controller.create_server(draft("a", 100), "ops")?;
    let b = controller.create_server(
        ServerDraft {
            status: Some("offline".to_string()),
            ..draft("b", 100)
        },
        "ops",
    )?;

    let view = controller.fleet_view()?;
    assert_eq!(view.len(), 2);
    for entry in &view {
        // Never probed: unknown, with zeroed counters
        assert_eq!(entry.health_status, HealthStatus::Unknown);
        assert_eq!(entry.consecutive_failures, 0);
        assert_eq!(entry.active_connections, 0);
        assert!(entry.last_check.is_none());
    }
    assert!(view.iter().any(|e| e.id() == a.id));
    assert!(view.iter().any(|e| e.id() == b.id && e.record.status == ServerStatus::Offline));

    let health = controller.get_fleet_health()?;
    assert_eq!(health.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_load_is_clamped_but_overload_visible() -> Result<()> {
    let controller = FleetController::from_config_str("{}")?;
    let small = controller.create_server(draft("small", 10), "ops")?;
    let big = controller.create_server(draft("big", 200), "ops")?;
    controller.report_connections(small.id, 15).await?;
    controller.report_connections(big.id, 50).await?;

    let view = controller.fleet_view()?;
    let small_entry = view.iter().find(|e| e.id() == small.id).unwrap();
    assert_eq!(small_entry.load_percent, 100.0);
    assert_eq!(small_entry.load_ratio, 1.5);
    assert!(small_entry.is_overloaded());

    let big_entry = view.iter().find(|e| e.id() == big.id).unwrap();
    assert_eq!(big_entry.load_percent, 25.0);
    assert!(!big_entry.is_overloaded());

    Ok(())
}

#[tokio::test]
async fn test_overview_counters() -> Result<()> {
    let controller = FleetController::from_config_str("{}")?;
    let a = controller.create_server(draft("a", 100), "ops")?;
    let b = controller.create_server(draft("b", 100), "ops")?;
    let c = controller.create_server(draft("c", 50), "ops")?;
    controller.report_connections(a.id, 30).await?;
    controller.report_connections(b.id, 20).await?;
    controller.report_connections(c.id, 60).await?;
    controller
        .set_server_status(c.id, ServerStatus::Maintenance, "ops")
        .await?;

    let overview = controller.fleet_overview()?;
    assert_eq!(overview.total_servers, 3);
    assert_eq!(overview.active, 2);
    assert_eq!(overview.maintenance, 1);
    assert_eq!(overview.offline, 0);
    assert_eq!(overview.unknown, 3);
    assert_eq!(overview.overloaded, 1);
    assert_eq!(overview.total_connections, 110);
    assert_eq!(overview.active_capacity, 200);
    assert_eq!(overview.utilization_percent, 55.0);

    Ok(())
}
