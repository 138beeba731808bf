use fleet_guardian::api::events::{format_sse_entry, sse_stream};
use fleet_guardian::server::{GuardianAction, GuardianLog, ServerDraft, ServerRegistry};
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;

fn registered_id(registry: &ServerRegistry) -> fleet_guardian::ServerId {
    registry
        .create(ServerDraft {
            name: "hel-1".to_string(),
            ip_address: "192.0.2.5".to_string(),
            capacity: 20,
            protocols: vec!["v2ray".to_string()],
            ..Default::default()
        })
        .unwrap()
        .id
}

#[test]
fn test_format_sse_entry() {
    let registry = ServerRegistry::in_memory();
    let id = registered_id(&registry);
    let log = GuardianLog::new();
    let entry = log
        .append(id, GuardianAction::Degraded, json!({ "from": "healthy", "to": "degraded" }))
        .unwrap();

    let frame = String::from_utf8(format_sse_entry(&entry).to_vec()).unwrap();

    assert!(frame.starts_with(&format!("id: {}\n", entry.id)));
    assert!(frame.contains("event: degraded\n"));
    assert!(frame.contains(&format!("\"server_id\":\"{}\"", id)));
    assert!(frame.ends_with("\n\n"));
}

#[tokio::test]
async fn test_stream_delivers_new_entries() {
    let registry = ServerRegistry::in_memory();
    let id = registered_id(&registry);
    let log = GuardianLog::new();

    let stream = sse_stream(log.subscribe());
    futures::pin_mut!(stream);

    let opening = stream.next().await.unwrap().unwrap();
    assert_eq!(&opening[..], b": connected\n\n");

    log.record(id, GuardianAction::AutoOffline, json!({ "consecutive_failures": 10 }));

    let frame = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let frame = String::from_utf8(frame.to_vec()).unwrap();
    assert!(frame.contains("event: auto_offline\n"));
}

#[tokio::test]
async fn test_stream_ends_when_log_is_dropped() {
    let log = GuardianLog::new();
    let stream = sse_stream(log.subscribe());
    futures::pin_mut!(stream);

    stream.next().await.unwrap().unwrap();
    drop(log);

    assert!(stream.next().await.is_none());
}
