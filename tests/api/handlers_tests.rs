use actix_web::http::StatusCode;
use actix_web::{App, test, web};
use async_trait::async_trait;
use fleet_guardian::FleetController;
use fleet_guardian::api::configure;
use fleet_guardian::config::Config;
use fleet_guardian::error::{Error, Result};
use fleet_guardian::server::{ProbeTarget, ProtocolProber, SshTarget, SshTestResult, SshTester};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

struct ReachableProber;

#[async_trait]
impl ProtocolProber for ReachableProber {
    async fn probe(&self, _target: &ProbeTarget) -> Result<()> {
        Ok(())
    }
}

struct RefusingSsh;

#[async_trait]
impl SshTester for RefusingSsh {
    async fn test(&self, _target: &SshTarget, _timeout: Duration) -> Result<SshTestResult> {
        Err(Error::ProbeConnection("Connection refused".to_string()))
    }
}

fn test_data() -> web::Data<Arc<FleetController>> {
    let controller = FleetController::with_probes(
        Config::default(),
        Arc::new(ReachableProber),
        Arc::new(RefusingSsh),
    )
    .unwrap();
    web::Data::new(Arc::new(controller))
}

fn server_body(name: &str) -> Value {
    json!({
        "name": name,
        "location": "Paris",
        "country_code": "FR",
        "ip_address": "192.0.2.80",
        "capacity": 300,
        "protocols": ["trojan", "hysteria"]
    })
}

macro_rules! app {
    ($data:expr) => {
        test::init_service(App::new().app_data($data.clone()).configure(configure)).await
    };
}

#[actix_web::test]
async fn test_create_get_and_list() {
    let data = test_data();
    let app = app!(data);

    let req = test::TestRequest::post()
        .uri("/api/servers")
        .set_json(server_body("par-1"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = test::read_body_json(resp).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "active");
    assert_eq!(created["ssh_configured"], false);

    let req = test::TestRequest::get()
        .uri(&format!("/api/servers/{}", id))
        .to_request();
    let fetched: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(fetched["name"], "par-1");

    let req = test::TestRequest::get().uri("/api/servers").to_request();
    let list: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(list.len(), 1);

    let req = test::TestRequest::get().uri("/api/fleet/view").to_request();
    let view: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(view[0]["id"], created["id"]);
    assert_eq!(view[0]["health_status"], "unknown");
}

#[actix_web::test]
async fn test_validation_errors() {
    let data = test_data();
    let app = app!(data);

    let mut body = server_body("par-1");
    body["capacity"] = json!(0);
    let req = test::TestRequest::post()
        .uri("/api/servers")
        .set_json(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let err: Value = test::read_body_json(resp).await;
    assert_eq!(err["error"], "validation_error");
    assert_eq!(err["field"], "capacity");
    assert_eq!(err["retryable"], false);

    let req = test::TestRequest::post()
        .uri("/api/servers")
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{ not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let err: Value = test::read_body_json(resp).await;
    assert_eq!(err["field"], "body");
}

#[actix_web::test]
async fn test_unknown_and_malformed_ids_are_not_found() {
    let data = test_data();
    let app = app!(data);

    for uri in [
        "/api/servers/not-a-uuid",
        "/api/servers/00000000-0000-0000-0000-000000000000",
        "/api/servers/00000000-0000-0000-0000-000000000000/guardian-log",
    ] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{}", uri);
        let err: Value = test::read_body_json(resp).await;
        assert_eq!(err["error"], "not_found");
    }
}

#[actix_web::test]
async fn test_status_change_and_deletion_guard() {
    let data = test_data();
    let app = app!(data);
    let id = data
        .create_server(serde_json::from_value(server_body("par-1")).unwrap(), "ops")
        .unwrap()
        .id;

    let req = test::TestRequest::put()
        .uri(&format!("/api/servers/{}/connections", id))
        .set_json(json!({ "active_connections": 4 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::put()
        .uri(&format!("/api/servers/{}/status", id))
        .insert_header(("X-Actor", "alice"))
        .set_json(json!({ "status": "maintenance" }))
        .to_request();
    let transition: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(transition["changed"], true);
    assert_eq!(transition["previous_status"], "active");
    assert_eq!(transition["server"]["status"], "maintenance");
    assert_eq!(transition["warning"]["kind"], "drain_connections");
    assert_eq!(transition["warning"]["active_connections"], 4);

    let req = test::TestRequest::put()
        .uri(&format!("/api/servers/{}/status", id))
        .set_json(json!({ "status": "retired" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/servers/{}", id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let err: Value = test::read_body_json(resp).await;
    assert_eq!(err["error"], "active_connections_block_deletion");
    assert_eq!(err["blocking"], true);
    assert_eq!(err["activeConnections"], 4);

    let req = test::TestRequest::get()
        .uri(&format!("/api/servers/{}/guardian-log?limit=1", id))
        .to_request();
    let log: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0]["action"], "status_change");
    assert_eq!(log[0]["details"]["actor"], "alice");
}

#[actix_web::test]
async fn test_probe_routes() {
    let data = test_data();
    let app = app!(data);
    let id = data
        .create_server(serde_json::from_value(server_body("par-1")).unwrap(), "ops")
        .unwrap()
        .id;

    let req = test::TestRequest::post()
        .uri(&format!("/api/servers/{}/health-check", id))
        .to_request();
    let report: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(report["health_status"], "healthy");
    assert_eq!(report["protocol_results"]["trojan"], true);

    // No credentials stored
    let req = test::TestRequest::post()
        .uri(&format!("/api/servers/{}/ssh-test", id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/servers/{}", id))
        .set_json(json!({ "ssh": { "password": "hunter2" } }))
        .to_request();
    let updated: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(updated["ssh_configured"], true);
    assert!(updated.get("ssh").is_none());

    let req = test::TestRequest::post()
        .uri(&format!("/api/servers/{}/ssh-test", id))
        .to_request();
    let result: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(result["connected"], false);

    let req = test::TestRequest::get().uri("/api/fleet/health").to_request();
    let health: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(health[id.to_string()]["health_status"], "healthy");
}

#[actix_web::test]
async fn test_prediction_restart_and_overview() {
    let data = test_data();
    let app = app!(data);
    let id = data
        .create_server(serde_json::from_value(server_body("par-1")).unwrap(), "ops")
        .unwrap()
        .id;

    let req = test::TestRequest::get()
        .uri(&format!("/api/servers/{}/prediction?horizon_hours=0", id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get()
        .uri(&format!("/api/servers/{}/prediction", id))
        .to_request();
    let predictions: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert!(predictions.is_empty());

    let req = test::TestRequest::post()
        .uri(&format!("/api/servers/{}/restart", id))
        .set_json(json!({ "reason": "stuck xray process" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let entry: Value = test::read_body_json(resp).await;
    assert_eq!(entry["action"], "restart_requested");
    assert_eq!(entry["details"]["reason"], "stuck xray process");

    let req = test::TestRequest::get().uri("/api/fleet/overview").to_request();
    let overview: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(overview["total_servers"], 1);
    assert_eq!(overview["active"], 1);

    let req = test::TestRequest::get()
        .uri("/api/fleet/guardian-log?limit=10")
        .to_request();
    let log: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(log.len(), 2);
    assert_eq!(log[0]["action"], "restart_requested");
}

#[actix_web::test]
async fn test_delete_after_drain() {
    let data = test_data();
    let app = app!(data);
    let id = data
        .create_server(serde_json::from_value(server_body("par-1")).unwrap(), "ops")
        .unwrap()
        .id;

    let req = test::TestRequest::delete()
        .uri(&format!("/api/servers/{}", id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["deleted"]["id"], id.to_string());

    let req = test::TestRequest::get().uri("/api/servers").to_request();
    let list: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert!(list.is_empty());
}

#[actix_web::test]
async fn test_liveness_and_event_feed_headers() {
    let data = test_data();
    let app = app!(data);

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["guardian_running"], false);

    let req = test::TestRequest::get().uri("/api/events").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("Content-Type").unwrap(),
        "text/event-stream"
    );
}
