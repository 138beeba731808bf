//! HTTP request handlers of the admin API.
//!
//! One handler per administrative operation; each delegates to the
//! [`FleetController`] and lets [`Error`] render itself on failure.

use crate::FleetController;
use crate::api::events::sse_stream;
use crate::api::types::{
    ACTOR_HEADER, ConnectionsRequest, DEFAULT_ACTOR, LogQuery, PredictionQuery, RestartRequest,
    StatusRequest, TransitionResponse,
};
use crate::error::{Error, Result};
use crate::server::{ServerDraft, ServerId, ServerPatch, ServerStatus};

use actix_web::{
    HttpRequest, HttpResponse,
    web::{Data, Json, Path, Query},
};
use serde_json::json;
use std::sync::Arc;

type Controller = Data<Arc<FleetController>>;

/// Operator named by the `X-Actor` header
fn actor(req: &HttpRequest) -> String {
    req.headers()
        .get(ACTOR_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or(DEFAULT_ACTOR)
        .to_string()
}

fn server_id(path: Path<String>) -> Result<ServerId> {
    path.into_inner().parse()
}

/// Liveness probe of the API itself
pub async fn health(controller: Controller) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "guardian_running": controller.guardian_running(),
    }))
}

pub async fn list_servers(controller: Controller) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(controller.list_servers()?))
}

pub async fn create_server(
    controller: Controller,
    draft: Json<ServerDraft>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let record = controller.create_server(draft.into_inner(), &actor(&req))?;
    Ok(HttpResponse::Created().json(record))
}

pub async fn get_server(controller: Controller, path: Path<String>) -> Result<HttpResponse> {
    let id = server_id(path)?;
    Ok(HttpResponse::Ok().json(controller.get_server(id)?))
}

pub async fn update_server(
    controller: Controller,
    path: Path<String>,
    patch: Json<ServerPatch>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let id = server_id(path)?;
    let record = controller.update_server(id, patch.into_inner(), &actor(&req))?;
    Ok(HttpResponse::Ok().json(record))
}

pub async fn delete_server(
    controller: Controller,
    path: Path<String>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let id = server_id(path)?;
    let removed = controller.delete_server(id, &actor(&req)).await?;
    Ok(HttpResponse::Ok().json(json!({ "deleted": removed })))
}

pub async fn set_server_status(
    controller: Controller,
    path: Path<String>,
    body: Json<StatusRequest>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let id = server_id(path)?;
    let status: ServerStatus = body.status.parse()?;
    let outcome = controller.set_server_status(id, status, &actor(&req)).await?;
    Ok(HttpResponse::Ok().json(TransitionResponse::from(outcome)))
}

pub async fn test_server_ssh(controller: Controller, path: Path<String>) -> Result<HttpResponse> {
    let id = server_id(path)?;
    Ok(HttpResponse::Ok().json(controller.test_server_ssh(id).await?))
}

pub async fn trigger_health_check(controller: Controller, path: Path<String>) -> Result<HttpResponse> {
    let id = server_id(path)?;
    Ok(HttpResponse::Ok().json(controller.trigger_health_check(id).await?))
}

pub async fn request_restart(
    controller: Controller,
    path: Path<String>,
    body: Option<Json<RestartRequest>>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let id = server_id(path)?;
    let reason = body.and_then(|b| b.into_inner().reason);
    let entry = controller.request_restart(id, &actor(&req), reason)?;
    Ok(HttpResponse::Accepted().json(entry))
}

pub async fn report_connections(
    controller: Controller,
    path: Path<String>,
    body: Json<ConnectionsRequest>,
) -> Result<HttpResponse> {
    let id = server_id(path)?;
    let observation = controller
        .report_connections(id, body.active_connections)
        .await?;
    Ok(HttpResponse::Ok().json(observation))
}

pub async fn guardian_log(
    controller: Controller,
    path: Path<String>,
    query: Query<LogQuery>,
) -> Result<HttpResponse> {
    let id = server_id(path)?;
    Ok(HttpResponse::Ok().json(controller.get_guardian_log(id, query.limit)?))
}

pub async fn fleet_log(controller: Controller, query: Query<LogQuery>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(controller.get_fleet_log(query.limit)?))
}

pub async fn load_prediction(
    controller: Controller,
    path: Path<String>,
    query: Query<PredictionQuery>,
) -> Result<HttpResponse> {
    let id = server_id(path)?;
    Ok(HttpResponse::Ok().json(controller.get_load_prediction(id, query.horizon_hours)?))
}

pub async fn fleet_health(controller: Controller) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(controller.get_fleet_health()?))
}

pub async fn fleet_view(controller: Controller) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(controller.fleet_view()?))
}

pub async fn fleet_overview(controller: Controller) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(controller.fleet_overview()?))
}

/// Live Guardian log feed as Server-Sent Events
pub async fn events(controller: Controller, req: HttpRequest) -> HttpResponse {
    tracing::debug!(peer = ?req.peer_addr(), "Client subscribed to event feed");
    let stream = sse_stream(controller.subscribe_events());

    HttpResponse::Ok()
        .append_header(("Content-Type", "text/event-stream"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Connection", "keep-alive"))
        .streaming(stream)
}

/// Maps malformed JSON bodies to a validation error
pub fn json_error(err: actix_web::error::JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    Error::validation("body", err.to_string()).into()
}
