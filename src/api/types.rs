//! Request and response bodies of the admin API.

use crate::server::{ServerRecord, StatusWarning, TransitionOutcome};
use serde::{Deserialize, Serialize};

/// Header naming the operator behind a request
pub const ACTOR_HEADER: &str = "X-Actor";

/// Actor recorded when the header is absent
pub const DEFAULT_ACTOR: &str = "admin";

/// Body of `PUT /api/servers/{id}/status`
#[derive(Debug, Clone, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

/// Body of `PUT /api/servers/{id}/connections`
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionsRequest {
    pub active_connections: u64,
}

/// Body of `POST /api/servers/{id}/restart`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestartRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Query of `GET /api/servers/{id}/guardian-log`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

/// Query of `GET /api/servers/{id}/prediction`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictionQuery {
    pub horizon_hours: Option<u32>,
}

/// Response of a status change
#[derive(Debug, Clone, Serialize)]
pub struct TransitionResponse {
    pub server: ServerRecord,
    pub previous_status: String,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<WarningBody>,
}

/// Advisory warning as shown to the operator
#[derive(Debug, Clone, Serialize)]
pub struct WarningBody {
    #[serde(flatten)]
    pub warning: StatusWarning,
    pub message: String,
}

impl From<TransitionOutcome> for TransitionResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        Self {
            previous_status: outcome.previous.to_string(),
            changed: outcome.changed,
            warning: outcome.warning.map(|warning| WarningBody {
                message: warning.message(),
                warning,
            }),
            server: outcome.record,
        }
    }
}
