use crate::error::{Error, Result};
use crate::server::events::{GuardianAction, GuardianLog};
use crate::server::health::{HealthObservation, HealthStore};
use crate::server::registry::ServerRegistry;
use crate::server::{ServerId, ServerRecord, ServerStatus};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Advisory condition attached to an otherwise successful transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusWarning {
    /// Users on a server entering maintenance will be migrated away
    DrainConnections { active_connections: u64 },
    /// Users on a server going offline will be disconnected
    DisconnectConnections { active_connections: u64 },
}

impl StatusWarning {
    pub fn message(&self) -> String {
        match self {
            StatusWarning::DrainConnections { active_connections } => format!(
                "{} active users will be migrated to other servers",
                active_connections
            ),
            StatusWarning::DisconnectConnections { active_connections } => format!(
                "{} active users will be disconnected",
                active_connections
            ),
        }
    }
}

/// Advisory check for a status change; transitions are never refused
pub fn advisory(from: ServerStatus, to: ServerStatus, active_connections: u64) -> Option<StatusWarning> {
    if active_connections == 0 || from == to {
        return None;
    }
    match (from, to) {
        (ServerStatus::Active, ServerStatus::Maintenance) => {
            Some(StatusWarning::DrainConnections { active_connections })
        }
        (_, ServerStatus::Offline) => Some(StatusWarning::DisconnectConnections { active_connections }),
        _ => None,
    }
}

/// Result of `set_status`
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    /// Record after the transition
    pub record: ServerRecord,
    pub previous: ServerStatus,
    /// False when the server already had the requested status
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<StatusWarning>,
}

/// Guarded status state machine and deletion.
///
/// Transitions for one server are serialized by a per-server lock, so two
/// requests can never both pass the connection check. A request that cannot
/// take the lock within `lock_wait` fails with `ConcurrencyConflict`.
pub struct LifecycleController {
    registry: Arc<ServerRegistry>,
    health: Arc<HealthStore>,
    log: Arc<GuardianLog>,
    locks: Mutex<HashMap<ServerId, Arc<tokio::sync::Mutex<()>>>>,
    lock_wait: Duration,
}

impl LifecycleController {
    pub fn new(
        registry: Arc<ServerRegistry>,
        health: Arc<HealthStore>,
        log: Arc<GuardianLog>,
        lock_wait: Duration,
    ) -> Self {
        Self {
            registry,
            health,
            log,
            locks: Mutex::new(HashMap::new()),
            lock_wait,
        }
    }

    fn lock_for(&self, id: ServerId) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::Other("Failed to lock transition table".to_string()))?;
        Ok(Arc::clone(locks.entry(id).or_default()))
    }

    async fn acquire(&self, id: ServerId) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        let lock = self.lock_for(id)?;
        tokio::time::timeout(self.lock_wait, lock.lock_owned())
            .await
            .map_err(|_| {
                Error::ConcurrencyConflict(format!(
                    "another transition for server {} is still in progress",
                    id
                ))
            })
    }

    /// Moves a server to `target`.
    ///
    /// Every status-to-status move is permitted. Requesting the current status
    /// succeeds without touching the record and is logged with
    /// `"changed": false`.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn set_status(&self, id: ServerId, target: ServerStatus, actor: &str) -> Result<TransitionOutcome> {
        let _guard = self.acquire(id).await?;

        let current = self.registry.get(id)?;
        let previous = current.status;
        let active_connections = self.health.active_connections(id)?;
        let warning = advisory(previous, target, active_connections);

        let (record, changed) = if previous == target {
            (current, false)
        } else {
            (self.registry.set_status(id, target)?, true)
        };

        self.log.record(
            id,
            GuardianAction::StatusChange,
            json!({
                "from": previous,
                "to": target,
                "actor": actor,
                "changed": changed,
                "active_connections": active_connections,
                "warning": warning.as_ref().map(|w| w.message()),
            }),
        );

        if changed {
            tracing::info!(
                from = %previous,
                to = %target,
                actor = actor,
                active_connections,
                "Server status changed"
            );
        }
        if let Some(w) = &warning {
            tracing::warn!(actor = actor, warning = %w.message(), "Transition proceeds with live connections");
        }

        Ok(TransitionOutcome {
            record,
            previous,
            changed,
            warning,
        })
    }

    /// Like `set_status`, but only when the server is still in `expected`.
    ///
    /// Used by the Guardian so an operator decision taken while a probe was
    /// running is never overridden. Returns `None` when the status moved on.
    pub(crate) async fn set_status_if(
        &self,
        id: ServerId,
        expected: ServerStatus,
        target: ServerStatus,
        actor: &str,
    ) -> Result<Option<TransitionOutcome>> {
        let _guard = self.acquire(id).await?;

        let current = self.registry.get(id)?;
        if current.status != expected {
            return Ok(None);
        }
        let active_connections = self.health.active_connections(id)?;
        let warning = advisory(current.status, target, active_connections);
        let record = self.registry.set_status(id, target)?;

        self.log.record(
            id,
            GuardianAction::StatusChange,
            json!({
                "from": expected,
                "to": target,
                "actor": actor,
                "changed": true,
                "active_connections": active_connections,
                "warning": warning.as_ref().map(|w| w.message()),
            }),
        );

        Ok(Some(TransitionOutcome {
            record,
            previous: expected,
            changed: true,
            warning,
        }))
    }

    /// Stores the live session count reported by connection tracking.
    ///
    /// Takes the same per-server lock as `delete`, so a report cannot land
    /// between the deletion check and the removal.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn report_connections(&self, id: ServerId, active_connections: u64) -> Result<HealthObservation> {
        let guard = self.acquire(id).await?;

        if let Err(e) = self.registry.get(id) {
            drop(guard);
            if let Ok(mut locks) = self.locks.lock() {
                locks.remove(&id);
            }
            return Err(e);
        }
        self.health.set_connections(id, active_connections)
    }

    /// Deletes a server.
    ///
    /// Hard-blocked while connection tracking reports live sessions, whatever
    /// the status. This guard has no override.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn delete(&self, id: ServerId, actor: &str) -> Result<ServerRecord> {
        let guard = self.acquire(id).await?;

        let current = self.registry.get(id)?;
        let active_connections = self.health.active_connections(id)?;
        if active_connections > 0 {
            tracing::warn!(
                active_connections,
                status = %current.status,
                "Deletion blocked by live connections"
            );
            return Err(Error::ActiveConnectionsBlockDeletion {
                server_id: id.to_string(),
                count: active_connections,
            });
        }

        let removed = self.registry.remove(id)?;
        self.health.remove(id)?;

        self.log.record(
            id,
            GuardianAction::StatusChange,
            json!({
                "from": removed.status,
                "to": "deleted",
                "actor": actor,
                "changed": true,
                "active_connections": 0,
            }),
        );
        tracing::info!(actor = actor, name = %removed.name, "Server deleted");

        drop(guard);
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(&id);
        }

        Ok(removed)
    }
}
