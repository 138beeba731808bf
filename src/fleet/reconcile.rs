use crate::server::{HealthObservation, HealthStatus, Protocol, ServerId, ServerRecord, ServerStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// One server as seen by every read path: the registry record joined with
/// its current health observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetEntry {
    #[serde(flatten)]
    pub record: ServerRecord,
    pub health_status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub active_connections: u64,
    pub protocol_results: BTreeMap<Protocol, bool>,
    /// `active_connections / capacity * 100`, clamped to [0, 100]
    pub load_percent: f64,
    /// Unclamped `active_connections / capacity`; above 1.0 means overload
    pub load_ratio: f64,
}

impl FleetEntry {
    fn join(record: ServerRecord, observation: Option<&HealthObservation>) -> Self {
        // A torn read can pair a record with somebody else's observation
        let observation = observation
            .filter(|o| o.server_id == record.id)
            .cloned()
            .unwrap_or_else(|| HealthObservation::unknown(record.id));

        let load_ratio = observation.active_connections as f64 / f64::from(record.capacity.max(1));
        let load_percent = (load_ratio * 100.0).clamp(0.0, 100.0);

        Self {
            record,
            health_status: observation.health_status,
            consecutive_failures: observation.consecutive_failures,
            last_check: observation.last_check,
            active_connections: observation.active_connections,
            protocol_results: observation.protocol_results,
            load_percent,
            load_ratio,
        }
    }

    pub fn id(&self) -> ServerId {
        self.record.id
    }

    pub fn is_overloaded(&self) -> bool {
        self.load_ratio > 1.0
    }
}

/// Joins registry records with health observations.
///
/// Produces exactly one entry per record, in record order. Servers without an
/// observation come out `unknown` with zero failures and zero connections.
/// Observations of servers missing from `records` are ignored.
///
/// # Examples
///
/// ```
/// use fleet_guardian::fleet::reconcile;
/// use std::collections::HashMap;
///
/// let view = reconcile(&[], &HashMap::new());
/// assert!(view.is_empty());
/// ```
pub fn reconcile(
    records: &[ServerRecord],
    health: &HashMap<ServerId, HealthObservation>,
) -> Vec<FleetEntry> {
    records
        .iter()
        .map(|record| FleetEntry::join(record.clone(), health.get(&record.id)))
        .collect()
}

/// Fleet-wide counters for the command center header
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetOverview {
    pub total_servers: usize,
    pub active: usize,
    pub maintenance: usize,
    pub offline: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    /// Servers above 100% load
    pub overloaded: usize,
    pub total_connections: u64,
    /// Summed capacity of active servers
    pub active_capacity: u64,
    /// Connections over active capacity, in percent
    pub utilization_percent: f64,
}

/// Summarises a fleet view
pub fn overview(view: &[FleetEntry]) -> FleetOverview {
    let mut summary = FleetOverview {
        total_servers: view.len(),
        ..Default::default()
    };

    for entry in view {
        match entry.record.status {
            ServerStatus::Active => {
                summary.active += 1;
                summary.active_capacity += u64::from(entry.record.capacity);
            }
            ServerStatus::Maintenance => summary.maintenance += 1,
            ServerStatus::Offline => summary.offline += 1,
        }
        match entry.health_status {
            HealthStatus::Healthy => summary.healthy += 1,
            HealthStatus::Degraded => summary.degraded += 1,
            HealthStatus::Unhealthy => summary.unhealthy += 1,
            HealthStatus::Unknown => summary.unknown += 1,
        }
        if entry.is_overloaded() {
            summary.overloaded += 1;
        }
        summary.total_connections += entry.active_connections;
    }

    if summary.active_capacity > 0 {
        summary.utilization_percent =
            summary.total_connections as f64 / summary.active_capacity as f64 * 100.0;
    }

    summary
}
