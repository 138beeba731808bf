use crate::error::{Error, Result};
use crate::server::{Protocol, ServerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::RwLock;

/// Server health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every enabled protocol is reachable
    Healthy,
    /// Some, but not all, enabled protocols are reachable
    Degraded,
    /// Nothing reachable, or failing for too long
    Unhealthy,
    /// Not probed yet
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a server from the results of one probe pass.
///
/// `consecutive_failures` is the count *after* the pass has been applied.
/// An empty result set (no protocol probed) cannot be classified and stays
/// [`HealthStatus::Unknown`].
///
/// # Examples
///
/// ```
/// use fleet_guardian::server::{classify, HealthStatus, Protocol};
/// use std::collections::BTreeMap;
///
/// let results = BTreeMap::from([(Protocol::Trojan, true), (Protocol::Vless, false)]);
/// assert_eq!(classify(&results, 1, 3), HealthStatus::Degraded);
/// assert_eq!(classify(&results, 4, 3), HealthStatus::Unhealthy);
/// ```
pub fn classify(
    results: &BTreeMap<Protocol, bool>,
    consecutive_failures: u32,
    unhealthy_threshold: u32,
) -> HealthStatus {
    if results.is_empty() {
        return HealthStatus::Unknown;
    }

    let reachable = results.values().filter(|ok| **ok).count();
    if reachable == 0 || consecutive_failures > unhealthy_threshold {
        HealthStatus::Unhealthy
    } else if reachable < results.len() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Current Guardian state of one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthObservation {
    pub server_id: ServerId,
    pub health_status: HealthStatus,
    pub consecutive_failures: u32,
    /// Completion time of the latest probe pass, `None` until the first one
    pub last_check: Option<DateTime<Utc>>,
    /// Live sessions as reported by connection tracking
    pub active_connections: u64,
    /// Reachability per protocol from the latest pass
    pub protocol_results: BTreeMap<Protocol, bool>,
}

impl HealthObservation {
    /// Observation of a server the Guardian has not looked at yet
    pub fn unknown(server_id: ServerId) -> Self {
        Self {
            server_id,
            health_status: HealthStatus::Unknown,
            consecutive_failures: 0,
            last_check: None,
            active_connections: 0,
            protocol_results: BTreeMap::new(),
        }
    }
}

/// Result of applying one probe pass to the store
#[derive(Debug, Clone)]
pub struct ProbeUpdate {
    /// Classification before the pass
    pub previous: HealthStatus,
    /// Observation after the pass
    pub current: HealthObservation,
}

impl ProbeUpdate {
    pub fn changed(&self) -> bool {
        self.previous != self.current.health_status
    }
}

/// One current observation per server, last writer wins.
///
/// Scheduled and on-demand probes write here concurrently; the history of
/// transitions lives in the Guardian log, not in this store.
#[derive(Debug, Default)]
pub struct HealthStore {
    observations: RwLock<HashMap<ServerId, HealthObservation>>,
}

impl HealthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current observation, if the server was ever probed or reported on
    pub fn get(&self, id: ServerId) -> Result<Option<HealthObservation>> {
        let observations = self
            .observations
            .read()
            .map_err(|_| Error::Other("Failed to lock health observations".to_string()))?;
        Ok(observations.get(&id).cloned())
    }

    /// Live connection count, 0 when nothing was reported
    pub fn active_connections(&self, id: ServerId) -> Result<u64> {
        Ok(self.get(id)?.map(|o| o.active_connections).unwrap_or(0))
    }

    /// Point-in-time copy of every observation
    pub fn snapshot(&self) -> Result<HashMap<ServerId, HealthObservation>> {
        let observations = self
            .observations
            .read()
            .map_err(|_| Error::Other("Failed to lock health observations".to_string()))?;
        Ok(observations.clone())
    }

    /// Records a completed probe pass.
    ///
    /// The failure counter resets when every protocol answered and grows by
    /// one otherwise. The connection count is left untouched; it belongs to
    /// connection tracking.
    pub fn apply_probe(
        &self,
        id: ServerId,
        results: BTreeMap<Protocol, bool>,
        unhealthy_threshold: u32,
    ) -> Result<ProbeUpdate> {
        let mut observations = self
            .observations
            .write()
            .map_err(|_| Error::Other("Failed to lock health observations".to_string()))?;

        let entry = observations
            .entry(id)
            .or_insert_with(|| HealthObservation::unknown(id));
        let previous = entry.health_status;

        let passed = !results.is_empty() && results.values().all(|ok| *ok);
        entry.consecutive_failures = if passed {
            0
        } else {
            entry.consecutive_failures.saturating_add(1)
        };
        entry.health_status = classify(&results, entry.consecutive_failures, unhealthy_threshold);
        entry.protocol_results = results;
        entry.last_check = Some(Utc::now());

        Ok(ProbeUpdate {
            previous,
            current: entry.clone(),
        })
    }

    /// Records the connection count reported by connection tracking
    pub fn set_connections(&self, id: ServerId, active_connections: u64) -> Result<HealthObservation> {
        let mut observations = self
            .observations
            .write()
            .map_err(|_| Error::Other("Failed to lock health observations".to_string()))?;

        let entry = observations
            .entry(id)
            .or_insert_with(|| HealthObservation::unknown(id));
        entry.active_connections = active_connections;
        Ok(entry.clone())
    }

    /// Forgets a deleted server
    pub fn remove(&self, id: ServerId) -> Result<Option<HealthObservation>> {
        let mut observations = self
            .observations
            .write()
            .map_err(|_| Error::Other("Failed to lock health observations".to_string()))?;
        Ok(observations.remove(&id))
    }
}
