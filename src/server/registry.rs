use crate::config::validator::{
    parse_ip_address, parse_protocols, validate_capacity, validate_country_code, validate_name,
    validate_protocol_settings, validate_server_draft,
};
use crate::error::{Error, Result};
use crate::server::{
    ServerDraft, ServerId, ServerPatch, ServerRecord, ServerStatus, SshCredentials,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// Registry entry: the public record plus write-only credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredServer {
    record: ServerRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ssh: Option<SshCredentials>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    servers: Vec<StoredServer>,
}

type ServerMap = HashMap<ServerId, StoredServer>;

/// Authoritative store of server records.
///
/// Reads work on an immutable snapshot that writers swap out, so `get` and
/// `list` never wait for a write in progress. Writers are serialized among
/// themselves and persist before publishing, so a failed write leaves both
/// the file and the visible state untouched.
pub struct ServerRegistry {
    current: RwLock<Arc<ServerMap>>,
    writer: Mutex<()>,
    path: Option<PathBuf>,
}

impl ServerRegistry {
    /// Registry living only in memory
    pub fn in_memory() -> Self {
        Self {
            current: RwLock::new(Arc::new(HashMap::new())),
            writer: Mutex::new(()),
            path: None,
        }
    }

    /// Registry persisted to a JSON file, loading it when it exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let servers = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                Error::Persistence(format!("Failed to read registry {}: {}", path.display(), e))
            })?;
            let file: RegistryFile = serde_json::from_str(&content).map_err(|e| {
                Error::Persistence(format!("Failed to parse registry {}: {}", path.display(), e))
            })?;
            file.servers
                .into_iter()
                .map(|s| (s.record.id, s))
                .collect::<ServerMap>()
        } else {
            HashMap::new()
        };

        tracing::info!(
            path = %path.display(),
            servers = servers.len(),
            "Server registry loaded"
        );

        Ok(Self {
            current: RwLock::new(Arc::new(servers)),
            writer: Mutex::new(()),
            path: Some(path),
        })
    }

    fn snapshot_map(&self) -> Result<Arc<ServerMap>> {
        let current = self
            .current
            .read()
            .map_err(|_| Error::Other("Failed to lock server registry".to_string()))?;
        Ok(Arc::clone(&current))
    }

    /// Runs `mutate` on a private copy, persists it, then publishes it
    fn write<T>(&self, mutate: impl FnOnce(&mut ServerMap) -> Result<T>) -> Result<T> {
        let _guard = self
            .writer
            .lock()
            .map_err(|_| Error::Other("Failed to lock registry writer".to_string()))?;

        let mut next = (*self.snapshot_map()?).clone();
        let value = mutate(&mut next)?;
        self.persist(&next)?;

        let mut current = self
            .current
            .write()
            .map_err(|_| Error::Other("Failed to lock server registry".to_string()))?;
        *current = Arc::new(next);

        Ok(value)
    }

    /// Rewrites the registry file in place of the old one.
    ///
    /// Runs synchronously under the writer lock: the file holds one small
    /// JSON document and writes only happen on operator changes, never on
    /// the probe path.
    fn persist(&self, servers: &ServerMap) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut list: Vec<StoredServer> = servers.values().cloned().collect();
        list.sort_by_key(|s| s.record.created_at);
        let json = serde_json::to_string_pretty(&RegistryFile { servers: list })
            .map_err(|e| Error::Persistence(format!("Failed to serialize registry: {}", e)))?;

        // Write next to the target and rename over it
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| {
            Error::Persistence(format!("Failed to write registry {}: {}", tmp.display(), e))
        })?;
        std::fs::rename(&tmp, path).map_err(|e| {
            Error::Persistence(format!("Failed to replace registry {}: {}", path.display(), e))
        })?;

        Ok(())
    }

    /// Validates a draft and stores it under a fresh id
    pub fn create(&self, draft: ServerDraft) -> Result<ServerRecord> {
        validate_server_draft(&draft)?;

        let status = match &draft.status {
            Some(status) => status.parse::<ServerStatus>()?,
            None => ServerStatus::Active,
        };
        let ssh = draft.ssh.filter(|c| c.has_secret());
        let now = Utc::now();

        let record = ServerRecord {
            id: ServerId::new(),
            name: validate_name(&draft.name)?,
            location: draft.location.trim().to_string(),
            country_code: validate_country_code(&draft.country_code)?,
            ip_address: parse_ip_address(&draft.ip_address)?,
            capacity: validate_capacity(draft.capacity)?,
            protocols: parse_protocols(&draft.protocols)?,
            status,
            protocol_settings: draft.protocol_settings,
            bandwidth_limit: draft.bandwidth_limit,
            ssh_configured: ssh.is_some(),
            created_at: now,
            updated_at: now,
        };

        self.write(|servers| {
            servers.insert(
                record.id,
                StoredServer {
                    record: record.clone(),
                    ssh,
                },
            );
            Ok(())
        })?;

        tracing::info!(
            server_id = %record.id,
            name = %record.name,
            status = %record.status,
            "Server registered"
        );

        Ok(record)
    }

    /// Applies a partial update.
    ///
    /// Omitted fields keep their value. SSH credentials are merged field by
    /// field, so leaving them out never clears what is stored.
    pub fn update(&self, id: ServerId, patch: ServerPatch) -> Result<ServerRecord> {
        self.write(|servers| {
            let stored = servers
                .get_mut(&id)
                .ok_or_else(|| Error::ServerNotFound(id.to_string()))?;

            let mut record = stored.record.clone();
            if let Some(name) = &patch.name {
                record.name = validate_name(name)?;
            }
            if let Some(ip) = &patch.ip_address {
                record.ip_address = parse_ip_address(ip)?;
            }
            if let Some(capacity) = patch.capacity {
                record.capacity = validate_capacity(capacity)?;
            }
            if let Some(protocols) = &patch.protocols {
                record.protocols = parse_protocols(protocols)?;
            }
            if let Some(code) = &patch.country_code {
                record.country_code = validate_country_code(code)?;
            }
            if let Some(settings) = patch.protocol_settings {
                validate_protocol_settings(&settings)?;
                record.protocol_settings = settings;
            }
            if let Some(location) = patch.location {
                record.location = location.trim().to_string();
            }
            if let Some(limit) = patch.bandwidth_limit {
                record.bandwidth_limit = limit;
            }

            let mut ssh = stored.ssh.clone();
            if let Some(ssh_patch) = patch.ssh {
                match ssh.as_mut() {
                    Some(existing) => existing.merge(ssh_patch),
                    None => ssh = Some(SshCredentials::from(ssh_patch)),
                }
            }
            let ssh = ssh.filter(|c| c.has_secret());

            record.ssh_configured = ssh.is_some();
            record.updated_at = Utc::now();

            stored.record = record.clone();
            stored.ssh = ssh;
            Ok(record)
        })
    }

    /// Sets the operator status; only the lifecycle controller calls this
    pub(crate) fn set_status(&self, id: ServerId, status: ServerStatus) -> Result<ServerRecord> {
        self.write(|servers| {
            let stored = servers
                .get_mut(&id)
                .ok_or_else(|| Error::ServerNotFound(id.to_string()))?;
            stored.record.status = status;
            stored.record.updated_at = Utc::now();
            Ok(stored.record.clone())
        })
    }

    /// Removes a record; only the lifecycle controller calls this, after the deletion guard
    pub(crate) fn remove(&self, id: ServerId) -> Result<ServerRecord> {
        self.write(|servers| {
            servers
                .remove(&id)
                .map(|s| s.record)
                .ok_or_else(|| Error::ServerNotFound(id.to_string()))
        })
    }

    pub fn get(&self, id: ServerId) -> Result<ServerRecord> {
        self.snapshot_map()?
            .get(&id)
            .map(|s| s.record.clone())
            .ok_or_else(|| Error::ServerNotFound(id.to_string()))
    }

    /// Every record regardless of status, oldest first
    pub fn list(&self) -> Result<Vec<ServerRecord>> {
        let mut records: Vec<ServerRecord> = self
            .snapshot_map()?
            .values()
            .map(|s| s.record.clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.snapshot_map()?.is_empty())
    }

    /// Stored credentials, for the SSH test only
    pub(crate) fn ssh_credentials(&self, id: ServerId) -> Result<Option<SshCredentials>> {
        self.snapshot_map()?
            .get(&id)
            .map(|s| s.ssh.clone())
            .ok_or_else(|| Error::ServerNotFound(id.to_string()))
    }
}
