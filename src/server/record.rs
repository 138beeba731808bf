// src/server/record.rs
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

/// Unique, immutable identifier of a registered server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(Uuid);

impl ServerId {
    // Fresh ids are only minted by the registry
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServerId {
    type Err = Error;

    // A malformed id can never match a registered server
    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::ServerNotFound(s.to_string()))
    }
}

/// Operator intent for a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Serving users
    Active,
    /// Draining, users are migrated away
    Maintenance,
    /// Out of rotation, not probed
    Offline,
}

impl ServerStatus {
    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Active => "active",
            ServerStatus::Maintenance => "maintenance",
            ServerStatus::Offline => "offline",
        }
    }

    /// Whether the Guardian probes servers in this status
    pub fn is_probed(&self) -> bool {
        !matches!(self, ServerStatus::Offline)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(ServerStatus::Active),
            "maintenance" => Ok(ServerStatus::Maintenance),
            "offline" => Ok(ServerStatus::Offline),
            other => Err(Error::validation(
                "status",
                format!("unknown status '{}', expected active, maintenance or offline", other),
            )),
        }
    }
}

/// Transport a protocol's reachability check runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeTransport {
    /// Connection-oriented check
    Tcp,
    /// Datagram check
    Udp,
}

/// Tunnel protocols a server may enable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Shadowsocks,
    Trojan,
    V2ray,
    Vless,
    Wireguard,
    Hysteria,
}

impl Protocol {
    /// The fixed protocol vocabulary
    pub const ALL: [Protocol; 6] = [
        Protocol::Shadowsocks,
        Protocol::Trojan,
        Protocol::V2ray,
        Protocol::Vless,
        Protocol::Wireguard,
        Protocol::Hysteria,
    ];

    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::Trojan => "trojan",
            Protocol::V2ray => "v2ray",
            Protocol::Vless => "vless",
            Protocol::Wireguard => "wireguard",
            Protocol::Hysteria => "hysteria",
        }
    }

    /// Port probed when the server has no explicit port for this protocol
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Shadowsocks => 8388,
            Protocol::Trojan => 443,
            Protocol::V2ray => 10086,
            Protocol::Vless => 443,
            Protocol::Wireguard => 51820,
            Protocol::Hysteria => 443,
        }
    }

    /// Transport used to check reachability
    pub fn transport(&self) -> ProbeTransport {
        match self {
            Protocol::Wireguard | Protocol::Hysteria => ProbeTransport::Udp,
            _ => ProbeTransport::Tcp,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Protocol::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| Error::validation("protocols", format!("unknown protocol '{}'", s)))
    }
}

/// Per-protocol configuration.
///
/// Opaque to the controller apart from `port`, which the Guardian probes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSettings {
    /// Listening port, the protocol default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Protocol specific options (ciphers, paths, keys)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, serde_json::Value>,
}

/// SSH access used by the on-demand connectivity test.
///
/// Credentials are write-only: they are stored by the registry but never
/// part of a [`ServerRecord`] handed back to callers.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SshCredentials {
    /// Login user
    #[serde(default = "default_ssh_user")]
    pub username: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// PEM/OpenSSH private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    /// Password, used when no key is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

impl SshCredentials {
    /// Whether a key or a password is present
    pub fn has_secret(&self) -> bool {
        self.private_key.as_deref().is_some_and(|k| !k.trim().is_empty())
            || self.password.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Merge a partial update; omitted fields keep their stored value
    pub fn merge(&mut self, patch: SshPatch) {
        if let Some(username) = patch.username {
            self.username = username;
        }
        if let Some(port) = patch.port {
            self.port = port;
        }
        if let Some(key) = patch.private_key {
            self.private_key = Some(key);
        }
        if let Some(password) = patch.password {
            self.password = Some(password);
        }
    }
}

// Secrets must never end up in logs
impl fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredentials")
            .field("username", &self.username)
            .field("port", &self.port)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Partial SSH credential update
#[derive(Clone, Default, Deserialize)]
pub struct SshPatch {
    pub username: Option<String>,
    pub port: Option<u16>,
    pub private_key: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for SshPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshPatch")
            .field("username", &self.username)
            .field("port", &self.port)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl From<SshPatch> for SshCredentials {
    fn from(patch: SshPatch) -> Self {
        let mut creds = SshCredentials {
            username: default_ssh_user(),
            port: default_ssh_port(),
            private_key: None,
            password: None,
        };
        creds.merge(patch);
        creds
    }
}

/// Registry-owned server record as returned by every read operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: ServerId,
    pub name: String,
    pub location: String,
    pub country_code: String,
    pub ip_address: IpAddr,
    /// Maximum concurrent connections, always at least 1
    pub capacity: u32,
    /// Enabled protocols, never empty
    pub protocols: BTreeSet<Protocol>,
    pub status: ServerStatus,
    #[serde(default)]
    pub protocol_settings: BTreeMap<Protocol, ProtocolSettings>,
    /// Bandwidth cap, 0 means unlimited
    #[serde(default)]
    pub bandwidth_limit: u64,
    /// Whether SSH credentials are stored (the credentials themselves are never returned)
    #[serde(default)]
    pub ssh_configured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServerRecord {
    /// Port the Guardian probes for `protocol`
    pub fn port_for(&self, protocol: Protocol) -> u16 {
        self.protocol_settings
            .get(&protocol)
            .and_then(|s| s.port)
            .unwrap_or_else(|| protocol.default_port())
    }
}

/// Input of `createServer`: a server record without an id.
///
/// Numeric and enum fields are kept loose here so that bad input surfaces
/// as a field-level validation error instead of a decoding failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerDraft {
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub country_code: String,
    pub ip_address: String,
    pub capacity: i64,
    pub protocols: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub protocol_settings: BTreeMap<Protocol, ProtocolSettings>,
    #[serde(default)]
    pub bandwidth_limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshCredentials>,
}

/// Input of `updateServer`: every field optional, omitted means unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerPatch {
    pub name: Option<String>,
    pub location: Option<String>,
    pub country_code: Option<String>,
    pub ip_address: Option<String>,
    pub capacity: Option<i64>,
    pub protocols: Option<Vec<String>>,
    pub protocol_settings: Option<BTreeMap<Protocol, ProtocolSettings>>,
    pub bandwidth_limit: Option<u64>,
    pub ssh: Option<SshPatch>,
}

impl ServerPatch {
    /// Names of the fields this patch touches
    pub fn touched_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push("name");
        }
        if self.location.is_some() {
            fields.push("location");
        }
        if self.country_code.is_some() {
            fields.push("country_code");
        }
        if self.ip_address.is_some() {
            fields.push("ip_address");
        }
        if self.capacity.is_some() {
            fields.push("capacity");
        }
        if self.protocols.is_some() {
            fields.push("protocols");
        }
        if self.protocol_settings.is_some() {
            fields.push("protocol_settings");
        }
        if self.bandwidth_limit.is_some() {
            fields.push("bandwidth_limit");
        }
        if self.ssh.is_some() {
            fields.push("ssh");
        }
        fields
    }
}
