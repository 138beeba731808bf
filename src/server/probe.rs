// src/server/probe.rs
use crate::error::{Error, Result};
use crate::server::{ProbeTransport, Protocol, ServerId, SshCredentials};
use async_process::{Command, Stdio};
use async_trait::async_trait;
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};

/// One protocol endpoint to check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub server_id: ServerId,
    pub address: IpAddr,
    pub protocol: Protocol,
    pub port: u16,
}

impl ProbeTarget {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Reachability check for one protocol endpoint.
///
/// Implementations return `Ok(())` when the endpoint answered and a
/// `ProbeConnection`/`ProbeTimeout` error otherwise. The caller applies its
/// own deadline on top.
#[async_trait]
pub trait ProtocolProber: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> Result<()>;
}

/// Probes endpoints over the network: TCP connect for stream protocols,
/// a datagram for UDP ones.
#[derive(Debug, Clone)]
pub struct NetworkProber {
    udp_wait: Duration,
}

impl NetworkProber {
    /// `udp_wait` is how long a UDP probe listens for an ICMP rejection
    pub fn new(udp_wait: Duration) -> Self {
        Self { udp_wait }
    }

    async fn probe_tcp(&self, addr: SocketAddr) -> Result<()> {
        TcpStream::connect(addr)
            .await
            .map(|_| ())
            .map_err(|e| Error::ProbeConnection(format!("tcp {}: {}", addr, e)))
    }

    async fn probe_udp(&self, addr: SocketAddr) -> Result<()> {
        let bind: SocketAddr = match addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| Error::ProbeConnection(format!("udp bind: {}", e)))?;
        socket
            .connect(addr)
            .await
            .map_err(|e| Error::ProbeConnection(format!("udp {}: {}", addr, e)))?;
        socket
            .send(&[0u8; 1])
            .await
            .map_err(|e| Error::ProbeConnection(format!("udp {}: {}", addr, e)))?;

        // Closed ports answer with ICMP port unreachable, surfaced as an error on
        // the connected socket. Tunnel endpoints drop unauthenticated datagrams.
        let mut buf = [0u8; 512];
        match tokio::time::timeout(self.udp_wait, socket.recv(&mut buf)).await {
            Err(_) | Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(Error::ProbeConnection(format!("udp {}: {}", addr, e))),
        }
    }
}

#[async_trait]
impl ProtocolProber for NetworkProber {
    async fn probe(&self, target: &ProbeTarget) -> Result<()> {
        let addr = target.socket_addr();
        tracing::trace!(
            server_id = %target.server_id,
            protocol = target.protocol.as_str(),
            %addr,
            "Probing endpoint"
        );
        match target.protocol.transport() {
            ProbeTransport::Tcp => self.probe_tcp(addr).await,
            ProbeTransport::Udp => self.probe_udp(addr).await,
        }
    }
}

/// Host and credentials for an SSH test
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub server_id: ServerId,
    pub address: IpAddr,
    pub credentials: SshCredentials,
}

/// Result of an SSH connectivity test
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshTestResult {
    pub connected: bool,
    /// Remote output on success, the client's diagnostics otherwise
    pub output: String,
}

/// SSH login test
#[async_trait]
pub trait SshTester: Send + Sync {
    async fn test(&self, target: &SshTarget, connect_timeout: Duration) -> Result<SshTestResult>;
}

/// Runs the system `ssh` client (through `sshpass` for password logins)
#[derive(Debug, Clone)]
pub struct OpenSshTester {
    ssh_binary: String,
    sshpass_binary: String,
}

/// Private key written for the duration of one test
struct KeyFile(PathBuf);

impl KeyFile {
    fn write(key: &str) -> Result<Self> {
        let path = std::env::temp_dir().join(format!("fleet-guardian-{}.key", uuid::Uuid::new_v4()));
        let mut contents = key.trim().to_string();
        contents.push('\n');
        std::fs::write(&path, contents)
            .map_err(|e| Error::Other(format!("Failed to write SSH key file: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::Other(format!("Failed to restrict SSH key file: {}", e)))?;
        }

        Ok(Self(path))
    }
}

impl Drop for KeyFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            tracing::warn!(path = %self.0.display(), error = %e, "Failed to remove SSH key file");
        }
    }
}

impl OpenSshTester {
    pub fn new(ssh_binary: impl Into<String>, sshpass_binary: impl Into<String>) -> Self {
        Self {
            ssh_binary: ssh_binary.into(),
            sshpass_binary: sshpass_binary.into(),
        }
    }

    fn common_args(target: &SshTarget, connect_timeout: Duration) -> Vec<String> {
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)),
            "-p".to_string(),
            target.credentials.port.to_string(),
        ]
    }
}

#[async_trait]
impl SshTester for OpenSshTester {
    async fn test(&self, target: &SshTarget, connect_timeout: Duration) -> Result<SshTestResult> {
        let creds = &target.credentials;
        let destination = format!("{}@{}", creds.username, target.address);
        let mut args = Self::common_args(target, connect_timeout);

        let key = creds.private_key.as_deref().filter(|k| !k.trim().is_empty());
        let _key_file;
        let mut command = match key {
            Some(key) => {
                let file = KeyFile::write(key)?;
                args.extend([
                    "-o".to_string(),
                    "BatchMode=yes".to_string(),
                    "-i".to_string(),
                    file.0.display().to_string(),
                ]);
                _key_file = Some(file);
                Command::new(&self.ssh_binary)
            }
            None => {
                let password = creds
                    .password
                    .as_deref()
                    .ok_or_else(|| Error::CredentialsMissing(target.server_id.to_string()))?;
                _key_file = None;
                let mut command = Command::new(&self.sshpass_binary);
                command
                    .env("SSHPASS", password)
                    .arg("-e")
                    .arg(&self.ssh_binary);
                args.extend([
                    "-o".to_string(),
                    "PreferredAuthentications=password,keyboard-interactive".to_string(),
                    "-o".to_string(),
                    "PubkeyAuthentication=no".to_string(),
                ]);
                command
            }
        };

        command
            .args(&args)
            .arg(&destination)
            .arg("echo connected && uname -a")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(server_id = %target.server_id, %destination, "Running SSH test");

        let output = match command.output().await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(server_id = %target.server_id, error = %e, "Failed to launch ssh client");
                return Ok(SshTestResult {
                    connected: false,
                    output: format!("failed to launch ssh client: {}", e),
                });
            }
        };

        let connected = output.status.success();
        let text = if connected {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            String::from_utf8_lossy(&output.stderr).trim().to_string()
        };

        Ok(SshTestResult {
            connected,
            output: text,
        })
    }
}
