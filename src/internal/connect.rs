use serde::{Deserialize, Serialize};
use std::net::TcpListener;
use std::path::{Path, PathBuf};

/// Suffix inserted before the extension of the proxy's own connection file
/// when deriving the private connection file for a child kernel. Keeps the
/// two processes from binding the same endpoints or clobbering each other's
/// files.
pub const CHILD_FILE_SUFFIX: &str = "-respawn";

fn default_transport() -> String {
    "tcp".to_string()
}

fn default_scheme() -> String {
    "hmac-sha256".to_string()
}

/// Contents of a Jupyter connection file: where the five channel sockets
/// live and the key used to sign messages on all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default = "default_transport")]
    pub transport: String,
    pub ip: String,
    pub shell_port: u16,
    pub iopub_port: u16,
    pub stdin_port: u16,
    pub control_port: u16,
    pub hb_port: u16,
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_scheme")]
    pub signature_scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to read connection file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid connection file JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConnectionInfo {
    pub fn load(path: &Path) -> Result<Self, ConnectError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConnectError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn endpoint(&self, port: u16) -> String {
        format!("{}://{}:{}", self.transport, self.ip, port)
    }

    pub fn shell_endpoint(&self) -> String {
        self.endpoint(self.shell_port)
    }

    pub fn iopub_endpoint(&self) -> String {
        self.endpoint(self.iopub_port)
    }

    pub fn stdin_endpoint(&self) -> String {
        self.endpoint(self.stdin_port)
    }

    pub fn control_endpoint(&self) -> String {
        self.endpoint(self.control_port)
    }

    pub fn hb_endpoint(&self) -> String {
        self.endpoint(self.hb_port)
    }

    /// Clone this connection info with five freshly allocated ports. The
    /// transport, ip, and signing key are inherited so the child speaks with
    /// the same session key as the proxy.
    pub fn with_fresh_ports(&self) -> Result<Self, ConnectError> {
        let mut listeners = Vec::with_capacity(5);
        let mut ports = [0u16; 5];
        for slot in ports.iter_mut() {
            // Keep the listeners alive until all five ports are picked so the
            // OS cannot hand the same port out twice.
            let listener = TcpListener::bind((self.ip.as_str(), 0))?;
            *slot = listener.local_addr()?.port();
            listeners.push(listener);
        }
        drop(listeners);

        let mut fresh = self.clone();
        fresh.shell_port = ports[0];
        fresh.iopub_port = ports[1];
        fresh.stdin_port = ports[2];
        fresh.control_port = ports[3];
        fresh.hb_port = ports[4];
        Ok(fresh)
    }
}

/// Derive the child kernel's connection file path from the proxy's, inserting
/// the fixed suffix before the extension: `kernel-1234.json` becomes
/// `kernel-1234-respawn.json`.
pub fn derive_child_file(parent: &Path) -> PathBuf {
    let stem = parent
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match parent.extension() {
        Some(ext) => format!("{}{}.{}", stem, CHILD_FILE_SUFFIX, ext.to_string_lossy()),
        None => format!("{}{}", stem, CHILD_FILE_SUFFIX),
    };
    parent.with_file_name(name)
}
