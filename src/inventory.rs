//! Server inventory file
//!
//! A JSON array of servers the bot may hand out keys on. The file is read on
//! every use so operators can add or retire servers without a restart.

use crate::outline::Fingerprint;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to read inventory {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid inventory: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("server {0:?} is listed twice")]
    DuplicateServer(String),
}

/// VPN flavour a server runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Outline,
    Amnezia,
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerKind::Outline => f.write_str("outline"),
            ServerKind::Amnezia => f.write_str("amnezia"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Server {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ServerKind,
    #[serde(rename = "managementAPI")]
    pub management_api: String,
    #[serde(rename = "sha256fingerprint")]
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    servers: Vec<Server>,
}

impl Inventory {
    pub async fn load(path: &Path) -> Result<Self, InventoryError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| InventoryError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let inventory = Self::parse(&raw)?;
        tracing::debug!(path = %path.display(), servers = inventory.servers.len(), "loaded inventory");
        Ok(inventory)
    }

    /// Server names are the user-facing identifiers and must be unique
    pub fn parse(raw: &str) -> Result<Self, InventoryError> {
        let servers: Vec<Server> = serde_json::from_str(raw)?;

        let mut seen = HashSet::new();
        if let Some(dup) = servers.iter().find(|s| !seen.insert(s.name.as_str())) {
            return Err(InventoryError::DuplicateServer(dup.name.clone()));
        }

        Ok(Self { servers })
    }

    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn outline_servers(&self) -> impl Iterator<Item = &Server> {
        self.servers.iter().filter(|s| s.kind == ServerKind::Outline)
    }

    pub fn find(&self, name: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.name == name)
    }
}
