//! Per-user view of access keys across the inventory
//!
//! Outline has no notion of key owners, so ownership is encoded in the key
//! name: `"{user_id}~{username}#{suffix}"`.

#[cfg(test)]
pub mod testing;

use crate::inventory::{Inventory, InventoryError, Server, ServerKind};
use crate::outline::{AccessKey, OutlineClient, OutlineError, OutlineSettings};
use crate::session::ChatUser;
use async_trait::async_trait;
use futures::future::try_join_all;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

const UNNAMED: &str = "<unnamed>";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error("server {server}: {source}")]
    Outline {
        server: String,
        #[source]
        source: OutlineError,
    },
    #[error("server {0:?} not found")]
    UnknownServer(String),
    #[error("{0} servers are not supported")]
    Unsupported(ServerKind),
    #[error("key {id} on {server} does not belong to the user")]
    NotOwned { server: String, id: String },
}

impl KeyError {
    fn outline(server: &Server, source: OutlineError) -> Self {
        KeyError::Outline {
            server: server.name.clone(),
            source,
        }
    }
}

/// An access key together with the server it lives on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserKey {
    pub server: Server,
    pub key: AccessKey,
}

/// Key operations the dialog needs
#[async_trait]
pub trait KeyBackend: Send + Sync {
    async fn servers(&self) -> Result<Vec<Server>, KeyError>;

    async fn list_user_keys(&self, user: &ChatUser) -> Result<Vec<UserKey>, KeyError>;

    async fn create_key(&self, server: &str, user: &ChatUser) -> Result<UserKey, KeyError>;

    async fn delete_key(&self, server: &str, id: &str, user: &ChatUser) -> Result<(), KeyError>;
}

#[async_trait]
impl<T: KeyBackend + ?Sized> KeyBackend for Arc<T> {
    async fn servers(&self) -> Result<Vec<Server>, KeyError> {
        (**self).servers().await
    }

    async fn list_user_keys(&self, user: &ChatUser) -> Result<Vec<UserKey>, KeyError> {
        (**self).list_user_keys(user).await
    }

    async fn create_key(&self, server: &str, user: &ChatUser) -> Result<UserKey, KeyError> {
        (**self).create_key(server, user).await
    }

    async fn delete_key(&self, server: &str, id: &str, user: &ChatUser) -> Result<(), KeyError> {
        (**self).delete_key(server, id, user).await
    }
}

/// `"{id}~{username}"`, the ownership prefix of a key name
pub fn owner_tag(user: &ChatUser) -> String {
    format!("{}~{}", user.id, user.username.as_deref().unwrap_or(UNNAMED))
}

/// Fresh key name for `user`; the suffix keeps names unique per user
pub fn key_name_for(user: &ChatUser) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}#{suffix:08x}", owner_tag(user))
}

/// Whether `key_name` was issued to `user`
pub fn belongs_to(key_name: &str, user: &ChatUser) -> bool {
    key_name
        .split_once('~')
        .is_some_and(|(owner, _)| owner == user.id.to_string())
}

/// Keys service backed by the Outline servers in an inventory file
#[derive(Debug, Clone)]
pub struct OutlineKeys {
    inventory_path: PathBuf,
    settings: OutlineSettings,
}

impl OutlineKeys {
    pub fn new(inventory_path: impl Into<PathBuf>, settings: OutlineSettings) -> Self {
        Self {
            inventory_path: inventory_path.into(),
            settings,
        }
    }

    async fn inventory(&self) -> Result<Inventory, KeyError> {
        Ok(Inventory::load(&self.inventory_path).await?)
    }

    fn client(&self, server: &Server) -> Result<OutlineClient, KeyError> {
        OutlineClient::new(&server.management_api, server.fingerprint, &self.settings)
            .map_err(|e| KeyError::outline(server, e))
    }

    /// Outline server named `name`
    async fn outline_server(&self, name: &str) -> Result<Server, KeyError> {
        let inventory = self.inventory().await?;
        let server = inventory
            .find(name)
            .ok_or_else(|| KeyError::UnknownServer(name.to_string()))?;
        match server.kind {
            ServerKind::Outline => Ok(server.clone()),
            other => Err(KeyError::Unsupported(other)),
        }
    }

    async fn server_keys(&self, server: &Server, user: &ChatUser) -> Result<Vec<UserKey>, KeyError> {
        let keys = self
            .client(server)?
            .list_keys()
            .await
            .map_err(|e| KeyError::outline(server, e))?;
        Ok(keys
            .into_iter()
            .filter(|key| belongs_to(&key.name, user))
            .map(|key| UserKey {
                server: server.clone(),
                key,
            })
            .collect())
    }
}

#[async_trait]
impl KeyBackend for OutlineKeys {
    async fn servers(&self) -> Result<Vec<Server>, KeyError> {
        Ok(self.inventory().await?.servers().to_vec())
    }

    async fn list_user_keys(&self, user: &ChatUser) -> Result<Vec<UserKey>, KeyError> {
        let inventory = self.inventory().await?;
        let per_server =
            try_join_all(inventory.outline_servers().map(|server| self.server_keys(server, user)))
                .await?;
        Ok(per_server.into_iter().flatten().collect())
    }

    async fn create_key(&self, server: &str, user: &ChatUser) -> Result<UserKey, KeyError> {
        let server = self.outline_server(server).await?;
        let key = self
            .client(&server)?
            .create_key(&key_name_for(user))
            .await
            .map_err(|e| KeyError::outline(&server, e))?;
        tracing::info!(server = %server.name, user = user.id, key_id = %key.id, "issued key");
        Ok(UserKey { server, key })
    }

    async fn delete_key(&self, server: &str, id: &str, user: &ChatUser) -> Result<(), KeyError> {
        let server = self.outline_server(server).await?;
        let client = self.client(&server)?;

        let owned = client
            .get_key(id)
            .await
            .map_err(|e| KeyError::outline(&server, e))?
            .is_some_and(|key| belongs_to(&key.name, user));
        if !owned {
            return Err(KeyError::NotOwned {
                server: server.name,
                id: id.to_string(),
            });
        }

        client
            .delete_key(id)
            .await
            .map_err(|e| KeyError::outline(&server, e))?;
        tracing::info!(server = %server.name, user = user.id, key_id = %id, "revoked key");
        Ok(())
    }
}
