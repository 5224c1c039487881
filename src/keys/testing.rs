//! In-memory key backend for dialog tests

use super::{belongs_to, key_name_for, KeyBackend, KeyError, UserKey};
use crate::inventory::{Server, ServerKind};
use crate::outline::{AccessKey, Fingerprint, OutlineError};
use crate::session::ChatUser;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Mutex;

pub fn server(name: &str, kind: ServerKind) -> Server {
    Server {
        name: name.to_string(),
        kind,
        management_api: format!("https://{name}.test/api"),
        fingerprint: Fingerprint::of(name.as_bytes()),
    }
}

#[derive(Debug, Default)]
struct State {
    keys: Vec<UserKey>,
    next_id: u32,
    deleted: Vec<(String, String)>,
}

/// Key backend holding everything in memory
#[derive(Debug, Default)]
pub struct MemoryKeys {
    servers: Vec<Server>,
    state: Mutex<State>,
    failing: Mutex<bool>,
}

impl MemoryKeys {
    pub fn new(servers: Vec<Server>) -> Self {
        Self {
            servers,
            ..Self::default()
        }
    }

    /// Seed a key on `server` with an explicit name
    pub fn insert(&self, server: &str, name: &str) -> UserKey {
        let server = self
            .servers
            .iter()
            .find(|s| s.name == server)
            .cloned()
            .unwrap();
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id.to_string();
        let key = UserKey {
            key: AccessKey {
                id: id.clone(),
                name: name.to_string(),
                password: "pw".to_string(),
                port: 443,
                method: "chacha20-ietf-poly1305".to_string(),
                access_url: format!("ss://{id}@{}:443", server.name),
            },
            server,
        };
        state.keys.push(key.clone());
        key
    }

    /// Make every following call fail with a server error
    pub fn fail(&self) {
        *self.failing.lock().unwrap() = true;
    }

    pub fn keys(&self) -> Vec<UserKey> {
        self.state.lock().unwrap().keys.clone()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().deleted.clone()
    }

    fn check(&self) -> Result<(), KeyError> {
        if *self.failing.lock().unwrap() {
            Err(KeyError::Outline {
                server: "memory".to_string(),
                source: OutlineError::UnexpectedStatus {
                    method: "GET",
                    url: "https://memory.test/api/access-keys".to_string(),
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    expected: StatusCode::OK,
                },
            })
        } else {
            Ok(())
        }
    }

    fn outline(&self, name: &str) -> Result<&Server, KeyError> {
        let server = self
            .servers
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| KeyError::UnknownServer(name.to_string()))?;
        match server.kind {
            ServerKind::Outline => Ok(server),
            other => Err(KeyError::Unsupported(other)),
        }
    }
}

#[async_trait]
impl KeyBackend for MemoryKeys {
    async fn servers(&self) -> Result<Vec<Server>, KeyError> {
        self.check()?;
        Ok(self.servers.clone())
    }

    async fn list_user_keys(&self, user: &ChatUser) -> Result<Vec<UserKey>, KeyError> {
        self.check()?;
        Ok(self
            .keys()
            .into_iter()
            .filter(|k| belongs_to(&k.key.name, user))
            .collect())
    }

    async fn create_key(&self, server: &str, user: &ChatUser) -> Result<UserKey, KeyError> {
        self.check()?;
        let name = self.outline(server)?.name.clone();
        Ok(self.insert(&name, &key_name_for(user)))
    }

    async fn delete_key(&self, server: &str, id: &str, user: &ChatUser) -> Result<(), KeyError> {
        self.check()?;
        self.outline(server)?;

        let mut state = self.state.lock().unwrap();
        let position = state
            .keys
            .iter()
            .position(|k| k.server.name == server && k.key.id == id && belongs_to(&k.key.name, user))
            .ok_or_else(|| KeyError::NotOwned {
                server: server.to_string(),
                id: id.to_string(),
            })?;
        state.keys.remove(position);
        state.deleted.push((server.to_string(), id.to_string()));
        Ok(())
    }
}
