//! Outline management API wire types

use serde::{Deserialize, Serialize};

/// Response of `GET /server`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub server_id: String,
    pub metrics_enabled: bool,
    pub created_timestamp_ms: u64,
    pub version: String,
    pub port_for_new_access_keys: u16,
    pub hostname_for_access_keys: String,
}

/// One access key
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKey {
    pub id: String,
    pub name: String,
    pub password: String,
    pub port: u16,
    pub method: String,
    pub access_url: String,
}

/// Response of `GET /access-keys`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ListKeysResponse {
    pub access_keys: Vec<AccessKey>,
}

/// Body of `POST /access-keys`
#[derive(Debug, Serialize)]
pub(super) struct NewAccessKey<'a> {
    pub name: &'a str,
    pub password: &'a str,
    pub port: u16,
    pub method: &'a str,
}

/// Body of `PUT /access-keys/{id}/name`
#[derive(Debug, Serialize)]
pub(super) struct RenameAccessKey<'a> {
    pub name: &'a str,
}
