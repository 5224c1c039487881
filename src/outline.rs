//! Client for the Outline server management API
//!
//! Every request goes over a TLS connection pinned to the server's
//! self-signed certificate. Connections are not pooled, so the pin is
//! checked on every request.
//!
//! [`OutlineClient::rename_key`] is for operator tooling built on this
//! library. The key dialog never renames keys: ownership lives in the key
//! name, and only an operator may change it.

pub mod pinning;
mod types;

pub use pinning::{Fingerprint, FingerprintError};
pub use types::{AccessKey, ServerInfo};

use base64::Engine;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use types::{ListKeysResponse, NewAccessKey, RenameAccessKey};

/// Cipher Outline assigns to new keys unless configured otherwise
pub const DEFAULT_KEY_METHOD: &str = "chacha20-ietf-poly1305";

#[derive(Debug, Error)]
pub enum OutlineError {
    #[error("TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{method} {url} returned {status}, expected {expected}")]
    UnexpectedStatus {
        method: &'static str,
        url: String,
        status: StatusCode,
        expected: StatusCode,
    },
    #[error("key {id} was renamed to {expected:?} but reports {actual:?}")]
    RenameMismatch {
        id: String,
        expected: String,
        actual: Option<String>,
    },
}

/// Settings shared by every client
#[derive(Debug, Clone)]
pub struct OutlineSettings {
    /// Cipher for new access keys
    pub method: String,
    pub timeout: Duration,
}

impl Default for OutlineSettings {
    fn default() -> Self {
        Self {
            method: DEFAULT_KEY_METHOD.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Management API client for one Outline server
#[derive(Debug, Clone)]
pub struct OutlineClient {
    http: Client,
    management_url: String,
    method: String,
}

impl OutlineClient {
    pub fn new(
        management_url: &str,
        fingerprint: Fingerprint,
        settings: &OutlineSettings,
    ) -> Result<Self, OutlineError> {
        let tls = pinning::pinned_client_config(fingerprint)?;
        let http = Client::builder()
            .use_preconfigured_tls(tls)
            .pool_max_idle_per_host(0)
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            http,
            management_url: management_url.trim_end_matches('/').to_string(),
            method: settings.method.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.management_url)
    }

    pub async fn get_server(&self) -> Result<ServerInfo, OutlineError> {
        let url = self.url("/server");
        let response = self.http.get(&url).send().await?;
        read_json(expect_status(response, "GET", &url, StatusCode::OK)?).await
    }

    pub async fn list_keys(&self) -> Result<Vec<AccessKey>, OutlineError> {
        let url = self.url("/access-keys");
        let response = self.http.get(&url).send().await?;
        let list: ListKeysResponse =
            read_json(expect_status(response, "GET", &url, StatusCode::OK)?).await?;
        Ok(list.access_keys)
    }

    /// Look up a key; `None` if the server does not know it
    pub async fn get_key(&self, id: &str) -> Result<Option<AccessKey>, OutlineError> {
        let url = self.url(&format!("/access-keys/{id}"));
        let response = self.http.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(expect_status(response, "GET", &url, StatusCode::OK)?)
            .await
            .map(Some)
    }

    /// Create a key on the server's current port for new keys
    pub async fn create_key(&self, name: &str) -> Result<AccessKey, OutlineError> {
        let server = self.get_server().await?;
        let password = random_password();

        let url = self.url("/access-keys");
        let body = NewAccessKey {
            name,
            password: &password,
            port: server.port_for_new_access_keys,
            method: &self.method,
        };
        let response = self.http.post(&url).json(&body).send().await?;
        let key: AccessKey =
            read_json(expect_status(response, "POST", &url, StatusCode::CREATED)?).await?;

        tracing::info!(server = %server.name, key_id = %key.id, "created access key");
        Ok(key)
    }

    /// Rename a key and confirm the server stored the new name. Operator use only.
    pub async fn rename_key(&self, id: &str, new_name: &str) -> Result<AccessKey, OutlineError> {
        let url = self.url(&format!("/access-keys/{id}/name"));
        let response = self
            .http
            .put(&url)
            .json(&RenameAccessKey { name: new_name })
            .send()
            .await?;
        expect_status(response, "PUT", &url, StatusCode::NO_CONTENT)?;

        match self.get_key(id).await? {
            Some(key) if key.name == new_name => Ok(key),
            other => Err(OutlineError::RenameMismatch {
                id: id.to_string(),
                expected: new_name.to_string(),
                actual: other.map(|k| k.name),
            }),
        }
    }

    pub async fn delete_key(&self, id: &str) -> Result<(), OutlineError> {
        let url = self.url(&format!("/access-keys/{id}"));
        let response = self.http.delete(&url).send().await?;
        expect_status(response, "DELETE", &url, StatusCode::NO_CONTENT)?;
        tracing::info!(key_id = %id, "deleted access key");
        Ok(())
    }
}

fn expect_status(
    response: Response,
    method: &'static str,
    url: &str,
    expected: StatusCode,
) -> Result<Response, OutlineError> {
    let status = response.status();
    if status == expected {
        Ok(response)
    } else {
        Err(OutlineError::UnexpectedStatus {
            method,
            url: url.to_string(),
            status,
            expected,
        })
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, OutlineError> {
    Ok(response.json().await?)
}

/// Shadowsocks password for a new key
fn random_password() -> String {
    base64::engine::general_purpose::STANDARD.encode(rand::random::<[u8; 24]>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Recorded {
        method: String,
        path: String,
        body: String,
    }

    const SERVER: &str = r#"{
        "name": "sgp1",
        "serverId": "3f1c",
        "metricsEnabled": false,
        "createdTimestampMs": 1700000000000,
        "version": "1.9.2",
        "portForNewAccessKeys": 4711,
        "hostnameForAccessKeys": "203.0.113.7"
    }"#;

    const KEY: &str = r#"{
        "id": "12",
        "name": "42~ann#beef",
        "password": "pw",
        "port": 4711,
        "method": "chacha20-ietf-poly1305",
        "accessUrl": "ss://abc@203.0.113.7:4711/?outline=1"
    }"#;

    async fn read_request(stream: &mut TcpStream) -> Recorded {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let mut lines = head.lines();
        let mut request_line = lines.next().unwrap().split_whitespace();
        let method = request_line.next().unwrap().to_string();
        let path = request_line.next().unwrap().to_string();
        let content_length = lines
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .map_or(0, |(_, v)| v.trim().parse::<usize>().unwrap());

        while buf.len() < header_end + content_length {
            let n = stream.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
        }
        let body = String::from_utf8_lossy(&buf[header_end..header_end + content_length]).to_string();

        Recorded { method, path, body }
    }

    /// Plain-HTTP server answering one canned response per connection
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<Recorded>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut recorded = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                recorded.push(read_request(&mut stream).await);

                let mut response = format!("HTTP/1.1 {status} Canned\r\nconnection: close\r\n");
                if status != 204 {
                    response.push_str(&format!(
                        "content-type: application/json\r\ncontent-length: {}\r\n",
                        body.len()
                    ));
                }
                response.push_str("\r\n");
                response.push_str(body);
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();
            }
            recorded
        });

        (format!("http://{addr}/s3cret/"), handle)
    }

    fn client(url: &str) -> OutlineClient {
        OutlineClient::new(url, Fingerprint::of(b"unused over plain http"), &OutlineSettings::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_server_decodes_camel_case() {
        let (url, server) = serve(vec![(200, SERVER)]).await;

        let info = client(&url).get_server().await.unwrap();

        assert_eq!(info.name, "sgp1");
        assert_eq!(info.port_for_new_access_keys, 4711);
        let requests = server.await.unwrap();
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].path, "/s3cret/server");
    }

    #[tokio::test]
    async fn test_list_keys_unwraps_access_keys() {
        let body: &'static str = Box::leak(format!(r#"{{"accessKeys": [{KEY}]}}"#).into_boxed_str());
        let (url, _server) = serve(vec![(200, body)]).await;

        let keys = client(&url).list_keys().await.unwrap();

        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].access_url, "ss://abc@203.0.113.7:4711/?outline=1");
    }

    #[tokio::test]
    async fn test_get_key_maps_404_to_none() {
        let (url, _server) = serve(vec![(404, "{}")]).await;
        assert_eq!(client(&url).get_key("99").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_key_uses_server_port_and_method() {
        let (url, server) = serve(vec![(200, SERVER), (201, KEY)]).await;

        let key = client(&url).create_key("42~ann#beef").await.unwrap();
        assert_eq!(key.id, "12");

        let requests = server.await.unwrap();
        assert_eq!(requests[1].method, "POST");
        assert_eq!(requests[1].path, "/s3cret/access-keys");
        let sent: serde_json::Value = serde_json::from_str(&requests[1].body).unwrap();
        assert_eq!(sent["name"], "42~ann#beef");
        assert_eq!(sent["port"], 4711);
        assert_eq!(sent["method"], DEFAULT_KEY_METHOD);
        assert_eq!(sent["password"].as_str().unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_create_key_rejects_unexpected_status() {
        let (url, _server) = serve(vec![(200, SERVER), (200, KEY)]).await;

        let err = client(&url).create_key("x").await.unwrap_err();

        assert!(matches!(
            err,
            OutlineError::UnexpectedStatus { method: "POST", status, .. } if status == StatusCode::OK
        ));
    }

    #[tokio::test]
    async fn test_rename_key_checks_new_name() {
        let (url, server) = serve(vec![(204, ""), (200, KEY)]).await;

        let key = client(&url).rename_key("12", "42~ann#beef").await.unwrap();
        assert_eq!(key.name, "42~ann#beef");

        let requests = server.await.unwrap();
        assert_eq!(requests[0].method, "PUT");
        assert_eq!(requests[0].path, "/s3cret/access-keys/12/name");
        assert_eq!(requests[0].body, r#"{"name":"42~ann#beef"}"#);
    }

    #[tokio::test]
    async fn test_rename_key_detects_mismatch() {
        let (url, _server) = serve(vec![(204, ""), (200, KEY)]).await;

        let err = client(&url).rename_key("12", "something else").await.unwrap_err();

        assert!(matches!(err, OutlineError::RenameMismatch { actual: Some(_), .. }));
    }

    #[tokio::test]
    async fn test_delete_key_expects_no_content() {
        let (url, server) = serve(vec![(204, ""), (500, "{}")]).await;
        let client = client(&url);

        client.delete_key("12").await.unwrap();
        assert!(client.delete_key("12").await.is_err());

        let requests = server.await.unwrap();
        assert_eq!(requests[0].method, "DELETE");
        assert_eq!(requests[0].path, "/s3cret/access-keys/12");
    }

    #[test]
    fn test_random_password_is_base64_of_24_bytes() {
        let password = random_password();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&password)
            .unwrap();
        assert_eq!(decoded.len(), 24);
        assert_ne!(password, random_password());
    }
}
