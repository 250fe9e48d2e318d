//! JSON-over-HTTP clients for the control plane and roster service.
//!
//! Each call opens one HTTP/1 connection, sends a request, and decodes a
//! JSON body. Connect failures and timeouts map to
//! [`ClientError::Unavailable`], non-2xx statuses to
//! [`ClientError::Rejected`], undecodable bodies to
//! [`ClientError::Malformed`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use appdash_state::DatabaseInfo;

use crate::client::{ClientError, ClientResult, ControlPlane, NodeFact, Permission, Roster};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimal JSON transport bound to one `host:port`.
#[derive(Debug, Clone)]
struct JsonTransport {
    address: String,
    timeout: Duration,
}

impl JsonTransport {
    fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let body = self.send(Method::GET, path, None, None).await?;
        decode(&body, path)
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        payload: &B,
    ) -> ClientResult<T> {
        let body = self.send_json_raw(method, path, payload).await?;
        decode(&body, path)
    }

    /// Like [`Self::send_json`] for calls whose response body carries nothing.
    async fn send_json_unit<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        payload: &B,
    ) -> ClientResult<()> {
        self.send_json_raw(method, path, payload).await.map(|_| ())
    }

    async fn send_json_raw<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        payload: &B,
    ) -> ClientResult<Bytes> {
        let encoded = serde_json::to_vec(payload)
            .map_err(|e| ClientError::Malformed(format!("encode {path}: {e}")))?;
        self.send(method, path, Some(Bytes::from(encoded)), Some("application/json"))
            .await
    }

    async fn send_raw<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        payload: Bytes,
    ) -> ClientResult<T> {
        let body = self
            .send(method, path, Some(payload), Some("application/octet-stream"))
            .await?;
        decode(&body, path)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        payload: Option<Bytes>,
        content_type: Option<&str>,
    ) -> ClientResult<Bytes> {
        let uri = format!("http://{}{path}", self.address);

        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&self.address)
                .await
                .map_err(|e| ClientError::Unavailable(format!("connect {uri}: {e}")))?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| ClientError::Unavailable(format!("handshake {uri}: {e}")))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let mut builder = http::Request::builder()
                .method(method)
                .uri(&uri)
                .header("host", self.address.as_str())
                .header("user-agent", "appdash/0.1")
                .header("accept", "application/json");
            if let Some(ct) = content_type {
                builder = builder.header("content-type", ct);
            }
            let req = builder
                .body(Full::new(payload.unwrap_or_default()))
                .map_err(|e| ClientError::Malformed(format!("build {uri}: {e}")))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| ClientError::Unavailable(format!("request {uri}: {e}")))?;
            let status = resp.status();
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| ClientError::Unavailable(format!("read {uri}: {e}")))?
                .to_bytes();

            if !status.is_success() {
                let detail = String::from_utf8_lossy(&body).into_owned();
                return Err(ClientError::Rejected(format!("{uri} returned {status}: {detail}")));
            }
            debug!(%uri, %status, bytes = body.len(), "upstream call completed");
            Ok(body)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Unavailable(format!("{uri} timed out"))),
        }
    }
}

fn decode<T: DeserializeOwned>(body: &[u8], path: &str) -> ClientResult<T> {
    serde_json::from_slice(body).map_err(|e| ClientError::Malformed(format!("{path}: {e}")))
}

// ── Control plane ──────────────────────────────────────────────────

/// [`ControlPlane`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    transport: JsonTransport,
}

impl HttpControlPlane {
    /// `address` is `host:port` of the control plane's API.
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_timeout(address, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transport: JsonTransport::new(address, timeout),
        }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn get_host_with_role(&self, role: &str) -> ClientResult<String> {
        self.transport.get(&format!("/v1/roles/{role}/host")).await
    }

    async fn get_database_information(&self) -> ClientResult<DatabaseInfo> {
        self.transport.get("/v1/database").await
    }

    async fn get_api_status(&self) -> ClientResult<BTreeMap<String, String>> {
        self.transport.get("/v1/apis").await
    }

    async fn get_stats(&self) -> ClientResult<Vec<NodeFact>> {
        self.transport.get("/v1/stats").await
    }

    async fn get_app_status(&self) -> ClientResult<BTreeMap<String, bool>> {
        self.transport.get("/v1/apps").await
    }

    async fn upload_app(&self, filename: &str, archive: Bytes) -> ClientResult<String> {
        self.transport
            .send_raw(Method::POST, &format!("/v1/apps?filename={filename}"), archive)
            .await
    }

    async fn delete_app(&self, app_id: &str) -> ClientResult<String> {
        self.transport
            .send_json(Method::DELETE, &format!("/v1/apps/{app_id}"), &json!({}))
            .await
    }

    async fn relocate_app(
        &self,
        app_id: &str,
        http_port: u16,
        https_port: u16,
    ) -> ClientResult<String> {
        self.transport
            .send_json(
                Method::POST,
                &format!("/v1/apps/{app_id}/relocate"),
                &json!({ "http_port": http_port, "https_port": https_port }),
            )
            .await
    }

    async fn gather_logs(&self) -> ClientResult<String> {
        self.transport
            .send_json(Method::POST, "/v1/logs/gather", &json!({}))
            .await
    }

    async fn run_groomer(&self) -> ClientResult<String> {
        self.transport
            .send_json(Method::POST, "/v1/groomer", &json!({}))
            .await
    }
}

// ── Roster ─────────────────────────────────────────────────────────

/// [`Roster`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRoster {
    transport: JsonTransport,
}

impl HttpRoster {
    /// `address` is `host:port` of the roster service's API.
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_timeout(address, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transport: JsonTransport::new(address, timeout),
        }
    }
}

#[async_trait]
impl Roster for HttpRoster {
    async fn list_all_users(&self) -> ClientResult<Vec<String>> {
        self.transport.get("/v1/users").await
    }

    async fn is_user_admin(&self, email: &str) -> ClientResult<bool> {
        self.transport.get(&format!("/v1/users/{email}/admin")).await
    }

    async fn can_upload(&self, email: &str) -> ClientResult<bool> {
        self.transport.get(&format!("/v1/users/{email}/upload")).await
    }

    async fn get_user_app_list(&self, email: &str) -> ClientResult<Vec<String>> {
        self.transport.get(&format!("/v1/users/{email}/apps")).await
    }

    async fn get_app_port(&self, app_id: &str) -> ClientResult<u16> {
        self.transport.get(&format!("/v1/apps/{app_id}/port")).await
    }

    async fn get_login_host(&self) -> ClientResult<String> {
        self.transport.get("/v1/login-host").await
    }

    async fn create_user(&self, email: &str, password: &str) -> ClientResult<()> {
        self.transport
            .send_json_unit(
                Method::POST,
                "/v1/users",
                &json!({ "email": email, "password": password }),
            )
            .await
    }

    async fn change_password(&self, email: &str, password: &str) -> ClientResult<()> {
        self.transport
            .send_json_unit(
                Method::PUT,
                &format!("/v1/users/{email}/password"),
                &json!({ "password": password }),
            )
            .await
    }

    async fn set_permission(
        &self,
        email: &str,
        permission: Permission,
        enabled: bool,
    ) -> ClientResult<()> {
        self.transport
            .send_json_unit(
                Method::PUT,
                &format!("/v1/users/{email}/permissions/{}", permission.as_str()),
                &json!({ "enabled": enabled }),
            )
            .await
    }
}
