// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Stateless HTTP transport bound to one gateway base URL.
//!
//! The transport performs exactly one request per call and never retries;
//! retry policy belongs to callers (see [`crate::monitor`]). Cloning is cheap
//! and clones share the underlying connection pool, so one transport can
//! serve many concurrent sessions.

use std::time::Duration;

use reqwest::{Client, Method};
use serde_json::Value;
use tracing::debug;

use crate::blockchain::NetworkConfig;
use crate::error::GatewayError;

/// Per-request timeout applied by the underlying HTTP client.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// A successful (2xx) gateway response.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: String,
}

impl GatewayResponse {
    /// Body with surrounding whitespace and quotes removed.
    pub fn text(&self) -> &str {
        self.body.trim().trim_matches('"')
    }
}

#[derive(Debug, Clone)]
pub struct GatewayTransport {
    network: NetworkConfig,
    base_url: String,
    http: Client,
}

impl GatewayTransport {
    /// Create a transport for `network`.
    pub fn new(network: NetworkConfig) -> Result<Self, GatewayError> {
        Self::with_timeout(network, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a transport with a custom per-request timeout.
    pub fn with_timeout(network: NetworkConfig, timeout: Duration) -> Result<Self, GatewayError> {
        let parsed: url::Url = network.base_url.parse().map_err(|e: url::ParseError| {
            GatewayError::InvalidResponse(format!(
                "invalid gateway base URL `{}`: {e}",
                network.base_url
            ))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GatewayError::InvalidResponse(format!(
                "unsupported gateway URL scheme `{}`",
                parsed.scheme()
            )));
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: network.base_url.trim_end_matches('/').to_string(),
            network,
            http,
        })
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn chain_id(&self) -> u64 {
        self.network.chain_id
    }

    /// Shared HTTP client; JSON-RPC providers reuse its pool and timeout.
    pub fn http_client(&self) -> &Client {
        &self.http
    }

    /// JSON-RPC endpoint for an authenticated session: `{base}/?token=<token>`.
    pub fn rpc_url(&self, token: &str) -> Result<url::Url, GatewayError> {
        let mut url: url::Url = format!("{}/", self.base_url)
            .parse()
            .map_err(|e: url::ParseError| GatewayError::InvalidResponse(format!("invalid RPC URL: {e}")))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    /// Issue one request.
    ///
    /// `path` is appended to the base URL; `auth` is sent as the `token`
    /// query parameter. Any non-2xx status or connection fault surfaces as
    /// [`GatewayError::Transport`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        auth: Option<&str>,
    ) -> Result<GatewayResponse, GatewayError> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("Accept", "application/json");
        if let Some(token) = auth {
            request = request.query(&[("token", token)]);
        }
        if let Some(payload) = body {
            request = request.json(payload);
        } else {
            request = request.header("Content-Type", "application/json");
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::connection(format!("{method} {path} failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::connection(format!("{method} {path} body read failed: {e}")))?;

        debug!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            "Gateway response"
        );

        if !status.is_success() {
            return Err(GatewayError::Transport {
                status: Some(status.as_u16()),
                body: text,
            });
        }

        Ok(GatewayResponse {
            status: status.as_u16(),
            body: text,
        })
    }

    pub async fn get(&self, path: &str, auth: Option<&str>) -> Result<GatewayResponse, GatewayError> {
        self.request(Method::GET, path, None, auth).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: &Value,
        auth: Option<&str>,
    ) -> Result<GatewayResponse, GatewayError> {
        self.request(Method::POST, path, Some(body), auth).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Environment;
    use crate::simulator::{Simulator, SimulatorConfig};

    #[test]
    fn rejects_malformed_base_urls() {
        let bad = NetworkConfig::custom("bad", "not a url", 1);
        assert!(matches!(
            GatewayTransport::new(bad),
            Err(GatewayError::InvalidResponse(_))
        ));

        let ftp = NetworkConfig::custom("ftp", "ftp://example.com/v1", 1);
        assert!(GatewayTransport::new(ftp).is_err());
    }

    #[test]
    fn trailing_slash_is_normalised() {
        let network = Environment::Local
            .network()
            .with_base_url("http://127.0.0.1:3000/v1/");
        let transport = GatewayTransport::new(network).unwrap();
        assert_eq!(transport.base_url(), "http://127.0.0.1:3000/v1");
        assert_eq!(transport.chain_id(), 443);
    }

    #[test]
    fn rpc_url_carries_session_token() {
        let network = Environment::Local
            .network()
            .with_base_url("http://127.0.0.1:3000/v1/");
        let transport = GatewayTransport::new(network).unwrap();
        let url = transport.rpc_url("00ff").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:3000/v1/?token=00ff");
    }

    #[tokio::test]
    async fn non_success_status_surfaces_status_and_body() {
        let sim = Simulator::spawn(SimulatorConfig::default()).await.unwrap();
        let transport = GatewayTransport::new(sim.network()).unwrap();

        let err = transport
            .post("/", &serde_json::json!({}), Some("not-a-token"))
            .await
            .unwrap_err();
        match err {
            GatewayError::Transport { status, body } => {
                assert_eq!(status, Some(401));
                assert!(!body.is_empty());
            }
            other => panic!("expected transport error, got {other:?}"),
        }

        sim.shutdown().await;
    }

    #[tokio::test]
    async fn connection_fault_is_a_transport_error_without_status() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let network = NetworkConfig::custom("dead", format!("http://127.0.0.1:{port}/v1"), 1);
        let transport = GatewayTransport::with_timeout(network, Duration::from_secs(2)).unwrap();

        let err = transport.get("/join/", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport { status: None, .. }));
        assert!(err.is_retryable());
    }
}
