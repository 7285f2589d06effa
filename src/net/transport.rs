//! The HTTP seam between the fetch policy and the network.
//!
//! [`Transport`] performs exactly one GET; retrying, identity rotation and
//! proxy bookkeeping all live above it in the fetcher, so tests can drive the
//! whole policy with a scripted transport and no network.

use crate::net::proxy::ProxyHandle;
use reqwest::Client;
use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// One outbound GET.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub headers: HeaderMap,
    pub proxy: ProxyHandle,
    pub timeout: Duration,
}

/// A fully read HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    /// URL after redirects.
    pub url: String,
    pub body: String,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Transport failures, classified for the retry policy.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// Something that can perform a single HTTP GET.
pub trait Transport {
    async fn get(&self, request: &Request) -> Result<Response, TransportError>;

    /// Throw away pooled connections and cookies so the next request starts a
    /// fresh session.
    fn reset_session(&self);
}

/// [`Transport`] backed by `reqwest`, with one client per egress path.
///
/// Clients are built lazily and cached per proxy because reqwest fixes the
/// proxy at client construction time.
#[derive(Debug, Default)]
pub struct ReqwestTransport {
    clients: Mutex<HashMap<ProxyHandle, Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, proxy: &ProxyHandle) -> Result<Client, TransportError> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| TransportError::Other("client cache poisoned".to_string()))?;
        if let Some(client) = clients.get(proxy) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::limited(10));
        builder = match proxy {
            ProxyHandle::Direct => builder.no_proxy(),
            ProxyHandle::Http(addr) => {
                let proxy = reqwest::Proxy::all(format!("http://{addr}"))
                    .map_err(|e| TransportError::Other(e.to_string()))?;
                builder.proxy(proxy)
            }
        };
        let client = builder
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        debug!(?proxy, "Built HTTP client");
        clients.insert(proxy.clone(), client.clone());
        Ok(client)
    }
}

impl Transport for ReqwestTransport {
    #[instrument(level = "debug", skip_all, fields(url = %request.url, proxy = ?request.proxy))]
    async fn get(&self, request: &Request) -> Result<Response, TransportError> {
        let client = self.client_for(&request.proxy)?;
        let resp = client
            .get(&request.url)
            .headers(request.headers.clone())
            .timeout(request.timeout)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let url = resp.url().to_string();
        let body = resp.text().await?;
        debug!(status, bytes = body.len(), "Response received");
        Ok(Response { status, url, body })
    }

    fn reset_session(&self) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.clear();
            info!("Dropped cached HTTP sessions");
        }
    }
}
