//! Rotating pool of outbound proxies.
//!
//! The pool is an explicit object owned by the fetcher; nothing here is
//! process-global. Its life cycle:
//!
//! 1. **Refresh**: pull `host:port` candidates from every configured listing
//!    endpoint (each one may fail independently), probe them against a fixed
//!    target with a short timeout, and keep the ones that answer 200.
//! 2. **Acquire**: hand out a random member of the working set, refreshing
//!    first when the set is empty.
//! 3. **Report**: count consecutive failures per handle and evict at the
//!    threshold.
//!
//! When no candidate survives probing the working set degrades to a single
//! [`ProxyHandle::Direct`] entry, so callers always get a handle.

use crate::config::{ProxyListFormat, ProxyListing, ProxySettings};
use crate::net::transport::{Request, Transport};
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use rand::seq::IndexedRandom;
use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

const LISTING_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_CONCURRENCY: usize = 16;

/// An egress path for one request attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProxyHandle {
    /// No proxy; connect directly.
    Direct,
    /// An HTTP proxy at `host:port`.
    Http(String),
}

impl fmt::Display for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyHandle::Direct => write!(f, "direct"),
            ProxyHandle::Http(addr) => write!(f, "http://{addr}"),
        }
    }
}

pub struct ProxyPool {
    settings: ProxySettings,
    working: Vec<ProxyHandle>,
    failures: HashMap<ProxyHandle, u32>,
    last_refresh: Option<Instant>,
}

impl fmt::Debug for ProxyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyPool")
            .field("working", &self.working.len())
            .field("tracked_failures", &self.failures.len())
            .field("last_refresh", &self.last_refresh)
            .finish()
    }
}

impl ProxyPool {
    /// An empty pool; it is populated on the first [`acquire`](Self::acquire).
    pub fn new(settings: ProxySettings) -> Self {
        Self {
            settings,
            working: Vec::new(),
            failures: HashMap::new(),
            last_refresh: None,
        }
    }

    #[cfg(test)]
    pub fn working_set(&self) -> &[ProxyHandle] {
        &self.working
    }

    fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.settings.refresh_interval_secs)
    }

    /// Rebuild the working set from the listing sources.
    ///
    /// A no-op when the last refresh is younger than the refresh interval and
    /// the working set is not empty, unless `force` is set.
    #[instrument(level = "info", skip_all, fields(force))]
    pub async fn refresh<T: Transport>(&mut self, transport: &T, force: bool) {
        if !force && !self.working.is_empty() {
            if let Some(at) = self.last_refresh {
                if at.elapsed() < self.refresh_interval() {
                    debug!("Proxy refresh skipped; interval not elapsed");
                    return;
                }
            }
        }

        let mut candidates = Vec::new();
        for listing in &self.settings.listing_sources {
            match fetch_listing(transport, listing).await {
                Some(found) => {
                    info!(url = %listing.url, count = found.len(), "Fetched proxy candidates");
                    candidates.extend(found);
                }
                None => warn!(url = %listing.url, "Proxy listing unavailable; skipping"),
            }
        }
        let candidates: Vec<String> = candidates.into_iter().unique().collect();

        let probe_url = self.settings.probe_url.clone();
        let probe_timeout = Duration::from_secs(self.settings.probe_timeout_secs);
        let mut live: Vec<ProxyHandle> = stream::iter(candidates)
            .map(|addr| {
                let probe_url = probe_url.clone();
                async move {
                    let handle = ProxyHandle::Http(addr);
                    let request = Request {
                        url: probe_url,
                        headers: HeaderMap::new(),
                        proxy: handle.clone(),
                        timeout: probe_timeout,
                    };
                    match transport.get(&request).await {
                        Ok(resp) if resp.is_ok() => Some(handle),
                        _ => None,
                    }
                }
            })
            .buffer_unordered(PROBE_CONCURRENCY)
            .filter_map(std::future::ready)
            .collect()
            .await;

        if live.is_empty() {
            warn!("No live proxies found; falling back to direct connections");
            live.push(ProxyHandle::Direct);
        }

        info!(working = live.len(), "Proxy pool refreshed");
        self.working = live;
        self.failures.clear();
        self.last_refresh = Some(Instant::now());
    }

    /// Pick a random handle from the working set, refreshing when empty.
    pub async fn acquire<T: Transport>(&mut self, transport: &T) -> ProxyHandle {
        if self.working.is_empty() {
            self.refresh(transport, false).await;
        }
        self.working
            .choose(&mut rand::rng())
            .cloned()
            .unwrap_or(ProxyHandle::Direct)
    }

    /// Record the outcome of one attempt made through `handle`.
    ///
    /// Success clears the failure streak; the threshold-th consecutive failure
    /// evicts the handle. Reporting on an evicted handle does nothing.
    pub fn report(&mut self, handle: &ProxyHandle, success: bool) {
        if *handle == ProxyHandle::Direct {
            return;
        }
        if success {
            self.failures.remove(handle);
            return;
        }

        let count = self.failures.entry(handle.clone()).or_insert(0);
        *count += 1;
        if *count >= self.settings.failure_threshold {
            let before = self.working.len();
            self.working.retain(|h| h != handle);
            if self.working.len() < before {
                warn!(proxy = %handle, failures = *count, "Proxy evicted after repeated failures");
            }
        }
    }
}

async fn fetch_listing<T: Transport>(transport: &T, listing: &ProxyListing) -> Option<Vec<String>> {
    let request = Request {
        url: listing.url.clone(),
        headers: HeaderMap::new(),
        proxy: ProxyHandle::Direct,
        timeout: LISTING_TIMEOUT,
    };
    let resp = transport.get(&request).await.ok()?;
    if !resp.is_ok() {
        return None;
    }
    match listing.format {
        ProxyListFormat::Plain => Some(parse_plain_listing(&resp.body)),
        ProxyListFormat::PubproxyJson => parse_pubproxy_listing(&resp.body),
    }
}

/// `host:port` per line; anything else is ignored.
pub fn parse_plain_listing(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| is_host_port(line))
        .map(String::from)
        .collect()
}

/// PubProxy's `{"data": [{"ip": .., "port": ..}]}`; ports may be strings or numbers.
pub fn parse_pubproxy_listing(body: &str) -> Option<Vec<String>> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let items = value.get("data")?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| {
                let ip = item.get("ip")?.as_str()?;
                let port = match item.get("port")? {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                let addr = format!("{ip}:{port}");
                is_host_port(&addr).then_some(addr)
            })
            .collect(),
    )
}

fn is_host_port(s: &str) -> bool {
    match s.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
