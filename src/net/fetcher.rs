//! Resilient page fetcher.
//!
//! [`Fetcher::fetch`] wraps a [`Transport`] with everything needed to get HTML
//! out of sites that would rather not serve it:
//!
//! - URL validation before any network call, with a per-run memory of URLs
//!   known to be malformed, missing or unreachable
//! - a browser-like default header set whose user-agent is picked by a stable
//!   hash of the host, so one host always sees the same identity in a run
//! - the [`RetryPolicy`] attempt loop, with identity rotation and session reset
//!   on 403s
//! - optional routing through a [`ProxyPool`], reporting each attempt's verdict
//!
//! Fetching never fails loudly: the result is the response or `None`.

use crate::config::Settings;
use crate::net::proxy::{ProxyHandle, ProxyPool};
use crate::net::retry::{Action, Outcome, RetryPolicy};
use crate::net::transport::{Request, Response, Transport, TransportError};
use crate::shutdown::Shutdown;
use rand::Rng;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/113.0.0.0 Safari/537.36";

pub struct Fetcher<T> {
    transport: T,
    policy: RetryPolicy,
    timeout: Duration,
    user_agents: Vec<String>,
    pool: Option<tokio::sync::Mutex<ProxyPool>>,
    invalid: Mutex<HashSet<String>>,
    denied: Mutex<HashSet<String>>,
    shutdown: Shutdown,
}

impl<T: Transport> Fetcher<T> {
    /// Build a fetcher from settings; proxies are used when enabled there.
    pub fn new(transport: T, settings: &Settings, shutdown: Shutdown) -> Self {
        let pool = settings
            .proxies
            .enabled
            .then(|| tokio::sync::Mutex::new(ProxyPool::new(settings.proxies.clone())));
        let user_agents = if settings.user_agents.is_empty() {
            vec![FALLBACK_USER_AGENT.to_string()]
        } else {
            settings.user_agents.clone()
        };
        Self {
            transport,
            policy: RetryPolicy::new(settings.request.max_attempts, settings.request.base_delay()),
            timeout: settings.request.timeout(),
            user_agents,
            pool,
            invalid: Mutex::new(HashSet::new()),
            denied: Mutex::new(HashSet::new()),
            shutdown,
        }
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    /// Forget every URL remembered by a previous run.
    pub fn begin_run(&self) {
        if let Ok(mut set) = self.invalid.lock() {
            set.clear();
        }
        if let Ok(mut set) = self.denied.lock() {
            set.clear();
        }
    }

    pub fn is_invalid(&self, url: &str) -> bool {
        self.invalid.lock().map(|s| s.contains(url)).unwrap_or(false)
    }

    /// Whether the last fetch of `url` ended on access denial (403).
    pub fn was_denied(&self, url: &str) -> bool {
        self.denied.lock().map(|s| s.contains(url)).unwrap_or(false)
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn remember_invalid(&self, url: &str) {
        if let Ok(mut set) = self.invalid.lock() {
            set.insert(url.to_string());
        }
    }

    fn remember_denied(&self, url: &str) {
        if let Ok(mut set) = self.denied.lock() {
            set.insert(url.to_string());
        }
    }

    /// Palette index of the identity used for `host`.
    pub fn identity_index(&self, host: &str) -> usize {
        (stable_hash(host) % self.user_agents.len() as u64) as usize
    }

    /// Browser-like headers for a top-level navigation to `url`.
    pub fn default_headers(&self, url: &Url) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8",
            ),
        );
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
        headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
        headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));

        let host = url.host_str().unwrap_or_default();
        self.set_identity(&mut headers, self.identity_index(&host_key(host)));
        if let Ok(referer) = HeaderValue::from_str(&format!("{}://{}/", url.scheme(), host)) {
            headers.insert(header::REFERER, referer);
        }
        headers
    }

    fn set_identity(&self, headers: &mut HeaderMap, index: usize) {
        match HeaderValue::from_str(&self.user_agents[index]) {
            Ok(ua) => {
                headers.insert(header::USER_AGENT, ua);
            }
            Err(e) => warn!(index, error = %e, "Unusable user-agent in palette"),
        }
    }

    /// Pick any identity other than `current`.
    fn rotate_identity(&self, current: usize) -> usize {
        let n = self.user_agents.len();
        if n < 2 {
            return current;
        }
        (current + rand::rng().random_range(1..n)) % n
    }

    /// GET `url`, returning the 200 response or `None`.
    ///
    /// Caller-supplied `headers` replace the default set entirely.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn fetch(&self, url: &str, headers: Option<HeaderMap>) -> Option<Response> {
        if self.is_invalid(url) {
            warn!("Skipping URL already known to be invalid");
            return None;
        }

        let parsed = match Url::parse(url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") && u.host_str().is_some() => u,
            _ => {
                error!("Malformed URL");
                self.remember_invalid(url);
                return None;
            }
        };

        let mut identity = self.identity_index(&host_key(parsed.host_str().unwrap_or_default()));
        let mut headers = headers.unwrap_or_else(|| self.default_headers(&parsed));
        let mut last = None;

        for attempt in 1..=self.policy.max_attempts {
            if self.shutdown.is_triggered() {
                info!(attempt, "Shutdown requested; abandoning fetch");
                return None;
            }

            let proxy = match &self.pool {
                Some(pool) => pool.lock().await.acquire(&self.transport).await,
                None => ProxyHandle::Direct,
            };
            let request = Request {
                url: url.to_string(),
                headers: headers.clone(),
                proxy: proxy.clone(),
                timeout: self.timeout,
            };

            let result = self.transport.get(&request).await;
            let outcome = match &result {
                Ok(resp) => Outcome::Status(resp.status),
                Err(TransportError::Timeout) => Outcome::Timeout,
                Err(TransportError::Connect(_)) => Outcome::ConnectError,
                Err(TransportError::Other(_)) => Outcome::OtherError,
            };
            last = Some(outcome);

            if let Some(pool) = &self.pool {
                if outcome == Outcome::Status(200) {
                    pool.lock().await.report(&proxy, true);
                } else if RetryPolicy::penalizes_proxy(outcome) {
                    pool.lock().await.report(&proxy, false);
                }
            }

            let jitter: f64 = rand::rng().random();
            match self.policy.decide(attempt, outcome, jitter) {
                Action::Done => {
                    debug!(attempt, %proxy, "Fetched");
                    return result.ok();
                }
                Action::GiveUp { mark_invalid } => {
                    if mark_invalid {
                        error!(attempt, ?outcome, "Resource does not exist; not retrying");
                        self.remember_invalid(url);
                    } else {
                        warn!(attempt, ?outcome, "Unexpected response; not retrying");
                    }
                    return None;
                }
                Action::Retry {
                    delay,
                    rotate_identity,
                    reset_session,
                } => {
                    if let Err(e) = &result {
                        warn!(attempt, max = self.policy.max_attempts, error = %e, %proxy, "Request failed");
                    } else {
                        warn!(attempt, max = self.policy.max_attempts, ?outcome, %proxy, "Request refused");
                    }
                    if rotate_identity {
                        identity = self.rotate_identity(identity);
                        self.set_identity(&mut headers, identity);
                    }
                    if reset_session {
                        info!("Replacing HTTP session");
                        self.transport.reset_session();
                    }
                    if attempt < self.policy.max_attempts {
                        debug!(?delay, "Backing off");
                        sleep(delay).await;
                    }
                }
            }
        }

        error!(attempts = self.policy.max_attempts, "Exhausted retries");
        if last == Some(Outcome::Status(403)) {
            self.remember_denied(url);
        }
        self.remember_invalid(url);
        None
    }
}

/// Host with `www.` removed and lowercased, so `www.x.com` and `x.com` share an identity.
fn host_key(host: &str) -> String {
    let host = host.to_lowercase();
    host.strip_prefix("www.").unwrap_or(&host).to_string()
}

/// FNV-1a; stable across runs and toolchains, unlike `DefaultHasher`.
fn stable_hash(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxyListFormat, ProxyListing};
    use crate::net::transport::mock::{MockTransport, Reply};

    const URL: &str = "https://www.example.com/market/";

    fn settings() -> Settings {
        let mut s = Settings::default();
        s.request.max_attempts = 3;
        s.request.base_delay_ms = 1000;
        s
    }

    fn fetcher(transport: MockTransport) -> Fetcher<MockTransport> {
        Fetcher::new(transport, &settings(), Shutdown::new())
    }

    fn ua_of(request: &Request) -> String {
        request.headers[header::USER_AGENT].to_str().unwrap().to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_returns_response() {
        let f = fetcher(MockTransport::new().on(URL, vec![Reply::ok("<html>gold</html>")]));
        let resp = f.fetch(URL, None).await.unwrap();
        assert_eq!(resp.body, "<html>gold</html>");
        assert_eq!(f.transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_404_stops_after_one_attempt_and_is_remembered() {
        let f = fetcher(MockTransport::new().on(URL, vec![Reply::Status(404, String::new())]));
        assert!(f.fetch(URL, None).await.is_none());
        assert_eq!(f.transport.call_count(), 1);
        assert!(f.is_invalid(URL));

        assert!(f.fetch(URL, None).await.is_none());
        assert_eq!(f.transport.call_count(), 1, "second call skips the network");
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_uses_every_attempt_with_growing_delays() {
        let f = fetcher(MockTransport::new().on(URL, vec![Reply::Status(429, String::new())]));
        assert!(f.fetch(URL, None).await.is_none());

        let calls = f.transport.calls_to(URL);
        assert_eq!(calls.len(), 3);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1].1 - w[0].1).collect();
        assert_eq!(gaps, vec![Duration::from_secs(3), Duration::from_secs(6)]);
        assert!(gaps[0] < gaps[1]);
        assert!(f.is_invalid(URL));
        assert!(!f.was_denied(URL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_url_short_circuits() {
        let f = fetcher(MockTransport::new());
        assert!(f.fetch("not a url", None).await.is_none());
        assert!(f.fetch("mailto:desk@example.com", None).await.is_none());
        assert_eq!(f.transport.call_count(), 0);
        assert!(f.is_invalid("not a url"));
        assert_eq!(f.invalid_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_403_rotates_identity_then_succeeds() {
        let f = fetcher(
            MockTransport::new().on(URL, vec![Reply::Status(403, String::new()), Reply::ok("ok")]),
        );
        assert!(f.fetch(URL, None).await.is_some());
        let calls = f.transport.calls_to(URL);
        assert_eq!(calls.len(), 2);
        assert_ne!(ua_of(&calls[0].0), ua_of(&calls[1].0));
        assert_eq!(calls[1].1 - calls[0].1, Duration::from_secs(5));
        assert_eq!(*f.transport.resets.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_403_resets_session_and_marks_denied() {
        let f = fetcher(MockTransport::new().on(URL, vec![Reply::Status(403, String::new())]));
        assert!(f.fetch(URL, None).await.is_none());
        assert_eq!(f.transport.call_count(), 3);
        assert_eq!(*f.transport.resets.lock().unwrap(), 1);
        assert!(f.was_denied(URL));
        assert!(f.is_invalid(URL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_success() {
        let f = fetcher(MockTransport::new().on(URL, vec![Reply::Timeout, Reply::ok("ok")]));
        assert!(f.fetch(URL, None).await.is_some());
        let calls = f.transport.calls_to(URL);
        let gap = calls[1].1 - calls[0].1;
        assert!(gap >= Duration::from_secs(1) && gap < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_status_not_retried() {
        let f = fetcher(MockTransport::new().on(URL, vec![Reply::Status(401, String::new())]));
        assert!(f.fetch(URL, None).await.is_none());
        assert_eq!(f.transport.call_count(), 1);
        assert!(!f.is_invalid(URL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_run_forgets_invalid_urls() {
        let f = fetcher(MockTransport::new().on(URL, vec![Reply::Status(404, String::new())]));
        f.fetch(URL, None).await;
        f.begin_run();
        assert!(!f.is_invalid(URL));
        f.fetch(URL, None).await;
        assert_eq!(f.transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_before_attempting() {
        let shutdown = Shutdown::new();
        let f = Fetcher::new(
            MockTransport::new().on(URL, vec![Reply::ok("ok")]),
            &settings(),
            shutdown.clone(),
        );
        shutdown.trigger();
        assert!(f.fetch(URL, None).await.is_none());
        assert_eq!(f.transport.call_count(), 0);
        assert!(!f.is_invalid(URL));
    }

    #[test]
    fn test_identity_is_stable_per_host() {
        let f = fetcher(MockTransport::new());
        let a = f.default_headers(&Url::parse("https://www.kitco.com/a").unwrap());
        let b = f.default_headers(&Url::parse("https://kitco.com/b").unwrap());
        assert_eq!(a[header::USER_AGENT], b[header::USER_AGENT]);
        assert_eq!(f.identity_index("kitco.com"), f.identity_index("kitco.com"));
        assert_eq!(stable_hash("kitco.com"), stable_hash("kitco.com"));
    }

    #[test]
    fn test_default_headers_look_like_navigation() {
        let f = fetcher(MockTransport::new());
        let h = f.default_headers(&Url::parse("https://www.example.com/market/").unwrap());
        assert_eq!(h["sec-fetch-mode"], "navigate");
        assert_eq!(h[header::CONNECTION], "keep-alive");
        assert_eq!(h[header::REFERER], "https://www.example.com/");
        assert!(h[header::ACCEPT].to_str().unwrap().starts_with("text/html"));
        assert!(h.contains_key(header::ACCEPT_LANGUAGE));
        assert!(h.contains_key(header::ACCEPT_ENCODING));
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_headers_are_used_verbatim() {
        let f = fetcher(MockTransport::new().on(URL, vec![Reply::ok("ok")]));
        let mut custom = HeaderMap::new();
        custom.insert(header::USER_AGENT, HeaderValue::from_static("feed-reader/1.0"));
        f.fetch(URL, Some(custom)).await;
        let calls = f.transport.calls_to(URL);
        assert_eq!(ua_of(&calls[0].0), "feed-reader/1.0");
        assert!(!calls[0].0.headers.contains_key("sec-fetch-mode"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxy_mode_reports_and_moves_on() {
        let list = "https://list.example/";
        let probe = "https://probe.example/";
        let mut s = settings();
        s.proxies.enabled = true;
        s.proxies.probe_url = probe.to_string();
        s.proxies.listing_sources = vec![ProxyListing {
            url: list.to_string(),
            format: ProxyListFormat::Plain,
        }];
        let transport = MockTransport::new()
            .on(list, vec![Reply::ok("1.1.1.1:80\n")])
            .on(probe, vec![Reply::ok("")])
            .on(
                URL,
                vec![
                    Reply::Status(429, String::new()),
                    Reply::Status(403, String::new()),
                    Reply::ok("made it"),
                ],
            );
        let f = Fetcher::new(transport, &s, Shutdown::new());

        let resp = f.fetch(URL, None).await.unwrap();
        assert_eq!(resp.body, "made it");
        let calls = f.transport.calls_to(URL);
        assert_eq!(calls.len(), 3);
        assert!(calls
            .iter()
            .all(|(r, _)| r.proxy == ProxyHandle::Http("1.1.1.1:80".to_string())));

        // Two failures then a success: the streak is cleared, proxy stays.
        let pool = f.pool.as_ref().unwrap().lock().await;
        assert_eq!(pool.working_set().len(), 1);
    }
}
