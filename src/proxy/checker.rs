//! Proxy checker module for the two-stage proxy probe

use crate::proxy::dispatch::dispatch;
use crate::proxy::models::{ProxyConfig, ProxyResult};
use crate::proxy::stall::{StallDetector, StallOutcome, StallPolicy};
use crate::Result;
use anyhow::{anyhow, bail};
use reqwest::{Client, Proxy as ReqwestProxy, StatusCode};
use serde_json::Value;
use std::error::Error as StdError;
use tokio::time::{error::Elapsed, timeout_at, Duration, Instant};
use tracing::debug;

/// Default connection establishment timeout in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default overall deadline for one proxy check in seconds
const DEFAULT_TOTAL_TIMEOUT_SECS: u64 = 30;

/// Default number of concurrent checks
const DEFAULT_CONCURRENCY: usize = 5;

/// Payload well above the freeze window, served over TLS
const DEFAULT_FREEZE_PROBE_URL: &str = "https://httpbin.org/bytes/102400";

/// A "what is my IP" service and the JSON field carrying the address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpEndpoint {
    pub url: String,
    pub field: String,
}

impl IpEndpoint {
    pub fn new(url: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            field: field.into(),
        }
    }
}

fn default_ip_endpoints() -> Vec<IpEndpoint> {
    vec![
        IpEndpoint::new("https://httpbin.org/ip", "origin"),
        IpEndpoint::new("https://api.ipify.org?format=json", "ip"),
    ]
}

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Deadline for establishing a connection to the proxy
    pub connect_timeout: Duration,
    /// Deadline for a whole check, both stages included
    pub total_timeout: Duration,
    /// Number of concurrent checks
    pub concurrency: usize,
    /// Identity endpoints, tried in order
    pub ip_endpoints: Vec<IpEndpoint>,
    /// URL streamed through the proxy to look for a freeze
    pub freeze_probe_url: String,
    pub stall_policy: StallPolicy,
    /// Skip certificate verification, some proxies re-sign traffic
    pub accept_invalid_certs: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            total_timeout: Duration::from_secs(DEFAULT_TOTAL_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            ip_endpoints: default_ip_endpoints(),
            freeze_probe_url: DEFAULT_FREEZE_PROBE_URL.to_string(),
            stall_policy: StallPolicy::default(),
            accept_invalid_certs: true,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_ip_endpoints(mut self, endpoints: Vec<IpEndpoint>) -> Self {
        self.ip_endpoints = endpoints;
        self
    }

    pub fn with_freeze_probe_url(mut self, url: String) -> Self {
        self.freeze_probe_url = url;
        self
    }

    pub fn with_stall_policy(mut self, policy: StallPolicy) -> Self {
        self.stall_policy = policy;
        self
    }

    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }
}

/// Result of querying one identity endpoint
enum IpAttempt {
    Ip(String),
    AuthRequired,
    /// Non-success status or no usable IP in the body
    Unusable,
}

/// Result of the identity stage
enum Identity {
    Resolved(String),
    AuthRequired,
    Unresolved(Option<reqwest::Error>),
}

/// Proxy checker for validating proxies
#[derive(Debug, Clone)]
pub struct ProxyChecker {
    config: CheckerConfig,
    detector: StallDetector,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Self {
        Self::with_config(CheckerConfig::default())
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Self {
        let detector = StallDetector::new(config.stall_policy.clone());
        Self { config, detector }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Check a single proxy
    ///
    /// Never fails: every error path is folded into the result's status.
    pub async fn check_proxy(&self, proxy: &ProxyConfig) -> ProxyResult {
        let Some(deadline) = Instant::now().checked_add(self.config.total_timeout) else {
            return ProxyResult::failed(
                proxy,
                format!(
                    "Unknown error: total timeout {:?} is out of range",
                    self.config.total_timeout
                ),
            );
        };
        match self.probe(proxy, deadline).await {
            Ok(result) => {
                debug!(proxy = %proxy, status = %result.status, "check finished");
                result
            }
            Err(e) => {
                debug!(proxy = %proxy, error = %e, "check failed");
                self.classify_error(proxy, &e)
            }
        }
    }

    /// Check multiple proxies concurrently
    pub async fn check_proxies(&self, proxies: Vec<ProxyConfig>) -> Vec<ProxyResult> {
        self.check_proxies_with(proxies, |_| {}).await
    }

    /// Check multiple proxies, calling `on_result` as each check finishes
    pub async fn check_proxies_with<F>(
        &self,
        proxies: Vec<ProxyConfig>,
        on_result: F,
    ) -> Vec<ProxyResult>
    where
        F: Fn(&ProxyResult),
    {
        let on_result = &on_result;
        dispatch(proxies, self.config.concurrency, move |proxy| async move {
            let result = self.check_proxy(&proxy).await;
            on_result(&result);
            result
        })
        .await
    }

    async fn probe(&self, proxy: &ProxyConfig, deadline: Instant) -> Result<ProxyResult> {
        let client = self.create_client(proxy)?;

        let started = Instant::now();
        let ip_address = match self.resolve_identity(&client, deadline).await? {
            Identity::Resolved(ip) => ip,
            Identity::AuthRequired => return Ok(ProxyResult::auth_failed(proxy)),
            Identity::Unresolved(Some(e)) if e.is_timeout() || e.is_connect() => {
                return Err(e.into())
            }
            Identity::Unresolved(_) => {
                return Ok(ProxyResult::failed(
                    proxy,
                    "Failed to get IP through proxy".to_string(),
                ))
            }
        };
        let response_time = started.elapsed().as_secs_f64();
        debug!(proxy = %proxy, ip = %ip_address, response_time, "egress IP resolved");

        let download_started = Instant::now();
        let outcome = self.probe_freeze(&client, deadline).await;
        let download_secs = download_started.elapsed().as_secs_f64();
        debug!(proxy = %proxy, ?outcome, "freeze probe finished");

        let policy = self.detector.policy();
        let result = match outcome {
            StallOutcome::StalledInWindow { bytes } => {
                ProxyResult::frozen(proxy, ip_address, response_time, bytes)
            }
            StallOutcome::TimedOutOverall { bytes } if policy.in_freeze_window(bytes) => {
                ProxyResult::frozen(proxy, ip_address, response_time, bytes)
            }
            StallOutcome::TimedOutOverall { .. } => {
                ProxyResult::timeout(proxy, self.timeout_message())
            }
            StallOutcome::Completed { bytes } => {
                let speed = (bytes > 0 && download_secs > 0.0)
                    .then(|| (bytes as f64 / 1024.0) / download_secs);
                ProxyResult::ok(proxy, ip_address, response_time, speed)
            }
            StallOutcome::StalledOutOfWindow { .. } | StallOutcome::Failed { .. } => {
                ProxyResult::ok(proxy, ip_address, response_time, None)
            }
        };
        Ok(result)
    }

    /// Stage 1: find the egress IP through the first endpoint that answers
    async fn resolve_identity(&self, client: &Client, deadline: Instant) -> Result<Identity> {
        let mut last_error = None;

        for endpoint in &self.config.ip_endpoints {
            match timeout_at(deadline, Self::fetch_ip(client, endpoint)).await? {
                Ok(IpAttempt::Ip(ip)) => return Ok(Identity::Resolved(ip)),
                Ok(IpAttempt::AuthRequired) => return Ok(Identity::AuthRequired),
                Ok(IpAttempt::Unusable) => {
                    debug!(url = %endpoint.url, "identity endpoint gave no IP");
                }
                Err(e) if mentions_proxy_auth(&e) => return Ok(Identity::AuthRequired),
                Err(e) => {
                    debug!(url = %endpoint.url, error = %e, "identity endpoint failed");
                    last_error = Some(e);
                }
            }
        }

        Ok(Identity::Unresolved(last_error))
    }

    async fn fetch_ip(
        client: &Client,
        endpoint: &IpEndpoint,
    ) -> std::result::Result<IpAttempt, reqwest::Error> {
        let response = client.get(&endpoint.url).send().await?;
        let status = response.status();
        if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return Ok(IpAttempt::AuthRequired);
        }
        if !status.is_success() {
            return Ok(IpAttempt::Unusable);
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) if e.is_decode() => return Ok(IpAttempt::Unusable),
            Err(e) => return Err(e),
        };
        Ok(body
            .get(&endpoint.field)
            .and_then(Value::as_str)
            .filter(|ip| !ip.is_empty())
            .map_or(IpAttempt::Unusable, |ip| IpAttempt::Ip(ip.to_string())))
    }

    /// Stage 2: stream a large payload and watch it for a freeze
    async fn probe_freeze(&self, client: &Client, deadline: Instant) -> StallOutcome {
        let request = client.get(&self.config.freeze_probe_url).send();
        let response = match timeout_at(deadline, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return StallOutcome::Failed {
                    bytes: 0,
                    error: e.to_string(),
                }
            }
            Err(_) => return StallOutcome::TimedOutOverall { bytes: 0 },
        };

        if !response.status().is_success() {
            return StallOutcome::Failed {
                bytes: 0,
                error: format!("HTTP status: {}", response.status()),
            };
        }

        self.detector
            .watch(Box::pin(response.bytes_stream()), deadline)
            .await
    }

    fn classify_error(&self, proxy: &ProxyConfig, err: &anyhow::Error) -> ProxyResult {
        if err.is::<Elapsed>() {
            return ProxyResult::timeout(proxy, self.timeout_message());
        }
        match err.downcast_ref::<reqwest::Error>() {
            Some(e) if e.is_timeout() => ProxyResult::timeout(proxy, self.timeout_message()),
            Some(e) if e.is_connect() => {
                ProxyResult::failed(proxy, format!("Proxy connection error: {}", error_chain(e)))
            }
            Some(e) => ProxyResult::failed(proxy, format!("Client error: {}", error_chain(e))),
            None => ProxyResult::failed(proxy, format!("Unknown error: {:#}", err)),
        }
    }

    fn timeout_message(&self) -> String {
        format!(
            "Connection timeout ({}s)",
            self.config.total_timeout.as_secs_f64()
        )
    }

    /// Create a reqwest client routed through the proxy
    fn create_client(&self, proxy: &ProxyConfig) -> Result<Client> {
        let reqwest_proxy =
            ReqwestProxy::all(proxy.url())?.basic_auth(&proxy.username, &proxy.password);

        let client = Client::builder()
            .proxy(reqwest_proxy)
            .connect_timeout(self.config.connect_timeout)
            .danger_accept_invalid_certs(self.config.accept_invalid_certs)
            .pool_max_idle_per_host(1)
            .build()?;

        Ok(client)
    }
}

impl Default for ProxyChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn a user-supplied number of seconds into a usable deadline length
pub fn timeout_from_secs(secs: f64) -> Result<Duration> {
    let timeout = Duration::try_from_secs_f64(secs)
        .map_err(|e| anyhow!("invalid timeout {}s: {}", secs, e))?;
    if Instant::now().checked_add(timeout).is_none() {
        bail!("invalid timeout {}s: too large", secs);
    }
    Ok(timeout)
}

/// Whether an error chain reports a 407 from a CONNECT tunnel
fn mentions_proxy_auth(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.to_string()
            .to_ascii_lowercase()
            .contains("proxy authentication required")
        {
            return true;
        }
        current = e.source();
    }
    false
}

/// Render an error followed by its sources
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        text.push_str(": ");
        text.push_str(&e.to_string());
        source = e.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::ProxyStatus;
    use std::io;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn local_proxy(port: u16) -> ProxyConfig {
        ProxyConfig::new(
            "127.0.0.1".to_string(),
            port,
            "user".to_string(),
            "pass".to_string(),
        )
    }

    #[test]
    fn test_checker_config_default() {
        let config = CheckerConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));
        assert_eq!(config.total_timeout, Duration::from_secs(DEFAULT_TOTAL_TIMEOUT_SECS));
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.freeze_probe_url, DEFAULT_FREEZE_PROBE_URL);
        assert_eq!(config.ip_endpoints.len(), 2);
        assert_eq!(config.ip_endpoints[0].field, "origin");
        assert_eq!(config.ip_endpoints[1].field, "ip");
    }

    #[test]
    fn test_checker_config_builder() {
        let config = CheckerConfig::new()
            .with_connect_timeout(Duration::from_secs(3))
            .with_total_timeout(Duration::from_secs(60))
            .with_concurrency(20)
            .with_freeze_probe_url("http://example.com/big".to_string())
            .with_ip_endpoints(vec![IpEndpoint::new("http://example.com/ip", "addr")])
            .with_accept_invalid_certs(false);

        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.total_timeout, Duration::from_secs(60));
        assert_eq!(config.concurrency, 20);
        assert_eq!(config.freeze_probe_url, "http://example.com/big");
        assert_eq!(config.ip_endpoints, vec![IpEndpoint::new("http://example.com/ip", "addr")]);
        assert!(!config.accept_invalid_certs);
    }

    #[test]
    fn test_timeout_message() {
        let checker = ProxyChecker::new();
        assert_eq!(checker.timeout_message(), "Connection timeout (30s)");
    }

    #[test]
    fn test_timeout_from_secs() {
        assert_eq!(timeout_from_secs(30.0).unwrap(), Duration::from_secs(30));
        assert_eq!(timeout_from_secs(0.5).unwrap(), Duration::from_millis(500));
        assert!(timeout_from_secs(f64::INFINITY).is_err());
        assert!(timeout_from_secs(f64::NAN).is_err());
        assert!(timeout_from_secs(-1.0).is_err());
        assert!(timeout_from_secs(1e300).is_err());
    }

    #[tokio::test]
    async fn test_huge_total_timeout_is_an_error_result() {
        let checker = ProxyChecker::with_config(
            CheckerConfig::new().with_total_timeout(Duration::from_secs(u64::MAX)),
        );
        let result = checker.check_proxy(&local_proxy(8080)).await;
        assert_eq!(result.status, ProxyStatus::Error);
        assert!(result.error_message.unwrap().contains("out of range"));
    }

    #[test]
    fn test_mentions_proxy_auth() {
        let tunnel = io::Error::new(io::ErrorKind::Other, "Proxy Authentication Required");
        assert!(mentions_proxy_auth(&tunnel));
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        assert!(!mentions_proxy_auth(&refused));
    }

    #[test]
    fn test_classify_unknown_error() {
        let checker = ProxyChecker::new();
        let result = checker.classify_error(&local_proxy(8080), &anyhow::anyhow!("boom"));
        assert_eq!(result.status, ProxyStatus::Error);
        assert_eq!(result.error_message.as_deref(), Some("Unknown error: boom"));
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let checker = ProxyChecker::with_config(
            CheckerConfig::new()
                .with_ip_endpoints(vec![IpEndpoint::new("http://ip.test/ip", "origin")])
                .with_total_timeout(Duration::from_secs(5)),
        );
        let result = checker.check_proxy(&local_proxy(port)).await;
        assert_eq!(result.status, ProxyStatus::Error);
        assert!(result
            .error_message
            .unwrap()
            .starts_with("Proxy connection error"));
    }

    #[tokio::test]
    async fn test_silent_proxy_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                held.push(socket);
            }
        });

        let checker = ProxyChecker::with_config(
            CheckerConfig::new()
                .with_ip_endpoints(vec![IpEndpoint::new("http://ip.test/ip", "origin")])
                .with_total_timeout(Duration::from_millis(300)),
        );
        let result = checker.check_proxy(&local_proxy(port)).await;
        assert_eq!(result.status, ProxyStatus::Timeout);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Connection timeout (0.3s)")
        );
    }
}
