//! Proxy data models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Authenticated forward proxy endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ProxyConfig {
    pub fn new(host: String, port: u16, username: String, password: String) -> Self {
        Self {
            host,
            port,
            username,
            password,
        }
    }

    /// Proxy URL without credentials, credentials are attached separately
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get the proxy string in HOST:PORT format
    pub fn to_simple_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// Credentials stay out of logs.
impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Classification of a single proxy check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProxyStatus {
    /// Both stages succeeded, no freeze observed
    Ok,
    /// The streamed download stalled inside the freeze window
    TlsFreeze,
    /// No response within the overall deadline
    Timeout,
    /// The proxy rejected the credentials (HTTP 407)
    AuthFailed,
    /// Any other connection or protocol failure
    Error,
}

impl ProxyStatus {
    pub const ALL: [ProxyStatus; 5] = [
        ProxyStatus::Ok,
        ProxyStatus::TlsFreeze,
        ProxyStatus::Timeout,
        ProxyStatus::AuthFailed,
        ProxyStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyStatus::Ok => "OK",
            ProxyStatus::TlsFreeze => "TLS_FREEZE",
            ProxyStatus::Timeout => "TIMEOUT",
            ProxyStatus::AuthFailed => "AUTH_FAILED",
            ProxyStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detailed result of a proxy check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyResult {
    /// Proxy identity in HOST:PORT form
    pub proxy: String,
    pub status: ProxyStatus,
    /// Wall-clock seconds spent resolving the egress IP
    pub response_time: Option<f64>,
    /// Bytes received before the stream froze, only for `TlsFreeze`
    pub bytes_before_freeze: Option<u64>,
    /// Throughput of a cleanly completed download, KB/s
    pub download_speed: Option<f64>,
    pub ip_address: Option<String>,
    pub error_message: Option<String>,
}

impl ProxyResult {
    fn bare(proxy: &ProxyConfig, status: ProxyStatus) -> Self {
        Self {
            proxy: proxy.to_simple_string(),
            status,
            response_time: None,
            bytes_before_freeze: None,
            download_speed: None,
            ip_address: None,
            error_message: None,
        }
    }

    pub fn ok(
        proxy: &ProxyConfig,
        ip_address: String,
        response_time: f64,
        download_speed: Option<f64>,
    ) -> Self {
        Self {
            response_time: Some(response_time),
            ip_address: Some(ip_address),
            download_speed,
            ..Self::bare(proxy, ProxyStatus::Ok)
        }
    }

    pub fn frozen(proxy: &ProxyConfig, ip_address: String, response_time: f64, bytes: u64) -> Self {
        Self {
            response_time: Some(response_time),
            ip_address: Some(ip_address),
            bytes_before_freeze: Some(bytes),
            error_message: Some(format!(
                "Connection froze after {:.1} KB (TLS freeze signature)",
                bytes as f64 / 1024.0
            )),
            ..Self::bare(proxy, ProxyStatus::TlsFreeze)
        }
    }

    pub fn timeout(proxy: &ProxyConfig, message: String) -> Self {
        Self {
            error_message: Some(message),
            ..Self::bare(proxy, ProxyStatus::Timeout)
        }
    }

    pub fn auth_failed(proxy: &ProxyConfig) -> Self {
        Self {
            error_message: Some("Proxy authentication failed".to_string()),
            ..Self::bare(proxy, ProxyStatus::AuthFailed)
        }
    }

    pub fn failed(proxy: &ProxyConfig, error: String) -> Self {
        Self {
            error_message: Some(error),
            ..Self::bare(proxy, ProxyStatus::Error)
        }
    }

    pub fn is_working(&self) -> bool {
        self.status == ProxyStatus::Ok
    }
}
