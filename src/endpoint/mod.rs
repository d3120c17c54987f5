use std::fmt;
use std::str::FromStr;

use crate::error::{PoolError, Result};

/// Transport security selected by the endpoint scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plaintext HTTP/2 (`http://`), default port 80
    Plain,
    /// TLS-protected HTTP/2 (`https://`), default port 443
    Secure,
}

impl Scheme {
    /// Default port derived when the endpoint string omits one
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Plain => 80,
            Scheme::Secure => 443,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Plain => "http",
            Scheme::Secure => "https",
        }
    }
}

/// Network address of a regional verification gateway
///
/// Immutable once parsed. The scheme selects both the default port and
/// whether the channel factory performs a TLS handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parse an endpoint URL such as `https://gw-eu.example.com:9443`
    ///
    /// Fails with a configuration error on unknown schemes, missing hosts, or
    /// unparsable ports.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = url::Url::parse(raw)
            .map_err(|e| PoolError::Configuration(format!("malformed endpoint '{}': {}", raw, e)))?;

        let scheme = match url.scheme() {
            "http" => Scheme::Plain,
            "https" => Scheme::Secure,
            other => {
                return Err(PoolError::Configuration(format!(
                    "unknown scheme '{}' in endpoint '{}'",
                    other, raw
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| PoolError::Configuration(format!("endpoint '{}' has no host", raw)))?
            .to_string();

        let port = url.port().unwrap_or_else(|| scheme.default_port());

        Ok(Self { scheme, host, port })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the channel factory should wrap the connection in TLS
    pub fn use_tls(&self) -> bool {
        self.scheme == Scheme::Secure
    }

    /// `host:port` pair used for socket connects
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Stable map key for pools keyed by endpoint
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}
