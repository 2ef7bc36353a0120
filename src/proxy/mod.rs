//! Egress proxy pool
//!
//! Loads newline-delimited proxy endpoints and hands them out by index.
//! socks4 endpoints are reached through a local [`Socks4Relay`].

mod relay;

pub use relay::Socks4Relay;

use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

/// Transport selected by the proxy URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyScheme {
    Http,
    Https,
    Socks4,
    Socks5,
}

/// One egress proxy connection string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEndpoint {
    url: String,
    scheme: ProxyScheme,
}

impl ProxyEndpoint {
    /// Parse a connection string; the prefix decides the scheme
    pub fn parse(raw: &str) -> Option<Self> {
        let url = raw.trim();
        let lower = url.to_ascii_lowercase();
        let scheme = if lower.starts_with("socks5") {
            ProxyScheme::Socks5
        } else if lower.starts_with("socks4") {
            ProxyScheme::Socks4
        } else if lower.starts_with("https") {
            ProxyScheme::Https
        } else if lower.starts_with("http") {
            ProxyScheme::Http
        } else {
            return None;
        };
        Some(Self {
            url: url.to_string(),
            scheme,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn scheme(&self) -> ProxyScheme {
        self.scheme
    }

    /// Host part without credentials, for logs
    pub fn redacted(&self) -> String {
        match self.url.split_once("://") {
            Some((scheme, rest)) => {
                let host = rest.rsplit_once('@').map(|(_, h)| h).unwrap_or(rest);
                format!("{}://{}", scheme, host)
            }
            None => self.url.clone(),
        }
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

/// Ordered list of proxies, reloaded once per cycle
#[derive(Debug, Clone, Default)]
pub struct ProxyPool {
    endpoints: Vec<ProxyEndpoint>,
}

impl ProxyPool {
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Self {
        Self { endpoints }
    }

    /// Parse file contents: trimmed lines, `#` comments and blanks ignored
    pub fn parse(contents: &str) -> Self {
        let mut endpoints = Vec::new();
        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match ProxyEndpoint::parse(line) {
                Some(endpoint) => endpoints.push(endpoint),
                None => warn!(proxy = %line, "Unsupported proxy scheme, skipping"),
            }
        }
        Self { endpoints }
    }

    /// Load from disk; a missing file is created empty and yields an empty pool
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            warn!(path = %path.display(), "Proxy file not found, creating empty file");
            if let Err(e) = fs::write(path, "") {
                warn!(path = %path.display(), error = %e, "Failed to create proxy file");
            }
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => {
                let pool = Self::parse(&contents);
                info!(path = %path.display(), count = pool.len(), "Loaded proxies");
                pool
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read proxy file");
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Proxy for dispatch chunk `index`: `pool[index mod len]`, none when empty
    pub fn assign(&self, index: usize) -> Option<&ProxyEndpoint> {
        if self.endpoints.is_empty() {
            return None;
        }
        self.endpoints.get(index % self.endpoints.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProxyEndpoint> {
        self.endpoints.iter()
    }
}
