//! `ws://` / `wss://` endpoint parsing.

use std::fmt;

use ::url::{Host, Url};

use crate::{Result, WsError};

pub const DEFAULT_WS_PORT: u16 = 80;
pub const DEFAULT_WSS_PORT: u16 = 443;

/// Validated WebSocket endpoint.
///
/// Accepts `ws://host[:port][/path]` and `wss://host[:port][/path]`. A query
/// string is kept as part of the request target; userinfo and fragments are
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    url: Url,
    secure: bool,
    host: String,
    port: u16,
}

impl WsUrl {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(WsError::invalid_url("empty URL"));
        }

        let url = Url::parse(trimmed).map_err(|e| WsError::invalid_url(format!("{trimmed}: {e}")))?;

        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            other => {
                return Err(WsError::invalid_url(format!(
                    "{trimmed}: unsupported scheme '{other}', expected ws or wss"
                )))
            }
        };

        let host = match url.host() {
            Some(Host::Domain(d)) if !d.is_empty() => d.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(WsError::invalid_url(format!("{trimmed}: missing host"))),
        };

        if !url.username().is_empty() || url.password().is_some() {
            return Err(WsError::invalid_url(format!("{trimmed}: credentials are not allowed")));
        }
        if url.fragment().is_some() {
            return Err(WsError::invalid_url(format!("{trimmed}: fragments are not allowed")));
        }

        let default_port = if secure { DEFAULT_WSS_PORT } else { DEFAULT_WS_PORT };
        let port = url.port().unwrap_or(default_port);

        Ok(Self {
            url,
            secure,
            host,
            port,
        })
    }

    /// True for `wss://`.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Host without IPv6 brackets, suitable for name resolution.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Normalized URL string.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for WsUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl std::str::FromStr for WsUrl {
    type Err = WsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
