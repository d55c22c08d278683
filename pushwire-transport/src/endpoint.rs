/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Server address parsing.

use crate::error::TransportError;
use pushwire_protocol::Operation;
use std::fmt;

/// Root of the request paths under the server address.
pub const SERVICE_PATH: &str = "pushwire";

/// Address scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
    /// Plain duplex channel.
    Ws,
    /// Duplex channel over TLS.
    Wss,
}

impl Scheme {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "ws" => Some(Self::Ws),
            "wss" => Some(Self::Wss),
            _ => None,
        }
    }

    /// Returns true for the TLS schemes.
    #[must_use]
    pub const fn is_secure(self) -> bool {
        matches!(self, Self::Https | Self::Wss)
    }

    /// Returns the port used when the address names none.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        if self.is_secure() { 443 } else { 80 }
    }
}

/// A parsed server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Address scheme.
    pub scheme: Scheme,
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Base path, without a trailing slash.
    pub path: String,
}

impl Endpoint {
    /// Parses a `scheme://host[:port][/path]` address.
    ///
    /// # Errors
    /// Returns `TransportError::InvalidAddress` when the scheme, host or port
    /// is missing or malformed.
    pub fn parse(address: &str) -> Result<Self, TransportError> {
        let invalid = |reason| TransportError::InvalidAddress {
            address: address.to_string(),
            reason,
        };
        let (scheme, rest) = address.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let scheme = Scheme::parse(scheme).ok_or_else(|| invalid("unknown scheme"))?;
        let (authority, path) = match rest.find('/') {
            Some(index) => rest.split_at(index),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(invalid("missing host"));
        }
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) if !authority.ends_with(']') => {
                let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
                (host, port)
            }
            _ => (authority, scheme.default_port()),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path: path.trim_end_matches('/').to_string(),
        })
    }

    /// Returns `host:port` for connecting.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the request path of an operation.
    #[must_use]
    pub fn request_path(&self, op: Operation) -> String {
        format!("{}/{SERVICE_PATH}/{op}.txt", self.path)
    }

    /// Returns the URL a session or control request is posted to.
    ///
    /// Channel schemes map to their HTTP counterparts.
    #[must_use]
    pub fn request_url(&self, op: Operation) -> String {
        let scheme = if self.scheme.is_secure() { "https" } else { "http" };
        format!("{scheme}://{}{}", self.authority(), self.request_path(op))
    }

    /// Returns the URL of the duplex channel.
    ///
    /// HTTP schemes map to their WebSocket counterparts.
    #[must_use]
    pub fn channel_url(&self) -> String {
        let scheme = if self.scheme.is_secure() { "wss" } else { "ws" };
        format!("{scheme}://{}{}/{SERVICE_PATH}", self.authority(), self.path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        };
        write!(f, "{scheme}://{}:{}{}", self.host, self.port, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_default_port() {
        let endpoint = Endpoint::parse("http://push.example.com").unwrap();
        assert_eq!(endpoint.scheme, Scheme::Http);
        assert_eq!(endpoint.host, "push.example.com");
        assert_eq!(endpoint.port, 80);
        assert_eq!(endpoint.path, "");
        assert_eq!(endpoint.authority(), "push.example.com:80");
    }

    #[test]
    fn test_parse_with_port_and_path() {
        let endpoint = Endpoint::parse("ws://127.0.0.1:8080/base/").unwrap();
        assert_eq!(endpoint.scheme, Scheme::Ws);
        assert_eq!(endpoint.port, 8080);
        assert_eq!(endpoint.path, "/base");
        assert_eq!(
            endpoint.request_path(Operation::BindSession),
            "/base/pushwire/bind_session.txt"
        );
    }

    #[test]
    fn test_parse_rejects_bad_addresses() {
        assert!(Endpoint::parse("push.example.com").is_err());
        assert!(Endpoint::parse("ftp://push.example.com").is_err());
        assert!(Endpoint::parse("http://").is_err());
        assert!(Endpoint::parse("http://host:port").is_err());
    }

    #[test]
    fn test_secure_scheme_urls() {
        let endpoint = Endpoint::parse("https://push.example.com").unwrap();
        assert_eq!(endpoint.port, 443);
        assert_eq!(
            endpoint.request_url(Operation::CreateSession),
            "https://push.example.com:443/pushwire/create_session.txt"
        );
        assert_eq!(endpoint.channel_url(), "wss://push.example.com:443/pushwire");
    }

    #[test]
    fn test_plain_scheme_urls() {
        let endpoint = Endpoint::parse("ws://127.0.0.1:8080/base").unwrap();
        assert_eq!(
            endpoint.request_url(Operation::Control),
            "http://127.0.0.1:8080/base/pushwire/control.txt"
        );
        assert_eq!(endpoint.channel_url(), "ws://127.0.0.1:8080/base/pushwire");
    }
}
