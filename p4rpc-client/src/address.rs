//! Server address parsing.
//!
//! Addresses use the `P4PORT` syntax `[transport:][host:]port`, where the
//! transport prefix selects plain TCP or TLS.

use crate::error::ClientError;
use p4rpc_protocol::DEFAULT_PORT;
use std::fmt;
use std::str::FromStr;

/// Host used when an address names only a port.
pub const DEFAULT_HOST: &str = "localhost";

/// Transport prefixes that select plain TCP.
const TCP_PREFIXES: &[&str] = &["tcp", "tcp4", "tcp6", "tcp46", "tcp64"];

/// Transport prefixes that select TLS.
const SSL_PREFIXES: &[&str] = &["ssl", "ssl4", "ssl6", "ssl46", "ssl64"];

/// A parsed server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// `host:port` for socket connection.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl FromStr for ServerAddress {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ClientError::InvalidAddress(s.to_string());
        let mut rest = s.trim();
        if rest.is_empty() {
            return Err(invalid());
        }

        let mut tls = false;
        if let Some((prefix, tail)) = rest.split_once(':') {
            let prefix = prefix.to_ascii_lowercase();
            if SSL_PREFIXES.contains(&prefix.as_str()) {
                tls = true;
                rest = tail;
            } else if TCP_PREFIXES.contains(&prefix.as_str()) {
                rest = tail;
            }
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let host = host.trim_start_matches('[').trim_end_matches(']');
                (host, port)
            }
            None => (DEFAULT_HOST, rest),
        };
        let port: u16 = port.parse().map_err(|_| invalid())?;
        let host = if host.is_empty() { DEFAULT_HOST } else { host };

        Ok(Self::new(host, port).with_tls(tls))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tls {
            write!(f, "ssl:{}", self.authority())
        } else {
            f.write_str(&self.authority())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_port_means_localhost() {
        let addr: ServerAddress = "1666".parse().unwrap();
        assert_eq!(addr, ServerAddress::new("localhost", 1666));
    }

    #[test]
    fn test_host_and_port() {
        let addr: ServerAddress = "perforce.example.com:1999".parse().unwrap();
        assert_eq!(addr.host, "perforce.example.com");
        assert_eq!(addr.port, 1999);
        assert!(!addr.tls);
        assert_eq!(addr.to_string(), "perforce.example.com:1999");
    }

    #[test]
    fn test_transport_prefixes() {
        let addr: ServerAddress = "ssl:p4:1666".parse().unwrap();
        assert!(addr.tls);
        assert_eq!(addr.host, "p4");
        assert_eq!(addr.to_string(), "ssl:p4:1666");

        let addr: ServerAddress = "tcp4:p4:1666".parse().unwrap();
        assert!(!addr.tls);
        assert_eq!(addr.host, "p4");

        let addr: ServerAddress = "ssl:1666".parse().unwrap();
        assert!(addr.tls);
        assert_eq!(addr.host, DEFAULT_HOST);
    }

    #[test]
    fn test_ipv6_host() {
        let addr: ServerAddress = "tcp6:[::1]:1666".parse().unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.authority(), "[::1]:1666");
    }

    #[test]
    fn test_invalid_addresses() {
        assert!("".parse::<ServerAddress>().is_err());
        assert!("p4:notaport".parse::<ServerAddress>().is_err());
        assert!("p4:99999".parse::<ServerAddress>().is_err());
    }
}
