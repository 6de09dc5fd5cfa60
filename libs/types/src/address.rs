//! Addressing Primitives
//!
//! - [`NodeAddress`]: where a platform listens for inter-platform TCP traffic
//! - [`PlatformId`]: per-process identity, regenerated on every start
//! - [`EntityAddress`]: parsed form of `name` or `name@alias[:port]`

use crate::errors::AddressError;
use crate::PLATFORM_SEPARATOR;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use uuid::Uuid;

/// Network address of a platform (listen host + TCP port)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Socket address to connect to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl From<SocketAddr> for NodeAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

impl FromStr for NodeAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>()
            .map(NodeAddress::from)
            .map_err(|_| AddressError::Malformed {
                input: s.to_string(),
                expected: "ip:port",
            })
    }
}

/// Process-lifetime platform identifier
///
/// A new identifier is generated each time a platform starts. Two records with
/// the same node address but different identifiers are different platform
/// incarnations and must never be merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformId(Uuid);

impl PlatformId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for PlatformId {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(PlatformId)
            .map_err(|_| AddressError::InvalidPlatformId { input: s.to_string() })
    }
}

/// Platform part of an `entity@host[:port]` address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformRef {
    /// Alias or literal host
    pub host: String,
    /// Explicit port, overriding the alias port
    pub port: Option<u16>,
}

impl fmt::Display for PlatformRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

/// Parsed recipient name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityAddress {
    pub name: String,
    pub platform: Option<PlatformRef>,
}

impl EntityAddress {
    /// Parse `name` or `name@host[:port]`
    ///
    /// IPv6 literals must be bracketed (`name@[::1]:4242`).
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let Some((name, rest)) = input.split_once(PLATFORM_SEPARATOR) else {
            if input.is_empty() {
                return Err(AddressError::Empty { what: "entity name" });
            }
            return Ok(Self {
                name: input.to_string(),
                platform: None,
            });
        };

        if name.is_empty() {
            return Err(AddressError::Empty { what: "entity name" });
        }
        if rest.is_empty() {
            return Err(AddressError::Empty { what: "platform alias" });
        }

        let (host, port) = split_host_port(rest)?;
        Ok(Self {
            name: name.to_string(),
            platform: Some(PlatformRef { host, port }),
        })
    }

    pub fn is_remote(&self) -> bool {
        self.platform.is_some()
    }
}

impl fmt::Display for EntityAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.platform {
            Some(platform) => write!(f, "{}{}{}", self.name, PLATFORM_SEPARATOR, platform),
            None => write!(f, "{}", self.name),
        }
    }
}

fn split_host_port(input: &str) -> Result<(String, Option<u16>), AddressError> {
    // Bracketed IPv6 literal
    if let Some(stripped) = input.strip_prefix('[') {
        let (host, tail) = stripped.split_once(']').ok_or_else(|| AddressError::Malformed {
            input: input.to_string(),
            expected: "[ipv6]:port",
        })?;
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(parse_port(p)?),
            None if tail.is_empty() => None,
            None => {
                return Err(AddressError::Malformed {
                    input: input.to_string(),
                    expected: "[ipv6]:port",
                })
            }
        };
        return Ok((host.to_string(), port));
    }

    match input.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            if host.is_empty() {
                return Err(AddressError::Empty { what: "platform alias" });
            }
            Ok((host.to_string(), Some(parse_port(port)?)))
        }
        _ => Ok((input.to_string(), None)),
    }
}

fn parse_port(input: &str) -> Result<u16, AddressError> {
    input.parse::<u16>().map_err(|_| AddressError::InvalidPort {
        input: input.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_entity_name() {
        let addr = EntityAddress::parse("alice").unwrap();
        assert_eq!(addr.name, "alice");
        assert!(!addr.is_remote());
    }

    #[test]
    fn test_alias_with_and_without_port() {
        let addr = EntityAddress::parse("alice@lab").unwrap();
        assert_eq!(addr.platform, Some(PlatformRef { host: "lab".into(), port: None }));

        let addr = EntityAddress::parse("alice@10.0.0.7:4300").unwrap();
        assert_eq!(addr.name, "alice");
        assert_eq!(
            addr.platform,
            Some(PlatformRef { host: "10.0.0.7".into(), port: Some(4300) })
        );
        assert_eq!(addr.to_string(), "alice@10.0.0.7:4300");
    }

    #[test]
    fn test_bracketed_ipv6() {
        let addr = EntityAddress::parse("bob@[::1]:4242").unwrap();
        assert_eq!(
            addr.platform,
            Some(PlatformRef { host: "::1".into(), port: Some(4242) })
        );
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(EntityAddress::parse("").is_err());
        assert!(EntityAddress::parse("@lab").is_err());
        assert!(EntityAddress::parse("alice@").is_err());
        assert!(matches!(
            EntityAddress::parse("alice@lab:notaport"),
            Err(AddressError::InvalidPort { .. })
        ));
    }

    #[test]
    fn test_platform_id_is_fresh_and_parses() {
        let a = PlatformId::generate();
        let b = PlatformId::generate();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<PlatformId>().unwrap(), a);
        assert!("nope".parse::<PlatformId>().is_err());
    }

    #[test]
    fn test_node_address_parse() {
        let node: NodeAddress = "127.0.0.1:4242".parse().unwrap();
        assert_eq!(node.port, 4242);
        assert_eq!(node.to_string(), "127.0.0.1:4242");
        assert!("localhost".parse::<NodeAddress>().is_err());
    }
}
