//! CIDR allow-lists for API and private-network clients

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// A CIDR string that failed to parse
#[derive(Debug, thiserror::Error)]
#[error("Invalid CIDR {0}")]
pub struct InvalidCidr(pub String);

/// One CIDR block, IPv4 or IPv6
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, normalize(ip)) {
            (IpAddr::V4(network), IpAddr::V4(ip)) => {
                let mask = mask_v4(self.prefix);
                u32::from(network) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(network), IpAddr::V6(ip)) => {
                let mask = mask_v6(self.prefix);
                u128::from(network) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for IpRange {
    type Err = InvalidCidr;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidCidr(raw.to_string());
        let (addr, prefix) = raw.trim().split_once('/').ok_or_else(invalid)?;
        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;

        let max = if network.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { network, prefix })
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// A set of CIDR blocks
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    ranges: Vec<IpRange>,
}

impl AllowList {
    /// Parse every entry; the first malformed one fails the whole list
    pub fn parse<S: AsRef<str>>(cidrs: &[S]) -> Result<Self, InvalidCidr> {
        let ranges = cidrs
            .iter()
            .map(|cidr| cidr.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ranges })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }

    /// Like [`AllowList::contains`] for a textual address; unparseable input
    /// is never contained.
    pub fn contains_str(&self, ip: &str) -> bool {
        ip.trim()
            .parse::<IpAddr>()
            .map_or(false, |ip| self.contains(ip))
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Treat `::ffff:a.b.c.d` as the IPv4 address it wraps
fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        v4 => v4,
    }
}

fn mask_v4(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
}

fn mask_v6(prefix: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(cidrs: &[&str]) -> AllowList {
        AllowList::parse(cidrs).unwrap()
    }

    #[test]
    fn test_ipv4_containment() {
        let private = list(&["10.0.0.0/8", "192.168.0.0/16", "100.64.0.0/10"]);
        assert!(private.contains_str("10.1.2.3"));
        assert!(private.contains_str("192.168.255.1"));
        assert!(private.contains_str("100.127.0.1"));
        assert!(!private.contains_str("100.128.0.1"));
        assert!(!private.contains_str("8.8.8.8"));
    }

    #[test]
    fn test_host_bits_are_ignored() {
        let loopback = list(&["127.0.0.1/8"]);
        assert!(loopback.contains_str("127.0.0.1"));
        assert!(loopback.contains_str("127.255.0.9"));
        assert!(!loopback.contains_str("10.0.0.1"));
    }

    #[test]
    fn test_ipv6_containment() {
        let ula = list(&["fc00::/7", "::1/128"]);
        assert!(ula.contains_str("fd32::"));
        assert!(ula.contains_str("::1"));
        assert!(!ula.contains_str("2001:db8::1"));
    }

    #[test]
    fn test_ipv4_mapped_addresses_are_normalized() {
        let private = list(&["10.0.0.0/8"]);
        assert!(private.contains_str("::ffff:10.0.0.7"));
        assert!(!private.contains_str("::ffff:11.0.0.7"));
    }

    #[test]
    fn test_zero_prefix_matches_family() {
        let any_v4 = list(&["0.0.0.0/0"]);
        assert!(any_v4.contains_str("203.0.113.9"));
        assert!(!any_v4.contains_str("2001:db8::1"));
    }

    #[test]
    fn test_unparseable_client_is_not_contained() {
        let private = list(&["0.0.0.0/0"]);
        assert!(!private.contains_str(""));
        assert!(!private.contains_str("not-an-ip"));
    }

    #[test]
    fn test_invalid_cidr_rejected() {
        assert!(AllowList::parse(&["10.0.0.0"]).is_err());
        assert!(AllowList::parse(&["10.0.0.0/33"]).is_err());
        assert!(AllowList::parse(&["fc00::/129"]).is_err());
        assert!(AllowList::parse(&["banana/8"]).is_err());
        assert_eq!(
            "10.0.0.0/8".parse::<IpRange>().unwrap().to_string(),
            "10.0.0.0/8"
        );
    }
}
