use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use super::RoutePlannerError;

/// A contiguous range of egress addresses in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpBlock {
    network: IpAddr,
    prefix: u8,
}

impl IpBlock {
    pub fn new(address: IpAddr, prefix: u8) -> Result<Self, RoutePlannerError> {
        let bits = address_bits(&address);
        if prefix > bits {
            return Err(RoutePlannerError::InvalidIpBlock(format!(
                "{address}/{prefix}: prefix exceeds {bits} bits"
            )));
        }
        let network = match address {
            IpAddr::V4(v4) => {
                let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
            }
            IpAddr::V6(v6) => {
                let mask = u128::MAX.checked_shl(128 - prefix as u32).unwrap_or(0);
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
            }
        };
        Ok(Self { network, prefix })
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn is_ipv4(&self) -> bool {
        self.network.is_ipv4()
    }

    /// Number of addresses in the block, saturating at `u128::MAX` for `::/0`.
    pub fn size(&self) -> u128 {
        let host_bits = (address_bits(&self.network) - self.prefix) as u32;
        1u128.checked_shl(host_bits).unwrap_or(u128::MAX)
    }

    /// The address at `index` within the block, if in range.
    pub fn address_at(&self, index: u128) -> Option<IpAddr> {
        if index >= self.size() {
            return None;
        }
        match self.network {
            IpAddr::V4(v4) => {
                let offset = u32::try_from(index).ok()?;
                Some(IpAddr::V4(Ipv4Addr::from(u32::from(v4).checked_add(offset)?)))
            }
            IpAddr::V6(v6) => Some(IpAddr::V6(Ipv6Addr::from(
                u128::from(v6).checked_add(index)?,
            ))),
        }
    }

    pub fn contains(&self, address: &IpAddr) -> bool {
        self.index_of(address).is_some()
    }

    /// Offset of `address` inside the block.
    pub fn index_of(&self, address: &IpAddr) -> Option<u128> {
        match (self.network, address) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let offset = u32::from(*addr).checked_sub(u32::from(net))? as u128;
                (offset < self.size()).then_some(offset)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let offset = u128::from(*addr).checked_sub(u128::from(net))?;
                (offset < self.size()).then_some(offset)
            }
            _ => None,
        }
    }

    /// The Java-style address family name reported by the admin status.
    pub fn type_name(&self) -> &'static str {
        if self.is_ipv4() {
            "Inet4Address"
        } else {
            "Inet6Address"
        }
    }
}

fn address_bits(address: &IpAddr) -> u8 {
    match address {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

impl FromStr for IpBlock {
    type Err = RoutePlannerError;

    /// Parses `addr/prefix`; a bare address is a single-address block.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || RoutePlannerError::InvalidIpBlock(s.to_string());
        let (address, prefix) = match s.split_once('/') {
            Some((address, prefix)) => {
                let address: IpAddr = address.parse().map_err(|_| invalid())?;
                let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
                (address, prefix)
            }
            None => {
                let address: IpAddr = s.parse().map_err(|_| invalid())?;
                let bits = address_bits(&address);
                (address, bits)
            }
        };
        Self::new(address, prefix)
    }
}

impl fmt::Display for IpBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_block() {
        let block: IpBlock = "10.0.0.5/29".parse().unwrap();
        assert_eq!(block.network(), "10.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(block.size(), 8);
        assert_eq!(
            block.address_at(7),
            Some("10.0.0.7".parse::<IpAddr>().unwrap())
        );
        assert_eq!(block.address_at(8), None);
        assert_eq!(block.type_name(), "Inet4Address");
        assert_eq!(block.to_string(), "10.0.0.0/29");
    }

    #[test]
    fn test_parse_ipv6_block() {
        let block: IpBlock = "2001:db8::/64".parse().unwrap();
        assert_eq!(block.size(), 1u128 << 64);
        assert_eq!(
            block.address_at(1),
            Some("2001:db8::1".parse::<IpAddr>().unwrap())
        );
        assert_eq!(block.type_name(), "Inet6Address");
    }

    #[test]
    fn test_full_ipv6_space_saturates() {
        let block: IpBlock = "::/0".parse().unwrap();
        assert_eq!(block.size(), u128::MAX);
    }

    #[test]
    fn test_bare_address() {
        let block: IpBlock = "192.168.1.10".parse().unwrap();
        assert_eq!(block.size(), 1);
        assert!(block.contains(&"192.168.1.10".parse().unwrap()));
        assert!(!block.contains(&"192.168.1.11".parse().unwrap()));
    }

    #[test]
    fn test_index_of() {
        let block: IpBlock = "10.0.0.0/30".parse().unwrap();
        assert_eq!(block.index_of(&"10.0.0.2".parse().unwrap()), Some(2));
        assert_eq!(block.index_of(&"10.0.0.4".parse().unwrap()), None);
        assert_eq!(block.index_of(&"::1".parse().unwrap()), None);
    }

    #[test]
    fn test_invalid_blocks() {
        for raw in ["10.0.0.0/33", "nope/8", "10.0.0.0/x", "2001:db8::/129", ""] {
            assert!(raw.parse::<IpBlock>().is_err(), "{raw}");
        }
    }
}
