//! Endpoint and address value types.
//!
//! These are not on the critical path (spec §3): the reactor only needs an
//! [`Endpoint`] to build a `sockaddr` at `connect` time. They are plain,
//! immutable value types.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// An IPv4 or IPv6 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpAddress(IpAddr);

impl IpAddress {
    /// Build an address from 4 (IPv4) or 16 (IPv6) bytes in network order.
    ///
    /// # Panics
    ///
    /// Panics if `bytes.len()` is neither 4 nor 16.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match bytes.len() {
            4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(bytes);
                IpAddress(IpAddr::V4(Ipv4Addr::from(octets)))
            }
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                IpAddress(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            n => panic!("IpAddress::from_bytes: expected 4 or 16 bytes, got {n}"),
        }
    }

    /// The address bytes in network order: 4 bytes for IPv4, 16 for IPv6.
    pub fn to_bytes(self) -> Vec<u8> {
        match self.0 {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        }
    }

    pub fn is_ipv4(self) -> bool {
        self.0.is_ipv4()
    }

    pub fn is_ipv6(self) -> bool {
        self.0.is_ipv6()
    }

    pub fn loopback(ipv6: bool) -> Self {
        if ipv6 {
            IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST))
        } else {
            IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST))
        }
    }

    pub fn unspecified(ipv6: bool) -> Self {
        if ipv6 {
            IpAddress(IpAddr::V6(Ipv6Addr::UNSPECIFIED))
        } else {
            IpAddress(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        }
    }
}

impl From<IpAddr> for IpAddress {
    fn from(addr: IpAddr) -> Self {
        IpAddress(addr)
    }
}

impl From<IpAddress> for IpAddr {
    fn from(addr: IpAddress) -> Self {
        addr.0
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An IP address plus a port, in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    address: IpAddress,
    port: u16,
}

impl Endpoint {
    pub fn new(address: IpAddress, port: u16) -> Self {
        Endpoint { address, port }
    }

    pub fn address(&self) -> IpAddress {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Build the `std::net::SocketAddr` the sys backends construct a raw
    /// `sockaddr` from.
    pub fn to_socket_addr(self) -> SocketAddr {
        SocketAddr::new(self.address.into(), self.port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint {
            address: addr.ip().into(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address.0 {
            IpAddr::V4(_) => write!(f, "{}:{}", self.address, self.port),
            IpAddr::V6(_) => write!(f, "[{}]:{}", self.address, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_v4_bytes() {
        let addr = IpAddress::from_bytes(&[127, 0, 0, 1]);
        assert!(addr.is_ipv4());
        assert_eq!(addr.to_bytes(), vec![127, 0, 0, 1]);
    }

    #[test]
    fn roundtrips_v6_bytes() {
        let bytes = [0u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        let addr = IpAddress::from_bytes(&bytes);
        assert!(addr.is_ipv6());
        assert_eq!(addr.to_bytes(), bytes.to_vec());
    }

    #[test]
    fn endpoint_display_matches_family() {
        let v4 = Endpoint::new(IpAddress::loopback(false), 8080);
        assert_eq!(v4.to_string(), "127.0.0.1:8080");

        let v6 = Endpoint::new(IpAddress::loopback(true), 8080);
        assert_eq!(v6.to_string(), "[::1]:8080");
    }
}
