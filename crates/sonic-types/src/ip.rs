//! IPv4 interface address (address plus prefix length).

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 address configured on an interface, e.g. `10.0.0.1/24`.
///
/// Unlike a route prefix the host bits are kept: `address()` is the
/// interface's own address and `netmask()` is derived from the prefix length.
///
/// ```
/// use sonic_types::Ipv4IntfAddr;
/// use std::net::Ipv4Addr;
///
/// let addr: Ipv4IntfAddr = "10.0.0.1/24".parse().unwrap();
/// assert_eq!(addr.address(), Ipv4Addr::new(10, 0, 0, 1));
/// assert_eq!(addr.netmask(), Ipv4Addr::new(255, 255, 255, 0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4IntfAddr {
    address: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4IntfAddr {
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, ParseError> {
        if prefix_len > 32 {
            return Err(ParseError::InvalidIntfAddress(format!(
                "{}/{}",
                address, prefix_len
            )));
        }
        Ok(Self {
            address,
            prefix_len,
        })
    }

    pub const fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn netmask(&self) -> Ipv4Addr {
        let bits = match self.prefix_len {
            0 => 0,
            len => u32::MAX << (32 - u32::from(len)),
        };
        Ipv4Addr::from(bits)
    }
}

impl fmt::Display for Ipv4IntfAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Ipv4IntfAddr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidIntfAddress(s.to_string());
        let (addr, len) = s.split_once('/').ok_or_else(invalid)?;
        let address: Ipv4Addr = addr.trim().parse().map_err(|_| invalid())?;
        let prefix_len: u8 = len.trim().parse().map_err(|_| invalid())?;
        Ipv4IntfAddr::new(address, prefix_len).map_err(|_| invalid())
    }
}

impl TryFrom<String> for Ipv4IntfAddr {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ipv4IntfAddr> for String {
    fn from(addr: Ipv4IntfAddr) -> String {
        addr.to_string()
    }
}
