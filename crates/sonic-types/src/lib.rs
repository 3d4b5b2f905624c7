//! Network primitives shared by the ARP daemon crates.
//!
//! - [`IfIndex`] / [`IfType`]: asicd interface indices (`type << 24 | id`)
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers plus the reserved "no VLAN" id
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`Ipv4IntfAddr`]: an IPv4 interface address in CIDR notation

mod ifindex;
mod ip;
mod mac;
mod vlan;

pub use ifindex::{IfIndex, IfType};
pub use ip::Ipv4IntfAddr;
pub use mac::MacAddress;
pub use vlan::VlanId;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IPv4 interface address: {0}")]
    InvalidIntfAddress(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),
}
