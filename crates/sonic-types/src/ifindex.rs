//! Interface index encoding used by the hardware abstraction plane.
//!
//! An interface index packs the interface type into the top byte and the
//! type-local id into the low 24 bits. The type is decoded once with
//! [`IfIndex::if_type`] at the point an index enters the daemon; callers then
//! carry the decoded form instead of re-masking the raw value.

use serde::{Deserialize, Serialize};
use std::fmt;

const TYPE_SHIFT: u32 = 24;
const ID_MASK: u32 = 0x00ff_ffff;

/// Interface type encoded in the top byte of an [`IfIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfType {
    /// Physical front-panel port.
    Port,
    /// Link aggregation group.
    Lag,
    /// VLAN (SVI when it carries an IP).
    Vlan,
    Null,
    Loopback,
    Secondary,
    Virtual,
    /// Any type code the daemon does not model.
    Unknown(u8),
}

impl IfType {
    const fn code(self) -> u8 {
        match self {
            IfType::Port => 0,
            IfType::Lag => 1,
            IfType::Vlan => 2,
            IfType::Null => 3,
            IfType::Loopback => 4,
            IfType::Secondary => 5,
            IfType::Virtual => 6,
            IfType::Unknown(code) => code,
        }
    }

    const fn from_code(code: u8) -> Self {
        match code {
            0 => IfType::Port,
            1 => IfType::Lag,
            2 => IfType::Vlan,
            3 => IfType::Null,
            4 => IfType::Loopback,
            5 => IfType::Secondary,
            6 => IfType::Virtual,
            other => IfType::Unknown(other),
        }
    }

    /// Human readable type name, used in logs and errors.
    pub const fn as_str(&self) -> &'static str {
        match self {
            IfType::Port => "port",
            IfType::Lag => "lag",
            IfType::Vlan => "vlan",
            IfType::Null => "null",
            IfType::Loopback => "loopback",
            IfType::Secondary => "secondary",
            IfType::Virtual => "virtual",
            IfType::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for IfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide interface identifier (`type << 24 | id`).
///
/// ```
/// use sonic_types::{IfIndex, IfType};
///
/// let lag = IfIndex::new(IfType::Lag, 7);
/// assert_eq!(lag.if_type(), IfType::Lag);
/// assert_eq!(lag.id(), 7);
/// assert_eq!(lag.as_u32(), 0x0100_0007);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IfIndex(u32);

impl IfIndex {
    /// Builds an index from its type and type-local id. Ids wider than 24 bits
    /// are truncated.
    pub const fn new(if_type: IfType, id: u32) -> Self {
        IfIndex(((if_type.code() as u32) << TYPE_SHIFT) | (id & ID_MASK))
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub const fn if_type(&self) -> IfType {
        IfType::from_code((self.0 >> TYPE_SHIFT) as u8)
    }

    /// Type-local id (port number, LAG id or VLAN id).
    pub const fn id(&self) -> u32 {
        self.0 & ID_MASK
    }

    /// Returns the index of the VLAN interface for `vlan_id`.
    pub const fn vlan(vlan_id: u16) -> Self {
        IfIndex::new(IfType::Vlan, vlan_id as u32)
    }
}

impl fmt::Display for IfIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.if_type(), self.id())
    }
}

impl From<u32> for IfIndex {
    fn from(raw: u32) -> Self {
        IfIndex(raw)
    }
}

impl From<IfIndex> for u32 {
    fn from(idx: IfIndex) -> u32 {
        idx.0
    }
}
