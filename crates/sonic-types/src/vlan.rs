//! VLAN identifier with the reserved "no VLAN" sentinel.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// IEEE 802.1Q VLAN identifier.
///
/// Configurable VLANs are 1-4094. [`VlanId::RESERVED`] (4095) never names a
/// real VLAN; it marks "no VLAN context", e.g. a port without an untagged VLAN
/// or an L3 binding learned directly on a routed port or LAG.
///
/// ```
/// use sonic_types::VlanId;
///
/// let vlan = VlanId::new(100).unwrap();
/// assert_eq!(vlan.as_u16(), 100);
/// assert!(VlanId::new(0).is_err());
/// assert!(VlanId::RESERVED.is_reserved());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VlanId(u16);

impl VlanId {
    pub const MIN: u16 = 1;
    pub const MAX: u16 = 4094;

    /// Sentinel for "no VLAN".
    pub const RESERVED: VlanId = VlanId(4095);

    /// Creates a configurable VLAN id (1-4094).
    pub const fn new(id: u16) -> Result<Self, ParseError> {
        if id >= Self::MIN && id <= Self::MAX {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id))
        }
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    pub const fn is_reserved(&self) -> bool {
        self.0 == Self::RESERVED.0
    }
}

impl Default for VlanId {
    fn default() -> Self {
        VlanId::RESERVED
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_reserved() {
            f.write_str("none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
