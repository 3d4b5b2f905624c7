//! Notifications published by asicd.
//!
//! Decoded from JSON objects tagged by `type`, one per line on the
//! notification stream:
//!
//! ```json
//! {"type": "vlan", "kind": "update", "vlan_id": 10, "name": "Vlan10", "untagged": [1, 2]}
//! {"type": "ipv4_intf", "op": "create", "ifindex": 33554442, "ip_addr": "10.0.0.1/24"}
//! {"type": "l2_state", "ifindex": 1, "up": false}
//! ```

use crate::error::{ArpdError, Result};
use serde::{Deserialize, Serialize};
use sonic_types::IfIndex;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    Create,
    Update,
    Delete,
}

/// IPv4 interface notifications only create or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntfOp {
    Create,
    Delete,
}

/// An IPv4 neighbor moved to another port. Forwarded unchanged to the ARP
/// cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacMoveNotification {
    pub ip_addr: String,
    pub ifindex: IfIndex,
    pub vlan_id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AsicdNotification {
    Vlan {
        kind: NotifyKind,
        vlan_id: u16,
        #[serde(default)]
        name: String,
        #[serde(default)]
        untagged: Vec<IfIndex>,
        #[serde(default)]
        tagged: Vec<IfIndex>,
    },
    Lag {
        kind: NotifyKind,
        ifindex: IfIndex,
        #[serde(default)]
        name: String,
        #[serde(default)]
        members: Vec<IfIndex>,
    },
    Ipv4Intf {
        op: IntfOp,
        ifindex: IfIndex,
        ip_addr: String,
    },
    L2State {
        ifindex: IfIndex,
        up: bool,
    },
    L3State {
        ifindex: IfIndex,
        up: bool,
    },
    MacMove(MacMoveNotification),
}

impl AsicdNotification {
    pub fn from_json(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| ArpdError::Notification(e.to_string()))
    }

    /// Short label for logs and counters.
    pub fn label(&self) -> &'static str {
        match self {
            AsicdNotification::Vlan { .. } => "vlan",
            AsicdNotification::Lag { .. } => "lag",
            AsicdNotification::Ipv4Intf { .. } => "ipv4_intf",
            AsicdNotification::L2State { .. } => "l2_state",
            AsicdNotification::L3State { .. } => "l3_state",
            AsicdNotification::MacMove(_) => "mac_move",
        }
    }
}

impl fmt::Display for AsicdNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsicdNotification::Vlan { kind, vlan_id, .. } => {
                write!(f, "vlan {:?} {}", kind, vlan_id)
            }
            AsicdNotification::Lag { kind, ifindex, .. } => {
                write!(f, "lag {:?} {}", kind, ifindex)
            }
            AsicdNotification::Ipv4Intf { op, ifindex, ip_addr } => {
                write!(f, "ipv4_intf {:?} {} {}", op, ifindex, ip_addr)
            }
            AsicdNotification::L2State { ifindex, up } => {
                write!(f, "l2_state {} up={}", ifindex, up)
            }
            AsicdNotification::L3State { ifindex, up } => {
                write!(f, "l3_state {} up={}", ifindex, up)
            }
            AsicdNotification::MacMove(msg) => {
                write!(f, "mac_move {} {}", msg.ifindex, msg.ip_addr)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sonic_types::IfType;

    #[test]
    fn test_decode_vlan_defaults() {
        let msg = AsicdNotification::from_json(
            r#"{"type": "vlan", "kind": "create", "vlan_id": 10, "untagged": [1]}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            AsicdNotification::Vlan {
                kind: NotifyKind::Create,
                vlan_id: 10,
                name: String::new(),
                untagged: vec![IfIndex::new(IfType::Port, 1)],
                tagged: vec![],
            }
        );
        assert_eq!(msg.label(), "vlan");
    }

    #[test]
    fn test_decode_ipv4_and_state() {
        let msg = AsicdNotification::from_json(
            r#"{"type": "ipv4_intf", "op": "delete", "ifindex": 33554442, "ip_addr": "10.0.0.1/24"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            AsicdNotification::Ipv4Intf {
                op: IntfOp::Delete,
                ifindex: IfIndex::vlan(10),
                ip_addr: "10.0.0.1/24".to_string(),
            }
        );

        let msg =
            AsicdNotification::from_json(r#"{"type": "l3_state", "ifindex": 1, "up": true}"#)
                .unwrap();
        assert_eq!(msg.to_string(), "l3_state port:1 up=true");
    }

    #[test]
    fn test_decode_mac_move() {
        let msg = AsicdNotification::from_json(
            r#"{"type": "mac_move", "ip_addr": "10.0.0.7", "ifindex": 2, "vlan_id": 10}"#,
        )
        .unwrap();
        assert!(matches!(msg, AsicdNotification::MacMove(ref m) if m.vlan_id == 10));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = AsicdNotification::from_json(r#"{"type": "bfd", "ifindex": 1}"#).unwrap_err();
        assert!(matches!(err, ArpdError::Notification(_)));
        assert!(AsicdNotification::from_json("not json").is_err());
    }
}
