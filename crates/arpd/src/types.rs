//! Topology entities held by the [`TopologyStore`](crate::TopologyStore).

use crate::capture::RxWorker;
use serde::{Deserialize, Serialize};
use sonic_types::{IfIndex, IfType, Ipv4IntfAddr, MacAddress, VlanId};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

/// Frame tagging of a VLAN member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tagging {
    Tagged,
    Untagged,
}

impl Tagging {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tagging::Tagged => "tagged",
            Tagging::Untagged => "untagged",
        }
    }
}

/// A VLAN or LAG member, decoded from its interface index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Member {
    Port(IfIndex),
    Lag(IfIndex),
}

impl Member {
    /// Decodes a member index; only ports and LAGs can be VLAN members.
    pub fn decode(ifindex: IfIndex) -> Option<Self> {
        match ifindex.if_type() {
            IfType::Port => Some(Member::Port(ifindex)),
            IfType::Lag => Some(Member::Lag(ifindex)),
            _ => None,
        }
    }

    pub fn ifindex(&self) -> IfIndex {
        match self {
            Member::Port(idx) | Member::Lag(idx) => *idx,
        }
    }
}

/// The interface an IPv4 address is configured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum L3Target {
    Vlan { ifindex: IfIndex, vlan_id: VlanId },
    Lag(IfIndex),
    Port(IfIndex),
}

impl L3Target {
    /// Decodes an L3-capable interface index. Returns `None` for types that
    /// cannot carry an ARP-managed address.
    pub fn decode(ifindex: IfIndex) -> Option<Self> {
        match ifindex.if_type() {
            IfType::Vlan => {
                let vlan_id = u16::try_from(ifindex.id()).ok()?;
                Some(L3Target::Vlan {
                    ifindex,
                    vlan_id: VlanId::new(vlan_id).ok()?,
                })
            }
            IfType::Lag => Some(L3Target::Lag(ifindex)),
            IfType::Port => Some(L3Target::Port(ifindex)),
            _ => None,
        }
    }

    pub fn ifindex(&self) -> IfIndex {
        match self {
            L3Target::Vlan { ifindex, .. } => *ifindex,
            L3Target::Lag(idx) | L3Target::Port(idx) => *idx,
        }
    }

    /// VLAN id the target's bindings are keyed by on member ports.
    pub fn vlan_id(&self) -> VlanId {
        match self {
            L3Target::Vlan { vlan_id, .. } => *vlan_id,
            L3Target::Lag(_) | L3Target::Port(_) => VlanId::RESERVED,
        }
    }
}

/// L3 context of a port for one VLAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L3Binding {
    /// Owning L3 interface.
    pub l3_ifindex: IfIndex,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// LAG the binding was learned through; `None` when direct.
    pub lag: Option<IfIndex>,
}

/// Capture state of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    Down,
    UpIdle,
    UpCapturing,
}

/// Physical port.
#[derive(Debug)]
pub struct Port {
    pub name: String,
    pub mac: Option<MacAddress>,
    /// Untagged VLAN with an L3 binding, or [`VlanId::RESERVED`].
    pub untagged_vlan: VlanId,
    pub oper_up: bool,
    pub l3_bindings: BTreeMap<VlanId, L3Binding>,
    pub(crate) rx: Option<RxWorker>,
}

impl Port {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mac: None,
            untagged_vlan: VlanId::RESERVED,
            oper_up: false,
            l3_bindings: BTreeMap::new(),
            rx: None,
        }
    }

    pub fn rx_state(&self) -> RxState {
        match (self.oper_up, self.rx.is_some()) {
            (false, _) => RxState::Down,
            (true, false) => RxState::UpIdle,
            (true, true) => RxState::UpCapturing,
        }
    }
}

/// Link aggregation group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lag {
    pub name: String,
    pub untagged_vlan: VlanId,
    pub ports: BTreeSet<IfIndex>,
    /// VLANs the LAG is a member of.
    pub vlans: BTreeSet<VlanId>,
}

impl Lag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn tagging_for(&self, vlan_id: VlanId) -> Tagging {
        if self.untagged_vlan == vlan_id {
            Tagging::Untagged
        } else {
            Tagging::Tagged
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vlan {
    pub name: String,
    pub untagged: BTreeSet<Member>,
    pub tagged: BTreeSet<Member>,
}

impl Vlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// All members, untagged first, each in index order.
    pub fn members(&self) -> impl Iterator<Item = (Member, Tagging)> + '_ {
        self.untagged
            .iter()
            .map(|m| (*m, Tagging::Untagged))
            .chain(self.tagged.iter().map(|m| (*m, Tagging::Tagged)))
    }

    pub fn tagging_of(&self, member: &Member) -> Option<Tagging> {
        if self.untagged.contains(member) {
            Some(Tagging::Untagged)
        } else if self.tagged.contains(member) {
            Some(Tagging::Tagged)
        } else {
            None
        }
    }
}

/// An interface carrying an IPv4 address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L3Interface {
    pub target: L3Target,
    pub addr: Ipv4IntfAddr,
    /// Name of the underlying VLAN, LAG or port.
    pub name: String,
    pub oper_up: bool,
}

impl L3Interface {
    pub fn ip(&self) -> Ipv4Addr {
        self.addr.address()
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.addr.netmask()
    }
}

/// Parses asicd's operational state strings.
pub fn parse_oper_state(state: &str) -> Option<bool> {
    match state {
        "UP" => Some(true),
        "DOWN" => Some(false),
        _ => None,
    }
}
