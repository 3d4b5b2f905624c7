//! Topology store: ports, LAGs, VLANs and L3 interfaces keyed by interface
//! index.
//!
//! The store is pure data. It is owned by the topology task and mutated only
//! by the loader and reconciler; lookups of absent indices return `None`
//! because notifications may reference interfaces that are not created yet or
//! already gone.

use crate::types::{L3Interface, Lag, Member, Port, Tagging, Vlan};
use sonic_types::{IfIndex, IfType, MacAddress, VlanId};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct TopologyStore {
    ports: BTreeMap<IfIndex, Port>,
    lags: BTreeMap<IfIndex, Lag>,
    vlans: BTreeMap<IfIndex, Vlan>,
    l3_intfs: BTreeMap<IfIndex, L3Interface>,
}

impl TopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Ports

    pub fn port(&self, ifindex: IfIndex) -> Option<&Port> {
        self.ports.get(&ifindex)
    }

    pub fn port_mut(&mut self, ifindex: IfIndex) -> Option<&mut Port> {
        self.ports.get_mut(&ifindex)
    }

    pub fn insert_port(&mut self, ifindex: IfIndex, port: Port) -> Option<Port> {
        self.ports.insert(ifindex, port)
    }

    pub fn contains_port(&self, ifindex: IfIndex) -> bool {
        self.ports.contains_key(&ifindex)
    }

    pub fn ports(&self) -> impl Iterator<Item = (IfIndex, &Port)> {
        self.ports.iter().map(|(idx, port)| (*idx, port))
    }

    pub fn port_indices(&self) -> Vec<IfIndex> {
        self.ports.keys().copied().collect()
    }

    // LAGs

    pub fn lag(&self, ifindex: IfIndex) -> Option<&Lag> {
        self.lags.get(&ifindex)
    }

    pub fn lag_mut(&mut self, ifindex: IfIndex) -> Option<&mut Lag> {
        self.lags.get_mut(&ifindex)
    }

    pub fn insert_lag(&mut self, ifindex: IfIndex, lag: Lag) -> Option<Lag> {
        self.lags.insert(ifindex, lag)
    }

    pub fn remove_lag(&mut self, ifindex: IfIndex) -> Option<Lag> {
        self.lags.remove(&ifindex)
    }

    pub fn lags(&self) -> impl Iterator<Item = (IfIndex, &Lag)> {
        self.lags.iter().map(|(idx, lag)| (*idx, lag))
    }

    // VLANs

    pub fn vlan(&self, ifindex: IfIndex) -> Option<&Vlan> {
        self.vlans.get(&ifindex)
    }

    pub fn vlan_mut(&mut self, ifindex: IfIndex) -> Option<&mut Vlan> {
        self.vlans.get_mut(&ifindex)
    }

    pub fn insert_vlan(&mut self, ifindex: IfIndex, vlan: Vlan) -> Option<Vlan> {
        self.vlans.insert(ifindex, vlan)
    }

    pub fn remove_vlan(&mut self, ifindex: IfIndex) -> Option<Vlan> {
        self.vlans.remove(&ifindex)
    }

    pub fn vlans(&self) -> impl Iterator<Item = (IfIndex, &Vlan)> {
        self.vlans.iter().map(|(idx, vlan)| (*idx, vlan))
    }

    // L3 interfaces

    pub fn l3_intf(&self, ifindex: IfIndex) -> Option<&L3Interface> {
        self.l3_intfs.get(&ifindex)
    }

    pub fn l3_intf_mut(&mut self, ifindex: IfIndex) -> Option<&mut L3Interface> {
        self.l3_intfs.get_mut(&ifindex)
    }

    pub fn insert_l3_intf(&mut self, ifindex: IfIndex, intf: L3Interface) -> Option<L3Interface> {
        self.l3_intfs.insert(ifindex, intf)
    }

    pub fn remove_l3_intf(&mut self, ifindex: IfIndex) -> Option<L3Interface> {
        self.l3_intfs.remove(&ifindex)
    }

    pub fn l3_intfs(&self) -> impl Iterator<Item = (IfIndex, &L3Interface)> {
        self.l3_intfs.iter().map(|(idx, intf)| (*idx, intf))
    }

    /// Returns true if `ifindex` currently carries an IPv4 address.
    pub fn is_l3_capable(&self, ifindex: IfIndex) -> bool {
        self.l3_intfs.contains_key(&ifindex)
    }

    /// Physical ports reachable through a VLAN member.
    pub fn member_ports(&self, member: Member) -> Vec<IfIndex> {
        match member {
            Member::Port(idx) => vec![idx],
            Member::Lag(idx) => self
                .lag(idx)
                .map(|lag| lag.ports.iter().copied().collect())
                .unwrap_or_default(),
        }
    }

    /// Records that `lag` is a member of `vlan_id`.
    pub fn lag_register_vlan(&mut self, lag: IfIndex, vlan_id: VlanId, tagging: Tagging) {
        match self.lags.get_mut(&lag) {
            Some(entry) => {
                if tagging == Tagging::Untagged {
                    entry.untagged_vlan = vlan_id;
                }
                entry.vlans.insert(vlan_id);
            }
            None => debug!(%lag, %vlan_id, "VLAN references unknown LAG"),
        }
    }

    /// Registers `lag` on every VLAN that already lists it as a member.
    ///
    /// VLAN notifications may name a LAG before the LAG itself is created.
    pub fn lag_adopt_vlans(&mut self, lag: IfIndex) {
        let member = Member::Lag(lag);
        let found: Vec<(VlanId, Tagging)> = self
            .vlans
            .iter()
            .filter_map(|(idx, vlan)| {
                let tagging = vlan.tagging_of(&member)?;
                let vlan_id = u16::try_from(idx.id()).ok()?;
                Some((VlanId::new(vlan_id).ok()?, tagging))
            })
            .collect();
        for (vlan_id, tagging) in found {
            self.lag_register_vlan(lag, vlan_id, tagging);
        }
    }

    /// Reverses [`lag_register_vlan`](Self::lag_register_vlan).
    pub fn lag_unregister_vlan(&mut self, lag: IfIndex, vlan_id: VlanId, tagging: Tagging) {
        if let Some(entry) = self.lags.get_mut(&lag) {
            if tagging == Tagging::Untagged && entry.untagged_vlan == vlan_id {
                entry.untagged_vlan = VlanId::RESERVED;
            }
            entry.vlans.remove(&vlan_id);
        }
    }

    /// MAC of the first physical port found under an L3 interface.
    ///
    /// Walks VLAN → {LAG → ports, port} (untagged members first), LAG → ports,
    /// or the port itself.
    pub fn resolve_mac(&self, l3_ifindex: IfIndex) -> Option<MacAddress> {
        let candidates: Vec<IfIndex> = match l3_ifindex.if_type() {
            IfType::Vlan => self
                .vlan(l3_ifindex)?
                .members()
                .flat_map(|(member, _)| self.member_ports(member))
                .collect(),
            IfType::Lag => self.member_ports(Member::Lag(l3_ifindex)),
            IfType::Port => vec![l3_ifindex],
            _ => return None,
        };

        candidates
            .into_iter()
            .find_map(|idx| self.port(idx).and_then(|port| port.mac))
    }

    /// Logs the whole store at debug level.
    pub fn dump(&self) {
        for (idx, port) in &self.ports {
            debug!(
                %idx,
                if_name = %port.name,
                mac = ?port.mac,
                oper_up = port.oper_up,
                untagged_vlan = %port.untagged_vlan,
                bindings = ?port.l3_bindings,
                rx_state = ?port.rx_state(),
                "port"
            );
        }
        for (idx, lag) in &self.lags {
            debug!(%idx, if_name = %lag.name, ports = ?lag.ports, vlans = ?lag.vlans,
                untagged_vlan = %lag.untagged_vlan, "lag");
        }
        for (idx, vlan) in &self.vlans {
            debug!(%idx, if_name = %vlan.name, untagged = ?vlan.untagged, tagged = ?vlan.tagged, "vlan");
        }
        for (idx, intf) in &self.l3_intfs {
            debug!(%idx, if_name = %intf.name, addr = %intf.addr, oper_up = intf.oper_up, "l3 interface");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::L3Target;
    use pretty_assertions::assert_eq;

    fn port_idx(id: u32) -> IfIndex {
        IfIndex::new(IfType::Port, id)
    }

    fn port_with_mac(name: &str, last: u8) -> Port {
        let mut port = Port::new(name);
        port.mac = Some(MacAddress::new([0, 0x11, 0x22, 0x33, 0x44, last]));
        port
    }

    #[test]
    fn test_absent_lookups_return_none() {
        let mut store = TopologyStore::new();
        assert!(store.port(port_idx(1)).is_none());
        assert!(store.lag_mut(IfIndex::new(IfType::Lag, 1)).is_none());
        assert!(store.remove_vlan(IfIndex::vlan(10)).is_none());
        assert!(!store.is_l3_capable(IfIndex::vlan(10)));
    }

    #[test]
    fn test_lag_vlan_registration() {
        let lag = IfIndex::new(IfType::Lag, 1);
        let vlan10 = VlanId::new(10).unwrap();
        let vlan20 = VlanId::new(20).unwrap();
        let mut store = TopologyStore::new();
        store.insert_lag(lag, Lag::new("PortChannel1"));

        store.lag_register_vlan(lag, vlan10, Tagging::Untagged);
        store.lag_register_vlan(lag, vlan20, Tagging::Tagged);
        let entry = store.lag(lag).unwrap();
        assert_eq!(entry.untagged_vlan, vlan10);
        assert_eq!(entry.vlans.len(), 2);

        store.lag_unregister_vlan(lag, vlan20, Tagging::Untagged);
        assert_eq!(store.lag(lag).unwrap().untagged_vlan, vlan10);
        store.lag_unregister_vlan(lag, vlan10, Tagging::Untagged);
        let entry = store.lag(lag).unwrap();
        assert_eq!(entry.untagged_vlan, VlanId::RESERVED);
        assert!(entry.vlans.is_empty());
    }

    #[test]
    fn test_lag_adopts_vlans_listed_before_creation() {
        let lag = IfIndex::new(IfType::Lag, 1);
        let mut store = TopologyStore::new();
        let mut vlan10 = Vlan::new("Vlan10");
        vlan10.untagged.insert(Member::Lag(lag));
        store.insert_vlan(IfIndex::vlan(10), vlan10);
        let mut vlan20 = Vlan::new("Vlan20");
        vlan20.tagged.insert(Member::Lag(lag));
        store.insert_vlan(IfIndex::vlan(20), vlan20);
        store.insert_vlan(IfIndex::vlan(30), Vlan::new("Vlan30"));

        store.insert_lag(lag, Lag::new("PortChannel1"));
        store.lag_adopt_vlans(lag);

        let entry = store.lag(lag).unwrap();
        let vids: Vec<u16> = entry.vlans.iter().map(|v| v.as_u16()).collect();
        assert_eq!(vids, vec![10, 20]);
        assert_eq!(entry.untagged_vlan, VlanId::new(10).unwrap());
    }

    #[test]
    fn test_resolve_mac_through_vlan_and_lag() {
        let lag = IfIndex::new(IfType::Lag, 1);
        let vlan = IfIndex::vlan(10);
        let mut store = TopologyStore::new();
        store.insert_port(port_idx(1), port_with_mac("Ethernet1", 1));
        store.insert_port(port_idx(2), port_with_mac("Ethernet2", 2));
        store.insert_port(port_idx(3), Port::new("Ethernet3"));

        let mut lag_entry = Lag::new("PortChannel1");
        lag_entry.ports.insert(port_idx(2));
        store.insert_lag(lag, lag_entry);

        let mut vlan_entry = Vlan::new("Vlan10");
        vlan_entry.untagged.insert(Member::Port(port_idx(3)));
        vlan_entry.untagged.insert(Member::Lag(lag));
        vlan_entry.tagged.insert(Member::Port(port_idx(1)));
        store.insert_vlan(vlan, vlan_entry);

        // Ethernet3 has no MAC, so the LAG's Ethernet2 is the first hit.
        assert_eq!(
            store.resolve_mac(vlan),
            Some(MacAddress::new([0, 0x11, 0x22, 0x33, 0x44, 2]))
        );
        assert_eq!(
            store.resolve_mac(lag),
            Some(MacAddress::new([0, 0x11, 0x22, 0x33, 0x44, 2]))
        );
        assert_eq!(
            store.resolve_mac(port_idx(1)),
            Some(MacAddress::new([0, 0x11, 0x22, 0x33, 0x44, 1]))
        );
        assert_eq!(store.resolve_mac(IfIndex::vlan(99)), None);
        assert_eq!(store.resolve_mac(port_idx(3)), None);
    }

    #[test]
    fn test_is_l3_capable() {
        let vlan = IfIndex::vlan(10);
        let mut store = TopologyStore::new();
        store.insert_l3_intf(
            vlan,
            L3Interface {
                target: L3Target::decode(vlan).unwrap(),
                addr: "10.0.0.1/24".parse().unwrap(),
                name: "Vlan10".to_string(),
                oper_up: false,
            },
        );
        assert!(store.is_l3_capable(vlan));
        store.remove_l3_intf(vlan);
        assert!(!store.is_l3_capable(vlan));
    }
}
